//! Deserialization of ZPP result artifacts and sweep exports
//!
//! Result artifacts hold the raw counters of every PDC for one acquisition.
//! Supported are `.json`, `.tsv` and, with the `hdf5` feature, the `.h5`
//! files written by the controller data pipeline. A negative stored value is
//! the `-1` "not available" marker and reads back as `None`.

use crate::zpp::{Counter, ZppSample};
use crate::Sentinel;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Samples keyed by PDC index
pub type Samples = BTreeMap<u8, ZppSample>;

#[derive(Deserialize)]
struct JsonArtifact {
    pdc: BTreeMap<u8, BTreeMap<String, i64>>,
}

/// Deserialize a JSON artifact: `{"pdc": {"0": {"BIN": 1000, ...}, ...}}`.
/// Keys that are not counters are ignored.
pub fn json(rdr: impl Read) -> Result<Samples> {
    let artifact: JsonArtifact = serde_json::from_reader(rdr)?;
    let mut samples = Samples::new();
    for (pdc, counters) in artifact.pdc {
        let mut s = ZppSample::default();
        for (name, value) in counters {
            if let Ok(c) = name.parse::<Counter>() {
                s.set(c, Option::<u64>::from_raw(value));
            }
        }
        samples.insert(pdc, s);
    }
    Ok(samples)
}

/// Deserialize tab-separated counters (pdc, counter, value).
pub fn tsv(rdr: &mut csv::Reader<impl Read>) -> Result<Samples> {
    let mut samples = Samples::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() < 3 {
            bail!("expected pdc, counter and value, got {:?}", record);
        }
        let pdc = record[0].trim().parse::<u8>()?;
        let counter = record[1].parse::<Counter>()?;
        let value = record[2].trim().parse::<i64>()?;
        samples
            .entry(pdc)
            .or_default()
            .set(counter, Option::<u64>::from_raw(value));
    }
    Ok(samples)
}

/// Read the counters of PDCs `0..n_pdc` from the controller HDF5 layout
/// `TRANSMIT/<CTL..>/PDC/PDC_nn/PDC_DATA/ZPP/<COUNTER>`.
#[cfg(feature = "hdf5")]
pub fn hdf5(path: &Path, n_pdc: usize) -> Result<Samples> {
    let file = hdf5::File::open(path)?;
    let transmit = file.group("TRANSMIT")?;
    let ctl = transmit
        .member_names()?
        .into_iter()
        .find(|k| k.contains("CTL"))
        .context("no controller group in TRANSMIT")?;
    let ctl = transmit.group(&ctl)?;

    let mut samples = Samples::new();
    for i in 0..n_pdc {
        let zpp = match ctl.group(&format!("PDC/PDC_{:02}/PDC_DATA/ZPP", i)) {
            Ok(g) => g,
            Err(_) => continue,
        };
        let mut s = ZppSample::default();
        for c in Counter::ALL {
            if let Ok(ds) = zpp.dataset(c.name()) {
                if let Some(&v) = ds.read_raw::<i64>()?.first() {
                    s.set(c, Option::<u64>::from_raw(v));
                }
            }
        }
        samples.insert(i as u8, s);
    }
    Ok(samples)
}

/// Read an artifact, picking the format from the file extension
pub fn artifact(path: &Path, n_pdc: usize) -> Result<Samples> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let samples = match ext.as_str() {
        "json" => {
            let f = std::fs::File::open(path)?;
            json(std::io::BufReader::new(f))?
        }
        "tsv" | "txt" => {
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_path(path)?;
            tsv(&mut rdr)?
        }
        #[cfg(feature = "hdf5")]
        "h5" | "hdf5" => hdf5(path, n_pdc)?,
        _ => bail!("unsupported artifact format: {}", path.display()),
    };
    let samples = samples
        .into_iter()
        .filter(|(pdc, _)| (*pdc as usize) < n_pdc)
        .collect();
    Ok(samples)
}

/// Spread samples over PDCs `0..n_pdc`; PDCs without counters are `None`
pub fn by_pdc(samples: &Samples, n_pdc: usize) -> Vec<Option<ZppSample>> {
    (0..n_pdc)
        .map(|i| samples.get(&(i as u8)).copied().filter(|s| !s.is_empty()))
        .collect()
}

/// Deserialize the TCR columns of a semicolon-separated sweep export.
///
/// Returns, per PDC found in the header, the TCR of each SPAD row with `-1`
/// read back as `None`.
pub fn sweep_tcr(rdr: &mut csv::Reader<impl Read>) -> Result<Vec<(u8, Vec<Option<f64>>)>> {
    let headers = rdr.headers()?.clone();
    let mut cols = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        if let Some(pdc) = h.strip_prefix("PDC").and_then(|h| h.strip_suffix("_TCR (cps)")) {
            let pdc = pdc
                .parse::<u8>()
                .with_context(|| format!("bad column name {}", h))?;
            cols.push((pdc, i, Vec::new()));
        }
    }
    for result in rdr.records() {
        let record = result?;
        // only per-SPAD rows, not the screened summary
        if record.get(0).map_or(true, |idx| idx.trim().parse::<usize>().is_err()) {
            continue;
        }
        for (_, i, v) in cols.iter_mut() {
            let x = record
                .get(*i)
                .context("short row")?
                .trim()
                .parse::<f64>()?;
            v.push(Option::<f64>::from_raw(x));
        }
    }
    Ok(cols.into_iter().map(|(pdc, _, v)| (pdc, v)).collect())
}
