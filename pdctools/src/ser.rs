//! Serialization of ZPP counters and sweep exports

use crate::de::Samples;
use crate::sweep::{SpadRecord, Sweep};
use crate::zpp::Counter;
use crate::{Sentinel, N_SPAD};
use anyhow::Result;
use chrono::{DateTime, offset::Local};
use serde_json::{Map, Value};
use std::io::Write;

/// Format like C's `%.3E`: `5.000E+05`, `-1.000E+00`
pub fn sci(v: f64) -> String {
    if !v.is_finite() {
        return format!("{}", v).to_uppercase();
    }
    let s = format!("{:.3E}", v);
    match s.split_once('E') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}E{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

fn rate(v: Option<f64>) -> String {
    sci(v.or_sentinel())
}

/// Serialize counters to tab-separated values (pdc, counter, value).
pub fn tsv(wtr: &mut csv::Writer<impl Write>, samples: &Samples) -> Result<()> {
    for (pdc, s) in samples.iter() {
        for c in Counter::ALL {
            if let Some(v) = s.get(c) {
                wtr.write_record(&[pdc.to_string(), c.to_string(), v.to_string()])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Serialize counters as a JSON artifact, see `de::json`.
pub fn json(wtr: &mut impl Write, samples: &Samples) -> Result<()> {
    let mut pdcs = Map::new();
    for (pdc, s) in samples.iter() {
        let mut counters = Map::new();
        for c in Counter::ALL {
            if let Some(v) = s.get(c) {
                counters.insert(c.to_string(), Value::from(v));
            }
        }
        pdcs.insert(pdc.to_string(), Value::Object(counters));
    }
    let mut root = Map::new();
    root.insert(String::from("pdc"), Value::Object(pdcs));
    serde_json::to_writer(wtr, &Value::Object(root))?;
    Ok(())
}

/// Column names of the group exported for one PDC
pub fn sweep_header(pdc: u8) -> Vec<String> {
    let mut h = vec![
        format!("PDC{}_SPAD_idx", pdc),
        format!("PDC{}_TCR (cps)", pdc),
        format!("PDC{}_UCR (cps)", pdc),
        format!("PDC{}_CCR (%)", pdc),
    ];
    for c in Counter::EXPORTED {
        h.push(format!("PDC{}_{}", pdc, c));
    }
    return h;
}

/// SPAD index of the closing row, measured with the enabled SPADs only
pub const SCREENED_ROW: &str = "EN";

fn push_record(row: &mut Vec<String>, idx: String, rec: &SpadRecord) {
    row.push(idx);
    row.push(rate(rec.derived.tcr));
    row.push(rate(rec.derived.ucr));
    row.push(rate(rec.derived.ccr_percent()));
    for c in Counter::EXPORTED {
        let v = rec.sample.and_then(|s| s.get(c));
        row.push(v.or_sentinel().to_string());
    }
}

/// Serialize a sweep as a semicolon-separated table: one row per SPAD, one
/// column group per PDC that returned data. Rates are in `%.3E` notation and
/// anything not available is written as -1. When the sweep was closed by a
/// screened measurement, it follows as a last row indexed `EN`.
///
/// Returns the number of PDC groups written; with none, nothing is written.
pub fn sweep_csv(wtr: &mut csv::Writer<impl Write>, sweep: &Sweep) -> Result<usize> {
    let valid: Vec<_> = sweep.valid().collect();
    if valid.is_empty() {
        return Ok(0);
    }

    let mut header = Vec::new();
    for r in valid.iter() {
        header.extend(sweep_header(r.pdc));
    }
    wtr.write_record(&header)?;

    for spad in 0..N_SPAD {
        let mut row = Vec::with_capacity(header.len());
        for r in valid.iter() {
            let rec = r.spads.get(spad).copied().unwrap_or_default();
            push_record(&mut row, spad.to_string(), &rec);
        }
        wtr.write_record(&row)?;
    }
    if valid.iter().any(|r| r.screened.is_some()) {
        let mut row = Vec::with_capacity(header.len());
        for r in valid.iter() {
            push_record(&mut row, String::from(SCREENED_ROW), &r.screened.unwrap_or_default());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(valid.len())
}

/// `20240131_14h05m09_ZPP_PDC0_PDC1_100ms.csv`
pub fn sweep_file_name(ts: &DateTime<Local>, sweep: &Sweep) -> String {
    let pdcs: Vec<String> = sweep.valid().map(|r| format!("PDC{}", r.pdc)).collect();
    format!(
        "{}_ZPP_{}_{}ms.csv",
        ts.format("%Y%m%d_%Hh%Mm%S"),
        pdcs.join("_"),
        (sweep.meas_time * 1000.0).round() as u64,
    )
}
