//! `zppcalc [artifact]`
//!
//! Reduce the counters of a result artifact (`.json`, `.tsv`, or `.h5` with
//! the `hdf5` feature) and print `pdc TCR UCR CCR` as tab-separated values,
//! with -1 where a rate is not available. Without a path, TSV counters are
//! read from stdin.

use anyhow::Result;
use argh::FromArgs;
use pdctools::{de, Sentinel, CLOCK_PERIOD, N_PDC_MAX};
use std::path::PathBuf;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, FromArgs, Clone)]
/// reduce ZPP counters to count rates
struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    version: bool,
    /// system clock period in seconds
    #[argh(option, default = "CLOCK_PERIOD")]
    clock_period: f64,
    /// result artifact
    #[argh(positional)]
    path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    let samples = match args.path {
        Some(path) => de::artifact(&path, N_PDC_MAX)?,
        // otherwise take from stdin
        None => {
            let input = std::io::stdin();
            let input = input.lock();
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_reader(input);
            de::tsv(&mut rdr)?
        }
    };

    for (pdc, s) in samples.iter() {
        let d = s.reduce(args.clock_period);
        println!(
            "{}\t{}\t{}\t{}",
            pdc,
            d.tcr.or_sentinel(),
            d.ucr.or_sentinel(),
            d.ccr_percent().or_sentinel(),
        );
    }

    Ok(())
}
