//! `sweepstat sweep.csv`
//!
//! Print the TCR population of every PDC in a sweep export: number of valid
//! SPADs, mean, median and the 10th and 90th percentiles.

use anyhow::{Context, Result};
use pdctools::{de, sweep::Population};
use std::env;

fn main() -> Result<()> {
    let args = env::args().collect::<Vec<_>>();
    let path = args.get(1).context("usage: sweepstat sweep.csv")?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_path(path)?;

    println!("pdc\tvalid\tmean\tmedian\tp10\tp90");
    for (pdc, tcrs) in de::sweep_tcr(&mut rdr)? {
        let pop = Population::new(tcrs.into_iter().flatten());
        let show = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| String::from("-"));
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            pdc,
            pop.len(),
            show(pop.mean()),
            show(pop.median()),
            show(pop.percentile(10.0)),
            show(pop.percentile(90.0)),
        );
    }

    Ok(())
}
