//! `checkrun myrun.json`
//!
//! Parse `myrun.json` and check that every register setting encodes. No
//! output and an exit code of 0 indicates success.

use anyhow::{Context, Result};
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use pdctools::cfg::Run;

fn main() -> Result<()> {
    let args = env::args().collect::<Vec<_>>();
    let path = PathBuf::from(args.get(1).context("usage: checkrun myrun.json")?);
    let file = File::open(&path)?;
    let rdr = BufReader::new(file);
    let run: Run = serde_json::from_reader(rdr)?;
    for setting in run.fsm.iter() {
        setting
            .word()
            .with_context(|| format!("in register {}", setting.register))?;
    }

    Ok(())
}
