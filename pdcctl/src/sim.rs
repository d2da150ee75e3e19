//! Simulated controller for dry runs.
//!
//! Answers like a healthy board, tracks the enabled SPADs and the ZPP timer,
//! and on a packet trigger drops a JSON result file into the result
//! directory, the way the conversion pipeline does on the real setup.

use crate::channel::{CommandChannel, CommandOutput, ScriptedChannel};
use crate::error::Result;
use crate::rendezvous::IN_PROGRESS;
use pdctools::bit::BitOps;
use pdctools::de::Samples;
use pdctools::zpp::ZppSample;
use parking_lot::Mutex;
use pdctools::N_SPAD;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Dark count rate (cps) of an ordinary SPAD
const DARK_RATE: f64 = 2.0e3;
/// Every this many SPADs one is a screamer
const HOT_EVERY: usize = 13;
const HOT_GAIN: f64 = 25.0;
/// Share of correlated counts on top of the dark counts
const AFTERPULSE: f64 = 0.03;

pub struct Simulator {
    board: ScriptedChannel,
    clock_period: f64,
    dir: PathBuf,
    patterns: Vec<u64>,
    zph: [u16; 2],
    reset_at: Option<Instant>,
    packets: u64,
}

impl Simulator {
    pub fn new(n_pdc: usize, pdc_mask: u32, clock_period: f64, dir: impl Into<PathBuf>) -> Self {
        Simulator {
            board: ScriptedChannel::board(n_pdc, pdc_mask),
            clock_period,
            dir: dir.into(),
            patterns: vec![0; n_pdc],
            zph: [0, 0],
            reset_at: None,
            packets: 0,
        }
    }

    /// Handle on the log of every command received
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.board.log()
    }

    /// Count rate (cps) of one SPAD
    pub fn rate(pdc: usize, spad: usize) -> f64 {
        let base = DARK_RATE * (1.0 + 0.1 * pdc as f64) * (1.0 + (spad % 7) as f64 / 20.0);
        match spad % HOT_EVERY {
            0 => base * HOT_GAIN,
            _ => base,
        }
    }

    fn pdc_rate(&self, pdc: usize) -> f64 {
        let pattern = self.patterns[pdc];
        (0..N_SPAD)
            .filter(|&i| pattern.check(i))
            .map(|i| Simulator::rate(pdc, i))
            .sum()
    }

    fn high_ticks(&self) -> u64 {
        (self.zph[1] as u64) << 16 | self.zph[0] as u64
    }

    /// Counters one PDC would report after `elapsed` seconds
    fn sample(&self, pdc: usize, elapsed: f64) -> ZppSample {
        let prd = self.high_ticks().max(1);
        let t = prd as f64 * self.clock_period;
        // the low phase is a single tick
        let bins = (elapsed / (t + self.clock_period)).floor().max(1.0);
        let mu = self.pdc_rate(pdc) * t;
        let tot = (mu * (1.0 + AFTERPULSE) * bins).round();
        let nul = (bins * (-mu).exp()).round();
        let avg = (tot / bins).round() as u64;
        ZppSample {
            avg: Some(avg),
            bin: Some(bins as u64),
            last: Some(avg),
            max: Some((mu * 3.0).ceil() as u64 + 1),
            min: Some(match nul > 0.0 {
                true => 0,
                false => (mu / 2.0).floor() as u64,
            }),
            nul: Some(nul as u64),
            prd: Some(prd),
            tot: Some(tot as u64),
        }
    }

    fn on_spads(&mut self, cmd: &str) {
        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        let value = |flag: &str| {
            tokens
                .iter()
                .position(|t| *t == flag)
                .and_then(|i| tokens.get(i + 1))
                .and_then(|v| crate::channel::parse_int(v))
        };
        let pattern = match value("--pattern") {
            Some(p) => p,
            None => return,
        };
        match value("--spdc") {
            Some(pdc) => {
                if let Some(p) = self.patterns.get_mut(pdc as usize) {
                    *p = pattern;
                }
            }
            None => self.patterns.iter_mut().for_each(|p| *p = pattern),
        }
    }

    fn on_write(&mut self, cmd: &str) {
        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        if let [_, "-a", register, "-r", word, ..] = tokens.as_slice() {
            let word = crate::channel::parse_int(word).unwrap_or(0) as u16;
            match *register {
                "ZPH0" => self.zph[0] = word,
                "ZPH1" => self.zph[1] = word,
                _ => (),
            }
        }
    }

    fn on_packet(&mut self) -> Result<()> {
        let elapsed = self
            .reset_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        let samples: Samples = (0..self.patterns.len())
            .map(|pdc| (pdc as u8, self.sample(pdc, elapsed)))
            .collect();

        fs::create_dir_all(&self.dir)?;
        let partial = self.dir.join(format!("{}_{:06}.json", IN_PROGRESS, self.packets));
        let done = self.dir.join(format!("zpp_{:06}.json", self.packets));
        self.packets += 1;
        {
            let mut wtr = BufWriter::new(File::create(&partial)?);
            pdctools::ser::json(&mut wtr, &samples)?;
        }
        fs::rename(&partial, &done)?;
        debug!("simulated result {}", done.display());
        Ok(())
    }
}

impl CommandChannel for Simulator {
    fn run(&mut self, cmd: &str) -> Result<CommandOutput> {
        if cmd.starts_with("pdcSpad") {
            self.on_spads(cmd);
        } else if cmd.starts_with("ctlCfg -a") {
            self.on_write(cmd);
        } else if cmd == "ctlCmd -c RSTN_ZPP" {
            self.reset_at = Some(Instant::now());
        } else if cmd == "ctlCmd -c PACK_TRG_A" {
            self.on_packet()?;
        }
        self.board.run(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_spad_rate_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = Simulator::new(2, 0x3, 10e-9, dir.path());
        sim.run("pdcSpad --pattern 0x0000000000000002 --mode NONE").unwrap();
        // 1 ms bins
        sim.run("ctlCfg -a ZPH0 -r 0x86a0 -g").unwrap();
        sim.run("ctlCfg -a ZPH1 -r 0x0001 -g").unwrap();
        assert_eq!(100_000, sim.high_ticks());

        let s = sim.sample(0, 1.0);
        let d = s.reduce(10e-9);
        let expected = Simulator::rate(0, 1) * (1.0 + AFTERPULSE);
        assert!((d.tcr.unwrap() - expected).abs() / expected < 0.01);
        assert!(d.ucr.unwrap() <= d.tcr.unwrap());
    }

    #[test]
    fn packet_drops_a_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = Simulator::new(1, 0x1, 10e-9, dir.path());
        sim.run("ctlCmd -c RSTN_ZPP").unwrap();
        sim.run("ctlCmd -c PACK_TRG_A").unwrap();
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(1, files.len());
        let path = files[0].as_ref().unwrap().path();
        assert!(path.ends_with("zpp_000000.json"));
        let samples = pdctools::de::artifact(&path, 1).unwrap();
        assert_eq!(Some(0), samples[&0].tot);
    }
}
