//! Zero-Photon-Probability reduction of PDC histogram counters
//!
//! The controller histograms a PDC's summed SPAD output in bins of `PRD`
//! clock cycles. From the number of bins (`BIN`), the total event count
//! (`TOT`) and the number of bins with no event at all (`NUL`) we get:
//!
//! - TCR, the total count rate: mean events per bin over the bin length
//! - UCR, the uncorrelated (dark) count rate: `-ln(P0)` over the bin length,
//!   where `P0 = NUL / BIN` is the zero-event probability of a Poisson process
//! - CCR, the correlated fraction `(TCR - UCR) / TCR`, which is the afterpulse
//!   probability when a single SPAD is enabled
//!
//! Anything that cannot be computed is `None`. A missing rate never becomes 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Counters the controller reports per PDC
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Counter {
    AVG,
    BIN,
    LAST,
    MAX,
    MIN,
    NUL,
    PRD,
    TOT,
}

impl Counter {
    pub const ALL: [Counter; 8] = [
        Counter::AVG,
        Counter::BIN,
        Counter::LAST,
        Counter::MAX,
        Counter::MIN,
        Counter::NUL,
        Counter::PRD,
        Counter::TOT,
    ];

    /// Counters kept in sweep exports
    pub const EXPORTED: [Counter; 5] = [
        Counter::AVG,
        Counter::BIN,
        Counter::NUL,
        Counter::PRD,
        Counter::TOT,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::AVG => "AVG",
            Counter::BIN => "BIN",
            Counter::LAST => "LAST",
            Counter::MAX => "MAX",
            Counter::MIN => "MIN",
            Counter::NUL => "NUL",
            Counter::PRD => "PRD",
            Counter::TOT => "TOT",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Counter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match Counter::ALL.iter().find(|c| c.name() == s.trim()) {
            Some(&c) => Ok(c),
            None => anyhow::bail!("unknown ZPP counter {}", s),
        }
    }
}

/// Raw counters read for one PDC during one acquisition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ZppSample {
    pub avg: Option<u64>,
    pub bin: Option<u64>,
    pub last: Option<u64>,
    pub max: Option<u64>,
    pub min: Option<u64>,
    pub nul: Option<u64>,
    pub prd: Option<u64>,
    pub tot: Option<u64>,
}

impl ZppSample {
    pub fn get(&self, c: Counter) -> Option<u64> {
        match c {
            Counter::AVG => self.avg,
            Counter::BIN => self.bin,
            Counter::LAST => self.last,
            Counter::MAX => self.max,
            Counter::MIN => self.min,
            Counter::NUL => self.nul,
            Counter::PRD => self.prd,
            Counter::TOT => self.tot,
        }
    }

    pub fn set(&mut self, c: Counter, v: Option<u64>) {
        let slot = match c {
            Counter::AVG => &mut self.avg,
            Counter::BIN => &mut self.bin,
            Counter::LAST => &mut self.last,
            Counter::MAX => &mut self.max,
            Counter::MIN => &mut self.min,
            Counter::NUL => &mut self.nul,
            Counter::PRD => &mut self.prd,
            Counter::TOT => &mut self.tot,
        };
        *slot = v;
    }

    /// True when the PDC reported no counter at all
    pub fn is_empty(&self) -> bool {
        Counter::ALL.iter().all(|&c| self.get(c).is_none())
    }

    pub fn reduce(&self, clock_period: f64) -> ZppDerived {
        reduce(self, clock_period)
    }
}

/// Rates derived from one sample
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZppDerived {
    /// total count rate (cps)
    pub tcr: Option<f64>,
    /// uncorrelated count rate (cps)
    pub ucr: Option<f64>,
    /// correlated fraction of TCR, in [0, 1]
    pub ccr: Option<f64>,
}

impl ZppDerived {
    pub fn ccr_percent(&self) -> Option<f64> {
        self.ccr.map(|c| 100.0 * c)
    }
}

/// Derive TCR, UCR and CCR from raw counters.
///
/// Invariants on the result: UCR is `None` whenever TCR is, CCR is `None`
/// whenever UCR is, UCR never exceeds TCR and no rate is negative.
pub fn reduce(s: &ZppSample, clock_period: f64) -> ZppDerived {
    let mut d = ZppDerived::default();

    let (bin, prd, tot) = match (s.bin, s.prd, s.tot) {
        (Some(bin), Some(prd), Some(tot)) if bin > 0 && prd > 0 => (bin, prd, tot),
        _ => return d,
    };
    let window = clock_period * prd as f64;

    let tcr = (tot as f64 / bin as f64) / window;
    if !tcr.is_finite() || tcr < 0.0 {
        return d;
    }
    d.tcr = Some(tcr);

    if let Some(nul) = s.nul.filter(|&n| n > 0) {
        // + 0.0 turns the -0.0 of ln(1) into 0.0
        let ucr = -(nul as f64 / bin as f64).ln() / window + 0.0;
        // NUL > BIN gives a negative rate, which has no physical meaning
        if ucr.is_finite() && ucr >= 0.0 && ucr <= tcr {
            d.ucr = Some(ucr);
        }
    }

    if let Some(ucr) = d.ucr {
        if tcr > 0.0 && ucr > 0.0 {
            d.ccr = Some((tcr - ucr) / tcr);
        }
    }

    return d;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_names() {
        for c in Counter::ALL {
            assert_eq!(c, c.name().parse::<Counter>().unwrap());
        }
        assert!("NONE".parse::<Counter>().is_err());
    }

    #[test]
    fn set_get() {
        let mut s = ZppSample::default();
        assert!(s.is_empty());
        s.set(Counter::NUL, Some(3));
        assert_eq!(Some(3), s.get(Counter::NUL));
        assert_eq!(Some(3), s.nul);
        assert!(!s.is_empty());
    }
}
