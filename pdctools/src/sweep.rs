//! Per-SPAD sweep results and their population statistics

use crate::bit::BitOps;
use crate::zpp::{ZppDerived, ZppSample};
use crate::{ALL_SPADS, N_SPAD};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// What was measured for one SPAD of one PDC
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpadRecord {
    pub sample: Option<ZppSample>,
    pub derived: ZppDerived,
    /// ZPP period (s) the final measurement ran with
    pub period: Option<f64>,
    pub enabled: bool,
}

/// Results of a full sweep over the SPADs of one PDC
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub pdc: u8,
    /// Reference TCR (cps) of one SPAD, from the all-enabled measurement
    pub reference: Option<f64>,
    pub spads: Vec<SpadRecord>,
    /// Measurement with only the enabled SPADs on, taken after `decide`
    #[serde(default)]
    pub screened: Option<SpadRecord>,
}

impl SweepResult {
    pub fn new(pdc: u8) -> Self {
        SweepResult {
            pdc,
            reference: None,
            spads: vec![SpadRecord { enabled: true, ..SpadRecord::default() }; N_SPAD],
            screened: None,
        }
    }

    pub fn record(&mut self, spad: usize, sample: Option<ZppSample>, derived: ZppDerived, period: Option<f64>) {
        if let Some(r) = self.spads.get_mut(spad) {
            r.sample = sample;
            r.derived = derived;
            r.period = period;
        }
    }

    /// A PDC is valid once it produced at least one non-empty sample
    pub fn is_valid(&self) -> bool {
        self.spads
            .iter()
            .any(|r| matches!(r.sample, Some(s) if !s.is_empty()))
    }

    pub fn population(&self) -> Population {
        Population::new(self.spads.iter().filter_map(|r| r.derived.tcr))
    }

    /// Mark SPADs whose TCR exceeds `factor` times the reference as disabled.
    ///
    /// SPADs without a valid TCR stay enabled, as does every SPAD when there
    /// is no reference. Returns the resulting enable pattern.
    pub fn decide(&mut self, factor: f64) -> u64 {
        let threshold = self.reference.map(|r| r * factor);
        for r in self.spads.iter_mut() {
            r.enabled = match (r.derived.tcr, threshold) {
                (Some(tcr), Some(th)) => tcr <= th,
                _ => true,
            };
        }
        return self.enable_pattern();
    }

    pub fn enable_pattern(&self) -> u64 {
        let mut p = ALL_SPADS;
        for (i, r) in self.spads.iter().enumerate().take(N_SPAD) {
            if !r.enabled {
                p.clear(i);
            }
        }
        return p;
    }

    pub fn disabled(&self) -> Vec<u8> {
        self.spads
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.enabled)
            .map(|(i, _)| i as u8)
            .collect()
    }
}

/// A sweep over every PDC of a controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    /// measurement time (s) used to estimate the count rate
    pub meas_time: f64,
    pub results: Vec<SweepResult>,
}

impl Sweep {
    pub fn new(n_pdc: usize, meas_time: f64) -> Self {
        Sweep {
            meas_time,
            results: (0..n_pdc).map(|i| SweepResult::new(i as u8)).collect(),
        }
    }

    /// Store one measurement step, where `samples` is indexed by PDC
    pub fn record(&mut self, spad: usize, samples: &[Option<ZppSample>], derived: &[ZppDerived], period: Option<f64>) {
        for (res, (s, d)) in self.results.iter_mut().zip(samples.iter().zip(derived)) {
            res.record(spad, *s, *d, period);
        }
    }

    pub fn valid(&self) -> impl Iterator<Item = &SweepResult> {
        self.results.iter().filter(|r| r.is_valid())
    }
}

/// Sorted population of valid rates
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Population {
    values: Vec<f64>,
}

impl Population {
    /// Non-finite values are dropped
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        let values = values
            .into_iter()
            .filter(|v| v.is_finite())
            .sorted_by(|a, b| a.total_cmp(b))
            .collect();
        Population { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        return Some(self.values.iter().sum::<f64>() / self.values.len() as f64);
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Linearly interpolated percentile, `p` in [0, 100]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.values.len();
        if n == 0 || !(0.0..=100.0).contains(&p) {
            return None;
        }
        let rank = p / 100.0 * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        return Some(self.values[lo] + (self.values[hi] - self.values[lo]) * frac);
    }

    /// Percentile axis (0 to 100 %) matching `values()`, for cumulative plots
    pub fn axis(&self) -> Vec<f64> {
        let n = self.values.len();
        match n {
            0 => Vec::new(),
            1 => vec![0.0],
            _ => (0..n).map(|i| 100.0 * i as f64 / (n - 1) as f64).collect(),
        }
    }
}
