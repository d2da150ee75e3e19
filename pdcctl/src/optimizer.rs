//! Per-SPAD count rate sweep with an adaptive ZPP period.
//!
//! Each SPAD is first measured over the plain measurement time to estimate
//! its count rate. The ZPP period is then set to half the mean time between
//! counts, which keeps the share of empty bins away from both 0 and 1, and
//! the SPAD is measured again over many such periods.

use crate::controller::Board;
use crate::error::{Error, Result};
use crate::fsm::{Bank, CtlCommand, Mode, Sequencer};
use crate::rendezvous::Rendezvous;
use crate::timer::{self, ZppWindow};
use crate::{Abort, Event};
use flume::Sender;
use pdctools::bit::{single_spad, BitOps};
use pdctools::cfg::Run;
use pdctools::de;
use pdctools::sweep::{SpadRecord, Sweep};
use pdctools::zpp::{ZppDerived, ZppSample};
use pdctools::{ALL_SPADS, N_SPAD};
use std::time::Duration;
use tracing::{debug, info, span, warn, Level};

/// ZPP period (s) from the TCRs of one measurement with `active` SPADs
/// enabled per PDC. Unavailable and non-positive rates are left out.
pub fn optimal_period(tcrs: &[Option<f64>], active: u32) -> Result<f64> {
    let valid: Vec<f64> = tcrs
        .iter()
        .flatten()
        .copied()
        .filter(|r| r.is_finite() && *r > 0.0)
        .collect();
    if valid.is_empty() || active == 0 {
        return Err(Error::NoValidRate);
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let per_spad = active as f64 / mean;
    let period = per_spad / 2.0;
    debug!("mean TCR {:.1} cps over {} PDCs, period {:.3e} s", mean, valid.len(), period);
    if !period.is_finite() || period <= 0.0 {
        return Err(Error::NonPhysicalPeriod(period));
    }
    Ok(period)
}

/// Time to count over `cycles` ZPP periods of `period` seconds
pub fn acquisition_time(period: f64, cycles: u32) -> Result<Duration> {
    let secs = period * cycles as f64;
    Duration::try_from_secs_f64(secs).map_err(|_| Error::NonPhysicalPeriod(secs))
}

/// Outcome of the two measurements of one SPAD
struct Step {
    samples: Vec<Option<ZppSample>>,
    derived: Vec<ZppDerived>,
    period: Option<f64>,
}

pub struct Optimizer {
    seq: Sequencer,
    rdv: Rendezvous,
    abort: Abort,
    board: Board,
    meas_time: Duration,
    zpp_cycles: u32,
    timeout: Duration,
    delete: bool,
    disable_factor: f64,
    events: Option<Sender<Event>>,
}

impl Optimizer {
    pub fn new(seq: Sequencer, board: Board, run: &Run, abort: Abort) -> Self {
        let store = run.results();
        let rdv = Rendezvous::new(&store.dir, &store.extension, store.poll_interval)
            .with_abort(abort.clone());
        Optimizer {
            seq,
            rdv,
            abort,
            board,
            meas_time: run.meas_time(),
            zpp_cycles: run.zpp_cycles(),
            timeout: store.timeout,
            delete: store.delete,
            disable_factor: run.disable_factor(),
            events: None,
        }
    }

    /// Report progress on `tx` as SPADs complete
    pub fn with_events(mut self, tx: Sender<Event>) -> Self {
        self.events = Some(tx);
        return self;
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rdv
    }

    /// Enable `pattern` on every PDC, count for `wait` and collect the
    /// counters of the PDCs in use
    pub fn measure(&mut self, pattern: u64, wait: Duration) -> Result<Vec<Option<ZppSample>>> {
        self.seq.set_spads(pattern, None)?;
        self.acquire(wait)
    }

    /// Like `measure`, with its own pattern for each listed PDC
    pub fn measure_patterns(&mut self, patterns: &[(u8, u64)], wait: Duration) -> Result<Vec<Option<ZppSample>>> {
        for &(pdc, pattern) in patterns {
            self.seq.set_spads(pattern, Some(pdc))?;
        }
        self.acquire(wait)
    }

    fn acquire(&mut self, wait: Duration) -> Result<Vec<Option<ZppSample>>> {
        self.seq.set_mode(Mode::Acquire)?;
        self.seq.ctl(CtlCommand::ResetZpp)?;
        timer::wait(wait, &self.abort)?;
        self.seq.pack_trigger(Bank::A)?;

        let artifact = self.rdv.await_artifact(self.timeout)?;
        let samples = artifact.read(self.board.n_pdc)?;
        artifact.release(self.delete)?;

        let mut by_pdc = de::by_pdc(&samples, self.board.n_pdc);
        for (i, s) in by_pdc.iter_mut().enumerate() {
            if !self.board.pdc_mask.check(i) {
                *s = None;
            }
        }
        Ok(by_pdc)
    }

    fn reduce(&self, samples: &[Option<ZppSample>]) -> Vec<ZppDerived> {
        samples
            .iter()
            .map(|s| s.map(|s| s.reduce(self.board.clock_period)).unwrap_or_default())
            .collect()
    }

    fn set_window(&self, period: f64) -> Result<ZppWindow> {
        let w = ZppWindow::bins(period, self.board.clock_period)?;
        timer::set_window(&self.seq, &w)?;
        Ok(w)
    }

    fn measure_spad(&mut self, spad: usize) -> Result<Step> {
        let pattern = single_spad(spad).ok_or_else(|| Error::Parse(format!("SPAD {}", spad)))?;
        let clk = self.board.clock_period;

        self.set_window(self.meas_time.as_secs_f64())?;
        let first = self.measure(pattern, self.meas_time)?;
        let tcrs: Vec<Option<f64>> = self.reduce(&first).iter().map(|d| d.tcr).collect();

        let window = optimal_period(&tcrs, 1).and_then(|p| ZppWindow::bins(p, clk));
        let window = match window {
            Ok(w) => w,
            Err(e) if !e.is_fatal() => {
                warn!("SPAD {}: {}", spad, e);
                return Ok(Step {
                    derived: vec![ZppDerived::default(); first.len()],
                    samples: first,
                    period: None,
                });
            }
            Err(e) => return Err(e),
        };
        timer::set_window(&self.seq, &window)?;

        let period = window.high_secs(clk);
        let wait = match acquisition_time(period, self.zpp_cycles) {
            Ok(w) => w,
            Err(e) => {
                warn!("SPAD {}: {}", spad, e);
                return Ok(Step {
                    derived: vec![ZppDerived::default(); first.len()],
                    samples: first,
                    period: None,
                });
            }
        };
        debug!("ZPP period {:.3e} s, measuring for {:?}", period, wait);
        let samples = self.measure(pattern, wait)?;
        Ok(Step {
            derived: self.reduce(&samples),
            samples,
            period: Some(period),
        })
    }

    fn send(&self, e: Event) {
        if let Some(tx) = &self.events {
            // main may already be gone when unwinding
            let _ = tx.send(e);
        }
    }

    /// Reference measurement with every SPAD on, then one step per SPAD.
    /// SPADs counting above the reference rate times the disable factor are
    /// marked disabled at the end, and each PDC is measured once more with
    /// only its enabled SPADs on.
    pub fn sweep(&mut self) -> Result<Sweep> {
        let n_pdc = self.board.n_pdc;
        let mut sweep = Sweep::new(n_pdc, self.meas_time.as_secs_f64());
        self.send(Event::Ready { n_pdc });

        {
            let span = span!(Level::INFO, "reference");
            let _enter = span.enter();
            self.set_window(self.meas_time.as_secs_f64())?;
            let all = self.measure(ALL_SPADS, self.meas_time)?;
            for (res, d) in sweep.results.iter_mut().zip(self.reduce(&all)) {
                res.reference = d.tcr.map(|t| t / N_SPAD as f64);
                if let Some(tcr) = d.tcr {
                    info!("PDC{}: TCR {:.1} cps with all SPADs", res.pdc, tcr);
                }
            }
        }

        for spad in 0..N_SPAD {
            let span = span!(Level::INFO, "spad", spad);
            let _enter = span.enter();
            let step = self.measure_spad(spad)?;
            for (pdc, d) in step.derived.iter().enumerate() {
                if let Some(tcr) = d.tcr {
                    debug!(
                        "PDC{}: TCR {:.1} UCR {:?} CCR {:?}",
                        pdc,
                        tcr,
                        d.ucr,
                        d.ccr_percent()
                    );
                }
            }
            sweep.record(spad, &step.samples, &step.derived, step.period);
            self.send(Event::Progress {
                spad,
                period: step.period,
                tcr: step.derived.iter().map(|d| d.tcr).collect(),
            });
        }

        let mut patterns = Vec::new();
        for res in sweep.results.iter_mut() {
            if !self.board.pdc_mask.check(res.pdc as usize) {
                continue;
            }
            patterns.push((res.pdc, res.decide(self.disable_factor)));
            let disabled = res.disabled();
            if !disabled.is_empty() {
                info!("PDC{}: disabling SPADs {:?}", res.pdc, disabled);
            }
        }

        {
            let span = span!(Level::INFO, "screened");
            let _enter = span.enter();
            let window = self.set_window(self.meas_time.as_secs_f64())?;
            let period = window.high_secs(self.board.clock_period);
            let samples = self.measure_patterns(&patterns, self.meas_time)?;
            let derived = self.reduce(&samples);
            for &(pdc, pattern) in patterns.iter() {
                let i = pdc as usize;
                let res = match sweep.results.get_mut(i) {
                    Some(r) => r,
                    None => continue,
                };
                let d = derived.get(i).copied().unwrap_or_default();
                if let Some(tcr) = d.tcr {
                    info!("PDC{}: TCR {:.1} cps with {} SPADs", pdc, tcr, pattern.count_ones());
                }
                res.screened = Some(SpadRecord {
                    sample: samples.get(i).copied().flatten(),
                    derived: d,
                    period: Some(period),
                    enabled: true,
                });
            }
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_mean_rate() {
        let p = optimal_period(&[Some(1000.0), None, Some(3000.0)], 1).unwrap();
        assert!((p - 1.0 / 2000.0 / 2.0).abs() < 1e-15);
        let p = optimal_period(&[Some(64_000.0)], 64).unwrap();
        assert!((p - 0.5e-3).abs() < 1e-15);
    }

    #[test]
    fn no_valid_rate() {
        assert!(matches!(optimal_period(&[], 1), Err(Error::NoValidRate)));
        assert!(matches!(optimal_period(&[None, None], 1), Err(Error::NoValidRate)));
        assert!(matches!(optimal_period(&[Some(0.0), Some(-1.0)], 1), Err(Error::NoValidRate)));
        assert!(matches!(optimal_period(&[Some(f64::NAN)], 1), Err(Error::NoValidRate)));
        assert!(matches!(optimal_period(&[Some(1.0)], 0), Err(Error::NoValidRate)));
    }

    #[test]
    fn acquisition_time_out_of_range() {
        assert_eq!(Duration::from_secs(1), acquisition_time(0.25, 4).unwrap());
        assert_eq!(Duration::ZERO, acquisition_time(1e-3, 0).unwrap());
        for p in [f64::NAN, f64::INFINITY, -1e-3, f64::MAX] {
            assert!(matches!(acquisition_time(p, 5), Err(Error::NonPhysicalPeriod(_))), "{}", p);
        }
    }

    #[test]
    fn positive_rates_give_positive_periods() {
        for &r in &[1e-300, 1e-3, 1.0, 2.5e3, 1e9, f64::MAX] {
            for active in [1, 2, 64] {
                let p = optimal_period(&[Some(r), Some(r * 2.0)], active).unwrap();
                assert!(p.is_finite() && p > 0.0, "{} {} -> {}", r, active, p);
            }
        }
    }
}
