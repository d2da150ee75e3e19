//! Controller ZPP timer and cancellable waits

use crate::error::{Error, Result};
use crate::fsm::Sequencer;
use crate::Abort;
use pdctools::reg::ZPL1;
use std::time::{Duration, Instant};
use tracing::debug;

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// ZPP timer periods in clock ticks: `high` is the ZPP bin length, `low`
/// the gap between bins
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZppWindow {
    pub high: u32,
    pub low: u32,
}

impl ZppWindow {
    /// Convert seconds to ticks, truncating like the controller does.
    ///
    /// Fails on a period that is not positive, not finite or does not fit the
    /// timer registers.
    pub fn from_secs(high: f64, low: f64, clock_period: f64) -> Result<Self> {
        let high = ticks(high, clock_period, u32::MAX as u64)?;
        let low = ticks(low, clock_period, (1u64 << 31) - 1)?;
        Ok(ZppWindow { high, low })
    }

    /// A window with the minimal one-tick gap
    pub fn bins(period: f64, clock_period: f64) -> Result<Self> {
        ZppWindow::from_secs(period, clock_period, clock_period)
    }

    /// Register writes, enable bit (in ZPL1) last
    pub fn writes(&self) -> [(&'static str, u16); 4] {
        let en = ZPL1.fields[1].encode(1);
        [
            ("ZPH0", (self.high & 0xFFFF) as u16),
            ("ZPH1", (self.high >> 16) as u16),
            ("ZPL0", (self.low & 0xFFFF) as u16),
            ("ZPL1", ZPL1.fields[0].encode(self.low >> 16) | en),
        ]
    }

    pub fn high_secs(&self, clock_period: f64) -> f64 {
        self.high as f64 * clock_period
    }
}

fn ticks(secs: f64, clock_period: f64, max: u64) -> Result<u32> {
    let t = secs / clock_period;
    if !t.is_finite() || t < 1.0 || t > max as f64 {
        return Err(Error::NonPhysicalPeriod(secs));
    }
    Ok(t as u32)
}

pub fn set_window(seq: &Sequencer, w: &ZppWindow) -> Result<()> {
    debug!("ZPP window high {} low {} ticks", w.high, w.low);
    seq.write_ordered(&w.writes())
}

/// Sleep for `dur`, waking regularly to honor an operator abort
pub fn wait(dur: Duration, abort: &Abort) -> Result<()> {
    let start = Instant::now();
    loop {
        abort.check()?;
        let left = match dur.checked_sub(start.elapsed()) {
            Some(d) if !d.is_zero() => d,
            _ => return Ok(()),
        };
        std::thread::sleep(left.min(WAIT_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_registers() {
        // 100 ms at 10 ns is 10^7 ticks = 0x0098_9680
        let w = ZppWindow::bins(0.1, 10e-9).unwrap();
        assert_eq!(10_000_000, w.high);
        assert_eq!(1, w.low);
        assert_eq!(
            [("ZPH0", 0x9680), ("ZPH1", 0x0098), ("ZPL0", 0x0001), ("ZPL1", 0x8000)],
            w.writes(),
        );
    }

    #[test]
    fn non_physical_windows() {
        assert!(ZppWindow::bins(0.0, 10e-9).is_err());
        assert!(ZppWindow::bins(-1.0, 10e-9).is_err());
        assert!(ZppWindow::bins(f64::NAN, 10e-9).is_err());
        assert!(ZppWindow::bins(1e3, 10e-9).is_err());
        assert!(ZppWindow::bins(40.0, 10e-9).is_ok());
    }

    #[test]
    fn wait_is_cancellable() {
        let abort = Abort::default();
        abort.raise();
        let t = Instant::now();
        assert!(matches!(wait(Duration::from_secs(5), &abort), Err(Error::Interrupted)));
        assert!(t.elapsed() < Duration::from_secs(1));
        assert!(wait(Duration::from_millis(1), &Abort::default()).is_ok());
    }
}
