use pdctools::zpp::{reduce, ZppDerived, ZppSample};
use pdctools::CLOCK_PERIOD;

fn sample(bin: u64, tot: u64, nul: u64, prd: u64) -> ZppSample {
    ZppSample {
        bin: Some(bin),
        tot: Some(tot),
        nul: Some(nul),
        prd: Some(prd),
        ..ZppSample::default()
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1.0)
}

#[test]
fn total_count_rate() {
    let d = reduce(&sample(1000, 500, 0, 100), CLOCK_PERIOD);
    assert!(close(500_000.0, d.tcr.unwrap()));
}

#[test]
fn no_empty_bins_means_no_ucr() {
    let d = reduce(&sample(1000, 500, 0, 100), CLOCK_PERIOD);
    assert!(d.tcr.is_some());
    assert_eq!(None, d.ucr);
    assert_eq!(None, d.ccr);
}

#[test]
fn poisson_rates() {
    // 600 of 1000 bins empty: UCR = -ln(0.6) / 1 us
    let d = reduce(&sample(1000, 600, 600, 100), CLOCK_PERIOD);
    let tcr = d.tcr.unwrap();
    let ucr = d.ucr.unwrap();
    assert!(close(600_000.0, tcr));
    assert!(close(-(0.6f64).ln() / 1e-6, ucr));
    assert!(ucr <= tcr);
    assert!(close((tcr - ucr) / tcr, d.ccr.unwrap()));
    assert!(close(100.0 * d.ccr.unwrap(), d.ccr_percent().unwrap()));
}

#[test]
fn ucr_above_tcr_is_dropped() {
    // 10 events, but only 100 of 1000 bins empty
    let d = reduce(&sample(1000, 10, 100, 100), CLOCK_PERIOD);
    assert!(d.tcr.is_some());
    assert_eq!(None, d.ucr);
    assert_eq!(None, d.ccr);
}

#[test]
fn all_bins_empty() {
    // NUL == BIN: UCR is exactly zero, so there is no correlated fraction
    let d = reduce(&sample(1000, 0, 1000, 100), CLOCK_PERIOD);
    assert_eq!(Some(0.0), d.tcr);
    assert_eq!(Some(0.0), d.ucr);
    assert!(d.ucr.unwrap().is_sign_positive());
    assert_eq!(None, d.ccr);
}

#[test]
fn more_empty_bins_than_bins() {
    let d = reduce(&sample(1000, 5, 2000, 100), CLOCK_PERIOD);
    assert!(d.tcr.is_some());
    assert_eq!(None, d.ucr);
}

#[test]
fn sentinel_cascade() {
    for s in [
        sample(0, 500, 10, 100),
        sample(1000, 500, 10, 0),
        ZppSample { tot: None, ..sample(1000, 500, 10, 100) },
        ZppSample { bin: None, ..sample(1000, 500, 10, 100) },
        ZppSample { prd: None, ..sample(1000, 500, 10, 100) },
        ZppSample::default(),
    ] {
        assert_eq!(ZppDerived::default(), reduce(&s, CLOCK_PERIOD), "{:?}", s);
    }
}

#[test]
fn bad_clock_period() {
    assert_eq!(ZppDerived::default(), reduce(&sample(1000, 500, 10, 100), 0.0));
    assert_eq!(ZppDerived::default(), reduce(&sample(1000, 500, 10, 100), -1e-9));
}

/// Derived-rate invariants hold over a grid of counters
#[test]
fn invariants() {
    for bin in [0, 1, 10, 1000] {
        for tot in [0, 1, 50, 5000] {
            for nul in [0, 1, 9, 10, 1000, 2000] {
                for prd in [0, 1, 100] {
                    let d = reduce(&sample(bin, tot, nul, prd), CLOCK_PERIOD);
                    if d.tcr.is_none() {
                        assert_eq!(None, d.ucr);
                    }
                    if d.ucr.is_none() {
                        assert_eq!(None, d.ccr);
                    }
                    if let (Some(t), Some(u)) = (d.tcr, d.ucr) {
                        assert!(u <= t);
                        assert!(u >= 0.0);
                    }
                    if let Some(c) = d.ccr {
                        assert!((0.0..=1.0).contains(&c));
                    }
                }
            }
        }
    }
}
