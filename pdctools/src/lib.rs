pub mod bit;
pub mod cfg;
pub mod de;
pub mod reg;
pub mod ser;
pub mod sweep;
pub mod zpp;

/// Controller system clock period in seconds
pub const CLOCK_PERIOD: f64 = 10e-9;
/// Number of SPADs (channels) on one PDC
pub const N_SPAD: usize = 64;
/// Upper bound on the number of PDCs one controller addresses
pub const N_PDC_MAX: usize = 32;
/// Pattern enabling every SPAD of a PDC
pub const ALL_SPADS: u64 = u64::MAX;

/// Marker written to files wherever a value is not available
pub const SENTINEL: i64 = -1;

/// Conversion between `Option` values and the `-1` convention used in files.
///
/// Inside the crates a missing value is always `None`; the sentinel only
/// exists at the edge where counters are read from or written to disk.
pub trait Sentinel: Sized {
    type Raw;
    fn or_sentinel(&self) -> Self::Raw;
    fn from_raw(raw: Self::Raw) -> Self;
}

impl Sentinel for Option<u64> {
    type Raw = i64;

    fn or_sentinel(&self) -> i64 {
        match *self {
            Some(v) => i64::try_from(v).unwrap_or(i64::MAX),
            None => SENTINEL,
        }
    }

    fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            return None;
        }
        return Some(raw as u64);
    }
}

impl Sentinel for Option<f64> {
    type Raw = f64;

    fn or_sentinel(&self) -> f64 {
        return self.unwrap_or(SENTINEL as f64);
    }

    fn from_raw(raw: f64) -> Self {
        if raw < 0.0 || !raw.is_finite() {
            return None;
        }
        return Some(raw);
    }
}
