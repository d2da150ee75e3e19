//! Bitmask tools for SPAD enable patterns and PDC enable masks
//!
//! SPADs and PDCs are both 0-indexed, so bit `i` of a pattern is SPAD `i`
//! and bit `i` of a mask is PDC `i`.

use bit_iter::BitIter;
use crate::{N_PDC_MAX, N_SPAD};

/// Convert SPAD indices into a 64-bit enable pattern
pub fn spads_to_pattern(spads: &[u8]) -> u64 {
    let mut p = 0u64;
    for &s in spads {
        p.set(s as usize % N_SPAD);
    }
    return p;
}

/// Returns all SPADs enabled in a pattern
pub fn pattern_to_spads(p: u64) -> Vec<u8> {
    BitIter::from(p).map(|b| b as u8).collect()
}

/// Pattern with only `spad` enabled, if it exists on a PDC
pub fn single_spad(spad: usize) -> Option<u64> {
    if spad >= N_SPAD {
        return None;
    }
    return Some(1u64 << spad);
}

/// Returns the single SPAD if the pattern has only one enabled
pub fn pattern_to_single(p: u64) -> Option<u8> {
    match p.count_ones() {
        1 => Some(p.trailing_zeros() as u8),
        _ => None,
    }
}

/// Convert PDC indices into an enable mask
pub fn pdcs_to_mask(pdcs: &[u8]) -> u32 {
    let mut m = 0u32;
    for &p in pdcs {
        m.set(p as usize % N_PDC_MAX);
    }
    return m;
}

/// Returns all PDCs enabled in a mask
pub fn mask_to_pdcs(m: u32) -> Vec<u8> {
    BitIter::from(m).map(|b| b as u8).collect()
}

// Bitwise set/clear/check operations on register words and patterns

use std::ops::{BitAndAssign, BitOrAssign};
use num_traits::{FromPrimitive, PrimInt, Unsigned};

pub trait BitOps:
    PrimInt
    + BitAndAssign
    + BitOrAssign
    + FromPrimitive
    + Unsigned
{
    fn set(&mut self, b: usize);
    fn clear(&mut self, b: usize);
    fn check(self, b: usize) -> bool;
}

macro_rules! impl_bitops {
    ($($t:ty),*) => {$(
        impl BitOps for $t {
            #[inline]
            fn set(&mut self, b: usize) {
                *self |= 1 << b;
            }

            #[inline]
            fn clear(&mut self, b: usize) {
                *self &= !(1 << b);
            }

            #[inline]
            fn check(self, b: usize) -> bool {
                return self >> b & 1 == 1;
            }
        }
    )*};
}

impl_bitops!(u8, u16, u32, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spad_patterns() {
        assert_eq!(0b01, spads_to_pattern(&[0]));
        assert_eq!(0b10, spads_to_pattern(&[1]));
        assert_eq!(0b11, spads_to_pattern(&[0, 1]));
        assert_eq!(0x8000_0000_0000_0000, spads_to_pattern(&[63]));
        assert_eq!(Some(1 << 63), single_spad(63));
        assert_eq!(None, single_spad(64));
    }

    #[test]
    fn bijective_pdc_masks() {
        // Exhaustively check the low half, then spot check the high PDCs
        for m in (u16::MIN..=u16::MAX).map(u32::from).chain([0x1_0000, 0x8000_0001, u32::MAX]) {
            let pdcs = mask_to_pdcs(m);
            assert_eq!(m, pdcs_to_mask(&pdcs));
            assert_eq!(m.count_ones() as usize, pdcs.len());
        }
    }

    #[test]
    fn single_spad_roundtrip() {
        for i in 0..N_SPAD {
            let p = single_spad(i).unwrap();
            assert_eq!(Some(i as u8), pattern_to_single(p));
            assert_eq!(vec![i as u8], pattern_to_spads(p));
        }
        assert_eq!(None, pattern_to_single(0));
        assert_eq!(None, pattern_to_single(0b11));
        assert_eq!(64, pattern_to_spads(u64::MAX).len());
    }

    #[test]
    fn bitops_set_clear() {
        let mut w = 0u16;
        w.set(15);
        w.set(0);
        assert_eq!(0x8001, w);
        assert!(w.check(15));
        w.clear(15);
        assert_eq!(0x0001, w);
        assert!(!w.check(15));
        let mut p = 0u64;
        p.set(63);
        assert!(p.check(63));
    }
}
