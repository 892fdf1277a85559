// Copyright 2022, 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Tuning parameters for the sieve, indexed by input bit length.
//!
//! The table was calibrated on random semiprimes. Since the cost of
//! switching polynomials is small, intervals are kept short to preserve
//! the yield of the large prime variation (values of the polynomials
//! grow linearly with the interval width).

use std::cmp::{max, min};

/// Sieve cache blocks, sized for typical L1 caches.
pub const BLOCK_SIZE: usize = 65536;

/// Fuzz subtracted from the sieve threshold to compensate rounded
/// logarithms; false positives are eliminated by trial division.
pub const BITS_ADJUST: u32 = 5;

/// Largest accepted input size. The last table row is already
/// impractical on a single machine.
pub const MAX_BITS: u32 = 270;

// Rows are (bit size, multiplier candidates primes, factor base size,
// unsieved primes, sieve interval).
// Between rows, the factor base size and interval are interpolated.
const TUNE_TABLE: &[(u32, u32, u32, u32, u32)] = &[
    (10, 40, 12, 4, 4096),
    (20, 40, 20, 5, 4096),
    (30, 50, 30, 6, 4096),
    (40, 50, 50, 7, 8192),
    (50, 50, 80, 8, 8192),
    (60, 50, 100, 9, 8192),
    (70, 50, 300, 9, 12288),
    (80, 100, 550, 11, 16384),
    (90, 100, 1000, 13, 20480),
    (100, 100, 1600, 15, 24576),
    (110, 100, 2200, 17, 32768),
    (120, 100, 3000, 19, 40960),
    (130, 100, 4500, 21, 49152),
    (140, 100, 6500, 23, 65536),
    (150, 100, 9500, 25, 81920),
    (160, 150, 14000, 27, 2 * 65536),
    (170, 150, 20000, 27, 2 * 65536),
    (180, 150, 27000, 27, 3 * 65536),
    (190, 150, 35000, 27, 4 * 65536),
    (200, 150, 45000, 27, 4 * 65536),
    (210, 150, 60000, 27, 5 * 65536),
    (220, 150, 80000, 27, 5 * 65536),
    (230, 150, 100000, 27, 6 * 65536),
    (240, 150, 120000, 27, 6 * 65536),
    (250, 150, 140000, 27, 6 * 65536),
    (260, 200, 150000, 27, 6 * 65536),
    (270, 300, 160000, 27, 6 * 65536),
];

fn tune_row(bits: u32) -> usize {
    let idx = TUNE_TABLE.partition_point(|&(sz, _, _, _, _)| sz <= bits);
    min(max(idx, 1), TUNE_TABLE.len()) - 1
}

fn interpolate(bits: u32, lo: (u32, u32), hi: (u32, u32)) -> u32 {
    let (b0, v0) = lo;
    let (b1, v1) = hi;
    if bits <= b0 {
        v0
    } else if bits >= b1 {
        v1
    } else {
        ((b1 - bits) * v0 + (bits - b0) * v1) / (b1 - b0)
    }
}

/// Number of candidate primes examined by the multiplier selection.
pub fn multiplier_primes(bits: u32) -> u32 {
    TUNE_TABLE[tune_row(bits)].1
}

/// Factor base size (number of primes p such that kN is a square mod p).
pub fn fb_size(bits: u32) -> u32 {
    let i = tune_row(bits);
    if i + 1 == TUNE_TABLE.len() {
        return TUNE_TABLE[i].2;
    }
    let (lo, hi) = (TUNE_TABLE[i], TUNE_TABLE[i + 1]);
    interpolate(bits, (lo.0, lo.2), (hi.0, hi.2))
}

/// Number of leading factor base primes excluded from the sieve
/// and handled by direct trial division.
pub fn small_prime_count(bits: u32) -> u32 {
    TUNE_TABLE[tune_row(bits)].3
}

/// Sieve interval size in bytes (the interval is [-M, M] with 2M bytes).
pub fn interval_size(bits: u32) -> u32 {
    let i = tune_row(bits);
    let sz = if i + 1 == TUNE_TABLE.len() {
        TUNE_TABLE[i].4
    } else {
        let (lo, hi) = (TUNE_TABLE[i], TUNE_TABLE[i + 1]);
        interpolate(bits, (lo.0, lo.4), (hi.0, hi.4))
    };
    // Interpolation can break the page alignment of the table values.
    sz & !4095
}

/// Number of primes in the A coefficient, including the pivot.
///
/// A is about sqrt(2N)/M so the factors of A0 live near
/// (sqrt(2N)/M)^(1/s), which must remain inside the factor base.
pub fn a_factor_count(bits: u32) -> u32 {
    match bits {
        0..=69 => 2,
        70..=99 => 3,
        100..=129 => 4,
        130..=149 => 5,
        150..=169 => 6,
        170..=189 => 7,
        190..=209 => 8,
        210..=239 => 9,
        240..=269 => 10,
        _ => 11,
    }
}

/// Multiplier of the factor base bound defining the single large
/// prime limit.
pub fn large_prime_factor(bits: u32) -> u64 {
    match bits {
        // Large cofactors compensate tiny intervals.
        0..=49 => 100,
        50..=100 => 300 - 2 * bits as u64, // 200..100
        _ => max(100, bits as u64),
    }
}

/// Surplus of relations collected beyond the factor base size, so that
/// the kernel of the relation matrix has comfortable dimension.
pub fn extra_relations(fb_len: usize) -> usize {
    min(64, 16 + fb_len / 4)
}

#[test]
fn test_tune_table() {
    // Interpolation must be monotonic in the input size.
    let mut prev_fb = 0;
    let mut prev_m = 0;
    for bits in 10..=270 {
        let fb = fb_size(bits);
        let m = interval_size(bits);
        assert!(fb >= prev_fb, "fb size decreases at {bits} bits");
        assert!(m >= prev_m, "interval decreases at {bits} bits");
        assert!(m % 4096 == 0);
        (prev_fb, prev_m) = (fb, m);
    }
    assert_eq!(fb_size(10), 12);
    assert!(fb_size(100) >= 1500 && fb_size(100) <= 1700);
    assert_eq!(fb_size(270), 160000);
    assert!(small_prime_count(13) >= 2);
    assert_eq!(a_factor_count(13), 2);
}
