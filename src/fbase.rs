// Copyright 2022, 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Multiplier selection and factor base construction.
//!
//! The factor base consists of primes p such that kN is a square
//! modulo p, with two reserved entries: index 0 holds the multiplier
//! itself and index 1 holds 2. All other entries are odd primes with
//! a nonzero square root of kN.

use crate::arith::{self, Dividers, Num};
use crate::{Uint, UnexpectedFactor, Verbosity};

/// A factor base of 24-bit primes with precomputed data, stored as
/// parallel vectors for memory locality.
#[derive(Clone, Debug)]
pub struct FBase {
    // The multiplier, also stored at index 0 of primes.
    pub k: u32,
    pub primes: Vec<u32>,
    // Square roots of kN modulo each prime (zero at index 0).
    pub sqrts: Vec<u32>,
    // Bit lengths, the approximate logarithms used while sieving.
    pub sizes: Vec<u8>,
    pub divs: Vec<Dividers>,
    // Entries below this index are trial divided instead of sieved.
    pub small_count: usize,
}

impl FBase {
    /// Builds a factor base of `size` primes for kN.
    ///
    /// If an odd prime not dividing k divides kN, it is a nontrivial
    /// factor of N and construction stops.
    pub fn new(kn: &Uint, size: u32, k: u32, smalls: u32) -> Result<FBase, UnexpectedFactor> {
        let size = std::cmp::max(size, 4) as usize;
        let mut primes = Vec::with_capacity(size);
        let mut sqrts = Vec::with_capacity(size);
        let mut divs = Vec::with_capacity(size);
        // Reserved entries: the multiplier and 2.
        // kN is odd so its square root modulo 2 is 1.
        primes.push(k);
        sqrts.push(0);
        divs.push(Dividers::new(k));
        primes.push(2);
        sqrts.push(1);
        divs.push(Dividers::new(2));
        // About half of all primes have kN as a quadratic residue.
        let mut want = 2 * size + 64;
        'fill: loop {
            for &p in primes_sieve(want as u32).iter() {
                if p <= 2 || p == k || p <= *primes.last().unwrap() {
                    continue;
                }
                let div = Dividers::new(p);
                let np = div.mod_uint(kn);
                if np == 0 {
                    // k is prime, so p divides N.
                    return Err(UnexpectedFactor(p as u64));
                }
                if let Some(r) = arith::sqrt_mod(np, p as u64) {
                    primes.push(p);
                    sqrts.push(r as u32);
                    divs.push(div);
                    if primes.len() == size {
                        break 'fill;
                    }
                }
            }
            want *= 2;
        }
        let sizes = primes
            .iter()
            .map(|&p| (32 - u32::leading_zeros(p)) as u8)
            .collect();
        let small_count = (smalls as usize).clamp(2, primes.len() - 1);
        Ok(FBase {
            k,
            primes,
            sqrts,
            sizes,
            divs,
            small_count,
        })
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    /// The smoothness bound (largest prime of the base).
    pub fn bound(&self) -> u32 {
        *self.primes.last().unwrap()
    }

    #[inline]
    pub fn p(&self, idx: usize) -> u32 {
        self.primes[idx]
    }

    #[inline]
    pub fn r(&self, idx: usize) -> u32 {
        self.sqrts[idx]
    }

    #[inline]
    pub fn size(&self, idx: usize) -> u8 {
        self.sizes[idx]
    }

    #[inline]
    pub fn div(&self, idx: usize) -> &Dividers {
        &self.divs[idx]
    }

    pub fn smalls(&self) -> &[u32] {
        &self.primes[..std::cmp::min(10, self.primes.len())]
    }
}

/// Candidate multipliers: 1 and the odd primes below 75.
/// Composite multipliers are excluded so that every factor base entry
/// tracks a single prime.
const MULTIPLIERS: [u32; 21] = [
    1, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73,
];

/// Selects k among odd primes such that kN is a quadratic residue
/// modulo many small primes, scored by the Knuth-Schroeppel formula.
/// The score is the expected bit length of the smooth part of sieved
/// values, relative to k=1.
///
/// A small prime dividing N can be detected here, in which case no
/// sieving is needed at all.
pub fn select_multiplier(
    n: &Uint,
    nprimes: u32,
    v: Verbosity,
) -> Result<(u32, f64), UnexpectedFactor> {
    let ps = primes_sieve(std::cmp::max(nprimes, 8));
    let mut best: u32 = 1;
    let mut best_score = f64::MIN;
    for &k in &MULTIPLIERS {
        let kdiv = Dividers::new(k);
        if k > 1 && kdiv.mod_uint(n) == 0 {
            return Err(UnexpectedFactor(k as u64));
        }
        let kn = *n * Uint::from(k);
        let mut score = -0.5 * (k as f64).ln();
        // Modulo 8: kn=1 gives 4 roots modulo 8, 16, 32...
        // (expected exponent 3/2 + 1/4 + 1/8 + ... = 2),
        // kn=5 allows division by 4 but not 8, kn=3,7 only by 2.
        score += match kn.low_u64() & 7 {
            1 => 2.0,
            5 => 1.0,
            _ => 0.5,
        } * std::f64::consts::LN_2;
        for &p in ps.iter().take(nprimes as usize) {
            if p == 2 {
                continue;
            }
            let div = Dividers::new(p);
            let np = div.mod_uint(&kn);
            let w = if np == 0 {
                if k != p && div.mod_uint(n) == 0 {
                    return Err(UnexpectedFactor(p as u64));
                }
                1.0 / (p - 1) as f64
            } else if arith::powmod64(np, (p as u64 - 1) / 2, p as u64) == 1 {
                2.0 / (p - 1) as f64
            } else {
                0.0
            };
            score += w * (p as f64).ln();
        }
        if score > best_score {
            best_score = score;
            best = k;
        }
    }
    let bits = best_score / std::f64::consts::LN_2;
    if v >= Verbosity::Verbose {
        eprintln!("Selected multiplier {best} (score {bits:.2} bits)");
    }
    Ok((best, bits))
}

/// Returns whether n is composite through a base 2 Fermat test.
/// The intended use is telling apart large prime cofactors from
/// products of two primes, where liars are harmless: a composite
/// recorded as a large prime still yields valid merged relations.
pub fn certainly_composite(n: u64) -> bool {
    if n & 1 == 0 {
        return n > 2;
    }
    n > 1 && arith::powmod64(2, n - 1, n) != 1
}

/// The first n prime numbers, by an Eratosthenes sieve over odd
/// integers.
pub fn primes_sieve(n: u32) -> Vec<u32> {
    // n-th prime is below n (ln n + ln ln n) for n >= 6.
    let x = std::cmp::max(n, 6) as f64;
    let bound = (x * (x.ln() + x.ln().ln())) as usize + 8;
    // composite[i] refers to 2i+1
    let mut composite = vec![false; bound / 2];
    let mut primes = vec![2u32];
    let mut i = 1;
    while i < composite.len() && primes.len() < n as usize {
        if !composite[i] {
            let p = 2 * i + 1;
            primes.push(p as u32);
            let mut j = (p * p) / 2;
            while j < composite.len() {
                composite[j] = true;
                j += p;
            }
        }
        i += 1;
    }
    assert!(primes.len() == n as usize || n < 1);
    primes
}

#[test]
fn test_primes_sieve() {
    let ps = primes_sieve(50000);
    assert_eq!(ps.len(), 50000);
    assert_eq!(ps.last(), Some(&611953));
    let ps = primes_sieve(6);
    assert_eq!(ps, vec![2, 3, 5, 7, 11, 13]);
}

#[test]
fn test_fbase() {
    use std::str::FromStr;

    let n = Uint::from_str("176056248311966088405511077755578022771").unwrap();
    let fb = FBase::new(&n, 100, 1, 8).unwrap();
    assert_eq!(fb.len(), 100);
    assert_eq!(fb.p(0), 1);
    assert_eq!(fb.p(1), 2);
    for idx in 2..fb.len() {
        let (p, r) = (fb.p(idx) as u64, fb.r(idx) as u64);
        assert!(r > 0 && r < p);
        assert_eq!(
            arith::mulmod64(r, r, p),
            fb.div(idx).mod_uint(&n),
            "bad root mod {p}"
        );
    }
    // Primes are sorted and odd beyond index 1.
    for idx in 3..fb.len() {
        assert!(fb.p(idx) > fb.p(idx - 1));
    }

    // A base prime dividing N is reported.
    let n = Uint::from(65537u64 * 65539) * Uint::from(89u64);
    match FBase::new(&n, 64, 1, 8) {
        Err(UnexpectedFactor(89)) => {}
        other => panic!("expected factor 89, got {other:?}"),
    }
}

#[test]
fn test_select_multiplier() {
    use std::str::FromStr;

    let n = Uint::from_str("961056798289447539465419033").unwrap();
    let (k, score) = select_multiplier(&n, 100, Verbosity::Silent).unwrap();
    assert!(MULTIPLIERS.contains(&k));
    assert!(score > 0.0, "score {score}");
    // kn must be a square modulo many primes: check determinism.
    let (k2, score2) = select_multiplier(&n, 100, Verbosity::Silent).unwrap();
    assert_eq!((k, score.to_bits()), (k2, score2.to_bits()));

    // A multiplier candidate dividing n is a factor.
    let n = Uint::from(43u64) * Uint::from_str("10000019").unwrap();
    match select_multiplier(&n, 100, Verbosity::Silent) {
        Err(UnexpectedFactor(43)) => {}
        other => panic!("expected factor 43, got {other:?}"),
    }
}

#[test]
fn test_certainly_composite() {
    for &p in &primes_sieve(5000) {
        assert!(!certainly_composite(p as u64));
    }
    assert!(certainly_composite(65537 * 65539));
    // 173142166387457 = 16605569 * 10426753 passes the base 2 test.
    assert!(!certainly_composite(173142166387457));
}
