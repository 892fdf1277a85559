// Copyright 2022 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Self-initializing quadratic sieve.
//!
//! Bibliography:
//! Alford, Pomerance, Implementing the self-initializing quadratic sieve
//! https://math.dartmouth.edu/~carlp/implementing.pdf
//!
//! The input is multiplied by a small constant k improving the density
//! of small quadratic residues, then values (Ax+B)^2 - kN are sieved
//! for smooth candidates over many polynomials sharing the coefficient
//! A. Polynomial roots are obtained by the Chinese remainder theorem
//! from factor base data, making the cost of a polynomial switch a
//! single addition per prime.
//!
//! A factorization of the original input is extracted from the GF(2)
//! kernel of the matrix of smooth relations.

use std::cmp::{max, min};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use rayon::prelude::*;

use crate::fbase::{self, FBase};
use crate::params;
use crate::poly::{A0Data, Family, Poly, Selector};
use crate::relations::{self, Relation, RelationSet};
use crate::sieve::{self, Sieve};
use crate::{FactorError, Preferences, Uint, UnexpectedFactor, Verbosity};

/// Number of pivots tried for each subset of window primes. Families
/// sharing their A0 reuse the CRT data, so pivots are cheap.
const PIVOTS_PER_A0: usize = 12;

/// Rounds of additional sieving when the linear algebra does not
/// produce a factorization.
const MAX_ALGEBRA_ROUNDS: usize = 8;

/// Factors a composite integer by the self-initializing quadratic
/// sieve. The input must be odd and have no factor small enough for
/// trial division.
pub fn siqs(
    n: &Uint,
    prefs: &Preferences,
    tpool: Option<&rayon::ThreadPool>,
) -> Result<(Uint, Uint), FactorError> {
    let v = prefs.verbosity;
    let bits = n.bits();
    let (k, score) = match fbase::select_multiplier(n, params::multiplier_primes(bits), v) {
        Ok(ks) => ks,
        // A small prime divides n.
        Err(UnexpectedFactor(p)) => return Ok(sorted(Uint::from(p), *n / Uint::from(p))),
    };
    let kn = *n * Uint::from(k);
    if v >= Verbosity::Info {
        eprintln!("Using multiplier k={k} (score {score:.2})");
    }

    // Polynomial selection needs a few primes beyond the A factors,
    // even under the smallest user override.
    let fb_size = max(prefs.fb_size.unwrap_or_else(|| params::fb_size(bits)), 5);
    let fbase = match FBase::new(&kn, fb_size, k, params::small_prime_count(bits)) {
        Ok(fb) => fb,
        // The multiplier is prime and excluded from the factor base,
        // so a prime dividing kn divides n.
        Err(UnexpectedFactor(p)) => return Ok(sorted(Uint::from(p), *n / Uint::from(p))),
    };
    if v >= Verbosity::Info {
        eprintln!("Smoothness bound {}", fbase.bound());
        eprintln!("Factor base size {} ({:?})", fbase.len(), fbase.smalls());
    }

    let m = prefs
        .interval_size
        .unwrap_or_else(|| params::interval_size(bits))
        / 2;
    let mut nfacs = params::a_factor_count(bits);
    while fbase.len() < nfacs as usize + 3 && nfacs > 2 {
        nfacs -= 1;
    }
    assert!(
        fbase.len() >= nfacs as usize + 3,
        "factor base too small for polynomial selection"
    );

    let maxlarge = fbase.bound() as u64
        * prefs
            .large_factor
            .unwrap_or_else(|| params::large_prime_factor(bits));
    if v >= Verbosity::Info {
        eprintln!("Max large prime {maxlarge}");
    }

    // Floor log2 of the half interval.
    let mlog = 31 - u32::leading_zeros(m);
    // Smooth candidates have log2 about bits(kN)/2 + log2(M) minus the
    // allowed cofactor size. Unsieved primes reduce the attainable
    // byte values, never beyond half the threshold.
    let lp_bits = 64 - maxlarge.leading_zeros();
    let mut threshold = (kn.bits() / 2 + mlog)
        .saturating_sub(lp_bits + params::BITS_ADJUST)
        .clamp(1, 127);
    threshold -= min(sieve::skipped_bits(&fbase), threshold / 2);
    let threshold = threshold as u8;
    if v >= Verbosity::Verbose {
        eprintln!(
            "Sieving interval size {}k threshold {threshold} bits",
            m >> 9
        );
    }

    let extra = prefs
        .extra_relations
        .unwrap_or_else(|| params::extra_relations(fbase.len()));
    let s = SieveSIQS {
        kn,
        fbase: &fbase,
        maxlarge,
        m,
        threshold,
        v,
        rels: RwLock::new(RelationSet::new(kn, maxlarge)),
        done: AtomicBool::new(false),
        polys_done: AtomicUsize::new(0),
        target: AtomicUsize::new(fbase.len() + extra),
    };

    let mut selector = Selector::new(&fbase, &kn, m, nfacs);
    if v >= Verbosity::Verbose {
        eprintln!("Optimal A is about {} ({nfacs} factors)", selector.target);
    }
    let mut rounds = 0;
    loop {
        // Sieve until enough relations are collected.
        while !s.done.load(Ordering::Relaxed) {
            if prefs.should_abort() {
                return Err(FactorError::Interrupted);
            }
            let Some(a0) = selector.next_a0() else {
                if v >= Verbosity::Info {
                    eprintln!("No polynomial family left");
                }
                return Err(FactorError::NotFound);
            };
            let pivots = selector.pivots_for(&a0, PIVOTS_PER_A0);
            if let Some(pool) = tpool {
                pool.install(|| {
                    pivots.par_iter().for_each(|&q_idx| {
                        if s.done.load(Ordering::Relaxed) {
                            return;
                        }
                        sieve_family(&s, &a0, q_idx);
                    })
                });
            } else {
                for &q_idx in &pivots {
                    sieve_family(&s, &a0, q_idx);
                    if s.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
            if v >= Verbosity::Info {
                let pdone = s.polys_done.load(Ordering::Relaxed);
                let mb = (2 * m as u64 * pdone as u64) >> 20;
                let rels = s.rels.read().unwrap();
                rels.log_progress(format!("Sieved {mb}M {pdone} polys"));
            }
        }
        // Linear algebra.
        let result = {
            let rels = s.rels.read().unwrap();
            relations::final_step(n, &kn, &rels.complete, v)
        };
        match result {
            Some((p, q)) => return Ok(sorted(p, q)),
            None => {
                rounds += 1;
                if rounds >= MAX_ALGEBRA_ROUNDS {
                    return Err(FactorError::NotFound);
                }
                let rlen = s.rels.read().unwrap().len();
                s.target
                    .store(rlen + max(32, fbase.len() / 16), Ordering::Relaxed);
                s.done.store(false, Ordering::Relaxed);
                if v >= Verbosity::Info {
                    eprintln!("No factorization found, sieving more relations");
                }
            }
        }
    }
}

fn sorted(p: Uint, q: Uint) -> (Uint, Uint) {
    if p <= q {
        (p, q)
    } else {
        (q, p)
    }
}

struct SieveSIQS<'a> {
    kn: Uint,
    fbase: &'a FBase,
    maxlarge: u64,
    // Half width of the sieve interval.
    m: u32,
    threshold: u8,
    v: Verbosity,
    rels: RwLock<RelationSet>,
    done: AtomicBool,
    polys_done: AtomicUsize,
    target: AtomicUsize,
}

impl<'a> SieveSIQS<'a> {
    /// Tests whether enough relations were collected, raising the
    /// target while the combined set leaves a gap.
    fn check_done(&self) -> bool {
        if self.done.load(Ordering::Relaxed) {
            return true;
        }
        let rlen = { self.rels.read().unwrap().len() };
        if rlen >= self.target.load(Ordering::Relaxed) {
            let rgap = { self.rels.read().unwrap().gap() };
            if rgap == 0 {
                if self.v >= Verbosity::Info {
                    eprintln!("Found enough relations");
                }
                self.done.store(true, Ordering::Relaxed);
                return true;
            }
            if self.v >= Verbosity::Verbose {
                eprintln!("Need {rgap} additional relations");
            }
            self.target.store(
                rlen + rgap + min(10, self.fbase.len() / 4),
                Ordering::Relaxed,
            );
        }
        false
    }
}

/// Sieves all polynomials of the family defined by A = q0 A0.
fn sieve_family(s: &SieveSIQS, a0: &A0Data, q_idx: usize) {
    let fbase = s.fbase;
    let fam = Family::new(fbase, a0, q_idx, s.m);
    let mut pol = Poly::new();
    let mut st = Sieve::new(s.m);
    for i in 0..fam.count() {
        if i == 0 {
            fam.first_poly(fbase, &s.kn, &mut pol);
        } else {
            fam.next_poly(fbase, &s.kn, &mut pol, i);
        }
        st.start_poly(&pol);
        let mut found: Vec<Relation> = vec![];
        while !st.done() {
            st.sieve_block(fbase);
            for &x in st.candidates(s.threshold).iter() {
                let rel = relations::eval_candidate(fbase, &fam, &pol, &s.kn, x, s.m, s.maxlarge);
                if let Some(rel) = rel {
                    found.push(rel);
                }
            }
            st.next_block();
        }
        // One lock acquisition per polynomial.
        if !found.is_empty() {
            let mut rels = s.rels.write().unwrap();
            for rel in found {
                rels.add(rel);
            }
        }
        s.polys_done.fetch_add(1, Ordering::Relaxed);
        if s.check_done() {
            return;
        }
    }
}

#[cfg(test)]
fn test_prefs() -> Preferences {
    Preferences {
        verbosity: Verbosity::Silent,
        ..Default::default()
    }
}

#[test]
fn test_siqs_tiny() {
    let n = Uint::from(8051u64);
    let (p, q) = siqs(&n, &test_prefs(), None).unwrap();
    assert_eq!((p, q), (Uint::from(83u64), Uint::from(97u64)));
}

#[test]
fn test_siqs_small_factor() {
    // A multiplier candidate divides the input.
    let n = Uint::from(3000009u64);
    let (p, q) = siqs(&n, &test_prefs(), None).unwrap();
    assert_eq!((p, q), (Uint::from(3u64), Uint::from(1000003u64)));
}

#[test]
fn test_siqs_40bit() {
    let n = Uint::from(611953u64 * 1000003);
    let (p, q) = siqs(&n, &test_prefs(), None).unwrap();
    assert_eq!((p, q), (Uint::from(611953u64), Uint::from(1000003u64)));
}

#[test]
fn test_siqs_60bit() {
    let n = Uint::from(1_000_000_016_000_000_063u64);
    let (p, q) = siqs(&n, &test_prefs(), None).unwrap();
    assert_eq!(
        (p, q),
        (Uint::from(1_000_000_007u64), Uint::from(1_000_000_009u64))
    );
}

#[test]
fn test_siqs_deterministic() {
    let n = Uint::from(611953u64 * 1000003);
    let r1 = siqs(&n, &test_prefs(), None).unwrap();
    let r2 = siqs(&n, &test_prefs(), None).unwrap();
    assert_eq!(r1, r2);
}

#[test]
fn test_siqs_undersized_fb_override() {
    // An override below the polynomial selection minimum is padded;
    // the sieve either succeeds or runs out of families cleanly.
    let prefs = Preferences {
        fb_size: Some(1),
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    let n = Uint::from(8051u64);
    match siqs(&n, &prefs, None) {
        Ok((p, q)) => assert_eq!(p * q, n),
        Err(FactorError::NotFound) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
}

#[test]
fn test_siqs_prefs_overrides() {
    let prefs = Preferences {
        fb_size: Some(60),
        interval_size: Some(16384),
        large_factor: Some(50),
        extra_relations: Some(24),
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    let n = Uint::from(611953u64 * 1000003);
    let (p, q) = siqs(&n, &prefs, None).unwrap();
    assert_eq!((p, q), (Uint::from(611953u64), Uint::from(1000003u64)));
}
