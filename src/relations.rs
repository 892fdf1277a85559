// Copyright 2022 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Relations describe an equation:
//! x^2 = product(pi^ki) * cofactor mod kn
//!
//! where pi = -1 or a prime of the factor base and the cofactor is
//! either 1 (a complete relation) or a large prime below the large
//! prime bound (a partial relation).
//!
//! Two partial relations sharing their large prime combine into a
//! complete relation. Cycles involving more than two partials are not
//! searched.

use std::collections::{HashMap, HashSet};

use num_integer::Integer;
use num_traits::ToPrimitive;

use crate::arith::pow_mod;
use crate::fbase::{self, FBase};
use crate::matrix;
use crate::poly::{Family, Poly};
use crate::{Int, Uint, Verbosity};

#[derive(Clone, Debug)]
pub struct Relation {
    pub x: Uint,
    pub cofactor: u64,
    pub factors: Vec<(i64, u64)>, // -1 for the sign
}

impl Relation {
    pub fn verify(&self, kn: &Uint) -> bool {
        let mut prod = Uint::from(self.cofactor) % *kn;
        for &(p, k) in self.factors.iter() {
            if p == -1 {
                if k % 2 == 1 {
                    prod = *kn - prod;
                }
            } else {
                debug_assert!(p > 0);
                prod = (prod * pow_mod(Uint::from(p as u64), Uint::from(k), *kn)) % *kn;
            }
        }
        (self.x * self.x) % *kn == prod
    }
}

/// Factors the value of pol at interval offset i, using sieve roots to
/// select the sieved primes without dividing by all of them.
///
/// Returns None when the value is not smooth enough: the cofactor
/// after removing factor base primes must be 1 or a (probable) prime
/// below maxlarge. The factors of A are appended to account for
/// (Ax+B)^2 - kN = A * pol(x).
pub fn eval_candidate(
    fbase: &FBase,
    fam: &Family,
    pol: &Poly,
    kn: &Uint,
    i: u32,
    m: u32,
    maxlarge: u64,
) -> Option<Relation> {
    let x = i as i64 - m as i64;
    let v = pol.value(x);
    let mut factors: Vec<(i64, u64)> = Vec::with_capacity(24);
    if v.is_negative() {
        factors.push((-1, 1));
    }
    let mut cof = v.abs().to_bits();
    if cof == Uint::ZERO {
        return None;
    }
    // The multiplier divides A pol(x) = (Ax+B)^2 - kN and is coprime
    // to A.
    if fbase.k > 1 {
        let div = fbase.div(0);
        let mut exp = 0;
        loop {
            let (q, rem) = div.divmod_uint(&cof);
            if rem != 0 {
                break;
            }
            cof = q;
            exp += 1;
        }
        if exp > 0 {
            factors.push((fbase.k as i64, exp));
        }
    }
    let tz = cof.trailing_zeros();
    if tz > 0 {
        cof = cof >> tz;
        factors.push((2, tz as u64));
    }
    // Unsieved small primes are tried unconditionally.
    for idx in 2..fbase.small_count {
        let div = fbase.div(idx);
        let mut exp = 0;
        loop {
            let (q, rem) = div.divmod_uint(&cof);
            if rem != 0 {
                break;
            }
            cof = q;
            exp += 1;
        }
        if exp > 0 {
            factors.push((fbase.p(idx) as i64, exp));
        }
    }
    // Sieved primes divide the value exactly when the offset hits one
    // of their roots.
    for idx in fbase.small_count..fbase.len() {
        let div = fbase.div(idx);
        let im = div.modu64(i as u64) as u32;
        if im != pol.soln1[idx] && im != pol.soln2[idx] {
            continue;
        }
        let mut exp = 0;
        loop {
            let (q, rem) = div.divmod_uint(&cof);
            if rem != 0 {
                break;
            }
            cof = q;
            exp += 1;
        }
        debug_assert!(exp > 0, "root without divisor p={}", fbase.p(idx));
        factors.push((fbase.p(idx) as i64, exp));
    }
    // Complete with the factors of A.
    for idx in fam.a_indices() {
        let p = fbase.p(idx) as i64;
        match factors.iter_mut().find(|f| f.0 == p) {
            Some(f) => f.1 += 1,
            None => factors.push((p, 1)),
        }
    }
    let cofactor = if cof == Uint::ONE {
        1
    } else {
        let c = cof.to_u64()?;
        if c > maxlarge {
            return None;
        }
        let bound = fbase.bound() as u64;
        // All factors below the smoothness bound are removed, so a
        // cofactor below bound^2 is prime. Above it, composites made
        // of two large primes are useless and discarded. Fermat liars
        // are harmless: a pseudoprime cofactor still combines into
        // valid relations.
        if c >= bound * bound && fbase::certainly_composite(c) {
            return None;
        }
        c
    };
    let rel = Relation {
        x: pol.witness(x, kn),
        cofactor,
        factors,
    };
    debug_assert!(rel.verify(kn), "offset {i} value {v}");
    Some(rel)
}

/// A RelationSet collects relations found while sieving and combines
/// partial relations as they arrive.
#[derive(Default)]
pub struct RelationSet {
    pub n: Uint,
    pub maxlarge: u64,
    pub complete: Vec<Relation>,
    // p => relation with cofactor p
    pub partial: HashMap<u64, Relation>,
    // Witnesses and factorization fingerprints already recorded, to
    // drop duplicate relations found by overlapping polynomials and
    // mirrored witnesses (kn - x has the same square).
    seen: HashSet<Uint>,
    seen_products: HashSet<u64>,
    pub n_smooths: usize,
    pub n_partials: usize,
    pub n_combined: usize,
    pub n_duplicates: usize,
}

/// A canonical hash of the factorization, independent of factor order.
fn fingerprint(r: &Relation) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut fs = r.factors.clone();
    fs.sort_unstable();
    let mut h = DefaultHasher::new();
    r.cofactor.hash(&mut h);
    fs.hash(&mut h);
    h.finish()
}

impl RelationSet {
    pub fn new(n: Uint, maxlarge: u64) -> Self {
        RelationSet {
            n,
            maxlarge,
            ..Default::default()
        }
    }

    // Consumes the set and returns the inner vector.
    pub fn into_inner(self) -> Vec<Relation> {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.complete.len()
    }

    pub fn gap(&self) -> usize {
        relation_gap(&self.complete)
    }

    pub fn log_progress<S: AsRef<str>>(&self, prefix: S) {
        eprintln!(
            "{} found {} smooths (complete={} combined={} partials={} duplicates={})",
            prefix.as_ref(),
            self.len(),
            self.n_smooths,
            self.n_combined,
            self.n_partials,
            self.n_duplicates,
        )
    }

    pub fn add(&mut self, r: Relation) {
        if !self.seen.insert(r.x) || !self.seen_products.insert(fingerprint(&r)) {
            self.n_duplicates += 1;
            return;
        }
        if r.cofactor == 1 {
            self.n_smooths += 1;
            self.complete.push(r);
        } else if r.cofactor <= self.maxlarge {
            self.n_partials += 1;
            if !self.combine_single(&r) {
                self.partial.insert(r.cofactor, r);
            }
        }
        // Larger cofactors are not collected.
    }

    /// Combines 2 relations sharing their cofactor.
    pub fn combine(&self, r1: &Relation, r2: &Relation) -> Relation {
        debug_assert_eq!(r1.cofactor, r2.cofactor);
        let mut exps = HashMap::<i64, u64>::new();
        for &(p, k) in r1.factors.iter().chain(r2.factors.iter()) {
            *exps.entry(p).or_insert(0) += k;
        }
        let mut factors: Vec<_> = exps.into_iter().collect();
        factors.push((r1.cofactor as i64, 2));
        Relation {
            x: (r1.x * r2.x) % self.n,
            cofactor: 1,
            factors,
        }
    }

    // Tries to combine a relation with a stored partial relation.
    // The matching partial is kept for further combinations.
    fn combine_single(&mut self, r: &Relation) -> bool {
        if let Some(r0) = self.partial.get(&r.cofactor) {
            let rr = self.combine(r, r0);
            if rr.factors.iter().all(|&(_, exp)| exp % 2 == 0) {
                // A product of identical squares is useless.
                self.n_duplicates += 1;
                return false;
            }
            debug_assert!(
                rr.verify(&self.n),
                "invalid combined relation\nr1={r:?}\nr2={r0:?}\nr1*r2={rr:?}"
            );
            self.complete.push(rr);
            self.n_combined += 1;
            true
        } else {
            false
        }
    }
}

/// Number of distinct odd-exponent factors in excess of the number of
/// relations. The kernel of the relation matrix is guaranteed nonempty
/// when this reaches zero.
pub fn relation_gap(rels: &[Relation]) -> usize {
    if rels.is_empty() {
        return 1000; // infinity
    }
    let mut occs = HashSet::<i64>::new();
    for r in rels {
        for &(f, k) in r.factors.iter() {
            if k % 2 == 1 {
                occs.insert(f);
            }
        }
    }
    occs.len().saturating_sub(rels.len())
}

/// Finds dependencies among relations and extracts factors of n from
/// the resulting congruences of squares. All arithmetic happens
/// modulo kn but the extracted divisors are divisors of n.
pub fn final_step(n: &Uint, kn: &Uint, rels: &[Relation], v: Verbosity) -> Option<(Uint, Uint)> {
    for r in rels {
        debug_assert!(r.verify(kn));
    }
    // One row per factor with an odd exponent anywhere, in order of
    // first appearance.
    let mut idxs = HashMap::<i64, usize>::new();
    let mut cols = vec![];
    let mut coeffs = 0usize;
    for r in rels.iter() {
        let mut col: Vec<u32> = vec![];
        for &(f, k) in r.factors.iter() {
            if k % 2 == 0 {
                continue;
            }
            let next = idxs.len();
            let idx = *idxs.entry(f).or_insert(next);
            col.push(idx as u32);
            coeffs += 1;
        }
        col.sort_unstable();
        cols.push(col);
    }
    if v >= Verbosity::Info {
        eprintln!(
            "Build matrix {}x{} ({:.1} entries/col)",
            idxs.len(),
            cols.len(),
            coeffs as f64 / cols.len().max(1) as f64
        );
    }
    let raw = matrix::SparseMat {
        nrows: idxs.len(),
        cols,
    };
    // A factor appearing in a single relation cannot cancel, so the
    // relation is unusable and removing it can expose more of them.
    let (mat, keep) = matrix::reduce_matrix(&raw);
    if v >= Verbosity::Info && keep.len() < rels.len() {
        eprintln!("Filtered matrix {}x{}", mat.nrows, mat.cols.len());
    }
    if mat.cols.len() <= mat.nrows {
        return None;
    }
    // Block Lanczos operates on 64 columns at once and needs matrices
    // comfortably larger than its block size.
    let k = if mat.nrows < 200 {
        matrix::kernel_gauss(&mat)
    } else {
        matrix::kernel_lanczos(&mat, v)
    };
    if v >= Verbosity::Info {
        eprintln!("Found kernel of dimension {}", k.len());
    }
    for eq in k {
        let rs: Vec<&Relation> = eq.iter().map(|&i| &rels[keep[i]]).collect();
        if v >= Verbosity::Verbose {
            eprintln!("Combine {} relations...", rs.len());
        }
        let (a, b) = combine(kn, &rs);
        if v >= Verbosity::Verbose {
            eprintln!("Same square mod kN: {a} {b}");
        }
        if let Some((p, q)) = try_factor(n, a, b) {
            return Some((p, q));
        }
    }
    None
}

/// Combines relations into an identity a^2 = b^2 mod kn.
pub fn combine(kn: &Uint, rels: &[&Relation]) -> (Uint, Uint) {
    let mut a = Uint::ONE;
    for r in rels {
        a = (a * r.x) % *kn;
    }
    let mut exps = HashMap::<i64, u64>::new();
    for r in rels {
        for &(p, k) in &r.factors {
            *exps.entry(p).or_insert(0) += k;
        }
    }
    let mut b = Uint::ONE;
    for (p, k) in exps.into_iter() {
        // Kernel vectors have even exponents everywhere.
        assert_eq!(k % 2, 0);
        if p == -1 {
            continue;
        }
        b = (b * pow_mod(Uint::from(p as u64), Uint::from(k / 2), *kn)) % *kn;
    }
    debug_assert!((a * a) % *kn == (b * b) % *kn);
    (a, b)
}

/// Using a^2 = b^2 mod n, try to factor n.
pub fn try_factor(n: &Uint, a: Uint, b: Uint) -> Option<(Uint, Uint)> {
    // The congruence holds modulo every divisor of the sieved modulus.
    let (a, b) = (a % *n, b % *n);
    if a == b || a + b == *n {
        // Trivial square relation
        return None;
    }
    for t in [a + b, *n + a - b] {
        let e = Integer::extended_gcd(&Int::from_bits(*n), &Int::from_bits(t));
        let d = e.gcd.to_bits();
        if Uint::ONE < d && d < *n {
            let q = n / d;
            debug_assert!(d * q == *n);
            return Some((d, q));
        }
    }
    None
}

// Builds a relation for x^2 mod n by trial division over primes,
// for use in tests.
#[cfg(test)]
fn smooth_relation(n: &Uint, x: u64, primes: &[u32], maxcof: u64) -> Option<Relation> {
    let xx = (Uint::from(x) * Uint::from(x)) % *n;
    let mut cof = xx;
    let mut factors = vec![];
    for &p in primes {
        let div = crate::arith::Dividers::new(p);
        let mut exp = 0;
        loop {
            let (q, rem) = div.divmod_uint(&cof);
            if rem != 0 {
                break;
            }
            cof = q;
            exp += 1;
        }
        if exp > 0 {
            factors.push((p as i64, exp));
        }
    }
    let c = cof.to_u64()?;
    if c > maxcof {
        return None;
    }
    Some(Relation {
        x: Uint::from(x),
        cofactor: c,
        factors,
    })
}

#[test]
fn test_combine_partials() {
    // n = 101 * 103
    let n = Uint::from(10403u64);
    let primes: &[u32] = &[2, 3, 5, 7, 11, 13];
    // Odd-exponent primes, the part that must cancel in a merge.
    let sig = |r: &Relation| -> Vec<i64> {
        let mut s: Vec<i64> = r
            .factors
            .iter()
            .filter(|&&(_, k)| k % 2 == 1)
            .map(|&(p, _)| p)
            .collect();
        s.sort();
        s
    };
    let mut rset = RelationSet::new(n, 5000);
    // Mirror of the merge logic: a repeated factorization is a
    // duplicate, anything else combines with the first stored
    // relation for its cofactor.
    let mut first = HashMap::<u64, Vec<i64>>::new();
    let mut products = HashSet::<(u64, Vec<(i64, u64)>)>::new();
    let (mut exp_comb, mut exp_degen) = (0, 0);
    for x in 110..2000u64 {
        let Some(r) = smooth_relation(&n, x, primes, 5000) else {
            continue;
        };
        if r.cofactor == 1 {
            continue;
        }
        assert!(r.verify(&n));
        let mut fs = r.factors.clone();
        fs.sort();
        if !products.insert((r.cofactor, fs)) {
            exp_degen += 1;
        } else if let Some(s0) = first.get(&r.cofactor) {
            if *s0 == sig(&r) {
                exp_degen += 1;
            } else {
                exp_comb += 1;
            }
        } else {
            first.insert(r.cofactor, sig(&r));
        }
        rset.add(r);
    }
    assert!(exp_comb > 0, "no matching partials in test range");
    assert_eq!(rset.n_combined, exp_comb);
    assert_eq!(rset.n_duplicates, exp_degen);
    for r in &rset.complete {
        assert_eq!(r.cofactor, 1);
        assert!(r.verify(&n), "bad combined relation {r:?}");
    }
}

#[test]
fn test_partial_at_cofactor_bound() {
    // The large prime bound is inclusive on both the candidate and
    // the collection sides: a partial with cofactor exactly maxlarge
    // is stored and merges.
    let n = Uint::from(10403u64);
    let primes: &[u32] = &[2, 3, 5, 7, 11, 13];
    let odd_part = |r: &Relation| -> Vec<i64> {
        let mut s: Vec<i64> = r
            .factors
            .iter()
            .filter(|&&(_, k)| k % 2 == 1)
            .map(|&(p, _)| p)
            .collect();
        s.sort();
        s
    };
    // Two partials sharing their cofactor without forming a square.
    let mut first = HashMap::<u64, Relation>::new();
    let mut pair = None;
    for x in 110..4000u64 {
        let Some(r) = smooth_relation(&n, x, primes, 20000) else {
            continue;
        };
        if r.cofactor == 1 {
            continue;
        }
        if let Some(r0) = first.get(&r.cofactor) {
            if odd_part(r0) != odd_part(&r) {
                pair = Some((r0.clone(), r));
                break;
            }
        } else {
            first.insert(r.cofactor, r);
        }
    }
    let (r1, r2) = pair.expect("no matching partials in test range");
    let mut rset = RelationSet::new(n, r1.cofactor);
    rset.add(r1);
    rset.add(r2);
    assert_eq!(rset.n_partials, 2);
    assert_eq!(rset.n_combined, 1);
    assert_eq!(rset.len(), 1);
    assert!(rset.complete[0].verify(&n));
}

#[test]
fn test_duplicate_relations() {
    let n = Uint::from(10403u64);
    let primes: &[u32] = &[2, 3, 5, 7, 11, 13];
    let mut rset = RelationSet::new(n, 5000);
    let mut x0 = 0;
    for x in 110..2000u64 {
        if let Some(r) = smooth_relation(&n, x, primes, 1) {
            x0 = x;
            rset.add(r);
            break;
        }
    }
    assert!(x0 > 0);
    // Same witness.
    rset.add(smooth_relation(&n, x0, primes, 1).unwrap());
    // Same square via the mirrored witness n - x.
    rset.add(smooth_relation(&n, 10403 - x0, primes, 1).unwrap());
    assert_eq!(rset.len(), 1);
    assert_eq!(rset.n_duplicates, 2);
}

#[test]
fn test_final_step_small() {
    // n = 101 * 103: collect all smooth squares over a small base and
    // expect the congruences to reveal the factors.
    let n = Uint::from(10403u64);
    let primes: Vec<u32> = fbase::primes_sieve(25);
    let mut rels = vec![];
    for x in 110..5200u64 {
        if let Some(r) = smooth_relation(&n, x, &primes, 1) {
            rels.push(r);
        }
        if rels.len() >= 60 {
            break;
        }
    }
    assert!(rels.len() >= 60, "only {} relations", rels.len());
    let (p, q) = final_step(&n, &n, &rels, Verbosity::Silent).unwrap();
    let (p, q) = if p < q { (p, q) } else { (q, p) };
    assert_eq!((p, q), (Uint::from(101u64), Uint::from(103u64)));
}
