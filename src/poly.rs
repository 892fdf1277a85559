// Copyright 2022 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Polynomial families for the self-initializing sieve.
//!
//! A family is defined by a coefficient A = q0 p1 ... pw where the pj
//! are factor base primes chosen in a window close to the optimal size,
//! and the pivot q0 is a factor base prime slightly above the window.
//! The 2^w square roots B of kN modulo A define polynomials
//! Ax^2 + 2Bx + C with C = (B^2 - kN)/A. They are visited in Gray code
//! order so that switching polynomials costs a single addition per
//! factor base prime.
//!
//! Bibliography:
//! Alford, Pomerance, Implementing the self-initializing quadratic sieve
//! https://math.dartmouth.edu/~carlp/implementing.pdf

use std::cmp::{max, min};

use crate::arith::{self, Num};
use crate::fbase::FBase;
use crate::{Int, Uint};

/// Marker for missing roots (primes dividing A have a single root).
pub const NO_ROOT: u32 = u32::MAX;

/// Streams coefficients A close to the optimal value sqrt(2kN)/M.
///
/// Subsets of a window of factor base indices are enumerated in
/// lexicographic order; the window widens towards smaller primes
/// when exhausted.
pub struct Selector<'a> {
    fbase: &'a FBase,
    pub target: Uint,
    /// Number of factors of A0, excluding the pivot.
    pub width: usize,
    // Candidate positions (factor base indices). Widening appends
    // smaller indices at the end so that combination positions
    // remain stable.
    window: Vec<usize>,
    // Window length before the last widening.
    old_len: usize,
    // Pivot candidates, above the window.
    pivots: Vec<usize>,
    // Current combination (positions into window).
    comb: Vec<usize>,
    exhausted: bool,
}

impl<'a> Selector<'a> {
    /// Prepares a selector for sieve interval [-m, m].
    ///
    /// The factor base must have at least nfacs+3 elements.
    pub fn new(fbase: &'a FBase, kn: &Uint, m: u32, nfacs: u32) -> Selector<'a> {
        // The optimal A is sqrt(2kN)/M making values almost equal to
        // M sqrt(kN/2) over the interval. Clamp for very small inputs
        // where no product of factor base primes is that small.
        let target = max(
            Uint::from(2000u64),
            arith::isqrt(*kn << 1) / Uint::from(m as u64),
        );
        let width = nfacs as usize - 1;
        let len = fbase.len();
        // Indices 0 and 1 hold the multiplier and 2.
        let hi = (2 + fbase.primes[2..]
            .partition_point(|&p| Uint::from(p).pow(nfacs) < target))
        .clamp(2 + width, len - 1);
        let win_lo = max(2, hi.saturating_sub(4 * width + 2));
        Selector {
            fbase,
            target,
            width,
            window: (win_lo..hi).collect(),
            old_len: 0,
            pivots: (hi..min(hi + 48, len)).collect(),
            comb: (0..width).collect(),
            exhausted: false,
        }
    }

    /// Returns the next subset of window primes with its precomputed
    /// CRT data, or None when the supply is exhausted.
    pub fn next_a0(&mut self) -> Option<A0Data> {
        loop {
            if self.exhausted && !self.widen() {
                return None;
            }
            // After widening, combinations entirely inside the old
            // window have already been enumerated.
            let fresh = self.old_len == 0 || self.comb.iter().any(|&c| c >= self.old_len);
            let a0 = if fresh {
                let inds: Vec<usize> = self.comb.iter().map(|&c| self.window[c]).collect();
                Some(A0Data::new(self.fbase, inds))
            } else {
                None
            };
            self.step();
            if a0.is_some() {
                return a0;
            }
        }
    }

    // Lexicographic successor of the current combination.
    fn step(&mut self) {
        let (w, n) = (self.width, self.window.len());
        let mut i = w;
        while i > 0 {
            i -= 1;
            if self.comb[i] + (w - i) < n {
                self.comb[i] += 1;
                for j in i + 1..w {
                    self.comb[j] = self.comb[j - 1] + 1;
                }
                return;
            }
        }
        self.exhausted = true;
    }

    // Grows the window downward. Returns false when no smaller prime
    // is available.
    fn widen(&mut self) -> bool {
        let lo = *self.window.iter().min().unwrap();
        if lo <= 2 {
            return false;
        }
        self.old_len = self.window.len();
        for idx in (max(2, lo.saturating_sub(self.width + 1))..lo).rev() {
            self.window.push(idx);
        }
        self.comb = (0..self.width).collect();
        self.exhausted = false;
        true
    }

    /// Pivot indices for a given A0, closest to the target first.
    pub fn pivots_for(&self, a0: &A0Data, count: usize) -> Vec<usize> {
        let q0_target = (self.target / a0.a0).low_u64() as i64;
        let mut ps = self.pivots.clone();
        ps.sort_by_key(|&i| (self.fbase.p(i) as i64 - q0_target).abs());
        ps.truncate(count);
        ps
    }
}

/// Data shared by all families with the same A0: the CRT basis for
/// the square roots of kN modulo A0.
pub struct A0Data {
    pub a0: Uint,
    /// Factor base indices of the factors of A0.
    pub inds: Vec<usize>,
    // A0 / pj
    a0_divp: Vec<Uint>,
    // rj (A0/pj)^-1 mod pj
    gamma: Vec<u32>,
}

impl A0Data {
    pub fn new(fbase: &FBase, inds: Vec<usize>) -> A0Data {
        let mut a0 = Uint::ONE;
        for &i in &inds {
            a0 *= Uint::from(fbase.p(i));
        }
        let mut a0_divp = Vec::with_capacity(inds.len());
        let mut gamma = Vec::with_capacity(inds.len());
        for &i in &inds {
            let div = fbase.div(i);
            let (q, rem) = div.divmod_uint(&a0);
            debug_assert!(rem == 0);
            // A0/pj is invertible modulo pj (A0 is squarefree).
            let g = arith::mulmod64(
                fbase.r(i) as u64,
                div.inv(div.mod_uint(&q)).unwrap(),
                fbase.p(i) as u64,
            );
            a0_divp.push(q);
            gamma.push(g as u32);
        }
        A0Data {
            a0,
            inds,
            a0_divp,
            gamma,
        }
    }
}

/// A polynomial family: the coefficient A and precomputed tables to
/// walk its 2^w polynomials and shift sieve roots in O(1) per prime.
pub struct Family {
    pub a: Uint,
    /// Factor base index of the pivot.
    pub q_idx: usize,
    /// Factor base indices of the window primes.
    pub inds: Vec<usize>,
    // CRT basis: bj = rj mod pj and 0 mod A/pj.
    b_terms: Vec<Uint>,
    // Pivot component of B (rq mod q0, 0 mod A0).
    b_pivot: Uint,
    // A^-1 mod p for each factor base index (0 when p divides A).
    ainv: Vec<u32>,
    // 2 bj / A mod p for each term and factor base index.
    ainv2b: Vec<Vec<u32>>,
    // Interval half width.
    m: u32,
}

impl Family {
    pub fn new(fbase: &FBase, a0: &A0Data, q_idx: usize, m: u32) -> Family {
        let q0 = fbase.p(q_idx) as u64;
        let a = a0.a0 * Uint::from(q0);
        // Extend the CRT basis from A0 to A: multiply each term by
        // q0 (q0^-1 mod pj) and append the pivot component.
        let mut b_terms = Vec::with_capacity(a0.inds.len());
        for (j, &i) in a0.inds.iter().enumerate() {
            let div = fbase.div(i);
            let p = fbase.p(i) as u64;
            // q0 is a different prime than pj.
            let q0inv = div.inv(div.modu64(q0)).unwrap();
            let c = arith::mulmod64(a0.gamma[j] as u64, q0inv, p);
            b_terms.push(a0.a0_divp[j] * Uint::from(q0 * c));
        }
        let qdiv = fbase.div(q_idx);
        let bq = arith::mulmod64(
            fbase.r(q_idx) as u64,
            qdiv.inv(qdiv.mod_uint(&a0.a0)).unwrap(),
            q0,
        );
        let b_pivot = a0.a0 * Uint::from(bq);
        // Inverses of A modulo the sieved primes.
        let len = fbase.len();
        let start = fbase.small_count;
        let mut ainv = vec![0u32; len];
        for idx in start..len {
            let div = fbase.div(idx);
            let amod = div.mod_uint(&a);
            if amod != 0 {
                ainv[idx] = div.inv(amod).unwrap() as u32;
            }
        }
        let mut ainv2b = Vec::with_capacity(b_terms.len());
        for b in &b_terms {
            let mut v = vec![0u32; len];
            for idx in start..len {
                if ainv[idx] == 0 {
                    continue;
                }
                let div = fbase.div(idx);
                let p = fbase.p(idx) as u64;
                let bm = div.mod_uint(b);
                v[idx] = arith::mulmod64((2 * bm) % p, ainv[idx] as u64, p) as u32;
            }
            ainv2b.push(v);
        }
        Family {
            a,
            q_idx,
            inds: a0.inds.clone(),
            b_terms,
            b_pivot,
            ainv,
            ainv2b,
            m,
        }
    }

    /// Number of polynomials in the family (2^w).
    pub fn count(&self) -> usize {
        1 << self.b_terms.len()
    }

    /// Factor base indices of the primes dividing A.
    pub fn a_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.inds.iter().copied().chain(std::iter::once(self.q_idx))
    }

    /// Initializes the first polynomial (all B components positive)
    /// and its sieve roots.
    pub fn first_poly(&self, fbase: &FBase, kn: &Uint, pol: &mut Poly) {
        let mut b = self.b_pivot;
        for t in &self.b_terms {
            b += *t;
        }
        pol.a = self.a;
        pol.b = Int::from_bits(b);
        pol.set_c(kn);
        let len = fbase.len();
        pol.soln1.clear();
        pol.soln1.resize(len, NO_ROOT);
        pol.soln2.clear();
        pol.soln2.resize(len, NO_ROOT);
        // Roots of Ax^2+2Bx+C are A^-1 (±r - B); store them shifted
        // by M to index the interval [-M, M).
        for idx in fbase.small_count..len {
            if self.ainv[idx] == 0 {
                continue;
            }
            let div = fbase.div(idx);
            let p = fbase.p(idx) as u64;
            let r = fbase.r(idx) as u64;
            let mb = p - div.mod_uint(&b);
            let ainv = self.ainv[idx] as u64;
            let m = self.m as u64;
            pol.soln1[idx] = div.modu64(arith::mulmod64((r + mb) % p, ainv, p) + m) as u32;
            pol.soln2[idx] = div.modu64(arith::mulmod64((p - r + mb) % p, ainv, p) + m) as u32;
        }
        self.special_roots(fbase, pol);
    }

    /// Advances the polynomial in place to Gray code rank i
    /// (0 < i < 2^w, increasing by one each call).
    pub fn next_poly(&self, fbase: &FBase, kn: &Uint, pol: &mut Poly, i: usize) {
        let nu = i.trailing_zeros() as usize;
        let gray = i ^ (i >> 1);
        let minus = gray & (1 << nu) != 0;
        let bt = Int::from_bits(self.b_terms[nu] << 1);
        if minus {
            pol.b -= bt;
        } else {
            pol.b += bt;
        }
        pol.set_c(kn);
        // B moved by ±2 b[nu] so each root moves by ∓ 2 b[nu] / A,
        // precomputed in ainv2b.
        let shifts = &self.ainv2b[nu];
        let primes = &fbase.primes[..];
        let (s1, s2) = (&mut pol.soln1[..], &mut pol.soln2[..]);
        for idx in fbase.small_count..shifts.len() {
            unsafe {
                let d = *shifts.get_unchecked(idx);
                if d == 0 {
                    continue;
                }
                let p = *primes.get_unchecked(idx);
                let shift = if minus { d } else { p - d };
                let r1 = *s1.get_unchecked(idx) + shift;
                *s1.get_unchecked_mut(idx) = if r1 >= p { r1 - p } else { r1 };
                let r2 = *s2.get_unchecked(idx) + shift;
                *s2.get_unchecked_mut(idx) = if r2 >= p { r2 - p } else { r2 };
            }
        }
        self.special_roots(fbase, pol);
    }

    // Roots for the primes dividing A where the polynomial degenerates
    // to 2Bx + C with single root -C / 2B.
    fn special_roots(&self, fbase: &FBase, pol: &mut Poly) {
        for idx in self.a_indices() {
            if idx < fbase.small_count {
                continue;
            }
            let div = fbase.div(idx);
            let p = fbase.p(idx) as u64;
            // 2B = ±2r is nonzero modulo factors of A.
            let b2 = int_mod(&(pol.b << 1), div);
            let mc = p - int_mod(&pol.c, div);
            let r = arith::mulmod64(div.modu64(mc), div.inv(b2).unwrap(), p);
            pol.soln1[idx] = div.modu64(r + self.m as u64) as u32;
            pol.soln2[idx] = NO_ROOT;
        }
    }
}

/// A live polynomial Ax^2 + 2Bx + C. Sieve roots are expressed in
/// interval coordinates: offset i corresponds to x = i - M.
#[derive(Clone, Debug)]
pub struct Poly {
    pub a: Uint,
    pub b: Int,
    pub c: Int,
    pub soln1: Vec<u32>,
    pub soln2: Vec<u32>,
}

impl Poly {
    pub fn new() -> Poly {
        Poly {
            a: Uint::ZERO,
            b: Int::ZERO,
            c: Int::ZERO,
            soln1: vec![],
            soln2: vec![],
        }
    }

    fn set_c(&mut self, kn: &Uint) {
        let bb = self.b * self.b - Int::from_bits(*kn);
        let a = Int::from_bits(self.a);
        let c = bb / a;
        // B^2 = kN modulo A by construction.
        assert!(c * a == bb, "non exact C for A={} B={}", self.a, self.b);
        self.c = c;
    }

    /// Value Ax^2 + 2Bx + C at x = i - M.
    pub fn value(&self, x: i64) -> Int {
        let xi = Int::from(x);
        let ax_b = Int::from_bits(self.a) * xi + self.b;
        (ax_b + self.b) * xi + self.c
    }

    /// The congruence witness |Ax + B| reduced modulo kN.
    pub fn witness(&self, x: i64, kn: &Uint) -> Uint {
        let ax_b = Int::from_bits(self.a) * Int::from(x) + self.b;
        ax_b.abs().to_bits() % *kn
    }
}

fn int_mod(v: &Int, div: &arith::Dividers) -> u64 {
    let m = div.mod_uint(&v.abs().to_bits());
    if v.is_negative() && m > 0 {
        div.p as u64 - m
    } else {
        m
    }
}

#[test]
fn test_family_crt() {
    use std::str::FromStr;

    let n = Uint::from_str("966900989857874724182183960752602697").unwrap();
    let fb = FBase::new(&n, 500, 1, 10).unwrap();
    let m = crate::params::interval_size(n.bits()) / 2;
    let mut sel = Selector::new(&fb, &n, m, 4);
    let a0 = sel.next_a0().unwrap();
    let q_idx = sel.pivots_for(&a0, 4)[0];
    let fam = Family::new(&fb, &a0, q_idx, m);
    let prod = fam
        .a_indices()
        .fold(Uint::ONE, |acc, i| acc * Uint::from(fb.p(i)));
    assert_eq!(fam.a, prod);
    // Each CRT component is a square root of kN modulo its own prime
    // and vanishes modulo the other factors of A.
    for (j, &i) in fam.inds.iter().enumerate() {
        let b = &fam.b_terms[j];
        for idx in fam.a_indices() {
            let div = fb.div(idx);
            let p = fb.p(idx) as u64;
            let bm = div.mod_uint(b);
            if idx == i {
                assert_eq!(arith::mulmod64(bm, bm, p), div.mod_uint(&n));
            } else {
                assert_eq!(bm, 0, "b[{j}] not divisible by p={p}");
            }
        }
    }
}

#[test]
fn test_poly_walk() {
    use std::str::FromStr;

    let n = Uint::from_str("966900989857874724182183960752602697").unwrap();
    let fb = FBase::new(&n, 500, 1, 10).unwrap();
    let m = crate::params::interval_size(n.bits()) / 2;
    let mut sel = Selector::new(&fb, &n, m, 4);
    for _ in 0..3 {
        let a0 = sel.next_a0().unwrap();
        for q_idx in sel.pivots_for(&a0, 2) {
            let fam = Family::new(&fb, &a0, q_idx, m);
            let mut pol = Poly::new();
            fam.first_poly(&fb, &n, &mut pol);
            for i in 0..fam.count() {
                if i > 0 {
                    fam.next_poly(&fb, &n, &mut pol, i);
                }
                // B is a square root of kN modulo A.
                let bb = pol.b * pol.b - Int::from_bits(n);
                assert!(bb % Int::from_bits(pol.a) == Int::ZERO);
                // (Ax+B)^2 - kN = A (Ax^2 + 2Bx + C)
                for x in [-7_i64, 1, 1000] {
                    let ax_b = Int::from_bits(pol.a) * Int::from(x) + pol.b;
                    assert_eq!(
                        ax_b * ax_b - Int::from_bits(n),
                        Int::from_bits(pol.a) * pol.value(x)
                    );
                }
                // Sieve roots are roots of the polynomial modulo p.
                for idx in (fb.small_count..fb.len())
                    .step_by(17)
                    .chain(fam.a_indices())
                {
                    for r in [pol.soln1[idx], pol.soln2[idx]] {
                        if r == NO_ROOT {
                            continue;
                        }
                        assert!(r < fb.p(idx));
                        let v = pol.value(r as i64 - m as i64);
                        assert_eq!(
                            fb.div(idx).mod_uint(&v.abs().to_bits()),
                            0,
                            "poly {i} root {r} p={}",
                            fb.p(idx)
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_selector_deterministic() {
    use std::str::FromStr;

    let n = Uint::from_str("1037510308142021112704792564947").unwrap();
    let fb = FBase::new(&n, 300, 1, 9).unwrap();
    let collect = || -> Vec<(Uint, usize)> {
        let mut sel = Selector::new(&fb, &n, 16384, 3);
        let mut out = vec![];
        for _ in 0..20 {
            let a0 = sel.next_a0().unwrap();
            let q = sel.pivots_for(&a0, 3);
            out.push((a0.a0, q[0]));
        }
        out
    };
    assert_eq!(collect(), collect());
}
