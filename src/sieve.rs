//! Block sieve over the interval [-M, M).
//!
//! Sieving with a quadratic polynomial reduces to handling a list of
//! primes p with 1 or 2 polynomial roots modulo p. Each element of the
//! interval accumulates the approximate logarithms of the primes
//! dividing the corresponding value, costing about sum(2/p) byte
//! additions per element.
//!
//! Most additions are caused by the smallest primes while their
//! contribution to the total size is modest, so primes below the
//! factor base small_count mark are not sieved at all: the candidate
//! threshold is lowered accordingly and their exact contribution is
//! recovered during trial division.
//!
//! The interval is processed in blocks fitting the L1/L2 cache. Root
//! cursors are kept relative to the current block so that crossing a
//! block boundary is a single subtraction.

use std::cmp::min;

use wide;

use crate::fbase::FBase;
use crate::params::BLOCK_SIZE;
use crate::poly::{Poly, NO_ROOT};

pub struct Sieve {
    /// Interval half width.
    pub m: u32,
    /// Start of the current block, in interval coordinates 0..2M.
    pub start: u32,
    // Length of the last sieved block.
    blen: u32,
    // Cursor of each root, relative to the current block start.
    pos1: Vec<u32>,
    pos2: Vec<u32>,
    pub blk: Vec<u8>,
}

impl Sieve {
    pub fn new(m: u32) -> Sieve {
        Sieve {
            m,
            start: 0,
            blen: 0,
            pos1: vec![],
            pos2: vec![],
            blk: vec![0u8; BLOCK_SIZE],
        }
    }

    /// Rewinds the sieve to the beginning of the interval with the
    /// roots of a freshly prepared polynomial.
    pub fn start_poly(&mut self, pol: &Poly) {
        self.start = 0;
        self.blen = 0;
        self.pos1.clear();
        self.pos1.extend_from_slice(&pol.soln1);
        self.pos2.clear();
        self.pos2.extend_from_slice(&pol.soln2);
    }

    pub fn done(&self) -> bool {
        self.start >= 2 * self.m
    }

    /// Accumulates prime sizes over the next block.
    pub fn sieve_block(&mut self, fbase: &FBase) {
        let blen = min(BLOCK_SIZE as u32, 2 * self.m - self.start) as usize;
        self.blen = blen as u32;
        self.blk[..blen].fill(0u8);
        let blk = &mut self.blk;
        let mut run = |cursor: u32, p: usize, size: u8| -> u32 {
            let mut off = cursor as usize;
            unsafe {
                if p < 1024 && blen > 4 * p {
                    let ll = blen - 4 * p;
                    while off < ll {
                        *blk.get_unchecked_mut(off) += size;
                        off += p;
                        *blk.get_unchecked_mut(off) += size;
                        off += p;
                        *blk.get_unchecked_mut(off) += size;
                        off += p;
                        *blk.get_unchecked_mut(off) += size;
                        off += p;
                    }
                }
                while off < blen {
                    *blk.get_unchecked_mut(off) += size;
                    off += p;
                }
            }
            (off - blen) as u32
        };
        for idx in fbase.small_count..fbase.len() {
            let p = fbase.p(idx) as usize;
            let size = fbase.size(idx);
            let c1 = self.pos1[idx];
            if c1 != NO_ROOT {
                self.pos1[idx] = run(c1, p, size);
            }
            let c2 = self.pos2[idx];
            if c2 != NO_ROOT {
                self.pos2[idx] = run(c2, p, size);
            }
        }
    }

    /// Offsets of the current block whose accumulated size reaches the
    /// threshold, in interval coordinates. The threshold must be
    /// nonzero so that untouched elements never qualify.
    pub fn candidates(&self, threshold: u8) -> Vec<u32> {
        debug_assert!(threshold > 0);
        let blen = self.blen as usize;
        let mut res: Vec<u32> = vec![];
        let thr16x = wide::u8x16::splat(threshold - 1);
        let mut i = 0;
        while i + 16 <= blen {
            unsafe {
                // Cast as [u8;16] to avoid assuming alignment.
                let blk16 = (&self.blk[i] as *const u8) as *const [u8; 16];
                let blk16w = wide::u8x16::new(*blk16);
                if thr16x != blk16w.max(thr16x) {
                    // Some element is above threshold-1.
                    for j in 0..16 {
                        if (*blk16)[j] >= threshold {
                            res.push(self.start + (i + j) as u32);
                        }
                    }
                }
            }
            i += 16;
        }
        while i < blen {
            if self.blk[i] >= threshold {
                res.push(self.start + i as u32);
            }
            i += 1;
        }
        res
    }

    pub fn next_block(&mut self) {
        self.start += self.blen;
        self.blen = 0;
    }
}

/// Upper bound for the bits missing from sieve reports because the
/// smallest primes are never sieved.
pub fn skipped_bits(fbase: &FBase) -> u32 {
    let mut skipped = 0u32;
    for idx in 0..fbase.small_count {
        if fbase.p(idx) > 1 {
            skipped += fbase.size(idx) as u32;
        }
    }
    skipped
}

#[test]
fn test_sieve_candidates() {
    use crate::poly::{Family, Selector};
    use crate::Uint;
    use std::str::FromStr;

    let n = Uint::from_str("176056248311966088405511077755578022771").unwrap();
    let fb = FBase::new(&n, 400, 1, 10).unwrap();
    // Two blocks, the second partially filled.
    let m = (BLOCK_SIZE + BLOCK_SIZE / 2) as u32 / 2;
    let mut sel = Selector::new(&fb, &n, m, 4);
    let a0 = sel.next_a0().unwrap();
    let q_idx = sel.pivots_for(&a0, 1)[0];
    let fam = Family::new(&fb, &a0, q_idx, m);
    let mut pol = Poly::new();
    fam.first_poly(&fb, &n, &mut pol);

    let threshold = 24u8;
    let mut sieve = Sieve::new(m);
    sieve.start_poly(&pol);
    let mut got = vec![];
    while !sieve.done() {
        sieve.sieve_block(&fb);
        got.extend(sieve.candidates(threshold));
        sieve.next_block();
    }

    // Reference: a single pass over the whole interval.
    let mut logs = vec![0u32; 2 * m as usize];
    for idx in fb.small_count..fb.len() {
        let p = fb.p(idx) as usize;
        for r in [pol.soln1[idx], pol.soln2[idx]] {
            if r == NO_ROOT {
                continue;
            }
            let mut off = r as usize;
            while off < logs.len() {
                logs[off] += fb.size(idx) as u32;
                off += p;
            }
        }
    }
    let want: Vec<u32> = (0..logs.len())
        .filter(|&i| logs[i] >= threshold as u32)
        .map(|i| i as u32)
        .collect();
    assert!(!want.is_empty());
    assert_eq!(got, want);
    // Reported offsets have the advertised smooth part.
    for &i in got.iter().take(10) {
        let v = pol.value(i as i64 - m as i64).abs().to_bits();
        let mut smooth_bits = 0;
        for idx in fb.small_count..fb.len() {
            if fb.div(idx).mod_uint(&v) == 0 {
                smooth_bits += fb.size(idx) as u32;
            }
        }
        assert!(smooth_bits >= threshold as u32, "offset {i}");
    }
}
