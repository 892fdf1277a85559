//! Kernels of sparse matrices modulo 2.
//!
//! Matrices are lists of columns, one per relation, holding the row
//! indices of odd-exponent factors. Small kernels are computed by
//! Gauss elimination over dense bit vectors; large ones use the block
//! Lanczos algorithm of Montgomery, processing 64 vectors at a time
//! as machine words.
//!
//! Bibliography:
//! Peter L. Montgomery, A block Lanczos algorithm for finding
//! dependencies over GF(2)
//! https://doi.org/10.1007/3-540-49264-X_9

use bitvec_simd::BitVec;
use rand::rngs::StdRng;
use rand::{Fill, Rng, SeedableRng};

use crate::Verbosity;

/// A sparse matrix over GF(2). Column j has ones at rows cols[j];
/// row indices are distinct within a column.
pub struct SparseMat {
    pub nrows: usize,
    pub cols: Vec<Vec<u32>>,
}

/// A dense block of 64 vectors, stored as one u64 bit row per
/// coordinate.
#[derive(Clone)]
pub struct Block(pub Vec<u64>);

impl Block {
    pub fn new(n: usize) -> Block {
        Block(vec![0u64; n])
    }
}

impl Fill for Block {
    fn try_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), rand::Error> {
        self.0[..].try_fill(rng)
    }
}

/// A dense 64x64 bit matrix (row major).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmallMat(pub [u64; 64]);

impl Default for SmallMat {
    fn default() -> Self {
        SmallMat([0u64; 64])
    }
}

impl Fill for SmallMat {
    fn try_fill<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), rand::Error> {
        self.0[..].try_fill(rng)
    }
}

#[inline]
fn mulvec(w: u64, m: &SmallMat) -> u64 {
    let mut acc = 0;
    let mut bits = w;
    while bits != 0 {
        let j = bits.trailing_zeros() as usize;
        acc ^= m.0[j];
        bits &= bits - 1;
    }
    acc
}

impl SmallMat {
    pub fn identity() -> SmallMat {
        let mut m = SmallMat::default();
        for i in 0..64 {
            m.0[i] = 1 << i;
        }
        m
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn rank(&self) -> u32 {
        let mut m = self.0;
        let mut rank = 0;
        for c in 0..64 {
            let cmask = 1u64 << c;
            let Some(r) = (rank..64).find(|&r| m[r] & cmask != 0) else {
                continue;
            };
            m.swap(rank, r);
            for j in 0..64 {
                if j != rank && m[j] & cmask != 0 {
                    m[j] ^= m[rank];
                }
            }
            rank += 1;
        }
        rank as u32
    }

    /// Gauss-Jordan inverse, None for singular matrices.
    pub fn inverse(&self) -> Option<SmallMat> {
        let mut m = self.0;
        let mut inv = SmallMat::identity().0;
        for c in 0..64 {
            let cmask = 1u64 << c;
            let r = (c..64).find(|&r| m[r] & cmask != 0)?;
            m.swap(c, r);
            inv.swap(c, r);
            for j in 0..64 {
                if j != c && m[j] & cmask != 0 {
                    m[j] ^= m[c];
                    inv[j] ^= inv[c];
                }
            }
        }
        Some(SmallMat(inv))
    }
}

// block^T * block -> 64x64
impl std::ops::Mul<&Block> for &Block {
    type Output = SmallMat;

    fn mul(self, other: &Block) -> SmallMat {
        assert_eq!(self.0.len(), other.0.len());
        let mut t = SmallMat::default();
        for i in 0..self.0.len() {
            let mut bits = self.0[i];
            let u = other.0[i];
            if bits == 0 || u == 0 {
                continue;
            }
            while bits != 0 {
                let j = bits.trailing_zeros() as usize;
                t.0[j] ^= u;
                bits &= bits - 1;
            }
        }
        t
    }
}

// block * 64x64 -> block
impl std::ops::Mul<&SmallMat> for &Block {
    type Output = Block;

    fn mul(self, m: &SmallMat) -> Block {
        let mut out = Block::new(self.0.len());
        for i in 0..self.0.len() {
            out.0[i] = mulvec(self.0[i], m);
        }
        out
    }
}

impl std::ops::Mul<&SmallMat> for &SmallMat {
    type Output = SmallMat;

    fn mul(self, m: &SmallMat) -> SmallMat {
        let mut out = SmallMat::default();
        for i in 0..64 {
            out.0[i] = mulvec(self.0[i], m);
        }
        out
    }
}

// sparse * block -> block (of length nrows)
impl std::ops::Mul<&Block> for &SparseMat {
    type Output = Block;

    fn mul(self, v: &Block) -> Block {
        assert_eq!(self.cols.len(), v.0.len());
        let mut out = Block::new(self.nrows);
        for (c, col) in self.cols.iter().enumerate() {
            let w = v.0[c];
            if w == 0 {
                continue;
            }
            for &r in col {
                out.0[r as usize] ^= w;
            }
        }
        out
    }
}

/// The product (A^T A) v defining the symmetric operator used by
/// block Lanczos.
pub fn mul_aab(mat: &SparseMat, v: &Block) -> Block {
    let tmp = mat * v;
    let mut out = Block::new(mat.cols.len());
    for (c, col) in mat.cols.iter().enumerate() {
        let mut w = 0u64;
        for &r in col {
            w ^= tmp.0[r as usize];
        }
        out.0[c] = w;
    }
    out
}

/// A deterministic right-hand side block (A^T A) Y for a random Y.
pub fn genblock(mat: &SparseMat, seed: u64) -> Block {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = Block::new(mat.cols.len());
    rng.fill(&mut y.0[..]);
    mul_aab(mat, &y)
}

/// Removes columns containing a row present in no other column,
/// repeatedly: such a row cannot cancel, so its column belongs to no
/// dependency. Surviving rows are renumbered densely.
///
/// Returns the reduced matrix and the original index of each
/// surviving column.
pub fn reduce_matrix(mat: &SparseMat) -> (SparseMat, Vec<usize>) {
    let mut counts = vec![0u32; mat.nrows];
    for col in mat.cols.iter() {
        for &r in col {
            counts[r as usize] += 1;
        }
    }
    let mut alive = vec![true; mat.cols.len()];
    loop {
        let mut changed = false;
        for (j, col) in mat.cols.iter().enumerate() {
            if alive[j] && col.iter().any(|&r| counts[r as usize] == 1) {
                alive[j] = false;
                for &r in col {
                    counts[r as usize] -= 1;
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let mut rowmap = vec![0u32; mat.nrows];
    let mut nrows = 0u32;
    for (r, &k) in counts.iter().enumerate() {
        if k > 0 {
            rowmap[r] = nrows;
            nrows += 1;
        }
    }
    let mut cols = Vec::with_capacity(mat.cols.len());
    let mut keep = Vec::with_capacity(mat.cols.len());
    for (j, col) in mat.cols.iter().enumerate() {
        if alive[j] {
            keep.push(j);
            cols.push(col.iter().map(|&r| rowmap[r as usize]).collect());
        }
    }
    (
        SparseMat {
            nrows: nrows as usize,
            cols,
        },
        keep,
    )
}

/// Selects a maximal set of columns S such that the S x S submatrix
/// of t is invertible, preferring columns outside last_s, and returns
/// the inverse padded with zero rows and columns outside S.
///
/// t must be symmetric. None indicates a breakdown of the Lanczos
/// iteration (the caller restarts with another random block).
pub fn find_nonsingular_sub(t: &SmallMat, last_s: u64) -> Option<(SmallMat, u64)> {
    // Columns absent from the previous selection come first: Lanczos
    // requires two consecutive selections to cover all columns.
    let mut order = [0usize; 64];
    let mut k = 0;
    for c in 0..64 {
        if last_s & (1 << c) == 0 {
            order[k] = c;
            k += 1;
        }
    }
    for c in 0..64 {
        if last_s & (1 << c) != 0 {
            order[k] = c;
            k += 1;
        }
    }
    // Gauss elimination over [t | I] with priority pivoting.
    let mut mt = t.0;
    let mut mi = SmallMat::identity().0;
    let mut used = 0u64;
    let mut s = 0u64;
    for &c in order.iter() {
        let cmask = 1u64 << c;
        if let Some(r) = (0..64).find(|&r| used & (1 << r) == 0 && mt[r] & cmask != 0) {
            used |= 1 << r;
            s |= cmask;
            for j in 0..64 {
                if j != r && mt[j] & cmask != 0 {
                    mt[j] ^= mt[r];
                    mi[j] ^= mi[r];
                }
            }
        } else {
            // Dependent column: discard one generator row so that the
            // remaining rows stay independent (Montgomery).
            let r = (0..64).find(|&r| used & (1 << r) == 0 && mi[r] & cmask != 0)?;
            used |= 1 << r;
            for j in 0..64 {
                if j != r && mi[j] & cmask != 0 {
                    mt[j] ^= mt[r];
                    mi[j] ^= mi[r];
                }
            }
            mt[r] = 0;
            mi[r] = 0;
        }
    }
    // Invert the selected submatrix, padded by the identity outside S.
    // The padded matrix is block diagonal so rows of the inverse keep
    // their support inside S.
    let mut p = SmallMat::default();
    for i in 0..64 {
        p.0[i] = if s & (1 << i) != 0 {
            t.0[i] & s
        } else {
            1u64 << i
        };
    }
    let pinv = p.inverse()?;
    let mut winv = SmallMat::default();
    for i in 0..64 {
        if s & (1 << i) != 0 {
            winv.0[i] = pinv.0[i];
        }
    }
    Some((winv, s))
}

/// Kernel of a sparse matrix by the block Lanczos algorithm.
/// Returns combinations of column indices summing to zero.
///
/// The iteration solves (A^T A) X = (A^T A) Y for a random Y, then
/// X - Y and the final Lanczos block span vectors of ker(A^T A) from
/// which actual kernel vectors of A are sifted.
pub fn kernel_lanczos(mat: &SparseMat, verbosity: Verbosity) -> Vec<Vec<usize>> {
    let n = mat.cols.len();
    assert!(n >= 128, "block Lanczos needs at least 128 columns");
    for attempt in 0..3u64 {
        let mut rng = StdRng::seed_from_u64(0xb10c5eed + 0x9e3779b9 * attempt);
        let mut y = Block::new(n);
        rng.fill(&mut y.0[..]);
        let b = mul_aab(mat, &y);
        let mut x = Block::new(n);
        let mut v = b.clone();
        let mut v1 = Block::new(n);
        let mut v2 = Block::new(n);
        let (mut winv1, mut winv2) = (SmallMat::default(), SmallMat::default());
        let (mut t1, mut t21) = (SmallMat::default(), SmallMat::default());
        let mut s1 = !0u64;
        let maxiter = n / 48 + 100;
        let mut converged = false;
        for iter in 0..maxiter {
            let av = mul_aab(mat, &v);
            let t = &v * &av;
            if t.is_zero() {
                if verbosity >= Verbosity::Verbose {
                    eprintln!("Lanczos converged after {iter} iterations");
                }
                converged = true;
                break;
            }
            let t2 = &av * &av;
            let Some((winv, s)) = find_nonsingular_sub(&t, s1) else {
                break;
            };
            // X += V winv (V^T b)
            let tb = &v * &b;
            let xm = &winv * &tb;
            for i in 0..n {
                x.0[i] ^= mulvec(v.0[i], &xm);
            }
            // D = I + winv (t2 S + t)
            let mut dm = SmallMat::default();
            for i in 0..64 {
                dm.0[i] = (t2.0[i] & s) ^ t.0[i];
            }
            let mut d = &winv * &dm;
            for i in 0..64 {
                d.0[i] ^= 1 << i;
            }
            // E = winv' t S
            let mut e = &winv1 * &t;
            for i in 0..64 {
                e.0[i] &= s;
            }
            // F = winv'' (I + t' winv') (t2' S' + t') S
            let mut f0 = &t1 * &winv1;
            for i in 0..64 {
                f0.0[i] ^= 1 << i;
            }
            let mut f1 = SmallMat::default();
            for i in 0..64 {
                f1.0[i] = (t21.0[i] & s1) ^ t1.0[i];
            }
            let mut f = &(&winv2 * &f0) * &f1;
            for i in 0..64 {
                f.0[i] &= s;
            }
            // V{i+1} = A V S + V D + V{i-1} E + V{i-2} F
            let mut vnext = Block::new(n);
            for i in 0..n {
                vnext.0[i] = (av.0[i] & s)
                    ^ mulvec(v.0[i], &d)
                    ^ mulvec(v1.0[i], &e)
                    ^ mulvec(v2.0[i], &f);
            }
            v2 = std::mem::replace(&mut v1, std::mem::replace(&mut v, vnext));
            winv2 = winv1;
            winv1 = winv;
            t1 = t;
            t21 = t2;
            s1 = s;
        }
        if !converged {
            if verbosity >= Verbosity::Info {
                eprintln!("Lanczos breakdown, retrying with a new block");
            }
            continue;
        }
        // Candidate kernel vectors of A^T A.
        for i in 0..n {
            x.0[i] ^= y.0[i];
        }
        let ax = mat * &x;
        let av = mat * &v;
        let vecs = extract_kernel(mat.nrows, &x, &v, &ax, &av);
        if !vecs.is_empty() {
            if verbosity >= Verbosity::Info {
                eprintln!("Lanczos found {} kernel vectors", vecs.len());
            }
            return vecs;
        }
    }
    vec![]
}

// Column reduces the 128 candidate vectors [u0|u1] against their
// images [img0|img1] and keeps the combinations with zero image.
fn extract_kernel(nrows: usize, u0: &Block, u1: &Block, img0: &Block, img1: &Block) -> Vec<Vec<usize>> {
    let n = u0.0.len();
    let mut ucols: Vec<BitVec> = (0..128).map(|_| BitVec::zeros(n)).collect();
    let mut icols: Vec<BitVec> = (0..128).map(|_| BitVec::zeros(nrows)).collect();
    for i in 0..n {
        for (j, col) in ucols.iter_mut().enumerate() {
            let w = if j < 64 { u0.0[i] } else { u1.0[i] };
            if w & (1 << (j % 64)) != 0 {
                col.set(i, true);
            }
        }
    }
    for r in 0..nrows {
        for (j, col) in icols.iter_mut().enumerate() {
            let w = if j < 64 { img0.0[r] } else { img1.0[r] };
            if w & (1 << (j % 64)) != 0 {
                col.set(r, true);
            }
        }
    }
    let mut out = vec![];
    // pivot row => column index
    let mut pivots: Vec<(usize, usize)> = vec![];
    for j in 0..128 {
        loop {
            let lead = icols[j].leading_zeros();
            if lead >= nrows {
                let z = ucols[j].clone().into_usizes();
                if !z.is_empty() {
                    out.push(z);
                }
                break;
            }
            if let Some(&(_, p)) = pivots.iter().find(|&&(r, _)| r == lead) {
                let pc = icols[p].clone();
                icols[j].xor_inplace(&pc);
                let uc = ucols[p].clone();
                ucols[j].xor_inplace(&uc);
            } else {
                pivots.push((lead, j));
                break;
            }
        }
    }
    out
}

/// Kernel of a sparse matrix by plain Gauss elimination over dense
/// bit vectors, suitable for small matrices.
pub fn kernel_gauss(mat: &SparseMat) -> Vec<Vec<usize>> {
    let size = mat.nrows;
    let ncols = mat.cols.len();
    let mut cols: Vec<BitVec> = vec![];
    for c in mat.cols.iter() {
        let mut v = BitVec::zeros(size);
        for &r in c {
            v.set(r as usize, true);
        }
        cols.push(v);
    }
    let mut coefs = vec![];
    for i in 0..ncols {
        let mut r = BitVec::zeros(ncols);
        r.set(i, true);
        coefs.push(r);
    }
    // row => pivot column
    let mut pivots: Vec<Option<usize>> = vec![None; size];
    let mut kernel = vec![];
    for j in 0..ncols {
        loop {
            let lead = cols[j].leading_zeros();
            if lead >= size {
                kernel.push(coefs[j].clone().into_usizes());
                break;
            }
            match pivots[lead] {
                None => {
                    pivots[lead] = Some(j);
                    break;
                }
                Some(p) => {
                    let pc = cols[p].clone();
                    cols[j].xor_inplace(&pc);
                    let cc = coefs[p].clone();
                    coefs[j].xor_inplace(&cc);
                }
            }
        }
    }
    kernel
}

/// A deterministic pseudo random sparse matrix with nrows + extra
/// columns of weight per_col, for tests and benchmarks.
pub fn make_test_sparsemat(nrows: usize, extra: usize, per_col: usize) -> SparseMat {
    use std::num::Wrapping;

    assert!(per_col <= nrows);
    let mut seed: Wrapping<u32> = Wrapping(0xcafe1337 + nrows as u32);
    let mut cols = vec![];
    for _ in 0..nrows + extra {
        let mut col: Vec<u32> = Vec::with_capacity(per_col);
        while col.len() < per_col {
            seed *= 0x12345;
            seed ^= 0x1337;
            let r = (seed.0 >> 8) % nrows as u32;
            // A repeated row would cancel modulo 2.
            if !col.contains(&r) {
                col.push(r);
            }
        }
        cols.push(col);
    }
    SparseMat { nrows, cols }
}

#[cfg(test)]
fn check_kernel(mat: &SparseMat, vecs: &[Vec<usize>]) {
    assert!(!vecs.is_empty());
    for z in vecs {
        assert!(!z.is_empty());
        let mut parity = vec![0u32; mat.nrows];
        for &c in z {
            for &r in &mat.cols[c] {
                parity[r as usize] ^= 1;
            }
        }
        assert!(parity.iter().all(|&p| p == 0), "A z != 0 for z={z:?}");
    }
}

#[test]
fn test_small_mat() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut m = SmallMat::default();
    loop {
        m.try_fill(&mut rng).unwrap();
        if let Some(inv) = m.inverse() {
            assert_eq!(&m * &inv, SmallMat::identity());
            assert_eq!(&inv * &m, SmallMat::identity());
            break;
        }
    }
    assert_eq!(SmallMat::identity().rank(), 64);
    assert_eq!(SmallMat::default().rank(), 0);
    assert!(SmallMat::default().inverse().is_none());
}

#[test]
fn test_block_products() {
    let mut rng = StdRng::seed_from_u64(43);
    let mut b1 = Block::new(300);
    let mut b2 = Block::new(300);
    rng.fill(&mut b1.0[..]);
    rng.fill(&mut b2.0[..]);
    // (b1^T b2)^T == b2^T b1
    let t12 = &b1 * &b2;
    let t21 = &b2 * &b1;
    for i in 0..64 {
        for j in 0..64 {
            assert_eq!((t12.0[i] >> j) & 1, (t21.0[j] >> i) & 1);
        }
    }
    // Associativity through a 64x64 matrix.
    let mut m = SmallMat::default();
    m.try_fill(&mut rng).unwrap();
    let left = &(&b1 * &b2) * &m;
    let right = &b1 * &(&b2 * &m);
    assert!(left == right);
}

#[test]
fn test_find_nonsingular_sub() {
    // An invertible matrix is selected whole.
    let (winv, s) = find_nonsingular_sub(&SmallMat::identity(), 0xffff).unwrap();
    assert_eq!(s, !0u64);
    assert_eq!(winv, SmallMat::identity());

    let mut rng = StdRng::seed_from_u64(44);
    let mut u = Block::new(300);
    rng.fill(&mut u.0[..]);
    // A symmetric matrix of nearly full rank.
    let t = &u * &u;
    let (winv, s) = find_nonsingular_sub(&t, !0u64).unwrap();
    assert!(s.count_ones() > 32);
    let prod = &winv * &t;
    for c in 0..64 {
        if s & (1 << c) != 0 {
            assert_eq!(prod.0[c] & s, 1 << c, "col {c}");
        } else {
            assert_eq!(winv.0[c], 0);
        }
    }
}

#[test]
fn test_reduce_matrix() {
    // A singleton row kills its column and removals cascade.
    let mat = SparseMat {
        nrows: 3,
        cols: vec![vec![0, 1], vec![1, 2], vec![2]],
    };
    let (red, keep) = reduce_matrix(&mat);
    assert_eq!(red.nrows, 0);
    assert!(red.cols.is_empty());
    assert!(keep.is_empty());

    // Row 3 only appears in column 0.
    let mat = SparseMat {
        nrows: 4,
        cols: vec![vec![0, 3], vec![0, 1], vec![1, 2], vec![2], vec![0, 1]],
    };
    let (red, keep) = reduce_matrix(&mat);
    assert_eq!(red.nrows, 3);
    assert_eq!(keep, vec![1, 2, 3, 4]);
    assert_eq!(
        red.cols,
        vec![vec![0, 1], vec![1, 2], vec![2], vec![0, 1]]
    );
    // Dependencies survive reduction: original columns 1 and 4 are
    // equal and reappear as reduced columns 0 and 3.
    let k = kernel_gauss(&red);
    assert_eq!(k, vec![vec![0, 3]]);
    assert_eq!((keep[0], keep[3]), (1, 4));
}

#[test]
fn test_kernel_gauss() {
    // Rank 4, empty kernel.
    let mat = SparseMat {
        nrows: 4,
        cols: vec![vec![0, 3], vec![1, 3], vec![1], vec![0, 1, 2]],
    };
    assert!(kernel_gauss(&mat).is_empty());
    // Rank 3, kernel generated by the sum of all columns.
    let mat = SparseMat {
        nrows: 4,
        cols: vec![vec![0, 3], vec![0, 2], vec![0, 1, 2], vec![0, 1, 3]],
    };
    let k = kernel_gauss(&mat);
    assert_eq!(k, vec![vec![0, 1, 2, 3]]);

    let mat = make_test_sparsemat(300, 5, 10);
    let k = kernel_gauss(&mat);
    assert!(k.len() >= 5);
    check_kernel(&mat, &k);
}

#[test]
fn test_sparsemat_distinct_rows() {
    // Generated columns keep their advertised weight: a duplicated
    // row index would be read as two ones by the dense solver but
    // cancel under the XOR products.
    for (nrows, extra, per_col) in [(300, 5, 10), (600, 10, 8), (50, 2, 3)] {
        let mat = make_test_sparsemat(nrows, extra, per_col);
        assert_eq!(mat.cols.len(), nrows + extra);
        for col in &mat.cols {
            assert_eq!(col.len(), per_col);
            let mut c = col.clone();
            c.sort_unstable();
            c.dedup();
            assert_eq!(c.len(), per_col, "duplicate row in {col:?}");
            assert!(c.last().map_or(true, |&r| (r as usize) < nrows));
        }
    }
}

#[test]
fn test_kernel_lanczos() {
    let mat = make_test_sparsemat(600, 10, 8);
    let k = kernel_lanczos(&mat, Verbosity::Silent);
    check_kernel(&mat, &k);
    // The iteration is deterministic.
    let k2 = kernel_lanczos(&mat, Verbosity::Silent);
    assert_eq!(k, k2);
}
