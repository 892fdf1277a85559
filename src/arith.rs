//! Modular arithmetic helpers for the sieve.
//!
//! The sieve itself only needs arithmetic modulo 24-bit primes,
//! but relation bookkeeping and the final congruence of squares
//! work with multiprecision integers (crate `bnum`).

use std::ops::{Add, Div, Mul, Rem, Shl, Shr, Sub};

pub use bnum::types::{I1024, I256, I512, U1024, U256, U512};

pub trait Num:
    From<u32>
    + Add<Self, Output = Self>
    + Sub<Self, Output = Self>
    + Mul<Self, Output = Self>
    + Div<Self, Output = Self>
    + Rem<Self, Output = Self>
    + Shl<u32, Output = Self>
    + Shr<u32, Output = Self>
    + PartialOrd
    + Copy
{
    const BITS: u32;
    fn bits(&self) -> u32;
    fn low_u64(&self) -> u64;
}

impl Num for u64 {
    const BITS: u32 = 64;
    fn bits(&self) -> u32 {
        Self::BITS - self.leading_zeros()
    }
    fn low_u64(&self) -> u64 {
        *self
    }
}

macro_rules! impl_num {
    ($T:ty, $bits:literal) => {
        impl Num for $T {
            const BITS: u32 = $bits;
            fn bits(&self) -> u32 {
                <$T>::bits(self)
            }
            fn low_u64(&self) -> u64 {
                self.digits()[0]
            }
        }
    };
}

impl_num!(U256, 256);
impl_num!(U512, 512);
impl_num!(U1024, 1024);

/// Rounded down integer square root.
pub fn isqrt<T: Num>(n: T) -> T {
    let one = T::from(1u32);
    if n < one {
        return n;
    }
    let mut r: T = one << (n.bits() / 2 + 1);
    // Newton iteration: their values decrease to the square root.
    loop {
        let rnext = (r + n / r) >> 1;
        if rnext >= r {
            break;
        }
        r = rnext;
    }
    debug_assert!(r * r <= n && n < (r + one) * (r + one));
    r
}

#[inline]
pub fn mulmod64(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 * b as u128) % p as u128) as u64
}

pub fn powmod64(n: u64, k: u64, p: u64) -> u64 {
    let mut res: u64 = 1 % p;
    let mut nn = n % p;
    let mut k = k;
    while k > 0 {
        if k & 1 == 1 {
            res = mulmod64(res, nn, p);
        }
        nn = mulmod64(nn, nn, p);
        k >>= 1;
    }
    res
}

/// Modular exponentiation for multiprecision moduli.
pub fn pow_mod<T: Num>(n: T, k: T, p: T) -> T {
    assert!(2 * p.bits() < T::BITS);
    let zero = T::from(0u32);
    let mut res: T = T::from(1u32) % p;
    let mut nn = n % p;
    let mut k = k;
    while k > zero {
        if k.low_u64() & 1 == 1 {
            res = (res * nn) % p;
        }
        nn = (nn * nn) % p;
        k = k >> 1;
    }
    res
}

/// Modular inverse by the extended Euclid algorithm.
/// The modulus does not need to be prime.
pub fn inv_mod64(n: u64, p: u64) -> Option<u64> {
    let (mut r0, mut r1) = (p as i128, (n % p) as i128);
    let (mut t0, mut t1) = (0_i128, 1_i128);
    while r1 != 0 {
        let q = r0 / r1;
        (r0, r1) = (r1, r0 - q * r1);
        (t0, t1) = (t1, t0 - q * t1);
    }
    if r0 != 1 {
        return None;
    }
    Some(t0.rem_euclid(p as i128) as u64)
}

/// Square root modulo a prime number p (Tonelli-Shanks).
pub fn sqrt_mod(n: u64, p: u64) -> Option<u64> {
    let n = n % p;
    if p == 2 {
        return Some(n);
    }
    if n == 0 {
        return Some(0);
    }
    if powmod64(n, p >> 1, p) != 1 {
        return None;
    }
    if p & 3 == 3 {
        return Some(powmod64(n, (p + 1) >> 2, p));
    }
    // p = 1 mod 4: write p-1 = q 2^s with q odd.
    let s = (p - 1).trailing_zeros();
    let q = (p - 1) >> s;
    // Find a quadratic non-residue.
    let mut z = 2;
    while powmod64(z, p >> 1, p) == 1 {
        z += 1;
    }
    let mut m = s;
    let mut c = powmod64(z, q, p);
    let mut t = powmod64(n, q, p);
    let mut r = powmod64(n, (q + 1) >> 1, p);
    while t != 1 {
        // Find the order of t (a power of 2).
        let mut t2 = t;
        let mut i = 0;
        while t2 != 1 {
            t2 = mulmod64(t2, t2, p);
            i += 1;
        }
        let mut b = c;
        for _ in 0..m - i - 1 {
            b = mulmod64(b, b, p);
        }
        m = i;
        c = mulmod64(b, b, p);
        t = mulmod64(t, c, p);
        r = mulmod64(r, b, p);
    }
    debug_assert!(mulmod64(r, r, p) == n);
    Some(r)
}

const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Deterministic Miller-Rabin test for 64-bit integers.
pub fn isprime64(n: u64) -> bool {
    if n < 2 || n & 1 == 0 {
        return n == 2;
    }
    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    'base: for &b in &MILLER_RABIN_BASES {
        if b % n == 0 {
            continue;
        }
        let mut x = powmod64(b, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 0..s - 1 {
            x = mulmod64(x, x, n);
            if x == n - 1 {
                continue 'base;
            }
        }
        return false;
    }
    true
}

/// Miller-Rabin test for multiprecision integers.
/// It is deterministic under 64 bits and a strong pseudoprimality
/// test above (the fixed bases have no known composite exception).
pub fn pseudoprime(n: U1024) -> bool {
    if n.bits() <= 64 {
        return isprime64(n.low_u64());
    }
    if n.low_u64() & 1 == 0 {
        return false;
    }
    let one = U1024::ONE;
    let nm1 = n - one;
    // The 2-adic valuation can exceed the lowest word.
    let s = nm1.trailing_zeros();
    let d = nm1 >> s;
    'base: for &b in &MILLER_RABIN_BASES {
        let mut x = pow_mod(U1024::from(b), d, n);
        if x == one || x == nm1 {
            continue;
        }
        for _ in 0..s - 1 {
            x = (x * x) % n;
            if x == nm1 {
                continue 'base;
            }
        }
        return false;
    }
    true
}

/// Precomputed division by a fixed small prime.
///
/// Divisibility of 64-bit integers uses the multiplicative inverse
/// modulo 2^64 (Granlund-Montgomery), multiprecision remainders use
/// Horner evaluation with the precomputed value of 2^64 mod p.
#[derive(Clone, Copy, Debug)]
pub struct Dividers {
    pub p: u32,
    // Inverse of p modulo 2^64 (zero for p = 2).
    pinv: u64,
    // Magic reciprocal floor(2^128 / p) + 1 for Lemire style
    // remainders of full 64-bit dividends (zero for p = 1).
    m128: u128,
    // u64::MAX / p, the divisibility threshold.
    qmax: u64,
    // 2^64 mod p
    r64: u64,
}

impl Dividers {
    pub const fn new(p: u32) -> Self {
        let p64 = p as u64;
        let pinv = if p % 2 == 0 {
            0
        } else {
            // Newton iteration over Z/2^64, doubling precision each step.
            let mut x = p64; // 3 correct bits (p^2 = 1 mod 8)
            x = x.wrapping_mul(2u64.wrapping_sub(p64.wrapping_mul(x)));
            x = x.wrapping_mul(2u64.wrapping_sub(p64.wrapping_mul(x)));
            x = x.wrapping_mul(2u64.wrapping_sub(p64.wrapping_mul(x)));
            x = x.wrapping_mul(2u64.wrapping_sub(p64.wrapping_mul(x)));
            x = x.wrapping_mul(2u64.wrapping_sub(p64.wrapping_mul(x)));
            x
        };
        Dividers {
            p,
            pinv,
            m128: (u128::MAX / p64 as u128).wrapping_add(1),
            qmax: u64::MAX / p64,
            r64: ((1u128 << 64) % p64 as u128) as u64,
        }
    }

    #[inline]
    pub fn divides(&self, n: u64) -> bool {
        if self.p == 2 {
            n & 1 == 0
        } else {
            n.wrapping_mul(self.pinv) <= self.qmax
        }
    }

    #[inline]
    pub fn modu64(&self, n: u64) -> u64 {
        // See [Lemire]: the 128-bit reciprocal makes the remainder
        // exact for every 64-bit dividend since p fits in 32 bits.
        let low = self.m128.wrapping_mul(n as u128);
        let p = self.p as u128;
        // (low * p) >> 128 without a 256-bit product.
        (((low >> 64) * p + ((low as u64 as u128 * p) >> 64)) >> 64) as u64
    }

    #[inline]
    pub fn divmod64(&self, n: u64) -> (u64, u64) {
        let r = self.modu64(n);
        let q = if self.p == 2 {
            (n - r) >> 1
        } else {
            // n - r is an exact multiple of p.
            (n - r).wrapping_mul(self.pinv)
        };
        (q, r)
    }

    #[inline]
    pub fn modi64(&self, n: i64) -> u64 {
        let r = self.modu64(n.unsigned_abs());
        if n < 0 && r > 0 {
            self.p as u64 - r
        } else {
            r
        }
    }

    /// Remainder of a multiprecision integer by p.
    pub fn mod_uint(&self, n: &U1024) -> u64 {
        let digits = n.digits();
        let mut top = digits.len();
        while top > 1 && digits[top - 1] == 0 {
            top -= 1;
        }
        let mut acc: u64 = 0;
        for &d in digits[..top].iter().rev() {
            let t = acc as u128 * self.r64 as u128 + d as u128;
            acc = (t % self.p as u128) as u64;
        }
        acc
    }

    /// Quotient and remainder of a multiprecision integer by p.
    pub fn divmod_uint(&self, n: &U1024) -> (U1024, u64) {
        let digits = n.digits();
        let mut q = [0u64; 16];
        let mut rem: u64 = 0;
        for i in (0..digits.len()).rev() {
            let cur = (rem as u128) << 64 | digits[i] as u128;
            q[i] = (cur / self.p as u128) as u64;
            rem = (cur % self.p as u128) as u64;
        }
        (U1024::from_digits(q), rem)
    }

    /// Inverse of x modulo p.
    pub fn inv(&self, x: u64) -> Option<u64> {
        inv_mod64(x, self.p as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_pow_mod() {
        for i in 2..997u64 {
            assert_eq!(powmod64(i, 996, 997), 1)
        }
        for i in 2..996u64 {
            assert_eq!(mulmod64(powmod64(5, i, 997), powmod64(5, 996 - i, 997), 997), 1)
        }
    }

    #[test]
    fn test_sqrt_mod() {
        const PRIMES: &[u64] = &[2503, 2521, 2531, 2539, 2500213, 2500363, 300 * 1024 + 1];
        for &p in PRIMES {
            for k in 1..std::cmp::min(p / 2, 5000) {
                if let Some(r) = sqrt_mod(k, p) {
                    assert_eq!(k % p, mulmod64(r, r, p), "sqrt({k}) mod {p} = {r}");
                }
                let r = sqrt_mod(k * k, p);
                assert!(
                    r == Some(k) || r == Some(p - k),
                    "failed sqrt({}) mod {}",
                    (k * k) % p,
                    p
                );
            }
        }
    }

    #[test]
    fn test_isqrt() {
        for k in 1..1000u64 {
            let n = (U256::from(k) << 192) + (U256::from(1234u64) << 100) + U256::from(5678u64);
            let r = isqrt(n);
            assert!(r * r <= n, "sqrt({n}) = incorrect {r}");
            assert!(n < (r + U256::ONE) * (r + U256::ONE), "sqrt({n}) = incorrect {r}");
        }
        for k in 1..1000u64 {
            let n = (U256::from(k) << 64) + U256::from(1234u64);
            assert_eq!(isqrt(n * n), n);
            assert_eq!(isqrt(n * n + U256::ONE), n);
            assert_eq!(isqrt(n * n - U256::ONE), n - U256::ONE);
        }
    }

    #[test]
    fn test_dividers() {
        let ns: &[u64] = &[0, 1, 2, 3, 12345, 1 << 32, u64::MAX, u64::MAX - 3, 0xfedcba987654321];
        for p in [2u32, 3, 5, 7, 11, 65521, (1 << 24) - 3] {
            let d = Dividers::new(p);
            for &n in ns {
                assert_eq!(d.modu64(n), n % p as u64, "{n} mod {p}");
                assert_eq!(d.divmod64(n), (n / p as u64, n % p as u64));
                assert_eq!(d.divides(n), n % p as u64 == 0);
            }
            assert_eq!(d.modi64(-7), (-7_i64).rem_euclid(p as i64) as u64);
            assert_eq!(d.modi64(i64::MIN), (i64::MIN).rem_euclid(p as i64) as u64);
        }
        let n = U1024::from_str("123456789123456789123456789123456789123456789").unwrap();
        for p in [3u32, 17, 65537, 1000003] {
            let d = Dividers::new(p);
            assert_eq!(d.mod_uint(&n), (n % U1024::from(p)).low_u64());
            let (q, r) = d.divmod_uint(&n);
            assert_eq!(q, n / U1024::from(p));
            assert_eq!(r, (n % U1024::from(p)).low_u64());
        }
        // The multiplier slot uses p = 1.
        let d = Dividers::new(1);
        for &n in ns {
            assert_eq!(d.modu64(n), 0);
            assert_eq!(d.divmod64(n), (n, 0));
            assert!(d.divides(n));
        }
    }

    #[test]
    fn test_inv_mod() {
        for p in [2503u64, 2500213, 0xffffffffff43] {
            for n in 2..1000 {
                if let Some(i) = inv_mod64(n, p) {
                    assert_eq!(mulmod64(n, i, p), 1);
                }
            }
        }
        assert_eq!(inv_mod64(6, 9), None);
        let d = Dividers::new(65521);
        for n in [1u64, 2, 12345, 65520] {
            assert_eq!(mulmod64(n, d.inv(n).unwrap(), 65521), 1);
        }
        assert_eq!(d.inv(65521), None);
    }

    #[test]
    fn test_isprime64() {
        assert!(isprime64(2));
        assert!(isprime64(65537));
        assert!(isprime64(0xffffffff_ffffffc5));
        assert!(!isprime64(1));
        assert!(!isprime64(65536));
        // Strong pseudoprime to bases 2, 3, 5, 7.
        assert!(!isprime64(3215031751));
        // A semiprime for which 2 is an Euler liar.
        assert!(!isprime64(173142166387457));
    }

    #[test]
    fn test_pseudoprime() {
        let p256 = U1024::from_str(
            "92786510271815932444618978328822237837414362351005653014234479629925371473357",
        )
        .unwrap();
        // 2^128 - 159
        let p128 = U1024::from_str("340282366920938463463374607431768211297").unwrap();
        assert!(pseudoprime(p256));
        assert!(pseudoprime(p128));
        assert!(!pseudoprime(p128 * p256));
        assert!(!pseudoprime(p256 << 1));
    }

    #[test]
    fn test_pseudoprime_deep_2adic() {
        // Inputs with n-1 divisible by 2^64: the 2-adic valuation
        // spans more than the lowest word.
        // 3*2^66 + 1 and 18*2^66 + 1 are prime.
        let p1 = U1024::from_str("221360928884514619393").unwrap();
        let p2 = U1024::from_str("1328165573307087716353").unwrap();
        assert!(pseudoprime(p1));
        assert!(pseudoprime(p2));
        assert!(!pseudoprime(p1 * p2));
        // 2^65 + 1 = 3 * 11 * ...
        let c = (U1024::ONE << 65) + U1024::ONE;
        assert!(!pseudoprime(c));
    }
}
