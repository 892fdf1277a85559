// Copyright 2022 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! gsieve factors integers using the self-initializing quadratic
//! sieve (SIQS), following the description of Alford and Pomerance.
//!
//! The expected input is an odd composite without small factors, such
//! as a semiprime from a cryptographic benchmark. Inputs above 270
//! bits are rejected: they are out of reach of a quadratic sieve on a
//! single machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod arith;
pub mod fbase;
pub mod matrix;
pub mod params;
pub mod poly;
pub mod relations;
pub mod sieve;
pub mod siqs;

pub use crate::arith::{isprime64, pseudoprime};
pub use crate::siqs::siqs;

use crate::arith::Num;

// We need to perform modular multiplication modulo the input number.
pub type Int = arith::I1024;
pub type Uint = arith::U1024;

/// Amount of logging on stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    #[default]
    Info,
    Verbose,
    Debug,
}

impl std::str::FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silent" | "0" => Ok(Verbosity::Silent),
            "info" | "1" => Ok(Verbosity::Info),
            "verbose" | "2" => Ok(Verbosity::Verbose),
            "debug" | "3" => Ok(Verbosity::Debug),
            _ => Err(format!("unknown verbosity level {s:?}")),
        }
    }
}

/// Options overriding the tuning tables. The defaults (None) follow
/// the tables indexed by input size.
#[derive(Clone, Default)]
pub struct Preferences {
    /// Factor base size, including the multiplier and 2.
    pub fb_size: Option<u32>,
    /// Full width of the sieve interval in bytes.
    pub interval_size: Option<u32>,
    /// Multiplier of the smoothness bound accepting large prime
    /// cofactors.
    pub large_factor: Option<u64>,
    /// Relations collected beyond the factor base size.
    pub extra_relations: Option<usize>,
    /// Size of the thread pool sieving polynomial families.
    pub threads: Option<usize>,
    pub verbosity: Verbosity,
    /// Cooperative interruption flag, polled between polynomial
    /// families.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Preferences {
    pub fn should_abort(&self) -> bool {
        match &self.abort {
            Some(flag) => flag.load(Ordering::Relaxed),
            None => false,
        }
    }
}

/// A small prime divisor discovered during preparation, disproving
/// the assumption that the input has no small factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedFactor(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactorError {
    /// Inputs below 10 bits belong to trial division.
    TooSmall,
    /// The input exceeds the advertised bit limit.
    TooLarge(u32),
    ProbablePrime,
    /// Sieving or linear algebra failed to produce a factorization.
    NotFound,
    Interrupted,
}

impl fmt::Display for FactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorError::TooSmall => write!(f, "input too small, use trial division"),
            FactorError::TooLarge(bits) => write!(f, "input exceeds the {bits} bit limit"),
            FactorError::ProbablePrime => write!(f, "input is probably prime"),
            FactorError::NotFound => write!(f, "no factorization found"),
            FactorError::Interrupted => write!(f, "factorization interrupted"),
        }
    }
}

impl std::error::Error for FactorError {}

/// Splits a composite integer into two nontrivial factors.
///
/// Trivial structure (even numbers, perfect squares) is handled
/// directly, everything else goes through the quadratic sieve.
pub fn factor(n: &Uint, prefs: &Preferences) -> Result<(Uint, Uint), FactorError> {
    let bits = n.bits();
    if bits > params::MAX_BITS {
        return Err(FactorError::TooLarge(params::MAX_BITS));
    }
    if bits < 10 {
        return Err(FactorError::TooSmall);
    }
    if n.low_u64() & 1 == 0 {
        return Ok((Uint::from(2u64), *n >> 1));
    }
    if pseudoprime(*n) {
        return Err(FactorError::ProbablePrime);
    }
    let r = arith::isqrt(*n);
    if r * r == *n {
        return Ok((r, r));
    }
    let tpool: Option<rayon::ThreadPool> = match prefs.threads {
        Some(t) if t > 1 => {
            if prefs.verbosity >= Verbosity::Info {
                eprintln!("Using a pool of {t} threads");
            }
            rayon::ThreadPoolBuilder::new().num_threads(t).build().ok()
        }
        _ => None,
    };
    siqs::siqs(n, prefs, tpool.as_ref())
}

#[test]
fn test_verbosity_parse() {
    use std::str::FromStr;
    assert_eq!(Verbosity::from_str("verbose"), Ok(Verbosity::Verbose));
    assert_eq!(Verbosity::from_str("0"), Ok(Verbosity::Silent));
    assert!(Verbosity::from_str("noisy").is_err());
    assert!(Verbosity::Silent < Verbosity::Debug);
}

#[test]
fn test_factor_edge_cases() {
    let prefs = Preferences {
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    // Even input
    assert_eq!(
        factor(&Uint::from(1000006u64), &prefs),
        Ok((Uint::from(2u64), Uint::from(500003u64)))
    );
    // Perfect square
    let p = Uint::from(611953u64);
    assert_eq!(factor(&(p * p), &prefs), Ok((p, p)));
    // Primes are rejected
    assert_eq!(
        factor(&Uint::from(2147483647u64), &prefs),
        Err(FactorError::ProbablePrime)
    );
    // Size limits
    assert_eq!(factor(&Uint::from(511u64), &prefs), Err(FactorError::TooSmall));
    let huge = (Uint::ONE << 300) + Uint::ONE;
    assert_eq!(
        factor(&huge, &prefs),
        Err(FactorError::TooLarge(params::MAX_BITS))
    );
}

#[test]
fn test_factor_semiprime() {
    let prefs = Preferences {
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    let (p, q) = factor(&Uint::from(611953u64 * 1000003), &prefs).unwrap();
    assert_eq!((p, q), (Uint::from(611953u64), Uint::from(1000003u64)));
}

#[test]
fn test_factor_interrupted() {
    let prefs = Preferences {
        verbosity: Verbosity::Silent,
        abort: Some(Arc::new(AtomicBool::new(true))),
        ..Default::default()
    };
    let n = Uint::from(1_000_000_016_000_000_063u64);
    assert_eq!(factor(&n, &prefs), Err(FactorError::Interrupted));
}
