// Copyright 2022, 2023 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Random factoring test.
//!
//! This program generates random semiprimes of the requested bit length
//! and factors them in a loop, for test and benchmark purposes.

use std::str::FromStr;
use std::time::Instant;

use bnum::cast::CastFrom;
use rand::{self, Rng};

use gsieve::arith::{Dividers, Num, U256};
use gsieve::fbase;
use gsieve::{factor, isprime64, pseudoprime, Preferences, Uint, Verbosity};

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.get::<bool>("help").is_some() {
        eprintln!("Usage: gsieve-test [OPTIONS]");
        eprintln!("");
        eprintln!("Options:");
        eprintln!("  --help                    show this help");
        eprintln!("  --bits B:                 input length (default 64)");
        eprintln!("  --threads N:              enable up to N computation threads");
        eprintln!("  --verbose silent|info|verbose|debug");
        return;
    }
    let bits = arg.get::<u32>("bits").unwrap_or(64);
    let threads = arg.get::<usize>("threads");
    let v = arg.get::<String>("verbose").unwrap_or("silent".into());
    let mut prefs = Preferences::default();
    prefs.threads = threads;
    prefs.verbosity = Verbosity::from_str(&v).unwrap();
    // Prepare small primes for trial division.
    let primes = fbase::primes_sieve(2 * bits);
    let divs: Vec<Dividers> = primes.iter().map(|&p| Dividers::new(p)).collect();
    let mut rng = rand::thread_rng();
    let mut i = 0;
    let t0 = Instant::now();
    loop {
        let mut words = [0u64; 4];
        rng.try_fill(&mut words).unwrap();
        let p0 = U256::from_digits(words) | U256::power_of_two(255);
        rng.try_fill(&mut words).unwrap();
        let q0 = U256::from_digits(words) | U256::power_of_two(255);
        let p = nextprime(&divs, Uint::cast_from(p0 >> (256 - bits / 2)));
        let q = nextprime(&divs, Uint::cast_from(q0 >> (256 - bits + bits / 2)));
        let n = p * q;
        eprint!("{}", format!("p={p} q={q} => n={n}\n"));
        // Factor
        let Ok((x, y)) = factor(&n, &prefs) else {
            eprintln!("ERROR failed to factor {n}={p}*{q}");
            std::process::exit(1);
        };
        assert!((x, y) == (p, q) || (x, y) == (q, p));
        i += 1;
        let elapsed = t0.elapsed().as_secs_f64();
        let avg = elapsed / (i as f64) * 1000.;
        if bits > 64 || i % 10 == 0 {
            eprintln!("Processed {i} numbers in {elapsed:.3}s (average {avg:.3}ms)");
        }
    }
}

fn nextprime64(divs: &[Dividers], base: u64) -> u64 {
    'nextcandidate: for i in 0..8000 {
        let p = base + i;
        for d in divs {
            if d.divmod64(p).1 == 0 {
                if p == d.p as u64 {
                    return p;
                }
                continue 'nextcandidate;
            }
        }
        // Naive Miller test
        if isprime64(p) {
            return p;
        }
    }
    unreachable!("impossible");
}

fn nextprime(divs: &[Dividers], base: Uint) -> Uint {
    if base.bits() < 64 {
        return Uint::from(nextprime64(divs, base.low_u64()));
    }
    // The base exceeds every sieved prime, any divisor is a proper one.
    'nextcandidate: for i in 0..8000u64 {
        let p = base + Uint::from(i);
        for d in divs {
            if d.mod_uint(&p) == 0 {
                continue 'nextcandidate;
            }
        }
        if pseudoprime(p) {
            return p;
        }
    }
    unreachable!("impossible");
}
