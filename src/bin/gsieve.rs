// Copyright 2022 Rémy Oudompheng. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Bibliography:
//!
//! Carl Pomerance, A Tale of Two Sieves
//! https://www.ams.org/notices/199612/pomerance.pdf
//!
//! https://en.wikipedia.org/wiki/Quadratic_sieve

use std::str::FromStr;

use gsieve::{factor, Preferences, Uint, Verbosity};

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.get::<bool>("help").is_some() || arg.orphans.len() != 1 {
        eprintln!("Usage: gsieve [OPTIONS] NUMBER");
        eprintln!("");
        eprintln!("Options:");
        eprintln!("  --help                    show this help");
        eprintln!("  --verbose silent|info|verbose|debug");
        eprintln!("  --threads N:              enable up to N computation threads");
        eprintln!("  --fb F:                   override automatic factor base size");
        eprintln!("  --interval M:             override automatic sieve interval size");
        eprintln!("  --large B1:               multiplier for large primes");
        eprintln!("  --extra E:                number of extra relations for linear algebra");
        return;
    }
    let threads = arg.get::<usize>("threads");
    let fb_user = arg.get::<u32>("fb");
    let interval = arg.get::<u32>("interval");
    let large = arg.get::<u64>("large");
    let extra = arg.get::<usize>("extra");
    let v = arg.get::<String>("verbose").unwrap_or("info".into());
    let number = &arg.orphans[0];
    let n = Uint::from_str(number).expect("could not read decimal number");

    let mut prefs = Preferences::default();
    prefs.fb_size = fb_user;
    prefs.interval_size = interval;
    prefs.large_factor = large;
    prefs.extra_relations = extra;
    prefs.threads = threads;
    prefs.verbosity = Verbosity::from_str(&v).unwrap();
    if prefs.verbosity >= Verbosity::Info {
        eprintln!("Input number {n} ({} bits)", n.bits());
    }
    match factor(&n, &prefs) {
        Ok((p, q)) => {
            println!("{p}");
            println!("{q}");
        }
        Err(e) => {
            eprintln!("Failure: {e}");
            std::process::exit(1);
        }
    }
}
