use std::str::FromStr;

use brunch::Bench;

use gsieve::{fbase, params, poly, sieve};
use gsieve::{Uint, Verbosity};

const PQ128: &str = "138775954839724585441297917764657773201";
const PQ256: &str =
    "104567211693678450173299212092863908236097914668062065364632502155864426186497";

fn prepare(nstr: &str, fb_size: u32) -> (Uint, fbase::FBase, u32, u32) {
    let n = Uint::from_str(nstr).unwrap();
    let bits = n.bits();
    let (k, _) =
        fbase::select_multiplier(&n, params::multiplier_primes(bits), Verbosity::Silent).unwrap();
    let kn = n * Uint::from(k);
    let fb = fbase::FBase::new(&kn, fb_size, k, params::small_prime_count(bits)).unwrap();
    let m = params::interval_size(bits) / 2;
    (kn, fb, m, params::a_factor_count(bits))
}

fn main() {
    brunch::benches! {
        inline:
        // Eratosthenes sieve
        Bench::new("sieve 1000 primes")
        .run_seeded(1000, fbase::primes_sieve),
        Bench::new("sieve 10000 primes")
        .run_seeded(10000, fbase::primes_sieve),
        Bench::new("sieve 50000 primes")
        .run_seeded(50000, fbase::primes_sieve),
        // Factor base preparation
        {
            let n = Uint::from_str(PQ256).unwrap();
            Bench::new("select multiplier (256-bit n)")
            .run_seeded(&n, |n| fbase::select_multiplier(n, 1000, Verbosity::Silent).unwrap())
        },
        {
            let n = Uint::from_str(PQ256).unwrap();
            Bench::new("factor base 10000 primes (256-bit n)")
            .run_seeded(&n, |n| fbase::FBase::new(n, 10000, 1, 10).unwrap())
        },
        // Polynomial selection
        {
            let (kn, fb, m, nfacs) = prepare(PQ128, 2000);
            Bench::new("select A (128-bit n)")
            .run_seeded(&kn, |kn| {
                let mut sel = poly::Selector::new(&fb, kn, m, nfacs);
                let a0 = sel.next_a0().unwrap();
                let q_idx = sel.pivots_for(&a0, 1)[0];
                poly::Family::new(&fb, &a0, q_idx, m).a
            })
        },
        // Self-initialization chain
        {
            let (kn, fb, m, nfacs) = prepare(PQ128, 2000);
            let mut sel = poly::Selector::new(&fb, &kn, m, nfacs);
            let a0 = sel.next_a0().unwrap();
            let q_idx = sel.pivots_for(&a0, 1)[0];
            let fam = poly::Family::new(&fb, &a0, q_idx, m);
            Bench::new("enumerate polynomial family (128-bit n)")
            .run_seeded((&fam, &kn), |(fam, kn)| {
                let mut pol = poly::Poly::new();
                fam.first_poly(&fb, kn, &mut pol);
                for i in 1..fam.count() {
                    fam.next_poly(&fb, kn, &mut pol, i);
                }
                pol.b
            })
        },
        // Block sieving
        {
            let (kn, fb, m, nfacs) = prepare(PQ256, 20000);
            let mut sel = poly::Selector::new(&fb, &kn, m, nfacs);
            let a0 = sel.next_a0().unwrap();
            let q_idx = sel.pivots_for(&a0, 1)[0];
            let fam = poly::Family::new(&fb, &a0, q_idx, m);
            let mut pol = poly::Poly::new();
            fam.first_poly(&fb, &kn, &mut pol);
            let mut s = sieve::Sieve::new(m);
            Bench::new("sieve+scan one 64k block (256-bit n)")
            .run_seeded(&pol, |pol| {
                s.start_poly(pol);
                s.sieve_block(&fb);
                s.candidates(100).len()
            })
        },
    }
}
