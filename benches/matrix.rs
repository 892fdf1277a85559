use brunch::Bench;
use rand::{self, Fill};

use gsieve::{matrix, Verbosity};

fn main() {
    let mut rng = rand::thread_rng();
    let mut b1 = matrix::Block::new(6000);
    let mut b2 = matrix::Block::new(6000);
    b1.try_fill(&mut rng).unwrap();
    b2.try_fill(&mut rng).unwrap();
    let mut m1 = matrix::SmallMat::default();
    loop {
        m1.try_fill(&mut rng).unwrap();
        if m1.inverse().is_some() {
            break;
        }
    }
    let mut m2 = matrix::SmallMat::default();
    m2.try_fill(&mut rng).unwrap();
    // The shape of a relation matrix for a 200-bit input.
    let sp = matrix::make_test_sparsemat(6000, 40, 24);
    let mut bs = matrix::Block::new(6040);
    bs.try_fill(&mut rng).unwrap();

    brunch::benches! {
        inline:
        // Inner products of the Lanczos iteration
        {
            Bench::new("block^T x block (6000 rows)")
            .run_seeded((&b1, &b2), |(b1, b2)| (b1 * b2) as matrix::SmallMat)
        },
        {
            Bench::new("block x 64x64 (6000 rows)")
            .run_seeded((&b1, &m1), |(b, m)| (b * m) as matrix::Block)
        },
        {
            Bench::new("sparse 6000x6040 x block")
            .run_seeded((&sp, &bs), |(m, b)| (m * b) as matrix::Block)
        },
        {
            Bench::new("A^T A x block (sparse 6000x6040)")
            .run_seeded((&sp, &bs), |(m, b)| matrix::mul_aab(m, b) as matrix::Block)
        },
        {
            Bench::new("rank 64x64")
            .run_seeded(&m1, |m| m.rank())
        },
        {
            Bench::new("inverse 64x64")
            .run_seeded(&m1, |m| m.inverse().unwrap() as matrix::SmallMat)
        },
        {
            Bench::new("64x64 x 64x64")
            .run_seeded((&m1, &m2), |(m1, m2)| (m1 * m2) as matrix::SmallMat)
        },
        {
            Bench::new("right-hand side block (sparse 6000x6040)")
            .run_seeded(&sp, |m| matrix::genblock(m, 42) as matrix::Block)
        },
        // Whole kernel computations
        {
            Bench::new("filter singletons (sparse 6000x6040)")
            .run_seeded(&sp, |m| matrix::reduce_matrix(m).1.len())
        },
        {
            let mat = matrix::make_test_sparsemat(500, 10, 20);
            Bench::new("lanczos 500x510, 20/col")
            .run_seeded(&mat, |mat| matrix::kernel_lanczos(mat, Verbosity::Silent).pop().unwrap())
        },
        {
            let mat = matrix::make_test_sparsemat(1000, 10, 20);
            Bench::new("lanczos 1000x1010, 20/col")
            .run_seeded(&mat, |mat| matrix::kernel_lanczos(mat, Verbosity::Silent).pop().unwrap())
        },
        {
            let mat = matrix::make_test_sparsemat(500, 10, 20);
            Bench::new("gauss 500x510, 20/col")
            .run_seeded(&mat, |mat| matrix::kernel_gauss(mat).pop().unwrap())
        },
        {
            let mat = matrix::make_test_sparsemat(1000, 10, 20);
            Bench::new("gauss 1000x1010, 20/col")
            .run_seeded(&mat, |mat| matrix::kernel_gauss(mat).pop().unwrap())
        },
    }
}
