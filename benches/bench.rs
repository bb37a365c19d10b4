use boxers::{AdmmSolver, KktSolverKind, QuadraticProgram, Settings};
use faer::Col;
use faer::sparse::SparseColMat;

fn main() {
    divan::main();
}

/// Box-constrained QP with a tridiagonal quadratic cost.
fn box_qp(n: usize) -> QuadraticProgram {
    let mut p_triplets = Vec::new();
    for i in 0..n {
        p_triplets.push(faer::sparse::Triplet::new(i, i, 2.0));
        if i + 1 < n {
            p_triplets.push(faer::sparse::Triplet::new(i, i + 1, -1.0));
        }
    }
    let p = SparseColMat::try_new_from_triplets(n, n, &p_triplets).unwrap();

    let a_triplets: Vec<_> = (0..n)
        .map(|i| faer::sparse::Triplet::new(i, i, 1.0))
        .collect();
    let a = SparseColMat::try_new_from_triplets(n, n, &a_triplets).unwrap();

    QuadraticProgram::new(
        p,
        Col::from_fn(n, |i| ((i % 7) as f64) - 3.0),
        a,
        Col::from_fn(n, |_| -1.0),
        Col::from_fn(n, |_| 1.0),
    )
    .unwrap()
}

fn solve(kind: KktSolverKind, n: usize) {
    let settings = Settings {
        eps_abs: 1e-5,
        eps_rel: 1e-5,
        linsys: kind,
        ..Settings::default()
    };
    let mut solver = AdmmSolver::setup(box_qp(n), settings).unwrap();
    let status = solver.solve();
    divan::black_box(status);
}

#[divan::bench(args = [50, 200])]
fn solve_pcg(n: usize) {
    solve(KktSolverKind::Pcg, n);
}

#[divan::bench(args = [50, 200])]
fn solve_ldlt(n: usize) {
    solve(KktSolverKind::Ldlt, n);
}
