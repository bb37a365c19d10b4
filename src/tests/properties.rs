//! Property-style tests: residual conformance on random problems, clipping
//! identities, warm starting, update equivalence, scaling round trips.

use faer::Col;
use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use rstest::rstest;
use rstest_reuse::{apply, template};

use crate::linalg::vector_ops;
use crate::{AdmmSolver, E, KktSolverKind, QuadraticProgram, Settings, Status};

use super::{diagonal, identity, kkt_residuals, random_col, random_feasible_qp};

#[template]
#[rstest]
fn each_backend(#[values(KktSolverKind::Pcg, KktSolverKind::Ldlt)] backend: KktSolverKind) {}

#[rstest]
fn random_qp_residual_conformance(
    #[values(KktSolverKind::Pcg, KktSolverKind::Ldlt)] backend: KktSolverKind,
    #[values(0, 1, 2, 3, 4)] seed: u64,
) {
    let n = 20;
    let m = 30;
    let prob = random_feasible_qp(seed, n, m);

    // Keep unscaled copies; setup equilibrates its own data in place.
    let p = prob.get_quadratic_cost().to_owned();
    let q = prob.get_linear_cost().to_owned();
    let a = prob.get_constraint_matrix().to_owned();
    let l = prob.get_lower_bounds().to_owned();
    let u = prob.get_upper_bounds().to_owned();

    let eps = 1e-5;
    let settings = Settings {
        eps_abs: eps,
        eps_rel: eps,
        max_iter: 20_000,
        linsys: backend,
        ..Settings::default()
    };
    let mut solver = AdmmSolver::setup(prob, settings).unwrap();
    let status = solver.solve();
    assert_eq!(status, Status::Solved, "seed {seed}");

    let sol = solver.solution();
    let (prim, dual) = kkt_residuals(&p, &q, &a, &l, &u, &sol.x, &sol.y);

    // Termination tolerances recomputed from the returned iterate.
    let mut ax = Col::<E>::zeros(m);
    crate::linalg::sparse_ops::spmv(&mut ax, 1., a.as_ref(), &sol.x, 0.);
    let mut px = Col::<E>::zeros(n);
    crate::linalg::sparse_ops::sym_spmv_upper(&mut px, 1., p.as_ref(), &sol.x, 0.);
    let mut aty = Col::<E>::zeros(n);
    crate::linalg::sparse_ops::spmv_transpose(&mut aty, 1., a.as_ref(), &sol.y, 0.);

    let eps_prim = eps + eps * vector_ops::inf_norm(ax.as_ref());
    let eps_dual = eps
        + eps
            * vector_ops::inf_norm(px.as_ref())
                .max(vector_ops::inf_norm(aty.as_ref()))
                .max(vector_ops::inf_norm(q.as_ref()));

    // Allow a small slack for the z-projection difference.
    assert!(prim <= 1.1 * eps_prim, "seed {seed}: prim {prim} > {eps_prim}");
    assert!(dual <= 1.1 * eps_dual, "seed {seed}: dual {dual} > {eps_dual}");
}

#[apply(each_backend)]
fn box_qp_matches_clipped_unconstrained_optimum(backend: KktSolverKind) {
    // With P diagonal and A = I the solution separates per coordinate:
    // x_i = clip(-q_i / P_ii, -1, 1).
    let rng = &mut StdRng::seed_from_u64(7);
    let n = 12;
    let diag: Vec<E> = (0..n).map(|i| 0.5 + (i as E) * 0.25).collect();
    let q = random_col(rng, n);
    let q = Col::from_fn(n, |i| 2. * q[i]);

    let prob = QuadraticProgram::new(
        diagonal(&diag),
        q.to_owned(),
        identity(n),
        Col::from_fn(n, |_| -1.),
        Col::from_fn(n, |_| 1.),
    )
    .unwrap();

    let settings = Settings {
        eps_abs: 1e-8,
        eps_rel: 1e-8,
        max_iter: 20_000,
        linsys: backend,
        ..Settings::default()
    };
    let mut solver = AdmmSolver::setup(prob, settings).unwrap();
    assert_eq!(solver.solve(), Status::Solved);

    let sol = solver.solution();
    for i in 0..n {
        let expected = (-q[i] / diag[i]).clamp(-1., 1.);
        assert!(
            (sol.x[i] - expected).abs() < 1e-4,
            "x[{i}] = {} expected {expected}",
            sol.x[i]
        );
    }
}

#[test]
fn warm_start_reduces_iterations_on_average() {
    let mut warm_total = 0usize;
    let mut cold_total = 0usize;

    for seed in 0..20 {
        let n = 10;
        let m = 15;
        let settings = Settings {
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            max_iter: 20_000,
            ..Settings::default()
        };

        // Solve, perturb the bounds, and continue from the previous iterate.
        let prob = random_feasible_qp(seed, n, m);
        let l2 = Col::from_fn(m, |i| prob.get_lower_bounds()[i] - 0.01);
        let u2 = Col::from_fn(m, |i| prob.get_upper_bounds()[i] + 0.02);

        let mut warm = AdmmSolver::setup(prob, settings.clone()).unwrap();
        assert_eq!(warm.solve(), Status::Solved);
        warm.update_bounds(Some(l2.as_ref()), Some(u2.as_ref()))
            .unwrap();
        assert_eq!(warm.solve(), Status::Solved);
        warm_total += warm.info().iterations;

        // Reference: the perturbed problem from a cold start.
        let prob = random_feasible_qp(seed, n, m);
        let mut cold = AdmmSolver::setup(prob, settings).unwrap();
        cold.update_bounds(Some(l2.as_ref()), Some(u2.as_ref()))
            .unwrap();
        assert_eq!(cold.solve(), Status::Solved);
        cold_total += cold.info().iterations;
    }

    assert!(
        warm_total <= cold_total,
        "warm {warm_total} > cold {cold_total}"
    );
}

#[apply(each_backend)]
fn update_lin_cost_matches_fresh_setup(backend: KktSolverKind) {
    let n = 8;
    let m = 12;
    let settings = Settings {
        eps_abs: 1e-7,
        eps_rel: 1e-7,
        max_iter: 20_000,
        linsys: backend,
        ..Settings::default()
    };

    let rng = &mut StdRng::seed_from_u64(11);
    let q2 = random_col(rng, n);

    let prob = random_feasible_qp(3, n, m);
    let mut updated = AdmmSolver::setup(prob, settings.clone()).unwrap();
    assert_eq!(updated.solve(), Status::Solved);
    updated.update_lin_cost(q2.as_ref()).unwrap();
    assert_eq!(updated.solve(), Status::Solved);

    let fresh_prob = {
        let base = random_feasible_qp(3, n, m);
        QuadraticProgram::new(
            base.get_quadratic_cost().to_owned(),
            q2.to_owned(),
            base.get_constraint_matrix().to_owned(),
            base.get_lower_bounds().to_owned(),
            base.get_upper_bounds().to_owned(),
        )
        .unwrap()
    };
    let mut fresh = AdmmSolver::setup(fresh_prob, settings).unwrap();
    assert_eq!(fresh.solve(), Status::Solved);

    let xu = updated.solution().x;
    let xf = fresh.solution().x;
    for j in 0..n {
        assert!(
            (xu[j] - xf[j]).abs() < 1e-3,
            "x[{j}]: updated {} fresh {}",
            xu[j],
            xf[j]
        );
    }
}

#[test]
fn scaling_round_trip() {
    let n = 10;
    let m = 14;

    let solve_with_scaling = |scaling: usize| {
        let prob = random_feasible_qp(21, n, m);
        let settings = Settings {
            eps_abs: 1e-7,
            eps_rel: 1e-7,
            max_iter: 20_000,
            scaling,
            ..Settings::default()
        };
        let mut solver = AdmmSolver::setup(prob, settings).unwrap();
        assert_eq!(solver.solve(), Status::Solved);
        solver.solution()
    };

    let scaled = solve_with_scaling(10);
    let unscaled = solve_with_scaling(0);

    // Both runs satisfy the same unscaled residual bound and agree on the
    // optimum.
    let prob = random_feasible_qp(21, n, m);
    let (p, q, a, l, u) = (
        prob.get_quadratic_cost(),
        prob.get_linear_cost(),
        prob.get_constraint_matrix(),
        prob.get_lower_bounds(),
        prob.get_upper_bounds(),
    );
    for sol in [&scaled, &unscaled] {
        let (prim, dual) = kkt_residuals(p, q, a, l, u, &sol.x, &sol.y);
        assert!(prim < 1e-4 && dual < 1e-4, "prim {prim} dual {dual}");
    }
    for j in 0..n {
        assert!(
            (scaled.x[j] - unscaled.x[j]).abs() < 1e-3,
            "x[{j}] differs: {} vs {}",
            scaled.x[j],
            unscaled.x[j]
        );
    }
}

#[test]
fn warm_start_from_optimum_converges_at_first_check() {
    let prob = random_feasible_qp(17, 8, 12);
    let settings = Settings {
        eps_abs: 1e-6,
        eps_rel: 1e-6,
        max_iter: 20_000,
        ..Settings::default()
    };
    let mut first = AdmmSolver::setup(prob, settings.clone()).unwrap();
    assert_eq!(first.solve(), Status::Solved);
    let sol = first.solution();

    let prob = random_feasible_qp(17, 8, 12);
    let mut second = AdmmSolver::setup(prob, settings).unwrap();
    second
        .warm_start(Some(sol.x.as_ref()), Some(sol.y.as_ref()))
        .unwrap();
    assert_eq!(second.solve(), Status::Solved);
    assert!(
        second.info().iterations <= second.settings().check_termination,
        "took {} iterations from an optimal warm start",
        second.info().iterations
    );

    // Mismatched dimensions are rejected.
    let bad = Col::<E>::zeros(3);
    assert!(second.warm_start(Some(bad.as_ref()), None).is_err());
}

#[test]
fn update_rho_and_settings_between_solves() {
    let prob = random_feasible_qp(5, 6, 9);
    let mut solver = AdmmSolver::setup(prob, Settings::default()).unwrap();
    assert_eq!(solver.solve(), Status::Solved);
    let before = solver.info().rho_updates;

    solver.update_rho(1.0).unwrap();
    assert_eq!(solver.info().rho_updates, before + 1);

    let mut tighter = solver.settings().clone();
    tighter.eps_abs = 1e-6;
    tighter.eps_rel = 1e-6;
    solver.update_settings(tighter).unwrap();
    assert_eq!(solver.solve(), Status::Solved);
    assert!(solver.info().prim_res.is_finite());
}

#[test]
fn update_matrix_values_rescales_consistently() {
    // Doubling P and A through the value-update API must match a fresh
    // setup on the doubled data.
    let n = 6;
    let m = 8;
    let base = random_feasible_qp(9, n, m);
    let p2: Vec<E> = base.get_quadratic_cost().val().iter().map(|v| 2. * v).collect();
    let a2: Vec<E> = base
        .get_constraint_matrix()
        .val()
        .iter()
        .map(|v| 2. * v)
        .collect();

    let settings = Settings {
        eps_abs: 1e-7,
        eps_rel: 1e-7,
        max_iter: 20_000,
        warm_start: false,
        ..Settings::default()
    };

    let mut updated = AdmmSolver::setup(random_feasible_qp(9, n, m), settings.clone()).unwrap();
    updated.update_p_values(&p2, None).unwrap();
    updated.update_a_values(&a2, None).unwrap();
    assert_eq!(updated.solve(), Status::Solved);

    let doubled = {
        let mut p = base.get_quadratic_cost().to_owned();
        {
            use faer::prelude::ReborrowMut;
            for v in p.rb_mut().val_mut().iter_mut() {
                *v *= 2.;
            }
        }
        let mut a = base.get_constraint_matrix().to_owned();
        {
            use faer::prelude::ReborrowMut;
            for v in a.rb_mut().val_mut().iter_mut() {
                *v *= 2.;
            }
        }
        QuadraticProgram::new(
            p,
            base.get_linear_cost().to_owned(),
            a,
            base.get_lower_bounds().to_owned(),
            base.get_upper_bounds().to_owned(),
        )
        .unwrap()
    };
    let mut fresh = AdmmSolver::setup(doubled, settings).unwrap();
    assert_eq!(fresh.solve(), Status::Solved);

    let xu = updated.solution().x;
    let xf = fresh.solution().x;
    for j in 0..n {
        assert!(
            (xu[j] - xf[j]).abs() < 1e-3,
            "x[{j}]: updated {} fresh {}",
            xu[j],
            xf[j]
        );
    }
}

#[apply(each_backend)]
fn polish_does_not_degrade_residuals(backend: KktSolverKind) {
    let prob = random_feasible_qp(13, 10, 16);
    let p = prob.get_quadratic_cost().to_owned();
    let q = prob.get_linear_cost().to_owned();
    let a = prob.get_constraint_matrix().to_owned();
    let l = prob.get_lower_bounds().to_owned();
    let u = prob.get_upper_bounds().to_owned();

    let settings = Settings {
        eps_abs: 1e-5,
        eps_rel: 1e-5,
        max_iter: 20_000,
        polishing: true,
        linsys: backend,
        ..Settings::default()
    };
    let mut solver = AdmmSolver::setup(prob, settings).unwrap();
    assert_eq!(solver.solve(), Status::Solved);

    let sol = solver.solution();
    let (prim, dual) = kkt_residuals(&p, &q, &a, &l, &u, &sol.x, &sol.y);
    // Whatever the polish outcome, the reported residuals must not be worse
    // than the termination tolerance regime.
    assert!(prim.is_finite() && dual.is_finite());
    assert!(sol.info.prim_res <= 1e-3);
    assert!(sol.info.dual_res <= 1e-3);
}
