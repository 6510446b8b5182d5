// tests/solver.rs
//
// End-to-end checks of the masked sphere solver.
// Run only these: cargo test --test solver
// The 64-ring cases take a few seconds in debug builds.

use std::sync::Arc;

use rand::prelude::*;
use rand_distr::StandardNormal;

use sinv_mg::config::SolverConfig;
use sinv_mg::geometry_mask::{
    sphere_mask_all_active, sphere_mask_centered_hole, sphere_mask_from_fn,
};
use sinv_mg::grid::Grid2D;
use sinv_mg::multigrid::RestrictionCache;
use sinv_mg::sht::{GaussLegendreSht, alm_len};
use sinv_mg::{SinvError, SinvSolver};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn decaying_kernel(len: usize) -> Vec<f64> {
    (0..len).map(|l| 1.0 / ((1 + l) as f64).powi(2)).collect()
}

fn high_pass_kernel(len: usize, lc: f64) -> Vec<f64> {
    (0..len)
        .map(|l| 1.0 + (l * (l + 1)) as f64 / (lc * lc))
        .collect()
}

fn gaussian(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.sample(StandardNormal)).collect()
}

fn norm(a: &[f64]) -> f64 {
    a.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rel_diff(a: &[f64], b: &[f64]) -> f64 {
    let d: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    norm(&d) / norm(b)
}

#[test]
fn recovers_random_field_on_full_patch() {
    init_logs();
    let nrings = 64;
    let solver = SinvSolver::new(
        &decaying_kernel(33),
        &sphere_mask_all_active(nrings),
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
    )
    .unwrap();

    assert_eq!(solver.shape(), Grid2D::new(16, 128));
    assert_eq!(solver.n_active(), 2048);
    let shapes: Vec<usize> = solver.levels().iter().map(|l| l.n_active()).collect();
    assert_eq!(shapes, vec![2048, 512, 128, 32]);
    // Extended with the needlet tail.
    assert!(solver.kernel().len() > 33);
    assert_eq!(&solver.kernel()[..33], &decaying_kernel(33)[..]);

    let x_true = gaussian(solver.n_active(), 1);
    let b = solver.forward(&x_true);
    let result = solver.solve(&b, 1e-6, 50, Some(&x_true)).unwrap();

    assert!(result.converged, "residuals: {:?}", result.residuals);
    assert!(result.iterations <= 50);
    assert_eq!(result.residuals.len(), result.iterations);
    assert_eq!(result.errors.len(), result.iterations);
    assert!(result.final_residual().unwrap() < 1e-6);

    let true_res = rel_diff(&solver.forward(&result.x), &b);
    assert!(true_res < 1e-5, "true residual {true_res:.3e}");
    let err = rel_diff(&result.x, &x_true);
    assert!(err < 1e-3, "relative error {err:.3e}");
}

#[test]
fn forward_impulse_response_is_point_symmetric() {
    init_logs();
    let nrings = 32;
    let solver = SinvSolver::new(
        &decaying_kernel(17),
        &sphere_mask_all_active(nrings),
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
    )
    .unwrap();

    let grid = solver.shape();
    let response = solver.forward(&grid.unit_impulse());
    let (cr, cc) = grid.center();
    let centre = response[grid.center_idx()];
    assert!(centre > 0.0);

    for dr in 0..grid.rows {
        for dc in 0..grid.cols {
            let a = response[grid.idx((cr + dr) % grid.rows, (cc + dc) % grid.cols)];
            let b = response[grid.idx(
                (cr + grid.rows - dr) % grid.rows,
                (cc + grid.cols - dc) % grid.cols,
            )];
            assert!((a - b).abs() <= 1e-10 * centre, "offset ({dr},{dc}): {a} vs {b}");
            assert!(a.abs() <= centre * (1.0 + 1e-10));
        }
    }
}

#[test]
fn solves_inside_centred_hole() {
    init_logs();
    let nrings = 64;
    let solver = SinvSolver::new(
        &decaying_kernel(33),
        &sphere_mask_centered_hole(nrings, 8, 8),
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
    )
    .unwrap();

    assert_eq!(solver.n_active(), 64);
    assert_eq!(solver.levels().len(), 2);
    assert_eq!(solver.levels()[1].grid(), Grid2D::new(8, 64));
    let coarse = solver.hierarchy().coarse_solver().unwrap();
    assert_eq!(coarse.n(), 16);
    assert_eq!(coarse.matrix().nrows(), 16);

    let x_true = gaussian(64, 2);
    let b = solver.forward(&x_true);
    let result = solver.solve(&b, 1e-6, 200, Some(&x_true)).unwrap();
    assert!(result.converged);
    assert!(rel_diff(&result.x, &x_true) < 1e-2);
}

#[test]
fn split_preconditioner_converges() {
    init_logs();
    let nrings = 64;
    let config = SolverConfig {
        split: true,
        ..SolverConfig::default()
    };
    let solver = SinvSolver::new(
        &decaying_kernel(33),
        &sphere_mask_all_active(nrings),
        GaussLegendreSht::new(nrings),
        config,
    )
    .unwrap();
    assert!(solver.is_split());

    // The hierarchy holds the square root of the forward spectrum.
    let inner = solver.levels()[0].spectrum();
    for (s, o) in inner.iter().zip(solver.outer_spectrum()) {
        assert!((s * s - o).abs() <= 1e-12 * o.abs().max(1e-300));
    }

    let x_true = gaussian(solver.n_active(), 4);
    let b = solver.forward(&x_true);
    let result = solver.solve(&b, 1e-5, 100, None).unwrap();
    assert!(result.converged, "residuals: {:?}", result.residuals);
    assert!(result.errors.is_empty());
}

#[test]
fn stops_at_iteration_budget() {
    init_logs();
    let nrings = 32;
    let solver = SinvSolver::new(
        &high_pass_kernel(17, 4.0),
        &sphere_mask_all_active(nrings),
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
    )
    .unwrap();

    let b = solver.forward(&gaussian(solver.n_active(), 5));
    let result = solver.solve(&b, 1e-15, 3, None).unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.residuals.len(), 3);

    let none = solver.solve(&b, 1e-6, 0, None).unwrap();
    assert_eq!(none.iterations, 0);
    assert!(!none.converged);
    assert!(none.x.iter().all(|&v| v == 0.0));
}

#[test]
fn construction_errors() {
    init_logs();
    let dl = high_pass_kernel(9, 4.0);

    let err = SinvSolver::new(
        &dl,
        &vec![0.0; 100],
        GaussLegendreSht::new(16),
        SolverConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, SinvError::MaskShape { len: 100 }));

    let err = SinvSolver::new(
        &dl,
        &sphere_mask_all_active(32),
        GaussLegendreSht::new(16),
        SolverConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, SinvError::RingMismatch { transform: 16, mask: 32 }));

    let err = SinvSolver::new(
        &[],
        &sphere_mask_all_active(16),
        GaussLegendreSht::new(16),
        SolverConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, SinvError::EmptyKernel));

    let nothing_active = sphere_mask_from_fn(16, |_, _| false);
    let err = SinvSolver::new(
        &dl,
        &nothing_active,
        GaussLegendreSht::new(16),
        SolverConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, SinvError::NoActivePixels { level: 0, .. }));
}

#[test]
fn alm_restriction_and_prolongation_are_adjoint() {
    init_logs();
    let nrings = 32;
    let solver = SinvSolver::new(
        &high_pass_kernel(17, 4.0),
        &sphere_mask_centered_hole(nrings, 4, 24),
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
    )
    .unwrap();

    let lmax = 20;
    let alm = gaussian(alm_len(lmax), 6);
    let u = gaussian(solver.n_active(), 7);

    let ra = solver.restrict_alm(&alm, lmax).unwrap();
    let pu = solver.prolong_alm(&u, lmax).unwrap();
    assert_eq!(ra.len(), solver.n_active());
    assert_eq!(pu.len(), alm.len());

    let lhs = dot(&ra, &u);
    let rhs = dot(&alm, &pu);
    assert!((lhs - rhs).abs() <= 1e-10 * lhs.abs().max(1.0), "{lhs} vs {rhs}");

    assert!(matches!(
        solver.restrict_alm(&alm[1..], lmax),
        Err(SinvError::LengthMismatch { .. })
    ));
}

#[test]
fn solvers_share_transfer_matrices() {
    init_logs();
    let nrings = 32;
    let cache = Arc::new(RestrictionCache::new());
    let mask = sphere_mask_all_active(nrings);

    let a = SinvSolver::with_cache(
        &high_pass_kernel(17, 4.0),
        &mask,
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
        &cache,
    )
    .unwrap();
    // 8x64 -> 4x32 -> 2x16
    assert_eq!(cache.len(), 2);

    let b = SinvSolver::with_cache(
        &decaying_kernel(17),
        &mask,
        GaussLegendreSht::new(nrings),
        SolverConfig::default(),
        &cache,
    )
    .unwrap();
    assert_eq!(cache.len(), 2);

    let ta = a.hierarchy().transfers();
    let tb = b.hierarchy().transfers();
    assert_eq!(ta.len(), tb.len());
    for (x, y) in ta.iter().zip(tb) {
        assert!(Arc::ptr_eq(x, y));
    }
}
