// src/multigrid/cycle.rs
//
// Recursive V-cycle over the level / smoother / transfer arrays.
//
// Level 0 is the finest. The coarsest level is solved exactly by its dense smoother; every
// other level does
//   pre_sweeps of x += S(b - A x)
//   coarse_corrections of x += P(cycle(l + 1, R(b - A x)))
//   post_sweeps of x += S(b - A x)
// starting from x = 0. With one sweep of each this is a single symmetric V-cycle.

use std::sync::Arc;

use crate::config::MultigridConfig;

use super::level::Level;
use super::restriction::Restriction;
use super::smoother::Smoother;

fn residual(level: &Level, b: &[f64], x: &[f64]) -> Vec<f64> {
    let ax = level.matvec(x);
    b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect()
}

fn add_assign(x: &mut [f64], dx: &[f64]) {
    debug_assert_eq!(x.len(), dx.len());
    x.iter_mut().zip(dx).for_each(|(a, b)| *a += b);
}

fn relax(level: &Level, smoother: &Smoother, b: &[f64], x: &mut [f64]) {
    let r = residual(level, b, x);
    add_assign(x, &smoother.apply(&r));
}

pub(crate) fn v_cycle(
    l: usize,
    levels: &[Level],
    smoothers: &[Smoother],
    transfers: &[Arc<Restriction>],
    cfg: &MultigridConfig,
    b: &[f64],
) -> Vec<f64> {
    debug_assert_eq!(levels.len(), smoothers.len());
    debug_assert_eq!(levels.len(), transfers.len() + 1);
    debug_assert_eq!(b.len(), levels[l].n_active());

    if l + 1 == levels.len() {
        return smoothers[l].apply(b);
    }

    let level = &levels[l];
    let next = &levels[l + 1];
    let restriction = transfers[l].as_ref();
    let smoother = &smoothers[l];

    let mut x = vec![0.0; b.len()];

    for _ in 0..cfg.pre_sweeps {
        relax(level, smoother, b, &mut x);
    }

    for _ in 0..cfg.coarse_corrections {
        let r_h = residual(level, b, &x);
        let r_c = level.restrict_to(next, restriction, &r_h);
        let c_c = v_cycle(l + 1, levels, smoothers, transfers, cfg, &r_c);
        let c_h = level.prolong_from(next, restriction, &c_c);
        add_assign(&mut x, &c_h);
    }

    for _ in 0..cfg.post_sweeps {
        relax(level, smoother, b, &mut x);
    }

    x
}
