// src/multigrid/mod.rs
//
// Masked multigrid preconditioner for a Fourier-diagonal operator.
//
// The hierarchy is a set of parallel arrays indexed by level (0 = finest):
//   levels[l], smoothers[l]      for l in 0..L
//   transfers[l]: l -> l + 1     for l in 0..L-1
// built once and read-only afterwards.

pub mod cycle;
pub mod level;
pub mod restriction;
pub mod sampler;
pub mod smoother;

pub use level::Level;
pub use restriction::{Restriction, RestrictionCache};
pub use sampler::{flat_operator_to_spectrum, sphere_kernel_to_flat_spectrum};
pub use smoother::{DenseSmoother, DiagonalSmoother, Smoother};

use std::sync::Arc;

use crate::config::MultigridConfig;
use crate::error::{Result, SinvError};
use crate::grid::Grid2D;

#[derive(Debug, Clone)]
pub struct MultigridHierarchy {
    levels: Vec<Level>,
    smoothers: Vec<Smoother>,
    transfers: Vec<Arc<Restriction>>,
    cfg: MultigridConfig,
}

impl MultigridHierarchy {
    /// Halve the grid until a level has at most `cfg.max_coarse_active` active pixels, then
    /// attach diagonal smoothers everywhere except the coarsest level, which gets a dense one.
    pub fn build(
        grid: Grid2D,
        spectrum: Vec<f64>,
        mask: Vec<f64>,
        cfg: MultigridConfig,
        cache: &RestrictionCache,
    ) -> Result<Self> {
        let mut levels = Vec::new();
        let mut transfers = Vec::new();

        let mut cur = Level::new(0, grid, spectrum, mask)?;
        loop {
            if cur.n_active() == 0 {
                let g = cur.grid();
                return Err(SinvError::NoActivePixels {
                    level: cur.index(),
                    rows: g.rows,
                    cols: g.cols,
                });
            }
            if cur.n_active() <= cfg.max_coarse_active {
                break;
            }
            let r = cache.get(cur.grid())?;
            let next = cur.coarsen(&r, &cfg)?;
            levels.push(cur);
            transfers.push(r);
            cur = next;
        }
        levels.push(cur);

        let last = levels.len() - 1;
        let smoothers = levels
            .iter()
            .enumerate()
            .map(|(l, level)| {
                if l == last {
                    DenseSmoother::new(level, cfg.max_coarse_condition).map(Smoother::Dense)
                } else {
                    DiagonalSmoother::new(level, cfg.damping).map(Smoother::Diagonal)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let summary: Vec<String> = levels
            .iter()
            .map(|l| format!("{}x{}:{}", l.grid().rows, l.grid().cols, l.n_active()))
            .collect();
        log::info!(
            "multigrid hierarchy: {} levels [{}]",
            levels.len(),
            summary.join(" -> ")
        );

        let h = Self {
            levels,
            smoothers,
            transfers,
            cfg,
        };
        if let Some(f) = h.smoothing_factor().filter(|f| *f >= 2.0) {
            log::warn!(
                "diagonal smoother overshoots the stiffest modes (damping*lambda_max/diag = {f:.3e} >= 2); \
                 the preconditioner may be indefinite and CG may stall, consider lowering damping \
                 (SINV_MG_DAMPING)"
            );
        }
        Ok(h)
    }

    /// One multigrid cycle from a zero initial guess: an approximate A^{-1} b on the
    /// finest level's active pixels.
    pub fn apply(&self, b: &[f64]) -> Vec<f64> {
        cycle::v_cycle(
            0,
            &self.levels,
            &self.smoothers,
            &self.transfers,
            &self.cfg,
            b,
        )
    }

    /// damping * lambda_max / diag on the finest level, or None when it has no diagonal
    /// smoother.
    ///
    /// lambda_max is bounded by N * max(spectrum) and the diagonal estimate equals
    /// sum(spectrum), so this is damping * max / mean of the spectrum. Above 2 the damped
    /// relaxation amplifies the top modes and the cycle may stop being positive definite.
    pub fn smoothing_factor(&self) -> Option<f64> {
        let Some(Smoother::Diagonal(s)) = self.smoothers.first() else {
            return None;
        };
        let finest = self.finest();
        let lambda_max = finest.grid().n_cells() as f64
            * finest.spectrum().iter().copied().fold(0.0, f64::max);
        Some(self.cfg.damping * lambda_max / s.diag())
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn smoothers(&self) -> &[Smoother] {
        &self.smoothers
    }

    pub fn transfers(&self) -> &[Arc<Restriction>] {
        &self.transfers
    }

    pub fn config(&self) -> &MultigridConfig {
        &self.cfg
    }

    pub fn finest(&self) -> &Level {
        &self.levels[0]
    }

    pub fn coarsest(&self) -> &Level {
        &self.levels[self.levels.len() - 1]
    }

    /// Dense smoother of the coarsest level.
    pub fn coarse_solver(&self) -> Option<&DenseSmoother> {
        match self.smoothers.last() {
            Some(Smoother::Dense(s)) => Some(s),
            _ => None,
        }
    }
}
