// src/multigrid/smoother.rs
//
// Relaxation operators bound 1:1 to levels.
//
// - Diagonal: x += damping * r / diag, with one representative diagonal value read off the
//   padded operator's response to a centred impulse (the flat-sky operator is translation
//   invariant, so every pixel shares it).
// - Dense: exact inverse of the active-pixel operator. Only built on the coarsest level,
//   where the active count is small enough to probe column by column.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{Result, SinvError};

use super::level::Level;

#[derive(Debug, Clone)]
pub struct DiagonalSmoother {
    diag: f64,
    damping: f64,
}

impl DiagonalSmoother {
    pub fn new(level: &Level, damping: f64) -> Result<Self> {
        let grid = level.grid();
        let response = level.matvec_padded(&grid.unit_impulse());
        let diag = response[grid.center_idx()];
        if !diag.is_finite() || diag <= 0.0 {
            return Err(SinvError::NonPositiveDiagonal {
                level: level.index(),
                value: diag,
            });
        }
        log::debug!("level {}: diagonal smoother, diag={diag:.6e}", level.index());
        Ok(Self { diag, damping })
    }

    pub fn diag(&self) -> f64 {
        self.diag
    }

    pub fn apply(&self, r: &[f64]) -> Vec<f64> {
        let s = self.damping / self.diag;
        r.iter().map(|v| s * v).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DenseSmoother {
    matrix: DMatrix<f64>,
    inverse: DMatrix<f64>,
    condition: f64,
}

fn norm1(m: &DMatrix<f64>) -> f64 {
    m.column_iter()
        .map(|c| c.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

impl DenseSmoother {
    pub fn new(level: &Level, max_condition: f64) -> Result<Self> {
        let n = level.n_active();
        if n == 0 {
            let g = level.grid();
            return Err(SinvError::NoActivePixels {
                level: level.index(),
                rows: g.rows,
                cols: g.cols,
            });
        }

        // Columns A e_j are independent probes.
        let columns: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|j| {
                let mut e = vec![0.0; n];
                e[j] = 1.0;
                level.matvec(&e)
            })
            .collect();
        let matrix = DMatrix::from_fn(n, n, |i, j| columns[j][i]);

        let inverse = matrix
            .clone()
            .try_inverse()
            .filter(|inv| inv.iter().all(|v| v.is_finite()))
            .ok_or(SinvError::SingularCoarseOperator { n })?;

        let condition = norm1(&matrix) * norm1(&inverse);
        if !condition.is_finite() || condition > max_condition {
            return Err(SinvError::IllConditioned { n, cond: condition });
        }

        log::debug!(
            "level {}: dense smoother {n}x{n}, cond_1 ~ {condition:.3e}",
            level.index()
        );
        Ok(Self {
            matrix,
            inverse,
            condition,
        })
    }

    pub fn n(&self) -> usize {
        self.matrix.nrows()
    }

    /// The probed active-pixel operator.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// 1-norm condition number of `matrix`.
    pub fn condition(&self) -> f64 {
        self.condition
    }

    pub fn apply(&self, r: &[f64]) -> Vec<f64> {
        debug_assert_eq!(r.len(), self.n());
        let x = &self.inverse * DVector::from_column_slice(r);
        x.iter().copied().collect()
    }
}

#[derive(Debug, Clone)]
pub enum Smoother {
    Diagonal(DiagonalSmoother),
    Dense(DenseSmoother),
}

impl Smoother {
    pub fn apply(&self, r: &[f64]) -> Vec<f64> {
        match self {
            Smoother::Diagonal(s) => s.apply(r),
            Smoother::Dense(s) => s.apply(r),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Smoother::Dense(_))
    }
}
