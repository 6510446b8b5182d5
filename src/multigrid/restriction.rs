// src/multigrid/restriction.rs
//
// Full-weighting restriction (R x C) -> (R/2 x C/2) with periodic wrap on both axes.
//
// Coarse cell (i, j) averages the 3x3 fine neighbourhood centred on (2i, 2j):
//   1/16 1/8 1/16
//   1/8  1/4 1/8
//   1/16 1/8 1/16
// Prolongation is the plain transpose R^T (no rescaling).
//
// Matrices depend only on the grid shape, so they are memoised in a `RestrictionCache`
// that solvers share through an `Arc`.

use rayon::prelude::*;
use sprs::{CsMat, TriMat};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SinvError};
use crate::grid::Grid2D;

const STENCIL: [(isize, isize, f64); 9] = [
    (-1, -1, 1.0 / 16.0),
    (-1, 0, 1.0 / 8.0),
    (-1, 1, 1.0 / 16.0),
    (0, -1, 1.0 / 8.0),
    (0, 0, 1.0 / 4.0),
    (0, 1, 1.0 / 8.0),
    (1, -1, 1.0 / 16.0),
    (1, 0, 1.0 / 8.0),
    (1, 1, 1.0 / 16.0),
];

#[inline]
fn wrap(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

#[derive(Debug)]
pub struct Restriction {
    fine: Grid2D,
    coarse: Grid2D,
    /// CSR, one row per coarse cell.
    matrix: CsMat<f64>,
}

impl Restriction {
    pub fn new(fine: Grid2D) -> Result<Self> {
        if !fine.is_halvable() {
            return Err(SinvError::NonHalvingGrid {
                rows: fine.rows,
                cols: fine.cols,
            });
        }
        let coarse = fine.halved();

        // Wrapped neighbours can coincide on 2-wide axes; TriMat sums them.
        let mut tri = TriMat::new((coarse.n_cells(), fine.n_cells()));
        for i in 0..coarse.rows {
            for j in 0..coarse.cols {
                let row = coarse.idx(i, j);
                for &(di, dj, w) in STENCIL.iter() {
                    let fi = wrap(2 * i as isize + di, fine.rows);
                    let fj = wrap(2 * j as isize + dj, fine.cols);
                    tri.add_triplet(row, fine.idx(fi, fj), w);
                }
            }
        }

        Ok(Self {
            fine,
            coarse,
            matrix: tri.to_csr(),
        })
    }

    pub fn fine(&self) -> Grid2D {
        self.fine
    }

    pub fn coarse(&self) -> Grid2D {
        self.coarse
    }

    pub fn matrix(&self) -> &CsMat<f64> {
        &self.matrix
    }

    /// R u (fine -> coarse), full grids.
    pub fn restrict(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.fine.n_cells());
        (0..self.coarse.n_cells())
            .into_par_iter()
            .map(|i| {
                self.matrix
                    .outer_view(i)
                    .map_or(0.0, |row| row.iter().map(|(j, &w)| w * u[j]).sum())
            })
            .collect()
    }

    /// R^T u (coarse -> fine), full grids.
    pub fn prolong(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.coarse.n_cells());
        let mut out = vec![0.0; self.fine.n_cells()];
        for (i, row) in self.matrix.outer_iterator().enumerate() {
            let ui = u[i];
            if ui == 0.0 {
                continue;
            }
            for (j, &w) in row.iter() {
                out[j] += w * ui;
            }
        }
        out
    }
}

/// Shape-keyed memo of restriction matrices.
#[derive(Debug, Default)]
pub struct RestrictionCache {
    entries: Mutex<HashMap<Grid2D, Arc<Restriction>>>,
}

impl RestrictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restriction from `fine` to its half-resolution grid, built on first use.
    pub fn get(&self, fine: Grid2D) -> Result<Arc<Restriction>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = entries.get(&fine) {
            return Ok(Arc::clone(r));
        }
        let r = Arc::new(Restriction::new(fine)?);
        log::debug!(
            "restriction cache: built {}x{} -> {}x{} ({} nnz)",
            fine.rows,
            fine.cols,
            r.coarse.rows,
            r.coarse.cols,
            r.matrix.nnz()
        );
        entries.insert(fine, Arc::clone(&r));
        Ok(r)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn restriction_is_partition_of_unity() {
        for &(rows, cols) in &[(16, 32), (4, 8), (2, 4), (2, 2)] {
            let r = Restriction::new(Grid2D::new(rows, cols)).unwrap();
            let ones = vec![1.0; rows * cols];
            let coarse = r.restrict(&ones);
            assert_eq!(coarse.len(), rows * cols / 4);
            for (k, v) in coarse.iter().enumerate() {
                assert!((v - 1.0).abs() < 1e-14, "{rows}x{cols}: cell {k} = {v}");
            }
        }
    }

    #[test]
    fn prolong_is_exact_transpose() {
        let r = Restriction::new(Grid2D::new(8, 12)).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let u: Vec<f64> = (0..96).map(|_| rng.sample(StandardNormal)).collect();
        let v: Vec<f64> = (0..24).map(|_| rng.sample(StandardNormal)).collect();

        let lhs = dot(&r.restrict(&u), &v);
        let rhs = dot(&u, &r.prolong(&v));
        assert!((lhs - rhs).abs() < 1e-12, "lhs={lhs}, rhs={rhs}");

        // unscaled: a single coarse impulse spreads the stencil weights themselves
        let mut e = vec![0.0; 24];
        e[0] = 1.0;
        let p = r.prolong(&e);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-14);
        assert!((p[0] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn stencil_wraps_periodically() {
        let fine = Grid2D::new(4, 4);
        let r = Restriction::new(fine).unwrap();
        let mut u = vec![0.0; 16];
        u[fine.idx(3, 3)] = 1.0; // diagonal neighbour of (0, 0) through both wraps
        let c = r.restrict(&u);
        assert!((c[0] - 1.0 / 16.0).abs() < 1e-15);
    }

    #[test]
    fn odd_grid_is_rejected() {
        let err = Restriction::new(Grid2D::new(3, 8)).unwrap_err();
        assert!(matches!(err, SinvError::NonHalvingGrid { rows: 3, cols: 8 }));
    }

    #[test]
    fn cache_reuses_matrices_by_shape() {
        let cache = RestrictionCache::new();
        let a = cache.get(Grid2D::new(8, 16)).unwrap();
        let b = cache.get(Grid2D::new(8, 16)).unwrap();
        let c = cache.get(Grid2D::new(4, 8)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }
}
