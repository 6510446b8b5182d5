// src/multigrid/level.rs
//
// One resolution of the masked operator.
//
// Vectors come in two flavours:
// - padded: full grid, rows*cols entries
// - active: only the pixels where mask == 0, in row-major order
// `pickvec` / `padvec` convert between them; pad(pick(u)) keeps u on active pixels and
// zeroes the rest.

use crate::config::MultigridConfig;
use crate::error::{Result, check_len};
use crate::flatsky::FlatSkyFft;
use crate::geometry_mask::mask_binarize;
use crate::grid::Grid2D;

use super::restriction::Restriction;
use super::sampler::flat_operator_to_spectrum;

#[derive(Debug, Clone)]
pub struct Level {
    index: usize,
    grid: Grid2D,
    /// Fourier-domain spectrum of the flat-sky operator (rows*cols, non-negative).
    spectrum: Vec<f64>,
    mask: Vec<f64>,
    pick: Vec<bool>,
    active: Vec<usize>,
    fft: FlatSkyFft,
}

impl Level {
    pub fn new(index: usize, grid: Grid2D, spectrum: Vec<f64>, mask: Vec<f64>) -> Result<Self> {
        check_len(grid.n_cells(), spectrum.len())?;
        check_len(grid.n_cells(), mask.len())?;

        let pick: Vec<bool> = mask.iter().map(|&m| m == 0.0).collect();
        let active = pick
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect();

        Ok(Self {
            index,
            grid,
            spectrum,
            mask,
            pick,
            active,
            fft: FlatSkyFft::new(grid),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn grid(&self) -> Grid2D {
        self.grid
    }

    pub fn spectrum(&self) -> &[f64] {
        &self.spectrum
    }

    pub fn mask(&self) -> &[f64] {
        &self.mask
    }

    /// Active-pixel selector over the flattened grid.
    pub fn pick(&self) -> &[bool] {
        &self.pick
    }

    pub fn n_active(&self) -> usize {
        self.active.len()
    }

    pub fn pickvec(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.grid.n_cells());
        self.active.iter().map(|&i| u[i]).collect()
    }

    pub fn padvec(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.n_active());
        let mut out = vec![0.0; self.grid.n_cells()];
        for (&i, &v) in self.active.iter().zip(u) {
            out[i] = v;
        }
        out
    }

    /// Fourier-diagonal operator on the full grid.
    pub fn matvec_padded(&self, u: &[f64]) -> Vec<f64> {
        self.fft.apply_diagonal(&self.spectrum, u)
    }

    /// Operator restricted to the active pixels.
    pub fn matvec(&self, u: &[f64]) -> Vec<f64> {
        self.pickvec(&self.matvec_padded(&self.padvec(u)))
    }

    /// Galerkin product R A R^T on full coarse grids.
    pub fn matvec_coarsened(&self, restriction: &Restriction, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(restriction.fine(), self.grid);
        restriction.restrict(&self.matvec_padded(&restriction.prolong(u)))
    }

    /// Active fine residual -> active coarse right-hand side.
    pub fn restrict_to(&self, next: &Level, restriction: &Restriction, r: &[f64]) -> Vec<f64> {
        next.pickvec(&restriction.restrict(&self.padvec(r)))
    }

    /// Active coarse correction -> active fine correction (transpose of `restrict_to`).
    pub fn prolong_from(&self, next: &Level, restriction: &Restriction, c: &[f64]) -> Vec<f64> {
        self.pickvec(&restriction.prolong(&next.padvec(c)))
    }

    /// Next coarser level: binarised restricted mask, operator resampled from R A R^T.
    pub fn coarsen(&self, restriction: &Restriction, cfg: &MultigridConfig) -> Result<Level> {
        debug_assert_eq!(restriction.fine(), self.grid);
        let coarse = restriction.coarse();

        let mask = mask_binarize(&restriction.restrict(&self.mask), cfg.mask_threshold);
        let fft = FlatSkyFft::new(coarse);
        let spectrum = flat_operator_to_spectrum(&fft, |u| self.matvec_coarsened(restriction, u));

        let next = Level::new(self.index + 1, coarse, spectrum, mask)?;
        log::debug!(
            "level {} -> {}: {}x{} -> {}x{}, active {} -> {}",
            self.index,
            next.index,
            self.grid.rows,
            self.grid.cols,
            coarse.rows,
            coarse.cols,
            self.n_active(),
            next.n_active()
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry_mask::mask_count_active;
    use rand::prelude::*;
    use rand_distr::{StandardNormal, Uniform};

    fn smooth_spectrum(grid: Grid2D) -> Vec<f64> {
        let n = grid.n_cells() as f64;
        (0..grid.n_cells())
            .map(|i| {
                let (r, c) = (i / grid.cols, i % grid.cols);
                let kr = r.min(grid.rows - r) as f64 / grid.rows as f64;
                let kc = c.min(grid.cols - c) as f64 / grid.cols as f64;
                (1.0 + kr * kr + kc * kc) / n
            })
            .collect()
    }

    fn random_mask(rng: &mut StdRng, grid: Grid2D) -> Vec<f64> {
        let u = Uniform::new(0.0, 1.0);
        (0..grid.n_cells())
            .map(|_| if rng.sample(&u) < 0.3 { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn pick_pad_round_trip() {
        let grid = Grid2D::new(6, 8);
        let mut rng = StdRng::seed_from_u64(1);
        let mask = random_mask(&mut rng, grid);
        let level = Level::new(0, grid, smooth_spectrum(grid), mask.clone()).unwrap();
        assert_eq!(level.n_active(), mask_count_active(&mask));

        let u: Vec<f64> = (0..grid.n_cells()).map(|_| rng.sample(StandardNormal)).collect();
        let back = level.padvec(&level.pickvec(&u));
        for i in 0..grid.n_cells() {
            let expect = if mask[i] == 0.0 { u[i] } else { 0.0 };
            assert_eq!(back[i], expect, "pixel {i}");
        }
    }

    #[test]
    fn masked_matvec_is_symmetric() {
        let grid = Grid2D::new(8, 8);
        let mut rng = StdRng::seed_from_u64(2);
        let level =
            Level::new(0, grid, smooth_spectrum(grid), random_mask(&mut rng, grid)).unwrap();
        let n = level.n_active();
        let u: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
        let v: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();

        let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
        let lhs = dot(&level.matvec(&u), &v);
        let rhs = dot(&u, &level.matvec(&v));
        assert!((lhs - rhs).abs() < 1e-10, "lhs={lhs}, rhs={rhs}");
    }

    #[test]
    fn transfer_between_levels_is_adjoint() {
        let grid = Grid2D::new(8, 16);
        let mut rng = StdRng::seed_from_u64(3);
        let fine =
            Level::new(0, grid, smooth_spectrum(grid), random_mask(&mut rng, grid)).unwrap();
        let r = Restriction::new(grid).unwrap();
        let coarse = fine.coarsen(&r, &MultigridConfig::default()).unwrap();
        assert_eq!(coarse.grid(), Grid2D::new(4, 8));
        assert_eq!(coarse.index(), 1);

        let a: Vec<f64> = (0..fine.n_active()).map(|_| rng.sample(StandardNormal)).collect();
        let b: Vec<f64> = (0..coarse.n_active()).map(|_| rng.sample(StandardNormal)).collect();
        let dot = |x: &[f64], y: &[f64]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f64>();

        let lhs = dot(&fine.restrict_to(&coarse, &r, &a), &b);
        let rhs = dot(&a, &fine.prolong_from(&coarse, &r, &b));
        assert!((lhs - rhs).abs() < 1e-12, "lhs={lhs}, rhs={rhs}");
    }

    #[test]
    fn coarse_mask_is_binary_and_spectrum_non_negative() {
        let grid = Grid2D::new(16, 16);
        let mut rng = StdRng::seed_from_u64(4);
        let fine =
            Level::new(0, grid, smooth_spectrum(grid), random_mask(&mut rng, grid)).unwrap();
        let r = Restriction::new(grid).unwrap();
        let coarse = fine.coarsen(&r, &MultigridConfig::default()).unwrap();

        assert!(coarse.mask().iter().all(|&m| m == 0.0 || m == 1.0));
        assert!(coarse.spectrum().iter().all(|&d| d.is_finite() && d >= 0.0));
    }

    #[test]
    fn fully_active_coarse_operator_matches_galerkin_product() {
        // With no mask, R A R^T is translation invariant on the coarse grid, so the
        // resampled spectrum reproduces it exactly.
        let grid = Grid2D::new(8, 8);
        let fine = Level::new(0, grid, smooth_spectrum(grid), vec![0.0; 64]).unwrap();
        let r = Restriction::new(grid).unwrap();
        let coarse = fine.coarsen(&r, &MultigridConfig::default()).unwrap();
        assert_eq!(coarse.n_active(), 16);

        let mut rng = StdRng::seed_from_u64(5);
        let u: Vec<f64> = (0..16).map(|_| rng.sample(StandardNormal)).collect();
        let direct = fine.matvec_coarsened(&r, &u);
        let resampled = coarse.matvec(&u);
        for (a, b) in direct.iter().zip(&resampled) {
            assert!((a - b).abs() < 1e-10, "{a} vs {b}");
        }
    }
}
