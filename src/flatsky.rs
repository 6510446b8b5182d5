// src/flatsky.rs
//
// Flat-sky transform pair on a periodic (rows x cols) patch.
//
// With F the unnormalised 2D DFT (rustfft forward) and N = rows*cols:
//   analysis            = F / N
//   adjoint_analysis    = F^H / N   (normalised inverse)
//   synthesis           = F^H       (inverse scaled by N)
//   adjoint_synthesis   = F
//
// A Fourier-diagonal operator with spectrum D is applied as Re(synthesis(D * adjoint_synthesis(u))),
// so its eigenvalue on mode k is N * D[k].

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use rayon::prelude::*;
use std::sync::Arc;

use crate::grid::Grid2D;

/// FFT plans for one grid shape. Immutable; safe to share across threads.
#[derive(Clone)]
pub struct FlatSkyFft {
    grid: Grid2D,
    row_fwd: Arc<dyn Fft<f64>>,
    row_inv: Arc<dyn Fft<f64>>,
    col_fwd: Arc<dyn Fft<f64>>,
    col_inv: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FlatSkyFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatSkyFft").field("grid", &self.grid).finish()
    }
}

impl FlatSkyFft {
    pub fn new(grid: Grid2D) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            grid,
            row_fwd: planner.plan_fft_forward(grid.cols),
            row_inv: planner.plan_fft_inverse(grid.cols),
            col_fwd: planner.plan_fft_forward(grid.rows),
            col_inv: planner.plan_fft_inverse(grid.rows),
        }
    }

    pub fn grid(&self) -> Grid2D {
        self.grid
    }

    pub fn analysis(&self, u: &[f64]) -> Vec<Complex<f64>> {
        let mut data = to_complex(u);
        self.fft2_in_place(&mut data, true);
        scale(&mut data, 1.0 / self.grid.n_cells() as f64);
        data
    }

    pub fn adjoint_analysis(&self, u: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut data = u.to_vec();
        self.fft2_in_place(&mut data, false);
        scale(&mut data, 1.0 / self.grid.n_cells() as f64);
        data
    }

    pub fn synthesis(&self, u: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut data = u.to_vec();
        self.fft2_in_place(&mut data, false);
        data
    }

    pub fn adjoint_synthesis(&self, u: &[f64]) -> Vec<Complex<f64>> {
        let mut data = to_complex(u);
        self.fft2_in_place(&mut data, true);
        data
    }

    /// Re(synthesis(spectrum * adjoint_synthesis(u))) on a full (padded) grid.
    pub fn apply_diagonal(&self, spectrum: &[f64], u: &[f64]) -> Vec<f64> {
        let n = self.grid.n_cells();
        debug_assert_eq!(spectrum.len(), n);
        debug_assert_eq!(u.len(), n);

        let mut data = to_complex(u);
        self.fft2_in_place(&mut data, true);
        data.par_iter_mut()
            .zip(spectrum.par_iter())
            .for_each(|(v, &d)| *v *= d);
        self.fft2_in_place(&mut data, false);
        data.into_iter().map(|v| v.re).collect()
    }

    /// Fourier spectrum whose diagonal operator has `image` as its response to `unit`:
    /// |analysis(image) / adjoint_synthesis(unit)|.
    pub fn image_to_spectrum(&self, unit: &[f64], image: &[f64]) -> Vec<f64> {
        let num = self.analysis(image);
        let den = self.adjoint_synthesis(unit);
        num.iter().zip(&den).map(|(a, b)| (a / b).norm()).collect()
    }

    /// Unnormalised 2D FFT: rows in parallel, then columns via a transpose.
    fn fft2_in_place(&self, data: &mut [Complex<f64>], forward: bool) {
        let (rows, cols) = (self.grid.rows, self.grid.cols);
        let n = rows * cols;
        debug_assert_eq!(data.len(), n);

        let (fft_row, fft_col) = if forward {
            (&self.row_fwd, &self.col_fwd)
        } else {
            (&self.row_inv, &self.col_inv)
        };

        // 1) Rows
        data.par_chunks_mut(cols).for_each(|row| fft_row.process(row));

        if rows == 1 {
            return;
        }

        // 2) Columns: tmp[c*rows + r] = data[r*cols + c]
        let mut tmp = vec![Complex::new(0.0, 0.0); n];
        {
            let data_ro: &[Complex<f64>] = &*data;
            tmp.par_chunks_mut(rows).enumerate().for_each(|(c, col)| {
                for r in 0..rows {
                    col[r] = data_ro[r * cols + c];
                }
            });
        }

        tmp.par_chunks_mut(rows).for_each(|col| fft_col.process(col));

        let tmp_ro: &[Complex<f64>] = &tmp;
        data.par_chunks_mut(cols).enumerate().for_each(|(r, row)| {
            for c in 0..cols {
                row[c] = tmp_ro[c * rows + r];
            }
        });
    }
}

fn to_complex(u: &[f64]) -> Vec<Complex<f64>> {
    u.iter().map(|&x| Complex::new(x, 0.0)).collect()
}

fn scale(data: &mut [Complex<f64>], s: f64) {
    data.par_iter_mut().for_each(|v| *v *= s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    fn random_real(rng: &mut StdRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.sample(StandardNormal)).collect()
    }

    fn random_complex(rng: &mut StdRng, n: usize) -> Vec<Complex<f64>> {
        (0..n)
            .map(|_| Complex::new(rng.sample(StandardNormal), rng.sample(StandardNormal)))
            .collect()
    }

    /// <a, b> = sum conj(a) * b
    fn inner(a: &[Complex<f64>], b: &[Complex<f64>]) -> Complex<f64> {
        a.iter().zip(b).map(|(x, y)| x.conj() * y).sum()
    }

    #[test]
    fn analysis_pairs_are_adjoint() {
        let grid = Grid2D::new(6, 10);
        let fft = FlatSkyFft::new(grid);
        let mut rng = StdRng::seed_from_u64(7);

        let u = random_real(&mut rng, grid.n_cells());
        let v = random_complex(&mut rng, grid.n_cells());
        let u_c = to_complex(&u);

        let lhs = inner(&fft.analysis(&u), &v);
        let rhs = inner(&u_c, &fft.adjoint_analysis(&v));
        assert!((lhs - rhs).norm() < 1e-10, "analysis: {lhs} vs {rhs}");

        let lhs = inner(&fft.adjoint_synthesis(&u), &v);
        let rhs = inner(&u_c, &fft.synthesis(&v));
        assert!((lhs - rhs).norm() < 1e-9, "synthesis: {lhs} vs {rhs}");
    }

    #[test]
    fn synthesis_inverts_analysis() {
        let grid = Grid2D::new(4, 8);
        let fft = FlatSkyFft::new(grid);
        let mut rng = StdRng::seed_from_u64(11);
        let u = random_real(&mut rng, grid.n_cells());

        let back = fft.synthesis(&fft.analysis(&u));
        for (a, b) in u.iter().zip(&back) {
            assert!((a - b.re).abs() < 1e-12 && b.im.abs() < 1e-12);
        }
    }

    #[test]
    fn constant_spectrum_scales_identity() {
        let grid = Grid2D::new(8, 16);
        let fft = FlatSkyFft::new(grid);
        let n = grid.n_cells() as f64;
        let spectrum = vec![2.0 / n; grid.n_cells()];
        let u: Vec<f64> = (0..grid.n_cells()).map(|i| (i as f64).sin()).collect();

        let out = fft.apply_diagonal(&spectrum, &u);
        for (a, b) in u.iter().zip(&out) {
            assert!((2.0 * a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn image_to_spectrum_recovers_diagonal() {
        let grid = Grid2D::new(8, 8);
        let fft = FlatSkyFft::new(grid);
        // symmetric, non-negative spectrum
        let spectrum: Vec<f64> = (0..grid.n_cells())
            .map(|i| {
                let (r, c) = (i / 8, i % 8);
                let kr = r.min(8 - r) as f64;
                let kc = c.min(8 - c) as f64;
                1.0 + 0.1 * (kr * kr + kc * kc)
            })
            .collect();

        let unit = grid.unit_impulse();
        let image = fft.apply_diagonal(&spectrum, &unit);
        let back = fft.image_to_spectrum(&unit, &image);
        let n = grid.n_cells() as f64;
        for (a, b) in spectrum.iter().zip(&back) {
            assert!((a - b).abs() < 1e-10 * n, "{a} vs {b}");
        }
    }
}
