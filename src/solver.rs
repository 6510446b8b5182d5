// src/solver.rs
//
// Masked solver for an isotropic covariance operator on the equatorial band of a sphere.
//
// Construction:
//   1) ring count from the full-sphere mask (len = 2 n^2), band rings [3n/8, 5n/8)
//   2) kernel optionally extended with a needlet tail
//   3) forward spectrum sampled on the band at native resolution
//   4) multigrid built on that spectrum, or on its square root in split mode
//
// The CG loop uses `forward` as the operator and `precondition` (one V-cycle, two in split
// mode) as the preconditioner.

use std::sync::Arc;

use crate::cg::{ConjugateGradient, norm};
use crate::config::SolverConfig;
use crate::error::{Result, SinvError, check_len};
use crate::flatsky::FlatSkyFft;
use crate::geometry_mask::{EquatorBand, Mask, active_bbox, nrings_from_len};
use crate::grid::Grid2D;
use crate::kernel::extend_kernel;
use crate::multigrid::{
    Level, MultigridHierarchy, RestrictionCache, Smoother, sphere_kernel_to_flat_spectrum,
};
use crate::sht::{SphericalTransform, alm_len};

/// Outcome of `SinvSolver::solve`. Running out of iterations is not an error.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Final iterate on the active pixels.
    pub x: Vec<f64>,
    /// |r_k| / |b| after each iteration.
    pub residuals: Vec<f64>,
    /// |x_k - x_ref| / |x_ref| after each iteration (empty without a reference).
    pub errors: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl SolveResult {
    pub fn final_residual(&self) -> Option<f64> {
        self.residuals.last().copied()
    }

    pub fn final_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }
}

pub struct SinvSolver<T: SphericalTransform> {
    sht: T,
    band: EquatorBand,
    kernel: Vec<f64>,
    outer_spectrum: Vec<f64>,
    fft: FlatSkyFft,
    hierarchy: MultigridHierarchy,
    config: SolverConfig,
}

impl<T: SphericalTransform> SinvSolver<T> {
    /// Build with a private restriction cache.
    pub fn new(dl: &[f64], mask_gauss: &[f64], sht: T, config: SolverConfig) -> Result<Self> {
        Self::with_cache(dl, mask_gauss, sht, config, &Arc::new(RestrictionCache::new()))
    }

    /// Build reusing restriction matrices from `cache` (shared across solvers of the same
    /// resolution).
    pub fn with_cache(
        dl: &[f64],
        mask_gauss: &[f64],
        sht: T,
        config: SolverConfig,
        cache: &Arc<RestrictionCache>,
    ) -> Result<Self> {
        let nrings = nrings_from_len(mask_gauss.len())?;
        if sht.nrings() != nrings {
            return Err(SinvError::RingMismatch {
                transform: sht.nrings(),
                mask: nrings,
            });
        }
        if dl.is_empty() {
            return Err(SinvError::EmptyKernel);
        }

        let band = EquatorBand::for_nrings(nrings);
        let patch = band.patch();
        let mask: Mask = band.gauss_grid_to_equator(mask_gauss);
        match active_bbox(&mask, patch) {
            Some((r0, r1, c0, c1)) => log::debug!(
                "active pixels inside patch rows {r0}..={r1}, cols {c0}..={c1}"
            ),
            None => log::debug!("no active pixels inside the equatorial band"),
        }

        let kernel = match config.envelope {
            Some(env) => extend_kernel(dl, env.band, env.lmax_factor)?,
            None => {
                if dl.len() < nrings {
                    log::warn!(
                        "kernel has {} degrees and no envelope; the {}-ring grid resolves more",
                        dl.len(),
                        nrings
                    );
                }
                dl.to_vec()
            }
        };

        let outer_spectrum = sphere_kernel_to_flat_spectrum(&sht, &kernel, patch)?;
        let inner_spectrum = if config.split {
            outer_spectrum.iter().map(|v| v.sqrt()).collect()
        } else {
            outer_spectrum.clone()
        };

        let hierarchy =
            MultigridHierarchy::build(patch, inner_spectrum, mask, config.multigrid, cache)?;

        log::info!(
            "sinv solver: nrings={nrings}, band rings {}..{}, patch {}x{}, kernel lmax {} (given {}), \
             {} active, {} levels{}",
            band.start_ring,
            band.stop_ring,
            patch.rows,
            patch.cols,
            kernel.len() - 1,
            dl.len() - 1,
            hierarchy.finest().n_active(),
            hierarchy.levels().len(),
            if config.split { ", split" } else { "" }
        );

        Ok(Self {
            sht,
            band,
            kernel,
            outer_spectrum,
            fft: FlatSkyFft::new(patch),
            hierarchy,
            config,
        })
    }

    /// True (unsplit) operator on the active pixels.
    pub fn forward(&self, u: &[f64]) -> Vec<f64> {
        let finest = self.hierarchy.finest();
        let padded = finest.padvec(u);
        finest.pickvec(&self.fft.apply_diagonal(&self.outer_spectrum, &padded))
    }

    /// Approximate inverse of `forward`.
    pub fn precondition(&self, b: &[f64]) -> Vec<f64> {
        let x = self.hierarchy.apply(b);
        if self.config.split {
            self.hierarchy.apply(&x)
        } else {
            x
        }
    }

    /// Preconditioned CG from a zero start. Stops once |r|/|b| < `tolerance` or after
    /// `max_iterations` iterations, whichever comes first.
    pub fn solve(
        &self,
        b: &[f64],
        tolerance: f64,
        max_iterations: usize,
        reference: Option<&[f64]>,
    ) -> Result<SolveResult> {
        let n = self.n_active();
        check_len(n, b.len())?;
        if let Some(r) = reference {
            check_len(n, r.len())?;
        }

        let b_norm = norm(b);
        if b_norm == 0.0 {
            return Ok(SolveResult {
                x: vec![0.0; n],
                residuals: Vec::new(),
                errors: Vec::new(),
                iterations: 0,
                converged: true,
            });
        }
        let ref_norm = reference.map(norm).filter(|v| *v > 0.0).unwrap_or(1.0);

        let mut cg = ConjugateGradient::new(
            |u: &[f64]| self.forward(u),
            b,
            |r: &[f64]| self.precondition(r),
            None,
        );

        let mut residuals = Vec::new();
        let mut errors = Vec::new();
        let mut converged = false;

        while cg.iteration() < max_iterations {
            let Some(step) = cg.step() else {
                break;
            };
            let res = step.residual_norm / b_norm;
            residuals.push(res);
            if step.delta < 0.0 {
                log::warn!(
                    "iteration {}: r^T M r = {:.3e} < 0, preconditioner is not positive definite",
                    step.iteration,
                    step.delta
                );
            }

            if let Some(x_ref) = reference {
                let err = cg
                    .x()
                    .iter()
                    .zip(x_ref)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
                    / ref_norm;
                errors.push(err);
                log::debug!("iteration {}, res={res:.3e}, err={err:.3e}", step.iteration);
            } else {
                log::debug!("iteration {}, res={res:.3e}", step.iteration);
            }

            if res < tolerance {
                converged = true;
                break;
            }
        }

        let iterations = cg.iteration();
        if converged {
            log::info!(
                "cg converged in {iterations} iterations (res={:.3e})",
                residuals.last().copied().unwrap_or(0.0)
            );
        } else {
            log::warn!(
                "cg stopped after {iterations} iterations without reaching {tolerance:.1e} (res={:.3e})",
                residuals.last().copied().unwrap_or(1.0)
            );
        }

        Ok(SolveResult {
            x: cg.into_solution(),
            residuals,
            errors,
            iterations,
            converged,
        })
    }

    /// Harmonic coefficients -> active patch pixels: pick(band(Y a)).
    pub fn restrict_alm(&self, alm: &[f64], lmax: usize) -> Result<Vec<f64>> {
        check_len(alm_len(lmax), alm.len())?;
        let map = self.sht.synthesis(lmax, alm);
        Ok(self.pickvec(&self.band.gauss_grid_to_equator(&map)))
    }

    /// Active patch pixels -> harmonic coefficients: Y^T embed(pad(u)). Adjoint of `restrict_alm`.
    pub fn prolong_alm(&self, u: &[f64], lmax: usize) -> Result<Vec<f64>> {
        check_len(self.n_active(), u.len())?;
        let map = self.band.equator_to_gauss_grid(&self.padvec(u));
        Ok(self.sht.adjoint_synthesis(lmax, &map))
    }

    pub fn pickvec(&self, u: &[f64]) -> Vec<f64> {
        self.hierarchy.finest().pickvec(u)
    }

    pub fn padvec(&self, u: &[f64]) -> Vec<f64> {
        self.hierarchy.finest().padvec(u)
    }

    pub fn gauss_grid_to_equator(&self, u: &[f64]) -> Vec<f64> {
        self.band.gauss_grid_to_equator(u)
    }

    pub fn equator_to_gauss_grid(&self, u: &[f64]) -> Vec<f64> {
        self.band.equator_to_gauss_grid(u)
    }

    pub fn n_active(&self) -> usize {
        self.hierarchy.finest().n_active()
    }

    /// Patch shape (rows, cols).
    pub fn shape(&self) -> Grid2D {
        self.band.patch()
    }

    pub fn nrings(&self) -> usize {
        self.band.nrings
    }

    /// Band limit of harmonic fields the ring grid resolves exactly.
    pub fn lmax(&self) -> usize {
        self.band.nrings - 1
    }

    pub fn band(&self) -> EquatorBand {
        self.band
    }

    /// Kernel after envelope extension.
    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    pub fn outer_spectrum(&self) -> &[f64] {
        &self.outer_spectrum
    }

    pub fn is_split(&self) -> bool {
        self.config.split
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &MultigridHierarchy {
        &self.hierarchy
    }

    pub fn levels(&self) -> &[Level] {
        self.hierarchy.levels()
    }

    pub fn smoothers(&self) -> &[Smoother] {
        self.hierarchy.smoothers()
    }

    pub fn transform(&self) -> &T {
        &self.sht
    }
}
