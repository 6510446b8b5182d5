// src/config.rs
//
// Solver configuration.
//
// The multigrid policy knobs (damping, sweep counts, termination size) default to the
// values the preconditioner was tuned with, and can be overridden from the environment
// for experiments without plumbing them through every caller:
//
//   SINV_MG_DAMPING=<f64>               (default 0.3; diagonal smoother damping)
//   SINV_MG_PRE_SWEEPS=<n>              (default 1)
//   SINV_MG_POST_SWEEPS=<n>             (default 1)
//   SINV_MG_COARSE_CORRECTIONS=<n>      (default 1; 1 = V-cycle, 2 = W-cycle)
//   SINV_MG_MAX_COARSE_ACTIVE=<n>       (default 50)
//   SINV_MG_MASK_THRESHOLD=<f64>        (default 0.5)
//   SINV_MG_MAX_COARSE_CONDITION=<f64>  (default 1e12)
//   SINV_ENVELOPE_BAND=<f64>            (default 2.0)
//   SINV_ENVELOPE_LMAX_FACTOR=<f64>     (default 4.0; set 0 to disable kernel extension)
//   SINV_SPLIT=1|0                      (default 0)

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultigridConfig {
    /// Damping factor of the diagonal smoother: x += damping * r / diag.
    ///
    /// Must stay below 2 * diag / lambda_max (i.e. 2 * mean / max of the finest spectrum) for
    /// the relaxation to be a contraction. Sharply low-pass kernels on fine grids can violate
    /// this at 0.3; `MultigridHierarchy::smoothing_factor` reports the ratio.
    pub damping: f64,

    /// Relaxation sweeps before the coarse correction.
    pub pre_sweeps: usize,
    /// Relaxation sweeps after the coarse correction.
    pub post_sweeps: usize,

    /// Recursive coarse solves per level (1 gives a V-cycle).
    pub coarse_corrections: usize,

    /// Stop coarsening once a level has at most this many active pixels.
    pub max_coarse_active: usize,

    /// Restricted mask values below this are active (0), the rest fixed (1).
    pub mask_threshold: f64,

    /// Reject the coarsest dense operator if its 1-norm condition estimate exceeds this.
    pub max_coarse_condition: f64,
}

impl Default for MultigridConfig {
    fn default() -> Self {
        Self {
            damping: 0.3,
            pre_sweeps: 1,
            post_sweeps: 1,
            coarse_corrections: 1,
            max_coarse_active: 50,
            mask_threshold: 0.5,
            max_coarse_condition: 1e12,
        }
    }
}

fn get_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}

fn get_f64(name: &str) -> Option<f64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

impl MultigridConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = get_f64("SINV_MG_DAMPING") {
            cfg.damping = v.clamp(1e-3, 1.0);
        }
        if let Some(v) = get_usize("SINV_MG_PRE_SWEEPS") {
            cfg.pre_sweeps = v;
        }
        if let Some(v) = get_usize("SINV_MG_POST_SWEEPS") {
            cfg.post_sweeps = v;
        }
        if let Some(v) = get_usize("SINV_MG_COARSE_CORRECTIONS") {
            cfg.coarse_corrections = v.clamp(1, 4);
        }
        if let Some(v) = get_usize("SINV_MG_MAX_COARSE_ACTIVE") {
            cfg.max_coarse_active = v.max(1);
        }
        if let Some(v) = get_f64("SINV_MG_MASK_THRESHOLD") {
            cfg.mask_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = get_f64("SINV_MG_MAX_COARSE_CONDITION") {
            cfg.max_coarse_condition = v.max(1.0);
        }

        cfg
    }
}

/// Needlet tail used to extend a truncated kernel past its band limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Needlet band parameter B (> 1).
    pub band: f64,
    /// The envelope is generated up to lmax = lmax_factor * len(kernel) - 1.
    pub lmax_factor: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            band: 2.0,
            lmax_factor: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Build the hierarchy on the square root of the operator and apply it twice.
    pub split: bool,
    pub multigrid: MultigridConfig,
    /// None leaves the kernel as supplied.
    pub envelope: Option<EnvelopeConfig>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            split: false,
            multigrid: MultigridConfig::default(),
            envelope: Some(EnvelopeConfig::default()),
        }
    }
}

impl SolverConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            multigrid: MultigridConfig::from_env(),
            ..Self::default()
        };

        let mut env = EnvelopeConfig::default();
        if let Some(v) = get_f64("SINV_ENVELOPE_BAND") {
            env.band = v.clamp(1.05, 16.0);
        }
        cfg.envelope = match get_f64("SINV_ENVELOPE_LMAX_FACTOR") {
            Some(v) if v <= 0.0 => None,
            Some(v) => Some(EnvelopeConfig {
                lmax_factor: v.max(1.0),
                ..env
            }),
            None => Some(env),
        };

        if let Ok(v) = std::env::var("SINV_SPLIT") {
            cfg.split = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }

        cfg
    }
}

// ---------------------------
// Run provenance (written by the CLI)
// ---------------------------

#[derive(Serialize)]
pub struct RunConfig {
    pub problem: ProblemConfig,
    pub solver: SolverConfig,
    pub stopping: StoppingConfig,
    pub run: RunInfo,
}

#[derive(Serialize)]
pub struct ProblemConfig {
    pub nrings: usize,
    pub kernel_len: usize,
    pub kernel_lmax_extended: usize,
    pub patch_rows: usize,
    pub patch_cols: usize,
    pub hole_rows: usize,
    pub hole_cols: usize,
    pub n_active: usize,
    pub n_levels: usize,
}

#[derive(Serialize)]
pub struct StoppingConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Serialize)]
pub struct RunInfo {
    pub binary: String,
    pub run_id: String,
    pub seed: u64,
    pub iterations: usize,
    pub converged: bool,
    pub final_residual: Option<f64>,
    pub final_error: Option<f64>,
}

impl RunConfig {
    pub fn write_to_dir(&self, out_dir: &Path) -> Result<()> {
        let path = out_dir.join("config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
