// src/error.rs
//
// Crate-wide error type. Construction-time geometry/shape problems and singular
// coarse operators are fatal; non-convergence of the solve is not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinvError {
    /// Full-sphere mask length is not 2*n^2 for an integer ring count n.
    #[error("mask has {len} pixels, which is not 2*nrings^2 for any integer ring count")]
    MaskShape { len: usize },

    #[error("harmonic transform has {transform} rings but the mask implies {mask}")]
    RingMismatch { transform: usize, mask: usize },

    #[error("grid {rows}x{cols} cannot be halved for coarsening")]
    NonHalvingGrid { rows: usize, cols: usize },

    #[error("patch {rows}x{cols} does not fit inside the {nrings}-ring sampling grid")]
    PatchTooLarge {
        rows: usize,
        cols: usize,
        nrings: usize,
    },

    #[error("kernel is empty")]
    EmptyKernel,

    #[error("spectral envelope: {0}")]
    Envelope(String),

    #[error("level {level} ({rows}x{cols}) has no active pixels")]
    NoActivePixels {
        level: usize,
        rows: usize,
        cols: usize,
    },

    #[error("coarsest operator ({n}x{n}) is singular")]
    SingularCoarseOperator { n: usize },

    #[error("coarsest operator ({n}x{n}) is ill-conditioned (cond ~ {cond:.3e})")]
    IllConditioned { n: usize, cond: f64 },

    #[error("diagonal estimate on level {level} is not positive: {value}")]
    NonPositiveDiagonal { level: usize, value: f64 },

    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SinvError>;

/// Shorthand used at API boundaries that take caller vectors.
pub(crate) fn check_len(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(SinvError::LengthMismatch { expected, got })
    }
}
