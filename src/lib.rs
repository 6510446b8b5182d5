// src/lib.rs

pub mod cg;
pub mod config;
pub mod error;
pub mod flatsky;
pub mod geometry_mask;
pub mod grid;
pub mod kernel;
pub mod multigrid;
pub mod sht;
pub mod solver;
pub mod visualisation;

pub use config::{EnvelopeConfig, MultigridConfig, SolverConfig};
pub use error::{Result, SinvError};
pub use grid::Grid2D;
pub use sht::{GaussLegendreSht, SphericalTransform};
pub use solver::{SinvSolver, SolveResult};
