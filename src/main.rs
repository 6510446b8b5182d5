// src/main.rs
//
// Synthetic end-to-end run of the masked multigrid solver.
//
// A random field x_true on the active pixels is pushed through the forward operator,
// b = A x_true, and the preconditioned CG solve recovers it. Solver policy knobs come from
// the SINV_* environment variables (see config.rs); the problem setup from the command line.
//
// Examples:
//
//   cargo run --release -- --nrings 64
//       -> fully active equatorial patch, decaying kernel 1/(1+l)^2
//
//   cargo run --release -- --nrings 128 --hole-rows 16 --hole-cols 64 --plots
//       -> solve only inside a centred 16x64 window, save convergence and field plots
//
//   RUST_LOG=debug cargo run --release -- --split --kernel high-pass
//
// Outputs (per run directory):
//   runs/<run_id>/
//     ├── config.json
//     ├── history.csv
//     ├── convergence.png   (with --plots)
//     ├── x_true.png        (with --plots)
//     └── x_error.png       (with --plots)

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, ValueEnum};
use rand::prelude::*;
use rand_distr::StandardNormal;

use sinv_mg::config::{ProblemConfig, RunConfig, RunInfo, SolverConfig, StoppingConfig};
use sinv_mg::geometry_mask::{sphere_mask_all_active, sphere_mask_centered_hole};
use sinv_mg::sht::GaussLegendreSht;
use sinv_mg::solver::{SinvSolver, SolveResult};
use sinv_mg::visualisation::{save_convergence_plot, save_patch_plot};

#[derive(Parser, Debug)]
#[command(name = "sinv_mg", about = "Masked multigrid-preconditioned CG on the sphere")]
struct Cli {
    /// Number of Gauss-Legendre rings (power of two keeps the patch halvable)
    #[arg(long, default_value_t = 64)]
    nrings: usize,
    /// Number of kernel degrees supplied to the solver (lmax + 1)
    #[arg(long, default_value_t = 33)]
    kernel_len: usize,
    #[arg(long, value_enum, default_value_t = KernelArg::Decay)]
    kernel: KernelArg,
    /// Rows of the centred active window (0 = whole patch)
    #[arg(long, default_value_t = 0)]
    hole_rows: usize,
    /// Columns of the centred active window (0 = whole patch)
    #[arg(long, default_value_t = 0)]
    hole_cols: usize,
    #[arg(long, default_value_t = 1e-6)]
    tolerance: f64,
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Precondition with the square-root hierarchy applied twice
    #[arg(long)]
    split: bool,
    #[arg(long, default_value = "runs")]
    out: PathBuf,
    #[arg(long)]
    run_id: Option<String>,
    /// Save PNG plots next to the CSV output
    #[arg(long)]
    plots: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KernelArg {
    /// d_l = 1 / (1 + l)^2
    Decay,
    /// d_l = 1 + l (l + 1) / lc^2 with lc = len / 4
    HighPass,
}

impl KernelArg {
    fn as_str(self) -> &'static str {
        match self {
            KernelArg::Decay => "decay",
            KernelArg::HighPass => "highpass",
        }
    }

    fn build(self, len: usize) -> Vec<f64> {
        match self {
            KernelArg::Decay => (0..len).map(|l| 1.0 / ((1 + l) as f64).powi(2)).collect(),
            KernelArg::HighPass => {
                let lc = (len as f64 / 4.0).max(1.0);
                (0..len)
                    .map(|l| 1.0 + (l * (l + 1)) as f64 / (lc * lc))
                    .collect()
            }
        }
    }
}

fn sanitize_run_id(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_run_id(cli: &Cli) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0));
    format!(
        "{}{:03}_n{}_{}{}",
        now.as_secs(),
        now.subsec_millis(),
        cli.nrings,
        cli.kernel.as_str(),
        if cli.split { "_split" } else { "" }
    )
}

fn unique_run_dir(out_root: &Path, run_id: &str) -> PathBuf {
    let mut dir = out_root.join(run_id);
    if !dir.exists() {
        return dir;
    }
    for k in 1..1000 {
        let cand = out_root.join(format!("{run_id}_{k}"));
        if !cand.exists() {
            dir = cand;
            break;
        }
    }
    dir
}

fn write_history(path: &Path, result: &SolveResult) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "iteration,residual,error")?;
    for (i, res) in result.residuals.iter().enumerate() {
        match result.errors.get(i) {
            Some(err) => writeln!(w, "{},{:.16e},{:.16e}", i + 1, res, err)?,
            None => writeln!(w, "{},{:.16e},", i + 1, res)?,
        }
    }
    w.flush()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let dl = cli.kernel.build(cli.kernel_len);
    let mask = if cli.hole_rows == 0 || cli.hole_cols == 0 {
        sphere_mask_all_active(cli.nrings)
    } else {
        sphere_mask_centered_hole(cli.nrings, cli.hole_rows, cli.hole_cols)
    };

    let mut config = SolverConfig::from_env();
    config.split |= cli.split;
    let solver = SinvSolver::new(&dl, &mask, GaussLegendreSht::new(cli.nrings), config)?;

    let n = solver.n_active();
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let x_true: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let b = solver.forward(&x_true);

    let result = solver.solve(&b, cli.tolerance, cli.max_iterations, Some(&x_true))?;
    log::info!(
        "{} after {} iterations: res={:.3e}, err={:.3e}",
        if result.converged { "converged" } else { "not converged" },
        result.iterations,
        result.final_residual().unwrap_or(0.0),
        result.final_error().unwrap_or(0.0)
    );

    // ---- outputs ----
    create_dir_all(&cli.out)?;
    let run_id = sanitize_run_id(&cli.run_id.clone().unwrap_or_else(|| default_run_id(&cli)));
    let run_dir = unique_run_dir(&cli.out, &run_id);
    create_dir_all(&run_dir)?;

    let shape = solver.shape();
    let run_config = RunConfig {
        problem: ProblemConfig {
            nrings: cli.nrings,
            kernel_len: dl.len(),
            kernel_lmax_extended: solver.kernel().len() - 1,
            patch_rows: shape.rows,
            patch_cols: shape.cols,
            hole_rows: cli.hole_rows,
            hole_cols: cli.hole_cols,
            n_active: n,
            n_levels: solver.levels().len(),
        },
        solver: *solver.config(),
        stopping: StoppingConfig {
            tolerance: cli.tolerance,
            max_iterations: cli.max_iterations,
        },
        run: RunInfo {
            binary: "sinv_mg".to_string(),
            run_id: run_id.clone(),
            seed: cli.seed,
            iterations: result.iterations,
            converged: result.converged,
            final_residual: result.final_residual(),
            final_error: result.final_error(),
        },
    };
    run_config.write_to_dir(&run_dir)?;
    write_history(&run_dir.join("history.csv"), &result)?;

    if cli.plots {
        save_convergence_plot(
            &run_dir.join("convergence.png"),
            &result.residuals,
            &result.errors,
        )?;
        save_patch_plot(
            &run_dir.join("x_true.png"),
            shape,
            &solver.padvec(&x_true),
            "x_true",
        )?;
        let diff: Vec<f64> = result.x.iter().zip(&x_true).map(|(a, t)| a - t).collect();
        save_patch_plot(
            &run_dir.join("x_error.png"),
            shape,
            &solver.padvec(&diff),
            "x - x_true",
        )?;
    }

    println!("Run complete. Outputs in {}", run_dir.display());
    Ok(())
}
