// src/visualisation.rs

use crate::grid::Grid2D;
use plotters::prelude::*;
use std::path::Path;

/// Map a value to a blue–white–red colour using the field's own min/max.
fn value_to_color(v: f64, lo: f64, hi: f64) -> RGBColor {
    let (lo, hi) = if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < 1e-300 {
        (-1.0, 1.0)
    } else {
        (lo, hi)
    };

    let x = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);

    let r = (255.0 * x) as u8;
    let b = (255.0 * (1.0 - x)) as u8;
    let g = (255.0 * (1.0 - (2.0 * (x - 0.5).abs()))).clamp(0.0, 255.0) as u8;

    RGBColor(r, g, b)
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    (lo <= hi).then_some((lo, hi))
}

/// Heat map of a patch field (rows*cols, row-major). Row 0 is drawn at the top.
pub fn save_patch_plot(
    path: &Path,
    grid: Grid2D,
    values: &[f64],
    title: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if values.len() != grid.n_cells() {
        return Err(format!(
            "patch plot: {} values for a {}x{} grid",
            values.len(),
            grid.rows,
            grid.cols
        )
        .into());
    }
    let (lo, hi) = finite_range(values.iter().copied()).unwrap_or((-1.0, 1.0));

    let rows = grid.rows as i32;
    let cols = grid.cols as i32;

    // Keep pixels roughly square.
    let width = 1200u32;
    let height = (160 + (width as usize * grid.rows / grid.cols.max(1)) as u32).clamp(240, 1200);

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(
            format!("{title} (blue = {lo:.3e}, red = {hi:.3e})"),
            ("sans-serif", 20),
        )
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0..cols, 0..rows)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("longitude index")
        .y_desc("ring index")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series((0..rows).flat_map(|r| {
        (0..cols).map(move |c| {
            let v = values[grid.idx(r as usize, c as usize)];
            let y = rows - 1 - r;
            Rectangle::new(
                [(c, y), (c + 1, y + 1)],
                value_to_color(v, lo, hi).filled(),
            )
        })
    }))?;

    root.present()?;
    Ok(())
}

/// Plot log10 of the relative residual (and, if given, the relative error) per iteration.
pub fn save_convergence_plot(
    path: &Path,
    residuals: &[f64],
    errors: &[f64],
) -> Result<(), Box<dyn std::error::Error>> {
    if residuals.is_empty() {
        return Ok(()); // nothing to plot
    }

    let log10 = |v: f64| v.max(1e-300).log10();
    let (mut y_min, mut y_max) =
        finite_range(residuals.iter().chain(errors).map(|&v| log10(v))).unwrap_or((-1.0, 0.0));
    if (y_max - y_min).abs() < 1e-12 {
        y_min -= 0.5;
        y_max += 0.5;
    }
    let margin = 0.05 * (y_max - y_min);
    y_min = y_min.floor().min(y_min - margin);
    y_max = y_max.ceil().max(y_max + margin);

    let n_iter = residuals.len().max(errors.len()) as f64;

    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Preconditioned CG convergence", ("sans-serif", 30))
        .set_left_and_bottom_label_area_size(60)
        .build_cartesian_2d(1.0..n_iter.max(2.0), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("iteration")
        .y_desc("log10(relative norm)")
        .x_labels(10)
        .y_labels(10)
        .label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            residuals
                .iter()
                .enumerate()
                .map(|(i, &v)| ((i + 1) as f64, log10(v))),
            &RED,
        ))?
        .label("|r| / |b|")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    if !errors.is_empty() {
        chart
            .draw_series(LineSeries::new(
                errors
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| ((i + 1) as f64, log10(v))),
                &BLUE,
            ))?
            .label("|x - x_true| / |x_true|")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    }

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()?;

    root.present()?;
    Ok(())
}
