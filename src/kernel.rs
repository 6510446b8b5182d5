// src/kernel.rs
//
// Spectral envelope used to extend a band-limited kernel.
//
// The standard needlet (arXiv:1004.5576) is built from the bump f(t) = exp(-1/(1-t^2)) on
// (-1, 1), its normalised primitive phi, and
//   phi2(t) = 1                                   t <= 1/B
//           = phi(1 - 2B/(B-1) * (t - 1/B))       1/B < t < 1
//           = 0                                   t >= 1
//   b(eta)^2 = phi2(eta / B) - phi2(eta),   eta = l * B / lmax.
// b is zero at l = 0 and l = lmax and smooth in between.

use crate::error::{Result, SinvError};

const PRIMITIVE_SAMPLES: usize = 4096;

fn bump(t: f64) -> f64 {
    if t.abs() >= 1.0 {
        0.0
    } else {
        (-1.0 / (1.0 - t * t)).exp()
    }
}

/// Normalised primitive of the bump, tabulated on [-1, 1] by the trapezoid rule.
struct BumpPrimitive {
    table: Vec<f64>,
}

impl BumpPrimitive {
    fn new() -> Self {
        let n = PRIMITIVE_SAMPLES;
        let h = 2.0 / n as f64;
        let mut table = vec![0.0; n + 1];
        for i in 1..=n {
            let t0 = -1.0 + (i - 1) as f64 * h;
            let t1 = t0 + h;
            table[i] = table[i - 1] + 0.5 * h * (bump(t0) + bump(t1));
        }
        let total = table[n];
        table.iter_mut().for_each(|v| *v /= total);
        Self { table }
    }

    fn eval(&self, t: f64) -> f64 {
        if t <= -1.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        let n = PRIMITIVE_SAMPLES;
        let s = (t + 1.0) * 0.5 * n as f64;
        let i = (s.floor() as usize).min(n - 1);
        let frac = s - i as f64;
        self.table[i] * (1.0 - frac) + self.table[i + 1] * frac
    }

    fn phi2(&self, t: f64, band: f64) -> f64 {
        let lo = 1.0 / band;
        if t <= lo {
            1.0
        } else if t >= 1.0 {
            0.0
        } else {
            self.eval(1.0 - 2.0 * band / (band - 1.0) * (t - lo))
        }
    }
}

/// Standard needlet profile b(l) for l = 0..=lmax.
pub fn standard_needlet(band: f64, lmax: usize) -> Result<Vec<f64>> {
    if !band.is_finite() || band <= 1.0 {
        return Err(SinvError::Envelope(format!("band must be > 1, got {band}")));
    }
    if lmax == 0 {
        return Err(SinvError::Envelope("lmax must be positive".into()));
    }

    let prim = BumpPrimitive::new();
    let out = (0..=lmax)
        .map(|l| {
            let eta = l as f64 * band / lmax as f64;
            let b2 = prim.phi2(eta / band, band) - prim.phi2(eta, band);
            b2.max(0.0).sqrt()
        })
        .collect();
    Ok(out)
}

/// Extend `dl` with the needlet tail from its peak onwards, scaled to meet `dl[last]`.
///
/// The envelope runs to lmax = floor(lmax_factor * len) - 1, so the result has
/// len + (lmax + 1 - argmax) entries.
pub fn extend_kernel(dl: &[f64], band: f64, lmax_factor: f64) -> Result<Vec<f64>> {
    let Some(&last) = dl.last() else {
        return Err(SinvError::EmptyKernel);
    };

    let lmax_f = (lmax_factor * dl.len() as f64).floor() - 1.0;
    if lmax_f.is_nan() || lmax_f < dl.len() as f64 {
        return Err(SinvError::Envelope(format!(
            "lmax_factor {lmax_factor} leaves no room past the kernel's {} degrees",
            dl.len()
        )));
    }
    let lmax = lmax_f as usize;

    let nl = standard_needlet(band, lmax)?;
    let (imax, &peak) = nl
        .iter()
        .enumerate()
        .fold((0, &f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    if peak <= 0.0 {
        return Err(SinvError::Envelope("needlet has no positive peak".into()));
    }

    let scale = last / peak;
    let mut out = Vec::with_capacity(dl.len() + nl.len() - imax);
    out.extend_from_slice(dl);
    out.extend(nl[imax..].iter().map(|&v| v * scale));
    Ok(out)
}
