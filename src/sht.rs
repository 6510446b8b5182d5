// src/sht.rs
//
// Spherical-harmonic transform on a Gauss-Legendre ring grid.
//
// The multigrid core only needs an adjoint-paired synthesis / adjoint-synthesis, so that is
// what the `SphericalTransform` trait exposes. `GaussLegendreSht` is a straightforward
// reference implementation: Legendre recurrence per ring, ring FFTs via rustfft, rings in
// parallel via rayon.
//
// Coefficient layout (real orthonormal harmonics, length (lmax+1)^2, m-major):
//   [a_00, a_10, ..., a_lmax,0,
//    c_11, s_11, c_21, s_21, ..., c_lmax,1, s_lmax,1,
//    c_22, s_22, ...]
// with Y^c_lm = sqrt(2) * lambda_lm(cos theta) * cos(m phi), Y^s_lm likewise with sin.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use rayon::prelude::*;
use std::f64::consts::{PI, SQRT_2};
use std::sync::Arc;

/// Harmonic transform provider over a full-sphere ring grid with nphi = 2 * nrings.
pub trait SphericalTransform: Send + Sync {
    fn nrings(&self) -> usize;

    fn nphi(&self) -> usize {
        2 * self.nrings()
    }

    fn npix(&self) -> usize {
        self.nrings() * self.nphi()
    }

    /// Pixel field from coefficients (Y a).
    fn synthesis(&self, lmax: usize, alm: &[f64]) -> Vec<f64>;

    /// Exact transpose of `synthesis` (Y^T u).
    fn adjoint_synthesis(&self, lmax: usize, map: &[f64]) -> Vec<f64>;
}

pub fn alm_len(lmax: usize) -> usize {
    (lmax + 1) * (lmax + 1)
}

/// Start of the (cos, sin) pairs for order m >= 1.
#[inline]
fn m_offset(lmax: usize, m: usize) -> usize {
    debug_assert!(m >= 1);
    // (lmax+1) + 2 * sum_{k=1}^{m-1} (lmax + 1 - k)
    (lmax + 1) + (m - 1) * (2 * lmax + 2 - m)
}

/// Multiply each coefficient by `dl[l]` for its degree l.
pub fn alm_scale_by_degree(alm: &mut [f64], dl: &[f64], lmax: usize) {
    debug_assert_eq!(alm.len(), alm_len(lmax));
    debug_assert!(dl.len() > lmax);

    for l in 0..=lmax {
        alm[l] *= dl[l];
    }
    for m in 1..=lmax {
        let off = m_offset(lmax, m);
        for l in m..=lmax {
            let k = off + 2 * (l - m);
            alm[k] *= dl[l];
            alm[k + 1] *= dl[l];
        }
    }
}

/// Gauss-Legendre nodes x_i = cos(theta_i) (descending, north to south) and weights.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut x = vec![0.0; n];
    let mut w = vec![0.0; n];

    for i in 0..n {
        let mut z = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, d) = legendre_p_and_derivative(n, z);
            let dz = p / d;
            z -= dz;
            if dz.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_p_and_derivative(n, z);
        x[i] = z;
        w[i] = 2.0 / ((1.0 - z * z) * dp * dp);
    }
    (x, w)
}

/// P_n(z) and P_n'(z) by the three-term recurrence.
fn legendre_p_and_derivative(n: usize, z: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = z;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=n {
        let kf = k as f64;
        let p2 = ((2.0 * kf - 1.0) * z * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = p2;
    }
    let d = n as f64 * (z * p1 - p0) / (z * z - 1.0);
    (p1, d)
}

/// Normalised associated Legendre functions lambda_lm(x) for l = m..=lmax, given lambda_mm.
fn lambda_column(lmax: usize, m: usize, x: f64, lambda_mm: f64, out: &mut Vec<f64>) {
    out.clear();
    out.push(lambda_mm);
    if m == lmax {
        return;
    }
    out.push(x * ((2 * m + 3) as f64).sqrt() * lambda_mm);

    let mf = m as f64;
    for l in (m + 2)..=lmax {
        let lf = l as f64;
        let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
        let lm1 = lf - 1.0;
        let b = ((lm1 * lm1 - mf * mf) / (4.0 * lm1 * lm1 - 1.0)).sqrt();
        let k = l - m;
        let next = a * (x * out[k - 1] - b * out[k - 2]);
        out.push(next);
    }
}

pub struct GaussLegendreSht {
    nrings: usize,
    cos_theta: Vec<f64>,
    sin_theta: Vec<f64>,
    weights: Vec<f64>,
    fft_fwd: Arc<dyn Fft<f64>>,
    fft_inv: Arc<dyn Fft<f64>>,
}

impl GaussLegendreSht {
    pub fn new(nrings: usize) -> Self {
        let (cos_theta, weights) = gauss_legendre(nrings);
        let sin_theta = cos_theta
            .iter()
            .map(|&x| (1.0 - x * x).max(0.0).sqrt())
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        let nphi = 2 * nrings;
        Self {
            nrings,
            cos_theta,
            sin_theta,
            weights,
            fft_fwd: planner.plan_fft_forward(nphi),
            fft_inv: planner.plan_fft_inverse(nphi),
        }
    }

    /// Quadrature weights (sum to 2).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn ring_synthesis(&self, lmax: usize, alm: &[f64], ring: usize, out: &mut [f64]) {
        let nphi = self.nphi();
        let x = self.cos_theta[ring];
        let s = self.sin_theta[ring];

        let mut g = vec![Complex::new(0.0, 0.0); nphi];
        let mut col = Vec::with_capacity(lmax + 1);
        let mut lambda_mm = 1.0 / (4.0 * PI).sqrt();

        for m in 0..=lmax {
            if m > 0 {
                let mf = m as f64;
                lambda_mm *= ((2.0 * mf + 1.0) / (2.0 * mf)).sqrt() * s;
            }
            lambda_column(lmax, m, x, lambda_mm, &mut col);

            if m == 0 {
                let f0: f64 = (0..=lmax).map(|l| alm[l] * col[l]).sum();
                g[0] += f0;
                continue;
            }

            let off = m_offset(lmax, m);
            let (mut fc, mut fs) = (0.0, 0.0);
            for (k, &lam) in col.iter().enumerate() {
                fc += alm[off + 2 * k] * lam;
                fs += alm[off + 2 * k + 1] * lam;
            }
            let half = SQRT_2 / 2.0;
            let z = Complex::new(half * fc, -half * fs);
            g[m % nphi] += z;
            g[(nphi - m % nphi) % nphi] += z.conj();
        }

        self.fft_inv.process(&mut g);
        for (o, v) in out.iter_mut().zip(&g) {
            *o = v.re;
        }
    }

    fn ring_adjoint(&self, lmax: usize, ring_vals: &[f64], ring: usize, alm: &mut [f64]) {
        let nphi = self.nphi();
        let x = self.cos_theta[ring];
        let s = self.sin_theta[ring];

        let mut h: Vec<Complex<f64>> = ring_vals.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.fft_fwd.process(&mut h);

        let mut col = Vec::with_capacity(lmax + 1);
        let mut lambda_mm = 1.0 / (4.0 * PI).sqrt();

        for m in 0..=lmax {
            if m > 0 {
                let mf = m as f64;
                lambda_mm *= ((2.0 * mf + 1.0) / (2.0 * mf)).sqrt() * s;
            }
            lambda_column(lmax, m, x, lambda_mm, &mut col);

            let hm = h[m % nphi];
            if m == 0 {
                for (l, &lam) in col.iter().enumerate() {
                    alm[l] += lam * hm.re;
                }
                continue;
            }

            let off = m_offset(lmax, m);
            for (k, &lam) in col.iter().enumerate() {
                alm[off + 2 * k] += SQRT_2 * lam * hm.re;
                alm[off + 2 * k + 1] -= SQRT_2 * lam * hm.im;
            }
        }
    }
}

impl SphericalTransform for GaussLegendreSht {
    fn nrings(&self) -> usize {
        self.nrings
    }

    fn synthesis(&self, lmax: usize, alm: &[f64]) -> Vec<f64> {
        debug_assert_eq!(alm.len(), alm_len(lmax));
        let nphi = self.nphi();
        let mut map = vec![0.0; self.npix()];
        map.par_chunks_mut(nphi)
            .enumerate()
            .for_each(|(ring, out)| self.ring_synthesis(lmax, alm, ring, out));
        map
    }

    fn adjoint_synthesis(&self, lmax: usize, map: &[f64]) -> Vec<f64> {
        debug_assert_eq!(map.len(), self.npix());
        let nphi = self.nphi();
        let n_alm = alm_len(lmax);
        map.par_chunks(nphi)
            .enumerate()
            .fold(
                || vec![0.0; n_alm],
                |mut acc, (ring, vals)| {
                    self.ring_adjoint(lmax, vals, ring, &mut acc);
                    acc
                },
            )
            .reduce(
                || vec![0.0; n_alm],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    a
                },
            )
    }
}
