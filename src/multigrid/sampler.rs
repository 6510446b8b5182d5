// src/multigrid/sampler.rs
//
// Flat-sky surrogates of an operator, obtained from its impulse response.
//
// A translation-invariant operator on a periodic patch is Fourier-diagonal; its spectrum
// follows from the response `image` to a unit impulse `unit` as
//   |analysis(image) / adjoint_synthesis(unit)|.
// On the sphere the response is computed through the harmonic transform; between
// multigrid levels it is computed in flat space.

use crate::error::{Result, SinvError};
use crate::flatsky::FlatSkyFft;
use crate::grid::Grid2D;
use crate::sht::{SphericalTransform, alm_scale_by_degree};

/// Fourier spectrum on `patch` approximating Y diag(dl) Y^T near the equator.
///
/// The impulse sits at ring nrings/2, longitude nphi/2 of the transform's own grid rather
/// than on a separate grid at twice the kernel's resolution. The patch is a band of that
/// same grid, so sampling there keeps the spectrum's pixel scale identical to the mask's
/// pixel scale and no resampling between the two is needed. The kernel is synthesized with
/// its full lmax. The response is cropped to the centred `patch` window before the spectral
/// ratio is taken.
pub fn sphere_kernel_to_flat_spectrum<T: SphericalTransform + ?Sized>(
    sht: &T,
    dl: &[f64],
    patch: Grid2D,
) -> Result<Vec<f64>> {
    if dl.is_empty() {
        return Err(SinvError::EmptyKernel);
    }
    let nrings = sht.nrings();
    let nphi = sht.nphi();
    if patch.rows == 0 || patch.cols == 0 || patch.rows > nrings || patch.cols > nphi {
        return Err(SinvError::PatchTooLarge {
            rows: patch.rows,
            cols: patch.cols,
            nrings,
        });
    }

    let lmax = dl.len() - 1;
    let full = Grid2D::new(nrings, nphi);

    let unit_hi = full.unit_impulse();
    let mut alm = sht.adjoint_synthesis(lmax, &unit_hi);
    alm_scale_by_degree(&mut alm, dl, lmax);
    let image_hi = sht.synthesis(lmax, &alm);

    let r0 = (nrings - patch.rows) / 2;
    let c0 = (nphi - patch.cols) / 2;
    let image_lo = crop(&image_hi, full, r0, c0, patch);
    let unit_lo = crop(&unit_hi, full, r0, c0, patch);

    log::debug!(
        "sampled kernel (lmax={lmax}) on {}x{} patch from {nrings}-ring grid, centre response {:.4e}",
        patch.rows,
        patch.cols,
        image_hi[full.center_idx()]
    );

    Ok(FlatSkyFft::new(patch).image_to_spectrum(&unit_lo, &image_lo))
}

/// Spectrum of a flat-space operator from its response to the centred unit impulse.
pub fn flat_operator_to_spectrum<F>(fft: &FlatSkyFft, apply: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let unit = fft.grid().unit_impulse();
    let image = apply(&unit);
    fft.image_to_spectrum(&unit, &image)
}

fn crop(u: &[f64], from: Grid2D, r0: usize, c0: usize, to: Grid2D) -> Vec<f64> {
    let mut out = Vec::with_capacity(to.n_cells());
    for r in 0..to.rows {
        let start = from.idx(r0 + r, c0);
        out.extend_from_slice(&u[start..start + to.cols]);
    }
    out
}
