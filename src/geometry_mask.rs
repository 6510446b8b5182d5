// src/geometry_mask.rs
//
// Mask utilities for the full-sphere Gauss grid and the equatorial patch.
//
// Conventions:
// - A mask is a real field over pixels: 0.0 = active (unknown, solved for), anything else
//   = fixed/excluded.
// - The full-sphere grid has `nrings` rings (north to south) of `nphi = 2 * nrings` pixels,
//   stored ring-major: index = ring * nphi + iphi.
// - The patch is the equatorial band of rings [3n/8, 5n/8), all longitudes.

use crate::error::{Result, SinvError};
use crate::grid::Grid2D;

/// Real-valued mask over a flattened grid (0 = active).
pub type Mask = Vec<f64>;

/// Ring count implied by a full-sphere mask of `len` pixels (len must be 2*n^2).
pub fn nrings_from_len(len: usize) -> Result<usize> {
    let n = ((len as f64) / 2.0).sqrt().round() as usize;
    if n == 0 || 2 * n * n != len {
        return Err(SinvError::MaskShape { len });
    }
    Ok(n)
}

/// Latitude band kept from the full sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquatorBand {
    pub nrings: usize,
    pub start_ring: usize,
    pub stop_ring: usize,
}

impl EquatorBand {
    pub fn for_nrings(nrings: usize) -> Self {
        Self {
            nrings,
            start_ring: 3 * nrings / 8,
            stop_ring: 5 * nrings / 8,
        }
    }

    pub fn nphi(&self) -> usize {
        2 * self.nrings
    }

    /// Patch grid: (stop - start) rows by nphi columns.
    pub fn patch(&self) -> Grid2D {
        Grid2D::new(self.stop_ring - self.start_ring, self.nphi())
    }

    /// Cut the band out of a full-sphere field.
    pub fn gauss_grid_to_equator(&self, u: &[f64]) -> Vec<f64> {
        let nphi = self.nphi();
        debug_assert_eq!(u.len(), self.nrings * nphi);
        u[self.start_ring * nphi..self.stop_ring * nphi].to_vec()
    }

    /// Embed a patch field into a zero full-sphere field (adjoint of `gauss_grid_to_equator`).
    pub fn equator_to_gauss_grid(&self, u: &[f64]) -> Vec<f64> {
        let nphi = self.nphi();
        debug_assert_eq!(u.len(), self.patch().n_cells());
        let mut out = vec![0.0; self.nrings * nphi];
        out[self.start_ring * nphi..self.stop_ring * nphi].copy_from_slice(u);
        out
    }
}

/// Full-sphere mask from a predicate f(ring, iphi) -> active.
pub fn sphere_mask_from_fn<F>(nrings: usize, f: F) -> Mask
where
    F: Fn(usize, usize) -> bool,
{
    let nphi = 2 * nrings;
    let mut mask = vec![1.0; nrings * nphi];
    for ring in 0..nrings {
        for iphi in 0..nphi {
            if f(ring, iphi) {
                mask[ring * nphi + iphi] = 0.0;
            }
        }
    }
    mask
}

/// Every pixel active.
pub fn sphere_mask_all_active(nrings: usize) -> Mask {
    vec![0.0; 2 * nrings * nrings]
}

/// Active rectangle of `rows x cols` pixels centered on (nrings/2, nphi/2); the rest fixed.
///
/// This is the "hole" in the data that gets reconstructed.
pub fn sphere_mask_centered_hole(nrings: usize, rows: usize, cols: usize) -> Mask {
    let nphi = 2 * nrings;
    let r0 = (nrings / 2).saturating_sub(rows / 2);
    let c0 = (nphi / 2).saturating_sub(cols / 2);
    sphere_mask_from_fn(nrings, move |ring, iphi| {
        ring >= r0 && ring < r0 + rows && iphi >= c0 && iphi < c0 + cols
    })
}

/// Number of active (exactly zero) entries.
pub fn mask_count_active(mask: &[f64]) -> usize {
    mask.iter().filter(|&&v| v == 0.0).count()
}

/// Values below `threshold` become 0 (active), everything else 1.
pub fn mask_binarize(mask: &[f64], threshold: f64) -> Mask {
    mask.iter()
        .map(|&v| if v < threshold { 0.0 } else { 1.0 })
        .collect()
}

/// Bounding box of the active pixels as (row_min, row_max, col_min, col_max), inclusive.
pub fn active_bbox(mask: &[f64], grid: Grid2D) -> Option<(usize, usize, usize, usize)> {
    debug_assert_eq!(mask.len(), grid.n_cells());
    let mut bbox: Option<(usize, usize, usize, usize)> = None;

    for r in 0..grid.rows {
        for c in 0..grid.cols {
            if mask[grid.idx(r, c)] != 0.0 {
                continue;
            }
            bbox = Some(match bbox {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            });
        }
    }
    bbox
}
