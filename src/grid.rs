// src/grid.rs

/// Rectangular pixel grid of a flat-sky patch, stored row-major.
///
/// Rows run along theta (rings), columns along phi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grid2D {
    pub rows: usize,
    pub cols: usize,
}

impl Grid2D {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total number of pixels.
    pub fn n_cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Convert (row, col) indices to a flat index into a 1D array.
    #[inline]
    pub fn idx(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    /// Pixel used for impulse probes: (rows/2, cols/2).
    pub fn center(&self) -> (usize, usize) {
        (self.rows / 2, self.cols / 2)
    }

    pub fn center_idx(&self) -> usize {
        let (r, c) = self.center();
        self.idx(r, c)
    }

    /// Both dimensions are even and at least two.
    pub fn is_halvable(&self) -> bool {
        self.rows >= 2 && self.cols >= 2 && self.rows % 2 == 0 && self.cols % 2 == 0
    }

    pub fn halved(&self) -> Self {
        Self::new(self.rows / 2, self.cols / 2)
    }

    /// Unit impulse at the probe pixel.
    pub fn unit_impulse(&self) -> Vec<f64> {
        let mut u = vec![0.0; self.n_cells()];
        u[self.center_idx()] = 1.0;
        u
    }
}
