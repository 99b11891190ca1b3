//! Raster grid geometry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::bbox::BoundingBox;
use crate::crs::CrsDefinition;
use crate::error::{CommonError, CommonResult};

/// What a catalog knows about its raster before any CRS is resolved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RasterMetadata {
    /// (rows, cols) of the spatial grid.
    pub shape: (usize, usize),
    /// Attributes that may describe the CRS (`crs_wkt`, `esri_pe_string`, ...).
    pub crs_attributes: BTreeMap<String, String>,
    /// Cell-centre x coordinates, one per column.
    pub x: Option<Vec<f64>>,
    /// Cell-centre y coordinates, one per row.
    pub y: Option<Vec<f64>>,
}

impl RasterMetadata {
    pub fn rows(&self) -> usize {
        self.shape.0
    }

    pub fn cols(&self) -> usize {
        self.shape.1
    }
}

/// Explicit grid placement: centre of the first cell and signed cell size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
}

/// The grid every zone is rasterized onto.
///
/// Built once and never mutated; axes are strictly monotonic and hold cell
/// centres. Row `r` sits at `y[r]`, column `c` at `x[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    crs: CrsDefinition,
    x: Vec<f64>,
    y: Vec<f64>,
    dx: f64,
    dy: f64,
}

impl SpatialGrid {
    pub fn new(crs: CrsDefinition, x: Vec<f64>, y: Vec<f64>) -> CommonResult<Self> {
        let dx = axis_step(&x, "x")?;
        let dy = axis_step(&y, "y")?;
        Ok(Self { crs, x, y, dx, dy })
    }

    pub fn from_geometry(
        crs: CrsDefinition,
        geometry: GridGeometry,
        shape: (usize, usize),
    ) -> CommonResult<Self> {
        if geometry.dx == 0.0 || geometry.dy == 0.0 {
            return Err(CommonError::invalid_grid("cell size must be non-zero"));
        }
        let x = (0..shape.1)
            .map(|c| geometry.x0 + c as f64 * geometry.dx)
            .collect();
        let y = (0..shape.0)
            .map(|r| geometry.y0 + r as f64 * geometry.dy)
            .collect();
        Self::new(crs, x, y)
    }

    pub fn crs(&self) -> &CrsDefinition {
        &self.crs
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Signed column spacing.
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Signed row spacing.
    pub fn dy(&self) -> f64 {
        self.dy
    }

    pub fn rows(&self) -> usize {
        self.y.len()
    }

    pub fn cols(&self) -> usize {
        self.x.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    /// Row-major flat index.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols() + col
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (self.x[col], self.y[row])
    }

    pub fn cell_bounds(&self, row: usize, col: usize) -> BoundingBox {
        let hx = self.dx.abs() / 2.0;
        let hy = self.dy.abs() / 2.0;
        let (cx, cy) = self.cell_center(row, col);
        BoundingBox::new(cx - hx, cy - hy, cx + hx, cy + hy)
    }

    /// Outer extent covering every cell.
    pub fn extent(&self) -> BoundingBox {
        let first = self.cell_bounds(0, 0);
        let last = self.cell_bounds(self.rows() - 1, self.cols() - 1);
        BoundingBox::new(
            first.min_x.min(last.min_x),
            first.min_y.min(last.min_y),
            first.max_x.max(last.max_x),
            first.max_y.max(last.max_y),
        )
    }

    /// Columns whose cells overlap `[min_x, max_x]`.
    pub fn column_range(&self, min_x: f64, max_x: f64) -> Range<usize> {
        axis_range(&self.x, self.dx.abs() / 2.0, min_x, max_x)
    }

    /// Rows whose cells overlap `[min_y, max_y]`.
    pub fn row_range(&self, min_y: f64, max_y: f64) -> Range<usize> {
        axis_range(&self.y, self.dy.abs() / 2.0, min_y, max_y)
    }

    /// Window of cells overlapping a bounding box, or `None` when disjoint.
    pub fn window_for_bbox(&self, bbox: &BoundingBox) -> Option<CellWindow> {
        let rows = self.row_range(bbox.min_y, bbox.max_y);
        let cols = self.column_range(bbox.min_x, bbox.max_x);
        let window = CellWindow::new(rows.start, rows.end, cols.start, cols.end);
        (!window.is_empty()).then_some(window)
    }
}

fn axis_step(axis: &[f64], name: &str) -> CommonResult<f64> {
    if axis.len() < 2 {
        return Err(CommonError::invalid_grid(format!(
            "{} axis needs at least 2 coordinates, got {}",
            name,
            axis.len()
        )));
    }
    let step = axis[1] - axis[0];
    let ascending = step > 0.0;
    let monotonic = axis
        .windows(2)
        .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] });
    if step == 0.0 || !monotonic {
        return Err(CommonError::invalid_grid(format!(
            "{} axis is not strictly monotonic",
            name
        )));
    }
    Ok(step)
}

/// Indexes of cells (centres plus/minus `half`) intersecting `[lo, hi]`.
fn axis_range(axis: &[f64], half: f64, lo: f64, hi: f64) -> Range<usize> {
    if axis.is_empty() || lo > hi {
        return 0..0;
    }
    let ascending = axis.len() < 2 || axis[1] > axis[0];
    let (start, end) = if ascending {
        (
            axis.partition_point(|&c| c + half < lo),
            axis.partition_point(|&c| c - half <= hi),
        )
    } else {
        (
            axis.partition_point(|&c| c - half > hi),
            axis.partition_point(|&c| c + half >= lo),
        )
    };
    start..end.max(start)
}

/// Half-open rectangle of grid cells `[row_start, row_end) x [col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl CellWindow {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    pub fn rows(&self) -> usize {
        self.row_end.saturating_sub(self.row_start)
    }

    pub fn cols(&self) -> usize {
        self.col_end.saturating_sub(self.col_start)
    }

    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row_start && row < self.row_end && col >= self.col_start && col < self.col_end
    }

    /// Row-major index of a grid cell inside this window.
    pub fn local_index(&self, row: usize, col: usize) -> Option<usize> {
        self.contains(row, col)
            .then(|| (row - self.row_start) * self.cols() + (col - self.col_start))
    }

    /// Smallest window covering both.
    pub fn union(&self, other: &CellWindow) -> CellWindow {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        CellWindow::new(
            self.row_start.min(other.row_start),
            self.row_end.max(other.row_end),
            self.col_start.min(other.col_start),
            self.col_end.max(other.col_end),
        )
    }

    /// Expand outward to chunk boundaries, clamped to the grid shape.
    pub fn aligned_to(&self, chunk: (usize, usize), shape: (usize, usize)) -> CellWindow {
        let (cr, cc) = (chunk.0.max(1), chunk.1.max(1));
        CellWindow::new(
            (self.row_start / cr) * cr,
            self.row_end.div_ceil(cr).saturating_mul(cr).min(shape.0),
            (self.col_start / cc) * cc,
            self.col_end.div_ceil(cc).saturating_mul(cc).min(shape.1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(x: Vec<f64>, y: Vec<f64>) -> SpatialGrid {
        SpatialGrid::new(CrsDefinition::wgs84(), x, y).unwrap()
    }

    #[test]
    fn test_axis_ranges_ascending_and_descending() {
        // centres 0.5..3.5, cells [0,1), [1,2), ...
        let g = grid(vec![0.5, 1.5, 2.5, 3.5], vec![3.5, 2.5, 1.5, 0.5]);
        assert_eq!(g.column_range(1.2, 2.8), 1..3);
        assert_eq!(g.column_range(10.0, 11.0), 4..4);
        // descending y: row 0 is the top
        assert_eq!(g.row_range(2.2, 3.9), 0..2);
        assert_eq!(g.row_range(-5.0, -1.0).len(), 0);
    }

    #[test]
    fn test_rejects_non_monotonic_axis() {
        assert!(SpatialGrid::new(CrsDefinition::wgs84(), vec![0.0, 1.0, 0.5], vec![0.0, 1.0]).is_err());
        assert!(SpatialGrid::new(CrsDefinition::wgs84(), vec![0.0], vec![0.0, 1.0]).is_err());
    }

    #[test]
    fn test_from_geometry() {
        let g = SpatialGrid::from_geometry(
            CrsDefinition::wgs84(),
            GridGeometry { x0: 10.0, y0: 5.0, dx: 2.0, dy: -1.0 },
            (3, 4),
        )
        .unwrap();
        assert_eq!(g.shape(), (3, 4));
        assert_eq!(g.cell_center(2, 3), (16.0, 3.0));
        assert_eq!(g.extent(), BoundingBox::new(9.0, 2.5, 17.0, 5.5));
    }

    #[test]
    fn test_window_alignment() {
        let w = CellWindow::new(3, 5, 6, 7);
        assert_eq!(w.aligned_to((4, 4), (10, 9)), CellWindow::new(0, 8, 4, 8));
        assert_eq!(w.aligned_to((4, 4), (6, 7)), CellWindow::new(0, 6, 4, 7));
        assert_eq!(w.local_index(4, 6), Some(1));
        assert_eq!(w.local_index(5, 6), None);
    }
}
