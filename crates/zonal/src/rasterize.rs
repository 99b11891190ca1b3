//! Burning zones onto the spatial grid.

use geo::{Contains, Coord, Point, Rect, Relate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use forcing_common::{CellWindow, SpatialGrid};

use crate::error::{Result, ZonalError};
use crate::zones::ZoneSet;

/// Marks a cell that belongs to no zone.
pub const UNASSIGNED: u32 = u32::MAX;

/// How a cell is matched to a zone polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellAssignment {
    /// The cell centre lies strictly inside the polygon.
    #[default]
    Centroid,
    /// The cell interior overlaps the polygon. Edge or corner contact alone
    /// does not count.
    AllTouched,
}

impl std::str::FromStr for CellAssignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "centroid" | "center" | "centre" => Ok(Self::Centroid),
            "all_touched" | "all-touched" | "alltouched" => Ok(Self::AllTouched),
            other => Err(format!("unknown cell assignment '{}'", other)),
        }
    }
}

/// Zone index per grid cell, row-major over the full grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneLayer {
    shape: (usize, usize),
    cells: Vec<u32>,
    ids: Vec<String>,
    cells_by_zone: Vec<Vec<usize>>,
    window: CellWindow,
}

impl ZoneLayer {
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Zone index of a cell, `UNASSIGNED` when none.
    pub fn cell(&self, row: usize, col: usize) -> u32 {
        self.cells[row * self.shape.1 + col]
    }

    pub fn zone_at(&self, row: usize, col: usize) -> Option<&str> {
        match self.cell(row, col) {
            UNASSIGNED => None,
            idx => self.ids.get(idx as usize).map(String::as_str),
        }
    }

    /// Zone ids in zone-set order; index `i` is the value stored in cells.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Flat grid indexes assigned to zone `zone`, ascending.
    pub fn zone_cells(&self, zone: usize) -> &[usize] {
        &self.cells_by_zone[zone]
    }

    /// Zones with at least one cell, with their cells.
    pub fn covered(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.ids
            .iter()
            .zip(&self.cells_by_zone)
            .filter(|(_, cells)| !cells.is_empty())
            .map(|(id, cells)| (id.as_str(), cells.as_slice()))
    }

    /// Smallest window holding every assigned cell.
    pub fn window(&self) -> CellWindow {
        self.window
    }

    pub fn assigned_cells(&self) -> usize {
        self.cells_by_zone.iter().map(Vec::len).sum()
    }
}

/// Rasterize `zones` onto `grid`.
///
/// Zones are burned in zone-set order, so where polygons overlap the last
/// zone wins. Fails with [`ZonalError::EmptyIntersection`] when no cell is
/// assigned.
#[instrument(skip_all, fields(zones = zones.len(), shape = ?grid.shape(), ?assignment))]
pub fn rasterize(zones: &ZoneSet, grid: &SpatialGrid, assignment: CellAssignment) -> Result<ZoneLayer> {
    if !zones.crs().approx_eq(grid.crs()) {
        return Err(ZonalError::CrsMismatch {
            zones: zones.crs().to_string(),
            grid: grid.crs().to_string(),
        });
    }

    let (rows, cols) = grid.shape();
    let mut cells = vec![UNASSIGNED; rows * cols];

    for (idx, zone) in zones.zones().iter().enumerate() {
        let Some(window) = zone.bounding_box().and_then(|bbox| grid.window_for_bbox(&bbox)) else {
            debug!(zone = %zone.id, "Zone outside grid extent");
            continue;
        };

        for row in window.row_start..window.row_end {
            for col in window.col_start..window.col_end {
                let inside = match assignment {
                    CellAssignment::Centroid => {
                        let (x, y) = grid.cell_center(row, col);
                        zone.geometry.contains(&Point::new(x, y))
                    }
                    CellAssignment::AllTouched => {
                        let b = grid.cell_bounds(row, col);
                        let cell = Rect::new(
                            Coord { x: b.min_x, y: b.min_y },
                            Coord { x: b.max_x, y: b.max_y },
                        )
                        .to_polygon();
                        let matrix = zone.geometry.relate(&cell);
                        matrix.is_intersects() && !matrix.is_touches()
                    }
                };
                if inside {
                    cells[row * cols + col] = idx as u32;
                }
            }
        }
    }

    let mut cells_by_zone = vec![Vec::new(); zones.len()];
    let mut window: Option<CellWindow> = None;
    for (flat, &zone) in cells.iter().enumerate() {
        if zone == UNASSIGNED {
            continue;
        }
        cells_by_zone[zone as usize].push(flat);
        let (row, col) = (flat / cols, flat % cols);
        let cell = CellWindow::new(row, row + 1, col, col + 1);
        window = Some(window.map_or(cell, |w| w.union(&cell)));
    }

    let Some(window) = window else {
        return Err(ZonalError::EmptyIntersection {
            zones: zones.len(),
            extent: format!("{:?}", grid.extent()),
        });
    };

    let layer = ZoneLayer {
        shape: (rows, cols),
        cells,
        ids: zones.ids().map(str::to_string).collect(),
        cells_by_zone,
        window,
    };
    info!(
        assigned = layer.assigned_cells(),
        covered = layer.covered().count(),
        window = ?window,
        "Rasterized zones"
    );
    Ok(layer)
}
