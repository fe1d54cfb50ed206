//! Regular lat/lon grid construction and point binning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

pub const KM_PER_DEG_LAT: f64 = 110.574;
pub const KM_PER_DEG_LON_EQUATOR: f64 = 111.320;

const AXIS_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn mid_lat(&self) -> f64 {
        (self.lat_min + self.lat_max) / 2.0
    }

    /// Inclusive on every edge.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat_min <= lat && lat <= self.lat_max && self.lon_min <= lon && lon <= self.lon_max
    }

    pub fn is_finite(&self) -> bool {
        self.lat_min.is_finite()
            && self.lat_max.is_finite()
            && self.lon_min.is_finite()
            && self.lon_max.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,
    pub row: u32,
    pub col: u32,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_c: f64,
    pub lon_c: f64,
}

pub fn cell_id(row: u32, col: u32) -> String {
    format!("r{row}c{col}")
}

/// Degree extent of one cell along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSteps {
    pub lat_step: f64,
    pub lon_step: f64,
}

impl GridSteps {
    /// Latitude uses a fixed km-per-degree; longitude shrinks with `cos(mid_lat)`.
    pub fn for_resolution(bounds: &BoundingBox, resolution_km: f64) -> Self {
        let km_per_deg_lon = KM_PER_DEG_LON_EQUATOR * bounds.mid_lat().to_radians().cos();
        Self {
            lat_step: resolution_km / KM_PER_DEG_LAT,
            lon_step: resolution_km / km_per_deg_lon,
        }
    }

    fn is_usable(&self) -> bool {
        self.lat_step.is_finite()
            && self.lon_step.is_finite()
            && self.lat_step > 0.0
            && self.lon_step > 0.0
    }
}

/// Immutable row-major tiling of a bounding box.
#[derive(Debug, Clone)]
pub struct Grid {
    bounds: BoundingBox,
    resolution_km: f64,
    steps: GridSteps,
    rows: u32,
    cols: u32,
    cells: Vec<Cell>,
    index_by_id: HashMap<String, usize>,
}

impl Grid {
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn resolution_km(&self) -> f64 {
        self.resolution_km
    }

    pub fn steps(&self) -> GridSteps {
        self.steps
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Dense index of a cell id (`row * cols + col`).
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub fn index_at(&self, row: i64, col: i64) -> Option<usize> {
        if row < 0 || col < 0 || row >= i64::from(self.rows) || col >= i64::from(self.cols) {
            return None;
        }
        Some((row as usize) * (self.cols as usize) + col as usize)
    }

    /// Maps a point to the cell containing it.
    ///
    /// Points outside the bounding box yield `None`. The row is clamped into
    /// range; the column is not, so a longitude landing past the last column
    /// yields `None`.
    pub fn bin_point(&self, lat: f64, lon: f64) -> Option<usize> {
        if self.cells.is_empty() || !self.bounds.contains(lat, lon) {
            return None;
        }
        let raw_row = ((lat - self.bounds.lat_min) / self.steps.lat_step).floor() as i64;
        let row = raw_row.clamp(0, i64::from(self.rows) - 1);
        let col = ((lon - self.bounds.lon_min) / self.steps.lon_step).floor() as i64;
        self.index_at(row, col)
    }
}

/// Builds the grid covering `bounds` at `resolution_km`.
///
/// An inverted or degenerate box, or a non-positive resolution, yields an
/// empty grid.
pub fn build_grid(bounds: BoundingBox, resolution_km: f64) -> Grid {
    let steps = GridSteps::for_resolution(&bounds, resolution_km);

    let (row_edges, col_edges) = if steps.is_usable() && bounds.is_finite() {
        (
            axis_edges(bounds.lat_min, bounds.lat_max, steps.lat_step),
            axis_edges(bounds.lon_min, bounds.lon_max, steps.lon_step),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    // An empty axis empties both.
    let (rows, cols) = if row_edges.is_empty() || col_edges.is_empty() {
        (0, 0)
    } else {
        (row_edges.len() as u32, col_edges.len() as u32)
    };

    let mut cells = Vec::with_capacity(rows as usize * cols as usize);
    if rows > 0 && cols > 0 {
        for (row, &(lat_lo, lat_hi)) in row_edges.iter().enumerate() {
            for (col, &(lon_lo, lon_hi)) in col_edges.iter().enumerate() {
                let (row, col) = (row as u32, col as u32);
                cells.push(Cell {
                    id: cell_id(row, col),
                    row,
                    col,
                    lat_min: lat_lo,
                    lat_max: lat_hi,
                    lon_min: lon_lo,
                    lon_max: lon_hi,
                    lat_c: (lat_lo + lat_hi) / 2.0,
                    lon_c: (lon_lo + lon_hi) / 2.0,
                });
            }
        }
    }

    let index_by_id = cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| (cell.id.clone(), idx))
        .collect();

    info!(
        component = "grid",
        event = "grid.built",
        resolution_km,
        rows,
        cols,
        cell_count = cells.len(),
        lat_step = steps.lat_step,
        lon_step = steps.lon_step
    );

    Grid {
        bounds,
        resolution_km,
        steps,
        rows,
        cols,
        cells,
        index_by_id,
    }
}

// Edge i is computed as `min + i * step` so neighbouring cells share the
// exact same boundary value; the last edge is clipped to `max`.
fn axis_edges(min: f64, max: f64, step: f64) -> Vec<(f64, f64)> {
    let mut edges = Vec::new();
    let mut i: u64 = 0;
    loop {
        let start = min + step * i as f64;
        if start >= max - AXIS_EPSILON {
            break;
        }
        let end = (min + step * (i + 1) as f64).min(max);
        edges.push((start, end));
        i += 1;
    }
    edges
}
