//! GeoJSON feature generation over the immutable grid and dataset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::grid::{Cell, Grid};
use crate::ingest::Dataset;
use crate::partition::Partition;

pub const DEFAULT_COORD_DECIMALS: u32 = 4;
pub const VALUE_DECIMALS: u32 = 4;
pub const MAX_COORD_DECIMALS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Value,
    Delta,
}

/// Which slice of the date index a feature query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Past,
    Now,
    Forecast,
    Delta,
}

pub const ALL_KINDS: [FeatureKind; 4] = [
    FeatureKind::Past,
    FeatureKind::Now,
    FeatureKind::Forecast,
    FeatureKind::Delta,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown feature kind '{0}', expected one of past, now, forecast, delta")]
pub struct KindParseError(pub String);

impl FeatureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Past => "past",
            Self::Now => "now",
            Self::Forecast => "forecast",
            Self::Delta => "delta",
        }
    }

    pub fn metric(self) -> Metric {
        match self {
            Self::Delta => Metric::Delta,
            Self::Past | Self::Now | Self::Forecast => Metric::Value,
        }
    }

    /// Date indices to emit. `Delta` spans the whole index.
    pub fn date_indices(self, partition: &Partition, date_count: usize) -> Vec<usize> {
        match self {
            Self::Past => partition.past.clone(),
            Self::Now => partition.now.clone(),
            Self::Forecast => partition.forward.clone(),
            Self::Delta => (0..date_count).collect(),
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = KindParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "past" => Ok(Self::Past),
            "now" => Ok(Self::Now),
            "forecast" => Ok(Self::Forecast),
            "delta" => Ok(Self::Delta),
            _ => Err(KindParseError(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRequest {
    pub metric: Metric,
    /// Spatial decimation; values below 1 are treated as 1.
    pub stride: u32,
    /// Applied to `Metric::Value` only.
    pub min_value: Option<f64>,
    pub coord_decimals: u32,
}

impl Default for FeatureRequest {
    fn default() -> Self {
        Self {
            metric: Metric::Value,
            stride: 1,
            min_value: None,
            coord_decimals: DEFAULT_COORD_DECIMALS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub time: String,
    pub cell_id: String,
    pub row: u32,
    pub col: u32,
    pub center_lat: f64,
    pub center_lon: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Emits one feature per (requested date, selected cell).
///
/// Dates are visited in the order given and cells in row-major order. Delta is
/// taken against the preceding date of the full index, or against 0 for the
/// first date. Indices past the end of the date index are skipped.
pub fn generate(
    grid: &Grid,
    dataset: &Dataset,
    date_indices: &[usize],
    req: &FeatureRequest,
) -> FeatureCollection {
    let stride = req.stride.max(1);
    let decimals = req.coord_decimals.min(MAX_COORD_DECIMALS);
    let selected: Vec<(usize, &Cell)> = grid
        .cells()
        .iter()
        .enumerate()
        .filter(|(_, cell)| cell.row % stride == 0 && cell.col % stride == 0)
        .collect();

    let mut features = Vec::new();
    for &date_idx in date_indices {
        let Some(date) = dataset.dates().get(date_idx) else {
            continue;
        };

        for &(cell_idx, cell) in &selected {
            let value = match req.metric {
                Metric::Value => dataset.value_or_zero(cell_idx, date_idx),
                Metric::Delta => delta(dataset, cell_idx, date_idx),
            };

            if req.metric == Metric::Value {
                if let Some(min_value) = req.min_value {
                    if value <= min_value {
                        continue;
                    }
                }
            }

            features.push(Feature {
                geometry: cell_polygon(cell, decimals),
                properties: FeatureProperties {
                    time: date.clone(),
                    cell_id: cell.id.clone(),
                    row: cell.row,
                    col: cell.col,
                    center_lat: round_to(cell.lat_c, decimals),
                    center_lon: round_to(cell.lon_c, decimals),
                    value: round_to(value, VALUE_DECIMALS),
                },
            });
        }
    }

    debug!(
        component = "features",
        event = "features.generated",
        metric = ?req.metric,
        stride,
        min_value = ?req.min_value,
        date_count = date_indices.len(),
        candidate_cells = selected.len(),
        feature_count = features.len()
    );

    FeatureCollection { features }
}

pub fn delta(dataset: &Dataset, cell_idx: usize, date_idx: usize) -> f64 {
    let current = dataset.value_or_zero(cell_idx, date_idx);
    let previous = match date_idx.checked_sub(1) {
        Some(prev_idx) => dataset.value_or_zero(cell_idx, prev_idx),
        None => 0.0,
    };
    current - previous
}

/// Closed ring `[lon, lat]`, counter-clockwise from the south-west corner.
pub fn cell_polygon(cell: &Cell, decimals: u32) -> Geometry {
    let west = round_to(cell.lon_min, decimals);
    let east = round_to(cell.lon_max, decimals);
    let south = round_to(cell.lat_min, decimals);
    let north = round_to(cell.lat_max, decimals);
    Geometry::Polygon {
        coordinates: vec![vec![
            [west, south],
            [east, south],
            [east, north],
            [west, north],
            [west, south],
        ]],
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // Avoid emitting "-0.0".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
