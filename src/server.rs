//! Read-only HTTP surface over the immutable grid and dataset.

use std::num::IntErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::compression::CompressionLayer;
use tracing::{info, warn};

use crate::features::{generate, FeatureCollection, FeatureKind, FeatureRequest, KindParseError};
use crate::grid::Grid;
use crate::ingest::{Dataset, LoadedDataset, Schema};
use crate::partition::{partition, ReferenceClock};

/// Shared, immutable state behind every request.
#[derive(Clone)]
pub struct AppState {
    grid: Arc<Grid>,
    dataset: Arc<Dataset>,
    source: Arc<SourceInfo>,
    clock: ReferenceClock,
    coord_decimals: u32,
}

struct SourceInfo {
    note: String,
    csv_file: Option<PathBuf>,
    schema: Option<Schema>,
    fingerprint: String,
}

impl AppState {
    pub fn new(grid: Grid, loaded: LoadedDataset, clock: ReferenceClock, coord_decimals: u32) -> Self {
        let fingerprint = loaded.dataset.fingerprint();
        Self {
            grid: Arc::new(grid),
            dataset: Arc::new(loaded.dataset),
            source: Arc::new(SourceInfo {
                note: loaded.note,
                csv_file: loaded.source,
                schema: loaded.schema,
                fingerprint,
            }),
            clock,
            coord_decimals,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn metadata(&self) -> Metadata {
        let bounds = self.grid.bounds();
        Metadata {
            grid_km: self.grid.resolution_km(),
            lat_min: bounds.lat_min,
            lat_max: bounds.lat_max,
            lon_min: bounds.lon_min,
            lon_max: bounds.lon_max,
            rows: self.grid.rows(),
            cols: self.grid.cols(),
            cell_count: self.grid.len(),
            dates: self.dataset.dates().to_vec(),
            data_note: self.source.note.clone(),
            csv_file: self
                .source
                .csv_file
                .as_ref()
                .map(|path| path.display().to_string()),
            schema: self.source.schema,
            fingerprint: self.source.fingerprint.clone(),
            today: self.clock.today().format("%Y-%m-%d").to_string(),
        }
    }

    /// Features for one kind, partitioned against today's reference date.
    pub fn features(&self, kind: FeatureKind, stride: u32, min_value: Option<f64>) -> FeatureCollection {
        let parts = partition(self.dataset.days(), self.clock.today());
        let date_indices = kind.date_indices(&parts, self.dataset.dates().len());
        let req = FeatureRequest {
            metric: kind.metric(),
            stride,
            min_value,
            coord_decimals: self.coord_decimals,
        };
        generate(&self.grid, &self.dataset, &date_indices, &req)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub grid_km: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub rows: u32,
    pub cols: u32,
    pub cell_count: usize,
    pub dates: Vec<String>,
    pub data_note: String,
    pub csv_file: Option<String>,
    pub schema: Option<Schema>,
    pub fingerprint: String,
    pub today: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoQuery {
    pub stride: Option<String>,
    pub min: Option<String>,
}

impl GeoQuery {
    /// The first occurrence of each key wins; unknown keys are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let first = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        Self {
            stride: first("stride"),
            min: first("min"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    UnknownKind(#[from] KindParseError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::UnknownKind(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn grid_router(state: AppState) -> Router {
    Router::new()
        .route("/api/meta", get(get_meta))
        .route("/api/geo/{kind}", get(get_geo))
        .route("/healthz", get(get_health))
        .with_state(state)
        .layer(CompressionLayer::new())
}

/// Missing, unparsable or sub-1 strides become 1; oversized ones saturate.
pub fn parse_stride(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else {
        return 1;
    };
    match raw.trim().parse::<i64>() {
        Ok(stride) => stride.clamp(1, i64::from(u32::MAX)) as u32,
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => u32::MAX,
        Err(_) => 1,
    }
}

/// Missing, unparsable or non-finite thresholds mean "no threshold".
pub fn parse_min_value(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

async fn get_meta(State(state): State<AppState>) -> impl IntoResponse {
    let metadata = state.metadata();
    info!(
        component = "server",
        event = "http.meta.request",
        dates = metadata.dates.len(),
        cell_count = metadata.cell_count
    );
    Json(metadata)
}

async fn get_geo(
    State(state): State<AppState>,
    Path(raw_kind): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let query = GeoQuery::from_pairs(&pairs);
    let kind = raw_kind.parse::<FeatureKind>().map_err(|err| {
        warn!(
            component = "server",
            event = "http.features.rejected",
            kind = %raw_kind
        );
        ApiError::from(err)
    })?;

    let stride = parse_stride(query.stride.as_deref());
    let min_value = parse_min_value(query.min.as_deref());
    let collection = state.features(kind, stride, min_value);

    info!(
        component = "server",
        event = "http.features.request",
        kind = %kind,
        stride,
        min_value = ?min_value,
        feature_count = collection.len()
    );
    Ok(Json(collection))
}

async fn get_health() -> &'static str {
    "ok"
}
