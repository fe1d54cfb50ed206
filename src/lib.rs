//! Incidence grid core.
//!
//! Builds a regular lat/lon grid, bins daily incidence CSVs into it once at
//! startup and serves past / now / forecast / delta views as GeoJSON.

mod config;
mod features;
mod grid;
mod ingest;
mod observability;
mod partition;
mod server;
mod synthetic;

pub use config::{app_config_from_env, AppConfig, ConfigError, GridConfig, DEFAULT_BIND_ADDR};
pub use features::{
    cell_polygon, delta, generate, round_to, Feature, FeatureCollection, FeatureKind,
    FeatureProperties, FeatureRequest, Geometry, KindParseError, Metric, ALL_KINDS,
    DEFAULT_COORD_DECIMALS, MAX_COORD_DECIMALS, VALUE_DECIMALS,
};
pub use grid::{
    build_grid, cell_id, BoundingBox, Cell, Grid, GridSteps, KM_PER_DEG_LAT,
    KM_PER_DEG_LON_EQUATOR,
};
pub use ingest::{
    ingest, ingest_path, ingest_reader, load_dataset, resolve_source, CsvRecords, Dataset,
    DatasetBuilder, IngestError, IngestReport, Ingested, LoadedDataset, MergePolicy, RawRecord,
    Schema, SourceConfig, SourceFormat, DEFAULT_SOURCE_CANDIDATES,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_dataset_ready, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use partition::{parse_calendar_day, partition, Partition, ReferenceClock};
pub use server::{
    grid_router, parse_min_value, parse_stride, ApiError, AppState, GeoQuery, Metadata,
};
pub use synthetic::{synthetic_dataset, SyntheticConfig};
