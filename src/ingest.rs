//! Batch ingestion of incidence CSVs into a per-cell, per-date dataset.
//!
//! The pipeline runs in three stages over a single pass of the source:
//! `CsvRecords` streams header-keyed records, `RowBinding` validates a record
//! against the detected schema and binds it to a grid cell, and
//! `DatasetBuilder` accumulates the observations.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::grid::Grid;
use crate::partition::parse_calendar_day;
use crate::synthetic::{synthetic_dataset, SyntheticConfig};

pub const DEFAULT_SOURCE_CANDIDATES: [&str; 6] = [
    "malaria_th_daily.csv.gz",
    "malaria_th_daily.csv",
    "malaria_th_daily_cells.csv.gz",
    "malaria_th_daily_cells.csv",
    "thailand_10km_cells.csv",
    "malaria_tak_daily.csv",
];

const LAT_KEYS: [&str; 3] = ["lat", "lat_c", "latitude"];
const LON_KEYS: [&str; 4] = ["lon", "lon_c", "lng", "longitude"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive at {path} has no entries")]
    EmptyZipArchive { path: PathBuf },
    #[error("archive at {path} has no CSV entry")]
    MissingCsvEntry { path: PathBuf },
    #[error("malformed record: {message}")]
    MalformedRecord { message: String },
}

impl IngestError {
    /// Row-level failures are counted and skipped; everything else aborts ingestion.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    Cell,
    Point,
    Unknown,
}

impl Schema {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Point => "point",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Plain,
    Gzip,
    Zip,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".gz") {
            Self::Gzip
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Plain
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub csv_file: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub candidates: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv_file: None,
            data_dir: PathBuf::from("."),
            candidates: DEFAULT_SOURCE_CANDIDATES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
        }
    }
}

/// A header-keyed CSV record. Keys are trimmed and lowercased.
#[derive(Debug, Clone)]
pub struct RawRecord {
    headers: Arc<[String]>,
    values: StringRecord,
}

impl RawRecord {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let headers: Arc<[String]> = pairs.iter().map(|(key, _)| normalize_key(key)).collect();
        let values = StringRecord::from(pairs.iter().map(|(_, value)| *value).collect::<Vec<_>>());
        Self { headers, values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let position = self.headers.iter().position(|header| header == key)?;
        self.values.get(position).map(str::trim)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(String::as_str)
    }
}

/// Streams records from any reader, one at a time.
pub struct CsvRecords<R: Read> {
    reader: csv::Reader<R>,
    headers: Arc<[String]>,
}

impl<R: Read> CsvRecords<R> {
    pub fn new(source: R) -> Result<Self, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);
        let headers = reader.headers()?.iter().map(normalize_key).collect();
        Ok(Self { reader, headers })
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(String::as_str)
    }
}

impl<R: Read> Iterator for CsvRecords<R> {
    type Item = Result<RawRecord, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut values = StringRecord::new();
        match self.reader.read_record(&mut values) {
            Ok(true) => Some(Ok(RawRecord {
                headers: Arc::clone(&self.headers),
                values,
            })),
            Ok(false) => None,
            Err(err) if err.is_io_error() => Some(Err(IngestError::Csv(err))),
            Err(err) => Some(Err(IngestError::MalformedRecord {
                message: err.to_string(),
            })),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub schema: Option<Schema>,
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub dropped_missing_date: u64,
    pub dropped_invalid_date: u64,
    pub dropped_invalid_value: u64,
    pub dropped_invalid_coords: u64,
    pub dropped_out_of_bounds: u64,
    pub dropped_unknown_cell: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_schema: u64,
    pub merged_points: u64,
    pub distinct_dates: u64,
    pub cells_with_data: u64,
}

impl IngestReport {
    pub fn rows_dropped(&self) -> u64 {
        self.dropped_missing_date
            + self.dropped_invalid_date
            + self.dropped_invalid_value
            + self.dropped_invalid_coords
            + self.dropped_out_of_bounds
            + self.dropped_unknown_cell
            + self.dropped_malformed
            + self.dropped_unknown_schema
    }
}

/// Immutable per-cell time series plus the sorted distinct date index.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dates: Vec<String>,
    days: Vec<NaiveDate>,
    // One sparse series per grid cell (row-major index), keyed by date index.
    series: Vec<HashMap<usize, f64>>,
}

impl Dataset {
    pub fn empty(cell_count: usize) -> Self {
        Self {
            dates: Vec::new(),
            days: Vec::new(),
            series: vec![HashMap::new(); cell_count],
        }
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn date_index(&self, date: &str) -> Option<usize> {
        self.dates.binary_search_by(|known| known.as_str().cmp(date)).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.series.len()
    }

    pub fn value(&self, cell_index: usize, date_index: usize) -> Option<f64> {
        self.series.get(cell_index)?.get(&date_index).copied()
    }

    pub fn value_or_zero(&self, cell_index: usize, date_index: usize) -> f64 {
        self.value(cell_index, date_index).unwrap_or(0.0)
    }

    pub fn cells_with_data(&self) -> usize {
        self.series.iter().filter(|series| !series.is_empty()).count()
    }

    /// Number of cells holding an observation on each date.
    pub fn coverage_by_date(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.dates.len()];
        for series in &self.series {
            for date_idx in series.keys() {
                counts[*date_idx] += 1;
            }
        }
        counts
    }

    /// SHA-256 over the date index and every stored observation, in canonical order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("cells:{};", self.series.len()));
        hasher.update("dates:");
        for date in &self.dates {
            hasher.update(date.as_bytes());
            hasher.update(",");
        }
        hasher.update(";values:");
        for (cell_idx, series) in self.series.iter().enumerate() {
            let mut entries: Vec<(&usize, &f64)> = series.iter().collect();
            entries.sort_unstable_by_key(|(date_idx, _)| **date_idx);
            for (date_idx, value) in entries {
                hasher.update(format!("{cell_idx}|{date_idx}|{:016x};", value.to_bits()));
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// How a second observation for the same (cell, date) is combined with the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Replace,
    /// `(accumulated + new) / 2`; order-dependent.
    RunningAverage,
}

/// Accumulation stage. Collects observations keyed by cell index and date string.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    cells: Vec<HashMap<String, f64>>,
    dates: BTreeSet<String>,
    merged: u64,
}

impl DatasetBuilder {
    pub fn new(cell_count: usize) -> Self {
        Self {
            cells: vec![HashMap::new(); cell_count],
            dates: BTreeSet::new(),
            merged: 0,
        }
    }

    /// Records one observation. Dates must start with a `YYYY-MM-DD` day;
    /// anything else, or an out-of-range cell, returns `false` and is not stored.
    pub fn record(&mut self, cell_index: usize, date: &str, value: f64, policy: MergePolicy) -> bool {
        if parse_calendar_day(date).is_none() {
            return false;
        }
        let Some(series) = self.cells.get_mut(cell_index) else {
            return false;
        };

        match series.get_mut(date) {
            Some(existing) => {
                *existing = match policy {
                    MergePolicy::Replace => value,
                    MergePolicy::RunningAverage => (*existing + value) / 2.0,
                };
                self.merged += 1;
            }
            None => {
                series.insert(date.to_string(), value);
            }
        }

        if !self.dates.contains(date) {
            self.dates.insert(date.to_string());
        }
        true
    }

    pub fn merged(&self) -> u64 {
        self.merged
    }

    pub fn finish(self) -> Dataset {
        let dates: Vec<String> = self.dates.into_iter().collect();
        let days = dates
            .iter()
            .filter_map(|date| parse_calendar_day(date))
            .collect();
        let position: HashMap<&str, usize> = dates
            .iter()
            .enumerate()
            .map(|(idx, date)| (date.as_str(), idx))
            .collect();

        let series = self
            .cells
            .into_iter()
            .map(|per_date| {
                per_date
                    .into_iter()
                    .filter_map(|(date, value)| position.get(date.as_str()).map(|idx| (*idx, value)))
                    .collect()
            })
            .collect();

        Dataset {
            dates,
            days,
            series,
        }
    }
}

/// Result of one ingestion pass.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub dataset: Dataset,
    pub schema: Schema,
    pub report: IngestReport,
}

/// Consumes `records` and bins every valid row into `grid`.
///
/// Only source-level failures are returned as errors; bad rows are counted in
/// the report and skipped. An unrecognized header produces an empty dataset.
pub fn ingest<I>(grid: &Grid, records: I) -> Result<Ingested, IngestError>
where
    I: IntoIterator<Item = Result<RawRecord, IngestError>>,
{
    ingest_with_binding(grid, None, records)
}

fn ingest_with_binding<I>(
    grid: &Grid,
    mut binding: Option<RowBinding>,
    records: I,
) -> Result<Ingested, IngestError>
where
    I: IntoIterator<Item = Result<RawRecord, IngestError>>,
{
    let mut report = IngestReport::default();
    let mut builder = DatasetBuilder::new(grid.len());

    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(err) if err.is_row_level() => {
                report.rows_read += 1;
                report.dropped_malformed += 1;
                debug!(
                    component = "ingest",
                    event = "ingest.row.malformed",
                    error = %err
                );
                continue;
            }
            Err(err) => return Err(err),
        };
        report.rows_read += 1;

        let row_binding = binding.get_or_insert_with(|| {
            let detected = RowBinding::detect(record.keys());
            log_schema_detected(&detected, record.keys());
            detected
        });

        match row_binding.bind(grid, &record) {
            Ok(observation) => {
                let stored = builder.record(
                    observation.cell_index,
                    observation.date,
                    observation.value,
                    row_binding.merge_policy(),
                );
                if stored {
                    report.rows_accepted += 1;
                } else {
                    report.dropped_unknown_cell += 1;
                }
            }
            Err(reason) => reason.count(&mut report),
        }
    }

    let schema = binding
        .as_ref()
        .map(RowBinding::schema)
        .unwrap_or(Schema::Unknown);
    report.schema = Some(schema);
    report.merged_points = builder.merged();
    let dataset = builder.finish();
    report.distinct_dates = dataset.dates().len() as u64;
    report.cells_with_data = dataset.cells_with_data() as u64;

    info!(
        component = "ingest",
        event = "ingest.finish",
        schema = schema.as_str(),
        rows_read = report.rows_read,
        rows_accepted = report.rows_accepted,
        rows_dropped = report.rows_dropped(),
        merged_points = report.merged_points,
        distinct_dates = report.distinct_dates,
        cells_with_data = report.cells_with_data
    );

    Ok(Ingested {
        dataset,
        schema,
        report,
    })
}

/// Detects the schema from the CSV header row, so a source without data rows
/// still reports the schema it declares.
pub fn ingest_reader<R: Read>(grid: &Grid, source: R) -> Result<Ingested, IngestError> {
    let records = CsvRecords::new(source)?;
    let binding = RowBinding::detect(records.headers());
    log_schema_detected(&binding, records.headers());
    ingest_with_binding(grid, Some(binding), records)
}

/// Ingests a plain, gzip or zip CSV source, chosen by file extension.
pub fn ingest_path(grid: &Grid, path: &Path) -> Result<Ingested, IngestError> {
    let format = SourceFormat::from_path(path);
    info!(
        component = "ingest",
        event = "ingest.start",
        path = %path.display(),
        format = ?format
    );

    let file = fs::File::open(path)?;
    match format {
        SourceFormat::Plain => ingest_reader(grid, file),
        SourceFormat::Gzip => ingest_reader(grid, MultiGzDecoder::new(BufReader::new(file))),
        SourceFormat::Zip => {
            let mut zip = ZipArchive::new(BufReader::new(file))?;
            if zip.is_empty() {
                return Err(IngestError::EmptyZipArchive {
                    path: path.to_path_buf(),
                });
            }
            let csv_entry = (0..zip.len())
                .find(|idx| {
                    zip.by_index(*idx)
                        .map(|entry| {
                            !entry.is_dir() && entry.name().to_ascii_lowercase().ends_with(".csv")
                        })
                        .unwrap_or(false)
                })
                .ok_or_else(|| IngestError::MissingCsvEntry {
                    path: path.to_path_buf(),
                })?;
            let entry = zip.by_index(csv_entry)?;
            ingest_reader(grid, entry)
        }
    }
}

/// Explicit file first, then the first existing candidate in the data directory.
pub fn resolve_source(cfg: &SourceConfig) -> Option<PathBuf> {
    if let Some(explicit) = &cfg.csv_file {
        return explicit.is_file().then(|| explicit.clone());
    }
    cfg.candidates
        .iter()
        .map(|name| cfg.data_dir.join(name))
        .find(|path| path.is_file())
}

/// The dataset served for the process lifetime, with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: Dataset,
    pub note: String,
    pub source: Option<PathBuf>,
    pub schema: Option<Schema>,
    pub report: Option<IngestReport>,
}

/// Resolves the configured source and ingests it, degrading to an empty (or
/// synthetic, when enabled) dataset if nothing usable is found.
pub fn load_dataset(
    grid: &Grid,
    source_cfg: &SourceConfig,
    synthetic_cfg: &SyntheticConfig,
    today: NaiveDate,
) -> Result<LoadedDataset, IngestError> {
    let Some(path) = resolve_source(source_cfg) else {
        warn!(
            component = "ingest",
            event = "ingest.source.missing",
            explicit = ?source_cfg.csv_file,
            data_dir = %source_cfg.data_dir.display()
        );
        return Ok(degraded(grid, synthetic_cfg, today, "no CSV source found", None, None, None));
    };

    let ingested = ingest_path(grid, &path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    if ingested.schema == Schema::Unknown {
        return Ok(degraded(
            grid,
            synthetic_cfg,
            today,
            &format!("unrecognized CSV header in {file_name}"),
            Some(path),
            Some(ingested.schema),
            Some(ingested.report),
        ));
    }

    if ingested.dataset.is_empty() {
        return Ok(degraded(
            grid,
            synthetic_cfg,
            today,
            &format!("no usable rows in {file_name}"),
            Some(path),
            Some(ingested.schema),
            Some(ingested.report),
        ));
    }

    Ok(LoadedDataset {
        dataset: ingested.dataset,
        note: format!("loaded: {file_name}"),
        source: Some(path),
        schema: Some(ingested.schema),
        report: Some(ingested.report),
    })
}

fn degraded(
    grid: &Grid,
    synthetic_cfg: &SyntheticConfig,
    today: NaiveDate,
    reason: &str,
    source: Option<PathBuf>,
    schema: Option<Schema>,
    report: Option<IngestReport>,
) -> LoadedDataset {
    let (dataset, note) = if synthetic_cfg.enabled {
        (
            synthetic_dataset(grid, synthetic_cfg, today),
            "synthetic demo data".to_string(),
        )
    } else {
        (Dataset::empty(grid.len()), format!("no data: {reason}"))
    };

    warn!(
        component = "ingest",
        event = "ingest.degraded",
        reason,
        synthetic = synthetic_cfg.enabled
    );

    LoadedDataset {
        dataset,
        note,
        source,
        schema,
        report,
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}

fn log_schema_detected<'a>(binding: &RowBinding, headers: impl Iterator<Item = &'a str>) {
    match binding {
        RowBinding::Unknown => warn!(
            component = "ingest",
            event = "ingest.schema.unknown",
            headers = ?headers.collect::<Vec<_>>()
        ),
        _ => info!(
            component = "ingest",
            event = "ingest.schema.detected",
            schema = binding.schema().as_str()
        ),
    }
}

/// Validation stage: how a record of the detected schema maps onto a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowBinding {
    Cell,
    Point {
        lat_keys: Vec<&'static str>,
        lon_keys: Vec<&'static str>,
    },
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation<'a> {
    cell_index: usize,
    date: &'a str,
    value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowRejection {
    MissingDate,
    InvalidDate,
    InvalidValue,
    InvalidCoords,
    OutOfBounds,
    UnknownCell,
    UnknownSchema,
}

impl RowRejection {
    fn count(self, report: &mut IngestReport) {
        let counter = match self {
            Self::MissingDate => &mut report.dropped_missing_date,
            Self::InvalidDate => &mut report.dropped_invalid_date,
            Self::InvalidValue => &mut report.dropped_invalid_value,
            Self::InvalidCoords => &mut report.dropped_invalid_coords,
            Self::OutOfBounds => &mut report.dropped_out_of_bounds,
            Self::UnknownCell => &mut report.dropped_unknown_cell,
            Self::UnknownSchema => &mut report.dropped_unknown_schema,
        };
        *counter += 1;
    }
}

impl RowBinding {
    fn detect<'a>(keys: impl Iterator<Item = &'a str>) -> Self {
        let keys: Vec<&str> = keys.collect();
        let has = |key: &str| keys.contains(&key);

        if has("cell_id") && has("value") {
            return Self::Cell;
        }

        let lat_keys: Vec<&'static str> =
            LAT_KEYS.iter().copied().filter(|key| keys.contains(key)).collect();
        let lon_keys: Vec<&'static str> =
            LON_KEYS.iter().copied().filter(|key| keys.contains(key)).collect();
        if has("value") && !lat_keys.is_empty() && !lon_keys.is_empty() {
            return Self::Point { lat_keys, lon_keys };
        }

        Self::Unknown
    }

    fn schema(&self) -> Schema {
        match self {
            Self::Cell => Schema::Cell,
            Self::Point { .. } => Schema::Point,
            Self::Unknown => Schema::Unknown,
        }
    }

    fn merge_policy(&self) -> MergePolicy {
        match self {
            Self::Point { .. } => MergePolicy::RunningAverage,
            Self::Cell | Self::Unknown => MergePolicy::Replace,
        }
    }

    fn bind<'r>(&self, grid: &Grid, record: &'r RawRecord) -> Result<Observation<'r>, RowRejection> {
        if matches!(self, Self::Unknown) {
            return Err(RowRejection::UnknownSchema);
        }

        let date = record
            .get("date")
            .filter(|date| !date.is_empty())
            .ok_or(RowRejection::MissingDate)?;
        if parse_calendar_day(date).is_none() {
            return Err(RowRejection::InvalidDate);
        }
        let value = parse_finite(record.get("value")).ok_or(RowRejection::InvalidValue)?;

        let cell_index = match self {
            Self::Cell => record
                .get("cell_id")
                .and_then(|id| grid.index_of(id))
                .ok_or(RowRejection::UnknownCell)?,
            Self::Point { lat_keys, lon_keys } => {
                let lat = first_finite(record, lat_keys).ok_or(RowRejection::InvalidCoords)?;
                let lon = first_finite(record, lon_keys).ok_or(RowRejection::InvalidCoords)?;
                if !grid.bounds().contains(lat, lon) {
                    return Err(RowRejection::OutOfBounds);
                }
                grid.bin_point(lat, lon).ok_or(RowRejection::UnknownCell)?
            }
            Self::Unknown => return Err(RowRejection::UnknownSchema),
        };

        Ok(Observation {
            cell_index,
            date,
            value,
        })
    }
}

fn parse_finite(raw: Option<&str>) -> Option<f64> {
    raw?.parse::<f64>().ok().filter(|value| value.is_finite())
}

// The first non-empty key of the family decides; an unparsable value there is
// not rescued by a later alias.
fn first_finite(record: &RawRecord, keys: &[&'static str]) -> Option<f64> {
    let raw = keys
        .iter()
        .filter_map(|key| record.get(key))
        .find(|raw| !raw.is_empty())?;
    parse_finite(Some(raw))
}
