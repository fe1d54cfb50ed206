use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;
use malaria_grid::{
    build_grid, ingest_path, load_dataset, resolve_source, BoundingBox, Grid, IngestError, Schema,
    SourceConfig, SyntheticConfig,
};
use regex::Regex;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

const CELL_CSV: &str = "date,cell_id,value\n2024-01-01,r0c0,0.5\n2024-01-02,r0c0,0.8\n2024-01-02,r1c1,0.2\n";

fn unit_grid() -> Grid {
    build_grid(BoundingBox::new(0.0, 1.0, 0.0, 1.0), 60.0)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date")
}

fn write_gz(path: &Path, body: &str) {
    let file = fs::File::create(path).expect("gz file should be created");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(body.as_bytes())
        .expect("gz data should be written");
    encoder.finish().expect("gz should finalize");
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = fs::File::create(path).expect("zip file should be created");
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("zip entry should be created");
        zip.write_all(body.as_bytes())
            .expect("zip data should be written");
    }
    zip.finish().expect("zip should finalize");
}

fn source_in(dir: &Path) -> SourceConfig {
    SourceConfig {
        data_dir: dir.to_path_buf(),
        ..SourceConfig::default()
    }
}

#[test]
fn unit_square_builds_two_by_two_tiling() {
    let grid = unit_grid();
    let id_format = Regex::new(r"^r\d+c\d+$").expect("valid regex");

    assert_eq!(grid.rows(), 2);
    assert_eq!(grid.cols(), 2);
    let ids: Vec<&str> = grid.cells().iter().map(|cell| cell.id.as_str()).collect();
    assert_eq!(ids, ["r0c0", "r0c1", "r1c0", "r1c1"]);
    assert!(ids.iter().all(|id| id_format.is_match(id)));

    let area: f64 = grid
        .cells()
        .iter()
        .map(|cell| (cell.lat_max - cell.lat_min) * (cell.lon_max - cell.lon_min))
        .sum();
    assert!((area - 1.0).abs() < 1e-12);
    assert_eq!(grid.cells()[3].lat_max, 1.0);
    assert_eq!(grid.cells()[3].lon_max, 1.0);
}

#[test]
fn cells_are_row_major_with_unique_ids_on_a_real_extent() {
    let grid = build_grid(BoundingBox::new(15.6, 18.2, 97.5, 99.4), 10.0);
    assert!(grid.len() > 100);

    let mut seen = std::collections::HashSet::new();
    for pair in grid.cells().windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.row < b.row || (a.row == b.row && a.col < b.col));
    }
    for cell in grid.cells() {
        assert!(seen.insert(cell.id.clone()), "duplicate id {}", cell.id);
        assert!(cell.lat_max <= 18.2 && cell.lon_max <= 99.4);
    }
}

#[test]
fn plain_gzip_and_zip_sources_ingest_identically() {
    let temp = tempdir().expect("temp dir should be created");
    let plain = temp.path().join("cells.csv");
    let gz = temp.path().join("cells.csv.gz");
    let zipped = temp.path().join("cells.zip");
    fs::write(&plain, CELL_CSV).expect("csv should be written");
    write_gz(&gz, CELL_CSV);
    write_zip(&zipped, &[("README.txt", "not data"), ("cells.csv", CELL_CSV)]);

    let grid = unit_grid();
    let fingerprints: Vec<String> = [&plain, &gz, &zipped]
        .iter()
        .map(|path| {
            let out = ingest_path(&grid, path).expect("source should ingest");
            assert_eq!(out.schema, Schema::Cell);
            assert_eq!(out.report.rows_accepted, 3);
            assert_eq!(out.dataset.dates(), ["2024-01-01", "2024-01-02"]);
            out.dataset.fingerprint()
        })
        .collect();

    assert_eq!(fingerprints[0], fingerprints[1]);
    assert_eq!(fingerprints[0], fingerprints[2]);
}

#[test]
fn point_rows_in_the_same_cell_average_pairwise() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("points.csv");
    fs::write(
        &path,
        "Date,Latitude,Longitude,Value\n2024-01-01,0.1,0.1,1.0\n2024-01-01,0.2,0.2,2.0\n",
    )
    .expect("csv should be written");

    let grid = unit_grid();
    let out = ingest_path(&grid, &path).expect("source should ingest");

    assert_eq!(out.schema, Schema::Point);
    let r0c0 = grid.index_of("r0c0").expect("cell exists");
    assert_eq!(out.dataset.value(r0c0, 0), Some(1.5));
    assert_eq!(out.report.merged_points, 1);
}

#[test]
fn zip_without_csv_entry_is_fatal() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("bundle.zip");
    write_zip(&path, &[("notes.txt", "hello")]);

    let err = ingest_path(&unit_grid(), &path).expect_err("archive has no csv");
    assert!(matches!(err, IngestError::MissingCsvEntry { .. }));
}

#[test]
fn corrupt_gzip_is_fatal() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("broken.csv.gz");
    fs::write(&path, "this is not gzip").expect("file should be written");

    let source = SourceConfig {
        csv_file: Some(path),
        ..SourceConfig::default()
    };
    let result = load_dataset(&unit_grid(), &source, &SyntheticConfig::default(), today());
    assert!(result.is_err());
}

#[test]
fn candidates_are_resolved_in_priority_order() {
    let temp = tempdir().expect("temp dir should be created");
    fs::write(temp.path().join("malaria_tak_daily.csv"), CELL_CSV).expect("write");
    fs::write(temp.path().join("malaria_th_daily.csv"), CELL_CSV).expect("write");

    let resolved = resolve_source(&source_in(temp.path())).expect("a candidate exists");
    assert_eq!(
        resolved.file_name().and_then(|name| name.to_str()),
        Some("malaria_th_daily.csv")
    );

    let explicit_missing = SourceConfig {
        csv_file: Some(temp.path().join("absent.csv")),
        ..source_in(temp.path())
    };
    assert_eq!(resolve_source(&explicit_missing), None);
}

#[test]
fn loaded_source_is_noted_by_file_name() {
    let temp = tempdir().expect("temp dir should be created");
    fs::write(temp.path().join("malaria_th_daily_cells.csv"), CELL_CSV).expect("write");

    let loaded = load_dataset(
        &unit_grid(),
        &source_in(temp.path()),
        &SyntheticConfig::default(),
        today(),
    )
    .expect("load should succeed");

    assert_eq!(loaded.note, "loaded: malaria_th_daily_cells.csv");
    assert_eq!(loaded.schema, Some(Schema::Cell));
    assert_eq!(loaded.dataset.dates().len(), 2);
    assert!(loaded.report.is_some());
}

#[test]
fn missing_source_degrades_to_empty_dataset() {
    let temp = tempdir().expect("temp dir should be created");
    let grid = unit_grid();

    let loaded = load_dataset(
        &grid,
        &source_in(temp.path()),
        &SyntheticConfig::default(),
        today(),
    )
    .expect("missing source is not fatal");

    assert_eq!(loaded.note, "no data: no CSV source found");
    assert!(loaded.dataset.is_empty());
    assert_eq!(loaded.dataset.cell_count(), grid.len());
    assert_eq!(loaded.source, None);
}

#[test]
fn missing_source_with_synthetic_enabled_generates_demo_data() {
    let temp = tempdir().expect("temp dir should be created");
    let synthetic = SyntheticConfig {
        enabled: true,
        days_back: 2,
        days_forward: 1,
    };

    let loaded = load_dataset(&unit_grid(), &source_in(temp.path()), &synthetic, today())
        .expect("synthetic fallback should succeed");

    assert_eq!(loaded.note, "synthetic demo data");
    assert_eq!(
        loaded.dataset.dates(),
        ["2023-12-31", "2024-01-01", "2024-01-02", "2024-01-03"]
    );
}

#[test]
fn unknown_header_degrades_with_note() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("mystery.csv");
    fs::write(&path, "foo,bar\n1,2\n").expect("write");
    let source = SourceConfig {
        csv_file: Some(path.clone()),
        ..SourceConfig::default()
    };

    let loaded = load_dataset(&unit_grid(), &source, &SyntheticConfig::default(), today())
        .expect("unknown schema is not fatal");

    assert_eq!(loaded.note, "no data: unrecognized CSV header in mystery.csv");
    assert_eq!(loaded.schema, Some(Schema::Unknown));
    assert_eq!(loaded.source, Some(path));
    assert!(loaded.dataset.is_empty());
}

#[test]
fn header_without_rows_is_noted_as_unusable_not_unrecognized() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("cells.csv");
    fs::write(&path, "date,cell_id,value\n").expect("write");
    let source = SourceConfig {
        csv_file: Some(path),
        ..SourceConfig::default()
    };

    let loaded = load_dataset(&unit_grid(), &source, &SyntheticConfig::default(), today())
        .expect("empty source is not fatal");

    assert_eq!(loaded.note, "no data: no usable rows in cells.csv");
    assert_eq!(loaded.schema, Some(Schema::Cell));
    assert!(loaded.dataset.is_empty());
}

#[test]
fn source_with_only_dropped_rows_falls_back_to_synthetic_when_enabled() {
    let temp = tempdir().expect("temp dir should be created");
    let path = temp.path().join("cells.csv");
    fs::write(&path, "date,cell_id,value\n2024-01-01,r9c9,0.5\n2024-01-01,r0c0,NaN\n")
        .expect("write");
    let source = SourceConfig {
        csv_file: Some(path.clone()),
        ..SourceConfig::default()
    };
    let synthetic = SyntheticConfig {
        enabled: true,
        days_back: 1,
        days_forward: 1,
    };

    let loaded = load_dataset(&unit_grid(), &source, &synthetic, today())
        .expect("synthetic fallback should succeed");

    assert_eq!(loaded.note, "synthetic demo data");
    assert_eq!(loaded.source, Some(path));
    assert_eq!(loaded.dataset.dates().len(), 3);
    let report = loaded.report.expect("ingest report is kept");
    assert_eq!(report.rows_read, 2);
    assert_eq!(report.rows_accepted, 0);
}
