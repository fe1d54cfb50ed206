use std::path::PathBuf;

use malaria_grid::{app_config_from_env, build_grid, ingest_path, resolve_source, IngestReport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = app_config_from_env();
    cfg.validate()?;

    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => resolve_source(&cfg.source).ok_or("no CSV source found; pass a path or set MALGRID_CSV_FILE")?,
    };

    let grid = build_grid(cfg.grid.bounds, cfg.grid.resolution_km);
    let bounds = grid.bounds();
    println!(
        "Auditing {} against a {} x {} grid ({} cells, {} km) over lat [{}, {}] lon [{}, {}]",
        path.display(),
        grid.rows(),
        grid.cols(),
        grid.len(),
        grid.resolution_km(),
        bounds.lat_min,
        bounds.lat_max,
        bounds.lon_min,
        bounds.lon_max
    );

    let ingested = ingest_path(&grid, &path)?;
    print_report(&ingested.report);

    let dataset = &ingested.dataset;
    if dataset.is_empty() {
        println!("No dates ingested.");
        return Ok(());
    }

    println!();
    println!("Per-date coverage (cells with an observation / grid cells):");
    for (date, covered) in dataset.dates().iter().zip(dataset.coverage_by_date()) {
        let pct = if grid.is_empty() {
            0.0
        } else {
            covered as f64 * 100.0 / grid.len() as f64
        };
        println!("  {date}  {covered:>6} / {}  ({pct:.1}%)", grid.len());
    }
    println!();
    println!("fingerprint: {}", dataset.fingerprint());

    Ok(())
}

fn print_report(report: &IngestReport) {
    let schema = report.schema.map(|schema| schema.as_str()).unwrap_or("none");
    println!("schema:            {schema}");
    println!("rows read:         {}", report.rows_read);
    println!("rows accepted:     {}", report.rows_accepted);
    println!("rows dropped:      {}", report.rows_dropped());
    for (label, count) in [
        ("missing date", report.dropped_missing_date),
        ("invalid date", report.dropped_invalid_date),
        ("invalid value", report.dropped_invalid_value),
        ("invalid coords", report.dropped_invalid_coords),
        ("out of bounds", report.dropped_out_of_bounds),
        ("unknown cell", report.dropped_unknown_cell),
        ("malformed", report.dropped_malformed),
        ("unknown schema", report.dropped_unknown_schema),
    ] {
        if count > 0 {
            println!("  {label:<16} {count}");
        }
    }
    println!("merged points:     {}", report.merged_points);
    println!("distinct dates:    {}", report.distinct_dates);
    println!("cells with data:   {}", report.cells_with_data);
}
