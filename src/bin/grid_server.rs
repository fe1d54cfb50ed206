use malaria_grid::{
    app_config_from_env, build_grid, grid_router, init_logging, load_dataset, log_app_bind,
    log_app_start, log_dataset_ready, log_source_selected, logging_config_from_env, AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = app_config_from_env();
    cfg.validate()?;

    let grid = build_grid(cfg.grid.bounds, cfg.grid.resolution_km);
    // Must complete before the listener is bound.
    let loaded = load_dataset(&grid, &cfg.source, &cfg.synthetic, cfg.clock.today())?;
    log_source_selected(loaded.source.as_deref(), &loaded.note);
    log_dataset_ready(&loaded, grid.len());

    let app = grid_router(AppState::new(grid, loaded, cfg.clock, cfg.coord_decimals));
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
