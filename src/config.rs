//! Process configuration, read once from the environment at startup.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

use crate::features::{DEFAULT_COORD_DECIMALS, MAX_COORD_DECIMALS};
use crate::grid::BoundingBox;
use crate::ingest::SourceConfig;
use crate::partition::ReferenceClock;
use crate::synthetic::SyntheticConfig;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfig {
    pub bounds: BoundingBox,
    pub resolution_km: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            bounds: BoundingBox::new(5.6, 20.7, 97.0, 105.9),
            resolution_km: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub grid: GridConfig,
    pub source: SourceConfig,
    pub coord_decimals: u32,
    pub synthetic: SyntheticConfig,
    pub clock: ReferenceClock,
    pub bind_addr: SocketAddr,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            source: SourceConfig::default(),
            coord_decimals: DEFAULT_COORD_DECIMALS,
            synthetic: SyntheticConfig::default(),
            clock: ReferenceClock::default(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("grid bounds must be finite: {0:?}")]
    InvalidBounds(BoundingBox),
    #[error("grid resolution must be a positive number of km, got {0}")]
    InvalidResolution(f64),
}

impl AppConfig {
    /// Inverted bounds are allowed and produce an empty grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.grid.bounds.is_finite() {
            return Err(ConfigError::InvalidBounds(self.grid.bounds));
        }
        let km = self.grid.resolution_km;
        if !km.is_finite() || km <= 0.0 {
            return Err(ConfigError::InvalidResolution(km));
        }
        Ok(())
    }
}

/// Reads `MALGRID_*` variables. Unparsable values keep the default for that key.
pub fn app_config_from_env() -> AppConfig {
    let mut config = AppConfig::default();

    let bounds = &mut config.grid.bounds;
    override_parsed("MALGRID_LAT_MIN", &mut bounds.lat_min, parse_f64);
    override_parsed("MALGRID_LAT_MAX", &mut bounds.lat_max, parse_f64);
    override_parsed("MALGRID_LON_MIN", &mut bounds.lon_min, parse_f64);
    override_parsed("MALGRID_LON_MAX", &mut bounds.lon_max, parse_f64);
    override_parsed("MALGRID_GRID_KM", &mut config.grid.resolution_km, parse_f64);

    if let Some(raw) = non_empty_var("MALGRID_CSV_FILE") {
        config.source.csv_file = Some(PathBuf::from(raw));
    }
    if let Some(raw) = non_empty_var("MALGRID_DATA_DIR") {
        config.source.data_dir = PathBuf::from(raw);
    }

    override_parsed("MALGRID_COORD_DEC", &mut config.coord_decimals, |raw| {
        raw.parse::<u32>().ok().map(|dec| dec.min(MAX_COORD_DECIMALS))
    });

    override_parsed("MALGRID_SYNTHETIC", &mut config.synthetic.enabled, parse_bool);
    override_parsed("MALGRID_DAYS_BACK", &mut config.synthetic.days_back, |raw| {
        raw.parse().ok()
    });
    override_parsed("MALGRID_DAYS_FWD", &mut config.synthetic.days_forward, |raw| {
        raw.parse().ok()
    });

    override_parsed("MALGRID_TZ", &mut config.clock.timezone, |raw| {
        raw.parse::<Tz>().ok()
    });
    if let Some(raw) = non_empty_var("MALGRID_TODAY") {
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(day) => config.clock.fixed_today = Some(day),
            Err(_) => log_ignored("MALGRID_TODAY", &raw),
        }
    }

    override_parsed("MALGRID_ADDR", &mut config.bind_addr, |raw| raw.parse().ok());

    config
}

pub(crate) fn non_empty_var(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn override_parsed<T>(key: &str, slot: &mut T, parse: impl Fn(&str) -> Option<T>) {
    if let Some(raw) = non_empty_var(key) {
        match parse(&raw) {
            Some(value) => *slot = value,
            None => log_ignored(key, &raw),
        }
    }
}

fn log_ignored(key: &str, raw: &str) {
    warn!(
        component = "config",
        event = "config.value.ignored",
        key,
        value = raw
    );
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }
}
