//! Deterministic demo incidence surface used when no source CSV is available.

use chrono::{Days, NaiveDate};

use crate::grid::Grid;
use crate::ingest::{Dataset, DatasetBuilder, MergePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub enabled: bool,
    pub days_back: u32,
    pub days_forward: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days_back: 14,
            days_forward: 14,
        }
    }
}

struct Hotspot {
    weight: f64,
    lat: f64,
    lon: f64,
    sigma: f64,
}

const HOTSPOTS: [Hotspot; 2] = [
    Hotspot {
        weight: 0.6,
        lat: 16.7,
        lon: 98.6,
        sigma: 0.25,
    },
    Hotspot {
        weight: 0.4,
        lat: 17.2,
        lon: 98.35,
        sigma: 0.20,
    },
];

const WEST_EAST_GRADIENT: f64 = 0.15;
const NOISE_AMPLITUDE: f64 = 0.1;

/// Builds `days_back + days_forward + 1` consecutive days centred on `today`.
pub fn synthetic_dataset(grid: &Grid, cfg: &SyntheticConfig, today: NaiveDate) -> Dataset {
    let mut builder = DatasetBuilder::new(grid.len());
    let Some(first_day) = today.checked_sub_days(Days::new(u64::from(cfg.days_back))) else {
        return builder.finish();
    };

    let total_days = cfg.days_back + cfg.days_forward + 1;
    for day_idx in 0..total_days {
        let Some(day) = first_day.checked_add_days(Days::new(u64::from(day_idx))) else {
            break;
        };
        let date = day.format("%Y-%m-%d").to_string();
        let temporal = temporal_factor(day_idx, cfg);

        for (cell_idx, cell) in grid.cells().iter().enumerate() {
            let risk = spatial_risk(grid, cell.lat_c, cell.lon_c);
            let noise = stable_noise(&format!("{}@{day_idx}", cell.id));
            let value = (2.0 * risk * temporal + noise).max(0.0);
            builder.record(cell_idx, &date, value, MergePolicy::Replace);
        }
    }

    builder.finish()
}

fn gaussian(lat: f64, lon: f64, spot: &Hotspot) -> f64 {
    let d2 = (lat - spot.lat).powi(2) + (lon - spot.lon).powi(2);
    (-d2 / (2.0 * spot.sigma * spot.sigma)).exp()
}

fn spatial_risk(grid: &Grid, lat: f64, lon: f64) -> f64 {
    let bounds = grid.bounds();
    let base: f64 = HOTSPOTS
        .iter()
        .map(|spot| spot.weight * gaussian(lat, lon, spot))
        .sum();
    let span = bounds.lon_max - bounds.lon_min;
    let gradient = if span > 0.0 {
        WEST_EAST_GRADIENT * (1.0 - (lon - bounds.lon_min) / span)
    } else {
        0.0
    };
    base + gradient
}

fn temporal_factor(day_idx: u32, cfg: &SyntheticConfig) -> f64 {
    let scale = f64::from(cfg.days_back.max(cfg.days_forward).max(1));
    let x = (f64::from(day_idx) - f64::from(cfg.days_back)) / scale;
    1.0 + 0.25 * (-1.5 * x * x).exp() + 0.05 * (f64::from(day_idx) / 2.3).sin()
}

/// 32-bit multiplicative string hash mapped to `[-0.05, 0.05]`.
fn stable_noise(seed: &str) -> f64 {
    let mut h: u32 = 2_166_136_261;
    for ch in seed.chars() {
        h ^= ch as u32;
        h = h
            .wrapping_add(h.wrapping_shl(1))
            .wrapping_add(h.wrapping_shl(4))
            .wrapping_add(h.wrapping_shl(7))
            .wrapping_add(h.wrapping_shl(8))
            .wrapping_add(h.wrapping_shl(24));
    }
    (f64::from(h) / f64::from(u32::MAX) - 0.5) * NOISE_AMPLITUDE
}
