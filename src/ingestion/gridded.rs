//! Gridded surface weather adapter. One request per regular-grid cell —
//! nested fan-out under the per-source task — all sharing the same rate
//! limiter the orchestrator hands to every other adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;

use crate::model::GriddedWeather;

use super::{CollectedBatch, RateLimiter, SourceAdapter};

#[derive(Debug, Clone, Copy)]
pub struct GridCell {
    pub lat: f64,
    pub lon: f64,
}

pub struct GriddedWeatherAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    grid: Vec<GridCell>,
}

impl GriddedWeatherAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>, grid: Vec<GridCell>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            grid,
        }
    }

    /// Builds a regular lat/lon grid over a bounding box at `step_deg` spacing.
    pub fn regular_grid(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64, step_deg: f64) -> Vec<GridCell> {
        let mut cells = Vec::new();
        let mut lat = min_lat;
        while lat <= max_lat {
            let mut lon = min_lon;
            while lon <= max_lon {
                cells.push(GridCell { lat, lon });
                lon += step_deg;
            }
            lat += step_deg;
        }
        cells
    }
}

#[derive(Debug, Deserialize)]
struct CellResponse {
    time: String,
    temperature_c: f64,
    humidity_pct: f64,
    precip_mm: f64,
    wind_kmh: f64,
    pressure_hpa: f64,
    cloud_pct: f64,
}

async fn fetch_cell(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &Option<String>,
    cell: GridCell,
    limiter: &RateLimiter,
) -> Option<GriddedWeather> {
    limiter.acquire().await;

    let mut request = client
        .get(format!("{base_url}/current"))
        .query(&[("lat", cell.lat.to_string()), ("lon", cell.lon.to_string())]);
    if let Some(key) = api_key {
        request = request.query(&[("appid", key)]);
    }

    let response = request.send().await.ok()?;
    let body: CellResponse = response.json().await.ok()?;
    let timestamp = DateTime::parse_from_rfc3339(&body.time).ok()?.with_timezone(&Utc);

    Some(GriddedWeather {
        timestamp,
        lat: cell.lat,
        lon: cell.lon,
        temperature_c: body.temperature_c,
        humidity_pct: body.humidity_pct,
        precip_mm: body.precip_mm,
        wind_kmh: body.wind_kmh,
        pressure_hpa: body.pressure_hpa,
        cloud_pct: body.cloud_pct,
    })
}

#[async_trait]
impl SourceAdapter for GriddedWeatherAdapter {
    fn name(&self) -> &'static str {
        "gridded_weather"
    }

    async fn fetch(&self, _window_start: DateTime<Utc>, _window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        let futures = self
            .grid
            .iter()
            .map(|&cell| fetch_cell(&self.client, &self.base_url, &self.api_key, cell, limiter));

        let results = join_all(futures).await;
        let failed = results.iter().filter(|r| r.is_none()).count();
        if failed > 0 {
            tracing::warn!(source = "gridded_weather", failed, total = results.len(), "some grid cells failed");
        }

        CollectedBatch::Gridded(results.into_iter().flatten().collect())
    }
}
