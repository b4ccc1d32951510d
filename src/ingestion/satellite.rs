//! Satellite column adapter (one instance per product: NO2, HCHO, O3).
//! Subsamples each granule to at most `max_points` before any record is
//! built — granules routinely carry far more pixels than are useful at
//! 0.1° join resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{SatelliteColumn, SatelliteProduct};

use super::{CollectedBatch, RateLimiter, SourceAdapter};

pub struct SatelliteAdapter {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    product: SatelliteProduct,
    max_points_per_granule: usize,
}

impl SatelliteAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
        product: SatelliteProduct,
        max_points_per_granule: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
            product,
            max_points_per_granule,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GranuleEnvelope {
    granules: Vec<Granule>,
}

/// One granule's pixels all share a single observation time: the granule's
/// own midpoint, not a per-pixel timestamp. `range_start`/`range_end` are
/// the granule's overpass time span, as reported by the upstream catalog.
#[derive(Debug, Deserialize)]
struct Granule {
    source_file: String,
    range_start: String,
    range_end: String,
    pixels: Vec<Pixel>,
}

impl Granule {
    fn midpoint_time(&self) -> Option<DateTime<Utc>> {
        let start = DateTime::parse_from_rfc3339(&self.range_start).ok()?.with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339(&self.range_end).ok()?.with_timezone(&Utc);
        Some(start + (end - start) / 2)
    }
}

#[derive(Debug, Deserialize)]
struct Pixel {
    latitude: f64,
    longitude: f64,
    column_value: f64,
    uncertainty: Option<f64>,
    quality_flag: Option<f64>,
}

#[async_trait]
impl SourceAdapter for SatelliteAdapter {
    fn name(&self) -> &'static str {
        self.product.table_name()
    }

    async fn fetch(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        limiter.acquire().await;

        let mut request = self
            .client
            .get(format!("{}/granules", self.base_url))
            .query(&[("start", window_start.to_rfc3339()), ("end", window_end.to_rfc3339())]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = self.name(), error = %e, "fetch failed, returning empty batch");
                return CollectedBatch::Satellite(Vec::new());
            }
        };

        let envelope: GranuleEnvelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(source = self.name(), error = %e, "decode failed, returning empty batch");
                return CollectedBatch::Satellite(Vec::new());
            }
        };

        let mut records = Vec::new();
        for granule in envelope.granules {
            let Some(observation_time) = granule.midpoint_time() else {
                continue;
            };
            for pixel in granule.pixels.into_iter().take(self.max_points_per_granule) {
                records.push(SatelliteColumn {
                    product: self.product,
                    observation_time,
                    lat: pixel.latitude,
                    lon: pixel.longitude,
                    column_value: pixel.column_value,
                    uncertainty: pixel.uncertainty,
                    quality_flag: pixel.quality_flag,
                    source_file: granule.source_file.clone(),
                });
            }
        }

        CollectedBatch::Satellite(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granule_midpoint_time_splits_range_evenly() {
        let granule = Granule {
            source_file: "f.nc".into(),
            range_start: "2024-06-01T12:00:00Z".into(),
            range_end: "2024-06-01T12:06:00Z".into(),
            pixels: vec![],
        };
        let midpoint = granule.midpoint_time().unwrap();
        assert_eq!(midpoint.to_rfc3339(), "2024-06-01T12:03:00+00:00");
    }

    #[test]
    fn test_granule_midpoint_time_none_on_unparseable_range() {
        let granule = Granule {
            source_file: "f.nc".into(),
            range_start: "not-a-time".into(),
            range_end: "2024-06-01T12:06:00Z".into(),
            pixels: vec![],
        };
        assert!(granule.midpoint_time().is_none());
    }
}
