//! Planetary boundary layer height adapter, subset to a bounding box at the
//! request level rather than filtered client-side after a full pull.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::Pblh;

use super::{CollectedBatch, RateLimiter, SourceAdapter};

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

pub struct PblhAdapter {
    client: reqwest::Client,
    base_url: String,
    bbox: BoundingBox,
}

impl PblhAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            bbox,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PblhEnvelope {
    records: Vec<PblhRecord>,
}

#[derive(Debug, Deserialize)]
struct PblhRecord {
    time: String,
    latitude: f64,
    longitude: f64,
    pbl_height_m: f64,
}

#[async_trait]
impl SourceAdapter for PblhAdapter {
    fn name(&self) -> &'static str {
        "pblh"
    }

    async fn fetch(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        limiter.acquire().await;

        let request = self.client.get(format!("{}/pblh", self.base_url)).query(&[
            ("start", window_start.to_rfc3339()),
            ("end", window_end.to_rfc3339()),
            ("min_lat", self.bbox.min_lat.to_string()),
            ("max_lat", self.bbox.max_lat.to_string()),
            ("min_lon", self.bbox.min_lon.to_string()),
            ("max_lon", self.bbox.max_lon.to_string()),
        ]);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = "pblh", error = %e, "fetch failed, returning empty batch");
                return CollectedBatch::Pblh(Vec::new());
            }
        };

        let envelope: PblhEnvelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(source = "pblh", error = %e, "decode failed, returning empty batch");
                return CollectedBatch::Pblh(Vec::new());
            }
        };

        let records = envelope
            .records
            .into_iter()
            .filter_map(|r| {
                let timestamp = DateTime::parse_from_rfc3339(&r.time).ok()?.with_timezone(&Utc);
                Some(Pblh {
                    timestamp,
                    lat: r.latitude,
                    lon: r.longitude,
                    pbl_height_m: r.pbl_height_m,
                })
            })
            .collect();

        CollectedBatch::Pblh(records)
    }
}
