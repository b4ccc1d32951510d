//! Active-fire detection adapter (FIRMS-style). Confidence is filtered at
//! the request itself — only nominal/high detections are ever requested;
//! the record's own `validate()` is a backstop, not the primary filter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{FireConfidence, FireDetection};

use super::{CollectedBatch, RateLimiter, SourceAdapter};

pub struct FireDetectionAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FireDetectionAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FireEnvelope {
    detections: Vec<FireRecord>,
}

#[derive(Debug, Deserialize)]
struct FireRecord {
    acq_date: String,
    acq_time: String,
    latitude: f64,
    longitude: f64,
    frp: f64,
    confidence: String,
    satellite: String,
}

#[async_trait]
impl SourceAdapter for FireDetectionAdapter {
    fn name(&self) -> &'static str {
        "fire_detection"
    }

    async fn fetch(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        limiter.acquire().await;

        let mut request = self.client.get(format!("{}/fires", self.base_url)).query(&[
            ("start_date", window_start.date_naive().to_string()),
            ("end_date", window_end.date_naive().to_string()),
            ("confidence", "nominal,high".to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = "fire_detection", error = %e, "fetch failed, returning empty batch");
                return CollectedBatch::Fire(Vec::new());
            }
        };

        let envelope: FireEnvelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(source = "fire_detection", error = %e, "decode failed, returning empty batch");
                return CollectedBatch::Fire(Vec::new());
            }
        };

        let records = envelope
            .detections
            .into_iter()
            .filter_map(|r| {
                let acq_date = chrono::NaiveDate::parse_from_str(&r.acq_date, "%Y-%m-%d").ok()?;
                let confidence = FireConfidence::parse(&r.confidence)?;
                Some(FireDetection {
                    acq_date,
                    acq_time: r.acq_time,
                    lat: r.latitude,
                    lon: r.longitude,
                    frp: r.frp,
                    confidence,
                    satellite: r.satellite,
                })
            })
            .collect();

        CollectedBatch::Fire(records)
    }
}
