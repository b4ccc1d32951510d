//! MERRA-2-style reanalysis meteorology adapter. Samples at most `max_points`
//! per variable per fetch — a global reanalysis grid is orders of
//! magnitude denser than anything the feature assembler's 0.1° join needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{MetVariable, ReanalysisMet};

use super::{CollectedBatch, RateLimiter, SourceAdapter};

pub struct ReanalysisAdapter {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_points_per_variable: usize,
}

impl ReanalysisAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: Option<String>, max_points_per_variable: usize) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
            max_points_per_variable,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReanalysisEnvelope {
    variables: Vec<VariableSeries>,
}

#[derive(Debug, Deserialize)]
struct VariableSeries {
    name: String,
    units: String,
    samples: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    time: String,
    latitude: f64,
    longitude: f64,
    value: f64,
}

fn parse_variable(name: &str) -> Option<MetVariable> {
    match name.to_ascii_uppercase().as_str() {
        "T2M" => Some(MetVariable::T2m),
        "QV2M" => Some(MetVariable::Qv2m),
        "U10M" => Some(MetVariable::U10m),
        "V10M" => Some(MetVariable::V10m),
        "PS" => Some(MetVariable::Ps),
        "SLP" => Some(MetVariable::Slp),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for ReanalysisAdapter {
    fn name(&self) -> &'static str {
        "reanalysis_met"
    }

    async fn fetch(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        limiter.acquire().await;

        let mut request = self
            .client
            .get(format!("{}/slv", self.base_url))
            .query(&[("start", window_start.to_rfc3339()), ("end", window_end.to_rfc3339())]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = "reanalysis_met", error = %e, "fetch failed, returning empty batch");
                return CollectedBatch::Reanalysis(Vec::new());
            }
        };

        let envelope: ReanalysisEnvelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(source = "reanalysis_met", error = %e, "decode failed, returning empty batch");
                return CollectedBatch::Reanalysis(Vec::new());
            }
        };

        let mut records = Vec::new();
        for series in envelope.variables {
            let Some(variable_name) = parse_variable(&series.name) else {
                continue;
            };
            for sample in series.samples.into_iter().take(self.max_points_per_variable) {
                let Ok(granule_time) = DateTime::parse_from_rfc3339(&sample.time) else {
                    continue;
                };
                records.push(ReanalysisMet {
                    granule_time: granule_time.with_timezone(&Utc),
                    lat: sample.latitude,
                    lon: sample.longitude,
                    variable_name,
                    value: sample.value,
                    units: series.units.clone(),
                });
            }
        }

        CollectedBatch::Reanalysis(records)
    }
}
