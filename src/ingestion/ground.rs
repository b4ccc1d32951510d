//! Ground station adapter. Drops any reading whose value isn't numeric
//! before it ever reaches the validator: a malformed sensor payload
//! degrades to a smaller batch, not a validation failure downstream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{GroundAirQuality, Pollutant};

use super::{CollectedBatch, RateLimiter, SourceAdapter};

pub struct GroundStationAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GroundStationAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    results: Vec<ApiMeasurement>,
}

#[derive(Debug, Deserialize)]
struct ApiMeasurement {
    date_utc: String,
    latitude: f64,
    longitude: f64,
    location_id: String,
    city: String,
    country: String,
    parameter: String,
    value: serde_json::Value,
    unit: String,
    sensor_id: String,
}

#[async_trait]
impl SourceAdapter for GroundStationAdapter {
    fn name(&self) -> &'static str {
        "ground_station"
    }

    async fn fetch(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, limiter: &RateLimiter) -> CollectedBatch {
        limiter.acquire().await;

        let mut request = self
            .client
            .get(format!("{}/measurements", self.base_url))
            .query(&[("date_from", window_start.to_rfc3339()), ("date_to", window_end.to_rfc3339())]);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source = "ground_station", error = %e, "fetch failed, returning empty batch");
                return CollectedBatch::Ground(Vec::new());
            }
        };

        let envelope: ApiEnvelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(source = "ground_station", error = %e, "decode failed, returning empty batch");
                return CollectedBatch::Ground(Vec::new());
            }
        };

        let records = envelope
            .results
            .into_iter()
            .filter_map(|m| {
                let value = match &m.value {
                    serde_json::Value::Number(n) => n.as_f64()?,
                    serde_json::Value::String(s) => s.parse::<f64>().ok()?,
                    _ => return None,
                };
                let parameter = Pollutant::parse(&m.parameter)?;
                let observation_time = DateTime::parse_from_rfc3339(&m.date_utc).ok()?.with_timezone(&Utc);
                Some(GroundAirQuality {
                    observation_time,
                    lat: m.latitude,
                    lon: m.longitude,
                    location_id: m.location_id,
                    city: m.city,
                    country: m.country,
                    parameter,
                    value,
                    units: m.unit,
                    provider: "ground_station".to_string(),
                    sensor_id: m.sensor_id,
                })
            })
            .collect();

        CollectedBatch::Ground(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::RateLimiter;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_parses_valid_envelope_and_drops_non_numeric_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/measurements"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {
                        "date_utc": "2024-06-01T12:00:00Z",
                        "latitude": 40.0,
                        "longitude": -74.0,
                        "location_id": "loc-1",
                        "city": "New York",
                        "country": "US",
                        "parameter": "pm25",
                        "value": 12.5,
                        "unit": "ug/m3",
                        "sensor_id": "s1"
                    },
                    {
                        "date_utc": "2024-06-01T12:00:00Z",
                        "latitude": 40.0,
                        "longitude": -74.0,
                        "location_id": "loc-2",
                        "city": "New York",
                        "country": "US",
                        "parameter": "pm25",
                        "value": "not-a-number",
                        "unit": "ug/m3",
                        "sensor_id": "s2"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let adapter = GroundStationAdapter::new(reqwest::Client::new(), server.uri(), None);
        let limiter = RateLimiter::new(600);
        let batch = adapter
            .fetch(Utc::now() - chrono::Duration::hours(1), Utc::now(), &limiter)
            .await;

        let CollectedBatch::Ground(records) = batch else {
            panic!("expected a Ground batch");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_id, "s1");
    }

    #[tokio::test]
    async fn test_fetch_returns_empty_batch_on_transport_failure() {
        // No mock registered for this path: the server responds 404, which
        // fails JSON decoding. The adapter must swallow this, never panic
        // or propagate, and hand the orchestrator an empty batch.
        let server = MockServer::start().await;
        let adapter = GroundStationAdapter::new(reqwest::Client::new(), server.uri(), None);
        let limiter = RateLimiter::new(600);
        let batch = adapter
            .fetch(Utc::now() - chrono::Duration::hours(1), Utc::now(), &limiter)
            .await;

        assert!(batch.is_empty());
    }
}
