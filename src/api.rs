//! External HTTP interface. Five endpoints: `POST /ingest`, `POST /train`,
//! `GET /forecast/{city}`, `GET /forecast/ensemble/{city}`, `GET /aqi/{city}`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aqi::AqiCategory;
use crate::error::{AppError, AppResult};
use crate::features::{self, FeatureRow};
use crate::forecast::forecast_pollutant;
use crate::ingestion::{RateLimiter, SourceAdapter};
use crate::model::Pollutant;
use crate::persistence::{self, UpsertCounts};
use crate::registry::{ModelKey, ModelRegistry};
use crate::training::train_one;
use crate::Config;

const REPORTABLE_POLLUTANTS: [Pollutant; 6] = [
    Pollutant::Pm25,
    Pollutant::Pm10,
    Pollutant::No2,
    Pollutant::O3,
    Pollutant::Co,
    Pollutant::So2,
];

pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: Config,
    pub registry: ModelRegistry,
    pub adapters: Vec<Box<dyn SourceAdapter>>,
    pub rate_limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub per_source: HashMap<String, UpsertCounts>,
}

pub async fn ingest(State(state): State<SharedState>, Json(req): Json<IngestRequest>) -> AppResult<Json<IngestResponse>> {
    let window_end = req.window_end.unwrap_or_else(Utc::now);
    let window_start = req.window_start.unwrap_or(window_end - state.config.ingest_window());

    let adapters: Vec<&Box<dyn SourceAdapter>> = match &req.sources {
        Some(names) => state
            .adapters
            .iter()
            .filter(|a| names.iter().any(|n| n == a.name()))
            .collect(),
        None => state.adapters.iter().collect(),
    };

    let mut per_source = HashMap::new();
    for adapter in adapters {
        let batch = adapter.fetch(window_start, window_end, &state.rate_limiter).await;
        let counts = persist_batch(&state.pool, batch, state.config.ingest_batch_size).await?;
        metrics::counter!("ingest_rows_inserted_total", "source" => adapter.name()).increment(counts.inserted);
        metrics::counter!("ingest_rows_invalid_total", "source" => adapter.name()).increment(counts.invalid_skipped);
        per_source.insert(adapter.name().to_string(), counts);
    }

    Ok(Json(IngestResponse { per_source }))
}

async fn persist_batch(
    pool: &sqlx::PgPool,
    batch: crate::ingestion::CollectedBatch,
    batch_size: usize,
) -> AppResult<UpsertCounts> {
    use crate::ingestion::CollectedBatch::*;
    Ok(match batch {
        Ground(r) => persistence::upsert_ground_air_quality(pool, &r, batch_size).await?,
        Satellite(r) => persistence::upsert_satellite_column(pool, &r, batch_size).await?,
        Reanalysis(r) => persistence::upsert_reanalysis_met(pool, &r, batch_size).await?,
        Pblh(r) => persistence::upsert_pblh(pool, &r, batch_size).await?,
        Fire(r) => persistence::upsert_fire_detection(pool, &r, batch_size).await?,
        Gridded(r) => persistence::upsert_gridded_weather(pool, &r, batch_size).await?,
    })
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub days: Option<i64>,
    pub pollutants: Option<Vec<String>>,
    pub horizons: Option<Vec<u32>>,
}

#[derive(Debug, Serialize)]
pub struct TrainedEntry {
    pub pollutant: String,
    pub horizon_hours: u32,
    pub validation_rmse: f64,
    pub rows_used: usize,
}

#[derive(Debug, Serialize)]
pub struct SkippedEntry {
    pub pollutant: String,
    pub horizon_hours: u32,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub trained: Vec<TrainedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

pub async fn train(State(state): State<SharedState>, Json(req): Json<TrainRequest>) -> AppResult<Json<TrainResponse>> {
    let days = req.days.unwrap_or(90);
    let since = Utc::now() - Duration::days(days);

    let pollutants: Vec<Pollutant> = match &req.pollutants {
        Some(names) => names.iter().filter_map(|n| Pollutant::parse(n)).collect(),
        None => REPORTABLE_POLLUTANTS.to_vec(),
    };
    let horizons = req.horizons.clone().unwrap_or_else(|| state.config.train_horizons.clone());

    let rows = assemble_feature_rows(&state, since).await?;

    let mut trained = Vec::new();
    let mut skipped = Vec::new();

    for &pollutant in &pollutants {
        for &horizon in &horizons {
            match train_one(&rows, pollutant, horizon, state.config.train_split_fraction, state.config.train_min_rows) {
                Ok(Some(outcome)) => {
                    let rmse = outcome.entry.validation_rmse;
                    metrics::gauge!(
                        "training_validation_rmse",
                        "pollutant" => pollutant.as_str(),
                        "horizon_hours" => horizon.to_string()
                    )
                    .set(rmse);
                    state.registry.put(
                        ModelKey {
                            pollutant,
                            horizon_hours: horizon,
                        },
                        outcome.entry,
                    );
                    trained.push(TrainedEntry {
                        pollutant: pollutant.as_str().to_string(),
                        horizon_hours: horizon,
                        validation_rmse: rmse,
                        rows_used: rows.len(),
                    });
                }
                Ok(None) => skipped.push(SkippedEntry {
                    pollutant: pollutant.as_str().to_string(),
                    horizon_hours: horizon,
                    reason: "insufficient training data".to_string(),
                }),
                Err(e) => skipped.push(SkippedEntry {
                    pollutant: pollutant.as_str().to_string(),
                    horizon_hours: horizon,
                    reason: e.to_string(),
                }),
            }
        }
    }

    Ok(Json(TrainResponse { trained, skipped }))
}

async fn assemble_feature_rows(state: &SharedState, since: DateTime<Utc>) -> AppResult<Vec<FeatureRow>> {
    let ground = persistence::fetch_ground_window(&state.pool, since).await?;
    let met = persistence::fetch_met_window(&state.pool, since).await?;
    let pblh = persistence::fetch_pblh_window(&state.pool, since).await?;
    let fire = persistence::fetch_fire_window(&state.pool, since.date_naive()).await?;

    let mut rows = features::pivot_ground(&ground);
    features::add_temporal_features(&mut rows);
    features::add_lag_rolling_features(&mut rows, &REPORTABLE_POLLUTANTS);
    features::asof_join_met(&mut rows, &met, state.config.features_spatial_round_deg, state.config.asof_tolerance());
    features::asof_join_pblh(&mut rows, &pblh, state.config.features_spatial_round_deg, state.config.asof_tolerance());
    features::add_fire_proximity(&mut rows, &fire, state.config.features_fire_radius_km);

    Ok(rows)
}

async fn latest_city_row(state: &SharedState, city: &str) -> AppResult<FeatureRow> {
    let since = Utc::now() - Duration::days(7);
    let ground = persistence::fetch_ground_since(&state.pool, city, since).await?;
    if ground.is_empty() {
        return Err(AppError::validation(format!("no recent data for city '{city}'")));
    }

    let mut rows = features::pivot_ground(&ground);
    features::add_temporal_features(&mut rows);
    features::add_lag_rolling_features(&mut rows, &REPORTABLE_POLLUTANTS);

    rows.sort_by_key(|r| r.observation_time);
    rows.into_iter().last().ok_or_else(|| AppError::validation("no rows after pivot"))
}

#[derive(Debug, Serialize)]
pub struct PollutantValue {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Serialize)]
pub struct DayForecast {
    pub date: String,
    pub aqi: i32,
    pub category: String,
    pub color: String,
    pub pollutants: Vec<PollutantValue>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub days: Option<u32>,
}

pub async fn forecast_city(
    State(state): State<SharedState>,
    Path(city): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> AppResult<Json<Vec<DayForecast>>> {
    let days = query.days.unwrap_or(3).clamp(1, 10);
    let base_row = latest_city_row(&state, &city).await?;

    let mut days_out = Vec::new();
    for day in 1..=days {
        let horizon = day * 24;
        let forecast_time = base_row.observation_time + Duration::hours(horizon as i64);

        let mut pollutant_values = Vec::new();
        let mut concentrations = Vec::new();
        for &pollutant in &REPORTABLE_POLLUTANTS {
            match forecast_pollutant(&state.registry, &base_row, pollutant, horizon, forecast_time, state.config.forecast_decay_base) {
                Ok(forecast) => {
                    pollutant_values.push(PollutantValue {
                        name: pollutant.as_str().to_string(),
                        value: forecast.mean,
                        unit: "ug/m3".to_string(),
                    });
                    concentrations.push((pollutant, forecast.mean));
                }
                Err(AppError::ModelMissing { .. }) | Err(AppError::FeatureMismatch { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        let (aqi, category) = match crate::aqi::overall_aqi(&concentrations) {
            Some((aqi, _dominant)) => (aqi, AqiCategory::from_aqi(aqi)),
            None => continue,
        };

        days_out.push(DayForecast {
            date: forecast_time.date_naive().to_string(),
            aqi: aqi.round() as i32,
            category: category.as_str().to_string(),
            color: category.color_hex().to_string(),
            pollutants: pollutant_values,
        });
    }

    Ok(Json(days_out))
}

#[derive(Debug, Deserialize)]
pub struct EnsembleQuery {
    pub pollutant: String,
}

#[derive(Debug, Serialize)]
pub struct EnsemblePoint {
    pub horizon_h: u32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub ci95: (f64, f64),
    pub agreement: f64,
}

const ENSEMBLE_HORIZONS: [u32; 5] = [1, 6, 24, 48, 72];

pub async fn forecast_ensemble(
    State(state): State<SharedState>,
    Path(city): Path<String>,
    Query(query): Query<EnsembleQuery>,
) -> AppResult<Json<Vec<EnsemblePoint>>> {
    let pollutant = Pollutant::parse(&query.pollutant).ok_or_else(|| AppError::validation("unknown pollutant"))?;
    let base_row = latest_city_row(&state, &city).await?;

    let mut points = Vec::new();
    for &horizon in &ENSEMBLE_HORIZONS {
        let forecast_time = base_row.observation_time + Duration::hours(horizon as i64);
        match forecast_pollutant(&state.registry, &base_row, pollutant, horizon, forecast_time, state.config.forecast_decay_base) {
            Ok(f) => points.push(EnsemblePoint {
                horizon_h: f.horizon_h,
                mean: f.mean,
                min: f.min,
                max: f.max,
                ci95: f.ci95,
                agreement: f.agreement,
            }),
            Err(AppError::ModelMissing { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(Json(points))
}

#[derive(Debug, Serialize)]
pub struct CurrentAqiResponse {
    pub aqi: i32,
    pub category: String,
    pub dominant_pollutant: String,
    pub observed_at: DateTime<Utc>,
}

pub async fn current_aqi(State(state): State<SharedState>, Path(city): Path<String>) -> AppResult<Json<CurrentAqiResponse>> {
    let base_row = latest_city_row(&state, &city).await?;

    let concentrations: Vec<(Pollutant, f64)> = REPORTABLE_POLLUTANTS
        .iter()
        .filter_map(|&p| base_row.get(p.as_str()).map(|v| (p, v)))
        .collect();

    let (aqi, dominant) = crate::aqi::overall_aqi(&concentrations)
        .ok_or_else(|| AppError::validation(format!("no pollutant concentrations available for '{city}'")))?;

    Ok(Json(CurrentAqiResponse {
        aqi: aqi.round() as i32,
        category: AqiCategory::from_aqi(aqi).as_str().to_string(),
        dominant_pollutant: dominant.as_str().to_string(),
        observed_at: base_row.observation_time,
    }))
}

pub async fn health() -> &'static str {
    "ok"
}
