//! C6: Forecast Engine.
//!
//! Reconstructs a feature vector for a requested horizon, resolves the
//! nearest trained model via horizon fallback, applies the persistence
//! decay for any gap between the trained and requested horizon, and
//! produces ensemble statistics. Grounded on
//! `AirQualityForecaster.predict_with_uncertainty` / `get_city_aqi_forecast`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::AppError;
use crate::features::FeatureRow;
use crate::model::Pollutant;
use crate::registry::{ModelEntry, ModelRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct EnsembleForecast {
    pub horizon_h: u32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub ci95: (f64, f64),
    pub agreement: f64,
}

/// Re-derives the temporal columns for `forecast_time`, leaves every other
/// feature as observed in `base`, and fills anything `entry` expects but
/// `base` never saw with 0.0, except the target pollutant's own most recent
/// value, which must exist.
fn reconstruct_feature_vector(
    entry: &ModelEntry,
    base: &FeatureRow,
    target: Pollutant,
    forecast_time: DateTime<Utc>,
) -> Result<Vec<f64>, AppError> {
    if base.get(target.as_str()).is_none() {
        return Err(AppError::feature_mismatch(
            target.as_str(),
            "no recent observed value for this pollutant at this location",
        ));
    }

    let hour = forecast_time.hour_as_f64();
    let overrides: [(&str, f64); 6] = [
        ("hour", hour),
        ("day_of_week", forecast_time.day_of_week_as_f64()),
        ("month", forecast_time.month_as_f64()),
        ("is_weekend", if forecast_time.day_of_week_as_f64() >= 5.0 { 1.0 } else { 0.0 }),
        ("hour_sin", (2.0 * std::f64::consts::PI * hour / 24.0).sin()),
        ("hour_cos", (2.0 * std::f64::consts::PI * hour / 24.0).cos()),
    ];

    Ok(entry
        .feature_names
        .iter()
        .map(|name| {
            overrides
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .or_else(|| base.get(name))
                .unwrap_or(0.0)
        })
        .collect())
}

trait ChronoExt {
    fn hour_as_f64(&self) -> f64;
    fn day_of_week_as_f64(&self) -> f64;
    fn month_as_f64(&self) -> f64;
}

impl ChronoExt for DateTime<Utc> {
    fn hour_as_f64(&self) -> f64 {
        use chrono::Timelike;
        self.hour() as f64
    }
    fn day_of_week_as_f64(&self) -> f64 {
        use chrono::Datelike;
        self.weekday().num_days_from_monday() as f64
    }
    fn month_as_f64(&self) -> f64 {
        use chrono::Datelike;
        self.month() as f64
    }
}

/// `decay_base ^ ((target_horizon - used_horizon) / used_horizon)`, applied
/// to the whole predicted distribution (mean and both CI bounds) so the
/// interval stays centered on the decayed mean rather than the raw one.
fn decay_multiplier(decay_base: f64, target_horizon: u32, used_horizon: u32) -> f64 {
    if target_horizon <= used_horizon {
        return 1.0;
    }
    decay_base.powf((target_horizon - used_horizon) as f64 / used_horizon as f64)
}

pub fn forecast_pollutant(
    registry: &ModelRegistry,
    base_row: &FeatureRow,
    target: Pollutant,
    target_horizon_hours: u32,
    forecast_time: DateTime<Utc>,
    decay_base: f64,
) -> Result<EnsembleForecast, AppError> {
    let (used_horizon, entry) = registry
        .resolve_with_fallback(target, target_horizon_hours)
        .ok_or_else(|| AppError::ModelMissing {
            pollutant: target.as_str().to_string(),
            horizon: target_horizon_hours,
        })?;

    let raw = reconstruct_feature_vector(&entry, base_row, target, forecast_time)?;
    let scaled = entry.scaler.transform(&raw);
    let matrix = DenseMatrix::from_2d_vec(&[scaled]);

    let mut predictions = Vec::with_capacity(entry.models.len());
    for (_, model) in &entry.models {
        let pred = model.predict(&matrix)?;
        predictions.push(pred[0]);
    }

    let n = predictions.len().max(1) as f64;
    let mean = predictions.iter().sum::<f64>() / n;
    let variance = predictions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let agreement = if mean.abs() > 1e-9 { (1.0 - std / mean.abs()).max(0.0) } else { 0.0 };

    let decay = decay_multiplier(decay_base, target_horizon_hours, used_horizon);
    let decayed_mean = mean * decay;
    let decayed_std = std * decay;

    Ok(EnsembleForecast {
        horizon_h: target_horizon_hours,
        mean: decayed_mean,
        min: predictions.iter().cloned().fold(f64::INFINITY, f64::min) * decay,
        max: predictions.iter().cloned().fold(f64::NEG_INFINITY, f64::max) * decay,
        std: decayed_std,
        ci95: (decayed_mean - 1.96 * decayed_std, decayed_mean + 1.96 * decayed_std),
        agreement,
    })
}

pub fn group_predictions_agreement(predictions: &[f64]) -> (f64, f64, f64) {
    let n = predictions.len().max(1) as f64;
    let mean = predictions.iter().sum::<f64>() / n;
    let variance = predictions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let agreement = if mean.abs() > 1e-9 { (1.0 - std / mean.abs()).max(0.0) } else { 0.0 };
    (mean, std, agreement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_multiplier_matches_worked_example() {
        // 20 * 0.95^(48/24) = 18.05
        let decay = decay_multiplier(0.95, 48, 24);
        assert!((20.0 * decay - 18.05).abs() < 0.01);
    }

    #[test]
    fn test_decay_multiplier_is_one_when_no_gap() {
        assert_eq!(decay_multiplier(0.95, 24, 24), 1.0);
    }

    #[test]
    fn test_ensemble_agreement_perfect_when_unanimous() {
        let (mean, std, agreement) = group_predictions_agreement(&[10.0, 10.0, 10.0]);
        assert_eq!(mean, 10.0);
        assert_eq!(std, 0.0);
        assert_eq!(agreement, 1.0);
    }

    #[test]
    fn test_ensemble_agreement_worked_example() {
        let (mean, std, _agreement) = group_predictions_agreement(&[8.0, 10.0, 14.0]);
        assert!((mean - 10.6667).abs() < 0.001);
        assert!((std - 2.494).abs() < 0.01);
    }
}
