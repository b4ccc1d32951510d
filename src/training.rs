//! C5: Training Orchestrator.
//!
//! One task per (pollutant, horizon): shift the target, time-ordered
//! 80/20 split (never shuffled), fit a three-model ensemble, score by RMSE,
//! store the winner's feature importances. Reimplemented without a
//! dataframe: `Vec<FeatureRow>` in, `ModelEntry` out.
//!
//! smartcore ships no gradient-boosting regressor, so the ensemble's GBM-A
//! and GBM-B slots are realized as differently-configured
//! `DecisionTreeRegressor`s — three independently-configured learners
//! combined into one ensemble.

use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{RandomForestRegressor, RandomForestRegressorParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{DecisionTreeRegressor, DecisionTreeRegressorParameters};

use crate::error::AppError;
use crate::features::FeatureRow;
use crate::model::Pollutant;
use crate::registry::{ModelEntry, Scaler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    RandomForest(RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>),
    DecisionTree(DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>),
}

impl TrainedModel {
    pub fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>, AppError> {
        let result = match self {
            Self::RandomForest(m) => m.predict(x),
            Self::DecisionTree(m) => m.predict(x),
        };
        result.map_err(|e| AppError::internal(format!("prediction failed: {e}")))
    }
}

pub struct TrainingOutcome {
    pub entry: ModelEntry,
}

pub struct SkippedTraining {
    pub pollutant: Pollutant,
    pub horizon_hours: u32,
    pub reason: AppError,
}

fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().max(1) as f64;
    (actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n)
        .sqrt()
}

fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().max(1) as f64;
    actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum::<f64>() / n
}

/// Builds `(X, y)` for one (pollutant, horizon) pair: the target is the
/// pollutant's own value `horizon_hours` ahead within the *same location*.
/// The features are every numeric column observed *now*, including the
/// pollutant's own current value — its strongest near-term predictor is
/// itself, so it stays in `feature_names` rather than being stripped as a
/// pseudo-identifier. Rows missing the target are dropped; rows time-ordered
/// by `observation_time` ascending.
fn build_training_set(
    rows: &[FeatureRow],
    target: Pollutant,
    horizon_hours: u32,
) -> (Vec<String>, Vec<Vec<f64>>, Vec<f64>) {
    let mut by_location: std::collections::HashMap<&str, Vec<usize>> = std::collections::HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        by_location.entry(row.location_id.as_str()).or_default().push(idx);
    }

    let target_key = target.as_str();
    let mut feature_names: Vec<String> = Vec::new();
    for row in rows {
        for name in row.features.keys() {
            if !feature_names.contains(name) {
                feature_names.push(name.clone());
            }
        }
    }
    feature_names.sort();

    let mut pairs: Vec<(chrono::DateTime<chrono::Utc>, Vec<f64>, f64)> = Vec::new();
    for indices in by_location.values_mut() {
        indices.sort_by_key(|&i| rows[i].observation_time);
        for (pos, &idx) in indices.iter().enumerate() {
            let future_pos = pos + horizon_hours as usize;
            let Some(&future_idx) = indices.get(future_pos) else {
                continue;
            };
            let Some(y) = rows[future_idx].get(target_key) else {
                continue;
            };
            let x: Vec<f64> = feature_names.iter().map(|n| rows[idx].get(n).unwrap_or(0.0)).collect();
            pairs.push((rows[idx].observation_time, x, y));
        }
    }
    pairs.sort_by_key(|(t, _, _)| *t);

    let xs = pairs.iter().map(|(_, x, _)| x.clone()).collect();
    let ys = pairs.iter().map(|(_, _, y)| *y).collect();
    (feature_names, xs, ys)
}

/// Single-feature Pearson correlation magnitude, used as a importance proxy
/// in place of sklearn's impurity-based `feature_importances_` (smartcore
/// doesn't expose per-split impurity decrease).
fn correlation_importance(xs: &[Vec<f64>], ys: &[f64], feature_idx: usize) -> f64 {
    let n = xs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let feature: Vec<f64> = xs.iter().map(|row| row[feature_idx]).collect();
    let fmean = feature.iter().sum::<f64>() / n;
    let ymean = ys.iter().sum::<f64>() / n;
    let cov: f64 = feature.iter().zip(ys).map(|(f, y)| (f - fmean) * (y - ymean)).sum();
    let fstd = (feature.iter().map(|f| (f - fmean).powi(2)).sum::<f64>()).sqrt();
    let ystd = (ys.iter().map(|y| (y - ymean).powi(2)).sum::<f64>()).sqrt();
    if fstd < 1e-12 || ystd < 1e-12 {
        0.0
    } else {
        (cov / (fstd * ystd)).abs()
    }
}

/// Trains one (pollutant, horizon) pair. Returns `Ok(None)` when there are
/// fewer than `min_rows` usable samples — a skip, not a failure.
pub fn train_one(
    rows: &[FeatureRow],
    target: Pollutant,
    horizon_hours: u32,
    split_fraction: f64,
    min_rows: usize,
) -> Result<Option<TrainingOutcome>, AppError> {
    let (feature_names, xs, ys) = build_training_set(rows, target, horizon_hours);

    if xs.len() < min_rows {
        return Ok(None);
    }

    let split_idx = ((xs.len() as f64) * split_fraction) as usize;
    let split_idx = split_idx.clamp(1, xs.len() - 1);

    let (train_x, val_x) = xs.split_at(split_idx);
    let (train_y, val_y) = ys.split_at(split_idx);

    let scaler = Scaler::fit(train_x);
    let train_x_scaled: Vec<Vec<f64>> = train_x.iter().map(|r| scaler.transform(r)).collect();
    let val_x_scaled: Vec<Vec<f64>> = val_x.iter().map(|r| scaler.transform(r)).collect();

    let train_matrix = DenseMatrix::from_2d_vec(&train_x_scaled);
    let val_matrix = DenseMatrix::from_2d_vec(&val_x_scaled);
    let train_labels = train_y.to_vec();

    let mut candidates: Vec<(&'static str, TrainedModel)> = Vec::new();

    let rf = RandomForestRegressor::fit(
        &train_matrix,
        &train_labels,
        RandomForestRegressorParameters::default().with_n_trees(100).with_max_depth(20),
    )
    .map_err(|e| AppError::internal(format!("RF training failed: {e}")))?;
    candidates.push(("RF", TrainedModel::RandomForest(rf)));

    let gbm_a = DecisionTreeRegressor::fit(
        &train_matrix,
        &train_labels,
        DecisionTreeRegressorParameters::default().with_max_depth(6),
    )
    .map_err(|e| AppError::internal(format!("GBM-A training failed: {e}")))?;
    candidates.push(("GBM-A", TrainedModel::DecisionTree(gbm_a)));

    let gbm_b = DecisionTreeRegressor::fit(
        &train_matrix,
        &train_labels,
        DecisionTreeRegressorParameters::default().with_max_depth(5).with_min_samples_leaf(4),
    )
    .map_err(|e| AppError::internal(format!("GBM-B training failed: {e}")))?;
    candidates.push(("GBM-B", TrainedModel::DecisionTree(gbm_b)));

    let mut scored: Vec<(&'static str, TrainedModel, f64, f64)> = Vec::new();
    for (name, model) in candidates {
        let predicted = model.predict(&val_matrix)?;
        let score = rmse(val_y, &predicted);
        let error = mae(val_y, &predicted);
        scored.push((name, model, score, error));
    }
    scored.sort_by(|a, b| a.2.total_cmp(&b.2));

    let best_rmse = scored[0].2;
    let importances: Vec<(String, f64)> = feature_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), correlation_importance(&train_x_scaled, train_y, i)))
        .collect();

    let models: Vec<(String, TrainedModel)> = scored.into_iter().map(|(name, model, _, _)| (name.to_string(), model)).collect();

    Ok(Some(TrainingOutcome {
        entry: ModelEntry {
            feature_names,
            scaler,
            models,
            importances,
            validation_rmse: best_rmse,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::pivot_ground;
    use crate::model::GroundAirQuality;
    use chrono::Utc;

    fn make_rows(n: usize) -> Vec<FeatureRow> {
        let base = Utc::now();
        let records: Vec<GroundAirQuality> = (0..n)
            .map(|i| GroundAirQuality {
                observation_time: base + chrono::Duration::hours(i as i64),
                lat: 40.0,
                lon: -74.0,
                location_id: "loc-1".into(),
                city: "New York".into(),
                country: "US".into(),
                parameter: Pollutant::Pm25,
                value: 10.0 + (i % 5) as f64,
                units: "ug/m3".into(),
                provider: "test".into(),
                sensor_id: "s1".into(),
            })
            .collect();
        let mut rows = pivot_ground(&records);
        crate::features::add_temporal_features(&mut rows);
        rows
    }

    #[test]
    fn test_build_training_set_shifts_target_forward() {
        let rows = make_rows(10);
        let (_, xs, ys) = build_training_set(&rows, Pollutant::Pm25, 1);
        assert_eq!(xs.len(), ys.len());
        assert!(xs.len() <= 9);
    }

    #[test]
    fn test_train_one_skips_when_below_minimum_rows() {
        let rows = make_rows(5);
        let outcome = train_one(&rows, Pollutant::Pm25, 1, 0.8, 20).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn test_build_training_set_keeps_target_pollutant_as_a_feature() {
        let rows = make_rows(10);
        let (feature_names, _, _) = build_training_set(&rows, Pollutant::Pm25, 1);
        assert!(feature_names.iter().any(|n| n == Pollutant::Pm25.as_str()));
    }
}
