//! In-process model registry.
//!
//! In-memory, atomic-per-key store of trained ensembles. No cross-restart
//! persistence: a process restart means every (pollutant, horizon) pair
//! must be retrained. Uses a `DashMap`-backed concurrent cache, the same
//! shape used elsewhere in this codebase for registries under concurrent
//! read/write access.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::Pollutant;
use crate::training::TrainedModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub pollutant: Pollutant,
    pub horizon_hours: u32,
}

/// Per-feature mean/std, fit on the training split. Trees don't need
/// normalized inputs, but every model in the ensemble is scored against the
/// same `X` here, so the scaler is fit and stored regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_features = rows.first().map_or(0, |r| r.len());
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; n_features];
        for row in rows {
            for (i, v) in row.iter().enumerate() {
                means[i] += v / n;
            }
        }
        let mut stds = vec![0.0; n_features];
        for row in rows {
            for (i, v) in row.iter().enumerate() {
                stds[i] += (v - means[i]).powi(2) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }
        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.means[i]) / self.stds[i])
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub feature_names: Vec<String>,
    pub scaler: Scaler,
    pub models: Vec<(String, TrainedModel)>,
    pub importances: Vec<(String, f64)>,
    pub validation_rmse: f64,
}

#[derive(Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<DashMap<ModelKey, ModelEntry>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic per-key replace: a training run for one key never
    /// observes a torn read of another key's entry.
    pub fn put(&self, key: ModelKey, entry: ModelEntry) {
        self.inner.insert(key, entry);
    }

    /// Point-in-time snapshot read; the caller never sees a write that
    /// started after this call returned.
    pub fn get(&self, key: &ModelKey) -> Option<ModelEntry> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.inner.contains_key(key)
    }

    /// Picks the largest trained horizon <= `target_horizon`, preferring
    /// the exact match, then 24 -> 6 -> 1 among those not exceeding it.
    /// Never substitutes a horizon larger than what was requested — that
    /// would be extrapolating backwards in time, not forwards, and would
    /// silently defeat the persistence-decay correction applied downstream.
    pub fn resolve_with_fallback(&self, pollutant: Pollutant, target_horizon: u32) -> Option<(u32, ModelEntry)> {
        let mut order = vec![target_horizon];
        for h in [24, 6, 1] {
            if !order.contains(&h) {
                order.push(h);
            }
        }
        order
            .into_iter()
            .filter(|&h| h <= target_horizon)
            .find_map(|h| {
                self.get(&ModelKey {
                    pollutant,
                    horizon_hours: h,
                })
                .map(|entry| (h, entry))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaler_zero_variance_feature_does_not_divide_by_zero() {
        let rows = vec![vec![1.0, 5.0], vec![1.0, 7.0]];
        let scaler = Scaler::fit(&rows);
        let scaled = scaler.transform(&[1.0, 6.0]);
        assert_eq!(scaled[0], 0.0);
        assert!(scaled[1].is_finite());
    }

    #[test]
    fn test_registry_put_get_roundtrip() {
        let registry = ModelRegistry::new();
        let key = ModelKey {
            pollutant: Pollutant::Pm25,
            horizon_hours: 24,
        };
        assert!(registry.get(&key).is_none());
        registry.put(
            key,
            ModelEntry {
                feature_names: vec!["hour_sin".into()],
                scaler: Scaler {
                    means: vec![0.0],
                    stds: vec![1.0],
                },
                models: vec![],
                importances: vec![],
                validation_rmse: 1.0,
            },
        );
        assert!(registry.get(&key).is_some());
    }

    #[test]
    fn test_horizon_fallback_prefers_24_then_6_then_1() {
        let registry = ModelRegistry::new();
        let entry = |rmse: f64| ModelEntry {
            feature_names: vec![],
            scaler: Scaler {
                means: vec![],
                stds: vec![],
            },
            models: vec![],
            importances: vec![],
            validation_rmse: rmse,
        };
        registry.put(
            ModelKey {
                pollutant: Pollutant::Pm25,
                horizon_hours: 6,
            },
            entry(2.0),
        );
        let (used, found) = registry.resolve_with_fallback(Pollutant::Pm25, 48).unwrap();
        assert_eq!(used, 6);
        assert_eq!(found.validation_rmse, 2.0);
    }

    #[test]
    fn test_horizon_fallback_never_substitutes_a_larger_horizon() {
        let registry = ModelRegistry::new();
        registry.put(
            ModelKey {
                pollutant: Pollutant::Pm25,
                horizon_hours: 24,
            },
            ModelEntry {
                feature_names: vec![],
                scaler: Scaler {
                    means: vec![],
                    stds: vec![],
                },
                models: vec![],
                importances: vec![],
                validation_rmse: 3.0,
            },
        );
        // Only a 24h model exists; a request for 6h must not fall back to it.
        assert!(registry.resolve_with_fallback(Pollutant::Pm25, 6).is_none());
    }
}
