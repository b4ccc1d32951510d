//! Feature assembly.
//!
//! Hand-rolled pivot/asof/rolling-window logic — deliberately not built on a
//! dataframe crate. Grounded on `AirQualityForecaster.engineer_features` /
//! `_merge_nearest` / `_add_fire_proximity` in the originating pipeline, with
//! every quantity a named column in an `IndexMap<String, f64>` rather than a
//! typed struct field, the way the pandas original treats its wide frame.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use indexmap::IndexMap;

use crate::model::{FireDetection, MetVariable, Pblh, Pollutant, ReanalysisMet};

pub const LAG_HOURS: [i64; 3] = [1, 6, 24];
pub const ROLLING_WINDOW: usize = 6;

/// One assembled training/inference row. `features` holds every numeric
/// predictor by name; order is insertion order, which is also the order
/// `training.rs` stores as `feature_names` for a given model.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub observation_time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub location_id: String,
    pub city: String,
    pub features: IndexMap<String, f64>,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

fn round_key(v: f64, precision_deg: f64) -> i64 {
    (v / precision_deg).round() as i64
}

/// Pivots long-format ground readings into one row per
/// (observation_time, lat, lon, location_id), pollutant columns as wide
/// features — mirrors `pivot_table(..., aggfunc='mean')` in the original.
pub fn pivot_ground(records: &[crate::model::GroundAirQuality]) -> Vec<FeatureRow> {
    struct Accum {
        observation_time: DateTime<Utc>,
        lat: f64,
        lon: f64,
        location_id: String,
        city: String,
        sums: HashMap<Pollutant, (f64, u32)>,
    }

    let mut groups: IndexMap<(i64, String), Accum> = IndexMap::new();
    for rec in records {
        let key = (rec.observation_time.timestamp(), rec.location_id.clone());
        let entry = groups.entry(key).or_insert_with(|| Accum {
            observation_time: rec.observation_time,
            lat: rec.lat,
            lon: rec.lon,
            location_id: rec.location_id.clone(),
            city: rec.city.clone(),
            sums: HashMap::new(),
        });
        let slot = entry.sums.entry(rec.parameter).or_insert((0.0, 0));
        slot.0 += rec.value;
        slot.1 += 1;
    }

    groups
        .into_values()
        .map(|accum| {
            let mut features = IndexMap::new();
            for (pollutant, (sum, count)) in &accum.sums {
                features.insert(pollutant.as_str().to_string(), sum / *count as f64);
            }
            FeatureRow {
                observation_time: accum.observation_time,
                lat: accum.lat,
                lon: accum.lon,
                location_id: accum.location_id,
                city: accum.city,
                features,
            }
        })
        .collect()
}

/// `hour_sin`/`hour_cos`/`day_of_week`/`month`/`is_weekend`, computed per row
/// from its own `observation_time` (never the current wall clock).
pub fn add_temporal_features(rows: &mut [FeatureRow]) {
    for row in rows.iter_mut() {
        set_temporal_features(row, row.observation_time);
    }
}

fn set_temporal_features(row: &mut FeatureRow, at: DateTime<Utc>) {
    let hour = at.hour() as f64;
    let day_of_week = at.weekday().num_days_from_monday() as f64;
    row.features.insert("hour".into(), hour);
    row.features.insert("day_of_week".into(), day_of_week);
    row.features.insert("month".into(), at.month() as f64);
    row.features
        .insert("is_weekend".into(), if day_of_week >= 5.0 { 1.0 } else { 0.0 });
    row.features
        .insert("hour_sin".into(), (2.0 * std::f64::consts::PI * hour / 24.0).sin());
    row.features
        .insert("hour_cos".into(), (2.0 * std::f64::consts::PI * hour / 24.0).cos());
}

/// Lag {1,6,24} and 6-row rolling mean/std (min_periods=1), computed
/// positionally within each location's time-ordered sequence — not by
/// elapsed wall-clock hours, matching the original's `groupby().shift()`.
pub fn add_lag_rolling_features(rows: &mut [FeatureRow], pollutants: &[Pollutant]) {
    let mut by_location: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        by_location.entry(row.location_id.clone()).or_default().push(idx);
    }

    for indices in by_location.values_mut() {
        indices.sort_by_key(|&i| rows[i].observation_time);

        for &pollutant in pollutants {
            let key = pollutant.as_str();
            let series: Vec<Option<f64>> = indices.iter().map(|&i| rows[i].get(key)).collect();

            for &lag in &LAG_HOURS {
                let lag = lag as usize;
                for (pos, &idx) in indices.iter().enumerate() {
                    if pos >= lag {
                        if let Some(v) = series[pos - lag] {
                            rows[idx].features.insert(format!("{key}_lag_{lag}h"), v);
                        }
                    }
                }
            }

            for (pos, &idx) in indices.iter().enumerate() {
                let window_start = pos.saturating_sub(ROLLING_WINDOW - 1);
                let window: Vec<f64> = series[window_start..=pos].iter().filter_map(|v| *v).collect();
                if window.is_empty() {
                    continue;
                }
                let mean = window.iter().sum::<f64>() / window.len() as f64;
                rows[idx]
                    .features
                    .insert(format!("{key}_rolling_mean_{ROLLING_WINDOW}h"), mean);

                if window.len() > 1 {
                    let variance =
                        window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
                    rows[idx]
                        .features
                        .insert(format!("{key}_rolling_std_{ROLLING_WINDOW}h"), variance.sqrt());
                }
            }
        }
    }
}

/// Nearest-in-time asof join: for each row, the temporally closest met/PBLH
/// observation to `observation_time` (before or after), within `tolerance`,
/// at the same rounded spatial key. Beyond tolerance or with no candidate at
/// all, the feature is simply absent — a documented limitation, not an error.
pub fn asof_join_met(
    rows: &mut [FeatureRow],
    met: &[ReanalysisMet],
    spatial_round_deg: f64,
    tolerance: chrono::Duration,
) {
    let mut by_key: HashMap<(i64, i64, MetVariable), Vec<(DateTime<Utc>, f64)>> = HashMap::new();
    for rec in met {
        let key = (
            round_key(rec.lat, spatial_round_deg),
            round_key(rec.lon, spatial_round_deg),
            rec.variable_name,
        );
        by_key.entry(key).or_default().push((rec.granule_time, rec.value));
    }
    for series in by_key.values_mut() {
        series.sort_by_key(|(t, _)| *t);
    }

    for row in rows.iter_mut() {
        let spatial = (round_key(row.lat, spatial_round_deg), round_key(row.lon, spatial_round_deg));
        for variable in [
            MetVariable::T2m,
            MetVariable::Qv2m,
            MetVariable::U10m,
            MetVariable::V10m,
            MetVariable::Ps,
            MetVariable::Slp,
        ] {
            let key = (spatial.0, spatial.1, variable);
            let Some(series) = by_key.get(&key) else { continue };
            if let Some(value) = asof_nearest(series, row.observation_time, tolerance) {
                row.features.insert(format!("met_{}", variable.as_str()), value);
            }
        }
    }
}

pub fn asof_join_pblh(rows: &mut [FeatureRow], pblh: &[Pblh], spatial_round_deg: f64, tolerance: chrono::Duration) {
    let mut by_key: HashMap<(i64, i64), Vec<(DateTime<Utc>, f64)>> = HashMap::new();
    for rec in pblh {
        let key = (round_key(rec.lat, spatial_round_deg), round_key(rec.lon, spatial_round_deg));
        by_key.entry(key).or_default().push((rec.timestamp, rec.pbl_height_m));
    }
    for series in by_key.values_mut() {
        series.sort_by_key(|(t, _)| *t);
    }

    for row in rows.iter_mut() {
        let key = (round_key(row.lat, spatial_round_deg), round_key(row.lon, spatial_round_deg));
        let Some(series) = by_key.get(&key) else { continue };
        if let Some(value) = asof_nearest(series, row.observation_time, tolerance) {
            row.features.insert("pbl_height_m".into(), value);
        }
    }
}

/// Binary search for the temporally nearest `(t, v)` to `at`, considering
/// both the latest candidate at or before `at` and the earliest candidate
/// after it, within `tolerance` — matching `pd.merge_asof(..., direction=
/// 'nearest')` rather than a backward-only join.
fn asof_nearest(series: &[(DateTime<Utc>, f64)], at: DateTime<Utc>, tolerance: chrono::Duration) -> Option<f64> {
    let idx = series.partition_point(|(t, _)| *t <= at);

    let before = if idx > 0 {
        let (t, v) = series[idx - 1];
        let gap = at - t;
        (gap <= tolerance).then_some((gap, v))
    } else {
        None
    };

    let after = series.get(idx).and_then(|&(t, v)| {
        let gap = t - at;
        (gap <= tolerance).then_some((gap, v))
    });

    match (before, after) {
        (Some((bgap, bv)), Some((agap, av))) => Some(if bgap <= agap { bv } else { av }),
        (Some((_, v)), None) | (None, Some((_, v))) => Some(v),
        (None, None) => None,
    }
}

/// Equirectangular approximation: `sqrt(dlat^2 + dlon^2) * 111`.
fn approx_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = lat1 - lat2;
    let dlon = lon1 - lon2;
    (dlat * dlat + dlon * dlon).sqrt() * 111.0
}

/// `fire_count_{radius}km` / `fire_frp_sum_{radius}km`, matched same
/// calendar day (UTC) then filtered by distance, as in the original.
pub fn add_fire_proximity(rows: &mut [FeatureRow], fires: &[FireDetection], radius_km: f64) {
    let mut by_date: HashMap<chrono::NaiveDate, Vec<&FireDetection>> = HashMap::new();
    for fire in fires {
        by_date.entry(fire.acq_date).or_default().push(fire);
    }

    let radius_label = radius_km as i64;
    for row in rows.iter_mut() {
        let date = row.observation_time.date_naive();
        let (mut count, mut frp_sum) = (0u32, 0.0f64);
        if let Some(candidates) = by_date.get(&date) {
            for fire in candidates {
                if approx_distance_km(row.lat, row.lon, fire.lat, fire.lon) <= radius_km {
                    count += 1;
                    frp_sum += fire.frp;
                }
            }
        }
        row.features
            .insert(format!("fire_count_{radius_label}km"), count as f64);
        row.features
            .insert(format!("fire_frp_sum_{radius_label}km"), frp_sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroundAirQuality;

    fn ground(time: DateTime<Utc>, location: &str, pollutant: Pollutant, value: f64) -> GroundAirQuality {
        GroundAirQuality {
            observation_time: time,
            lat: 40.0,
            lon: -74.0,
            location_id: location.into(),
            city: "New York".into(),
            country: "US".into(),
            parameter: pollutant,
            value,
            units: "ug/m3".into(),
            provider: "test".into(),
            sensor_id: "s1".into(),
        }
    }

    #[test]
    fn test_pivot_merges_same_timestamp_location() {
        let t = Utc::now();
        let records = vec![
            ground(t, "loc-1", Pollutant::Pm25, 10.0),
            ground(t, "loc-1", Pollutant::Pm10, 20.0),
        ];
        let rows = pivot_ground(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("PM2.5"), Some(10.0));
        assert_eq!(rows[0].get("PM10"), Some(20.0));
    }

    #[test]
    fn test_lag_features_respect_location_grouping() {
        let base = Utc::now();
        let records: Vec<_> = (0..3)
            .map(|i| ground(base + chrono::Duration::hours(i), "loc-1", Pollutant::Pm25, 10.0 + i as f64))
            .collect();
        let mut rows = pivot_ground(&records);
        add_lag_rolling_features(&mut rows, &[Pollutant::Pm25]);
        let sorted_idx = {
            let mut idx: Vec<usize> = (0..rows.len()).collect();
            idx.sort_by_key(|&i| rows[i].observation_time);
            idx
        };
        assert_eq!(rows[sorted_idx[1]].get("PM2.5_lag_1h"), Some(10.0));
        assert_eq!(rows[sorted_idx[2]].get("PM2.5_lag_1h"), Some(11.0));
    }

    #[test]
    fn test_asof_nearest_respects_tolerance() {
        let base = Utc::now();
        let series = vec![(base, 5.0)];
        let within = asof_nearest(&series, base + chrono::Duration::minutes(30), chrono::Duration::hours(1));
        let beyond = asof_nearest(&series, base + chrono::Duration::hours(2), chrono::Duration::hours(1));
        assert_eq!(within, Some(5.0));
        assert_eq!(beyond, None);
    }

    #[test]
    fn test_asof_nearest_picks_forward_candidate_when_closer() {
        // A context row strictly after `at` but closer than the nearest
        // backward one must win — this is a `direction='nearest'` join,
        // not a backward-only one.
        let base = Utc::now();
        let series = vec![(base - chrono::Duration::minutes(50), 1.0), (base + chrono::Duration::minutes(10), 2.0)];
        let nearest = asof_nearest(&series, base, chrono::Duration::hours(1));
        assert_eq!(nearest, Some(2.0));
    }

    #[test]
    fn test_asof_nearest_uses_only_candidate_before_series_start() {
        let base = Utc::now();
        let series = vec![(base + chrono::Duration::minutes(20), 9.0)];
        let nearest = asof_nearest(&series, base, chrono::Duration::hours(1));
        assert_eq!(nearest, Some(9.0));
    }

    #[test]
    fn test_fire_proximity_counts_within_radius_same_day() {
        let t = Utc::now();
        let records = vec![ground(t, "loc-1", Pollutant::Pm25, 10.0)];
        let mut rows = pivot_ground(&records);
        let fire_near = FireDetection {
            acq_date: t.date_naive(),
            acq_time: "1200".into(),
            lat: 40.01,
            lon: -74.01,
            frp: 12.0,
            confidence: crate::model::FireConfidence::High,
            satellite: "Terra".into(),
        };
        let fire_far = FireDetection {
            acq_date: t.date_naive(),
            acq_time: "1200".into(),
            lat: 10.0,
            lon: 10.0,
            frp: 99.0,
            confidence: crate::model::FireConfidence::High,
            satellite: "Terra".into(),
        };
        add_fire_proximity(&mut rows, &[fire_near, fire_far], 50.0);
        assert_eq!(rows[0].get("fire_count_50km"), Some(1.0));
        assert_eq!(rows[0].get("fire_frp_sum_50km"), Some(12.0));
    }
}
