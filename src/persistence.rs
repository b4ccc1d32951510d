//! Persistence engine.
//!
//! Idempotent batch upsert into typed tables. Each table's natural key
//! (declared alongside its schema in `db.rs`) is the `ON CONFLICT` target;
//! suppressed conflicts are not errors, just subtracted from `inserted`.
//!
//! Uses sqlx's parameterized multi-row insert idiom, batched with
//! `QueryBuilder::push_values` and an `ON CONFLICT ... DO NOTHING` clause
//! per table.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::AppError;
use crate::model::{FireDetection, GriddedWeather, GroundAirQuality, Pblh, Pollutant, ReanalysisMet, SatelliteColumn};

/// Exact triple returned by every upsert call.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub duplicate_skipped: u64,
    pub invalid_skipped: u64,
}

impl UpsertCounts {
    pub fn merge(mut self, other: UpsertCounts) -> Self {
        self.inserted += other.inserted;
        self.duplicate_skipped += other.duplicate_skipped;
        self.invalid_skipped += other.invalid_skipped;
        self
    }

    /// Always equals the number of candidate records the batch was given.
    pub fn total(&self) -> u64 {
        self.inserted + self.duplicate_skipped + self.invalid_skipped
    }
}

/// Validates every record, splitting into the rows fit to persist and a
/// running `invalid_skipped` count. C2's validation boundary.
fn partition_valid<T: Clone>(
    records: &[T],
    validate: impl Fn(&T) -> Result<(), AppError>,
) -> (Vec<T>, u64) {
    let mut valid = Vec::with_capacity(records.len());
    let mut invalid = 0u64;
    for r in records {
        match validate(r) {
            Ok(()) => valid.push(r.clone()),
            Err(_) => invalid += 1,
        }
    }
    (valid, invalid)
}

pub async fn upsert_ground_air_quality(
    pool: &PgPool,
    records: &[GroundAirQuality],
    batch_size: usize,
) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, GroundAirQuality::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    for chunk in valid.chunks(batch_size.max(1)) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO ground_air_quality (observation_time, lat, lon, location_id, city, country, parameter, value, units, provider, sensor_id) ",
        );
        qb.push_values(chunk, |mut b, rec| {
            b.push_bind(rec.observation_time)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(&rec.location_id)
                .push_bind(&rec.city)
                .push_bind(&rec.country)
                .push_bind(rec.parameter.as_str())
                .push_bind(rec.value)
                .push_bind(&rec.units)
                .push_bind(&rec.provider)
                .push_bind(&rec.sensor_id);
        });
        qb.push(" ON CONFLICT (observation_time, lat, lon, parameter, value, sensor_id) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

pub async fn upsert_satellite_column(
    pool: &PgPool,
    records: &[SatelliteColumn],
    batch_size: usize,
) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, SatelliteColumn::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    // All three satellite products share a schema; only the destination table differs.
    for chunk in valid.chunks(batch_size.max(1)) {
        let Some(first) = chunk.first() else { continue };
        let table = first.product.table_name();

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {table} (observation_time, lat, lon, column_value, uncertainty, quality_flag, source_file) "
        ));
        qb.push_values(chunk, |mut b, rec| {
            b.push_bind(rec.observation_time)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(rec.column_value)
                .push_bind(rec.uncertainty)
                .push_bind(rec.quality_flag)
                .push_bind(&rec.source_file);
        });
        qb.push(" ON CONFLICT (lat, lon, column_value, observation_time) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

pub async fn upsert_reanalysis_met(
    pool: &PgPool,
    records: &[ReanalysisMet],
    batch_size: usize,
) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, ReanalysisMet::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    for chunk in valid.chunks(batch_size.max(1)) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO reanalysis_met (granule_time, lat, lon, variable_name, value, units) ",
        );
        qb.push_values(chunk, |mut b, rec| {
            b.push_bind(rec.granule_time)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(rec.variable_name.as_str())
                .push_bind(rec.value)
                .push_bind(&rec.units);
        });
        qb.push(" ON CONFLICT (lat, lon, variable_name, granule_time, value) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

pub async fn upsert_pblh(pool: &PgPool, records: &[Pblh], batch_size: usize) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, Pblh::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    for chunk in valid.chunks(batch_size.max(1)) {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO pblh (timestamp, lat, lon, pbl_height_m) ");
        qb.push_values(chunk, |mut b, rec| {
            b.push_bind(rec.timestamp)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(rec.pbl_height_m);
        });
        qb.push(" ON CONFLICT (lat, lon, timestamp, pbl_height_m) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

pub async fn upsert_fire_detection(
    pool: &PgPool,
    records: &[FireDetection],
    batch_size: usize,
) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, FireDetection::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    for chunk in valid.chunks(batch_size.max(1)) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO fire_detection (acq_date, acq_time, lat, lon, frp, confidence, satellite) ",
        );
        qb.push_values(chunk, |mut b, rec| {
            let confidence = match rec.confidence {
                crate::model::FireConfidence::Low => "low",
                crate::model::FireConfidence::Nominal => "nominal",
                crate::model::FireConfidence::High => "high",
            };
            b.push_bind(rec.acq_date)
                .push_bind(&rec.acq_time)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(rec.frp)
                .push_bind(confidence)
                .push_bind(&rec.satellite);
        });
        qb.push(" ON CONFLICT (lat, lon, acq_date, acq_time, satellite) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

pub async fn upsert_gridded_weather(
    pool: &PgPool,
    records: &[GriddedWeather],
    batch_size: usize,
) -> Result<UpsertCounts, AppError> {
    let (valid, invalid_skipped) = partition_valid(records, GriddedWeather::validate);
    let mut counts = UpsertCounts {
        invalid_skipped,
        ..Default::default()
    };

    for chunk in valid.chunks(batch_size.max(1)) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO gridded_weather (timestamp, lat, lon, temperature_c, humidity_pct, precip_mm, wind_kmh, pressure_hpa, cloud_pct) ",
        );
        qb.push_values(chunk, |mut b, rec| {
            b.push_bind(rec.timestamp)
                .push_bind(rec.lat)
                .push_bind(rec.lon)
                .push_bind(rec.temperature_c)
                .push_bind(rec.humidity_pct)
                .push_bind(rec.precip_mm)
                .push_bind(rec.wind_kmh)
                .push_bind(rec.pressure_hpa)
                .push_bind(rec.cloud_pct);
        });
        qb.push(" ON CONFLICT (timestamp, lat, lon) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        counts.inserted += inserted;
        counts.duplicate_skipped += chunk.len() as u64 - inserted;
    }

    Ok(counts)
}

#[derive(sqlx::FromRow)]
struct GroundRow {
    observation_time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    location_id: String,
    city: String,
    country: String,
    parameter: String,
    value: f64,
    units: String,
    provider: String,
    sensor_id: String,
}

impl GroundRow {
    fn into_record(self) -> Option<GroundAirQuality> {
        Some(GroundAirQuality {
            observation_time: self.observation_time,
            lat: self.lat,
            lon: self.lon,
            location_id: self.location_id,
            city: self.city,
            country: self.country,
            parameter: Pollutant::parse(&self.parameter)?,
            value: self.value,
            units: self.units,
            provider: self.provider,
            sensor_id: self.sensor_id,
        })
    }
}

/// Reads every ground reading for `city` since `since`, ordered by time —
/// the raw material `features.rs` pivots into training/inference rows.
pub async fn fetch_ground_since(pool: &PgPool, city: &str, since: DateTime<Utc>) -> Result<Vec<GroundAirQuality>, AppError> {
    let rows: Vec<GroundRow> = sqlx::query_as(
        "SELECT observation_time, lat, lon, location_id, city, country, parameter, value, units, provider, sensor_id \
         FROM ground_air_quality WHERE city ILIKE $1 AND observation_time >= $2 ORDER BY observation_time ASC",
    )
    .bind(city)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(GroundRow::into_record).collect())
}

/// All ground readings in a training window, irrespective of city — C5
/// trains one global model per (pollutant, horizon), not one per city.
pub async fn fetch_ground_window(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<GroundAirQuality>, AppError> {
    let rows: Vec<GroundRow> = sqlx::query_as(
        "SELECT observation_time, lat, lon, location_id, city, country, parameter, value, units, provider, sensor_id \
         FROM ground_air_quality WHERE observation_time >= $1 ORDER BY observation_time ASC",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(GroundRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct MetRow {
    granule_time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    variable_name: String,
    value: f64,
    units: String,
}

fn parse_met_variable(raw: &str) -> Option<crate::model::MetVariable> {
    use crate::model::MetVariable::*;
    match raw {
        "T2M" => Some(T2m),
        "QV2M" => Some(Qv2m),
        "U10M" => Some(U10m),
        "V10M" => Some(V10m),
        "PS" => Some(Ps),
        "SLP" => Some(Slp),
        _ => None,
    }
}

pub async fn fetch_met_window(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<ReanalysisMet>, AppError> {
    let rows: Vec<MetRow> = sqlx::query_as(
        "SELECT granule_time, lat, lon, variable_name, value, units FROM reanalysis_met WHERE granule_time >= $1",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(ReanalysisMet {
                granule_time: r.granule_time,
                lat: r.lat,
                lon: r.lon,
                variable_name: parse_met_variable(&r.variable_name)?,
                value: r.value,
                units: r.units,
            })
        })
        .collect())
}

pub async fn fetch_pblh_window(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<Pblh>, AppError> {
    let rows: Vec<Pblh> = sqlx::query_as("SELECT timestamp, lat, lon, pbl_height_m FROM pblh WHERE timestamp >= $1")
        .bind(since)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[derive(sqlx::FromRow)]
struct FireRow {
    acq_date: chrono::NaiveDate,
    acq_time: String,
    lat: f64,
    lon: f64,
    frp: f64,
    confidence: String,
    satellite: String,
}

pub async fn fetch_fire_window(pool: &PgPool, since: chrono::NaiveDate) -> Result<Vec<FireDetection>, AppError> {
    let rows: Vec<FireRow> = sqlx::query_as(
        "SELECT acq_date, acq_time, lat, lon, frp, confidence, satellite FROM fire_detection WHERE acq_date >= $1",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(FireDetection {
                acq_date: r.acq_date,
                acq_time: r.acq_time,
                lat: r.lat,
                lon: r.lon,
                frp: r.frp,
                confidence: crate::model::FireConfidence::parse(&r.confidence)?,
                satellite: r.satellite,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroundAirQuality, Pollutant};
    use chrono::Utc;

    fn sample(value: f64) -> GroundAirQuality {
        GroundAirQuality {
            observation_time: Utc::now(),
            lat: 40.0,
            lon: -74.0,
            location_id: "loc-1".into(),
            city: "New York".into(),
            country: "US".into(),
            parameter: Pollutant::Pm25,
            value,
            units: "ug/m3".into(),
            provider: "test".into(),
            sensor_id: "s1".into(),
        }
    }

    #[test]
    fn test_partition_valid_splits_nan_into_invalid() {
        let records = vec![sample(12.5), sample(f64::NAN), sample(8.0)];
        let (valid, invalid) = partition_valid(&records, GroundAirQuality::validate);
        assert_eq!(valid.len(), 2);
        assert_eq!(invalid, 1);
    }

    #[test]
    fn test_upsert_counts_merge_and_total() {
        let a = UpsertCounts {
            inserted: 3,
            duplicate_skipped: 1,
            invalid_skipped: 2,
        };
        let b = UpsertCounts {
            inserted: 1,
            duplicate_skipped: 0,
            invalid_skipped: 0,
        };
        let merged = a.merge(b);
        assert_eq!(merged.inserted, 4);
        assert_eq!(merged.total(), 7);
    }
}
