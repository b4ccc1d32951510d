//! Connection pool and schema migrations.
//!
//! Splits an embedded SQL blob on `;` and executes each statement in turn
//! against a pooled connection, rather than depending on an external
//! migration runner.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::AppError;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(AppError::Persistence)
}

/// Every destination table, each with the composite unique index that
/// implements idempotency, plus secondary indexes on (lat, lon) and the
/// primary time column.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ground_air_quality (
    id BIGSERIAL PRIMARY KEY,
    observation_time TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    location_id TEXT NOT NULL,
    city TEXT NOT NULL,
    country TEXT NOT NULL,
    parameter TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    units TEXT NOT NULL,
    provider TEXT NOT NULL,
    sensor_id TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (observation_time, lat, lon, parameter, value, sensor_id)
);
CREATE INDEX IF NOT EXISTS idx_ground_air_quality_latlon ON ground_air_quality (lat, lon);
CREATE INDEX IF NOT EXISTS idx_ground_air_quality_time ON ground_air_quality (observation_time);
CREATE INDEX IF NOT EXISTS idx_ground_air_quality_city ON ground_air_quality (city);
CREATE INDEX IF NOT EXISTS idx_ground_air_quality_parameter ON ground_air_quality (parameter);

CREATE TABLE IF NOT EXISTS satellite_no2 (
    id BIGSERIAL PRIMARY KEY,
    observation_time TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    column_value DOUBLE PRECISION NOT NULL,
    uncertainty DOUBLE PRECISION,
    quality_flag DOUBLE PRECISION,
    source_file TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, column_value, observation_time)
);
CREATE INDEX IF NOT EXISTS idx_satellite_no2_latlon ON satellite_no2 (lat, lon);
CREATE INDEX IF NOT EXISTS idx_satellite_no2_time ON satellite_no2 (observation_time);

CREATE TABLE IF NOT EXISTS satellite_hcho (
    id BIGSERIAL PRIMARY KEY,
    observation_time TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    column_value DOUBLE PRECISION NOT NULL,
    uncertainty DOUBLE PRECISION,
    quality_flag DOUBLE PRECISION,
    source_file TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, column_value, observation_time)
);
CREATE INDEX IF NOT EXISTS idx_satellite_hcho_latlon ON satellite_hcho (lat, lon);
CREATE INDEX IF NOT EXISTS idx_satellite_hcho_time ON satellite_hcho (observation_time);

CREATE TABLE IF NOT EXISTS satellite_o3 (
    id BIGSERIAL PRIMARY KEY,
    observation_time TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    column_value DOUBLE PRECISION NOT NULL,
    uncertainty DOUBLE PRECISION,
    quality_flag DOUBLE PRECISION,
    source_file TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, column_value, observation_time)
);
CREATE INDEX IF NOT EXISTS idx_satellite_o3_latlon ON satellite_o3 (lat, lon);
CREATE INDEX IF NOT EXISTS idx_satellite_o3_time ON satellite_o3 (observation_time);

CREATE TABLE IF NOT EXISTS reanalysis_met (
    id BIGSERIAL PRIMARY KEY,
    granule_time TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    variable_name TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    units TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, variable_name, granule_time, value)
);
CREATE INDEX IF NOT EXISTS idx_reanalysis_met_latlon ON reanalysis_met (lat, lon);
CREATE INDEX IF NOT EXISTS idx_reanalysis_met_time ON reanalysis_met (granule_time);
CREATE INDEX IF NOT EXISTS idx_reanalysis_met_variable ON reanalysis_met (variable_name);

CREATE TABLE IF NOT EXISTS pblh (
    id BIGSERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    pbl_height_m DOUBLE PRECISION NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, timestamp, pbl_height_m)
);
CREATE INDEX IF NOT EXISTS idx_pblh_latlon ON pblh (lat, lon);
CREATE INDEX IF NOT EXISTS idx_pblh_time ON pblh (timestamp);

CREATE TABLE IF NOT EXISTS fire_detection (
    id BIGSERIAL PRIMARY KEY,
    acq_date DATE NOT NULL,
    acq_time TEXT NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    frp DOUBLE PRECISION NOT NULL,
    confidence TEXT NOT NULL,
    satellite TEXT NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (lat, lon, acq_date, acq_time, satellite)
);
CREATE INDEX IF NOT EXISTS idx_fire_detection_latlon ON fire_detection (lat, lon);
CREATE INDEX IF NOT EXISTS idx_fire_detection_date ON fire_detection (acq_date);

CREATE TABLE IF NOT EXISTS gridded_weather (
    id BIGSERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    temperature_c DOUBLE PRECISION NOT NULL,
    humidity_pct DOUBLE PRECISION NOT NULL,
    precip_mm DOUBLE PRECISION NOT NULL,
    wind_kmh DOUBLE PRECISION NOT NULL,
    pressure_hpa DOUBLE PRECISION NOT NULL,
    cloud_pct DOUBLE PRECISION NOT NULL,
    collection_timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (timestamp, lat, lon)
);
CREATE INDEX IF NOT EXISTS idx_gridded_weather_latlon ON gridded_weather (lat, lon);
CREATE INDEX IF NOT EXISTS idx_gridded_weather_time ON gridded_weather (timestamp);
"#;

pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
