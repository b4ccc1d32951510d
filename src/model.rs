//! Schema registry and validators: one record type per destination table.
//!
//! Each carries its own `validate()` — required-field presence, numeric
//! finiteness, lat/lon range, and source-specific enumerations — and its
//! natural-key tuple, used by the persistence engine to build the
//! `ON CONFLICT` target.
//!
//! Canonical pollutant spelling is decided here: upstream sources mix
//! `PM25`, `PM2.5`, `pm25`; adapters must normalize to the `Pollutant`
//! enum before a record reaches the registry, and nothing downstream
//! ever sees a free-form pollutant string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Canonical pollutant identifiers. `Display` gives the wire/storage spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pollutant {
    Pm25,
    Pm10,
    No2,
    O3,
    Co,
    So2,
}

impl Pollutant {
    /// Parses any of the spellings the upstream providers use for the same parameter.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
            .collect();
        match normalized.as_str() {
            "pm25" | "pm2.5" => Some(Self::Pm25),
            "pm10" => Some(Self::Pm10),
            "no2" => Some(Self::No2),
            "o3" | "ozone" => Some(Self::O3),
            "co" => Some(Self::Co),
            "so2" => Some(Self::So2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pm25 => "PM2.5",
            Self::Pm10 => "PM10",
            Self::No2 => "NO2",
            Self::O3 => "O3",
            Self::Co => "CO",
            Self::So2 => "SO2",
        }
    }
}

impl std::fmt::Display for Pollutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_finite_coord(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Ground air-quality station reading.
///
/// Natural key: (observation_time, lat, lon, parameter, value, sensor_id).
/// The key deliberately includes `value`: rows are append-only, never
/// updated in place — a changed reading is a new row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundAirQuality {
    pub observation_time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub location_id: String,
    pub city: String,
    pub country: String,
    pub parameter: Pollutant,
    pub value: f64,
    pub units: String,
    pub provider: String,
    pub sensor_id: String,
}

impl GroundAirQuality {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        if !self.value.is_finite() {
            return Err(AppError::invalid_record("value is not finite"));
        }
        if self.location_id.is_empty() || self.sensor_id.is_empty() {
            return Err(AppError::invalid_record("location_id/sensor_id required"));
        }
        Ok(())
    }
}

/// One table per satellite product (NO2, HCHO, O3 column retrievals).
/// Natural key: (lat, lon, column_value, observation_time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteColumn {
    pub product: SatelliteProduct,
    pub observation_time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub column_value: f64,
    pub uncertainty: Option<f64>,
    pub quality_flag: Option<f64>,
    pub source_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatelliteProduct {
    No2,
    Hcho,
    O3,
}

impl SatelliteProduct {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::No2 => "satellite_no2",
            Self::Hcho => "satellite_hcho",
            Self::O3 => "satellite_o3",
        }
    }

    /// Source-specific quality filter: each product defines its own
    /// admissible flag range; records failing it never reach persistence.
    fn passes_quality_filter(&self, flag: Option<f64>) -> bool {
        match (self, flag) {
            (_, None) => true,
            (Self::Hcho, Some(f)) => f >= 0.0,
            (Self::No2, Some(f)) => f >= 0.0,
            (Self::O3, Some(f)) => f >= 0.0,
        }
    }
}

impl SatelliteColumn {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        if !self.column_value.is_finite() {
            return Err(AppError::invalid_record("column_value is not finite"));
        }
        if !self.product.passes_quality_filter(self.quality_flag) {
            return Err(AppError::invalid_record("rejected by quality filter"));
        }
        Ok(())
    }
}

/// Reanalysis meteorology (one row per time/location/variable).
/// Natural key: (lat, lon, variable_name, granule_time, value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReanalysisMet {
    pub granule_time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub variable_name: MetVariable,
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetVariable {
    T2m,
    Qv2m,
    U10m,
    V10m,
    Ps,
    Slp,
}

impl MetVariable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T2m => "T2M",
            Self::Qv2m => "QV2M",
            Self::U10m => "U10M",
            Self::V10m => "V10M",
            Self::Ps => "PS",
            Self::Slp => "SLP",
        }
    }
}

impl ReanalysisMet {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        if !self.value.is_finite() {
            return Err(AppError::invalid_record("value is not finite"));
        }
        Ok(())
    }
}

/// Planetary boundary layer height.
/// Natural key: (lat, lon, timestamp, pbl_height_m).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pblh {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub pbl_height_m: f64,
}

impl Pblh {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        if !self.pbl_height_m.is_finite() {
            return Err(AppError::invalid_record("pbl_height_m is not finite"));
        }
        Ok(())
    }
}

/// Active-fire detection.
/// Natural key: (lat, lon, acq_date, acq_time, satellite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireDetection {
    pub acq_date: chrono::NaiveDate,
    pub acq_time: String,
    pub lat: f64,
    pub lon: f64,
    pub frp: f64,
    pub confidence: FireConfidence,
    pub satellite: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireConfidence {
    Low,
    Nominal,
    High,
}

impl FireConfidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "l" | "low" => Some(Self::Low),
            "n" | "nominal" => Some(Self::Nominal),
            "h" | "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl FireDetection {
    /// Filtered at source: only nominal/high confidence detections are kept at all.
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        if !self.frp.is_finite() {
            return Err(AppError::invalid_record("frp is not finite"));
        }
        if self.confidence == FireConfidence::Low {
            return Err(AppError::invalid_record("low-confidence detection rejected"));
        }
        Ok(())
    }
}

/// Gridded surface weather.
/// Natural key: (timestamp, lat, lon).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GriddedWeather {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub precip_mm: f64,
    pub wind_kmh: f64,
    pub pressure_hpa: f64,
    pub cloud_pct: f64,
}

impl GriddedWeather {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_finite_coord(self.lat, self.lon) {
            return Err(AppError::invalid_record("lat/lon out of range"));
        }
        for (name, v) in [
            ("temperature_c", self.temperature_c),
            ("humidity_pct", self.humidity_pct),
            ("precip_mm", self.precip_mm),
            ("wind_kmh", self.wind_kmh),
            ("pressure_hpa", self.pressure_hpa),
            ("cloud_pct", self.cloud_pct),
        ] {
            if !v.is_finite() {
                return Err(AppError::invalid_record(format!("{name} is not finite")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pollutant_spelling_normalization() {
        assert_eq!(Pollutant::parse("PM25"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::parse("pm2.5"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::parse("PM2.5"), Some(Pollutant::Pm25));
        assert_eq!(Pollutant::parse("bogus"), None);
    }

    #[test]
    fn test_ground_air_quality_rejects_nan() {
        let rec = GroundAirQuality {
            observation_time: Utc::now(),
            lat: 40.0,
            lon: -74.0,
            location_id: "loc-1".into(),
            city: "New York".into(),
            country: "US".into(),
            parameter: Pollutant::Pm25,
            value: f64::NAN,
            units: "ug/m3".into(),
            provider: "test".into(),
            sensor_id: "s1".into(),
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_ground_air_quality_rejects_out_of_range_lat() {
        let rec = GroundAirQuality {
            observation_time: Utc::now(),
            lat: 200.0,
            lon: -74.0,
            location_id: "loc-1".into(),
            city: "New York".into(),
            country: "US".into(),
            parameter: Pollutant::Pm25,
            value: 12.5,
            units: "ug/m3".into(),
            provider: "test".into(),
            sensor_id: "s1".into(),
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_fire_detection_rejects_low_confidence() {
        let rec = FireDetection {
            acq_date: chrono::Utc::now().date_naive(),
            acq_time: "1200".into(),
            lat: 10.0,
            lon: 10.0,
            frp: 5.0,
            confidence: FireConfidence::Low,
            satellite: "Terra".into(),
        };
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_satellite_hcho_quality_filter() {
        let mut rec = SatelliteColumn {
            product: SatelliteProduct::Hcho,
            observation_time: Utc::now(),
            lat: 1.0,
            lon: 1.0,
            column_value: 1.2e16,
            uncertainty: None,
            quality_flag: Some(-1.0),
            source_file: "f.nc".into(),
        };
        assert!(rec.validate().is_err());
        rec.quality_flag = Some(0.5);
        assert!(rec.validate().is_ok());
    }
}

/// Property-based checks for the quantified invariants every ingested row
/// must satisfy, regardless of which source produced it: finite coordinates
/// in range, finite observation values. Complements the example-based tests
/// above rather than replacing them.
#[cfg(test)]
mod invariant_properties {
    use super::*;
    use proptest::prelude::*;

    fn in_range_coords() -> impl Strategy<Value = (f64, f64)> {
        (-90.0f64..=90.0, -180.0f64..=180.0)
    }

    fn out_of_range_coords() -> impl Strategy<Value = (f64, f64)> {
        prop_oneof![
            (-90.0f64..=90.0, prop_oneof![180.001f64..1e6, -1e6..-180.001]),
            (prop_oneof![90.001f64..1e6, -1e6..-90.001], -180.0f64..=180.0),
        ]
    }

    proptest! {
        #[test]
        fn ground_air_quality_accepts_any_in_range_finite_value(
            (lat, lon) in in_range_coords(),
            value in -1e4f64..1e4,
        ) {
            let rec = GroundAirQuality {
                observation_time: Utc::now(),
                lat,
                lon,
                location_id: "loc".into(),
                city: "city".into(),
                country: "US".into(),
                parameter: Pollutant::Pm25,
                value,
                units: "ug/m3".into(),
                provider: "test".into(),
                sensor_id: "sensor".into(),
            };
            prop_assert!(rec.validate().is_ok());
        }

        #[test]
        fn ground_air_quality_rejects_any_out_of_range_coordinate(
            (lat, lon) in out_of_range_coords(),
        ) {
            let rec = GroundAirQuality {
                observation_time: Utc::now(),
                lat,
                lon,
                location_id: "loc".into(),
                city: "city".into(),
                country: "US".into(),
                parameter: Pollutant::Pm25,
                value: 10.0,
                units: "ug/m3".into(),
                provider: "test".into(),
                sensor_id: "sensor".into(),
            };
            prop_assert!(rec.validate().is_err());
        }

        #[test]
        fn gridded_weather_rejects_nan_in_any_field(field_idx in 0usize..6) {
            let mut fields = [0.0f64; 6];
            fields[field_idx] = f64::NAN;
            let rec = GriddedWeather {
                timestamp: Utc::now(),
                lat: 10.0,
                lon: 10.0,
                temperature_c: fields[0],
                humidity_pct: fields[1],
                precip_mm: fields[2],
                wind_kmh: fields[3],
                pressure_hpa: fields[4],
                cloud_pct: fields[5],
            };
            prop_assert!(rec.validate().is_err());
        }
    }
}
