//! C7: AQI Mapper.
//!
//! EPA piecewise-linear breakpoint formula: for concentration `c` falling in
//! `[bp_lo, bp_hi]`, `aqi = (aqi_hi - aqi_lo) / (bp_hi - bp_lo) * (c - bp_lo) + aqi_lo`.
//! Breakpoint tables and category bands are taken verbatim from the US EPA
//! standard as implemented by `AirQualityForecaster.calculate_aqi` /
//! `_get_aqi_category` in the originating pipeline, extended here to the
//! four gaseous pollutants it left as future work.

use crate::error::AppError;
use crate::model::Pollutant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    /// EPA standard color scale (matches the reference AirNow palette).
    pub fn color_hex(&self) -> &'static str {
        match self {
            Self::Good => "#00E400",
            Self::Moderate => "#FFFF00",
            Self::UnhealthyForSensitiveGroups => "#FF7E00",
            Self::Unhealthy => "#FF0000",
            Self::VeryUnhealthy => "#8F3F97",
            Self::Hazardous => "#7E0023",
        }
    }

    pub fn from_aqi(aqi: f64) -> Self {
        if aqi <= 50.0 {
            Self::Good
        } else if aqi <= 100.0 {
            Self::Moderate
        } else if aqi <= 150.0 {
            Self::UnhealthyForSensitiveGroups
        } else if aqi <= 200.0 {
            Self::Unhealthy
        } else if aqi <= 300.0 {
            Self::VeryUnhealthy
        } else {
            Self::Hazardous
        }
    }
}

/// One row of a breakpoint table: (bp_lo, bp_hi, aqi_lo, aqi_hi).
type Breakpoint = (f64, f64, f64, f64);

/// Boundary convention: intervals are closed on both ends as published by
/// the EPA, with a deliberate gap between consecutive highs/lows (e.g. PM2.5
/// 12.0 ends one interval, 12.1 starts the next). A concentration landing
/// exactly on a table value belongs to the interval that names it as either
/// endpoint, never the neighboring one — there is no overlap to disambiguate.
fn breakpoints_for(pollutant: Pollutant) -> Option<&'static [Breakpoint]> {
    const PM25: &[Breakpoint] = &[
        (0.0, 12.0, 0.0, 50.0),
        (12.1, 35.4, 51.0, 100.0),
        (35.5, 55.4, 101.0, 150.0),
        (55.5, 150.4, 151.0, 200.0),
        (150.5, 250.4, 201.0, 300.0),
        (250.5, 500.4, 301.0, 500.0),
    ];
    const PM10: &[Breakpoint] = &[
        (0.0, 54.0, 0.0, 50.0),
        (55.0, 154.0, 51.0, 100.0),
        (155.0, 254.0, 101.0, 150.0),
        (255.0, 354.0, 151.0, 200.0),
        (355.0, 424.0, 201.0, 300.0),
        (425.0, 604.0, 301.0, 500.0),
    ];
    const O3_8H_PPM: &[Breakpoint] = &[
        (0.0, 0.054, 0.0, 50.0),
        (0.055, 0.070, 51.0, 100.0),
        (0.071, 0.085, 101.0, 150.0),
        (0.086, 0.105, 151.0, 200.0),
        (0.106, 0.200, 201.0, 300.0),
    ];
    const CO_PPM: &[Breakpoint] = &[
        (0.0, 4.4, 0.0, 50.0),
        (4.5, 9.4, 51.0, 100.0),
        (9.5, 12.4, 101.0, 150.0),
        (12.5, 15.4, 151.0, 200.0),
        (15.5, 30.4, 201.0, 300.0),
        (30.5, 50.4, 301.0, 500.0),
    ];
    const SO2_PPB: &[Breakpoint] = &[
        (0.0, 35.0, 0.0, 50.0),
        (36.0, 75.0, 51.0, 100.0),
        (76.0, 185.0, 101.0, 150.0),
        (186.0, 304.0, 151.0, 200.0),
        (305.0, 604.0, 201.0, 300.0),
        (605.0, 1004.0, 301.0, 500.0),
    ];
    const NO2_PPB: &[Breakpoint] = &[
        (0.0, 53.0, 0.0, 50.0),
        (54.0, 100.0, 51.0, 100.0),
        (101.0, 360.0, 101.0, 150.0),
        (361.0, 649.0, 151.0, 200.0),
        (650.0, 1249.0, 201.0, 300.0),
        (1250.0, 2049.0, 301.0, 500.0),
    ];

    Some(match pollutant {
        Pollutant::Pm25 => PM25,
        Pollutant::Pm10 => PM10,
        Pollutant::O3 => O3_8H_PPM,
        Pollutant::Co => CO_PPM,
        Pollutant::So2 => SO2_PPB,
        Pollutant::No2 => NO2_PPB,
    })
}

/// Maps one pollutant concentration to its AQI sub-index.
pub fn pollutant_aqi(pollutant: Pollutant, concentration: f64) -> Result<f64, AppError> {
    if !concentration.is_finite() || concentration < 0.0 {
        return Err(AppError::AqiOutOfRange {
            pollutant: pollutant.as_str().to_string(),
            value: concentration,
        });
    }

    let table = breakpoints_for(pollutant).expect("every Pollutant variant has a table");
    for &(bp_lo, bp_hi, aqi_lo, aqi_hi) in table {
        if concentration >= bp_lo && concentration <= bp_hi {
            return Ok((aqi_hi - aqi_lo) / (bp_hi - bp_lo) * (concentration - bp_lo) + aqi_lo);
        }
    }

    Err(AppError::AqiOutOfRange {
        pollutant: pollutant.as_str().to_string(),
        value: concentration,
    })
}

/// Overall AQI is the worst (max) sub-index across whichever pollutants were
/// supplied; the one that produced it is reported as `dominant_pollutant`.
pub fn overall_aqi(concentrations: &[(Pollutant, f64)]) -> Option<(f64, Pollutant)> {
    concentrations
        .iter()
        .filter_map(|&(p, c)| pollutant_aqi(p, c).ok().map(|aqi| (aqi, p)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(aqi, p)| (aqi, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pm25_good_boundary() {
        let aqi = pollutant_aqi(Pollutant::Pm25, 12.0).unwrap();
        assert!((aqi - 50.0).abs() < 1e-9);
        assert_eq!(AqiCategory::from_aqi(aqi), AqiCategory::Good);
    }

    #[test]
    fn test_pm25_usg_example() {
        let aqi = pollutant_aqi(Pollutant::Pm25, 35.5).unwrap();
        assert!((aqi - 101.0).abs() < 1e-6);
        assert_eq!(
            AqiCategory::from_aqi(aqi),
            AqiCategory::UnhealthyForSensitiveGroups
        );
    }

    #[test]
    fn test_negative_concentration_rejected() {
        assert!(pollutant_aqi(Pollutant::Pm25, -1.0).is_err());
    }

    #[test]
    fn test_overall_aqi_picks_dominant() {
        let (aqi, dominant) = overall_aqi(&[(Pollutant::Pm25, 12.0), (Pollutant::Pm10, 200.0)]).unwrap();
        assert_eq!(dominant, Pollutant::Pm10);
        assert!(aqi > 50.0);
    }

    #[test]
    fn test_category_color_hex() {
        assert_eq!(AqiCategory::Good.color_hex(), "#00E400");
        assert_eq!(AqiCategory::Hazardous.color_hex(), "#7E0023");
    }
}
