//! Clinical threshold bands
//!
//! Bands are loaded once at startup (defaults or a JSON file) and shared
//! read-only afterwards. They are distinct from the user-editable
//! `EmergencyConfig`.

use serde::{Deserialize, Serialize};

use crate::error::AlertError;

/// Heart rate band (bpm), two-sided
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateBand {
    pub min: f64,
    pub max: f64,
    pub critical_min: f64,
    pub critical_max: f64,
}

impl Default for HeartRateBand {
    fn default() -> Self {
        Self {
            min: 50.0,
            max: 120.0,
            critical_min: 40.0,
            critical_max: 130.0,
        }
    }
}

/// SpO2 band (percent), lower is worse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spo2Band {
    pub warning: f64,
    pub min: f64,
    pub critical: f64,
}

impl Default for Spo2Band {
    fn default() -> Self {
        Self {
            warning: 94.0,
            min: 90.0,
            critical: 85.0,
        }
    }
}

/// Temperature band (celsius), upper is worse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureBand {
    pub normal: f64,
    pub fever: f64,
    pub high_fever: f64,
}

impl Default for TemperatureBand {
    fn default() -> Self {
        Self {
            normal: 37.5,
            fever: 38.0,
            high_fever: 39.0,
        }
    }
}

/// All bands used by the classifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBands {
    #[serde(default)]
    pub heart_rate: HeartRateBand,
    #[serde(default)]
    pub spo2: Spo2Band,
    #[serde(default)]
    pub temperature: TemperatureBand,
}

impl ThresholdBands {
    /// Load bands from JSON and check they are consistent
    pub fn from_json(json: &str) -> Result<Self, AlertError> {
        let bands: Self = serde_json::from_str(json)?;
        bands.validate()?;
        Ok(bands)
    }

    /// Serialize bands to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check that every band is strictly ordered from most to least severe
    pub fn validate(&self) -> Result<(), AlertError> {
        let hr = &self.heart_rate;
        if !(hr.critical_min < hr.min && hr.min < hr.max && hr.max < hr.critical_max) {
            return Err(AlertError::Configuration(format!(
                "heart rate bands must satisfy critical_min < min < max < critical_max (got {} / {} / {} / {})",
                hr.critical_min, hr.min, hr.max, hr.critical_max
            )));
        }

        let spo2 = &self.spo2;
        if !(spo2.critical < spo2.min && spo2.min < spo2.warning) {
            return Err(AlertError::Configuration(format!(
                "SpO2 bands must satisfy critical < min < warning (got {} / {} / {})",
                spo2.critical, spo2.min, spo2.warning
            )));
        }

        let temp = &self.temperature;
        if !(temp.normal < temp.fever && temp.fever < temp.high_fever) {
            return Err(AlertError::Configuration(format!(
                "temperature bands must satisfy normal < fever < high_fever (got {} / {} / {})",
                temp.normal, temp.fever, temp.high_fever
            )));
        }

        Ok(())
    }
}
