//! Core types for the VitaBand alert engine
//!
//! This module defines the data that flows through the engine: the vitals
//! reading delivered by the transport, the alerts produced by the classifier,
//! the insights handed to the display, and the user's emergency settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One telemetry sample from the wearable
///
/// A zero heart rate or SpO2 means the sensor has not reported yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsReading {
    /// Heart rate (bpm)
    #[serde(default)]
    pub heart_rate: f64,
    /// Blood oxygen saturation (percent, 0-100)
    #[serde(default, rename = "spO2", alias = "spo2")]
    pub spo2: f64,
    /// Body temperature (celsius)
    #[serde(default)]
    pub temperature: f64,
    /// Step count
    #[serde(default)]
    pub motion: f64,
    /// Device-side timestamp, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl VitalsReading {
    /// Create a reading without a device timestamp
    pub fn new(heart_rate: f64, spo2: f64, temperature: f64, motion: f64) -> Self {
        Self {
            heart_rate,
            spo2,
            temperature,
            motion,
            timestamp: None,
        }
    }

    /// Parse a reading from its JSON wire form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Vital parameter an alert refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VitalParameter {
    #[serde(rename = "heartRate")]
    HeartRate,
    #[serde(rename = "spO2")]
    SpO2,
    #[serde(rename = "temperature")]
    Temperature,
    /// Parameters reported by other producers of alert records
    #[serde(untagged)]
    Other(String),
}

impl VitalParameter {
    pub fn as_str(&self) -> &str {
        match self {
            VitalParameter::HeartRate => "heartRate",
            VitalParameter::SpO2 => "spO2",
            VitalParameter::Temperature => "temperature",
            VitalParameter::Other(name) => name.as_str(),
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A single band violation found by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub severity: AlertSeverity,
    pub parameter: VitalParameter,
    pub message: String,
    /// The reading value that crossed the band
    pub value: f64,
}

impl ThresholdAlert {
    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}

/// Insight severity, as rendered by the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSeverity {
    Success,
    Info,
    Warning,
    Critical,
}

impl From<AlertSeverity> for InsightSeverity {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Warning => InsightSeverity::Warning,
            AlertSeverity::Critical => InsightSeverity::Critical,
        }
    }
}

/// Human-readable insight record handed to the display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInsight {
    pub id: Uuid,
    pub severity: InsightSeverity,
    pub title: String,
    pub message: String,
    /// When the insight was generated (UTC)
    pub produced_at: DateTime<Utc>,
    /// Display time string (HH:MM:SS)
    pub time: String,
    pub icon: String,
}

/// User emergency settings
///
/// Owned by the host application. The engine keeps a read-only snapshot that
/// is replaced wholesale through `set_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyConfig {
    /// Whether critical readings may escalate to an automatic call
    #[serde(default)]
    pub auto_emergency_enabled: bool,
    /// Number dialled on escalation and for manual calls
    #[serde(default)]
    pub emergency_number: String,
    /// Notify emergency contacts (surfaced to the host, not acted on here)
    #[serde(default)]
    pub notify_contacts: bool,
    /// Play the critical alert sound
    #[serde(default = "default_true", alias = "criticalAlertSound")]
    pub critical_alert_sound_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            auto_emergency_enabled: false,
            emergency_number: String::new(),
            notify_contacts: false,
            critical_alert_sound_enabled: true,
        }
    }
}

impl EmergencyConfig {
    /// Settings with automatic escalation switched on for the given number
    pub fn auto_emergency(number: impl Into<String>) -> Self {
        Self {
            auto_emergency_enabled: true,
            emergency_number: number.into(),
            ..Self::default()
        }
    }

    /// Whether a non-blank emergency number is configured
    pub fn has_emergency_number(&self) -> bool {
        !self.emergency_number.trim().is_empty()
    }

    /// Load settings from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize settings to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
