//! Insight generation
//!
//! Turns classifier output into display records. One insight per alert, or a
//! single "all normal" insight when there are none, plus an activity insight
//! whenever the step count is high.

use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

use crate::types::{HealthInsight, InsightSeverity, ThresholdAlert, VitalParameter, VitalsReading};

/// Step count above which an activity insight is added
pub const ACTIVITY_STEP_THRESHOLD: f64 = 100.0;

const GENERIC_ICON: &str = "⚠️";
const SUCCESS_ICON: &str = "✅";
const ACTIVITY_ICON: &str = "🏃";

/// Generator for health insights
pub struct InsightGenerator;

impl InsightGenerator {
    /// Generate insights stamped with the current time
    pub fn generate(reading: &VitalsReading, alerts: &[ThresholdAlert]) -> Vec<HealthInsight> {
        Self::generate_at(reading, alerts, Utc::now())
    }

    /// Generate insights stamped with `now`
    pub fn generate_at(
        reading: &VitalsReading,
        alerts: &[ThresholdAlert],
        now: DateTime<Utc>,
    ) -> Vec<HealthInsight> {
        let mut insights = Vec::with_capacity(alerts.len() + 1);

        if alerts.is_empty() {
            insights.push(Self::insight(
                InsightSeverity::Success,
                "All Systems Normal".to_string(),
                "Your vital signs are within healthy ranges. Keep up the great work!".to_string(),
                SUCCESS_ICON,
                now,
            ));
        } else {
            for alert in alerts {
                insights.push(Self::insight(
                    alert.severity.into(),
                    alert.parameter.as_str().to_uppercase(),
                    alert.message.clone(),
                    icon_for_parameter(&alert.parameter),
                    now,
                ));
            }
        }

        if reading.motion > ACTIVITY_STEP_THRESHOLD {
            insights.push(Self::insight(
                InsightSeverity::Info,
                "Active Lifestyle".to_string(),
                format!(
                    "You're staying active with {} steps! Remember to stay hydrated.",
                    reading.motion
                ),
                ACTIVITY_ICON,
                now,
            ));
        }

        insights
    }

    fn insight(
        severity: InsightSeverity,
        title: String,
        message: String,
        icon: &str,
        now: DateTime<Utc>,
    ) -> HealthInsight {
        HealthInsight {
            id: Uuid::new_v4(),
            severity,
            title,
            message,
            produced_at: now,
            // Shown to the wearer, so wall-clock local time
            time: now.with_timezone(&Local).format("%H:%M:%S").to_string(),
            icon: icon.to_string(),
        }
    }
}

/// Display icon for a vital parameter
pub fn icon_for_parameter(parameter: &VitalParameter) -> &'static str {
    match parameter {
        VitalParameter::HeartRate => "❤️",
        VitalParameter::SpO2 => "🫁",
        VitalParameter::Temperature => "🌡️",
        VitalParameter::Other(_) => GENERIC_ICON,
    }
}
