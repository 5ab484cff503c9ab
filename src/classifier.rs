//! Threshold classification
//!
//! Maps a vitals reading to zero or more alerts. Each parameter is tested
//! against its bands from most to least severe and yields at most one alert.
//! Output order is heart rate, SpO2, temperature.

use std::sync::Arc;

use crate::thresholds::ThresholdBands;
use crate::types::{AlertSeverity, ThresholdAlert, VitalParameter, VitalsReading};

/// Stateless classifier over a fixed set of bands
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    bands: Arc<ThresholdBands>,
}

impl ThresholdClassifier {
    /// Accepts owned bands or an `Arc` shared with other classifiers
    pub fn new(bands: impl Into<Arc<ThresholdBands>>) -> Self {
        Self {
            bands: bands.into(),
        }
    }

    pub fn bands(&self) -> &ThresholdBands {
        &self.bands
    }

    /// Classify a reading. Values are taken as given, without validation.
    pub fn classify(&self, reading: &VitalsReading) -> Vec<ThresholdAlert> {
        [
            self.check_heart_rate(reading.heart_rate),
            self.check_spo2(reading.spo2),
            self.check_temperature(reading.temperature),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn check_heart_rate(&self, hr: f64) -> Option<ThresholdAlert> {
        let band = &self.bands.heart_rate;
        let (severity, message) = if hr > band.critical_max {
            (
                AlertSeverity::Critical,
                "🚨 Critical: Extremely high heart rate detected",
            )
        } else if hr > band.max {
            (AlertSeverity::Warning, "⚠️ High heart rate detected")
        } else if hr < band.critical_min && hr > 0.0 {
            (
                AlertSeverity::Critical,
                "🚨 Critical: Extremely low heart rate detected",
            )
        } else if hr < band.min && hr > 0.0 {
            (AlertSeverity::Warning, "⚠️ Low heart rate detected")
        } else {
            return None;
        };

        Some(alert(severity, VitalParameter::HeartRate, message, hr))
    }

    fn check_spo2(&self, spo2: f64) -> Option<ThresholdAlert> {
        // Zero means the oximeter has not reported yet
        if spo2 <= 0.0 {
            return None;
        }

        let band = &self.bands.spo2;
        let (severity, message) = if spo2 < band.critical {
            (
                AlertSeverity::Critical,
                "🚨 Critical: Severe oxygen deprivation",
            )
        } else if spo2 < band.min {
            (
                AlertSeverity::Critical,
                "🚨 Critical: Low oxygen levels detected",
            )
        } else if spo2 < band.warning {
            (AlertSeverity::Warning, "⚠️ Low oxygen saturation")
        } else {
            return None;
        };

        Some(alert(severity, VitalParameter::SpO2, message, spo2))
    }

    fn check_temperature(&self, temp: f64) -> Option<ThresholdAlert> {
        let band = &self.bands.temperature;
        let (severity, message) = if temp > band.high_fever {
            (
                AlertSeverity::Critical,
                "🚨 Critical: Very high fever detected",
            )
        } else if temp > band.fever {
            (
                AlertSeverity::Warning,
                "🌡️ High temperature - possible fever",
            )
        } else if temp > band.normal {
            (AlertSeverity::Warning, "⚠️ Elevated temperature")
        } else {
            return None;
        };

        Some(alert(severity, VitalParameter::Temperature, message, temp))
    }
}

fn alert(
    severity: AlertSeverity,
    parameter: VitalParameter,
    message: &str,
    value: f64,
) -> ThresholdAlert {
    ThresholdAlert {
        severity,
        parameter,
        message: message.to_string(),
        value,
    }
}

/// Classify a reading against the default bands
pub fn classify_vitals(reading: &VitalsReading) -> Vec<ThresholdAlert> {
    ThresholdClassifier::default().classify(reading)
}

/// Whether any alert is critical
pub fn is_critical(alerts: &[ThresholdAlert]) -> bool {
    alerts.iter().any(ThresholdAlert::is_critical)
}

/// Alert messages in classification order
pub fn alert_messages(alerts: &[ThresholdAlert]) -> Vec<String> {
    alerts.iter().map(|a| a.message.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn reading(hr: f64, spo2: f64, temp: f64) -> VitalsReading {
        VitalsReading::new(hr, spo2, temp, 0.0)
    }

    #[test]
    fn test_high_heart_rate_is_critical() {
        let alerts = classify_vitals(&reading(135.0, 98.0, 36.6));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].parameter, VitalParameter::HeartRate);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].value, 135.0);
        assert!(is_critical(&alerts));
    }

    #[test]
    fn test_fever_is_warning() {
        let alerts = classify_vitals(&reading(70.0, 96.0, 38.2));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].parameter, VitalParameter::Temperature);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].message, "🌡️ High temperature - possible fever");
        assert!(!is_critical(&alerts));
    }

    #[test]
    fn test_low_spo2_is_critical() {
        let alerts = classify_vitals(&reading(70.0, 80.0, 36.5));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].parameter, VitalParameter::SpO2);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].message, "🚨 Critical: Severe oxygen deprivation");
    }

    #[test]
    fn test_spo2_below_min_is_also_critical() {
        let alerts = classify_vitals(&reading(70.0, 88.0, 36.5));
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].message, "🚨 Critical: Low oxygen levels detected");

        let alerts = classify_vitals(&reading(70.0, 92.0, 36.5));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_heart_rate_bands() {
        let cases = [
            (125.0, Some(AlertSeverity::Warning)),
            (130.0, Some(AlertSeverity::Warning)),
            (120.0, None),
            (50.0, None),
            (45.0, Some(AlertSeverity::Warning)),
            (35.0, Some(AlertSeverity::Critical)),
            (0.0, None),
        ];

        for (hr, expected) in cases {
            let alerts = classify_vitals(&reading(hr, 98.0, 36.6));
            assert_eq!(alerts.first().map(|a| a.severity), expected, "hr = {hr}");
        }
    }

    #[test]
    fn test_temperature_bands_resolve_highest_first() {
        let elevated = classify_vitals(&reading(70.0, 98.0, 37.8));
        assert_eq!(elevated[0].message, "⚠️ Elevated temperature");

        let high = classify_vitals(&reading(70.0, 98.0, 39.4));
        assert_eq!(high[0].severity, AlertSeverity::Critical);

        assert!(classify_vitals(&reading(70.0, 98.0, 37.5)).is_empty());
    }

    #[test]
    fn test_cold_start_reading_is_quiet() {
        assert!(classify_vitals(&reading(0.0, 0.0, 36.5)).is_empty());
    }

    #[test]
    fn test_alert_order_is_stable() {
        let alerts = classify_vitals(&reading(140.0, 80.0, 39.5));
        let params: Vec<_> = alerts.iter().map(|a| a.parameter.clone()).collect();

        assert_eq!(
            params,
            vec![
                VitalParameter::HeartRate,
                VitalParameter::SpO2,
                VitalParameter::Temperature
            ]
        );
        assert_eq!(alert_messages(&alerts).len(), 3);
    }

    #[test]
    fn test_custom_bands() {
        let mut bands = ThresholdBands::default();
        bands.heart_rate.critical_max = 150.0;
        let classifier = ThresholdClassifier::new(bands);

        let alerts = classifier.classify(&reading(135.0, 98.0, 36.6));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_classifiers_share_loaded_bands() {
        let mut bands = ThresholdBands::default();
        bands.spo2.min = 86.0;
        let bands = Arc::new(bands);

        let first = ThresholdClassifier::new(bands.clone());
        let second = ThresholdClassifier::new(bands.clone());

        assert!(std::ptr::eq(first.bands(), second.bands()));
        assert_eq!(Arc::strong_count(&bands), 3);
        assert_eq!(
            second.classify(&reading(70.0, 87.0, 36.6))[0].severity,
            AlertSeverity::Warning
        );
    }

    proptest! {
        #[test]
        fn prop_zero_heart_rate_never_alerts(spo2 in -10.0f64..110.0, temp in 30.0f64..45.0) {
            let alerts = classify_vitals(&reading(0.0, spo2, temp));
            prop_assert!(alerts.iter().all(|a| a.parameter != VitalParameter::HeartRate));
        }

        #[test]
        fn prop_at_most_one_alert_per_parameter(
            hr in -50.0f64..300.0,
            spo2 in -10.0f64..110.0,
            temp in 25.0f64..45.0,
        ) {
            let alerts = classify_vitals(&reading(hr, spo2, temp));
            for param in [VitalParameter::HeartRate, VitalParameter::SpO2, VitalParameter::Temperature] {
                prop_assert!(alerts.iter().filter(|a| a.parameter == param).count() <= 1);
            }
        }
    }
}
