//! VitaBand Alerts - On-device health alert engine for VitaBand wearable vitals
//!
//! Each reading is evaluated through a one-way flow: threshold classification
//! → insight generation → emergency escalation (cooldown gate, countdown
//! prompt, call placement).
//!
//! ## Modules
//!
//! - **Classification**: Compare readings against configurable threshold bands
//! - **Escalation**: Cooldown-gated emergency protocol with a cancellable countdown
//! - **Runtime**: Thread-safe engine handle and telemetry transport wiring

pub mod classifier;
pub mod clock;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod insights;
pub mod runtime;
pub mod thresholds;
pub mod transport;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{classify_vitals, is_critical, ThresholdClassifier};
pub use engine::{AlertEngine, EngineOptions, InsightSink, ReadingReport};
pub use error::AlertError;
pub use escalation::{EscalationOutcome, EscalationPhase, Telephony, UserPrompt};
pub use insights::InsightGenerator;
pub use runtime::SharedEngine;
pub use thresholds::ThresholdBands;
pub use types::{EmergencyConfig, HealthInsight, ThresholdAlert, VitalsReading};

/// Library version
pub const VITABAND_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "vitaband-alerts";
