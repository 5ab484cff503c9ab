//! Telemetry transport capability
//!
//! The engine depends only on the [`Transport`] trait. A wire-protocol client
//! can be substituted for [`LoopbackTransport`], the in-memory implementation
//! used for development, demos and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::ReadingReport;
use crate::error::AlertError;
use crate::runtime::SharedEngine;
use crate::types::VitalsReading;

/// Topic carrying vitals readings
pub const VITALS_TOPIC: &str = "vitaband/vitals";
/// Topic carrying device-side explanations
pub const EXPLANATION_TOPIC: &str = "vitaband/explanation";
/// Topic carrying device status
pub const DEVICE_STATUS_TOPIC: &str = "vitaband/device/status";

/// Default broker port
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Handler for messages on a subscribed topic
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives the engine's report for each reading delivered by the transport
pub type ReportHandler = Arc<dyn Fn(&ReadingReport) + Send + Sync>;

/// Publish/subscribe telemetry transport
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), AlertError>;

    /// Register the handler for a topic, replacing any previous one
    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), AlertError>;

    fn publish(&self, topic: &str, payload: &str) -> Result<(), AlertError>;

    /// Drop the connection and all subscriptions
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Broker host and port parsed from a `mqtt://host:port` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, AlertError> {
        let rest = url.trim().trim_start_matches("mqtt://");
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    AlertError::Transport(format!("invalid broker port '{}': {}", port, e))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_BROKER_PORT),
        };

        if host.is_empty() {
            return Err(AlertError::Transport(format!(
                "broker URL '{}' has no host",
                url
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// In-memory transport
///
/// Published messages are delivered to the local subscriber of the topic.
/// [`LoopbackTransport::inject`] delivers a message as if it came from the
/// device.
pub struct LoopbackTransport {
    address: BrokerAddress,
    connected: AtomicBool,
    subscriptions: RwLock<HashMap<String, MessageHandler>>,
}

impl LoopbackTransport {
    pub fn new(address: BrokerAddress) -> Self {
        Self {
            address,
            connected: AtomicBool::new(false),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    /// Deliver a message to the topic's subscriber. Returns whether anyone
    /// was subscribed.
    pub fn inject(&self, topic: &str, payload: &str) -> bool {
        // Clone the handler out so it can call back into the transport
        let handler = self.subscriptions.read().get(topic).cloned();
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> Result<(), AlertError> {
        tracing::info!(broker = %self.address, "Connected to telemetry broker");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), AlertError> {
        self.subscriptions.write().insert(topic.to_string(), handler);
        tracing::info!(topic, "Subscribed to topic");
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), AlertError> {
        if !self.is_connected() {
            return Err(AlertError::Transport(
                "not connected to telemetry broker".to_string(),
            ));
        }
        tracing::debug!(topic, bytes = payload.len(), "Publishing");
        self.inject(topic, payload);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.write().clear();
        tracing::info!(broker = %self.address, "Disconnected from telemetry broker");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Feed readings published on the vitals topic into the engine
///
/// Payloads that do not parse as a reading are logged and dropped here.
pub fn attach_engine(
    transport: &dyn Transport,
    engine: SharedEngine,
    on_report: Option<ReportHandler>,
) -> Result<(), AlertError> {
    let handler: MessageHandler = Arc::new(move |payload: &str| {
        match VitalsReading::from_json(payload) {
            Ok(reading) => {
                let report = engine.on_reading(&reading);
                if let Some(on_report) = &on_report {
                    on_report(&report);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparsable vitals payload");
            }
        }
    });
    transport.subscribe(VITALS_TOPIC, handler)
}
