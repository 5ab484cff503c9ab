//! Engine orchestration
//!
//! This module provides the public entry point of the alert engine. Each
//! reading flows one way: classifier → alerts → {insights, escalation}.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::classifier::ThresholdClassifier;
use crate::clock::{Clock, SystemClock};
use crate::cooldown::{CooldownGate, DEFAULT_COOLDOWN};
use crate::error::AlertError;
use crate::escalation::{
    answered, AttemptId, Collaborators, Committed, Dispatched, EscalationCoordinator,
    EscalationOutcome, EscalationPhase, OutcomeSlot, PromptOption, Telephony, UserPrompt,
    AUTO_EXECUTE_DELAY,
};
use crate::insights::InsightGenerator;
use crate::thresholds::ThresholdBands;
use crate::types::{EmergencyConfig, HealthInsight, ThresholdAlert, VitalsReading};

/// Display collaborator receiving generated insights
pub trait InsightSink: Send + Sync {
    fn on_insights(&self, insights: &[HealthInsight]);
}

/// Called with the outcome of every countdown that fires
pub type CountdownListener = Arc<dyn Fn(&EscalationOutcome) + Send + Sync>;

/// Static engine options, fixed for the engine's lifetime
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub bands: ThresholdBands,
    pub cooldown: Duration,
    pub countdown: Duration,
    /// Initial emergency settings
    pub config: EmergencyConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            bands: ThresholdBands::default(),
            cooldown: DEFAULT_COOLDOWN,
            countdown: AUTO_EXECUTE_DELAY,
            config: EmergencyConfig::default(),
        }
    }
}

/// Everything the engine produced for one reading
#[derive(Debug, Clone, Serialize)]
pub struct ReadingReport {
    pub alerts: Vec<ThresholdAlert>,
    pub insights: Vec<HealthInsight>,
    pub escalation: EscalationOutcome,
    /// Earlier countdown that came due and fired before this reading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fired: Option<EscalationOutcome>,
}

impl ReadingReport {
    /// Fold in the prompt's immediate answer
    pub(crate) fn apply_answer(&mut self, answer: Dispatched<Result<EscalationOutcome, AlertError>>) {
        let pending = std::mem::replace(&mut self.escalation, EscalationOutcome::NotCritical);
        self.escalation = answered(pending, answer);
    }
}

/// Everything the engine reports to, cloned so it can run without the engine
#[derive(Clone)]
pub(crate) struct Outlets {
    collaborators: Collaborators,
    sink: Option<Arc<dyn InsightSink>>,
    listener: Option<CountdownListener>,
}

impl Outlets {
    pub(crate) fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Dispatch a user action and report any countdown it fired first
    pub(crate) fn settle<T: OutcomeSlot>(&self, committed: Committed<T>) -> T {
        self.dispatch(committed).value
    }

    /// Dispatch a poll and report the countdown it fired
    pub(crate) fn fire(
        &self,
        committed: Committed<Option<EscalationOutcome>>,
    ) -> Option<EscalationOutcome> {
        let fired = self.settle(committed);
        self.notify(fired.as_ref());
        fired
    }

    pub(crate) fn dispatch<T: OutcomeSlot>(&self, committed: Committed<T>) -> Dispatched<T> {
        let dispatched = committed.dispatch(&self.collaborators);
        self.notify(dispatched.fired.as_ref());
        dispatched
    }

    fn notify(&self, fired: Option<&EscalationOutcome>) {
        if let (Some(listener), Some(outcome)) = (&self.listener, fired) {
            listener(outcome);
        }
    }
}

/// Reading whose state change is committed but not yet reported
pub(crate) struct StagedReading {
    alerts: Vec<ThresholdAlert>,
    insights: Vec<HealthInsight>,
    committed: Committed<EscalationOutcome>,
}

impl StagedReading {
    pub(crate) fn escalation(&self) -> &EscalationOutcome {
        self.committed.value()
    }

    /// Deliver insights, prompt and calls
    ///
    /// Also returns the answer the prompt gave before returning, if any.
    pub(crate) fn finish(self, outlets: &Outlets) -> (ReadingReport, Option<(AttemptId, PromptOption)>) {
        if let Some(sink) = &outlets.sink {
            sink.on_insights(&self.insights);
        }

        let dispatched = outlets.dispatch(self.committed);
        let report = ReadingReport {
            alerts: self.alerts,
            insights: self.insights,
            escalation: dispatched.value,
            fired: dispatched.fired,
        };
        (report, dispatched.answer)
    }
}

/// Health alert engine
pub struct AlertEngine {
    classifier: ThresholdClassifier,
    coordinator: EscalationCoordinator,
    sink: Option<Arc<dyn InsightSink>>,
    listener: Option<CountdownListener>,
}

impl AlertEngine {
    /// Create an engine on the wall clock
    pub fn new(
        options: EngineOptions,
        telephony: Arc<dyn Telephony>,
        prompt: Arc<dyn UserPrompt>,
    ) -> Self {
        Self::with_clock(options, Arc::new(SystemClock), telephony, prompt)
    }

    /// Create an engine on an injected clock
    pub fn with_clock(
        options: EngineOptions,
        clock: Arc<dyn Clock>,
        telephony: Arc<dyn Telephony>,
        prompt: Arc<dyn UserPrompt>,
    ) -> Self {
        let coordinator = EscalationCoordinator::new(
            options.config,
            CooldownGate::new(options.cooldown),
            clock,
            telephony,
            prompt,
        )
        .with_countdown(options.countdown);

        Self {
            classifier: ThresholdClassifier::new(options.bands),
            coordinator,
            sink: None,
            listener: None,
        }
    }

    /// Attach the display collaborator
    pub fn with_insight_sink(mut self, sink: Arc<dyn InsightSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Observe every countdown that fires, whichever event fired it
    pub fn set_countdown_listener(&mut self, listener: CountdownListener) {
        self.listener = Some(listener);
    }

    /// Process one reading
    pub fn on_reading(&mut self, reading: &VitalsReading) -> ReadingReport {
        let outlets = self.outlets();
        let (mut report, answer) = self.stage_reading(reading).finish(&outlets);

        if let Some((attempt, option)) = answer {
            let committed = self.coordinator.stage_answer(attempt, option);
            report.apply_answer(outlets.dispatch(committed));
        }
        report
    }

    /// Classify and commit a reading without reporting it
    pub(crate) fn stage_reading(&mut self, reading: &VitalsReading) -> StagedReading {
        let alerts = self.classifier.classify(reading);
        let insights =
            InsightGenerator::generate_at(reading, &alerts, self.coordinator.clock().now_utc());
        let committed = self.coordinator.stage_reading(reading, &alerts);

        tracing::debug!(
            heart_rate = reading.heart_rate,
            spo2 = reading.spo2,
            temperature = reading.temperature,
            alerts = alerts.len(),
            escalation = ?committed.value(),
            fired = ?committed.fired(),
            "Reading processed"
        );

        StagedReading {
            alerts,
            insights,
            committed,
        }
    }

    pub(crate) fn stage_answer(
        &mut self,
        attempt: AttemptId,
        option: PromptOption,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        self.coordinator.stage_answer(attempt, option)
    }

    pub(crate) fn stage_cancel(
        &mut self,
        attempt: AttemptId,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        self.coordinator.stage_cancel(attempt)
    }

    pub(crate) fn stage_call_now(
        &mut self,
        attempt: AttemptId,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        self.coordinator.stage_call_now(attempt)
    }

    pub(crate) fn stage_poll(&mut self) -> Committed<Option<EscalationOutcome>> {
        self.coordinator.stage_poll()
    }

    pub(crate) fn outlets(&self) -> Outlets {
        Outlets {
            collaborators: self.coordinator.collaborators().clone(),
            sink: self.sink.clone(),
            listener: self.listener.clone(),
        }
    }

    /// Replace the emergency settings; applies from the next reading on
    pub fn set_config(&mut self, config: EmergencyConfig) {
        tracing::info!(
            auto_emergency = config.auto_emergency_enabled,
            has_number = config.has_emergency_number(),
            "Emergency settings updated"
        );
        self.coordinator.set_config(config);
    }

    pub fn config(&self) -> &EmergencyConfig {
        self.coordinator.config()
    }

    pub fn classifier(&self) -> &ThresholdClassifier {
        &self.classifier
    }

    pub fn phase(&self) -> EscalationPhase {
        self.coordinator.phase()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.coordinator.clock()
    }

    pub fn cancel(&mut self, attempt: AttemptId) -> Result<EscalationOutcome, AlertError> {
        let committed = self.coordinator.stage_cancel(attempt);
        self.outlets().settle(committed)
    }

    pub fn call_now(&mut self, attempt: AttemptId) -> Result<EscalationOutcome, AlertError> {
        let committed = self.coordinator.stage_call_now(attempt);
        self.outlets().settle(committed)
    }

    /// Fire a due countdown, if any
    pub fn poll(&mut self) -> Option<EscalationOutcome> {
        let committed = self.coordinator.stage_poll();
        self.outlets().fire(committed)
    }

    pub fn manual_call(&self, number: &str) -> Result<bool, AlertError> {
        self.coordinator.manual_call(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::escalation::testing::{RecordingTelephony, ScriptedPrompt};
    use crate::escalation::ExecutionTrigger;
    use crate::types::InsightSeverity;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<HealthInsight>>>,
    }

    impl InsightSink for CollectingSink {
        fn on_insights(&self, insights: &[HealthInsight]) {
            self.batches.lock().push(insights.to_vec());
        }
    }

    fn engine(config: EmergencyConfig) -> (AlertEngine, Arc<ManualClock>, Arc<RecordingTelephony>, Arc<CollectingSink>) {
        let clock = Arc::new(ManualClock::new(0));
        let telephony = Arc::new(RecordingTelephony::default());
        let sink = Arc::new(CollectingSink::default());
        let options = EngineOptions {
            config,
            ..EngineOptions::default()
        };
        let engine = AlertEngine::with_clock(
            options,
            clock.clone(),
            telephony.clone(),
            Arc::new(ScriptedPrompt::deferred()),
        )
        .with_insight_sink(sink.clone());
        (engine, clock, telephony, sink)
    }

    #[test]
    fn test_normal_reading_report() {
        let (mut engine, _, _, sink) = engine(EmergencyConfig::auto_emergency("911"));
        let report = engine.on_reading(&VitalsReading::new(72.0, 98.0, 36.6, 150.0));

        assert!(report.alerts.is_empty());
        assert_eq!(report.insights.len(), 2);
        assert_eq!(report.escalation, EscalationOutcome::NotCritical);
        assert_eq!(sink.batches.lock().len(), 1);
    }

    #[test]
    fn test_critical_reading_runs_full_protocol() {
        let (mut engine, clock, telephony, _) = engine(EmergencyConfig::auto_emergency("911"));
        let report = engine.on_reading(&VitalsReading::new(70.0, 80.0, 36.5, 0.0));

        assert_eq!(report.insights[0].severity, InsightSeverity::Critical);
        assert!(matches!(report.escalation, EscalationOutcome::Pending { .. }));

        clock.advance(AUTO_EXECUTE_DELAY);
        assert!(engine.poll().is_some());
        assert_eq!(telephony.calls(), vec!["911".to_string()]);
    }

    #[test]
    fn test_set_config_applies_to_next_reading() {
        let (mut engine, _, _, _) = engine(EmergencyConfig::default());
        let critical = VitalsReading::new(135.0, 98.0, 36.6, 0.0);

        assert_eq!(engine.on_reading(&critical).escalation, EscalationOutcome::Disabled);

        engine.set_config(EmergencyConfig::auto_emergency("911"));
        assert!(matches!(
            engine.on_reading(&critical).escalation,
            EscalationOutcome::Pending { .. }
        ));
    }

    #[test]
    fn test_insights_produced_even_when_escalation_suppressed() {
        let (mut engine, clock, _, sink) = engine(EmergencyConfig::auto_emergency("911"));
        let critical = VitalsReading::new(135.0, 98.0, 36.6, 0.0);

        let first = engine.on_reading(&critical);
        if let EscalationOutcome::Pending { attempt, .. } = first.escalation {
            engine.cancel(attempt).unwrap();
        }

        clock.advance(Duration::from_secs(30));
        let second = engine.on_reading(&critical);
        assert_eq!(second.escalation, EscalationOutcome::CoolingDown);
        assert_eq!(second.insights.len(), 1);
        assert_eq!(sink.batches.lock().len(), 2);
    }

    #[test]
    fn test_countdown_fired_by_later_reading_reaches_report_and_listener() {
        let (mut engine, clock, telephony, _) = engine(EmergencyConfig::auto_emergency("911"));
        let heard = Arc::new(Mutex::new(Vec::new()));
        let log = heard.clone();
        engine.set_countdown_listener(Arc::new(move |outcome: &EscalationOutcome| {
            log.lock().push(outcome.clone());
        }));
        let critical = VitalsReading::new(135.0, 98.0, 36.6, 0.0);

        let first = engine.on_reading(&critical);
        assert!(matches!(first.escalation, EscalationOutcome::Pending { .. }));
        assert_eq!(first.fired, None);

        clock.advance(AUTO_EXECUTE_DELAY);
        let second = engine.on_reading(&critical);

        assert_eq!(second.escalation, EscalationOutcome::CoolingDown);
        assert!(matches!(
            second.fired,
            Some(EscalationOutcome::Executed {
                trigger: ExecutionTrigger::Countdown,
                ..
            })
        ));
        assert_eq!(heard.lock().as_slice(), second.fired.as_slice());
        assert_eq!(telephony.calls(), vec!["911".to_string()]);
        assert_eq!(engine.poll(), None);
    }

    #[test]
    fn test_insights_stamped_by_engine_clock() {
        let (mut engine, clock, _, _) = engine(EmergencyConfig::default());
        clock.set(1_705_329_005_000);

        let report = engine.on_reading(&VitalsReading::new(72.0, 98.0, 36.6, 0.0));
        assert_eq!(
            report.insights[0].produced_at.to_rfc3339(),
            "2024-01-15T14:30:05+00:00"
        );
    }
}
