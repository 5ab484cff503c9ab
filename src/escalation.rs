//! Emergency escalation
//!
//! Drives the warn-then-act protocol for critical readings:
//!
//! 1. A critical reading passes the cooldown gate and the attempt becomes
//!    pending. The gate is recorded immediately.
//! 2. The user is prompted with Cancel / Call Now while a countdown runs.
//! 3. Whichever commits first wins: Cancel discards the attempt, Call Now or
//!    countdown expiry places the call.
//!
//! All state changes go through one transition function. Any event that
//! arrives at or after the deadline first lets the countdown commit, so a late
//! cancel can never undo an expiry.
//!
//! Committing and talking to collaborators are separate steps. A `stage_*`
//! call changes state and returns a [`Committed`] holding the prompt, notice
//! and call requests; [`Committed::dispatch`] then runs them. Callers that
//! guard the coordinator with a lock dispatch after releasing it, so a
//! collaborator may call back into the engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::{alert_messages, is_critical};
use crate::clock::Clock;
use crate::cooldown::CooldownGate;
use crate::error::{AlertError, CallError};
use crate::types::{EmergencyConfig, ThresholdAlert, VitalsReading};

/// Time the user has to cancel before the call is placed automatically
pub const AUTO_EXECUTE_DELAY: Duration = Duration::from_secs(10);

/// Identifier of one escalation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "esc-{}", self.0)
    }
}

/// Action offered to the user while an escalation is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOption {
    Cancel,
    CallNow,
}

/// Prompt raised when an escalation becomes pending
#[derive(Debug, Clone, Serialize)]
pub struct EscalationPrompt {
    pub attempt: AttemptId,
    pub title: String,
    pub message: String,
    /// Options with their button labels
    pub options: Vec<(PromptOption, String)>,
    /// Countdown after which the call is placed without an answer
    pub timeout: Duration,
    pub play_sound: bool,
    pub notify_contacts: bool,
}

/// How the prompt collaborator answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// The answer arrives later through `cancel` / `call_now`
    Deferred,
    /// The user answered before `prompt` returned
    Selected(PromptOption),
}

/// Kind of user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ConfigurationError,
    CapabilityFailure,
}

/// User-visible notice raised on a recoverable failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

/// Call placement capability (fire-and-forget)
pub trait Telephony: Send + Sync {
    fn place_call(&self, number: &str) -> Result<(), CallError>;
}

/// User interaction capability
pub trait UserPrompt: Send + Sync {
    /// Present a pending escalation
    fn prompt(&self, prompt: &EscalationPrompt) -> PromptResponse;

    /// Ask the user to confirm a manual emergency call
    fn confirm_call(&self, number: &str) -> bool;

    /// Show a notice
    fn notice(&self, notice: &Notice);
}

/// Observable coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EscalationPhase {
    Idle,
    Evaluating,
    Pending { attempt: AttemptId, deadline_ms: u64 },
}

/// What committed an executed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    CallNow,
    Countdown,
}


/// Result of executing an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    Called { number: String },
    MissingNumber,
    CallFailed { reason: String },
}

/// Outcome of one transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// Automatic escalation is switched off
    Disabled,
    /// No critical alert in the reading
    NotCritical,
    /// Critical, but the gate is still cooling down
    CoolingDown,
    /// Critical while another attempt is already pending
    AlreadyPending { attempt: AttemptId },
    Pending { attempt: AttemptId, deadline_ms: u64 },
    Cancelled { attempt: AttemptId },
    Executed {
        attempt: AttemptId,
        trigger: ExecutionTrigger,
        result: ExecutionResult,
    },
    /// Countdown expired after automatic escalation was switched off
    Withdrawn { attempt: AttemptId },
}

impl EscalationOutcome {
    fn call_failed(&mut self, of: AttemptId, reason: &str) {
        if let EscalationOutcome::Executed {
            attempt, result, ..
        } = self
        {
            if *attempt == of {
                *result = ExecutionResult::CallFailed {
                    reason: reason.to_string(),
                };
            }
        }
    }
}

/// Telephony and prompt capabilities
#[derive(Clone)]
pub struct Collaborators {
    pub telephony: Arc<dyn Telephony>,
    pub prompt: Arc<dyn UserPrompt>,
}

impl Collaborators {
    pub fn new(telephony: Arc<dyn Telephony>, prompt: Arc<dyn UserPrompt>) -> Self {
        Self { telephony, prompt }
    }

    /// Place a call, raising a notice on failure. Never retried.
    pub fn place_call(&self, number: &str) -> Result<(), AlertError> {
        self.telephony.place_call(number).map_err(|e| {
            tracing::error!(error = %e, "Error making emergency call");
            self.prompt.notice(&Notice {
                kind: NoticeKind::CapabilityFailure,
                title: "Error".to_string(),
                message: "Could not initiate emergency call".to_string(),
            });
            AlertError::from(e)
        })
    }

    /// User-initiated emergency call, outside the escalation protocol
    ///
    /// Returns `Ok(false)` if the user declined the confirmation.
    pub fn manual_call(&self, number: &str) -> Result<bool, AlertError> {
        if number.trim().is_empty() {
            self.prompt.notice(&Notice {
                kind: NoticeKind::ConfigurationError,
                title: "No Emergency Number".to_string(),
                message: "Please set an emergency contact number in Settings".to_string(),
            });
            return Err(AlertError::Configuration(
                "no emergency number configured".to_string(),
            ));
        }

        if !self.prompt.confirm_call(number) {
            return Ok(false);
        }

        self.place_call(number)?;
        Ok(true)
    }
}

/// Collaborator request produced by a transition
#[derive(Debug, Clone)]
enum Effect {
    Prompt(EscalationPrompt),
    Notice(Notice),
    PlaceCall { attempt: AttemptId, number: String },
}

/// Value that may carry an execution outcome to patch after dispatch
pub trait OutcomeSlot {
    fn outcome_mut(&mut self) -> Option<&mut EscalationOutcome>;
}

impl OutcomeSlot for EscalationOutcome {
    fn outcome_mut(&mut self) -> Option<&mut EscalationOutcome> {
        Some(self)
    }
}

impl OutcomeSlot for Option<EscalationOutcome> {
    fn outcome_mut(&mut self) -> Option<&mut EscalationOutcome> {
        self.as_mut()
    }
}

impl OutcomeSlot for Result<EscalationOutcome, AlertError> {
    fn outcome_mut(&mut self) -> Option<&mut EscalationOutcome> {
        self.as_mut().ok()
    }
}

/// State change committed by one event, with its collaborator requests
#[must_use = "prompts, notices and calls are lost unless the commit is dispatched"]
#[derive(Debug)]
pub struct Committed<T> {
    fired: Option<EscalationOutcome>,
    value: T,
    effects: Vec<Effect>,
}

impl<T> Committed<T> {
    /// Countdown that was already due when the event arrived
    pub fn fired(&self) -> Option<&EscalationOutcome> {
        self.fired.as_ref()
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: OutcomeSlot> Committed<T> {
    /// Run the collaborator requests in order
    ///
    /// A call that fails turns the matching `Executed` outcome into
    /// `CallFailed`.
    pub fn dispatch(self, collaborators: &Collaborators) -> Dispatched<T> {
        let Committed {
            mut fired,
            mut value,
            effects,
        } = self;
        let mut answer = None;

        for effect in effects {
            match effect {
                Effect::Prompt(prompt) => {
                    if let PromptResponse::Selected(option) = collaborators.prompt.prompt(&prompt) {
                        answer = Some((prompt.attempt, option));
                    }
                }
                Effect::Notice(notice) => collaborators.prompt.notice(&notice),
                Effect::PlaceCall { attempt, number } => {
                    if let Err(e) = collaborators.place_call(&number) {
                        let reason = e.to_string();
                        for outcome in fired.iter_mut().chain(value.outcome_mut()) {
                            outcome.call_failed(attempt, &reason);
                        }
                    }
                }
            }
        }

        Dispatched {
            fired,
            value,
            answer,
        }
    }
}

/// Commit after its collaborator requests ran
#[derive(Debug)]
pub struct Dispatched<T> {
    /// Countdown that was already due when the event arrived
    pub fired: Option<EscalationOutcome>,
    pub value: T,
    /// Answer the prompt gave before returning
    pub answer: Option<(AttemptId, PromptOption)>,
}

/// Outcome of a reading after the prompt's immediate answer was applied
///
/// Keeps `pending` if the answer lost to the countdown without firing it.
pub fn answered(
    pending: EscalationOutcome,
    answer: Dispatched<Result<EscalationOutcome, AlertError>>,
) -> EscalationOutcome {
    match answer {
        Dispatched {
            fired: Some(fired), ..
        } => fired,
        Dispatched { value: Ok(outcome), .. } => outcome,
        _ => pending,
    }
}

/// Result of a coordinator call with every collaborator request run
#[derive(Debug)]
pub struct Settled<T> {
    /// Countdown that was already due when the event arrived
    pub fired: Option<EscalationOutcome>,
    pub value: T,
}

#[derive(Debug, Clone)]
struct PendingEscalation {
    attempt: AttemptId,
    deadline_ms: u64,
    /// Number snapshotted on entry
    number: String,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Evaluating,
    Pending(PendingEscalation),
}

/// Input to the escalation state machine
#[derive(Debug, Clone, Copy)]
enum EscalationEvent<'a> {
    Reading {
        reading: &'a VitalsReading,
        alerts: &'a [ThresholdAlert],
    },
    Cancel(AttemptId),
    CallNow(AttemptId),
    Expire(AttemptId),
}

/// Stateful escalation coordinator
pub struct EscalationCoordinator {
    config: EmergencyConfig,
    gate: CooldownGate,
    countdown: Duration,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    phase: Phase,
    next_attempt: u64,
    outbox: Vec<Effect>,
}

impl EscalationCoordinator {
    pub fn new(
        config: EmergencyConfig,
        gate: CooldownGate,
        clock: Arc<dyn Clock>,
        telephony: Arc<dyn Telephony>,
        prompt: Arc<dyn UserPrompt>,
    ) -> Self {
        Self {
            config,
            gate,
            countdown: AUTO_EXECUTE_DELAY,
            clock,
            collaborators: Collaborators::new(telephony, prompt),
            phase: Phase::Idle,
            next_attempt: 1,
            outbox: Vec::new(),
        }
    }

    /// Override the auto-execute countdown
    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// Replace the settings snapshot. A pending attempt keeps its number.
    pub fn set_config(&mut self, config: EmergencyConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &EmergencyConfig {
        &self.config
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn phase(&self) -> EscalationPhase {
        match &self.phase {
            Phase::Idle => EscalationPhase::Idle,
            Phase::Evaluating => EscalationPhase::Evaluating,
            Phase::Pending(p) => EscalationPhase::Pending {
                attempt: p.attempt,
                deadline_ms: p.deadline_ms,
            },
        }
    }

    /// Feed a classified reading and run its collaborator requests
    ///
    /// A prompt answered before returning is applied immediately.
    pub fn evaluate(
        &mut self,
        reading: &VitalsReading,
        alerts: &[ThresholdAlert],
    ) -> Settled<EscalationOutcome> {
        let committed = self.stage_reading(reading, alerts);
        let dispatched = committed.dispatch(&self.collaborators);

        let value = match dispatched.answer {
            Some((attempt, option)) => {
                let committed = self.stage_answer(attempt, option);
                answered(dispatched.value, committed.dispatch(&self.collaborators))
            }
            None => dispatched.value,
        };

        Settled {
            fired: dispatched.fired,
            value,
        }
    }

    /// User pressed Cancel
    pub fn cancel(&mut self, attempt: AttemptId) -> Settled<Result<EscalationOutcome, AlertError>> {
        let committed = self.stage_cancel(attempt);
        self.settle(committed)
    }

    /// User pressed Call Now
    pub fn call_now(
        &mut self,
        attempt: AttemptId,
    ) -> Settled<Result<EscalationOutcome, AlertError>> {
        let committed = self.stage_call_now(attempt);
        self.settle(committed)
    }

    /// Fire the countdown if its deadline has been reached
    pub fn poll(&mut self) -> Option<EscalationOutcome> {
        let committed = self.stage_poll();
        self.settle(committed).value
    }

    /// User-initiated emergency call, outside the escalation protocol
    pub fn manual_call(&self, number: &str) -> Result<bool, AlertError> {
        self.collaborators.manual_call(number)
    }

    fn settle<T: OutcomeSlot>(&self, committed: Committed<T>) -> Settled<T> {
        let dispatched = committed.dispatch(&self.collaborators);
        Settled {
            fired: dispatched.fired,
            value: dispatched.value,
        }
    }

    pub fn stage_reading(
        &mut self,
        reading: &VitalsReading,
        alerts: &[ThresholdAlert],
    ) -> Committed<EscalationOutcome> {
        self.stage(|coordinator, now| {
            // Readings never produce errors
            coordinator
                .transition(EscalationEvent::Reading { reading, alerts }, now)
                .unwrap_or(EscalationOutcome::NotCritical)
        })
    }

    pub fn stage_cancel(
        &mut self,
        attempt: AttemptId,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        self.stage(|coordinator, now| coordinator.transition(EscalationEvent::Cancel(attempt), now))
    }

    pub fn stage_call_now(
        &mut self,
        attempt: AttemptId,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        self.stage(|coordinator, now| coordinator.transition(EscalationEvent::CallNow(attempt), now))
    }

    /// Apply an answer the prompt gave before returning
    pub fn stage_answer(
        &mut self,
        attempt: AttemptId,
        option: PromptOption,
    ) -> Committed<Result<EscalationOutcome, AlertError>> {
        match option {
            PromptOption::Cancel => self.stage_cancel(attempt),
            PromptOption::CallNow => self.stage_call_now(attempt),
        }
    }

    pub fn stage_poll(&mut self) -> Committed<Option<EscalationOutcome>> {
        let now = self.clock.now_ms();
        let value = self.fire_due_countdown(now);
        Committed {
            fired: None,
            value,
            effects: std::mem::take(&mut self.outbox),
        }
    }

    fn stage<T>(&mut self, apply: impl FnOnce(&mut Self, u64) -> T) -> Committed<T> {
        let now = self.clock.now_ms();
        let fired = self.fire_due_countdown(now);
        let value = apply(self, now);
        Committed {
            fired,
            value,
            effects: std::mem::take(&mut self.outbox),
        }
    }

    fn fire_due_countdown(&mut self, now: u64) -> Option<EscalationOutcome> {
        let attempt = match &self.phase {
            Phase::Pending(p) if now >= p.deadline_ms => p.attempt,
            _ => return None,
        };
        self.transition(EscalationEvent::Expire(attempt), now).ok()
    }

    /// Apply one event to the state machine
    fn transition(
        &mut self,
        event: EscalationEvent<'_>,
        now: u64,
    ) -> Result<EscalationOutcome, AlertError> {
        match event {
            EscalationEvent::Reading { reading, alerts } => Ok(self.on_reading(reading, alerts, now)),
            EscalationEvent::Cancel(attempt) => {
                let pending = self.take_pending(attempt)?;
                tracing::info!(attempt = %pending.attempt, "Emergency escalation cancelled by user");
                Ok(EscalationOutcome::Cancelled {
                    attempt: pending.attempt,
                })
            }
            EscalationEvent::CallNow(attempt) => {
                let pending = self.take_pending(attempt)?;
                Ok(self.execute(pending, ExecutionTrigger::CallNow))
            }
            EscalationEvent::Expire(attempt) => {
                let pending = self.take_pending(attempt)?;
                if !self.config.auto_emergency_enabled {
                    tracing::info!(
                        attempt = %pending.attempt,
                        "Countdown expired with automatic emergency disabled; attempt withdrawn"
                    );
                    return Ok(EscalationOutcome::Withdrawn {
                        attempt: pending.attempt,
                    });
                }
                Ok(self.execute(pending, ExecutionTrigger::Countdown))
            }
        }
    }

    fn on_reading(
        &mut self,
        reading: &VitalsReading,
        alerts: &[ThresholdAlert],
        now: u64,
    ) -> EscalationOutcome {
        if let Phase::Pending(p) = &self.phase {
            return EscalationOutcome::AlreadyPending { attempt: p.attempt };
        }
        if !self.config.auto_emergency_enabled {
            return EscalationOutcome::Disabled;
        }

        self.phase = Phase::Evaluating;

        if !is_critical(alerts) {
            self.phase = Phase::Idle;
            return EscalationOutcome::NotCritical;
        }
        if !self.gate.can_trigger(now) {
            self.phase = Phase::Idle;
            tracing::debug!(
                last_triggered_at = ?self.gate.last_triggered_at(),
                "Critical reading suppressed by cooldown"
            );
            return EscalationOutcome::CoolingDown;
        }

        // Recording on entry keeps a second countdown from starting
        self.gate.record_trigger(now);

        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        let countdown_ms = u64::try_from(self.countdown.as_millis()).unwrap_or(u64::MAX);
        let deadline_ms = now.saturating_add(countdown_ms);
        self.phase = Phase::Pending(PendingEscalation {
            attempt,
            deadline_ms,
            number: self.config.emergency_number.clone(),
        });

        tracing::warn!(
            attempt = %attempt,
            deadline_ms,
            alerts = alerts.len(),
            "Critical vitals detected - emergency escalation pending"
        );

        let prompt = self.build_prompt(attempt, reading, alerts);
        self.outbox.push(Effect::Prompt(prompt));

        EscalationOutcome::Pending {
            attempt,
            deadline_ms,
        }
    }

    fn take_pending(&mut self, attempt: AttemptId) -> Result<PendingEscalation, AlertError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Pending(p) if p.attempt == attempt => Ok(p),
            other => {
                self.phase = other;
                if attempt.0 < self.next_attempt {
                    Err(AlertError::EscalationAlreadyResolved(attempt))
                } else {
                    Err(AlertError::NoPendingEscalation(attempt))
                }
            }
        }
    }

    fn execute(
        &mut self,
        pending: PendingEscalation,
        trigger: ExecutionTrigger,
    ) -> EscalationOutcome {
        let result = if pending.number.trim().is_empty() {
            tracing::warn!(attempt = %pending.attempt, "Emergency escalation has no number configured");
            self.outbox.push(Effect::Notice(Notice {
                kind: NoticeKind::ConfigurationError,
                title: "No Emergency Number".to_string(),
                message: "Please configure emergency contact in Settings".to_string(),
            }));
            ExecutionResult::MissingNumber
        } else {
            self.outbox.push(Effect::PlaceCall {
                attempt: pending.attempt,
                number: pending.number.clone(),
            });
            ExecutionResult::Called {
                number: pending.number.clone(),
            }
        };

        tracing::info!(attempt = %pending.attempt, ?trigger, "Emergency escalation executed");

        EscalationOutcome::Executed {
            attempt: pending.attempt,
            trigger,
            result,
        }
    }

    fn build_prompt(
        &self,
        attempt: AttemptId,
        reading: &VitalsReading,
        alerts: &[ThresholdAlert],
    ) -> EscalationPrompt {
        let message = format!(
            "CRITICAL condition detected:\n\n{}\n\nCurrent Vitals:\n\
             ❤️ HR: {} bpm\n🫁 SpO2: {}%\n🌡️ Temp: {}°C\n\n\
             Automatic emergency call will be initiated.",
            alert_messages(alerts).join("\n"),
            reading.heart_rate,
            reading.spo2,
            reading.temperature,
        );

        EscalationPrompt {
            attempt,
            title: "🚨 AUTOMATIC EMERGENCY ALERT".to_string(),
            message,
            options: vec![
                (
                    PromptOption::Cancel,
                    format!("Cancel ({}s)", self.countdown.as_secs()),
                ),
                (PromptOption::CallNow, "Call Now".to_string()),
            ],
            timeout: self.countdown,
            play_sound: self.config.critical_alert_sound_enabled,
            notify_contacts: self.config.notify_contacts,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingTelephony, ScriptedPrompt};
    use super::*;
    use crate::classifier::classify_vitals;
    use crate::clock::ManualClock;
    use crate::cooldown::DEFAULT_COOLDOWN;
    use pretty_assertions::assert_eq;

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        clock: Arc<ManualClock>,
        telephony: Arc<RecordingTelephony>,
        prompt: Arc<ScriptedPrompt>,
        coordinator: EscalationCoordinator,
    }

    fn harness_with(
        config: EmergencyConfig,
        telephony: RecordingTelephony,
        prompt: ScriptedPrompt,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let telephony = Arc::new(telephony);
        let prompt = Arc::new(prompt);
        let coordinator = EscalationCoordinator::new(
            config,
            CooldownGate::new(DEFAULT_COOLDOWN),
            clock.clone(),
            telephony.clone(),
            prompt.clone(),
        );
        Harness {
            clock,
            telephony,
            prompt,
            coordinator,
        }
    }

    fn harness(config: EmergencyConfig) -> Harness {
        harness_with(config, RecordingTelephony::default(), ScriptedPrompt::deferred())
    }

    fn critical() -> VitalsReading {
        VitalsReading::new(135.0, 98.0, 36.6, 0.0)
    }

    fn feed(h: &mut Harness, reading: &VitalsReading) -> EscalationOutcome {
        let alerts = classify_vitals(reading);
        h.coordinator.evaluate(reading, &alerts).value
    }

    fn pending_attempt(outcome: &EscalationOutcome) -> AttemptId {
        match outcome {
            EscalationOutcome::Pending { attempt, .. } => *attempt,
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_config_never_escalates() {
        let mut h = harness(EmergencyConfig::default());
        assert_eq!(feed(&mut h, &critical()), EscalationOutcome::Disabled);
        assert_eq!(h.coordinator.phase(), EscalationPhase::Idle);
        assert!(h.coordinator.gate().last_triggered_at().is_none());
    }

    #[test]
    fn test_warning_reading_stays_idle() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let outcome = feed(&mut h, &VitalsReading::new(70.0, 96.0, 38.2, 0.0));

        assert_eq!(outcome, EscalationOutcome::NotCritical);
        assert_eq!(h.coordinator.phase(), EscalationPhase::Idle);
        assert!(h.prompt.prompts.lock().is_empty());
    }

    #[test]
    fn test_critical_reading_enters_pending_and_records_gate() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let outcome = feed(&mut h, &critical());

        let attempt = pending_attempt(&outcome);
        assert_eq!(
            h.coordinator.phase(),
            EscalationPhase::Pending {
                attempt,
                deadline_ms: T0 + 10_000
            }
        );
        assert_eq!(h.coordinator.gate().last_triggered_at(), Some(T0));

        let prompts = h.prompt.prompts.lock();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].message.contains("Extremely high heart rate"));
        assert!(prompts[0].message.contains("HR: 135 bpm"));
        assert_eq!(prompts[0].options[0].1, "Cancel (10s)");
        assert_eq!(prompts[0].timeout, AUTO_EXECUTE_DELAY);
    }

    #[test]
    fn test_countdown_expiry_places_call() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(Duration::from_millis(9_999));
        assert_eq!(h.coordinator.poll(), None);

        h.clock.advance(Duration::from_millis(1));
        assert_eq!(
            h.coordinator.poll(),
            Some(EscalationOutcome::Executed {
                attempt,
                trigger: ExecutionTrigger::Countdown,
                result: ExecutionResult::Called {
                    number: "911".to_string()
                },
            })
        );
        assert_eq!(h.telephony.calls(), vec!["911".to_string()]);
        assert_eq!(h.coordinator.phase(), EscalationPhase::Idle);
    }

    #[test]
    fn test_cancel_just_before_deadline_wins() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(Duration::from_millis(9_999));
        let outcome = h.coordinator.cancel(attempt).value.unwrap();
        assert_eq!(outcome, EscalationOutcome::Cancelled { attempt });

        h.clock.advance(Duration::from_millis(10));
        assert_eq!(h.coordinator.poll(), None);
        assert!(h.telephony.calls().is_empty());
    }

    #[test]
    fn test_cancel_just_after_deadline_is_rejected() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(Duration::from_millis(10_001));
        let settled = h.coordinator.cancel(attempt);

        assert!(matches!(
            settled.value,
            Err(AlertError::EscalationAlreadyResolved(id)) if id == attempt
        ));
        assert!(matches!(
            settled.fired,
            Some(EscalationOutcome::Executed {
                trigger: ExecutionTrigger::Countdown,
                ..
            })
        ));
        assert_eq!(h.telephony.calls(), vec!["911".to_string()]);
    }

    #[test]
    fn test_call_now_then_countdown_calls_once() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(Duration::from_secs(3));
        let outcome = h.coordinator.call_now(attempt).value.unwrap();
        assert!(matches!(
            outcome,
            EscalationOutcome::Executed {
                trigger: ExecutionTrigger::CallNow,
                ..
            }
        ));

        h.clock.advance(Duration::from_secs(10));
        assert_eq!(h.coordinator.poll(), None);
        assert!(h.coordinator.cancel(attempt).value.is_err());
        assert_eq!(h.telephony.calls().len(), 1);
    }

    #[test]
    fn test_empty_number_raises_configuration_notice() {
        let mut h = harness(EmergencyConfig::auto_emergency(""));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(AUTO_EXECUTE_DELAY);
        let outcome = h.coordinator.poll().unwrap();

        assert_eq!(
            outcome,
            EscalationOutcome::Executed {
                attempt,
                trigger: ExecutionTrigger::Countdown,
                result: ExecutionResult::MissingNumber,
            }
        );
        assert!(h.telephony.calls().is_empty());
        let notices = h.prompt.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::ConfigurationError);
    }

    #[test]
    fn test_second_critical_reading_does_not_start_second_countdown() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(Duration::from_secs(2));
        assert_eq!(
            feed(&mut h, &critical()),
            EscalationOutcome::AlreadyPending { attempt }
        );
        assert_eq!(h.prompt.prompts.lock().len(), 1);
    }

    #[test]
    fn test_cancelled_attempt_still_consumes_cooldown() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));
        h.coordinator.cancel(attempt).value.unwrap();

        h.clock.advance(Duration::from_secs(60));
        assert_eq!(feed(&mut h, &critical()), EscalationOutcome::CoolingDown);

        h.clock.set(T0 + 300_000);
        assert!(matches!(
            feed(&mut h, &critical()),
            EscalationOutcome::Pending { .. }
        ));
    }

    #[test]
    fn test_config_change_does_not_touch_pending_number() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.coordinator
            .set_config(EmergencyConfig::auto_emergency("112"));
        let outcome = h.coordinator.call_now(attempt).value.unwrap();

        assert!(matches!(
            outcome,
            EscalationOutcome::Executed {
                result: ExecutionResult::Called { ref number },
                ..
            } if number == "911"
        ));
    }

    #[test]
    fn test_disabling_auto_emergency_withdraws_expiry() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.coordinator.set_config(EmergencyConfig {
            auto_emergency_enabled: false,
            ..EmergencyConfig::auto_emergency("911")
        });
        h.clock.advance(AUTO_EXECUTE_DELAY);

        assert_eq!(
            h.coordinator.poll(),
            Some(EscalationOutcome::Withdrawn { attempt })
        );
        assert!(h.telephony.calls().is_empty());
    }

    #[test]
    fn test_synchronous_prompt_answer() {
        let mut h = harness_with(
            EmergencyConfig::auto_emergency("911"),
            RecordingTelephony::default(),
            ScriptedPrompt::answering(PromptResponse::Selected(PromptOption::CallNow)),
        );

        let outcome = feed(&mut h, &critical());
        assert!(matches!(
            outcome,
            EscalationOutcome::Executed {
                trigger: ExecutionTrigger::CallNow,
                ..
            }
        ));
        assert_eq!(h.telephony.calls().len(), 1);

        let mut h = harness_with(
            EmergencyConfig::auto_emergency("911"),
            RecordingTelephony::default(),
            ScriptedPrompt::answering(PromptResponse::Selected(PromptOption::Cancel)),
        );
        assert!(matches!(
            feed(&mut h, &critical()),
            EscalationOutcome::Cancelled { .. }
        ));
        assert_eq!(h.coordinator.phase(), EscalationPhase::Idle);
    }

    #[test]
    fn test_call_failure_raises_capability_notice() {
        let mut h = harness_with(
            EmergencyConfig::auto_emergency("911"),
            RecordingTelephony::failing(),
            ScriptedPrompt::deferred(),
        );
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        let outcome = h.coordinator.call_now(attempt).value.unwrap();
        assert!(matches!(
            outcome,
            EscalationOutcome::Executed {
                result: ExecutionResult::CallFailed { .. },
                ..
            }
        ));
        assert_eq!(h.telephony.calls().len(), 1);
        assert_eq!(h.prompt.notices()[0].kind, NoticeKind::CapabilityFailure);
        assert_eq!(h.coordinator.phase(), EscalationPhase::Idle);
    }

    #[test]
    fn test_countdown_fired_by_later_reading_is_reported() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(AUTO_EXECUTE_DELAY);
        let reading = critical();
        let alerts = classify_vitals(&reading);
        let settled = h.coordinator.evaluate(&reading, &alerts);

        assert_eq!(settled.value, EscalationOutcome::CoolingDown);
        assert_eq!(
            settled.fired,
            Some(EscalationOutcome::Executed {
                attempt,
                trigger: ExecutionTrigger::Countdown,
                result: ExecutionResult::Called {
                    number: "911".to_string()
                },
            })
        );
        assert_eq!(h.telephony.calls(), vec!["911".to_string()]);
        assert_eq!(h.coordinator.poll(), None);
    }

    #[test]
    fn test_failed_call_on_fired_countdown_is_reported() {
        let mut h = harness_with(
            EmergencyConfig::auto_emergency("911"),
            RecordingTelephony::failing(),
            ScriptedPrompt::deferred(),
        );
        let attempt = pending_attempt(&feed(&mut h, &critical()));

        h.clock.advance(AUTO_EXECUTE_DELAY);
        let settled = h.coordinator.cancel(attempt);

        assert!(settled.value.is_err());
        assert!(matches!(
            settled.fired,
            Some(EscalationOutcome::Executed {
                result: ExecutionResult::CallFailed { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_staged_commit_defers_collaborators() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        let reading = critical();
        let alerts = classify_vitals(&reading);

        let committed = h.coordinator.stage_reading(&reading, &alerts);
        let attempt = pending_attempt(committed.value());
        assert!(h.prompt.prompts.lock().is_empty());

        let collaborators = h.coordinator.collaborators().clone();
        let dispatched = committed.dispatch(&collaborators);
        assert_eq!(dispatched.answer, None);
        assert_eq!(h.prompt.prompts.lock()[0].attempt, attempt);

        let committed = h.coordinator.stage_call_now(attempt);
        assert!(h.telephony.calls().is_empty());
        let _ = committed.dispatch(&collaborators);
        assert_eq!(h.telephony.calls(), vec!["911".to_string()]);
    }

    #[test]
    fn test_deadline_saturates_near_clock_limit() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        h.coordinator = h.coordinator.with_countdown(Duration::MAX);
        h.clock.set(u64::MAX - 5);

        let outcome = feed(&mut h, &critical());
        assert!(matches!(
            outcome,
            EscalationOutcome::Pending {
                deadline_ms: u64::MAX,
                ..
            }
        ));
        assert_eq!(h.coordinator.poll(), None);

        h.clock.set(u64::MAX);
        assert!(h.coordinator.poll().is_some());
        assert_eq!(h.telephony.calls().len(), 1);
    }

    #[test]
    fn test_unknown_attempt() {
        let mut h = harness(EmergencyConfig::auto_emergency("911"));
        assert!(matches!(
            h.coordinator.cancel(AttemptId(42)).value,
            Err(AlertError::NoPendingEscalation(_))
        ));
    }

    #[test]
    fn test_manual_call() {
        let h = harness(EmergencyConfig::default());

        assert!(h.coordinator.manual_call("555-0100").unwrap());
        assert_eq!(h.telephony.calls(), vec!["555-0100".to_string()]);
        assert!(h.coordinator.gate().last_triggered_at().is_none());

        assert!(matches!(
            h.coordinator.manual_call(""),
            Err(AlertError::Configuration(_))
        ));
        assert_eq!(h.prompt.notices()[0].kind, NoticeKind::ConfigurationError);
    }

    #[test]
    fn test_manual_call_declined() {
        let mut prompt = ScriptedPrompt::deferred();
        prompt.confirm = false;
        let h = harness_with(EmergencyConfig::default(), RecordingTelephony::default(), prompt);

        assert!(!h.coordinator.manual_call("911").unwrap());
        assert!(h.telephony.calls().is_empty());
    }
}
