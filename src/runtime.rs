//! Shared engine handle with a real-time countdown
//!
//! The engine itself is synchronous. `SharedEngine` wraps it in a lock so
//! transport callbacks and UI threads can drive it, and arms a countdown
//! thread whenever an escalation becomes pending. The thread only asks the
//! engine to fire a due countdown; which of cancel / call now / expiry wins
//! is decided under the lock by the coordinator's state.
//!
//! State changes are committed under the lock. Prompts, notices, calls,
//! insights and listeners run after it is released, so any of them may call
//! back into the handle.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::engine::{AlertEngine, CountdownListener, Outlets, ReadingReport};
use crate::error::AlertError;
use crate::escalation::{AttemptId, EscalationOutcome, EscalationPhase};
use crate::types::{EmergencyConfig, VitalsReading};

/// Handle to a running countdown thread
struct Countdown {
    attempt: AttemptId,
    disarm: Sender<()>,
}

impl Countdown {
    fn arm(engine: Weak<Mutex<AlertEngine>>, attempt: AttemptId) -> Self {
        let (disarm, disarmed) = bounded::<()>(1);

        thread::spawn(move || {
            let mut wait = match remaining(&engine, attempt) {
                Some(wait) => wait,
                None => return,
            };

            loop {
                match disarmed.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Disarmed, or the owning handle is gone
                    _ => return,
                }

                let Some(strong) = engine.upgrade() else {
                    return;
                };
                let mut guard = strong.lock();
                let committed = guard.stage_poll();
                if committed.value().is_some() {
                    let outlets = guard.outlets();
                    drop(guard);
                    tracing::debug!(attempt = %attempt, "Countdown fired");
                    outlets.fire(committed);
                    return;
                }

                // Woke before the engine clock reached the deadline
                match pending_deadline(&guard, attempt) {
                    Some(deadline) => {
                        let now = guard.clock().now_ms();
                        wait = Duration::from_millis(deadline.saturating_sub(now).max(1));
                    }
                    None => return,
                }
            }
        });

        Self { attempt, disarm }
    }

    fn disarm(self) {
        // The thread may already have exited
        let _ = self.disarm.try_send(());
    }
}

fn pending_deadline(engine: &AlertEngine, attempt: AttemptId) -> Option<u64> {
    match engine.phase() {
        EscalationPhase::Pending {
            attempt: pending,
            deadline_ms,
        } if pending == attempt => Some(deadline_ms),
        _ => None,
    }
}

fn remaining(engine: &Weak<Mutex<AlertEngine>>, attempt: AttemptId) -> Option<Duration> {
    let engine = engine.upgrade()?;
    let guard = engine.lock();
    let deadline = pending_deadline(&guard, attempt)?;
    let now = guard.clock().now_ms();
    Some(Duration::from_millis(deadline.saturating_sub(now)))
}

/// Thread-safe engine handle
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<Mutex<AlertEngine>>,
    countdown: Arc<Mutex<Option<Countdown>>>,
}

impl SharedEngine {
    pub fn new(engine: AlertEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            countdown: Arc::new(Mutex::new(None)),
        }
    }

    /// Be told about every countdown that fires
    pub fn with_countdown_listener(self, listener: CountdownListener) -> Self {
        self.engine.lock().set_countdown_listener(listener);
        self
    }

    /// Process a reading, arming the countdown if an escalation became pending
    pub fn on_reading(&self, reading: &VitalsReading) -> ReadingReport {
        let (staged, outlets) = self.staged(|engine| engine.stage_reading(reading));

        // Armed before the prompt runs so an immediate answer can disarm it
        if let EscalationOutcome::Pending { attempt, .. } = *staged.escalation() {
            self.arm(attempt);
        }

        let (mut report, answer) = staged.finish(&outlets);
        if let Some((attempt, option)) = answer {
            let committed = self.engine.lock().stage_answer(attempt, option);
            self.disarm(attempt);
            report.apply_answer(outlets.dispatch(committed));
        }
        report
    }

    pub fn set_config(&self, config: EmergencyConfig) {
        self.engine.lock().set_config(config);
    }

    pub fn cancel(&self, attempt: AttemptId) -> Result<EscalationOutcome, AlertError> {
        let (committed, outlets) = self.staged(|engine| engine.stage_cancel(attempt));
        self.disarm(attempt);
        outlets.settle(committed)
    }

    pub fn call_now(&self, attempt: AttemptId) -> Result<EscalationOutcome, AlertError> {
        let (committed, outlets) = self.staged(|engine| engine.stage_call_now(attempt));
        self.disarm(attempt);
        outlets.settle(committed)
    }

    /// Fire a due countdown without waiting for the timer thread
    ///
    /// The timer thread finds nothing pending afterwards and exits.
    pub fn poll(&self) -> Option<EscalationOutcome> {
        let (committed, outlets) = self.staged(AlertEngine::stage_poll);
        outlets.fire(committed)
    }

    pub fn manual_call(&self, number: &str) -> Result<bool, AlertError> {
        let outlets = self.engine.lock().outlets();
        outlets.collaborators().manual_call(number)
    }

    pub fn phase(&self) -> EscalationPhase {
        self.engine.lock().phase()
    }

    /// Commit under the lock and take what is needed to report it unlocked
    fn staged<T>(&self, stage: impl FnOnce(&mut AlertEngine) -> T) -> (T, Outlets) {
        let mut engine = self.engine.lock();
        let staged = stage(&mut engine);
        (staged, engine.outlets())
    }

    fn arm(&self, attempt: AttemptId) {
        let countdown = Countdown::arm(Arc::downgrade(&self.engine), attempt);
        if let Some(previous) = self.countdown.lock().replace(countdown) {
            previous.disarm();
        }
    }

    fn disarm(&self, attempt: AttemptId) {
        let mut slot = self.countdown.lock();
        if slot.as_ref().map(|c| c.attempt) == Some(attempt) {
            if let Some(countdown) = slot.take() {
                countdown.disarm();
            }
        }
    }
}
