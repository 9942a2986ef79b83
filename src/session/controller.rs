use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    db::AttemptRecord,
    error::PracticeError,
    matching::PracticeResult,
    recognizer::{HypothesisSource, RecognizerEvent},
    telemetry::TelemetryQueue,
};

use super::{SessionEffect, SessionEvent, SessionState, VerificationSession};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// How long a session waits for typed text after the recognizer fails.
pub const DEFAULT_MANUAL_INPUT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-device values stamped onto every attempt record.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    pub session_id: String,
    pub user: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub target_text: String,
    pub transcript: String,
    pub attempt: u32,
    pub result: Option<PracticeResult>,
    pub awaiting_manual_input: bool,
    pub recognizer_error: Option<String>,
}

impl SessionSnapshot {
    /// Nothing more happens without a user command.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            SessionState::Evaluated | SessionState::Done | SessionState::Cancelled
        ) || self.awaiting_manual_input
    }
}

impl From<&VerificationSession> for SessionSnapshot {
    fn from(session: &VerificationSession) -> Self {
        Self {
            state: session.state(),
            target_text: session.target_text().to_string(),
            transcript: session.transcript().to_string(),
            attempt: session.attempt(),
            result: session.result().cloned(),
            awaiting_manual_input: session.awaiting_manual_input(),
            recognizer_error: session.recognizer_error().map(str::to_string),
        }
    }
}

/// Drives one [`VerificationSession`]: feeds it recognizer events and user
/// commands, one transition at a time, and carries out the effects.
#[derive(Clone)]
pub struct PracticeController {
    session: Arc<Mutex<VerificationSession>>,
    source: HypothesisSource,
    telemetry: TelemetryQueue,
    context: AttemptContext,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    listener: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    manual_input_timeout: Duration,
    manual_deadline: Arc<std::sync::Mutex<Option<CancellationToken>>>,
}

impl PracticeController {
    pub fn new(
        target_text: impl Into<String>,
        source: HypothesisSource,
        telemetry: TelemetryQueue,
        context: AttemptContext,
    ) -> Result<Self, PracticeError> {
        let session = VerificationSession::new(target_text)?;
        let (snapshots, _) = watch::channel(SessionSnapshot::from(&session));

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            source,
            telemetry,
            context,
            snapshots: Arc::new(snapshots),
            listener: Arc::new(std::sync::Mutex::new(None)),
            manual_input_timeout: DEFAULT_MANUAL_INPUT_TIMEOUT,
            manual_deadline: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    /// Settle with a zero score if no typed text arrives within `timeout`
    /// of a recognizer failure.
    pub fn with_manual_input_timeout(mut self, timeout: Duration) -> Self {
        self.manual_input_timeout = timeout;
        self
    }

    pub async fn start(&self) -> Result<SessionSnapshot, PracticeError> {
        self.dispatch(SessionEvent::Start).await
    }

    pub async fn retry(&self) -> Result<SessionSnapshot, PracticeError> {
        self.dispatch(SessionEvent::Retry).await
    }

    pub async fn cancel(&self) -> Result<SessionSnapshot, PracticeError> {
        self.dispatch(SessionEvent::Cancel).await
    }

    /// Supply typed text in place of a recognizer result. `None` or blank
    /// text settles the attempt with a zero score.
    pub async fn submit_manual(
        &self,
        text: Option<String>,
    ) -> Result<SessionSnapshot, PracticeError> {
        self.dispatch(SessionEvent::ManualHypothesis(text)).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Wait until the session needs a user command (or has ended).
    pub async fn wait_settled(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(SessionSnapshot::is_settled).await;
        match settled {
            Ok(snapshot) => snapshot.clone(),
            // The sender lives in `self`, so this only happens mid-teardown.
            Err(_) => self.snapshot(),
        }
    }

    /// Apply one event. Transitions are serialized on the session lock and
    /// their effects run before the lock is released.
    pub async fn dispatch(&self, event: SessionEvent) -> Result<SessionSnapshot, PracticeError> {
        let mut session = self.session.lock().await;
        self.apply_locked(&mut session, event).await
    }

    async fn apply_locked(
        &self,
        session: &mut VerificationSession,
        event: SessionEvent,
    ) -> Result<SessionSnapshot, PracticeError> {
        let transition = session.apply(event)?;

        if !transition.path.is_empty() {
            log_debug!(
                "Practice session {:?} -> {:?}",
                transition.from,
                transition.path
            );
        }

        for effect in transition.effects {
            self.run_effect(session, effect).await;
        }
        if !session.awaiting_manual_input() {
            self.disarm_manual_deadline();
        }

        let snapshot = SessionSnapshot::from(&*session);
        self.snapshots.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    async fn run_effect(&self, session: &VerificationSession, effect: SessionEffect) {
        match effect {
            SessionEffect::StartRecognizer => self.start_listening().await,
            SessionEffect::StopRecognizer => self.stop_listening().await,
            SessionEffect::TranscriptUpdated(text) => {
                log_debug!("Heard so far: {text}");
            }
            SessionEffect::AwaitManualInput { reason } => {
                log_warn!("Speech recognizer failed ({reason}); waiting for typed input");
                self.arm_manual_deadline();
            }
            SessionEffect::Evaluated(result) => {
                log_info!(
                    "Attempt {} scored {} ({})",
                    session.attempt(),
                    result.score,
                    result.tier.as_str()
                );
            }
            SessionEffect::EmitAttempt {
                hypothesis,
                is_final,
                result,
            } => {
                let record = self.attempt_record(session, hypothesis, is_final, result.as_ref());
                self.telemetry.enqueue(record);
            }
        }
    }

    fn attempt_record(
        &self,
        session: &VerificationSession,
        hypothesis: String,
        is_final: bool,
        result: Option<&PracticeResult>,
    ) -> AttemptRecord {
        let mut record = AttemptRecord::new(
            session.target_text(),
            hypothesis,
            is_final,
            self.context.session_id.clone(),
        )
        .with_user(self.context.user.clone())
        .with_extra("attempt", session.attempt())
        .with_extra("language", self.context.language.clone());

        if let Some(result) = result {
            record = record
                .with_extra("score", result.score)
                .with_extra("similarity", result.similarity)
                .with_extra("tier", result.tier.as_str())
                .with_extra("accepted", result.accepted);
        }
        if let Some(error) = session.recognizer_error() {
            record = record.with_extra("recognizerError", error);
        }
        record
    }

    async fn start_listening(&self) {
        self.stop_listening().await;

        let events = self.source.open(&self.context.language).await;
        let cancel = CancellationToken::new();
        tokio::spawn(pump_events(self.clone(), events, cancel.clone()));

        let mut guard = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(cancel);
    }

    async fn stop_listening(&self) {
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(cancel) = previous {
            // Not joined: the pump may be the caller.
            cancel.cancel();
            self.source.stop().await;
        }
    }

    fn arm_manual_deadline(&self) {
        let deadline = CancellationToken::new();
        let previous = self
            .manual_deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(deadline.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        tokio::spawn(expire_manual_input(
            self.clone(),
            deadline,
            self.manual_input_timeout,
        ));
    }

    fn disarm_manual_deadline(&self) {
        let previous = self
            .manual_deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(deadline) = previous {
            deadline.cancel();
        }
    }

    /// Submit "no input" unless `deadline` was disarmed first. The check
    /// happens under the session lock, where disarming also happens.
    async fn give_up_on_manual_input(
        &self,
        deadline: CancellationToken,
    ) -> Result<Option<SessionSnapshot>, PracticeError> {
        let mut session = self.session.lock().await;
        if deadline.is_cancelled() {
            return Ok(None);
        }
        log_warn!("No typed input arrived; scoring the attempt as silent");
        self.apply_locked(&mut session, SessionEvent::ManualHypothesis(None))
            .await
            .map(Some)
    }

    // Boxed so the spawned futures' types do not contain themselves.
    fn dispatch_boxed(
        &self,
        event: SessionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<SessionSnapshot, PracticeError>> + Send + '_>> {
        Box::pin(self.dispatch(event))
    }

    fn give_up_boxed(
        &self,
        deadline: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionSnapshot>, PracticeError>> + Send + '_>>
    {
        Box::pin(self.give_up_on_manual_input(deadline))
    }
}

async fn expire_manual_input(
    controller: PracticeController,
    deadline: CancellationToken,
    timeout: Duration,
) {
    tokio::select! {
        _ = deadline.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
            if let Err(err) = controller.give_up_boxed(deadline).await {
                log_warn!("Manual input deadline fired too late: {err}");
            }
        }
    }
}

async fn pump_events(
    controller: PracticeController,
    mut events: mpsc::Receiver<RecognizerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(err) = controller.dispatch_boxed(event.into()).await {
                    log_warn!("Dropped recognizer event: {err}");
                }
            }
        }
    }
}
