use serde::{Deserialize, Serialize};

use crate::{
    error::PracticeError,
    matching::{comparison_key, PracticeResult},
    recognizer::RecognizerEvent,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Finalizing,
    Evaluated,
    Retrying,
    Done,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Cancelled)
    }
}

/// Inputs to a session: user commands and recognizer callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start,
    Hypothesis { text: String, is_final: bool },
    EndOfSpeech,
    RecognizerError { message: String },
    /// Typed text after a recognizer failure. `None` means nothing was entered.
    ManualHypothesis(Option<String>),
    Retry,
    Cancel,
}

impl From<RecognizerEvent> for SessionEvent {
    fn from(event: RecognizerEvent) -> Self {
        match event {
            RecognizerEvent::Transcript { text, is_final } => {
                SessionEvent::Hypothesis { text, is_final }
            }
            RecognizerEvent::End => SessionEvent::EndOfSpeech,
            RecognizerEvent::Error { message } => SessionEvent::RecognizerError { message },
        }
    }
}

/// Side effects a transition asks the caller to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    StartRecognizer,
    StopRecognizer,
    TranscriptUpdated(String),
    AwaitManualInput { reason: String },
    Evaluated(PracticeResult),
    EmitAttempt {
        hypothesis: String,
        is_final: bool,
        result: Option<PracticeResult>,
    },
}

/// Outcome of applying one event. `path` lists every state entered, in
/// order, so pass-through states stay observable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transition {
    pub from: SessionState,
    pub path: Vec<SessionState>,
    pub effects: Vec<SessionEffect>,
}

impl Transition {
    fn begin(from: SessionState) -> Self {
        Self {
            from,
            path: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn to(&self) -> SessionState {
        self.path.last().copied().unwrap_or(self.from)
    }

    pub fn is_noop(&self) -> bool {
        self.path.is_empty() && self.effects.is_empty()
    }

    fn enter(&mut self, state: SessionState) {
        self.path.push(state);
    }

    fn effect(&mut self, effect: SessionEffect) {
        self.effects.push(effect);
    }
}

/// One read-aloud verification: a fixed target sentence and the hypotheses
/// collected for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    state: SessionState,
    target_text: String,
    /// Final segments heard so far in the current attempt.
    committed: String,
    /// `committed` plus the latest interim segment.
    transcript: String,
    result: Option<PracticeResult>,
    /// 1-based attempt counter; bumped by each retry.
    attempt: u32,
    recognizer_error: Option<String>,
}

impl VerificationSession {
    pub fn new(target_text: impl Into<String>) -> Result<Self, PracticeError> {
        let target_text = target_text.into();
        if comparison_key(&target_text).is_empty() {
            return Err(PracticeError::EmptyTarget);
        }

        Ok(Self {
            state: SessionState::Idle,
            target_text,
            committed: String::new(),
            transcript: String::new(),
            result: None,
            attempt: 1,
            recognizer_error: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target_text(&self) -> &str {
        &self.target_text
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn result(&self) -> Option<&PracticeResult> {
        self.result.as_ref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn recognizer_error(&self) -> Option<&str> {
        self.recognizer_error.as_deref()
    }

    /// Finalizing is only a resting state while waiting for typed input.
    pub fn awaiting_manual_input(&self) -> bool {
        self.state == SessionState::Finalizing
    }

    /// Apply `event` and return the states entered plus the effects to run.
    ///
    /// Recognizer callbacks that arrive in a state that no longer listens are
    /// ignored. User commands that make no sense in the current state are
    /// rejected.
    pub fn apply(&mut self, event: SessionEvent) -> Result<Transition, PracticeError> {
        let mut transition = Transition::begin(self.state);

        match (self.state, event) {
            (SessionState::Idle, SessionEvent::Start) => {
                self.move_to(&mut transition, SessionState::Listening);
                transition.effect(SessionEffect::StartRecognizer);
            }

            (SessionState::Listening, SessionEvent::Hypothesis { text, is_final: false }) => {
                self.transcript = join_segments(&self.committed, &text);
                transition.effect(SessionEffect::TranscriptUpdated(self.transcript.clone()));
            }
            (SessionState::Listening, SessionEvent::Hypothesis { text, is_final: true }) => {
                self.committed = join_segments(&self.committed, &text);
                self.transcript = self.committed.clone();
                transition.effect(SessionEffect::TranscriptUpdated(self.transcript.clone()));
                transition.effect(SessionEffect::StopRecognizer);
                let hypothesis = self.committed.clone();
                self.evaluate(&mut transition, hypothesis);
            }
            (SessionState::Listening, SessionEvent::EndOfSpeech) => {
                transition.effect(SessionEffect::StopRecognizer);
                let hypothesis = self.committed.clone();
                self.evaluate(&mut transition, hypothesis);
            }
            (SessionState::Listening, SessionEvent::RecognizerError { message }) => {
                self.recognizer_error = Some(message.clone());
                self.move_to(&mut transition, SessionState::Finalizing);
                transition.effect(SessionEffect::StopRecognizer);
                transition.effect(SessionEffect::AwaitManualInput { reason: message });
            }
            (SessionState::Listening, SessionEvent::ManualHypothesis(text)) => {
                transition.effect(SessionEffect::StopRecognizer);
                self.evaluate_manual(&mut transition, text);
            }

            (SessionState::Finalizing, SessionEvent::ManualHypothesis(text)) => {
                self.evaluate_manual(&mut transition, text);
            }

            (SessionState::Evaluated, SessionEvent::Retry) => {
                self.move_to(&mut transition, SessionState::Retrying);
                self.attempt += 1;
                self.committed.clear();
                self.transcript.clear();
                self.result = None;
                self.recognizer_error = None;
                self.move_to(&mut transition, SessionState::Listening);
                transition.effect(SessionEffect::StartRecognizer);
            }

            (SessionState::Listening | SessionState::Finalizing, SessionEvent::Cancel) => {
                if self.state == SessionState::Listening {
                    transition.effect(SessionEffect::StopRecognizer);
                }
                transition.effect(SessionEffect::EmitAttempt {
                    hypothesis: self.transcript.clone(),
                    is_final: false,
                    result: None,
                });
                self.move_to(&mut transition, SessionState::Cancelled);
            }
            // A rejected attempt the user walks away from is logged again as abandoned.
            (SessionState::Evaluated, SessionEvent::Cancel) => {
                let result = self.result.clone();
                transition.effect(SessionEffect::EmitAttempt {
                    hypothesis: result
                        .as_ref()
                        .map(|r| r.recognized_text.clone())
                        .unwrap_or_else(|| self.transcript.clone()),
                    is_final: false,
                    result,
                });
                self.move_to(&mut transition, SessionState::Cancelled);
            }
            (SessionState::Idle, SessionEvent::Cancel) => {
                self.move_to(&mut transition, SessionState::Cancelled);
            }
            (state, SessionEvent::Cancel) if state.is_terminal() => {}

            // Late recognizer callbacks.
            (
                _,
                SessionEvent::Hypothesis { .. }
                | SessionEvent::EndOfSpeech
                | SessionEvent::RecognizerError { .. },
            ) => {}

            (state, event) => {
                return Err(PracticeError::InvalidTransition {
                    state,
                    command: command_name(&event),
                });
            }
        }

        Ok(transition)
    }

    fn move_to(&mut self, transition: &mut Transition, state: SessionState) {
        self.state = state;
        transition.enter(state);
    }

    fn evaluate_manual(&mut self, transition: &mut Transition, text: Option<String>) {
        let typed = text.filter(|t| !t.trim().is_empty());
        match typed {
            Some(text) => {
                self.committed = text.clone();
                self.transcript = text.clone();
                self.evaluate(transition, text);
            }
            None => {
                self.enter_finalizing(transition);
                let result = PracticeResult::no_speech(&self.target_text);
                self.finish(transition, String::new(), result);
            }
        }
    }

    /// Score `hypothesis` exactly once and emit the final attempt.
    fn evaluate(&mut self, transition: &mut Transition, hypothesis: String) {
        self.enter_finalizing(transition);
        let result = PracticeResult::evaluate(&self.target_text, &hypothesis);
        self.finish(transition, hypothesis, result);
    }

    fn enter_finalizing(&mut self, transition: &mut Transition) {
        if self.state != SessionState::Finalizing {
            self.move_to(transition, SessionState::Finalizing);
        }
    }

    fn finish(&mut self, transition: &mut Transition, hypothesis: String, result: PracticeResult) {
        self.result = Some(result.clone());
        self.move_to(transition, SessionState::Evaluated);
        transition.effect(SessionEffect::Evaluated(result.clone()));
        let accepted = result.accepted;
        transition.effect(SessionEffect::EmitAttempt {
            hypothesis,
            is_final: true,
            result: Some(result),
        });
        if accepted {
            self.move_to(transition, SessionState::Done);
        }
    }
}

fn join_segments(committed: &str, segment: &str) -> String {
    let segment = segment.trim();
    match (committed.is_empty(), segment.is_empty()) {
        (_, true) => committed.to_string(),
        (true, false) => segment.to_string(),
        (false, false) => format!("{committed} {segment}"),
    }
}

fn command_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Start => "start",
        SessionEvent::Retry => "retry",
        SessionEvent::Cancel => "cancel",
        SessionEvent::ManualHypothesis(_) => "submit manual input",
        SessionEvent::Hypothesis { .. } => "accept hypothesis",
        SessionEvent::EndOfSpeech => "end speech",
        SessionEvent::RecognizerError { .. } => "report recognizer error",
    }
}
