use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 32;

/// What an external speech recognizer reports while listening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RecognizerEvent {
    Transcript { text: String, is_final: bool },
    /// End of speech; no more transcripts for this run.
    End,
    Error { message: String },
}

impl RecognizerEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        RecognizerEvent::Transcript {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        RecognizerEvent::Transcript {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RecognizerEvent::Error {
            message: message.into(),
        }
    }
}

/// A platform speech-to-text engine.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin listening in `language`; events arrive on the returned channel
    /// until it closes.
    async fn start(&self, language: &str) -> Result<mpsc::Receiver<RecognizerEvent>>;

    async fn stop(&self);
}

/// Where a session gets its hypothesis from.
#[derive(Clone)]
pub enum HypothesisSource {
    NativeRecognizer(Arc<dyn Recognizer>),
    /// Typed text standing in for a recognizer result.
    ManualInput(String),
    Unavailable,
}

impl std::fmt::Debug for HypothesisSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HypothesisSource::NativeRecognizer(_) => f.write_str("NativeRecognizer"),
            HypothesisSource::ManualInput(text) => f.debug_tuple("ManualInput").field(text).finish(),
            HypothesisSource::Unavailable => f.write_str("Unavailable"),
        }
    }
}

impl HypothesisSource {
    /// Start producing events. Failures to start become an `Error` event so
    /// the session can take its degraded path.
    pub async fn open(&self, language: &str) -> mpsc::Receiver<RecognizerEvent> {
        match self {
            HypothesisSource::NativeRecognizer(recognizer) => {
                match recognizer.start(language).await {
                    Ok(events) => events,
                    Err(err) => {
                        log::warn!("Speech recognizer failed to start: {err:#}");
                        scripted(vec![RecognizerEvent::error(format!("start failed: {err}"))])
                    }
                }
            }
            HypothesisSource::ManualInput(text) => scripted(vec![
                RecognizerEvent::final_text(text.clone()),
                RecognizerEvent::End,
            ]),
            HypothesisSource::Unavailable => scripted(vec![RecognizerEvent::error(
                "speech recognition is not available",
            )]),
        }
    }

    pub async fn stop(&self) {
        if let HypothesisSource::NativeRecognizer(recognizer) = self {
            recognizer.stop().await;
        }
    }
}

fn scripted(events: Vec<RecognizerEvent>) -> mpsc::Receiver<RecognizerEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER.max(events.len()));
    for event in events {
        // Capacity covers every event and the receiver is still alive.
        let _ = tx.try_send(event);
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct BrokenRecognizer;

    #[async_trait]
    impl Recognizer for BrokenRecognizer {
        async fn start(&self, _language: &str) -> Result<mpsc::Receiver<RecognizerEvent>> {
            Err(anyhow!("microphone permission denied"))
        }

        async fn stop(&self) {}
    }

    async fn drain(mut rx: mpsc::Receiver<RecognizerEvent>) -> Vec<RecognizerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn manual_input_is_a_final_transcript() {
        let events = drain(HypothesisSource::ManualInput("나는 최고야".into()).open("ko-KR").await).await;
        assert_eq!(
            events,
            vec![RecognizerEvent::final_text("나는 최고야"), RecognizerEvent::End]
        );
    }

    #[tokio::test]
    async fn unavailable_reports_an_error() {
        let events = drain(HypothesisSource::Unavailable.open("ko-KR").await).await;
        assert!(matches!(events.as_slice(), [RecognizerEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn failed_start_reports_an_error() {
        let source = HypothesisSource::NativeRecognizer(Arc::new(BrokenRecognizer));
        let events = drain(source.open("ko-KR").await).await;
        match events.as_slice() {
            [RecognizerEvent::Error { message }] => assert!(message.contains("permission")),
            other => panic!("unexpected events {other:?}"),
        }
    }
}
