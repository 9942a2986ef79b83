use serde::{Deserialize, Serialize};

use super::similarity::similarity;

/// Minimum similarity for an attempt to count as correct. The session's
/// `Done`/`Retrying` branch depends on this value.
pub const ACCEPT_THRESHOLD: f64 = 0.9;

const GOOD_THRESHOLD: f64 = 0.7;
const FAIR_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    Retry,
    Fair,
    Good,
    Excellent,
}

impl Tier {
    pub fn from_score(score: f64) -> Self {
        if !score.is_finite() {
            return Tier::Retry;
        }
        if score >= ACCEPT_THRESHOLD {
            Tier::Excellent
        } else if score >= GOOD_THRESHOLD {
            Tier::Good
        } else if score >= FAIR_THRESHOLD {
            Tier::Fair
        } else {
            Tier::Retry
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Excellent => "excellent",
            Tier::Good => "good",
            Tier::Fair => "fair",
            Tier::Retry => "retry",
        }
    }

    pub fn feedback(&self) -> &'static str {
        match self {
            Tier::Excellent => "훌륭해요! 완벽한 발음이에요! 🎉",
            Tier::Good => "잘했어요! 조금만 더 연습하면 완벽해질 거예요! 👍",
            Tier::Fair => "괜찮아요! 천천히 또박또박 말해보세요! 😊",
            Tier::Retry => "다시 한 번 도전해보세요! 할 수 있어요! 💪",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub accepted: bool,
    pub tier: Tier,
}

pub fn classify(score: f64) -> Outcome {
    Outcome {
        accepted: score.is_finite() && score >= ACCEPT_THRESHOLD,
        tier: Tier::from_score(score),
    }
}

/// Graded result handed back to the caller once an attempt is evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeResult {
    pub original_sentence: String,
    pub recognized_text: String,
    /// `similarity` scaled to 0–100 and rounded.
    pub score: u8,
    pub similarity: f64,
    pub tier: Tier,
    pub accepted: bool,
    pub feedback: String,
}

impl PracticeResult {
    pub fn new(original_sentence: &str, recognized_text: &str, similarity: f64) -> Self {
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let outcome = classify(similarity);
        Self {
            original_sentence: original_sentence.to_string(),
            recognized_text: recognized_text.to_string(),
            score: (similarity * 100.0).round() as u8,
            similarity,
            tier: outcome.tier,
            accepted: outcome.accepted,
            feedback: outcome.tier.feedback().to_string(),
        }
    }

    /// Score `recognized_text` against `original_sentence`.
    pub fn evaluate(original_sentence: &str, recognized_text: &str) -> Self {
        Self::new(
            original_sentence,
            recognized_text,
            similarity(original_sentence, recognized_text),
        )
    }

    /// Result used when no hypothesis could be obtained at all.
    pub fn no_speech(original_sentence: &str) -> Self {
        Self::new(original_sentence, "", 0.0)
    }
}
