use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Keys owned by the record itself; `extra` may not shadow them.
const RESERVED_KEYS: &[&str] = &[
    "id",
    "targetText",
    "hypothesisText",
    "isFinal",
    "sessionId",
    "user",
    "timestamp",
];

/// One finalized or abandoned practice attempt, as POSTed to the logging
/// endpoint. `extra` is flattened into the top-level JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: String,
    pub target_text: String,
    pub hypothesis_text: String,
    pub is_final: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttemptRecord {
    pub fn new(
        target_text: impl Into<String>,
        hypothesis_text: impl Into<String>,
        is_final: bool,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_text: target_text.into(),
            hypothesis_text: hypothesis_text.into(),
            is_final,
            session_id: session_id.into(),
            user: None,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Attach an analytics field. Keys that collide with the record's own
    /// fields are ignored.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            log::warn!("ignoring extra field '{key}' that shadows an attempt record field");
        } else {
            self.extra.insert(key, value.into());
        }
        self
    }
}
