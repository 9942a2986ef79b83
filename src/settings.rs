use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/api/v1/speech/logs";
pub const ENDPOINT_ENV: &str = "READALOUD_ENDPOINT";

/// User-tunable configuration, persisted as `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PracticeSettings {
    /// Logging endpoint that receives attempt records.
    pub endpoint: String,
    pub request_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub retry_poll_secs: u64,
    /// Extra POSTs made right away when the endpoint answers non-2xx.
    pub immediate_retries: u32,
    /// Queue size past which the oldest records are evicted. 0 disables the cap.
    pub max_pending_records: usize,
    /// Recognizer language tag.
    pub language: String,
    /// How long to wait for typed text after the recognizer fails before
    /// scoring the attempt as silent.
    pub manual_input_timeout_ms: u64,
    pub user: Option<String>,
    /// Device-level id attached to every attempt record.
    pub voice_session_id: Option<String>,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            request_timeout_ms: 5_000,
            retry_base_ms: 1_000,
            retry_max_ms: 300_000,
            retry_poll_secs: 30,
            immediate_retries: 2,
            max_pending_records: 1_000,
            language: "ko-KR".into(),
            manual_input_timeout_ms: 30_000,
            user: None,
            voice_session_id: None,
        }
    }
}

impl PracticeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.retry_poll_secs.max(1))
    }

    pub fn manual_input_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_input_timeout_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<PracticeSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable as JSON. `READALOUD_ENDPOINT` overrides the
    /// endpoint without being written back.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                PracticeSettings::default()
            })
        } else {
            PracticeSettings::default()
        };

        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                data.endpoint = endpoint;
            }
        }

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> PracticeSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: PracticeSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    /// The persisted device session id, generated as `vs_<uuid>` on first use.
    pub fn voice_session_id(&self) -> Result<String> {
        if let Some(id) = self.read().voice_session_id.clone() {
            return Ok(id);
        }

        let mut guard = self.write();
        if let Some(id) = guard.voice_session_id.clone() {
            return Ok(id);
        }
        let id = format!("vs_{}", Uuid::new_v4().simple());
        guard.voice_session_id = Some(id.clone());
        self.persist(&guard)?;
        Ok(id)
    }

    fn read(&self) -> RwLockReadGuard<'_, PracticeSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PracticeSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &PracticeSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
