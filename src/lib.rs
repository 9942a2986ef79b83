pub mod db;
pub mod error;
pub mod matching;
pub mod recognizer;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use db::Database;
use recognizer::HypothesisSource;
use session::{AttemptContext, PracticeController};
use settings::SettingsStore;
use telemetry::{
    ConnectivityMonitor, FlushReport, HttpTransport, QueueConfig, TelemetryQueue, Transport,
};

pub use error::{DeliveryError, PracticeError};
pub use matching::{PracticeResult, Tier};

const DB_FILE: &str = "readaloud.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Everything a practice screen needs: settings, the durable telemetry queue
/// and its background worker.
pub struct PracticeApp {
    settings: SettingsStore,
    queue: TelemetryQueue,
    worker_cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl PracticeApp {
    /// Open the data directory and post records to the configured endpoint.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let transport = Arc::new(HttpTransport::from_settings(&settings.get()));
        info!("Attempt records go to {}", transport.endpoint());
        Self::open_with(data_dir, settings, transport).await
    }

    pub async fn open_with_transport(
        data_dir: &Path,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        Self::open_with(data_dir, settings, transport).await
    }

    async fn open_with(
        data_dir: &Path,
        settings: SettingsStore,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DB_FILE))?;
        let queue = TelemetryQueue::new(
            db,
            transport,
            ConnectivityMonitor::default(),
            QueueConfig::from_settings(&settings.get()),
        );

        // Records left over from a previous run go out first.
        let recovered = queue.pending_count().await?;
        if recovered > 0 {
            warn!("Recovered {recovered} undelivered attempt record(s); flushing");
            let startup = queue.clone();
            tokio::spawn(async move {
                startup.flush().await;
            });
        }

        let worker_cancel = CancellationToken::new();
        let worker = {
            let queue = queue.clone();
            let cancel = worker_cancel.clone();
            tokio::spawn(async move { queue.run(cancel).await })
        };

        Ok(Self {
            settings,
            queue,
            worker_cancel,
            worker: Some(worker),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn queue(&self) -> &TelemetryQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.queue.connectivity()
    }

    /// A controller for one practice sentence, stamped with this device's
    /// voice session id.
    pub fn new_session(
        &self,
        target_text: impl Into<String>,
        source: HypothesisSource,
    ) -> Result<PracticeController> {
        let settings = self.settings.get();
        let manual_input_timeout = settings.manual_input_timeout();
        let context = AttemptContext {
            session_id: self.settings.voice_session_id()?,
            user: settings.user,
            language: settings.language,
        };
        Ok(PracticeController::new(
            target_text,
            source,
            self.queue.clone(),
            context,
        )?
        .with_manual_input_timeout(manual_input_timeout))
    }

    pub async fn flush(&self) -> FlushReport {
        self.queue.flush().await
    }

    /// Stop the background worker. Undelivered records stay on disk.
    pub async fn shutdown(mut self) {
        self.worker_cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!("Telemetry worker ended abnormally: {err}");
            }
        }
    }
}

impl Drop for PracticeApp {
    fn drop(&mut self) {
        self.worker_cancel.cancel();
    }
}
