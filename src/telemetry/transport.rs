use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::{db::AttemptRecord, error::DeliveryError, settings::PracticeSettings};

/// Delivers one attempt record to the logging endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, record: &AttemptRecord) -> Result<(), DeliveryError>;
}

/// JSON POST over HTTP. Any 2xx is success.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    immediate_retries: u32,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, immediate_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                log::warn!("Falling back to default HTTP client: {err}");
                reqwest::Client::new()
            });

        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            immediate_retries,
        }
    }

    pub fn from_settings(settings: &PracticeSettings) -> Self {
        Self::new(
            settings.endpoint.clone(),
            settings.request_timeout(),
            settings.immediate_retries,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, record: &AttemptRecord) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(record)?;
        let mut remaining = self.immediate_retries;

        loop {
            let response = self
                .client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::CACHE_CONTROL, "no-store")
                .body(body.clone())
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        DeliveryError::Timeout(self.timeout)
                    } else {
                        DeliveryError::Network(err.to_string())
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if remaining == 0 {
                return Err(DeliveryError::Status(status.as_u16()));
            }
            remaining -= 1;
            debug!(
                "Logging endpoint answered {status} for record {}; retrying immediately ({remaining} left)",
                record.id
            );
        }
    }
}
