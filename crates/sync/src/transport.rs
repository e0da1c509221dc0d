//! Batch transport seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::wire::{BatchAck, BatchEnvelope};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authority error ({0}): {1}")]
    Authority(u16, String),
    #[error("response parse error: {0}")]
    Parse(String),
}

/// Transmits one batch to the Authority Reconciler and returns its ack.
///
/// Implementations perform exactly one transmission per call; retry and
/// backoff are the manager's concern.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send(&self, envelope: &BatchEnvelope) -> Result<BatchAck, TransportError>;

    /// Cheap reachability probe used by the background worker to decide
    /// whether flushing is worth attempting.
    async fn check_connectivity(&self) -> bool {
        true
    }
}

/// HTTP transport: `POST {base_url}/sync/batches` with optional bearer auth.
pub struct HttpTransport {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token: Some(token),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn send(&self, envelope: &BatchEnvelope) -> Result<BatchAck, TransportError> {
        let url = format!("{}/sync/batches", self.base_url);
        let mut req = self.client.post(&url).json(envelope);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Authority(status, body));
        }

        resp.json::<BatchAck>()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))
    }

    async fn check_connectivity(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
