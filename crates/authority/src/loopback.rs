//! In-process transport wiring a device's sync manager straight to a
//! reconciler. Exercises the full device-to-authority path without a network.

use std::sync::Arc;

use async_trait::async_trait;

use gatewarden_sync::{BatchAck, BatchEnvelope, BatchTransport, TransportError};

use crate::reconciler::Reconciler;

pub struct LoopbackTransport {
    reconciler: Arc<Reconciler>,
}

impl LoopbackTransport {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl BatchTransport for LoopbackTransport {
    async fn send(&self, envelope: &BatchEnvelope) -> Result<BatchAck, TransportError> {
        self.reconciler
            .reconcile(envelope)
            .map_err(|e| TransportError::Authority(422, e.to_string()))
    }
}
