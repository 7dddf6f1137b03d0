//! Synchronous entry point for location records
//!
//! Batches are size-checked and published to the task queue as-is. Record
//! signatures are not inspected here; the worker re-validates every record
//! against the submitter's resolved identity.

use covtrace_core::{CredentialClaims, RecordBatch, MAX_BATCH_SIZE};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, Publisher, TaskMessage, DID_HEADER, LOCATION_RECORD, TASKS_EXCHANGE};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Batch of {size} records exceeds the limit of {MAX_BATCH_SIZE}")]
    BatchTooLarge { size: usize },

    #[error("Failed to encode batch: {0}")]
    Serialization(String),

    #[error("Task queue unavailable: {0}")]
    Unavailable(#[from] BrokerError),
}

/// Publishes record batches for asynchronous validation
#[derive(Debug, Clone)]
pub struct RecordIngestPipeline {
    publisher: Arc<dyn Publisher>,
    exchange: String,
}

impl RecordIngestPipeline {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            exchange: TASKS_EXCHANGE.to_string(),
        }
    }

    /// Publish to a different exchange
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Queue `batch` on behalf of the credential holder.
    ///
    /// Returns the broker's acceptance flag. Publish failures are not retried.
    pub async fn accept(
        &self,
        claims: &CredentialClaims,
        batch: &RecordBatch,
    ) -> Result<bool, IngestError> {
        if batch.is_oversized() {
            warn!(did = %claims.did, size = batch.len(), "Rejected oversized record batch");
            return Err(IngestError::BatchTooLarge { size: batch.len() });
        }
        if batch.is_empty() {
            debug!(did = %claims.did, "Empty record batch, nothing to queue");
            return Ok(true);
        }

        let message = TaskMessage::json(LOCATION_RECORD, batch)
            .map_err(|e| IngestError::Serialization(e.to_string()))?
            .with_header(DID_HEADER, claims.did.as_str())
            .persistent();
        let message_id = message.message_id.clone();

        let accepted = self.publisher.publish(&self.exchange, message).await?;
        info!(
            did = %claims.did,
            role = %claims.role,
            records = batch.len(),
            message_id = %message_id,
            accepted,
            "Record batch queued"
        );
        Ok(accepted)
    }
}
