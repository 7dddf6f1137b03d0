//! Asynchronous task processing
//!
//! The worker consumes the `tasks` queue. Location record batches are
//! re-validated record by record against the submitter's resolved identity
//! and the surviving subset is stored in one bulk insert. New identifiers
//! are handed to the directory publisher.
//!
//! Every delivery is acknowledged once processing finishes, whatever the
//! outcome. A storage failure therefore loses the batch; it is only logged.

pub mod publish;

pub use publish::{
    DirectoryPublisher, DisabledPublisher, PowDirectoryPublisher, PublishError, PublishTicket,
    DEFAULT_DIFFICULTY, DEFAULT_DIRECTORY_ENDPOINT, MAX_DIFFICULTY,
};

use covtrace_core::{validate_record, DidDocument, LocationRecord, RecordBatch};
use covtrace_resolver::ResolverRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, TaskMessage, DID_HEADER, LOCATION_RECORD, NEW_DID};
use crate::storage::Store;

/// What happened to a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Valid records stored, invalid ones dropped
    Persisted { stored: u64, dropped: usize },
    /// Records validated but the store failed
    PersistFailed { valid: usize },
    /// Identifier handed to the directory publisher
    DidPublished,
    /// Task could not be processed at all
    Discarded(String),
    /// Unrecognized message kind
    Unknown(String),
}

/// Validates and persists queued tasks
#[derive(Debug, Clone)]
pub struct RecordValidator {
    resolver: Arc<ResolverRegistry>,
    store: Arc<dyn Store>,
    directory: Arc<dyn DirectoryPublisher>,
}

impl RecordValidator {
    pub fn new(
        resolver: Arc<ResolverRegistry>,
        store: Arc<dyn Store>,
        directory: Arc<dyn DirectoryPublisher>,
    ) -> Self {
        Self {
            resolver,
            store,
            directory,
        }
    }

    /// Process a delivery and acknowledge it
    pub async fn handle(&self, delivery: Delivery) -> TaskOutcome {
        let outcome = self.process(&delivery.message).await;
        let message_id = delivery.message.message_id.clone();
        if let Err(e) = delivery.ack().await {
            error!(message_id = %message_id, error = %e, "Failed to acknowledge task");
        }
        outcome
    }

    /// Process a task without acknowledging it
    pub async fn process(&self, message: &TaskMessage) -> TaskOutcome {
        match message.kind.as_str() {
            LOCATION_RECORD => self.location_records(message).await,
            NEW_DID => self.new_did(message).await,
            other => {
                warn!(
                    kind = %other,
                    message_id = %message.message_id,
                    content_type = %message.content_type,
                    size = message.body.len(),
                    "Invalid message type"
                );
                TaskOutcome::Unknown(other.to_string())
            }
        }
    }

    async fn location_records(&self, message: &TaskMessage) -> TaskOutcome {
        let Some(did) = message.header(DID_HEADER) else {
            error!(message_id = %message.message_id, "Record task without submitter DID");
            return TaskOutcome::Discarded("missing submitter".into());
        };

        let batch: RecordBatch = match serde_json::from_slice(&message.body) {
            Ok(batch) => batch,
            Err(e) => {
                error!(did = %did, error = %e, "Invalid record contents");
                return TaskOutcome::Discarded(format!("undecodable batch: {e}"));
            }
        };

        let identity = match self.resolver.resolve(did).await {
            Ok(identity) => identity,
            Err(e) => {
                error!(did = %did, error = %e, "Failed to resolve submitter");
                return TaskOutcome::Discarded(format!("unresolvable submitter: {e}"));
            }
        };

        let now = chrono::Utc::now().timestamp();
        let total = batch.len();
        let valid: Vec<LocationRecord> = batch
            .records
            .into_iter()
            .filter(|record| match validate_record(&identity, record, now) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(did = %did, hash = %record.hash, reason = %reason, "Dropped record");
                    false
                }
            })
            .collect();
        let dropped = total - valid.len();

        match self.store.insert_location_records(&valid).await {
            Ok(stored) => {
                info!(
                    did = %did,
                    timestamp = message.timestamp / 1000,
                    stored,
                    dropped,
                    "Location record processed"
                );
                TaskOutcome::Persisted { stored, dropped }
            }
            Err(e) => {
                error!(did = %did, error = %e, records = valid.len(), "Failed to save records");
                TaskOutcome::PersistFailed { valid: valid.len() }
            }
        }
    }

    async fn new_did(&self, message: &TaskMessage) -> TaskOutcome {
        let document: DidDocument = match serde_json::from_slice(&message.body) {
            Ok(document) => document,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Invalid message contents");
                return TaskOutcome::Discarded(format!("undecodable document: {e}"));
            }
        };

        match self.directory.publish(&document).await {
            Ok(()) => TaskOutcome::DidPublished,
            Err(e) => {
                warn!(did = %document.id, error = %e, "Failed to publish DID");
                TaskOutcome::Discarded(format!("publish failed: {e}"))
            }
        }
    }
}
