//! covtrace server
//!
//! Credential authority and record-integrity pipeline of the covtrace
//! contact-tracing backend:
//! - Issues and renews bearer credentials bound to DIDs
//! - Enforces role-based access on every authenticated call
//! - Queues signed location records for asynchronous validation
//! - Validates queued records and stores the valid subset
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check (store and broker reachable)
//! - `GET /v1/ping` - Ping
//! - `POST /v1/activation_code` - Generate an activation code
//! - `POST /v1/credentials` - Exchange a signed activation code for a credential
//! - `POST /v1/credentials/renew` - Renew a credential with its refresh code
//! - `POST /v1/record` - Submit a batch of location records
//! - `POST /v1/identifier` - Generate a new DID document

pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
pub mod ingest;
pub mod storage;
pub mod supervisor;
pub mod worker;

pub use api::create_router;
pub use api::handlers::{ApiConfig, AppState};
pub use auth::{AccessEnforcer, CredentialAuthority, CredentialConfig, RegistrationGate};
pub use broker::{Consumer, MemoryBroker, Publisher};
pub use config::Settings;
pub use ingest::RecordIngestPipeline;
pub use storage::{MemoryStore, Store};
pub use supervisor::Supervisor;
pub use worker::RecordValidator;
