//! DID resolution
//!
//! Identities are resolved through a registry of method providers:
//!
//! - **HTTP**: fetches documents from a resolution endpoint and caches them
//! - **Memory**: serves documents registered in-process (tests, local setups)
//!
//! ## Usage
//!
//! ```ignore
//! use covtrace_resolver::{providers::HttpResolver, ProviderConfig, ResolverRegistry};
//!
//! let registry = ResolverRegistry::new().with_provider(HttpResolver::new(
//!     ProviderConfig::new("bryk", "https://did.bryk.io/v1/retrieve?subject={did}"),
//! )?);
//!
//! let identity = registry.resolve("did:bryk:4d81bd52-2edb-4703-b8fc-b26d514e9c56").await?;
//! ```

pub mod error;
pub mod providers;
pub mod registry;
pub mod types;

pub use error::{ResolveError, Result};
pub use registry::{DidResolver, ResolverRegistry};
pub use types::ProviderConfig;
