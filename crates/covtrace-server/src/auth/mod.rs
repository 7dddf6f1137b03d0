//! Authentication and authorization
//!
//! - [`credentials`]: token issuance, authentication and renewal
//! - [`policy`]: role-based access rules
//! - [`registration`]: one-shot activation codes

pub mod credentials;
pub mod policy;
pub mod registration;

pub use credentials::{
    Credential, CredentialAuthority, CredentialConfig, CredentialError, CredentialRequest,
    IssueOptions,
};
pub use policy::{
    default_rules, AccessEnforcer, AuthorizationRule, PolicyError, AGENT_CODE_RESOURCE,
    CREDENTIALS_RESOURCE, NOTIFICATION_RESOURCE, RECORD_RESOURCE,
};
pub use registration::{RegistrationError, RegistrationGate};
