//! Role-based access control
//!
//! Rules bind a role to resource and action patterns. Patterns are regular
//! expressions anchored at both ends. Evaluation is default-deny.

use covtrace_core::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Resource guarding credential renewal
pub const CREDENTIALS_RESOURCE: &str = "/credentials";

/// Resource guarding record submission
pub const RECORD_RESOURCE: &str = "/record";

/// Resource guarding notification dispatch
pub const NOTIFICATION_RESOURCE: &str = "/notification";

/// Resource guarding agent activation codes
pub const AGENT_CODE_RESOURCE: &str = "/activation_code/agent";

/// Errors building a policy
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse policy file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single authorization rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRule {
    pub subject: Role,
    pub resource: String,
    pub action: String,
}

impl AuthorizationRule {
    pub fn new(subject: Role, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject,
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Rules applied when no policy file is configured
pub fn default_rules() -> Vec<AuthorizationRule> {
    vec![
        AuthorizationRule::new(Role::User, CREDENTIALS_RESOURCE, "renew"),
        AuthorizationRule::new(Role::User, RECORD_RESOURCE, "create"),
        AuthorizationRule::new(Role::Agent, CREDENTIALS_RESOURCE, "renew"),
        AuthorizationRule::new(Role::Agent, RECORD_RESOURCE, "create"),
        AuthorizationRule::new(Role::Agent, NOTIFICATION_RESOURCE, "create"),
        AuthorizationRule::new(Role::Admin, ".*", ".*"),
    ]
}

#[derive(Debug)]
struct CompiledRule {
    rule: AuthorizationRule,
    resource: Regex,
    action: Regex,
}

fn compile(pattern: &str) -> Result<Regex, PolicyError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| PolicyError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Evaluates authorization rules
#[derive(Debug)]
pub struct AccessEnforcer {
    rules: Vec<CompiledRule>,
}

impl AccessEnforcer {
    /// Compile a rule table; any invalid pattern fails the whole table
    pub fn new(rules: Vec<AuthorizationRule>) -> Result<Self, PolicyError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                Ok(CompiledRule {
                    resource: compile(&rule.resource)?,
                    action: compile(&rule.action)?,
                    rule,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self { rules })
    }

    /// Enforcer with [`default_rules`]
    pub fn with_default_rules() -> Result<Self, PolicyError> {
        Self::new(default_rules())
    }

    /// Load a JSON array of rules
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        let rules: Vec<AuthorizationRule> = serde_json::from_str(&contents)?;
        Self::new(rules)
    }

    /// Whether `role` may perform `action` on `resource`
    pub fn evaluate(&self, role: Role, resource: &str, action: &str) -> bool {
        self.rules.iter().any(|compiled| {
            compiled.rule.subject == role
                && compiled.resource.is_match(resource)
                && compiled.action.is_match(action)
        })
    }

    /// Number of rules loaded
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
