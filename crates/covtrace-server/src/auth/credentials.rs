//! Credential issuance and renewal
//!
//! Access tokens are EdDSA JWTs signed with the server master key. Each
//! token comes with a refresh code, a keyed hash of the token string under
//! the server's refresh secret, which allows renewing the token after it
//! expires. Nothing is stored server-side: validity is decided by the
//! signature and the claims alone.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use covtrace_core::{
    constant_time_eq, signature, CredentialClaims, Role, ServerKeys, SignatureError,
};
use covtrace_resolver::{ResolveError, ResolverRegistry};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::registration::{RegistrationError, RegistrationGate};

/// Errors from the credential authority
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credentials for role 'admin' cannot be requested")]
    AdminNotAllowed,

    #[error("Failed to resolve DID: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Invalid activation proof: {0}")]
    InvalidProof(#[from] SignatureError),

    #[error("Invalid activation code")]
    InvalidActivationCode,

    #[error("Invalid refresh code")]
    RefreshCodeMismatch,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Token settings
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Issuer and audience of every token
    pub server_name: String,
    /// Validity of a freshly issued token
    pub token_lifetime: chrono::Duration,
    /// Tolerated clock skew on `iat`, in seconds
    pub iat_leeway_secs: i64,
}

impl CredentialConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            token_lifetime: chrono::Duration::hours(168),
            iat_leeway_secs: 30,
        }
    }

    pub fn with_token_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }
}

/// A credential request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub did: String,
    pub role: Role,
    pub activation_code: String,
    /// LD signature over the activation code
    pub proof: serde_json::Value,
}

/// An access token plus its refresh code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_code: String,
}

/// How strictly [`CredentialAuthority::issue`] gates a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueOptions {
    /// Consume the activation code
    pub require_code: bool,
    /// Permit role=admin
    pub allow_admin: bool,
}

impl IssueOptions {
    /// Options for requests arriving over the network
    pub const fn strict() -> Self {
        Self {
            require_code: true,
            allow_admin: false,
        }
    }

    /// Options for a privileged local caller bootstrapping the platform
    pub const fn bootstrap() -> Self {
        Self {
            require_code: false,
            allow_admin: true,
        }
    }
}

/// Issues and renews bearer credentials
pub struct CredentialAuthority {
    config: CredentialConfig,
    keys: Arc<ServerKeys>,
    resolver: Arc<ResolverRegistry>,
    registration: RegistrationGate,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for CredentialAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialAuthority")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .finish()
    }
}

impl CredentialAuthority {
    pub fn new(
        config: CredentialConfig,
        keys: Arc<ServerKeys>,
        resolver: Arc<ResolverRegistry>,
        registration: RegistrationGate,
    ) -> Result<Self, CredentialError> {
        let der = keys
            .signing_key()
            .to_pkcs8_der()
            .map_err(|e| CredentialError::Signing(e.to_string()))?;
        let encoding_key = EncodingKey::from_ed_der(&der);
        let decoding_key = DecodingKey::from_ed_der(&keys.signing_key().verifying_key_bytes());

        Ok(Self {
            config,
            keys,
            resolver,
            registration,
            encoding_key,
            decoding_key,
        })
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Issue a credential for a verified identity
    pub async fn issue(
        &self,
        request: &CredentialRequest,
        options: IssueOptions,
    ) -> Result<Credential, CredentialError> {
        if request.role == Role::Admin && !options.allow_admin {
            warn!(did = %request.did, "Rejected credential request for admin role");
            return Err(CredentialError::AdminNotAllowed);
        }

        let identity = self.resolver.resolve(&request.did).await?;
        signature::verify_value(
            &identity,
            request.activation_code.as_bytes(),
            &request.proof,
        )?;

        if options.require_code
            && !self
                .registration
                .consume_code(&request.did, request.role, &request.activation_code)
                .await?
        {
            warn!(did = %request.did, role = %request.role, "Activation code rejected");
            return Err(CredentialError::InvalidActivationCode);
        }

        let credential = self.token_for(&request.did, request.role)?;
        info!(did = %request.did, role = %request.role, "Credential issued");
        Ok(credential)
    }

    /// Validate a token, optionally ignoring its expiration
    pub fn authenticate(
        &self,
        token: &str,
        check_expiration: bool,
    ) -> Result<CredentialClaims, CredentialError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&self.config.server_name]);
        validation.set_audience(&[&self.config.server_name]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_exp = check_expiration;
        validation.validate_nbf = true;
        validation.leeway = 0;

        let claims = decode::<CredentialClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| CredentialError::InvalidToken(e.to_string()))?
            .claims;

        let now = chrono::Utc::now().timestamp();
        if claims.iat > now + self.config.iat_leeway_secs {
            return Err(CredentialError::InvalidToken("token issued in the future".into()));
        }
        if claims.sub != claims.did {
            return Err(CredentialError::InvalidToken("subject does not match DID".into()));
        }
        Ok(claims)
    }

    /// Exchange a possibly expired token and its refresh code for a new credential
    pub fn renew(&self, token: &str, refresh_code: &str) -> Result<Credential, CredentialError> {
        let claims = self.authenticate(token, false)?;

        let expected = self.refresh_code(token);
        if !constant_time_eq(expected.as_bytes(), refresh_code.as_bytes()) {
            warn!(did = %claims.did, jti = %claims.jti, "Refresh code mismatch");
            return Err(CredentialError::RefreshCodeMismatch);
        }

        let credential = self.token_for(&claims.did, claims.role)?;
        info!(did = %claims.did, role = %claims.role, "Credential renewed");
        Ok(credential)
    }

    /// Refresh code for a token string
    pub fn refresh_code(&self, token: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.keys.refresh_hasher().keyed_hash(token.as_bytes()))
    }

    fn token_for(&self, did: &str, role: Role) -> Result<Credential, CredentialError> {
        let claims = CredentialClaims::new(
            &self.config.server_name,
            did,
            role,
            chrono::Utc::now(),
            self.config.token_lifetime,
        );
        self.sign(&claims)
    }

    /// Sign arbitrary claims with the master key
    pub(crate) fn sign(&self, claims: &CredentialClaims) -> Result<Credential, CredentialError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.keys.signing_key().kid().to_string());

        let access_token = encode(&header, claims, &self.encoding_key)
            .map_err(|e| CredentialError::Signing(e.to_string()))?;
        let refresh_code = self.refresh_code(&access_token);
        Ok(Credential {
            access_token,
            refresh_code,
        })
    }
}
