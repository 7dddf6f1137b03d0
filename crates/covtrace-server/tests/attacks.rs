//! Adversarial tests
//!
//! Attempts a misbehaving client could make against the credential authority
//! and the record pipeline:
//! - Admin escalation through the public issuance path
//! - Forged, tampered or foreign credentials and refresh codes
//! - Activation code replay
//! - Proofs signed by the wrong key
//! - Records submitted on behalf of another identity

use covtrace_core::{
    signature, DidDocument, LocationRecord, RecordBatch, RefreshHash, Role, ServerKeys,
    MASTER_KEY_ID,
};
use covtrace_resolver::{providers::MemoryResolver, ResolverRegistry};
use covtrace_server::{
    api::error::ApiError,
    auth::{CredentialError, CredentialRequest, IssueOptions},
    broker::{TaskMessage, DID_HEADER, LOCATION_RECORD},
    worker::{DisabledPublisher, TaskOutcome},
    CredentialAuthority, CredentialConfig, MemoryStore, RecordValidator, RegistrationGate,
};
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

const SERVER_NAME: &str = "covtrace.test";

struct Harness {
    dids: Arc<MemoryResolver>,
    resolver: Arc<ResolverRegistry>,
    store: Arc<MemoryStore>,
    registration: RegistrationGate,
}

impl Harness {
    fn new() -> Self {
        let dids = Arc::new(MemoryResolver::new("test"));
        let mut registry = ResolverRegistry::new();
        registry.register_arc(dids.clone());
        let store = Arc::new(MemoryStore::new());
        Self {
            dids,
            resolver: Arc::new(registry),
            registration: RegistrationGate::new(store.clone()),
            store,
        }
    }

    fn authority(&self, keys: ServerKeys) -> CredentialAuthority {
        CredentialAuthority::new(
            CredentialConfig::new(SERVER_NAME),
            Arc::new(keys),
            self.resolver.clone(),
            self.registration.clone(),
        )
        .unwrap()
    }

    fn identity(&self) -> DidDocument {
        let mut document = DidDocument::generate("test").unwrap();
        document.add_new_key(MASTER_KEY_ID).unwrap();
        document.add_authentication_key(MASTER_KEY_ID).unwrap();
        self.dids.insert(&document);
        document
    }

    fn validator(&self) -> RecordValidator {
        RecordValidator::new(
            self.resolver.clone(),
            self.store.clone(),
            Arc::new(DisabledPublisher),
        )
    }

    async fn request(&self, document: &DidDocument, role: Role) -> CredentialRequest {
        let code = self.registration.generate_code(&document.id, role).await.unwrap();
        CredentialRequest {
            did: document.id.clone(),
            role,
            proof: proof_over(document, code.as_bytes()),
            activation_code: code,
        }
    }
}

fn proof_over(document: &DidDocument, payload: &[u8]) -> serde_json::Value {
    let key = document.key_pair(MASTER_KEY_ID).unwrap();
    serde_json::to_value(signature::sign(
        &key,
        document.key_id(MASTER_KEY_ID),
        payload,
        SERVER_NAME,
    ))
    .unwrap()
}

fn signed_record(document: &DidDocument, did: &str, timestamp: i64) -> LocationRecord {
    let key = document.key_pair(MASTER_KEY_ID).unwrap();
    LocationRecord::new(did, 4.711, -74.072, 2640.0, timestamp)
        .sign(&key, &document.key_id(MASTER_KEY_ID), SERVER_NAME)
        .unwrap()
}

fn record_task(submitter: &str, records: Vec<LocationRecord>) -> TaskMessage {
    TaskMessage::json(LOCATION_RECORD, &RecordBatch::new(records))
        .unwrap()
        .with_header(DID_HEADER, submitter)
}

// =============================================================================
// Credential Attacks
// =============================================================================

#[tokio::test]
async fn test_admin_escalation_rejected() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let document = harness.identity();

    // A perfectly signed request still cannot obtain an admin credential
    let request = CredentialRequest {
        did: document.id.clone(),
        role: Role::Admin,
        activation_code: "anything".into(),
        proof: proof_over(&document, b"anything"),
    };
    let result = authority.issue(&request, IssueOptions::strict()).await;
    assert!(matches!(result, Err(CredentialError::AdminNotAllowed)));

    // Nor can it with an unresolvable DID and an empty proof
    let request = CredentialRequest {
        did: "did:test:nobody".into(),
        role: Role::Admin,
        activation_code: String::new(),
        proof: serde_json::Value::Null,
    };
    let result = authority.issue(&request, IssueOptions::strict()).await;
    assert!(matches!(result, Err(CredentialError::AdminNotAllowed)));
}

#[tokio::test]
async fn test_activation_code_replay() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let document = harness.identity();
    let request = harness.request(&document, Role::User).await;

    assert!(authority.issue(&request, IssueOptions::strict()).await.is_ok());
    assert!(matches!(
        authority.issue(&request, IssueOptions::strict()).await,
        Err(CredentialError::InvalidActivationCode)
    ));
}

#[tokio::test]
async fn test_code_bound_to_identity() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let victim = harness.identity();
    let attacker = harness.identity();

    // Attacker learns the victim's code and replays it for their own DID
    let stolen = harness.registration.generate_code(&victim.id, Role::User).await.unwrap();
    let request = CredentialRequest {
        did: attacker.id.clone(),
        role: Role::User,
        proof: proof_over(&attacker, stolen.as_bytes()),
        activation_code: stolen,
    };
    assert!(matches!(
        authority.issue(&request, IssueOptions::strict()).await,
        Err(CredentialError::InvalidActivationCode)
    ));
}

#[tokio::test]
async fn test_proof_from_foreign_key() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let victim = harness.identity();

    // Signed with a key that is not part of the victim's document
    let mut impostor = DidDocument::generate("test").unwrap();
    impostor.add_new_key(MASTER_KEY_ID).unwrap();

    let mut request = harness.request(&victim, Role::User).await;
    let key = impostor.key_pair(MASTER_KEY_ID).unwrap();
    request.proof = serde_json::to_value(signature::sign(
        &key,
        victim.key_id(MASTER_KEY_ID),
        request.activation_code.as_bytes(),
        SERVER_NAME,
    ))
    .unwrap();

    assert!(matches!(
        authority.issue(&request, IssueOptions::strict()).await,
        Err(CredentialError::InvalidProof(_))
    ));
    // The code survives a failed attempt
    assert_eq!(harness.store.code_entries(), 1);
}

#[tokio::test]
async fn test_proof_over_other_payload() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let document = harness.identity();

    let mut request = harness.request(&document, Role::User).await;
    request.proof = proof_over(&document, b"some other payload");

    assert!(matches!(
        authority.issue(&request, IssueOptions::strict()).await,
        Err(CredentialError::InvalidProof(_))
    ));
}

#[tokio::test]
async fn test_tampered_token() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let document = harness.identity();
    let request = harness.request(&document, Role::User).await;
    let credential = authority.issue(&request, IssueOptions::strict()).await.unwrap();

    // Swap the payload for one claiming the agent role
    let parts: Vec<&str> = credential.access_token.split('.').collect();
    assert_eq!(parts.len(), 3);
    let forged_payload = parts[1].chars().rev().collect::<String>();
    let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
    assert!(matches!(
        authority.authenticate(&forged, true),
        Err(CredentialError::InvalidToken(_))
    ));

    // Truncated signature
    let truncated = &credential.access_token[..credential.access_token.len() - 4];
    assert!(authority.authenticate(truncated, true).is_err());
}

#[tokio::test]
async fn test_token_from_other_server() {
    let harness = Harness::new();
    let ours = harness.authority(ServerKeys::generate());
    let theirs = harness.authority(ServerKeys::generate());
    let document = harness.identity();

    let request = harness.request(&document, Role::User).await;
    let credential = theirs.issue(&request, IssueOptions::strict()).await.unwrap();

    assert!(matches!(
        ours.authenticate(&credential.access_token, true),
        Err(CredentialError::InvalidToken(_))
    ));
    assert!(ours
        .renew(&credential.access_token, &credential.refresh_code)
        .is_err());
}

#[tokio::test]
async fn test_wrong_refresh_code() {
    let harness = Harness::new();
    let authority = harness.authority(ServerKeys::generate());
    let first = harness.identity();
    let second = harness.identity();

    let a = authority
        .issue(&harness.request(&first, Role::User).await, IssueOptions::strict())
        .await
        .unwrap();
    let b = authority
        .issue(&harness.request(&second, Role::User).await, IssueOptions::strict())
        .await
        .unwrap();

    // Another holder's refresh code does not renew this token
    assert!(matches!(
        authority.renew(&a.access_token, &b.refresh_code),
        Err(CredentialError::RefreshCodeMismatch)
    ));
    assert!(matches!(
        authority.renew(&a.access_token, ""),
        Err(CredentialError::RefreshCodeMismatch)
    ));
    assert!(authority.renew(&a.access_token, &a.refresh_code).is_ok());
}

#[tokio::test]
async fn test_refresh_codes_depend_on_root_seed() {
    let harness = Harness::new();
    let seed = [7u8; 32];
    let authority = harness.authority(ServerKeys::from_seed(&seed, RefreshHash::Blake3));
    let restarted = harness.authority(ServerKeys::from_seed(&seed, RefreshHash::Blake3));
    let foreign = harness.authority(ServerKeys::from_seed(&[8u8; 32], RefreshHash::Blake3));
    let other_hash = harness.authority(ServerKeys::from_seed(&seed, RefreshHash::HmacSha256));

    let document = harness.identity();
    let credential = authority
        .issue(&harness.request(&document, Role::User).await, IssueOptions::strict())
        .await
        .unwrap();
    let token = &credential.access_token;

    // Same seed across restarts yields the same code
    assert_eq!(restarted.refresh_code(token), credential.refresh_code);
    assert!(restarted.renew(token, &credential.refresh_code).is_ok());

    assert_ne!(foreign.refresh_code(token), credential.refresh_code);
    assert_ne!(other_hash.refresh_code(token), credential.refresh_code);
}

#[tokio::test]
async fn test_renew_after_refresh_secret_rotation() {
    let harness = Harness::new();
    let keys = ServerKeys::from_seeds(&[7u8; 32], &[1u8; 32], RefreshHash::Blake3);
    let authority = harness.authority(keys.clone());
    let rotated = harness.authority(keys.rotate_refresh_secret(&[2u8; 32], RefreshHash::Blake3));

    let document = harness.identity();
    let credential = authority
        .issue(&harness.request(&document, Role::User).await, IssueOptions::strict())
        .await
        .unwrap();

    // The token still verifies, only the refresh code is stale
    assert!(rotated.authenticate(&credential.access_token, true).is_ok());
    let err = rotated
        .renew(&credential.access_token, &credential.refresh_code)
        .unwrap_err();
    assert!(matches!(err, CredentialError::RefreshCodeMismatch));
    assert_eq!(ApiError::from(err).code(), "INVALID_REQUEST");

    // A code computed under the new secret works
    let fresh = rotated.refresh_code(&credential.access_token);
    assert!(rotated.renew(&credential.access_token, &fresh).is_ok());
}

// =============================================================================
// Record Attacks
// =============================================================================

#[tokio::test]
async fn test_records_for_other_identity_dropped() {
    let harness = Harness::new();
    let submitter = harness.identity();
    let victim = harness.identity();
    let now = chrono::Utc::now().timestamp();

    let records = vec![
        signed_record(&submitter, &submitter.id, now - 60),
        // Claims to be the victim's location, signed by the submitter
        signed_record(&submitter, &victim.id, now - 50),
        signed_record(&submitter, &submitter.id, now - 40),
    ];
    let outcome = harness
        .validator()
        .process(&record_task(&submitter.id, records))
        .await;

    assert_eq!(outcome, TaskOutcome::Persisted { stored: 2, dropped: 1 });
    assert!(harness
        .store
        .location_records()
        .iter()
        .all(|r| r.did == submitter.id));
}

#[tokio::test]
async fn test_tampered_record_dropped() {
    let harness = Harness::new();
    let document = harness.identity();
    let now = chrono::Utc::now().timestamp();

    // Coordinates edited after signing; hash no longer matches
    let mut moved = signed_record(&document, &document.id, now - 30);
    moved.lat = 51.5;

    // Coordinates and hash edited; signature no longer matches
    let mut rehashed = signed_record(&document, &document.id, now - 20);
    rehashed.lng = -0.12;
    rehashed.hash = rehashed.compute_hash();

    let valid = signed_record(&document, &document.id, now - 10);
    let outcome = harness
        .validator()
        .process(&record_task(&document.id, vec![moved, rehashed, valid.clone()]))
        .await;

    assert_eq!(outcome, TaskOutcome::Persisted { stored: 1, dropped: 2 });
    assert_eq!(harness.store.location_records(), vec![valid]);
}

#[tokio::test]
async fn test_header_spoofing_dropped() {
    let harness = Harness::new();
    let victim = harness.identity();
    let attacker = harness.identity();
    let now = chrono::Utc::now().timestamp();

    // Records claim the victim but are signed by the attacker
    let records = vec![signed_record(&attacker, &victim.id, now - 5)];
    let outcome = harness
        .validator()
        .process(&record_task(&victim.id, records))
        .await;

    assert_eq!(outcome, TaskOutcome::Persisted { stored: 0, dropped: 1 });
    assert!(harness.store.location_records().is_empty());
}
