use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::prelude::*;
use chrono::Utc;
use http::{Request, Response};
use serde_json::{json, Value as Json};

use siop_verifier::core::claim_token::{TokenType, SELF_ISSUED_ISSUER};
use siop_verifier::core::did::{DidDocument, DidResolver, MemoryResolver};
use siop_verifier::core::expected::{ExpectedSiop, ExpectedVerifiablePresentation};
use siop_verifier::core::http::AsyncHttpClient;
use siop_verifier::core::jws;
use siop_verifier::validator::request_signer::{Ed25519Signer, RequestSigner};
use siop_verifier::validator::{
    SiopValidator, TokenValidator, Validator, VerifiablePresentationValidator,
};

const AUDIENCE: &str = "https://verifier.example.com/api";
const USER_DID: &str = "did:test:user";
const ISSUER_DID: &str = "did:test:issuer";
const VERIFIER_DID: &str = "did:test:verifier";
const OP_ISSUER: &str = "https://login.example.com";
const CONFIGURATION_URL: &str = "https://login.example.com/.well-known/openid-configuration";
const JWKS_URL: &str = "https://login.example.com/jwks";
const STATUS_URL: &str = "https://issuer.example.com/status";
const NONCE: &str = "n-1234";
const STATE: &str = "s-5678";

fn user_signer() -> Ed25519Signer {
    Ed25519Signer::new(&[11u8; 32])
}

fn issuer_signer() -> Ed25519Signer {
    Ed25519Signer::new(&[22u8; 32])
}

fn op_signer() -> Ed25519Signer {
    Ed25519Signer::new(&[33u8; 32])
}

fn verifier_signer() -> Ed25519Signer {
    Ed25519Signer::new(&[44u8; 32])
}

fn did_document(did: &str, signer: &Ed25519Signer) -> DidDocument {
    serde_json::from_value(json!({
        "id": did,
        "verificationMethod": [{
            "id": format!("{did}#key-1"),
            "type": "JsonWebKey2020",
            "controller": did,
            "publicKeyJwk": signer.jwk()
        }]
    }))
    .expect("document deserializes")
}

fn resolver() -> MemoryResolver {
    let mut resolver = MemoryResolver::new();
    resolver.insert(did_document(USER_DID, &user_signer()));
    resolver.insert(did_document(ISSUER_DID, &issuer_signer()));
    resolver
}

async fn sign(payload: &Json, signer: &Ed25519Signer, kid: &str) -> String {
    let header = json!({ "alg": "EdDSA", "kid": kid, "typ": "JWT" });
    jws::encode(&header, payload, signer).await.expect("token signs")
}

fn unsigned(payload: &Json) -> String {
    let header = BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
    let payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("serializes"));
    format!("{header}.{payload}")
}

#[derive(Debug, Default, Clone)]
struct MockHttpClient {
    responses: HashMap<String, (u16, String)>,
}

impl MockHttpClient {
    fn insert(&mut self, url: &str, status: u16, body: String) {
        self.responses.insert(url.to_owned(), (status, body));
    }
}

#[async_trait]
impl AsyncHttpClient for MockHttpClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let url = request.uri().to_string();
        let Some((status, body)) = self.responses.get(&url) else {
            anyhow::bail!("no canned response for '{url}'");
        };
        Ok(Response::builder().status(*status).body(body.clone().into_bytes())?)
    }
}

fn openid_provider() -> MockHttpClient {
    let mut op_jwk = op_signer().jwk().clone();
    op_jwk.kid = Some("op-key-1".to_owned());

    let mut mock = MockHttpClient::default();
    mock.insert(
        CONFIGURATION_URL,
        200,
        json!({ "issuer": OP_ISSUER, "jwks_uri": JWKS_URL }).to_string(),
    );
    mock.insert(JWKS_URL, 200, json!({ "keys": [op_jwk] }).to_string());
    mock
}

async fn credential_token() -> String {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": ISSUER_DID,
        "aud": USER_DID,
        "jti": "urn:vc:drivers-license:1",
        "nbf": now - 10,
        "exp": now + 3600,
        "vc": {
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiableCredential"],
            "credentialSubject": { "givenName": "Jules", "familyName": "Winnfield" },
            "credentialStatus": { "id": STATUS_URL, "type": "PortableReceipt" }
        }
    });
    sign(&payload, &issuer_signer(), "did:test:issuer#key-1").await
}

async fn presentation_token(credential: &str) -> String {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": USER_DID,
        "aud": VERIFIER_DID,
        "jti": "urn:vp:1",
        "nbf": now - 10,
        "exp": now + 3600,
        "vp": {
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiablePresentation"],
            "verifiableCredential": [credential]
        }
    });
    sign(&payload, &user_signer(), "did:test:user#key-1").await
}

async fn id_token() -> String {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": OP_ISSUER,
        "sub": "jules",
        "aud": AUDIENCE,
        "exp": now + 3600
    });
    sign(&payload, &op_signer(), "op-key-1").await
}

// An attestation-flavoured SIOP wrapping the given presentation.
async fn siop_token(presentation: &str) -> String {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": USER_DID,
        "sub_jwk": user_signer().jwk(),
        "jti": "siop-jti-1",
        "nonce": NONCE,
        "state": STATE,
        "exp": now + 3600,
        "attestations": {
            "selfIssued": { "name": "jules" },
            "idTokens": { CONFIGURATION_URL: id_token().await },
            "presentations": { "DriversLicense": presentation }
        }
    });
    sign(&payload, &user_signer(), "did:test:user#key-1").await
}

fn validator(mock: MockHttpClient) -> Validator {
    Validator::builder()
        .with_resolver(Arc::new(resolver()))
        .with_http_client(Arc::new(mock))
        .with_audience(AUDIENCE)
        .with_nonce(NONCE)
        .with_state(STATE)
        .with_did(VERIFIER_DID)
        .with_id_token_issuers(vec![CONFIGURATION_URL.to_owned()])
        .with_trusted_issuers("VerifiableCredential", vec![ISSUER_DID.to_owned()])
        .build()
        .expect("validator builds")
}

#[tokio::test]
async fn validates_a_full_siop_response() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let response = validator(openid_provider()).validate(&siop).await;
    assert!(response.result, "{:?}", response.detailed_error);
    assert_eq!(response.status, 200);

    let result = response.validation_result.expect("result assembled");
    assert_eq!(result.did.as_deref(), Some(USER_DID));
    assert_eq!(result.siop_jti.as_deref(), Some("siop-jti-1"));
    assert!(result.siop.is_some());

    let id_tokens = result.id_tokens.expect("id tokens grouped");
    assert!(id_tokens.contains_key(CONFIGURATION_URL));

    let self_issued = result.self_issued.expect("self-issued claims kept");
    assert_eq!(self_issued.payload()["name"], json!("jules"));

    let presentations = result.verifiable_presentations.expect("presentations grouped");
    assert!(presentations.contains_key("DriversLicense"));

    let credentials = result.verifiable_credentials.expect("credentials grouped");
    let credential = credentials.get("VerifiableCredential").expect("keyed by credential type");
    assert_eq!(credential.payload()["vc"]["credentialSubject"]["givenName"], json!("Jules"));

    // the status check was not enabled, so no receipts were fetched
    assert!(result.verifiable_presentation_status.is_none());
}

#[tokio::test]
async fn rejects_a_siop_without_shape_markers() {
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": USER_DID,
        "sub_jwk": user_signer().jwk(),
        "tokens": {}
    });
    let raw = sign(&payload, &user_signer(), "did:test:user#key-1").await;

    let response = validator(openid_provider()).validate(&raw).await;
    assert!(!response.result);
    assert_eq!(response.status, 400);
    assert_eq!(response.detailed_error.as_deref(), Some("SIOP was not recognized."));
}

#[tokio::test]
async fn rejects_a_descriptor_whose_path_resolves_nothing() {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": USER_DID,
        "sub_jwk": user_signer().jwk(),
        "nonce": NONCE,
        "state": STATE,
        "exp": now + 3600,
        "presentation_submission": {
            "descriptor_map": [{
                "id": "DriversLicense",
                "format": "jwt",
                "encoding": "base64url",
                "path": "$.tokens.presentations"
            }]
        }
    });
    let raw = sign(&payload, &user_signer(), "did:test:user#key-1").await;

    let response = validator(openid_provider()).validate(&raw).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.contains("DriversLicense"), "{detail}");
    assert!(detail.contains("did not return"), "{detail}");
}

#[tokio::test]
async fn rejects_a_descriptor_without_a_path() {
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": USER_DID,
        "sub_jwk": user_signer().jwk(),
        "nonce": NONCE,
        "state": STATE,
        "exp": now + 3600,
        "presentation_submission": {
            "descriptor_map": [{ "id": "DriversLicense", "format": "jwt" }]
        }
    });
    let raw = sign(&payload, &user_signer(), "did:test:user#key-1").await;

    let response = validator(openid_provider()).validate(&raw).await;
    assert!(!response.result);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.ends_with("No path property found."), "{detail}");
}

#[tokio::test]
async fn rejects_an_id_token_from_an_unknown_issuer() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let validator = Validator::builder()
        .with_resolver(Arc::new(resolver()))
        .with_http_client(Arc::new(openid_provider()))
        .with_audience(AUDIENCE)
        .with_nonce(NONCE)
        .with_state(STATE)
        .with_did(VERIFIER_DID)
        .with_id_token_issuers(vec!["xxx".to_owned()])
        .with_trusted_issuers("VerifiableCredential", vec![ISSUER_DID.to_owned()])
        .build()
        .expect("validator builds");

    let response = validator.validate(&siop).await;
    assert!(!response.result);
    assert_eq!(
        response.detailed_error.as_deref(),
        Some("Could not fetch token configuration")
    );
}

#[tokio::test]
async fn rejects_a_presentation_from_a_different_holder() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;

    // the envelope asserts a different DID than the presentation holder
    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": "abcdef",
        "sub_jwk": user_signer().jwk(),
        "nonce": NONCE,
        "state": STATE,
        "exp": now + 3600,
        "attestations": {
            "presentations": { "DriversLicense": presentation }
        }
    });
    let siop = sign(&payload, &user_signer(), "did:test:user#key-1").await;

    let response = validator(openid_provider()).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    assert_eq!(
        response.detailed_error.as_deref(),
        Some("The DID used for the SIOP abcdef is not equal to the DID used for the verifiable presentation did:test:user")
    );
}

#[tokio::test]
async fn reports_a_missing_credential_validator() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;

    let now = Utc::now().timestamp();
    let payload = json!({
        "iss": SELF_ISSUED_ISSUER,
        "aud": AUDIENCE,
        "did": USER_DID,
        "sub_jwk": user_signer().jwk(),
        "exp": now + 3600,
        "attestations": {
            "presentations": { "DriversLicense": presentation }
        }
    });
    let siop = sign(&payload, &user_signer(), "did:test:user#key-1").await;

    let resolver = Arc::new(resolver());
    let expected_siop = ExpectedSiop {
        audience: AUDIENCE.to_owned(),
        nonce: None,
        state: None,
    };
    let validators: Vec<Box<dyn TokenValidator>> = vec![
        Box::new(SiopValidator::new(
            TokenType::SiopPresentationAttestation,
            Arc::clone(&resolver) as Arc<dyn DidResolver>,
            expected_siop,
            300,
        )),
        Box::new(VerifiablePresentationValidator::new(
            Arc::clone(&resolver) as Arc<dyn DidResolver>,
            ExpectedVerifiablePresentation { did_audience: None },
            300,
        )),
    ];
    let validator = Validator::builder()
        .with_resolver(resolver)
        .with_http_client(Arc::new(MockHttpClient::default()))
        .with_audience(AUDIENCE)
        .with_validators(validators)
        .build()
        .expect("validator builds");

    let response = validator.validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 500);
    assert_eq!(
        response.detailed_error.as_deref(),
        Some("verifiableCredential does not has a TokenValidator")
    );
}

#[tokio::test]
async fn rejects_a_replayed_nonce_naming_both_values() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let validator = Validator::builder()
        .with_resolver(Arc::new(resolver()))
        .with_http_client(Arc::new(openid_provider()))
        .with_audience(AUDIENCE)
        .with_nonce("n-9999")
        .with_trusted_issuers("VerifiableCredential", vec![ISSUER_DID.to_owned()])
        .build()
        .expect("validator builds");

    let response = validator.validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.contains("n-9999"), "{detail}");
    assert!(detail.contains(NONCE), "{detail}");
}

#[tokio::test]
async fn rejects_a_tampered_credential_signature() {
    let mut credential = credential_token().await;
    let last = credential.pop().unwrap();
    credential.push(if last == 'A' { 'B' } else { 'A' });

    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let response = validator(openid_provider()).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn rejects_a_credential_from_an_untrusted_issuer() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let validator = Validator::builder()
        .with_resolver(Arc::new(resolver()))
        .with_http_client(Arc::new(openid_provider()))
        .with_audience(AUDIENCE)
        .with_nonce(NONCE)
        .with_state(STATE)
        .with_did(VERIFIER_DID)
        .with_id_token_issuers(vec![CONFIGURATION_URL.to_owned()])
        .with_trusted_issuers("VerifiableCredential", vec!["did:test:somebody-else".to_owned()])
        .build()
        .expect("validator builds");

    let response = validator.validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.contains(ISSUER_DID), "{detail}");
}

fn status_validator(mock: MockHttpClient) -> Validator {
    Validator::builder()
        .with_resolver(Arc::new(resolver()))
        .with_http_client(Arc::new(mock))
        .with_audience(AUDIENCE)
        .with_nonce(NONCE)
        .with_state(STATE)
        .with_did(VERIFIER_DID)
        .with_signing_key_reference("key-1")
        .with_signer(Arc::new(verifier_signer()))
        .with_id_token_issuers(vec![CONFIGURATION_URL.to_owned()])
        .with_trusted_issuers("VerifiableCredential", vec![ISSUER_DID.to_owned()])
        .with_status_check(true)
        .build()
        .expect("validator builds")
}

async fn receipt_with_entry(entry: &str) -> String {
    let payload = json!({
        "aud": VERIFIER_DID,
        "receipt": { "urn:vc:drivers-license:1": entry }
    });
    sign(&payload, &issuer_signer(), "did:test:issuer#key-1").await
}

#[tokio::test]
async fn fetches_and_validates_status_receipts() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let entry_payload = json!({ "jti": "urn:vc:drivers-license:1", "credentialStatus": "valid" });
    let entry = sign(&entry_payload, &issuer_signer(), "did:test:issuer#key-1").await;
    let receipt = receipt_with_entry(&entry).await;

    let mut mock = openid_provider();
    mock.insert(STATUS_URL, 200, Json::String(receipt).to_string());

    let response = status_validator(mock).validate(&siop).await;
    assert!(response.result, "{:?}", response.detailed_error);

    let result = response.validation_result.expect("result assembled");
    let statuses = result.verifiable_presentation_status.expect("statuses merged");
    let entry = statuses.get("urn:vc:drivers-license:1").expect("status keyed by jti");
    assert_eq!(entry.payload["credentialStatus"], json!("valid"));
}

#[tokio::test]
async fn rejects_an_unsigned_receipt_entry() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let entry_payload = json!({ "jti": "urn:vc:drivers-license:1", "credentialStatus": "valid" });
    let receipt = receipt_with_entry(&unsigned(&entry_payload)).await;

    let mut mock = openid_provider();
    mock.insert(STATUS_URL, 200, Json::String(receipt).to_string());

    let response = status_validator(mock).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.contains("is not signed"), "{detail}");
}

#[tokio::test]
async fn rejects_a_tampered_receipt_entry() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let entry_payload = json!({ "jti": "urn:vc:drivers-license:1", "credentialStatus": "valid" });
    let mut entry = sign(&entry_payload, &issuer_signer(), "did:test:issuer#key-1").await;
    let last = entry.pop().unwrap();
    entry.push(if last == 'A' { 'B' } else { 'A' });
    let receipt = receipt_with_entry(&entry).await;

    let mut mock = openid_provider();
    mock.insert(STATUS_URL, 200, Json::String(receipt).to_string());

    let response = status_validator(mock).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn rejects_a_receipt_without_an_audience() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let entry_payload = json!({ "jti": "urn:vc:drivers-license:1", "credentialStatus": "valid" });
    let entry = sign(&entry_payload, &issuer_signer(), "did:test:issuer#key-1").await;
    let receipt_payload = json!({ "receipt": { "urn:vc:drivers-license:1": entry } });
    let receipt = sign(&receipt_payload, &issuer_signer(), "did:test:issuer#key-1").await;

    let mut mock = openid_provider();
    mock.insert(STATUS_URL, 200, Json::String(receipt).to_string());

    let response = status_validator(mock).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    let detail = response.detailed_error.expect("error details");
    assert!(detail.contains("aud"), "{detail}");
}

#[tokio::test]
async fn fails_the_run_when_a_status_endpoint_is_unreachable() {
    let credential = credential_token().await;
    let presentation = presentation_token(&credential).await;
    let siop = siop_token(&presentation).await;

    let mut mock = openid_provider();
    mock.insert(STATUS_URL, 500, String::new());

    let response = status_validator(mock).validate(&siop).await;
    assert!(!response.result);
    assert_eq!(response.status, 403);
    assert_eq!(
        response.detailed_error,
        Some(format!("status check could not fetch response from {STATUS_URL}"))
    );
}
