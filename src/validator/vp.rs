//! Validation of W3C verifiable presentations: holder signature, DID
//! continuity with the SIOP, and emission of the contained credentials.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::debug;

use crate::core::claim_token::{ClaimToken, TokenType};
use crate::core::did::DidResolver;
use crate::core::expected::ExpectedVerifiablePresentation;
use crate::core::jws;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;

use super::{verify_did_signature, TokenValidator, ValidationContext};

#[derive(Debug)]
pub struct VerifiablePresentationValidator {
    resolver: Arc<dyn DidResolver>,
    expected: ExpectedVerifiablePresentation,
    clock_skew: i64,
}

impl VerifiablePresentationValidator {
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        expected: ExpectedVerifiablePresentation,
        clock_skew: i64,
    ) -> Self {
        Self {
            resolver,
            expected,
            clock_skew,
        }
    }
}

// The queue id of an extracted credential: its credential type.
fn credential_id(credential: &ClaimToken, parent_id: &str, index: usize) -> String {
    credential
        .payload()
        .get("vc")
        .and_then(Json::as_object)
        .and_then(|vc| vc.get("type"))
        .and_then(Json::as_array)
        .and_then(|types| types.last())
        .and_then(Json::as_str)
        .map_or_else(|| format!("{parent_id}-credential-{index}"), ToOwned::to_owned)
}

#[async_trait]
impl TokenValidator for VerifiablePresentationValidator {
    fn is_type(&self) -> TokenType {
        TokenType::VerifiablePresentation
    }

    async fn validate(
        &self,
        queue: &mut ValidationQueue,
        item: &ValidationQueueItem,
        context: &ValidationContext,
    ) -> ValidationResponse {
        let Some(token) = item.claim_token.as_ref() else {
            return ValidationResponse::misconfigured(format!(
                "the queue item '{}' has no decoded token",
                item.id
            ));
        };
        let payload = token.payload();

        let Some(iss) = payload.get("iss").and_then(Json::as_str) else {
            return ValidationResponse::rejected("the verifiable presentation has no 'iss' claim");
        };
        let Some(subject) = context.subject_did.as_deref() else {
            return ValidationResponse::rejected(
                "no SIOP DID has been established to check the verifiable presentation holder against",
            );
        };
        if iss != subject {
            return ValidationResponse::rejected(format!(
                "The DID used for the SIOP {subject} is not equal to the DID used for the verifiable presentation {iss}"
            ));
        }

        if let Err(e) = verify_did_signature(self.resolver.as_ref(), token, iss).await {
            return ValidationResponse::rejected(format!("{e:#}"));
        }

        if let Some(audience) = self.expected.did_audience.as_deref() {
            if let Err(e) = jws::check_audience(payload, audience) {
                return ValidationResponse::rejected(e.to_string());
            }
        }
        if let Err(e) = jws::check_expiry(payload, false, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }
        if let Err(e) = jws::check_not_before(payload, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }

        // each contained credential becomes its own queue item
        let credentials = payload
            .get("vp")
            .and_then(Json::as_object)
            .and_then(|vp| vp.get("verifiableCredential"))
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();

        let mut emitted = HashMap::new();
        for (index, raw) in credentials.iter().enumerate() {
            let Some(raw) = raw.as_str() else {
                return ValidationResponse::rejected(format!(
                    "credential {index} in the verifiable presentation is not a string token"
                ));
            };
            let credential = match ClaimToken::from_compact_jws(raw) {
                Ok(credential) => credential,
                Err(e) => return ValidationResponse::malformed(e.to_string()),
            };
            let id = credential_id(&credential, &item.id, index);
            debug!("presentation '{}' emitted credential '{id}'", item.id);
            emitted.insert(id.clone(), credential.clone());
            queue.enqueue_item(id, credential);
        }

        ValidationResponse::ok()
            .with_did(Some(iss.to_owned()))
            .with_payload(payload.clone())
            .with_tokens(emitted)
    }
}
