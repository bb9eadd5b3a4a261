//! Validation of W3C verifiable credentials: issuer signature, audience
//! continuity with the SIOP DID, and the trusted-issuer policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::core::claim_token::TokenType;
use crate::core::did::DidResolver;
use crate::core::expected::ExpectedVerifiableCredential;
use crate::core::jws;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;

use super::{verify_did_signature, TokenValidator, ValidationContext};

#[derive(Debug)]
pub struct VerifiableCredentialValidator {
    resolver: Arc<dyn DidResolver>,
    expected: ExpectedVerifiableCredential,
    clock_skew: i64,
}

impl VerifiableCredentialValidator {
    pub fn new(
        resolver: Arc<dyn DidResolver>,
        expected: ExpectedVerifiableCredential,
        clock_skew: i64,
    ) -> Self {
        Self {
            resolver,
            expected,
            clock_skew,
        }
    }
}

#[async_trait]
impl TokenValidator for VerifiableCredentialValidator {
    fn is_type(&self) -> TokenType {
        TokenType::VerifiableCredential
    }

    async fn validate(
        &self,
        _queue: &mut ValidationQueue,
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
            return ValidationResponse::rejected("the verifiable credential has no 'iss' claim");
        };
        if let Err(e) = verify_did_signature(self.resolver.as_ref(), token, iss).await {
            return ValidationResponse::rejected(format!("{e:#}"));
        }

        // the credential must be addressed to the wallet's DID
        let Some(subject) = context.subject_did.as_deref() else {
            return ValidationResponse::rejected(
                "no SIOP DID has been established to check the verifiable credential audience against",
            );
        };
        let Some(aud) = payload.get("aud").and_then(Json::as_str) else {
            return ValidationResponse::rejected("the verifiable credential has no 'aud' claim");
        };
        if aud != subject {
            return ValidationResponse::rejected(format!(
                "the verifiable credential audience '{aud}' does not match the SIOP DID '{subject}'"
            ));
        }

        // trusted-issuer policy, keyed by the SIOP contract or, failing
        // that, the credential type the item was enqueued under
        let contract = context.contract_id.clone().unwrap_or_else(|| item.id.clone());
        let Some(trusted) = self.expected.did_issuers.get(&contract) else {
            return ValidationResponse::rejected(format!(
                "no trusted issuers are configured for contract '{contract}'"
            ));
        };
        if !trusted.contains(iss) {
            return ValidationResponse::rejected(format!(
                "the verifiable credential issuer '{iss}' is not a trusted issuer for contract '{contract}'"
            ));
        }

        if let Err(e) = jws::check_expiry(payload, false, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }
        if let Err(e) = jws::check_not_before(payload, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }

        ValidationResponse::ok()
            .with_did(Some(iss.to_owned()))
            .with_payload(payload.clone())
    }
}
