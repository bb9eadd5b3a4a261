//! Validation of the outer SIOP envelope, in all three flavours, and the
//! fan-out of its nested tokens into the queue.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::debug;

use crate::core::claim_token::{ClaimToken, TokenType, SELF_ISSUED_ISSUER};
use crate::core::did::DidResolver;
use crate::core::expected::ExpectedSiop;
use crate::core::jwk::PublicKeyJwk;
use crate::core::jws;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;

use super::{TokenValidator, ValidationContext};

/// Validates a self-issued envelope: self-signed JWS, audience, replay
/// protection, then child-token emission.
#[derive(Debug)]
pub struct SiopValidator {
    token_type: TokenType,
    resolver: Arc<dyn DidResolver>,
    expected: ExpectedSiop,
    clock_skew: i64,
}

impl SiopValidator {
    pub fn new(
        token_type: TokenType,
        resolver: Arc<dyn DidResolver>,
        expected: ExpectedSiop,
        clock_skew: i64,
    ) -> Self {
        Self {
            token_type,
            resolver,
            expected,
            clock_skew,
        }
    }

    // The SIOP is self-signed: the key is carried in `sub_jwk`, or exposed
    // by the DID document of the payload `did`.
    async fn verify_signature(&self, token: &ClaimToken) -> Result<()> {
        if !token.is_signed() {
            bail!("the SIOP is not signed");
        }
        if let Some(sub_jwk) = token.payload().get("sub_jwk") {
            let jwk: PublicKeyJwk = serde_json::from_value(sub_jwk.clone())
                .context("the SIOP sub_jwk could not be parsed")?;
            return jws::verify_compact(token.raw(), &jwk)
                .context("the SIOP signature could not be verified");
        }

        let Some(did) = token.payload().get("did").and_then(Json::as_str) else {
            bail!("the SIOP carries neither a sub_jwk nor a did to verify against");
        };
        let document = self
            .resolver
            .resolve(did)
            .await
            .with_context(|| format!("the SIOP DID '{did}' could not be resolved"))?;
        let kid = token.header().get("kid").and_then(Json::as_str);
        let key = match kid {
            Some(kid) => document.find_key(kid),
            None => document.first_key(),
        }
        .ok_or_else(|| {
            anyhow!(
                "the DID document of '{did}' has no verification key for '{}'",
                kid.unwrap_or_default()
            )
        })?;
        jws::verify_compact(token.raw(), key).context("the SIOP signature could not be verified")
    }

    fn check_claims(&self, token: &ClaimToken) -> Result<()> {
        let payload = token.payload();

        if payload.get("iss").and_then(Json::as_str) != Some(SELF_ISSUED_ISSUER) {
            bail!("the SIOP issuer is not '{SELF_ISSUED_ISSUER}'");
        }
        jws::check_audience(payload, &self.expected.audience)?;
        jws::check_expiry(payload, false, self.clock_skew)?;
        jws::check_not_before(payload, self.clock_skew)?;

        if let Some(expected) = &self.expected.nonce {
            let actual = payload.get("nonce").and_then(Json::as_str).unwrap_or_default();
            if actual != expected {
                bail!("expected nonce '{expected}' does not match the SIOP nonce '{actual}'");
            }
        }
        if let Some(expected) = &self.expected.state {
            let actual = payload.get("state").and_then(Json::as_str).unwrap_or_default();
            if actual != expected {
                bail!("expected state '{expected}' does not match the SIOP state '{actual}'");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TokenValidator for SiopValidator {
    fn is_type(&self) -> TokenType {
        self.token_type
    }

    async fn validate(
        &self,
        queue: &mut ValidationQueue,
        item: &ValidationQueueItem,
        _context: &ValidationContext,
    ) -> ValidationResponse {
        let Some(token) = item.claim_token.as_ref() else {
            return ValidationResponse::misconfigured(format!(
                "the queue item '{}' has no decoded token",
                item.id
            ));
        };

        if let Err(e) = self.verify_signature(token).await {
            return ValidationResponse::rejected(format!("{e:#}"));
        }
        if let Err(e) = self.check_claims(token) {
            return ValidationResponse::rejected(e.to_string());
        }

        let children = match self.token_type {
            TokenType::SiopPresentationAttestation => match token.attested_tokens() {
                Ok(children) => children,
                Err(e) => return ValidationResponse::rejected(e.to_string()),
            },
            TokenType::SiopPresentationExchange => match token.exchanged_tokens() {
                Ok(children) => children,
                Err(e) => return ValidationResponse::rejected(e.to_string()),
            },
            // an issuance request nests no further tokens
            _ => Vec::new(),
        };

        let mut emitted = HashMap::new();
        for (id, child) in children {
            debug!("SIOP '{}' emitted '{}' ({})", item.id, id, child.token_type());
            emitted.insert(id.clone(), child.clone());
            queue.enqueue_item(id, child);
        }

        let did = token.payload().get("did").and_then(Json::as_str).map(ToOwned::to_owned);
        ValidationResponse::ok()
            .with_did(did)
            .with_payload(token.payload().clone())
            .with_tokens(emitted)
    }
}
