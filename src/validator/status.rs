//! The credential-status sub-protocol: for every presented credential
//! exposing a `credentialStatus.id`, sign a status request on the
//! verifier's behalf, POST it to the issuer's endpoint and validate the
//! signed receipt that comes back.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use http::header::CONTENT_TYPE;
use http::Request;
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::core::claim_token::{ClaimToken, TokenType};
use crate::core::did::DidResolver;
use crate::core::http::execute_with_timeout;
use crate::core::jws;
use crate::core::response::ValidationResponse;
use crate::core::result::{StatusEntry, ValidationResult};

use super::Validator;

impl Validator {
    // Runs after the queue has drained successfully. Any failure aborts
    // the whole run; the disabled flag short-circuits before any network
    // traffic.
    pub(crate) async fn check_status(
        &self,
        result: &mut ValidationResult,
    ) -> Result<(), ValidationResponse> {
        let Some(presentations) = result.verifiable_presentations.clone() else {
            return Ok(());
        };

        let Some(signer) = self.signer() else {
            return Err(ValidationResponse::misconfigured(
                "status checks require a signer, see `with_signer`",
            ));
        };
        let Some(did) = self.did() else {
            return Err(ValidationResponse::misconfigured(
                "status checks require the verifier DID, see `with_did`",
            ));
        };
        let Some(key_reference) = self.signing_key_reference() else {
            return Err(ValidationResponse::misconfigured(
                "status checks require a signing key reference, see `with_signing_key_reference`",
            ));
        };
        let kid = format!("{did}#{key_reference}");

        let mut statuses: HashMap<String, StatusEntry> =
            result.verifiable_presentation_status.take().unwrap_or_default();

        for (presentation_id, presentation) in &presentations {
            let credentials = presentation
                .payload()
                .get("vp")
                .and_then(Json::as_object)
                .and_then(|vp| vp.get("verifiableCredential"))
                .and_then(Json::as_array)
                .cloned()
                .unwrap_or_default();

            for raw in credentials.iter().filter_map(Json::as_str) {
                let Ok(credential) = ClaimToken::from_compact_jws(raw) else {
                    continue;
                };
                let Some(status_url) = credential
                    .payload()
                    .get("vc")
                    .and_then(Json::as_object)
                    .and_then(|vc| vc.get("credentialStatus"))
                    .and_then(Json::as_object)
                    .and_then(|status| status.get("id"))
                    .and_then(Json::as_str)
                else {
                    continue;
                };
                let Some(issuer) = credential.payload().get("iss").and_then(Json::as_str) else {
                    continue;
                };
                debug!("status check for presentation '{presentation_id}' via '{status_url}'");

                let header = json!({ "alg": signer.alg(), "kid": kid, "typ": "JWT" });
                let envelope = json!({
                    "did": did,
                    "kid": kid,
                    "vp": presentation.raw(),
                    "sub_jwk": signer.jwk(),
                });
                let request = jws::encode(&header, &envelope, signer.as_ref())
                    .await
                    .map_err(|e| ValidationResponse::rejected(format!("{e:#}")))?;

                let receipt = self.fetch_status(status_url, request).await?;

                let receipt_validator = StatusReceiptValidator::new(
                    Arc::clone(self.resolver()),
                    issuer.to_owned(),
                    did.to_owned(),
                );
                let entries = receipt_validator
                    .validate(&receipt)
                    .await
                    .map_err(|e| ValidationResponse::rejected(format!("{e:#}")))?;
                statuses.extend(entries);
            }
        }

        if !statuses.is_empty() {
            result.verifiable_presentation_status = Some(statuses);
        }
        Ok(())
    }

    async fn fetch_status(&self, url: &str, body: String) -> Result<String, ValidationResponse> {
        let request = Request::builder()
            .method("POST")
            .uri(url)
            .header(CONTENT_TYPE, "application/jwt")
            .body(body.into_bytes())
            .map_err(|e| {
                ValidationResponse::rejected(format!("failed to construct request to '{url}': {e}"))
            })?;

        let response = execute_with_timeout(self.http_client().as_ref(), request, self.http_timeout())
            .await
            .map_err(|_| {
                ValidationResponse::unavailable(format!(
                    "status check could not fetch response from {url}"
                ))
            })?;
        if !response.status().is_success() {
            return Err(ValidationResponse::unavailable(format!(
                "status check could not fetch response from {url}"
            )));
        }

        let body: Json = serde_json::from_slice(response.body()).map_err(|_| {
            ValidationResponse::rejected(format!(
                "the status check response from {url} is not valid JSON"
            ))
        })?;
        match body {
            Json::String(receipt) => Ok(receipt),
            Json::Object(object) => object
                .get("receipt")
                .and_then(Json::as_str)
                .map(ToOwned::to_owned)
                .ok_or_else(|| {
                    ValidationResponse::rejected(format!(
                        "the status check response from {url} does not contain a receipt"
                    ))
                }),
            _ => Err(ValidationResponse::rejected(format!(
                "the status check response from {url} does not contain a receipt"
            ))),
        }
    }
}

/// Validates a signed status receipt against a pinned issuer and audience,
/// yielding one [`StatusEntry`] per credential `jti`.
#[derive(Debug)]
pub struct StatusReceiptValidator {
    resolver: Arc<dyn DidResolver>,
    issuer: String,
    audience: String,
}

impl StatusReceiptValidator {
    pub fn new(resolver: Arc<dyn DidResolver>, issuer: String, audience: String) -> Self {
        Self {
            resolver,
            issuer,
            audience,
        }
    }

    pub async fn validate(&self, raw: &str) -> Result<HashMap<String, StatusEntry>> {
        let token = ClaimToken::from_compact_jws(raw).context("the status receipt could not be decoded")?;
        if token.token_type() != TokenType::VerifiablePresentationStatus {
            bail!("the status response is not a receipt token");
        }
        if !token.is_signed() {
            bail!("the status receipt is not signed");
        }

        let document = self
            .resolver
            .resolve(&self.issuer)
            .await
            .with_context(|| format!("the receipt issuer '{}' could not be resolved", self.issuer))?;
        let kid = token.header().get("kid").and_then(Json::as_str);
        let key = match kid {
            Some(kid) => document.find_key(kid),
            None => document.first_key(),
        }
        .with_context(|| {
            format!("the DID document of '{}' has no verification key", self.issuer)
        })?;
        jws::verify_compact(token.raw(), key)
            .context("the status receipt signature could not be verified")?;

        let Some(aud) = token.payload().get("aud").and_then(Json::as_str) else {
            bail!("the status receipt has no 'aud' claim");
        };
        if aud != self.audience {
            bail!(
                "expected audience '{}' does not match the status receipt audience '{aud}'",
                self.audience
            );
        }

        let mut entries = HashMap::new();
        for (id, entry) in token.receipt_tokens()? {
            if !entry.is_signed() {
                bail!("the receipt entry '{id}' is not signed");
            }
            jws::verify_compact(entry.raw(), key)
                .with_context(|| format!("the receipt entry '{id}' signature could not be verified"))?;
            let jti = entry
                .payload()
                .get("jti")
                .and_then(Json::as_str)
                .map_or_else(|| id.clone(), ToOwned::to_owned);
            entries.insert(
                jti,
                StatusEntry {
                    raw: entry.raw().to_owned(),
                    payload: entry.payload().clone(),
                },
            );
        }
        Ok(entries)
    }
}
