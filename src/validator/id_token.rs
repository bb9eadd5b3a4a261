//! Validation of OpenID Connect id-tokens against the provider's
//! published discovery document and JWKS.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use http::header::ACCEPT;
use http::Request;
use serde::Deserialize;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::claim_token::{ClaimToken, TokenType};
use crate::core::expected::ExpectedIdToken;
use crate::core::http::{execute_with_timeout, AsyncHttpClient};
use crate::core::jwk::Jwks;
use crate::core::jws;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;

use super::{TokenValidator, ValidationContext};

// The discovery fields the engine reads.
#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    issuer: Option<String>,
    jwks_uri: String,
}

/// Validates an id-token: discovery lookup, JWKS fetch, signature, then
/// `iss`/`aud`/`exp`.
#[derive(Debug)]
pub struct IdTokenValidator {
    http_client: Arc<dyn AsyncHttpClient>,
    expected: ExpectedIdToken,
    http_timeout: Duration,
    clock_skew: i64,
    // append-only, keyed by jwks_uri
    keys: Mutex<HashMap<String, Jwks>>,
}

impl IdTokenValidator {
    pub fn new(
        http_client: Arc<dyn AsyncHttpClient>,
        expected: ExpectedIdToken,
        http_timeout: Duration,
        clock_skew: i64,
    ) -> Self {
        Self {
            http_client,
            expected,
            http_timeout,
            clock_skew,
            keys: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Vec<u8>> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header(ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|e| anyhow!("failed to construct request to '{url}': {e}"))?;
        let response = execute_with_timeout(self.http_client.as_ref(), request, self.http_timeout).await?;
        if !response.status().is_success() {
            bail!("the request to '{url}' returned status {}", response.status());
        }
        Ok(response.into_body())
    }

    async fn fetch_configuration(&self, url: &str) -> Result<OpenIdConfiguration> {
        let body = self.fetch_json(url).await?;
        serde_json::from_slice(&body)
            .map_err(|e| anyhow!("the configuration at '{url}' is not valid JSON: {e}"))
    }

    async fn fetch_jwks(&self, url: &str) -> Result<Jwks> {
        if let Some(jwks) = self.keys.lock().await.get(url) {
            return Ok(jwks.clone());
        }
        let body = self.fetch_json(url).await?;
        let jwks: Jwks = serde_json::from_slice(&body)
            .map_err(|e| anyhow!("the JWKS at '{url}' is not valid JSON: {e}"))?;
        self.keys.lock().await.insert(url.to_owned(), jwks.clone());
        Ok(jwks)
    }

    // The discovery endpoints worth trying: the token's own configuration
    // pointer when it is among the configured issuers, else every
    // configured issuer in turn.
    fn candidates(&self, token: &ClaimToken) -> Vec<String> {
        if let Some(configuration) = token.configuration() {
            if self.expected.issuers.is_empty()
                || self.expected.issuers.iter().any(|issuer| issuer == configuration)
            {
                return vec![configuration.to_owned()];
            }
        }
        self.expected.issuers.clone()
    }
}

#[async_trait]
impl TokenValidator for IdTokenValidator {
    fn is_type(&self) -> TokenType {
        TokenType::IdToken
    }

    async fn validate(
        &self,
        _queue: &mut ValidationQueue,
        item: &ValidationQueueItem,
        _context: &ValidationContext,
    ) -> ValidationResponse {
        let Some(token) = item.claim_token.as_ref() else {
            return ValidationResponse::misconfigured(format!(
                "the queue item '{}' has no decoded token",
                item.id
            ));
        };

        let candidates = self.candidates(token);
        if candidates.is_empty() {
            return ValidationResponse::rejected("the id token does not reference a token configuration");
        }

        let mut configuration = None;
        for url in &candidates {
            match self.fetch_configuration(url).await {
                Ok(config) => {
                    configuration = Some((url.as_str(), config));
                    break;
                }
                Err(e) => debug!("discovery fetch from '{url}' failed: {e:#}"),
            }
        }
        let Some((configuration_url, configuration)) = configuration else {
            return ValidationResponse::rejected("Could not fetch token configuration");
        };

        let jwks = match self.fetch_jwks(&configuration.jwks_uri).await {
            Ok(jwks) => jwks,
            Err(e) => return ValidationResponse::rejected(format!("{e:#}")),
        };

        let kid = token.header().get("kid").and_then(Json::as_str);
        let Some(key) = jwks.find_key(kid) else {
            return ValidationResponse::rejected(format!(
                "the JWKS at '{}' has no key matching '{}'",
                configuration.jwks_uri,
                kid.unwrap_or_default()
            ));
        };
        if let Err(e) = jws::verify_compact(token.raw(), key) {
            return ValidationResponse::rejected(format!(
                "the id token signature could not be verified: {e:#}"
            ));
        }

        let payload = token.payload();
        let Some(iss) = payload.get("iss").and_then(Json::as_str) else {
            return ValidationResponse::rejected("the id token has no 'iss' claim");
        };
        let issuer_matches = configuration.issuer.as_deref() == Some(iss)
            || self
                .expected
                .configuration
                .get(iss)
                .is_some_and(|url| url.as_str() == configuration_url);
        if !issuer_matches {
            return ValidationResponse::rejected(format!(
                "the id token issuer '{iss}' does not match the configuration at '{configuration_url}'"
            ));
        }

        if let Err(e) = jws::check_audience(payload, &self.expected.audience) {
            return ValidationResponse::rejected(e.to_string());
        }
        if let Err(e) = jws::check_expiry(payload, true, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }
        if let Err(e) = jws::check_not_before(payload, self.clock_skew) {
            return ValidationResponse::rejected(e.to_string());
        }

        ValidationResponse::ok().with_payload(payload.clone())
    }
}
