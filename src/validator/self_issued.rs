//! Validation of self-issued claim bundles. These carry no signature; only
//! the payload structure is checked.

use async_trait::async_trait;

use crate::core::claim_token::TokenType;
use crate::core::queue::{ValidationQueue, ValidationQueueItem};
use crate::core::response::ValidationResponse;

use super::{TokenValidator, ValidationContext};

#[derive(Debug, Default)]
pub struct SelfIssuedValidator;

impl SelfIssuedValidator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenValidator for SelfIssuedValidator {
    fn is_type(&self) -> TokenType {
        TokenType::SelfIssued
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
        if token.payload().is_empty() {
            return ValidationResponse::rejected("the self-issued token carries no claims");
        }
        ValidationResponse::ok().with_payload(token.payload().clone())
    }
}
