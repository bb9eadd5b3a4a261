//! The work-list of tokens awaiting validation. A queue belongs to exactly
//! one `validate` call and grows append-only as SIOP fan-out discovers
//! nested tokens.

use crate::core::claim_token::ClaimToken;
use crate::core::response::ValidationResponse;

/// One token to validate, together with its eventual result.
#[derive(Clone, Debug)]
pub struct ValidationQueueItem {
    /// Caller-chosen handle: `"siop"` for the root, the descriptor-map id
    /// or attestation sub-key for children.
    pub id: String,
    /// The raw compact JWS.
    pub token_to_validate: String,
    /// The decoded token, when the item was enqueued pre-classified.
    pub claim_token: Option<ClaimToken>,
    /// The classified token, recorded when the result is set.
    pub validated_token: Option<ClaimToken>,
    /// The outcome. Final once set.
    pub validation_response: Option<ValidationResponse>,
    pub is_validated: bool,
}

/// Append-only FIFO of [`ValidationQueueItem`]s, processed in insertion
/// order.
#[derive(Debug, Default)]
pub struct ValidationQueue {
    items: Vec<ValidationQueueItem>,
}

impl ValidationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw token that still needs decoding and classification.
    pub fn enqueue_token(&mut self, id: impl Into<String>, raw: impl Into<String>) {
        self.items.push(ValidationQueueItem {
            id: id.into(),
            token_to_validate: raw.into(),
            claim_token: None,
            validated_token: None,
            validation_response: None,
            is_validated: false,
        });
    }

    /// Append an already-classified token, skipping the re-parse.
    pub fn enqueue_item(&mut self, id: impl Into<String>, token: ClaimToken) {
        self.items.push(ValidationQueueItem {
            id: id.into(),
            token_to_validate: token.raw().to_owned(),
            claim_token: Some(token),
            validated_token: None,
            validation_response: None,
            is_validated: false,
        });
    }

    /// The first item that has not been validated yet, in insertion order.
    pub fn get_next(&self) -> Option<ValidationQueueItem> {
        self.items.iter().find(|item| !item.is_validated).cloned()
    }

    /// Record the outcome for the first unvalidated item with the given id.
    pub fn set_result(
        &mut self,
        id: &str,
        response: ValidationResponse,
        validated_token: Option<ClaimToken>,
    ) {
        if let Some(item) = self.items.iter_mut().find(|item| !item.is_validated && item.id == id) {
            item.validation_response = Some(response);
            item.validated_token = validated_token;
            item.is_validated = true;
        }
    }

    /// Success iff every item succeeded; otherwise the first failure,
    /// verbatim.
    pub fn aggregate(&self) -> ValidationResponse {
        for item in &self.items {
            match &item.validation_response {
                Some(response) if response.result => {}
                Some(response) => return response.clone(),
                None => {
                    return ValidationResponse::rejected(format!(
                        "the token '{}' was never validated",
                        item.id
                    ))
                }
            }
        }
        ValidationResponse::ok()
    }

    pub fn items(&self) -> &[ValidationQueueItem] {
        &self.items
    }
}
