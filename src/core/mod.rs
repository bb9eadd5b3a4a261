//! Wire formats and the data model of the validation engine: claim
//! tokens, the validation queue, per-type expectations and the assembled
//! result, plus the JWS/JWK/DID/HTTP plumbing the validators share.

pub mod claim_token;
pub mod did;
pub mod expected;
pub mod http;
pub mod jwk;
pub mod jws;
pub mod queue;
pub mod response;
pub mod result;

pub use claim_token::{ClaimToken, TokenType, SELF_ISSUED_ISSUER};
pub use queue::{ValidationQueue, ValidationQueueItem};
pub use response::ValidationResponse;
pub use result::{StatusEntry, ValidationResult};
