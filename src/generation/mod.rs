//! Generation: transports, prompts and the response contract
//!
//! One call per analysis unit. The transport returns raw text; the
//! contract adapter turns it into a [`GenerationOutcome`] and never fails.

mod client;
mod contract;
mod entities;
pub mod prompts;

pub use client::{
    GenerationClient, GenerationError, GenerationRequest, HttpGenerationClient, MockClient,
    RetryPolicy,
};
pub use contract::{
    strip_fences, GeneratedFailure, GeneratedMeasure, GenerationContent, GenerationOutcome,
    RiskRatings, Stage, INVALID_STRUCTURE, PARSE_FAILED,
};
pub use entities::extract_entities;

/// Invoke the client once and validate its response for `stage`.
///
/// Only transport errors are returned; malformed responses become
/// `ERROR: ...` decisions.
pub async fn generate(
    client: &dyn GenerationClient,
    stage: Stage,
    request: &GenerationRequest,
) -> Result<GenerationOutcome, GenerationError> {
    let raw = client.complete(request).await?;
    tracing::debug!(%stage, len = raw.len(), "generation response received");
    Ok(GenerationOutcome::parse(stage, &raw))
}
