//! Entity extraction from free questions

use super::contract::strip_fences;
use super::prompts::entity_request;
use super::GenerationClient;
use crate::retrieval::EntityMap;
use tracing::{debug, warn};

/// Ask the generator which FMEA entities a question mentions.
///
/// Transport and parse failures yield an empty map.
pub async fn extract_entities(client: &dyn GenerationClient, question: &str) -> EntityMap {
    let raw = match client.complete(&entity_request(question)).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "entity extraction call failed");
            return EntityMap::default();
        }
    };

    match serde_json::from_str(&strip_fences(&raw)) {
        Ok(value) => {
            let entities = EntityMap::from_json(&value);
            debug!(?entities, "extracted entities");
            entities
        }
        Err(e) => {
            warn!(error = %e, "entity extraction returned invalid JSON");
            EntityMap::default()
        }
    }
}
