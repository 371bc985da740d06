// Memory Extractor
//
// Best-effort background task that derives durable facts from a completed
// turn and upserts them as memory items. Failures here are logged and
// swallowed; they never reach the caller of the turn that spawned us.

use crate::models::{ExtractedFacts, MemorySource};
use crate::repositories::MemoryRepository;
use crate::services::backend::{BoxedBackend, ChatBackend, CompletionRequest};

const EXTRACTION_INSTRUCTIONS: &str = "\
You extract durable facts about the user from a single message. \
Respond with strict JSON of the shape {\"general\": [], \"scoped\": []}. \
\"general\" holds atomic facts that apply to the user everywhere; \"scoped\" \
holds facts specific to the current topic. Skip anything ephemeral, \
speculative, or sensitive (credentials, health, finances). Empty arrays are \
a valid answer.";

/// Strip a surrounding markdown code fence, if present
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop an optional language tag on the fence line
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }

    trimmed
}

/// Ask the backend for facts and persist them.
/// Returns the number of newly stored facts.
pub async fn extract_and_store(
    backend: &dyn ChatBackend,
    repo: &MemoryRepository,
    scope_id: &str,
    user_text: &str,
    model: &str,
) -> Result<usize, String> {
    let raw = backend
        .complete(CompletionRequest {
            input: user_text.to_string(),
            model: model.to_string(),
            instructions: Some(EXTRACTION_INSTRUCTIONS.to_string()),
        })
        .await
        .map_err(|e| format!("Extraction request failed: {}", e))?;

    let facts: ExtractedFacts = serde_json::from_str(strip_code_fence(&raw))
        .map_err(|e| format!("Malformed extraction output: {}", e))?;

    let mut stored = 0usize;

    for fact in &facts.general {
        if repo.upsert_fact(fact, None, MemorySource::Ai)? {
            stored += 1;
        }
    }
    for fact in &facts.scoped {
        if repo.upsert_fact(fact, Some(scope_id), MemorySource::Ai)? {
            stored += 1;
        }
    }

    Ok(stored)
}

/// Spawn the extractor detached with its own error boundary
pub fn spawn_extraction(
    backend: BoxedBackend,
    repo: MemoryRepository,
    scope_id: String,
    user_text: String,
    model: String,
) {
    tokio::spawn(async move {
        match extract_and_store(backend.as_ref(), &repo, &scope_id, &user_text, &model).await {
            Ok(stored) => {
                if stored > 0 {
                    log::info!("Memory extraction stored {} fact(s)", stored);
                }
            }
            Err(e) => log::warn!("Memory extraction failed: {}", e),
        }
    });
}
