//! Patch generation through the generation service

use crate::diff::UnifiedDiff;
use mend_agent::GenerationClient;
use mend_core::config::{GenerationConfig, PatchConfig};
use mend_core::{ImprovementQuery, MendError, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Build the diff request prompt for `query` against `source`
pub fn build_patch_prompt(query: &str, source: &str) -> String {
    format!(
        "Generate a SMALL, incremental unified diff patch for this Python code based on: {query}\n\
         Focus on patching one specific part (e.g., optimize a function). \
         Output ONLY the unified diff format (starting with --- and +++), no explanations.\n\
         Current code:\n{source}"
    )
}

pub struct PatchGenerator {
    client: Arc<GenerationClient>,
    max_hunk_lines: usize,
    max_tokens: usize,
    temperature: f32,
}

impl PatchGenerator {
    pub fn new(client: Arc<GenerationClient>, max_hunk_lines: usize, max_tokens: usize, temperature: f32) -> Self {
        Self {
            client,
            max_hunk_lines,
            max_tokens,
            temperature,
        }
    }

    pub fn from_config(client: Arc<GenerationClient>, patch: &PatchConfig, generation: &GenerationConfig) -> Self {
        Self::new(client, patch.max_hunk_lines, patch.max_tokens, generation.temperature)
    }

    /// Ask for a diff implementing `query` and validate its shape and size
    #[instrument(skip(self, source), fields(query = %query.text))]
    pub async fn propose(&self, query: &ImprovementQuery, source: &str) -> Result<UnifiedDiff> {
        let prompt = build_patch_prompt(&query.text, source);
        let response = self
            .client
            .query(&prompt, self.max_tokens, self.temperature)
            .await?;

        let diff = self.validate_response(&response)?;
        info!(
            "Generated diff with {} hunk(s), {} line(s)",
            diff.hunks.len(),
            diff.hunk_line_count()
        );
        Ok(diff)
    }

    /// Shape and size checks run before anything touches the source
    pub fn validate_response(&self, response: &str) -> Result<UnifiedDiff> {
        let text = strip_code_fence(response);

        if !text.starts_with("---") {
            debug!("Rejected response without diff header: {:.80}", text);
            return Err(MendError::MalformedDiff(
                "Response does not start with '---'".to_string(),
            ));
        }

        let diff = UnifiedDiff::parse(text)?;
        let lines = diff.hunk_line_count();
        if lines > self.max_hunk_lines {
            return Err(MendError::OversizedDiff {
                lines,
                max: self.max_hunk_lines,
            });
        }
        Ok(diff)
    }
}

/// Remove a surrounding ```diff fence if the service added one
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agent::MockBackend;
    use mend_core::QueryOrigin;
    use std::time::Duration;

    const DIFF: &str = "--- a/core.py\n+++ b/core.py\n@@ -1 +1 @@\n-    return sorted(numbers)\n+    numbers.sort(); return numbers\n";

    fn generator(backend: MockBackend, max_hunk_lines: usize) -> PatchGenerator {
        let client = GenerationClient::new(Arc::new(backend), "m", Duration::from_secs(5));
        PatchGenerator::new(Arc::new(client), max_hunk_lines, 500, 0.7)
    }

    fn query() -> ImprovementQuery {
        ImprovementQuery::new("Patch sorting", "core.py", QueryOrigin::Seed)
    }

    #[test]
    fn test_prompt_embeds_query_and_source() {
        let prompt = build_patch_prompt("Patch sorting", "def f(): pass");
        assert!(prompt.contains("based on: Patch sorting"));
        assert!(prompt.contains("Output ONLY the unified diff format"));
        assert!(prompt.ends_with("Current code:\ndef f(): pass"));
    }

    #[tokio::test]
    async fn test_propose_valid_diff() {
        let gen = generator(MockBackend::new().with_response("Patch sorting", DIFF), 30);
        let diff = gen.propose(&query(), "    return sorted(numbers)\n").await.unwrap();
        assert_eq!(diff.hunk_line_count(), 2);
    }

    #[tokio::test]
    async fn test_propose_rejects_prose() {
        let gen = generator(
            MockBackend::new().with_response("Patch sorting", "Sure! Here is the patch:\n--- a/core.py"),
            30,
        );
        let err = gen.propose(&query(), "x").await.unwrap_err();
        assert!(matches!(err, MendError::MalformedDiff(_)));
    }

    #[tokio::test]
    async fn test_propose_rejects_oversized() {
        let gen = generator(MockBackend::new().with_response("Patch sorting", DIFF), 1);
        let err = gen.propose(&query(), "x").await.unwrap_err();
        assert!(matches!(err, MendError::OversizedDiff { lines: 2, max: 1 }));
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let gen = generator(MockBackend::new(), 30);
        assert!(gen.propose(&query(), "x").await.unwrap_err().is_generation_failure());
    }

    #[test]
    fn test_code_fence_stripped() {
        let gen = generator(MockBackend::new(), 30);
        let fenced = format!("```diff\n{}```\n", DIFF);
        assert!(gen.validate_response(&fenced).is_ok());
        assert_eq!(strip_code_fence("  --- a\n"), "--- a");
    }
}
