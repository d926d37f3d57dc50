//! Improvement query formulation and incrementality judgment

use mend_agent::GenerationClient;
use mend_core::config::PhaseConfig;
use mend_core::{Goal, ImprovementQuery, QueryOrigin, Result};
use std::sync::Arc;
use tracing::{debug, warn};

const JUDGE_MAX_TOKENS: usize = 10;

/// Strict answer to "is this patch small and incremental?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    Incremental,
    NotIncremental,
    /// Anything other than the two accepted tokens
    Unparseable,
}

impl Judgment {
    /// Accepts exactly `INCREMENTAL` or `NOT_INCREMENTAL`, ignoring case,
    /// surrounding whitespace and one trailing period
    pub fn parse(response: &str) -> Self {
        let token = response.trim();
        let token = token.strip_suffix('.').unwrap_or(token);
        if token.eq_ignore_ascii_case("INCREMENTAL") {
            Self::Incremental
        } else if token.eq_ignore_ascii_case("NOT_INCREMENTAL") {
            Self::NotIncremental
        } else {
            Self::Unparseable
        }
    }
}

pub struct QueryFormulator {
    client: Arc<GenerationClient>,
    max_tokens: usize,
    temperature: f32,
}

impl QueryFormulator {
    pub fn new(client: Arc<GenerationClient>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            client,
            max_tokens,
            temperature,
        }
    }

    /// Seed queries for the phase plus at most one generated idea
    ///
    /// A terminal goal yields nothing. Generation failure only costs the extra idea.
    pub async fn formulate(&self, goal: &Goal, phase: &PhaseConfig, target: &str) -> Vec<ImprovementQuery> {
        if goal.terminal {
            return Vec::new();
        }

        let mut queries: Vec<ImprovementQuery> = phase
            .queries
            .iter()
            .map(|q| ImprovementQuery::new(q.as_str(), target, QueryOrigin::Seed))
            .collect();

        let prompt = format!("Suggest one small patch idea for {}", phase.description);
        match self.client.query(&prompt, self.max_tokens, self.temperature).await {
            Ok(idea) => {
                debug!("Generated improvement idea: {}", idea);
                queries.push(ImprovementQuery::new(idea, target, QueryOrigin::Generated));
            }
            Err(e) => warn!(error_kind = e.kind(), "No generated idea for {}: {}", goal, e),
        }

        queries
    }

    /// Ask whether `query` describes a small, incremental change
    pub async fn judge(&self, query: &ImprovementQuery) -> Result<Judgment> {
        let prompt = format!(
            "Is this small, safe patch incremental? {}\n\
             Answer with exactly one word: INCREMENTAL or NOT_INCREMENTAL.",
            query.text
        );
        let response = self.client.query(&prompt, JUDGE_MAX_TOKENS, 0.0).await?;
        let judgment = Judgment::parse(&response);
        debug!("Judged '{}' as {:?}", query.text, judgment);
        Ok(judgment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agent::MockBackend;
    use std::time::Duration;

    fn formulator(backend: MockBackend) -> QueryFormulator {
        let client = GenerationClient::new(Arc::new(backend), "m", Duration::from_secs(5));
        QueryFormulator::new(Arc::new(client), 200, 0.7)
    }

    fn phase() -> PhaseConfig {
        PhaseConfig {
            description: "Patch to optimize existing functions".to_string(),
            queries: vec!["Patch sorting for faster performance on large lists.".to_string()],
        }
    }

    #[test]
    fn test_judgment_parse_is_strict() {
        assert_eq!(Judgment::parse("INCREMENTAL"), Judgment::Incremental);
        assert_eq!(Judgment::parse(" incremental.\n"), Judgment::Incremental);
        assert_eq!(Judgment::parse("NOT_INCREMENTAL"), Judgment::NotIncremental);
        assert_eq!(Judgment::parse("Yes"), Judgment::Unparseable);
        assert_eq!(Judgment::parse("Yes, it is INCREMENTAL"), Judgment::Unparseable);
        assert_eq!(Judgment::parse("not incremental"), Judgment::Unparseable);
    }

    #[tokio::test]
    async fn test_formulate_seeds_plus_idea() {
        let f = formulator(MockBackend::new().with_response("Suggest one small patch idea", "Cache parsed numbers"));
        let goal = Goal::new(0, "optimize", 5);

        let queries = f.formulate(&goal, &phase(), "core.py").await;
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].origin, QueryOrigin::Seed);
        assert_eq!(queries[1].text, "Cache parsed numbers");
        assert_eq!(queries[1].origin, QueryOrigin::Generated);
        assert!(queries.iter().all(|q| q.target == "core.py"));
    }

    #[tokio::test]
    async fn test_formulate_survives_generation_failure() {
        let f = formulator(MockBackend::new());
        let queries = f.formulate(&Goal::new(0, "optimize", 5), &phase(), "core.py").await;
        assert_eq!(queries.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_goal_yields_nothing() {
        let f = formulator(MockBackend::new().with_response("Suggest", "idea"));
        let queries = f.formulate(&Goal::new(5, "done", 5), &phase(), "core.py").await;
        assert!(queries.is_empty());
    }

    #[tokio::test]
    async fn test_judge() {
        let f = formulator(
            MockBackend::new()
                .with_response("Patch sorting", "INCREMENTAL")
                .with_response("Rewrite everything", "NOT_INCREMENTAL"),
        );
        let small = ImprovementQuery::new("Patch sorting", "core.py", QueryOrigin::Seed);
        let big = ImprovementQuery::new("Rewrite everything", "core.py", QueryOrigin::Seed);

        assert_eq!(f.judge(&small).await.unwrap(), Judgment::Incremental);
        assert_eq!(f.judge(&big).await.unwrap(), Judgment::NotIncremental);
    }
}
