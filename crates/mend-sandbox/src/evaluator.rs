//! Candidate evaluation against acceptance thresholds

use crate::runner::{CaseOutcome, ProbeOutcome, SandboxRunner};
use mend_core::config::SandboxConfig;
use mend_core::{PerformanceMetrics, TestCase};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Acceptance checks applied to every candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceCheck {
    SourceSize,
    Syntax,
    EntryPoint,
    Accuracy,
    Latency,
}

/// Result of a single acceptance check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: AcceptanceCheck,
    pub passed: bool,
    pub details: String,
}

impl CheckResult {
    fn new(check: AcceptanceCheck, passed: bool, details: impl Into<String>) -> Self {
        Self {
            check,
            passed,
            details: details.into(),
        }
    }
}

/// What happened to one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub input: Value,
    pub expected: Value,
    pub actual: Option<Value>,
    pub error: Option<String>,
    pub elapsed_secs: f64,
    pub correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub accuracy_floor: f64,
    pub latency_ceiling_secs: f64,
    pub min_source_len: usize,
}

impl Thresholds {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            accuracy_floor: config.accuracy_floor,
            latency_ceiling_secs: config.latency_ceiling_secs,
            min_source_len: config.min_source_len,
        }
    }

    /// `true` when the candidate must be rejected
    pub fn is_failure(&self, metrics: &PerformanceMetrics, source_len: usize, syntax_valid: bool) -> bool {
        metrics.avg_accuracy < self.accuracy_floor
            || metrics.avg_latency_secs > self.latency_ceiling_secs
            || source_len < self.min_source_len
            || !syntax_valid
    }

    fn metric_checks(&self, metrics: Option<&PerformanceMetrics>) -> [CheckResult; 2] {
        match metrics {
            Some(m) => [
                CheckResult::new(
                    AcceptanceCheck::Accuracy,
                    m.avg_accuracy >= self.accuracy_floor,
                    format!("accuracy {:.2} (floor {:.2})", m.avg_accuracy, self.accuracy_floor),
                ),
                CheckResult::new(
                    AcceptanceCheck::Latency,
                    m.avg_latency_secs <= self.latency_ceiling_secs,
                    format!(
                        "latency {:.4}s (ceiling {:.2}s)",
                        m.avg_latency_secs, self.latency_ceiling_secs
                    ),
                ),
            ],
            None => [
                CheckResult::new(AcceptanceCheck::Accuracy, true, "no test cases"),
                CheckResult::new(AcceptanceCheck::Latency, true, "no test cases"),
            ],
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Outcome of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub metrics: Option<PerformanceMetrics>,
    pub checks: Vec<CheckResult>,
    pub cases: Vec<CaseReport>,
}

impl Verdict {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Semicolon-joined details of failed checks
    pub fn failure_summary(&self) -> String {
        self.failed_checks()
            .map(|c| c.details.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runs test cases through a [`SandboxRunner`] and applies [`Thresholds`]
///
/// Never fails: every problem becomes a failed check in the [`Verdict`].
pub struct SandboxEvaluator<R: SandboxRunner> {
    runner: R,
    thresholds: Thresholds,
}

impl<R: SandboxRunner> SandboxEvaluator<R> {
    pub fn new(runner: R, thresholds: Thresholds) -> Self {
        Self { runner, thresholds }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub async fn evaluate(&self, source: &str, entry_point: &str, cases: &[TestCase]) -> Verdict {
        // Characters, not bytes, to match how the candidate's language measures text
        let source_len = source.chars().count();
        let mut checks = vec![CheckResult::new(
            AcceptanceCheck::SourceSize,
            source_len >= self.thresholds.min_source_len,
            format!(
                "source is {} characters (minimum {})",
                source_len, self.thresholds.min_source_len
            ),
        )];

        let probe = self.runner.probe(source, entry_point).await;
        debug!("Probe outcome: {:?}", probe);

        let (syntax, entry) = match &probe {
            ProbeOutcome::Ready => (Ok(()), Ok(())),
            ProbeOutcome::SyntaxError(msg) => (Err(format!("syntax error: {}", msg)), Err("not loaded".to_string())),
            ProbeOutcome::LoadError(msg) => (Ok(()), Err(format!("module failed to load: {}", msg))),
            ProbeOutcome::MissingEntryPoint => (Ok(()), Err(format!("entry point '{}' not found", entry_point))),
            ProbeOutcome::Unavailable(msg) => (Ok(()), Err(format!("sandbox unavailable: {}", msg))),
        };
        let loaded = entry.is_ok();
        let syntax_valid = syntax.is_ok();
        checks.push(match syntax {
            Ok(()) => CheckResult::new(AcceptanceCheck::Syntax, true, "syntax ok"),
            Err(details) => CheckResult::new(AcceptanceCheck::Syntax, false, details),
        });
        checks.push(match entry {
            Ok(()) => CheckResult::new(AcceptanceCheck::EntryPoint, true, format!("'{}' is callable", entry_point)),
            Err(details) => CheckResult::new(AcceptanceCheck::EntryPoint, false, details),
        });

        let mut reports = Vec::with_capacity(cases.len());
        let metrics = if loaded {
            for case in cases {
                reports.push(self.run_one(source, entry_point, case).await);
            }
            let samples: Vec<(f64, bool)> = reports.iter().map(|r| (r.elapsed_secs, r.correct)).collect();
            PerformanceMetrics::from_samples(&samples)
        } else {
            None
        };

        if loaded {
            checks.extend(self.thresholds.metric_checks(metrics.as_ref()));
        }

        let passed = checks.iter().all(|c| c.passed)
            && !metrics
                .as_ref()
                .is_some_and(|m| self.thresholds.is_failure(m, source_len, syntax_valid));
        let verdict = Verdict {
            passed,
            metrics,
            checks,
            cases: reports,
        };

        if verdict.passed {
            info!("Candidate passed evaluation: {:?}", verdict.metrics);
        } else {
            info!("Candidate failed evaluation: {}", verdict.failure_summary());
        }
        verdict
    }

    async fn run_one(&self, source: &str, entry_point: &str, case: &TestCase) -> CaseReport {
        let mut report = CaseReport {
            input: case.input.clone(),
            expected: case.expected.clone(),
            actual: None,
            error: None,
            elapsed_secs: 0.0,
            correct: false,
        };

        match self.runner.run_case(source, entry_point, &case.input).await {
            Ok(run) => {
                report.elapsed_secs = run.elapsed_secs;
                match run.outcome {
                    CaseOutcome::Returned(value) => {
                        report.correct = values_equal(&value, &case.expected);
                        report.actual = Some(value);
                    }
                    CaseOutcome::Raised(msg) => report.error = Some(msg),
                    CaseOutcome::TimedOut => report.error = Some("timed out".to_string()),
                    CaseOutcome::Crashed(msg) => report.error = Some(format!("crashed: {}", msg)),
                }
            }
            Err(e) => {
                warn!("Sandbox could not run case {}: {}", case.input, e);
                report.error = Some(e.to_string());
            }
        }

        report
    }
}

/// Equality the way the candidate's language sees it: `1 == 1.0`
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, x)| b.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use serde_json::json;

    const SOURCE: &str = "def process_query(q):\n    return q\n";

    fn metrics(acc: f64, time: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            avg_latency_secs: time,
            avg_accuracy: acc,
            cases: 2,
        }
    }

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("hello", "Hello! How can I help?"),
            TestCase::new("sort 5 3 1", json!([1, 3, 5])),
        ]
    }

    #[test]
    fn test_threshold_enforcement() {
        let thresholds = Thresholds {
            accuracy_floor: 0.8,
            latency_ceiling_secs: 1.0,
            min_source_len: 10,
        };

        assert!(thresholds.is_failure(&metrics(0.5, 0.2), 100, true));
        assert!(!thresholds.is_failure(&metrics(0.9, 0.2), 100, true));

        assert!(thresholds.is_failure(&metrics(1.0, 1.5), 100, true));
        assert!(thresholds.is_failure(&metrics(1.0, 0.2), 5, true));
        assert!(thresholds.is_failure(&metrics(1.0, 0.2), 100, false));
    }

    #[tokio::test]
    async fn test_all_cases_pass() {
        let evaluator = SandboxEvaluator::new(ScriptedRunner::echoing(&cases(), 0.2), Thresholds::default());
        let verdict = evaluator.evaluate(SOURCE, "process_query", &cases()).await;

        assert!(verdict.passed, "{}", verdict.failure_summary());
        let m = verdict.metrics.unwrap();
        assert_eq!(m.avg_accuracy, 1.0);
        assert!((m.avg_latency_secs - 0.2).abs() < 1e-9);
        assert_eq!(verdict.cases.len(), 2);
        assert_eq!(evaluator.runner().probed_sources(), vec![SOURCE]);
    }

    #[tokio::test]
    async fn test_case_errors_count_as_failures_and_continue() {
        let runner = ScriptedRunner::new(ProbeOutcome::Ready)
            .with_case(&json!("hello"), CaseOutcome::Raised("TypeError: takes 2 arguments".to_string()), 0.01)
            .with_case(&json!("sort 5 3 1"), CaseOutcome::Returned(json!([1, 3, 5])), 0.01);
        let evaluator = SandboxEvaluator::new(runner, Thresholds::default());

        let verdict = evaluator.evaluate(SOURCE, "process_query", &cases()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.metrics.unwrap().avg_accuracy, 0.5);
        assert!(verdict.cases[0].error.as_deref().unwrap().contains("TypeError"));
        assert!(verdict.cases[1].correct);
        assert!(verdict.failure_summary().contains("accuracy 0.50"));
    }

    #[tokio::test]
    async fn test_runner_error_is_case_failure() {
        // No scripted outcome for the second case
        let runner = ScriptedRunner::new(ProbeOutcome::Ready)
            .with_case(&json!("hello"), CaseOutcome::Returned(json!("Hello! How can I help?")), 0.01);
        let verdict = SandboxEvaluator::new(runner, Thresholds::default())
            .evaluate(SOURCE, "process_query", &cases())
            .await;

        assert!(!verdict.passed);
        assert!(!verdict.cases[1].correct);
    }

    #[tokio::test]
    async fn test_syntax_error_fails_without_running_cases() {
        let runner = ScriptedRunner::new(ProbeOutcome::SyntaxError("invalid syntax (line 1)".to_string()));
        let verdict = SandboxEvaluator::new(runner, Thresholds::default())
            .evaluate(SOURCE, "process_query", &cases())
            .await;

        assert!(!verdict.passed);
        assert!(verdict.metrics.is_none());
        assert!(verdict.cases.is_empty());
        assert!(verdict
            .failed_checks()
            .any(|c| c.check == AcceptanceCheck::Syntax));
    }

    #[tokio::test]
    async fn test_missing_entry_point_fails() {
        let runner = ScriptedRunner::new(ProbeOutcome::MissingEntryPoint);
        let verdict = SandboxEvaluator::new(runner, Thresholds::default())
            .evaluate(SOURCE, "process_query", &cases())
            .await;

        assert!(!verdict.passed);
        assert!(verdict.failure_summary().contains("'process_query' not found"));
    }

    #[tokio::test]
    async fn test_truncated_source_fails() {
        let evaluator = SandboxEvaluator::new(ScriptedRunner::echoing(&cases(), 0.1), Thresholds::default());
        let verdict = evaluator.evaluate("def f", "process_query", &cases()).await;

        assert!(!verdict.passed);
        assert_eq!(verdict.failed_checks().count(), 1);
        assert_eq!(verdict.checks[0].check, AcceptanceCheck::SourceSize);
    }

    #[tokio::test]
    async fn test_source_size_counts_characters() {
        let thresholds = Thresholds {
            min_source_len: 10,
            ..Thresholds::default()
        };
        // Nine characters, but more than ten bytes
        let source = "\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}";
        assert!(source.len() >= 10);

        let evaluator = SandboxEvaluator::new(ScriptedRunner::echoing(&cases(), 0.1), thresholds);
        let verdict = evaluator.evaluate(source, "process_query", &cases()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.checks[0].check, AcceptanceCheck::SourceSize);
        assert!(!verdict.checks[0].passed);
    }

    #[tokio::test]
    async fn test_no_cases_passes_loaded_candidate() {
        let evaluator = SandboxEvaluator::new(ScriptedRunner::new(ProbeOutcome::Ready), Thresholds::default());
        let verdict = evaluator.evaluate(SOURCE, "process_query", &[]).await;
        assert!(verdict.passed);
        assert!(verdict.metrics.is_none());
    }

    #[test]
    fn test_numeric_equality_ignores_int_float_split() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, 2.0, {"k": 3}]), &json!([1.0, 2, {"k": 3.0}])));
        assert!(!values_equal(&json!(1), &json!(1.5)));
        assert!(!values_equal(&json!([1]), &json!([1, 1])));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[tokio::test]
    async fn test_float_result_matches_integer_expectation() {
        let cases = vec![TestCase::new("avg 2 2", json!(2))];
        let runner = ScriptedRunner::new(ProbeOutcome::Ready)
            .with_case(&json!("avg 2 2"), CaseOutcome::Returned(json!(2.0)), 0.01);
        let evaluator = SandboxEvaluator::new(runner, Thresholds::default());

        let verdict = evaluator.evaluate(SOURCE, "process_query", &cases).await;
        assert!(verdict.passed, "{}", verdict.failure_summary());
        assert!(verdict.cases[0].correct);
    }
}
