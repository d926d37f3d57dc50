//! Candidate execution backends
//!
//! The host never loads candidate text itself. [`PythonRunner`] starts a
//! fresh isolated interpreter for the probe and for every test case, so a
//! candidate can neither touch host state nor leak state between cases.

use async_trait::async_trait;
use mend_core::config::SandboxConfig;
use mend_core::{MendError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument};

const HARNESS: &str = include_str!("harness.py");
const HARNESS_FILE: &str = "mend_harness.py";
const CANDIDATE_FILE: &str = "candidate.py";

/// Result of loading a candidate and looking up its entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    SyntaxError(String),
    /// Module raised while executing its top level
    LoadError(String),
    MissingEntryPoint,
    /// The runner itself could not execute anything
    Unavailable(String),
}

/// How one test case call ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    Returned(Value),
    Raised(String),
    TimedOut,
    Crashed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseRun {
    pub outcome: CaseOutcome,
    pub elapsed_secs: f64,
}

/// Executes candidate source in isolation from the host
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn probe(&self, source: &str, entry_point: &str) -> ProbeOutcome;

    /// Call `entry_point(input)` once. `Err` means the runner failed, not the candidate.
    async fn run_case(&self, source: &str, entry_point: &str, input: &Value) -> Result<CaseRun>;
}

/// Single JSON line written by the harness
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessReport {
    Ok,
    SyntaxError { message: String },
    LoadError { message: String },
    MissingEntryPoint,
    Raised { message: String, elapsed: f64 },
    Returned { result: Value, elapsed: f64 },
}

/// Raw process result
enum Execution {
    Finished { stdout: Vec<u8>, stderr: Vec<u8> },
    TimedOut,
}

/// Subprocess Python sandbox
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: String,
    case_timeout: Duration,
    max_output_bytes: usize,
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>, case_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            case_timeout,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            Duration::from_secs(config.case_timeout_secs),
            config.max_output_bytes,
        )
    }

    fn stage(&self, source: &str) -> Result<TempDir> {
        let dir = TempDir::new()
            .map_err(|e| MendError::Sandbox(format!("Failed to create temp dir: {}", e)))?;
        std::fs::write(dir.path().join(HARNESS_FILE), HARNESS)?;
        std::fs::write(dir.path().join(CANDIDATE_FILE), source)?;
        Ok(dir)
    }

    #[instrument(skip(self, dir, stdin), fields(interpreter = %self.interpreter))]
    async fn execute(&self, dir: &Path, mode: &str, entry_point: &str, stdin: Option<Vec<u8>>) -> Result<Execution> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg(HARNESS_FILE)
            .arg(mode)
            .arg(CANDIDATE_FILE)
            .arg(entry_point)
            .current_dir(dir)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| MendError::Sandbox(format!("Failed to start {}: {}", self.interpreter, e)))?;

        // One byte past the cap is enough to tell that output overflowed
        let limit = self.max_output_bytes as u64 + 1;
        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let run = async {
            if let (Some(bytes), Some(mut pipe)) = (stdin, stdin_pipe) {
                pipe.write_all(&bytes).await?;
                // Closing the pipe signals EOF to the harness
                drop(pipe);
            }

            let (stdout, stderr) =
                tokio::try_join!(read_bounded(stdout_pipe, limit), read_bounded(stderr_pipe, limit))?;
            if stdout.len() as u64 >= limit || stderr.len() as u64 >= limit {
                if let Err(e) = child.start_kill() {
                    debug!("Kill after output overflow failed: {}", e);
                }
            }
            child.wait().await?;
            Ok::<_, MendError>(Execution::Finished { stdout, stderr })
        };

        // Dropping the child on timeout kills it
        match tokio::time::timeout(self.case_timeout, run).await {
            Ok(execution) => execution,
            Err(_) => Ok(Execution::TimedOut),
        }
    }

    fn parse_report(&self, stdout: &[u8], stderr: &[u8]) -> std::result::Result<HarnessReport, String> {
        if stdout.len() > self.max_output_bytes || stderr.len() > self.max_output_bytes {
            return Err(format!(
                "output exceeded {} bytes",
                self.max_output_bytes
            ));
        }
        serde_json::from_slice(stdout).map_err(|_| {
            let stderr = String::from_utf8_lossy(stderr);
            let tail = stderr.lines().last().unwrap_or("no output").to_string();
            format!("harness produced no report ({})", tail)
        })
    }
}

#[async_trait]
impl SandboxRunner for PythonRunner {
    async fn probe(&self, source: &str, entry_point: &str) -> ProbeOutcome {
        let dir = match self.stage(source) {
            Ok(dir) => dir,
            Err(e) => return ProbeOutcome::Unavailable(e.to_string()),
        };

        let (stdout, stderr) = match self.execute(dir.path(), "probe", entry_point, None).await {
            Ok(Execution::Finished { stdout, stderr }) => (stdout, stderr),
            Ok(Execution::TimedOut) => {
                return ProbeOutcome::LoadError(format!(
                    "loading timed out after {:?}",
                    self.case_timeout
                ))
            }
            Err(e) => return ProbeOutcome::Unavailable(e.to_string()),
        };

        match self.parse_report(&stdout, &stderr) {
            Ok(HarnessReport::Ok) => ProbeOutcome::Ready,
            Ok(HarnessReport::SyntaxError { message }) => ProbeOutcome::SyntaxError(message),
            Ok(HarnessReport::LoadError { message }) => ProbeOutcome::LoadError(message),
            Ok(HarnessReport::MissingEntryPoint) => ProbeOutcome::MissingEntryPoint,
            Ok(other) => ProbeOutcome::Unavailable(format!("unexpected probe report: {:?}", other)),
            Err(message) => ProbeOutcome::Unavailable(message),
        }
    }

    async fn run_case(&self, source: &str, entry_point: &str, input: &Value) -> Result<CaseRun> {
        let dir = self.stage(source)?;
        let stdin = serde_json::to_vec(input)?;

        let started = Instant::now();
        let execution = self.execute(dir.path(), "call", entry_point, Some(stdin)).await?;
        let wall = started.elapsed().as_secs_f64();

        let run = match execution {
            Execution::TimedOut => CaseRun {
                outcome: CaseOutcome::TimedOut,
                elapsed_secs: wall,
            },
            Execution::Finished { stdout, stderr } => match self.parse_report(&stdout, &stderr) {
                Ok(HarnessReport::Returned { result, elapsed }) => CaseRun {
                    outcome: CaseOutcome::Returned(result),
                    elapsed_secs: elapsed,
                },
                Ok(HarnessReport::Raised { message, elapsed }) => CaseRun {
                    outcome: CaseOutcome::Raised(message),
                    elapsed_secs: elapsed,
                },
                Ok(other) => CaseRun {
                    outcome: CaseOutcome::Crashed(format!("unexpected case report: {:?}", other)),
                    elapsed_secs: wall,
                },
                Err(message) => CaseRun {
                    outcome: CaseOutcome::Crashed(message),
                    elapsed_secs: wall,
                },
            },
        };

        debug!("Case {} finished in {:.4}s: {:?}", input, run.elapsed_secs, run.outcome);
        Ok(run)
    }
}

/// Read a pipe to EOF, stopping after `limit` bytes
async fn read_bounded<R>(pipe: Option<R>, limit: u64) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.take(limit).read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Canned runner for tests
///
/// Case outcomes are keyed by the JSON text of the input. Every probed
/// source is recorded.
pub struct ScriptedRunner {
    probe: ProbeOutcome,
    cases: HashMap<String, CaseRun>,
    probed: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(probe: ProbeOutcome) -> Self {
        Self {
            probe,
            cases: HashMap::new(),
            probed: Mutex::new(Vec::new()),
        }
    }

    /// Runner that answers every case with its expected value
    pub fn echoing(cases: &[mend_core::TestCase], elapsed_secs: f64) -> Self {
        cases.iter().fold(Self::new(ProbeOutcome::Ready), |runner, case| {
            runner.with_case(&case.input, CaseOutcome::Returned(case.expected.clone()), elapsed_secs)
        })
    }

    pub fn with_case(mut self, input: &Value, outcome: CaseOutcome, elapsed_secs: f64) -> Self {
        self.cases.insert(input.to_string(), CaseRun { outcome, elapsed_secs });
        self
    }

    pub fn probed_sources(&self) -> Vec<String> {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SandboxRunner for ScriptedRunner {
    async fn probe(&self, source: &str, _entry_point: &str) -> ProbeOutcome {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source.to_string());
        self.probe.clone()
    }

    async fn run_case(&self, _source: &str, _entry_point: &str, input: &Value) -> Result<CaseRun> {
        self.cases
            .get(&input.to_string())
            .cloned()
            .ok_or_else(|| MendError::Sandbox(format!("No scripted outcome for {}", input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn runner() -> PythonRunner {
        PythonRunner::new("python3", Duration::from_secs(5), 64 * 1024)
    }

    const CORE: &str = r#"
print("module noise")

def process_query(query):
    print("call noise")
    if query.startswith("sort"):
        return sorted(int(n) for n in query.split()[1:])
    if query == "boom":
        raise ValueError("bad query")
    return "Hello! How can I help?"
"#;

    #[test]
    fn test_harness_report_parsing() {
        let report: HarnessReport =
            serde_json::from_str(r#"{"status": "returned", "result": [1, 3, 5], "elapsed": 0.01}"#).unwrap();
        assert!(matches!(report, HarnessReport::Returned { .. }));

        let report: HarnessReport = serde_json::from_str(r#"{"status": "missing_entry_point"}"#).unwrap();
        assert!(matches!(report, HarnessReport::MissingEntryPoint));
    }

    #[tokio::test]
    async fn test_python_probe_outcomes() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let runner = runner();

        assert_eq!(runner.probe(CORE, "process_query").await, ProbeOutcome::Ready);
        assert_eq!(runner.probe(CORE, "handle").await, ProbeOutcome::MissingEntryPoint);
        assert!(matches!(
            runner.probe("def process_query(q:\n", "process_query").await,
            ProbeOutcome::SyntaxError(_)
        ));
        assert!(matches!(
            runner.probe("raise RuntimeError('x')\n", "process_query").await,
            ProbeOutcome::LoadError(_)
        ));
    }

    #[tokio::test]
    async fn test_python_cases() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let runner = runner();

        let sorted = runner.run_case(CORE, "process_query", &json!("sort 5 3 1")).await.unwrap();
        assert_eq!(sorted.outcome, CaseOutcome::Returned(json!([1, 3, 5])));

        let hello = runner.run_case(CORE, "process_query", &json!("hello")).await.unwrap();
        assert_eq!(hello.outcome, CaseOutcome::Returned(json!("Hello! How can I help?")));

        let boom = runner.run_case(CORE, "process_query", &json!("boom")).await.unwrap();
        assert!(matches!(boom.outcome, CaseOutcome::Raised(ref m) if m.contains("ValueError")));
    }

    #[tokio::test]
    async fn test_python_case_timeout() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let runner = PythonRunner::new("python3", Duration::from_millis(500), 1024);
        let source = "import time\n\ndef process_query(q):\n    time.sleep(30)\n";

        let run = runner.run_case(source, "process_query", &json!("x")).await.unwrap();
        assert_eq!(run.outcome, CaseOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_python_output_is_bounded() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let runner = PythonRunner::new("python3", Duration::from_secs(5), 1024);

        let big_result = "def process_query(q):\n    return 'x' * 100000\n";
        let run = runner.run_case(big_result, "process_query", &json!("x")).await.unwrap();
        assert!(matches!(run.outcome, CaseOutcome::Crashed(ref m) if m.contains("exceeded")));

        let noisy = "import sys\n\ndef process_query(q):\n    sys.stderr.write('e' * 100000)\n    return 1\n";
        let run = runner.run_case(noisy, "process_query", &json!("x")).await.unwrap();
        assert!(matches!(run.outcome, CaseOutcome::Crashed(ref m) if m.contains("exceeded")));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let runner = PythonRunner::new("mend-no-such-python", Duration::from_secs(1), 1024);
        assert!(matches!(
            runner.probe(CORE, "process_query").await,
            ProbeOutcome::Unavailable(_)
        ));
        assert!(runner.run_case(CORE, "process_query", &json!("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_runner() {
        let cases = vec![mend_core::TestCase::new("hello", "hi")];
        let runner = ScriptedRunner::echoing(&cases, 0.1);

        assert_eq!(runner.probe("src", "f").await, ProbeOutcome::Ready);
        assert_eq!(runner.probed_sources(), vec!["src"]);

        let run = runner.run_case("src", "f", &json!("hello")).await.unwrap();
        assert_eq!(run.outcome, CaseOutcome::Returned(json!("hi")));
        assert!(runner.run_case("src", "f", &json!("other")).await.is_err());
    }
}
