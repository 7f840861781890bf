//! Inference invoker: one external solver process per query.
//!
//! The solver keeps no state between calls, so every invocation ships the
//! whole knowledge base plus a driver clause:
//!
//! ```text
//! <knowledge base, one statement per line>
//! logic_mcp_driver :-
//!     (   (<goal>) ->
//!         write('SUCCESS: true')
//!     ;   write('SUCCESS: false')
//!     ),
//!     nl,
//!     halt.
//! ```
//!
//! The program is written to a uniquely named temp file that is removed when
//! the invocation returns, whichever way it returns.

use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::context::QueryContext;
use super::syntax;

/// Predicate name of the synthesized driver clause.
pub const DRIVER: &str = "logic_mcp_driver";

pub const SUCCESS_MARKER: &str = "SUCCESS: true";
pub const FAILURE_MARKER: &str = "SUCCESS: false";

/// How often a running solver is checked for exit, deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(rename = "output")]
    pub raw_output: String,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(rename = "execution_time_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl QueryOutcome {
    /// Goal could not be proven, or the solver could not run.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            raw_output: String::new(),
            error_detail: Some(detail.into()),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Failure caused by the invocation rather than by the goal being unprovable.
    pub fn is_execution_failure(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// Why the solver process could not deliver a result.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start solver: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("solver I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("query timed out")]
    TimedOut,
    #[error("query cancelled")]
    Cancelled,
}

/// What came back from a completed solver process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverRun {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

/// Runs a program file through a solver. The seam between the engine and the
/// outside world.
pub trait SolverBackend: Send + Sync {
    /// Execute `program`, calling `driver` as the entry goal. Must terminate
    /// the solver and return promptly once `ctx` expires or is cancelled.
    fn run(&self, program: &Path, driver: &str, ctx: &QueryContext)
        -> Result<SolverRun, InvokeError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// SWI-Prolog in batch mode: `swipl -q -g <driver> -t halt <program>`.
#[derive(Debug, Clone)]
pub struct SwiplBackend {
    binary: PathBuf,
}

impl SwiplBackend {
    /// Resolve `binary` on PATH (or as a path).
    pub fn locate(binary: &str) -> Result<Self, which::Error> {
        let binary = which::which(binary)?;
        Ok(Self { binary })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl SolverBackend for SwiplBackend {
    fn run(
        &self,
        program: &Path,
        driver: &str,
        ctx: &QueryContext,
    ) -> Result<SolverRun, InvokeError> {
        let mut child = Command::new(&self.binary)
            .args(["-q", "-g", driver, "-t", "halt"])
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(InvokeError::Spawn)?;

        // Drain both pipes concurrently so a chatty solver never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(InvokeError::Io(e));
                }
            }
            if ctx.is_cancelled() {
                terminate(&mut child);
                return Err(InvokeError::Cancelled);
            }
            if ctx.is_expired() {
                terminate(&mut child);
                return Err(InvokeError::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut output = stdout.map(collect).unwrap_or_default();
        output.push_str(&stderr.map(collect).unwrap_or_default());

        Ok(SolverRun {
            exit_code: status.code(),
            output,
        })
    }

    fn describe(&self) -> String {
        self.binary.display().to_string()
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Assemble the full program text for `goal` against `knowledge`.
///
/// `goal` is terminator-normalized first; the terminator is then stripped so
/// the goal can sit inside the driver's if-then-else.
pub fn build_program(knowledge: &str, goal: &str) -> String {
    let goal = syntax::terminate(goal);
    let goal = goal.strip_suffix(syntax::TERMINATOR).unwrap_or(&goal);
    format!(
        "{knowledge}\n{DRIVER} :-\n    (   ({goal}) ->\n        write('{SUCCESS_MARKER}')\n    ;   write('{FAILURE_MARKER}')\n    ),\n    nl,\n    halt.\n"
    )
}

/// Read the solver's verdict from its output. The marker may follow text the
/// goal printed on the same line; the last marker wins.
pub fn parse_verdict(output: &str) -> Option<bool> {
    match (output.rfind(SUCCESS_MARKER), output.rfind(FAILURE_MARKER)) {
        (Some(proven), Some(unproven)) => Some(proven > unproven),
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        (None, None) => None,
    }
}

/// Turns a goal plus knowledge base into a [`QueryOutcome`].
#[derive(Clone)]
pub struct Invoker {
    backend: Arc<dyn SolverBackend>,
}

impl Invoker {
    pub fn new(backend: Arc<dyn SolverBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn SolverBackend {
        self.backend.as_ref()
    }

    /// Invoke the solver exactly once. Never returns an error: every failure
    /// becomes an unsuccessful outcome with `error_detail` set.
    pub fn invoke(
        &self,
        scratch: &Path,
        knowledge: &str,
        goal: &str,
        ctx: &QueryContext,
    ) -> QueryOutcome {
        let start = Instant::now();
        let program = build_program(knowledge, goal);

        // Removed when `file` drops, on every path out of this function
        let file = match write_program(scratch, &program) {
            Ok(file) => file,
            Err(e) => {
                return QueryOutcome::failed(format!("failed to write program file: {}", e))
                    .with_elapsed(start.elapsed())
            }
        };

        tracing::debug!(
            program = %file.path().display(),
            solver = %self.backend.describe(),
            "invoking solver"
        );
        let result = self.backend.run(file.path(), DRIVER, ctx);
        drop(file);

        classify(result).with_elapsed(start.elapsed())
    }
}

fn write_program(scratch: &Path, program: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("query_")
        .suffix(".pl")
        .tempfile_in(scratch)?;
    file.write_all(program.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn classify(result: Result<SolverRun, InvokeError>) -> QueryOutcome {
    let run = match result {
        Ok(run) => run,
        Err(e) => return QueryOutcome::failed(e.to_string()),
    };

    if run.exit_code != Some(0) {
        let status = match run.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        return QueryOutcome {
            succeeded: false,
            raw_output: run.output,
            error_detail: Some(format!("execution failed: {}", status)),
            elapsed: Duration::ZERO,
        };
    }

    match parse_verdict(&run.output) {
        Some(succeeded) => QueryOutcome {
            succeeded,
            raw_output: run.output,
            error_detail: None,
            elapsed: Duration::ZERO,
        },
        None => QueryOutcome {
            succeeded: false,
            raw_output: run.output,
            error_detail: Some("solver produced no result marker".to_string()),
            elapsed: Duration::ZERO,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Replays a fixed result and records the program it was given.
    struct Canned {
        result: Mutex<Option<Result<SolverRun, InvokeError>>>,
        seen: Mutex<Option<(PathBuf, String)>>,
    }

    impl Canned {
        fn new(result: Result<SolverRun, InvokeError>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                seen: Mutex::new(None),
            })
        }
    }

    impl SolverBackend for Canned {
        fn run(&self, program: &Path, _: &str, _: &QueryContext) -> Result<SolverRun, InvokeError> {
            let text = std::fs::read_to_string(program).map_err(InvokeError::Io)?;
            *self.seen.lock() = Some((program.to_path_buf(), text));
            self.result.lock().take().unwrap_or(Err(InvokeError::Cancelled))
        }

        fn describe(&self) -> String {
            "canned".to_string()
        }
    }

    fn ok(code: i32, output: &str) -> Result<SolverRun, InvokeError> {
        Ok(SolverRun {
            exit_code: Some(code),
            output: output.to_string(),
        })
    }

    #[test]
    fn test_build_program_wraps_goal() {
        let program = build_program("animal(cat).\n", "animal(cat)");
        assert!(program.starts_with("animal(cat).\n"));
        assert!(program.contains("(   (animal(cat)) ->"));
        assert!(program.contains("logic_mcp_driver :-"));
        assert!(program.trim_end().ends_with("halt."));

        // Already-terminated goals are not double-terminated
        let program = build_program("", "animal(cat).");
        assert!(program.contains("(animal(cat))"));
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(parse_verdict("SUCCESS: true\n"), Some(true));
        assert_eq!(parse_verdict("hello\nSUCCESS: false\n"), Some(false));
        assert_eq!(parse_verdict("SUCCESS: false\nSUCCESS: true"), Some(true));
        assert_eq!(parse_verdict("Warning: something\n"), None);
    }

    #[test]
    fn test_marker_after_goal_output() {
        // `member(X, [1,2,3]), write(X).` leaves no newline before the marker
        assert_eq!(parse_verdict("1SUCCESS: true\n"), Some(true));
        assert_eq!(parse_verdict("[a,b]SUCCESS: false"), Some(false));

        let outcome = classify(ok(0, "1SUCCESS: true\n"));
        assert!(outcome.succeeded);
        assert_eq!(outcome.error_detail, None);
        assert_eq!(outcome.raw_output, "1SUCCESS: true\n");
    }

    #[test]
    fn test_invoke_success_and_cleanup() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = Canned::new(ok(0, "SUCCESS: true\n"));
        let invoker = Invoker::new(backend.clone());

        let outcome = invoker.invoke(dir.path(), "a(1).\n", "a(1).", &QueryContext::background());
        assert!(outcome.succeeded);
        assert_eq!(outcome.error_detail, None);
        assert_eq!(outcome.raw_output, "SUCCESS: true\n");

        let (path, text) = backend.seen.lock().clone().unwrap();
        assert!(text.starts_with("a(1).\n"));
        assert!(!path.exists(), "program file must be removed after the call");
    }

    #[test]
    fn test_invoke_goal_not_proven() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = Invoker::new(Canned::new(ok(0, "SUCCESS: false\n")));
        let outcome = invoker.invoke(dir.path(), "", "fail.", &QueryContext::background());
        assert!(!outcome.succeeded);
        assert!(!outcome.is_execution_failure());
    }

    #[test]
    fn test_invoke_nonzero_exit_keeps_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = Invoker::new(Canned::new(ok(1, "Warning: goal raised exception\n")));
        let outcome = invoker.invoke(dir.path(), "", "nope(1).", &QueryContext::background());
        assert!(!outcome.succeeded);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("execution failed: exit status 1")
        );
        assert!(outcome.raw_output.contains("exception"));
    }

    #[test]
    fn test_invoke_missing_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = Invoker::new(Canned::new(ok(0, "")));
        let outcome = invoker.invoke(dir.path(), "", "true.", &QueryContext::background());
        assert!(!outcome.succeeded);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("solver produced no result marker")
        );
    }

    #[test]
    fn test_invoke_error_becomes_outcome() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = Invoker::new(Canned::new(Err(InvokeError::TimedOut)));
        let outcome = invoker.invoke(dir.path(), "", "true.", &QueryContext::background());
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error_detail.as_deref(), Some("query timed out"));
    }

    #[test]
    fn test_invoke_unwritable_scratch() {
        let invoker = Invoker::new(Canned::new(ok(0, "SUCCESS: true")));
        let outcome = invoker.invoke(
            Path::new("/nonexistent/logic-mcp-scratch"),
            "",
            "true.",
            &QueryContext::background(),
        );
        assert!(!outcome.succeeded);
        assert!(outcome
            .error_detail
            .unwrap()
            .starts_with("failed to write program file"));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = QueryOutcome {
            succeeded: true,
            raw_output: "SUCCESS: true\n".to_string(),
            error_detail: None,
            elapsed: Duration::from_millis(42),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["execution_time_ms"], 42);
        assert!(json.get("error").is_none());
    }
}
