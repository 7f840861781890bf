//! Session engine: one knowledge base, one gate, one solver invoker.
//!
//! `query`, `load_facts` and `clear_knowledge_base` go through a FIFO gate,
//! so at most one solver process runs per engine and a query always sees the
//! knowledge base either entirely before or entirely after a concurrent load.
//! `validate_query` and `close` do not touch the gate.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use thiserror::Error;

use super::context::QueryContext;
use super::gate::Gate;
use super::invoker::{Invoker, QueryOutcome, SolverBackend, SwiplBackend};
use super::knowledge::KnowledgeBase;
use super::syntax::{self, SyntaxError};
use crate::config::SolverConfig;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is closed")]
    EngineClosed,
    #[error("SWI-Prolog not found ({binary}): {source}")]
    SolverNotFound {
        binary: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to create scratch directory: {0}")]
    Workspace(#[source] std::io::Error),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

pub struct SessionEngine {
    invoker: Invoker,
    knowledge: Mutex<KnowledgeBase>,
    gate: Gate,
    closed: AtomicBool,
    /// Holds program files. In-flight queries keep their own handle, so the
    /// directory outlives `close()` until they finish.
    scratch: Mutex<Option<Arc<TempDir>>>,
}

impl SessionEngine {
    /// Engine backed by the configured SWI-Prolog binary.
    ///
    /// Fails if the binary cannot be found; that is the only fatal condition
    /// at construction time.
    pub fn new(config: &SolverConfig) -> Result<Self, EngineError> {
        let backend =
            SwiplBackend::locate(&config.binary).map_err(|source| EngineError::SolverNotFound {
                binary: config.binary.clone(),
                source,
            })?;
        Self::with_backend(Arc::new(backend), config.temp_dir.as_deref())
    }

    /// Engine over any solver backend. Program files go to a fresh directory
    /// under `temp_dir`, or under the OS temp dir.
    pub fn with_backend(
        backend: Arc<dyn SolverBackend>,
        temp_dir: Option<&Path>,
    ) -> Result<Self, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("logic_mcp_");
        let scratch = match temp_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(EngineError::Workspace)?;

        tracing::debug!(
            scratch = %scratch.path().display(),
            solver = %backend.describe(),
            "session engine created"
        );

        Ok(Self {
            invoker: Invoker::new(backend),
            knowledge: Mutex::new(KnowledgeBase::new()),
            gate: Gate::new(),
            closed: AtomicBool::new(false),
            scratch: Mutex::new(Some(Arc::new(scratch))),
        })
    }

    /// Run a goal against the current knowledge base.
    ///
    /// Empty input is an unsuccessful outcome, not an error. The only error
    /// is [`EngineError::EngineClosed`].
    pub fn query(&self, ctx: &QueryContext, text: &str) -> Result<QueryOutcome, EngineError> {
        let start = Instant::now();
        self.ensure_open()?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(QueryOutcome::failed("Empty query provided").with_elapsed(start.elapsed()));
        }
        let goal = syntax::terminate(text);

        let _pass = self.gate.enter();
        // Closed while we were queued
        self.ensure_open()?;
        let scratch = self.scratch.lock().clone().ok_or(EngineError::EngineClosed)?;
        let program = self.knowledge.lock().render();

        let outcome = self
            .invoker
            .invoke(scratch.path(), &program, &goal, ctx)
            .with_elapsed(start.elapsed());

        tracing::debug!(
            goal = %goal,
            succeeded = outcome.succeeded,
            error = outcome.error_detail.as_deref().unwrap_or(""),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "query finished"
        );
        Ok(outcome)
    }

    /// Append facts and rules. Returns how many statements were added.
    pub fn load_facts(&self, text: &str) -> Result<usize, EngineError> {
        self.ensure_open()?;
        let _pass = self.gate.enter();
        self.ensure_open()?;
        let added = self.knowledge.lock().load(text);
        tracing::debug!(added, "facts loaded");
        Ok(added)
    }

    pub fn clear_knowledge_base(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let _pass = self.gate.enter();
        self.ensure_open()?;
        self.knowledge.lock().clear();
        tracing::debug!("knowledge base cleared");
        Ok(())
    }

    /// Static syntax check; never runs the solver.
    pub fn validate_query(&self, text: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        syntax::validate(text)?;
        Ok(())
    }

    /// Current statements, in load order.
    pub fn snapshot(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_open()?;
        Ok(self.knowledge.lock().snapshot())
    }

    /// Idempotent. In-flight operations finish; later ones see `EngineClosed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping our handle removes the scratch directory once no query holds it
        self.scratch.lock().take();
        tracing::debug!("session engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::EngineClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolog::invoker::{InvokeError, SolverRun};

    /// Succeeds when the goal is literally one of the loaded facts.
    struct FactLookup;

    impl SolverBackend for FactLookup {
        fn run(&self, program: &Path, _: &str, _: &QueryContext) -> Result<SolverRun, InvokeError> {
            let text = std::fs::read_to_string(program).map_err(InvokeError::Io)?;
            let (facts, driver) = text.split_once("logic_mcp_driver :-").unwrap_or((&text, ""));
            let goal = driver
                .split_once("(   (")
                .and_then(|(_, rest)| rest.split_once(") ->"))
                .map(|(goal, _)| format!("{}.", goal))
                .unwrap_or_default();
            let proven = facts.lines().any(|line| line == goal);
            Ok(SolverRun {
                exit_code: Some(0),
                output: format!("SUCCESS: {}\n", proven),
            })
        }

        fn describe(&self) -> String {
            "fact-lookup".to_string()
        }
    }

    fn engine() -> SessionEngine {
        SessionEngine::with_backend(Arc::new(FactLookup), None).unwrap()
    }

    #[test]
    fn test_query_against_loaded_facts() {
        let engine = engine();
        engine.load_facts("animal(cat).\nanimal(dog)").unwrap();

        let ctx = QueryContext::background();
        assert!(engine.query(&ctx, "animal(dog)").unwrap().succeeded);

        let outcome = engine.query(&ctx, "animal(bird).").unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error_detail, None);
    }

    #[test]
    fn test_empty_query_is_an_outcome() {
        let engine = engine();
        let outcome = engine.query(&QueryContext::background(), "   ").unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error_detail.as_deref(), Some("Empty query provided"));
    }

    #[test]
    fn test_closed_engine_rejects_everything() {
        let engine = engine();
        engine.load_facts("a(1).").unwrap();
        engine.close();
        engine.close();

        let ctx = QueryContext::background();
        assert!(matches!(engine.query(&ctx, "a(1)."), Err(EngineError::EngineClosed)));
        assert!(matches!(engine.load_facts("b(1)."), Err(EngineError::EngineClosed)));
        assert!(matches!(engine.clear_knowledge_base(), Err(EngineError::EngineClosed)));
        assert!(matches!(engine.validate_query("a(1)."), Err(EngineError::EngineClosed)));
        assert!(matches!(engine.snapshot(), Err(EngineError::EngineClosed)));
    }

    #[test]
    fn test_close_removes_scratch_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let engine = SessionEngine::with_backend(Arc::new(FactLookup), Some(root.path())).unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);

        engine.query(&QueryContext::background(), "true.").unwrap();
        engine.close();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_validate_query_reports_syntax() {
        let engine = engine();
        assert!(engine.validate_query("member(X, [1,2,3]).").is_ok());
        assert!(matches!(
            engine.validate_query("foo(1,2."),
            Err(EngineError::Syntax(SyntaxError::UnbalancedParens))
        ));
    }

    #[test]
    fn test_clear_then_snapshot_is_empty() {
        let engine = engine();
        engine.load_facts("a(1).\n% note\nb(2)").unwrap();
        assert_eq!(engine.snapshot().unwrap(), vec!["a(1).", "b(2)."]);
        engine.clear_knowledge_base().unwrap();
        assert!(engine.snapshot().unwrap().is_empty());
    }
}
