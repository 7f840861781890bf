//! Prolog session layer over an external, stateless solver.
//!
//! The solver (SWI-Prolog) remembers nothing between calls. Sessions are
//! built on top: a [`SessionEngine`] keeps the knowledge base as text and
//! ships all of it with every query.

pub mod context;
pub mod engine;
mod gate;
pub mod invoker;
pub mod knowledge;
pub mod syntax;

pub use context::{CancelToken, QueryContext};
pub use engine::{EngineError, SessionEngine};
pub use invoker::{InvokeError, QueryOutcome, SolverBackend, SolverRun, SwiplBackend};
pub use knowledge::KnowledgeBase;
pub use syntax::SyntaxError;
