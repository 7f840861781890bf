//! Ordered, append-only store of normalized facts and rules.

use super::syntax;

/// Line comment marker.
const COMMENT: char = '%';

/// Statements in load order. Order matters: the store is concatenated
/// verbatim into every generated program.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    statements: Vec<String>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every non-blank, non-comment line of `text`, terminator-normalized.
    ///
    /// Never rejects malformed Prolog; a bad statement only surfaces when a
    /// later query runs against it. Returns the number of statements added.
    pub fn load(&mut self, text: &str) -> usize {
        let before = self.statements.len();
        self.statements.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with(COMMENT))
                .map(syntax::terminate),
        );
        self.statements.len() - before
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    /// Copy of the current statements.
    pub fn snapshot(&self) -> Vec<String> {
        self.statements.clone()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Program text: one statement per line, trailing newline when non-empty.
    pub fn render(&self) -> String {
        let mut program = self.statements.join("\n");
        if !program.is_empty() {
            program.push('\n');
        }
        program
    }
}
