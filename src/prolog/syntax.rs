//! Static syntax checks run before text reaches the solver.
//!
//! Only structure is checked: terminator and delimiter balance. Unknown
//! predicates, arity mismatches and the like are the solver's business and
//! show up later as execution failures.

use thiserror::Error;

/// Clause terminator expected at the end of every statement and goal.
pub const TERMINATOR: char = '.';

/// Why a piece of Prolog text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("empty query")]
    EmptyInput,
    #[error("query must end with a period")]
    MissingTerminator,
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("unbalanced brackets")]
    UnbalancedBrackets,
}

/// Validate query text. Rules are checked in order; the first failure wins.
pub fn validate(text: &str) -> Result<(), SyntaxError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyntaxError::EmptyInput);
    }
    if !text.ends_with(TERMINATOR) {
        return Err(SyntaxError::MissingTerminator);
    }
    if !balanced(text, '(', ')') {
        return Err(SyntaxError::UnbalancedParens);
    }
    if !balanced(text, '[', ']') {
        return Err(SyntaxError::UnbalancedBrackets);
    }
    Ok(())
}

/// Trim and append the terminator if it is missing. Idempotent.
pub fn terminate(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(TERMINATOR) {
        text.to_string()
    } else {
        format!("{}{}", text, TERMINATOR)
    }
}

/// Nesting must never go negative and must end at zero.
fn balanced(text: &str, open: char, close: char) -> bool {
    let mut depth: i64 = 0;
    for ch in text.chars() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}
