//! The Prolog tools exposed to protocol callers.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use super::{ToolRegistry, ToolResult};
use crate::prolog::{EngineError, QueryContext, QueryOutcome, SessionEngine};

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct LoadFactsArgs {
    facts: String,
}

#[derive(Deserialize)]
struct ValidateArgs {
    code: String,
}

#[derive(Deserialize)]
struct NoArgs {}

#[derive(Deserialize)]
struct SolveArgs {
    problem_description: String,
    facts_and_rules: String,
    /// Items are checked one by one so a bad entry doesn't sink the rest
    queries: Vec<Value>,
}

#[derive(Deserialize)]
struct ExplainArgs {
    query: String,
    #[serde(default)]
    facts: Option<String>,
}

/// Register the six logic tools, each bound to `engine`.
pub fn register_logic_tools(registry: &mut ToolRegistry, engine: Arc<SessionEngine>) {
    let e = engine.clone();
    registry.register(
        "prolog_query",
        "Execute a Prolog query and return results. Supports both simple queries and complex logic problems.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The Prolog query to execute. Must end with a period. Example: 'member(X, [1,2,3]).'"
                }
            },
            "required": ["query"]
        }),
        move |args: QueryArgs, ctx: &QueryContext| query(&e, args, ctx),
    );

    let e = engine.clone();
    registry.register(
        "prolog_load_facts",
        "Load Prolog facts and rules into the knowledge base. Use this to define rules and facts before querying.",
        json!({
            "type": "object",
            "properties": {
                "facts": {
                    "type": "string",
                    "description": "Prolog facts and rules to load, separated by newlines. Comments start with %. Example: 'parent(tom, bob).\\nparent(bob, pat).'"
                }
            },
            "required": ["facts"]
        }),
        move |args: LoadFactsArgs, _: &QueryContext| load_facts(&e, args),
    );

    let e = engine.clone();
    registry.register(
        "prolog_validate_syntax",
        "Validate Prolog syntax without executing. Use this to check if your Prolog code is syntactically correct.",
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Prolog code to validate syntax for. Can include facts, rules, or queries."
                }
            },
            "required": ["code"]
        }),
        move |args: ValidateArgs, _: &QueryContext| validate_syntax(&e, args),
    );

    let e = engine.clone();
    registry.register(
        "prolog_clear_kb",
        "Clear the Prolog knowledge base. This removes all loaded facts and rules.",
        json!({
            "type": "object",
            "properties": {}
        }),
        move |_: NoArgs, _: &QueryContext| clear_kb(&e),
    );

    let e = engine.clone();
    registry.register(
        "prolog_solve_problem",
        "Solve a complex logic problem by loading facts/rules and then executing queries. This is a high-level tool that combines loading facts and querying.",
        json!({
            "type": "object",
            "properties": {
                "problem_description": {
                    "type": "string",
                    "description": "A description of the logic problem to solve."
                },
                "facts_and_rules": {
                    "type": "string",
                    "description": "Prolog facts and rules that define the problem domain."
                },
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of queries to execute to solve the problem."
                }
            },
            "required": ["problem_description", "facts_and_rules", "queries"]
        }),
        move |args: SolveArgs, ctx: &QueryContext| solve_problem(&e, args, ctx),
    );

    registry.register(
        "prolog_explain_solution",
        "Explain whether a Prolog query succeeds against the knowledge base, optionally loading facts first.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The Prolog query to explain."
                },
                "facts": {
                    "type": "string",
                    "description": "Relevant facts and rules (optional)."
                }
            },
            "required": ["query"]
        }),
        move |args: ExplainArgs, ctx: &QueryContext| explain_solution(&engine, args, ctx),
    );
}

/// Summary lines shared by the query-running tools.
fn describe_outcome(out: &mut String, indent: &str, query: &str, outcome: &QueryOutcome) {
    let _ = writeln!(out, "{}Query: {}", indent, query);
    let _ = writeln!(out, "{}Result: {}", indent, outcome.succeeded);
    let _ = writeln!(out, "{}Execution Time: {:?}", indent, outcome.elapsed);
    if let Some(ref error) = outcome.error_detail {
        let _ = writeln!(out, "{}Error: {}", indent, error);
    }
    if !outcome.raw_output.is_empty() {
        let _ = writeln!(out, "{}Output: {}", indent, outcome.raw_output.trim_end());
    }
}

fn outcome_json(query: &str, outcome: &QueryOutcome) -> Value {
    let mut value = serde_json::to_value(outcome).unwrap_or_else(|_| json!({}));
    if let Value::Object(ref mut map) = value {
        map.insert("query".to_string(), Value::String(query.to_string()));
    }
    value
}

fn query(engine: &SessionEngine, args: QueryArgs, ctx: &QueryContext) -> ToolResult {
    match engine.query(ctx, &args.query) {
        Ok(outcome) => {
            let mut text = String::new();
            describe_outcome(&mut text, "", &args.query, &outcome);
            ToolResult::text(text).with_structured(outcome_json(&args.query, &outcome))
        }
        Err(e) => ToolResult::error(format!("Failed to execute query: {}", e)),
    }
}

fn load_facts(engine: &SessionEngine, args: LoadFactsArgs) -> ToolResult {
    match engine.load_facts(&args.facts) {
        Ok(added) => ToolResult::text(format!(
            "Facts loaded successfully! ({} statement{})",
            added,
            if added == 1 { "" } else { "s" }
        ))
        .with_structured(json!({ "loaded": added })),
        Err(e) => ToolResult::error(format!("Failed to load facts: {}", e)),
    }
}

fn validate_syntax(engine: &SessionEngine, args: ValidateArgs) -> ToolResult {
    match engine.validate_query(&args.code) {
        Ok(()) => ToolResult::text("Syntax is valid!").with_structured(json!({ "valid": true })),
        Err(EngineError::Syntax(reason)) => {
            ToolResult::error(format!("Syntax validation failed: {}", reason))
                .with_structured(json!({ "valid": false, "reason": reason.to_string() }))
        }
        Err(e) => ToolResult::error(format!("Failed to validate syntax: {}", e)),
    }
}

fn clear_kb(engine: &SessionEngine) -> ToolResult {
    match engine.clear_knowledge_base() {
        Ok(()) => ToolResult::text("Knowledge base cleared successfully!"),
        Err(e) => ToolResult::error(format!("Failed to clear knowledge base: {}", e)),
    }
}

/// Clear, load, then run every query. One query failing never stops the rest.
fn solve_problem(engine: &SessionEngine, args: SolveArgs, ctx: &QueryContext) -> ToolResult {
    let mut text = String::new();
    let _ = writeln!(text, "Solving Problem: {}\n", args.problem_description);

    if let Err(e) = engine.clear_knowledge_base() {
        let _ = writeln!(text, "Warning: Failed to clear knowledge base: {}", e);
    }

    text.push_str("Loading facts and rules...\n");
    let loaded = match engine.load_facts(&args.facts_and_rules) {
        Ok(added) => added,
        Err(e) => return ToolResult::error(format!("Failed to load facts and rules: {}", e)),
    };
    let _ = writeln!(text, "Loaded {} statements.\n", loaded);

    text.push_str("Executing queries:\n");
    let mut reports = Vec::with_capacity(args.queries.len());
    for (i, item) in args.queries.iter().enumerate() {
        let n = i + 1;
        let Some(query) = item.as_str() else {
            let _ = writeln!(text, "[FAILED] Query {}: Invalid query type (must be string)", n);
            reports.push(json!({ "index": n, "error": "invalid query type (must be string)" }));
            continue;
        };

        match engine.query(ctx, query) {
            Ok(outcome) => {
                let status = if outcome.succeeded { "[OK]" } else { "[FAILED]" };
                let _ = writeln!(text, "{} Query {}: {}", status, n, query);
                if let Some(ref error) = outcome.error_detail {
                    let _ = writeln!(text, "   Error: {}", error);
                }
                if !outcome.raw_output.is_empty() {
                    let _ = writeln!(text, "   Output: {}", outcome.raw_output.trim_end());
                }
                let mut report = outcome_json(query, &outcome);
                report["index"] = json!(n);
                reports.push(report);
            }
            Err(e) => {
                let _ = writeln!(text, "[FAILED] Query {} ({}): Failed - {}", n, query, e);
                reports.push(json!({ "index": n, "query": query, "error": e.to_string() }));
            }
        }
    }

    ToolResult::text(text).with_structured(json!({
        "problem": args.problem_description,
        "loaded": loaded,
        "queries": reports,
    }))
}

/// Deterministic one-line rationale. It restates the success flag; no proof
/// tree is extracted.
pub(crate) fn rationale(succeeded: bool) -> &'static str {
    if succeeded {
        "The query succeeded: the goal was proven from the loaded facts and rules."
    } else {
        "The query failed: the goal could not be proven from the loaded facts and rules."
    }
}

fn explain_solution(engine: &SessionEngine, args: ExplainArgs, ctx: &QueryContext) -> ToolResult {
    let mut text = String::new();
    let _ = writeln!(text, "Explaining Prolog Solution: {}\n", args.query);

    if let Some(facts) = args.facts.as_deref().filter(|f| !f.trim().is_empty()) {
        match engine.load_facts(facts) {
            Ok(_) => text.push_str("Loaded provided facts and rules\n\n"),
            Err(e) => {
                let _ = writeln!(text, "Warning: Failed to load provided facts: {}", e);
            }
        }
    }

    match engine.query(ctx, &args.query) {
        Ok(outcome) => {
            text.push_str("Query Execution:\n");
            describe_outcome(&mut text, "   ", &args.query, &outcome);
            let explanation = rationale(outcome.succeeded);
            let _ = write!(text, "\nExplanation: {}\n", explanation);

            let mut structured = outcome_json(&args.query, &outcome);
            structured["explanation"] = json!(explanation);
            ToolResult::text(text).with_structured(structured)
        }
        Err(e) => {
            let _ = writeln!(text, "Failed to execute query: {}", e);
            ToolResult::error(text)
        }
    }
}
