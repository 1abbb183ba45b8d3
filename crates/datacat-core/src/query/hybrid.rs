//! Hybrid query rescue.
//!
//! Users mix valid field predicates with free text they mean as a search
//! phrase; a hard syntax error on the whole line is user-hostile. When the
//! strict parse fails, the raw input is split on `AND`, every part that
//! parses becomes a regular clause, and the leftovers are joined back into
//! one similarity-search term. This is designed behavior, not an error
//! path: any input yields SQL.

use super::parser::parse_query;
use super::translate::{build_search_conditions, SqlTranslator};
use crate::plan::JoinPlan;
use crate::schema_cache::SchemaCache;
use datacat_sql::SqlParam;
use tracing::debug;

/// Build a WHERE clause for input the strict grammar rejected.
pub fn hybrid_where(
    schema: &SchemaCache,
    plan: &JoinPlan,
    raw: &str,
) -> (String, Vec<SqlParam>) {
    let mut translator = SqlTranslator::new(schema, plan);
    let mut clauses: Vec<String> = Vec::new();
    let mut residue: Vec<&str> = Vec::new();

    for part in split_on_and(raw) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let checkpoint = translator.params_len();
        match parse_query(part).and_then(|ast| translator.translate(&ast)) {
            Ok(clause) => {
                debug!(part, %clause, "hybrid rescue parsed part");
                clauses.push(clause);
            }
            Err(_) => {
                translator.truncate_params(checkpoint);
                debug!(part, "hybrid rescue routing part to similarity search");
                residue.push(part);
            }
        }
    }

    let mut params = translator.take_params();

    if !residue.is_empty() {
        let phrase = residue.join(" ");
        let quoted = contains_quoted_span(raw);
        let placeholder = format!("${}", params.len() + 1);
        let clause = build_search_conditions(&placeholder, quoted, &plan.global_search_fields);
        if clause != "TRUE" {
            params.push(SqlParam::text(phrase));
            clauses.push(clause);
        }
    }

    let where_clause = if clauses.is_empty() {
        "TRUE".to_string()
    } else {
        format!("({})", clauses.join(" AND "))
    };

    debug!(%where_clause, params = params.len(), "hybrid rescue complete");
    (where_clause, params)
}

/// Split on `AND` (any case) with whitespace on both sides, preserving the
/// original spacing inside each part.
fn split_on_and(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = raw.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i + 3 <= raw.len() {
        if raw.is_char_boundary(i)
            && raw.is_char_boundary(i + 3)
            && raw[i..i + 3].eq_ignore_ascii_case("and")
        {
            let before_ws = i > 0 && bytes[i - 1].is_ascii_whitespace();
            let after_ws = i + 3 < raw.len() && bytes[i + 3].is_ascii_whitespace();
            if before_ws && after_ws {
                parts.push(&raw[start..i]);
                start = i + 3;
                i = start;
                continue;
            }
        }
        i += 1;
    }

    parts.push(&raw[start..]);
    parts
}

/// Whether the input contains a quoted span with at least one character.
/// Residue quotedness follows the original input, not the residue itself.
fn contains_quoted_span(raw: &str) -> bool {
    let mut open: Option<usize> = None;
    for (i, c) in raw.char_indices() {
        if c == '"' || c == '\'' {
            match open {
                None => open = Some(i),
                Some(start) => {
                    if i > start + 1 {
                        return true;
                    }
                    open = None;
                }
            }
        }
    }
    false
}
