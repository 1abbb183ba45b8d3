//! Search execution: ORDER BY synthesis, COUNT + SELECT, row flattening.

use crate::db::{bind_params, log_params, normalize_metadata, row_to_json};
use crate::error::{Error, Result};
use crate::plan::JoinPlan;
use crate::query::translate::resolve_sort_field;
use crate::query::{hybrid_where, parse_query, SqlTranslator};
use crate::schema_cache::SchemaCache;
use datacat_sql::SqlParam;
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::{debug, error};

pub const MIN_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_LIMIT: i64 = 25;

/// Sort direction, validated before any database work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(Error::Validation(
                "sort_order must be 'asc' or 'desc'".into(),
            )),
        }
    }
}

/// A paged search over the main table.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub query: String,
    pub limit: i64,
    pub offset: i64,
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            sort_by: "last_edited_at".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub total: i64,
    pub items: Vec<serde_json::Value>,
}

/// Run the COUNT/SELECT pair for a search request.
///
/// Both statements run sequentially on one acquired connection; they share
/// the parameter list, and running them in parallel would double pool
/// pressure for no gain. The connection is released on every exit path.
pub async fn run_search(
    pool: &PgPool,
    schema: &SchemaCache,
    plan: &JoinPlan,
    request: &SearchRequest,
) -> Result<SearchResult> {
    let order_by = build_order_by(schema, plan, &request.sort_by, request.sort_order)?;
    let limit = request.limit.clamp(MIN_LIMIT, MAX_LIMIT);
    let offset = request.offset.max(0);

    let trimmed = request.query.trim();
    let (where_clause, params) = if trimmed.is_empty() {
        (None, Vec::new())
    } else {
        let (clause, params) = build_where(schema, plan, trimmed);
        (Some(clause), params)
    };

    let (count_sql, select_sql) =
        compose_queries(schema, plan, where_clause.as_deref(), &order_by, params.len());

    debug!(%count_sql, %select_sql, "executing search");
    log_params(&params);

    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| Error::ConnectionPool(e.to_string()))?;

    // Count first, then the page.
    let total: i64 = bind_params(&count_sql, &params)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            error!(error = %e, "count query failed");
            Error::SearchExecution("the search could not be executed".into())
        })?
        .try_get(0)
        .map_err(|e| Error::SearchExecution(e.to_string()))?;

    let mut select_params = params;
    select_params.push(SqlParam::Int(limit));
    select_params.push(SqlParam::Int(offset));

    let rows = bind_params(&select_sql, &select_params)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            error!(error = %e, "select query failed");
            Error::SearchExecution("the search could not be executed".into())
        })?;

    let items = rows
        .iter()
        .map(|row| {
            let mut item = row_to_json(row);
            normalize_metadata(&mut item);
            item
        })
        .collect();

    Ok(SearchResult { total, items })
}

/// Produce the WHERE clause for a non-empty query string: the strict
/// grammar when it accepts, the hybrid rescue otherwise.
fn build_where(schema: &SchemaCache, plan: &JoinPlan, query: &str) -> (String, Vec<SqlParam>) {
    match parse_query(query) {
        Ok(ast) => {
            let mut translator = SqlTranslator::new(schema, plan);
            match translator.translate(&ast) {
                Ok(clause) => (clause, translator.take_params()),
                Err(e) => {
                    debug!(error = %e, "translation failed, falling back to hybrid rescue");
                    hybrid_where(schema, plan, query)
                }
            }
        }
        Err(e) => {
            debug!(error = %e, "strict parse failed, using hybrid rescue");
            hybrid_where(schema, plan, query)
        }
    }
}

/// ORDER BY with the primary-key tiebreaker that makes pagination a
/// partition: without it, ties on the sort column can repeat or drop rows
/// across pages.
fn build_order_by(
    schema: &SchemaCache,
    plan: &JoinPlan,
    sort_by: &str,
    order: SortOrder,
) -> Result<String> {
    let field_sql = resolve_sort_field(schema, plan, sort_by)?;
    Ok(format!(
        "ORDER BY {} {}, d.{} {}",
        field_sql,
        order.as_sql(),
        schema.main_primary_key,
        order.as_sql()
    ))
}

/// Assemble the COUNT and SELECT statements. An empty query counts the bare
/// main table, the cheapest possible path.
fn compose_queries(
    schema: &SchemaCache,
    plan: &JoinPlan,
    where_clause: Option<&str>,
    order_by: &str,
    param_count: usize,
) -> (String, String) {
    match where_clause {
        None => (
            format!("SELECT COUNT(*) FROM {}", schema.main_table),
            format!(
                "SELECT {} {} {} LIMIT $1 OFFSET $2",
                plan.select_fields, plan.from_and_joins, order_by
            ),
        ),
        Some(clause) => (
            format!(
                "SELECT COUNT(*) {} WHERE {}",
                plan.from_and_joins, clause
            ),
            format!(
                "SELECT {} {} WHERE {} {} LIMIT ${} OFFSET ${}",
                plan.select_fields,
                plan.from_and_joins,
                clause,
                order_by,
                param_count + 1,
                param_count + 2
            ),
        ),
    }
}
