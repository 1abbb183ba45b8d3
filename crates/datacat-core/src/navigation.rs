//! Navigation dropdowns and generic filtered search.

use crate::db::{bind_params, id_from_row, normalize_metadata, row_to_json};
use crate::error::{Error, Result};
use crate::plan::JoinPlan;
use crate::schema_cache::SchemaCache;
use crate::search::SearchResult;
use datacat_sql::{SqlFragment, SqlParam};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;

/// One option in a navigation dropdown.
#[derive(Debug, Serialize)]
pub struct DropdownItem {
    pub id: i64,
    pub name: String,
}

/// Options for a navigation dropdown, restricted to values that actually
/// occur on main rows and further narrowed by already-selected dimensions.
///
/// Filter keys ending in `_name` are resolved to ids first; a name that
/// resolves to nothing yields an empty option list rather than an error.
/// Keys ending in `_id` are bound directly. Anything else is ignored.
pub async fn dropdown_items(
    pool: &PgPool,
    schema: &SchemaCache,
    entity_key: &str,
    filters: &HashMap<String, String>,
) -> Result<Vec<DropdownItem>> {
    let table = schema
        .navigation
        .get(entity_key)
        .ok_or_else(|| Error::NotFound(format!("navigation table {:?}", entity_key)))?;

    let mut conditions: Vec<SqlFragment> = Vec::new();

    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();

    for key in keys {
        let value = &filters[key];

        if let Some(other_key) = key.strip_suffix("_name") {
            let Some(other) = schema.navigation.get(other_key) else {
                continue;
            };
            let lookup_sql = format!(
                "SELECT {} FROM {} WHERE {} ILIKE $1",
                other.primary_key, other.table_name, other.name_column
            );
            let row = sqlx::query(&lookup_sql)
                .bind(value)
                .fetch_optional(pool)
                .await?;
            match row {
                Some(row) => {
                    let mut condition = SqlFragment::raw(format!("d.{}_id = ", other_key));
                    condition.push_param(SqlParam::Int(id_from_row(&row)?));
                    conditions.push(condition);
                }
                // The selected name does not exist: nothing can match.
                None => return Ok(vec![]),
            }
        } else if key.strip_suffix("_id").is_some() {
            if schema.main_column(key).is_none() {
                continue;
            }
            let id: i64 = value.parse().map_err(|_| {
                Error::Validation(format!("filter {:?} expects a numeric id", key))
            })?;
            let mut condition = SqlFragment::raw(format!("d.{} = ", key));
            condition.push_param(SqlParam::Int(id));
            conditions.push(condition);
        }
    }

    let mut query = SqlFragment::raw(format!(
        "SELECT DISTINCT t.{} AS id, t.{} AS name FROM {} t \
         INNER JOIN {} d ON d.{}_id = t.{}",
        table.primary_key,
        table.name_column,
        table.table_name,
        schema.main_table,
        entity_key,
        table.primary_key
    ));
    if !conditions.is_empty() {
        query.push(" WHERE ");
        query.append(SqlFragment::join(" AND ", conditions));
    }
    query.push(&format!(" ORDER BY t.{}", table.name_column));

    let (sql, params) = query.build();
    debug!(%sql, "dropdown query");

    let rows = bind_params(&sql, &params).fetch_all(pool).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(DropdownItem {
            id: id_from_row(row)?,
            name: row.try_get("name")?,
        });
    }
    Ok(items)
}

/// Filter + free-text search across the full navigation join graph.
///
/// `_name` filters AND together as exact matches on the joined name
/// columns; the free-text term ORs a substring match across every textual
/// column of the main table, all sharing one parameter.
pub async fn generic_search(
    pool: &PgPool,
    schema: &SchemaCache,
    plan: &JoinPlan,
    filters: &HashMap<String, String>,
    search: &str,
    page: i64,
    limit: i64,
) -> Result<SearchResult> {
    let limit = limit.clamp(1, 1000);
    let offset = (page.max(1) - 1) * limit;

    let mut conditions: Vec<SqlFragment> = Vec::new();

    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();

    for key in keys {
        let Some(entity_key) = key.strip_suffix("_name") else {
            continue;
        };
        let Some(name_column) = plan.aliased_name_column(entity_key, schema) else {
            continue;
        };
        let mut condition = SqlFragment::raw(format!("{} = ", name_column));
        condition.push_param(SqlParam::text(filters[key].clone()));
        conditions.push(condition);
    }

    let search = search.trim();
    if !search.is_empty() {
        let textual: Vec<&str> = schema
            .main_columns
            .iter()
            .filter(|c| c.is_textual())
            .map(|c| c.name.as_str())
            .collect();
        if !textual.is_empty() {
            let mut condition = SqlFragment::new();
            condition.push("(");
            for (i, column) in textual.iter().enumerate() {
                if i > 0 {
                    condition.push(" OR ");
                }
                condition.push(&format!("d.{} ILIKE ", column));
                if i == 0 {
                    condition.push_param(SqlParam::Text(format!("%{}%", search)));
                } else {
                    // Every column shares the first occurrence's parameter.
                    condition.push(&format!("${}", condition.param_count()));
                }
            }
            condition.push(")");
            conditions.push(condition);
        }
    }

    let where_frag = SqlFragment::join(" AND ", conditions);

    let mut count = SqlFragment::raw(format!("SELECT COUNT(*) {}", plan.from_and_joins));
    let mut select = SqlFragment::raw(format!(
        "SELECT {} {}",
        plan.select_fields, plan.from_and_joins
    ));
    if !where_frag.is_empty() {
        count.push(" WHERE ");
        count.append(where_frag.clone());
        select.push(" WHERE ");
        select.append(where_frag);
    }
    select.push(&format!(" ORDER BY d.{} DESC", schema.main_primary_key));
    select.push(" LIMIT ");
    select.push_param(SqlParam::Int(limit));
    select.push(" OFFSET ");
    select.push_param(SqlParam::Int(offset));

    let (count_sql, count_params) = count.build();
    let (select_sql, select_params) = select.build();
    debug!(%count_sql, %select_sql, "generic search");

    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| Error::ConnectionPool(e.to_string()))?;

    let total: i64 = bind_params(&count_sql, &count_params)
        .fetch_one(&mut *conn)
        .await?
        .try_get(0)
        .map_err(|e| Error::SearchExecution(e.to_string()))?;

    let rows = bind_params(&select_sql, &select_params)
        .fetch_all(&mut *conn)
        .await?;

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
