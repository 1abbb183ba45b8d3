//! Entity fetch, update, and delete over the main table.

use crate::db::{bind_params, normalize_metadata, row_to_json};
use crate::error::{is_foreign_key_violation, is_unique_violation, Error, Result};
use crate::metadata::merge_respecting_locks;
use crate::plan::JoinPlan;
use crate::schema_cache::SchemaCache;
use datacat_sql::{SqlFragment, SqlParam};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{debug, info};

type JsonMap = Map<String, Value>;

/// Fetch rows by id with navigation names joined in and metadata keys
/// flattened to the top level. Column values win over metadata keys on
/// name conflicts.
pub async fn get_entities_by_ids(
    pool: &PgPool,
    schema: &SchemaCache,
    plan: &JoinPlan,
    ids: &[i64],
) -> Result<Vec<Value>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {} {} WHERE d.{} = ANY($1) ORDER BY d.{}",
        plan.select_fields, plan.from_and_joins, schema.main_primary_key, schema.main_primary_key
    );
    let params = [SqlParam::IntArray(ids.to_vec())];

    let rows = bind_params(&sql, &params).fetch_all(pool).await?;

    let items = rows
        .iter()
        .map(|row| {
            let mut item = row_to_json(row);
            normalize_metadata(&mut item);
            flatten_metadata(&mut item);
            item
        })
        .collect();

    Ok(items)
}

/// Fetch a single row by id.
pub async fn get_entity_by_id(
    pool: &PgPool,
    schema: &SchemaCache,
    plan: &JoinPlan,
    id: i64,
) -> Result<Value> {
    get_entities_by_ids(pool, schema, plan, &[id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("entity {} not found", id)))
}

/// Copy metadata keys to the record's top level without clobbering real
/// columns.
fn flatten_metadata(item: &mut Value) {
    let Some(map) = item.as_object_mut() else {
        return;
    };
    let Some(Value::Object(metadata)) = map.get("metadata").cloned() else {
        return;
    };
    for (key, value) in metadata {
        map.entry(key).or_insert(value);
    }
}

/// Full-replacement update of whitelisted columns. Metadata updates go
/// through the same lock-aware merge as ingestion; `last_edited_at` is
/// always bumped.
pub async fn update_entity(
    pool: &PgPool,
    schema: &SchemaCache,
    plan: &JoinPlan,
    id: i64,
    update: &JsonMap,
) -> Result<Value> {
    let pk = &schema.main_primary_key;

    {
        let mut tx = pool.begin().await?;

        let exists_sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            pk, schema.main_table, pk
        );
        let exists = sqlx::query(&exists_sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("entity {} not found", id)));
        }

        let mut query = SqlFragment::raw(format!(
            "UPDATE {} SET last_edited_at = NOW()",
            schema.main_table
        ));

        for (field, value) in update {
            if should_skip_field(schema, field, value) {
                continue;
            }

            let param = if field == "metadata" && value.is_object() {
                let current = current_metadata(&mut tx, schema, id).await?;
                let incoming = value.as_object().expect("checked above");
                SqlParam::Json(Value::Object(merge_respecting_locks(&current, incoming)))
            } else {
                value_to_param(value)
            };

            query.push(&format!(", {} = ", field));
            query.push_param(param);
        }

        query.push(&format!(" WHERE {} = ", pk));
        query.push_param(SqlParam::Int(id));

        let (update_sql, params) = query.build();
        debug!(%update_sql, "updating entity");
        bind_params(&update_sql, &params)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict("an entity with this name already exists".into())
                } else if is_foreign_key_violation(&e) {
                    Error::Conflict("update references a missing related entity".into())
                } else {
                    e.into()
                }
            })?;

        tx.commit().await?;
    }

    get_entity_by_id(pool, schema, plan, id).await
}

/// Columns the update path refuses to touch: anything outside the table,
/// the primary key, the managed timestamps, and a null name.
fn should_skip_field(schema: &SchemaCache, field: &str, value: &Value) -> bool {
    if schema.main_column(field).is_none() {
        return true;
    }
    if field == schema.main_primary_key || field == "created_at" || field == "last_edited_at" {
        return true;
    }
    field == "name" && value.is_null()
}

async fn current_metadata(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    schema: &SchemaCache,
    id: i64,
) -> Result<JsonMap> {
    let sql = format!(
        "SELECT metadata FROM {} WHERE {} = $1",
        schema.main_table, schema.main_primary_key
    );
    let value: Option<Value> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(value
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default())
}

fn value_to_param(value: &Value) -> SqlParam {
    match value {
        Value::Null => SqlParam::Null,
        Value::Bool(b) => SqlParam::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlParam::Int(i)
            } else {
                SqlParam::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlParam::Text(s.clone()),
        other => SqlParam::Json(other.clone()),
    }
}

/// Outcome of a bulk delete.
#[derive(Debug, Serialize)]
pub struct DeleteReport {
    pub deleted_count: u64,
    pub not_found_count: usize,
    pub deleted_ids: Vec<i64>,
    pub not_found_ids: Vec<i64>,
}

/// Delete rows by id. Rows referenced by other records make the whole
/// operation refuse with a conflict; deletes never cascade.
pub async fn delete_entities(
    pool: &PgPool,
    schema: &SchemaCache,
    ids: &[i64],
) -> Result<DeleteReport> {
    if ids.is_empty() {
        return Ok(DeleteReport {
            deleted_count: 0,
            not_found_count: 0,
            deleted_ids: vec![],
            not_found_ids: vec![],
        });
    }

    let pk = &schema.main_primary_key;
    let mut tx = pool.begin().await?;

    let check_sql = format!(
        "SELECT {} FROM {} WHERE {} = ANY($1)",
        pk, schema.main_table, pk
    );
    let params = [SqlParam::IntArray(ids.to_vec())];
    let existing_rows = bind_params(&check_sql, &params).fetch_all(&mut *tx).await?;

    let mut existing: Vec<i64> = existing_rows
        .iter()
        .map(crate::db::id_from_row)
        .collect::<Result<_>>()?;
    existing.sort_unstable();

    let not_found: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| existing.binary_search(id).is_err())
        .collect();

    if existing.is_empty() {
        return Ok(DeleteReport {
            deleted_count: 0,
            not_found_count: not_found.len(),
            deleted_ids: vec![],
            not_found_ids: not_found,
        });
    }

    let delete_sql = format!("DELETE FROM {} WHERE {} = ANY($1)", schema.main_table, pk);
    let delete_params = [SqlParam::IntArray(existing.clone())];
    let done = bind_params(&delete_sql, &delete_params)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::Conflict(
                    "entities are referenced by other records and cannot be deleted".into(),
                )
            } else {
                e.into()
            }
        })?;

    tx.commit().await?;
    info!(deleted = done.rows_affected(), "entities deleted");

    Ok(DeleteReport {
        deleted_count: done.rows_affected(),
        not_found_count: not_found.len(),
        deleted_ids: existing,
        not_found_ids: not_found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_cache::testing::sample_cache;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_flatten_metadata_existing_columns_win() {
        let mut item = json!({
            "name": "zh",
            "metadata": {"name": "shadow", "energy": 240}
        });
        flatten_metadata(&mut item);
        assert_eq!(item["name"], json!("zh"));
        assert_eq!(item["energy"], json!(240));
    }

    #[test]
    fn test_should_skip_field() {
        let schema = sample_cache();
        assert!(should_skip_field(&schema, "dataset_id", &json!(1)));
        assert!(should_skip_field(&schema, "created_at", &json!("x")));
        assert!(should_skip_field(&schema, "last_edited_at", &json!("x")));
        assert!(should_skip_field(&schema, "not_a_column", &json!("x")));
        assert!(should_skip_field(&schema, "name", &Value::Null));

        assert!(!should_skip_field(&schema, "name", &json!("new name")));
        assert!(!should_skip_field(&schema, "metadata", &json!({})));
        assert!(!should_skip_field(&schema, "detector_id", &json!(3)));
    }

    #[test]
    fn test_value_to_param() {
        assert_eq!(value_to_param(&json!(5)), SqlParam::Int(5));
        assert_eq!(value_to_param(&json!(2.5)), SqlParam::Float(2.5));
        assert_eq!(value_to_param(&json!("x")), SqlParam::text("x"));
        assert_eq!(value_to_param(&Value::Null), SqlParam::Null);
        assert!(matches!(
            value_to_param(&json!({"a": 1})),
            SqlParam::Json(_)
        ));
    }
}
