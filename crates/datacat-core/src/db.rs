//! Connection pool, schema bootstrap, and row decoding.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use datacat_sql::SqlParam;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgPool, Postgres, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

/// Cross-process advisory lock id guarding DDL application. Every replica
/// uses the same constant, so only one applies the schema.
pub const SCHEMA_ADVISORY_LOCK_ID: i64 = 727_445_210;

/// Bundled DDL. The `jsonb_values_to_text` function it installs doubles as
/// the applied-schema sentinel.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Build the connection pool from configuration.
pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min)
        .max_connections(config.pool_max)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.dsn())
        .await
        .map_err(|e| Error::ConnectionPool(e.to_string()))?;
    info!(
        min = config.pool_min,
        max = config.pool_max,
        "database connection pool ready"
    );
    Ok(pool)
}

/// Apply the bundled DDL exactly once across all replicas.
///
/// Takes the advisory lock, probes for the sentinel function, applies the
/// DDL in a transaction if absent, and releases the lock on every path.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| Error::ConnectionPool(e.to_string()))?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_ADVISORY_LOCK_ID)
        .execute(&mut *conn)
        .await?;

    let outcome = apply_schema_if_missing(&mut conn).await;

    let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_ADVISORY_LOCK_ID)
        .execute(&mut *conn)
        .await;

    outcome?;
    unlock?;
    Ok(())
}

async fn apply_schema_if_missing(
    conn: &mut sqlx::pool::PoolConnection<Postgres>,
) -> Result<()> {
    let applied: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM pg_proc p
            JOIN pg_namespace n ON p.pronamespace = n.oid
            WHERE n.nspname = 'public'
              AND p.proname = 'jsonb_values_to_text'
        )
        "#,
    )
    .fetch_one(&mut **conn)
    .await?;

    if applied {
        info!("application schema already present, skipping DDL");
        return Ok(());
    }

    info!("application schema not found, applying DDL (this replica won the race)");
    let mut tx = conn.begin().await?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("schema application failed: {}", e)))?;
    tx.commit().await?;
    info!("database schema applied");
    Ok(())
}

/// Bind a parameter list to a query in placeholder order.
pub fn bind_params<'q>(sql: &'q str, params: &'q [SqlParam]) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(Option::<String>::None),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(n) => query.bind(*n),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.as_str()),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Timestamp(t) => query.bind(*t),
            SqlParam::IntArray(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Log a parameter list at debug level without dumping whole documents.
pub fn log_params(params: &[SqlParam]) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        let rendered: Vec<String> = params.iter().map(SqlParam::display_for_log).collect();
        debug!(params = ?rendered, "bound parameters");
    }
}

/// Decode an id from the first column of a row, tolerating both `serial`
/// and `bigserial` primary keys.
pub(crate) fn id_from_row(row: &PgRow) -> Result<i64> {
    row.try_get::<i64, _>(0)
        .or_else(|_| row.try_get::<i32, _>(0).map(i64::from))
        .map_err(|e| Error::Database(e.to_string()))
}

/// Decode a dynamically shaped row into a JSON object, column by column.
///
/// The schema is discovered at runtime, so rows cannot map onto static
/// structs; every column is converted by its reported type.
pub fn row_to_json(row: &PgRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();

    for column in row.columns() {
        let name = column.name();
        let type_name = column.type_info().name();

        let value = match type_name {
            "INT2" | "SMALLINT" => row
                .try_get::<i16, _>(name)
                .ok()
                .map(|v| serde_json::Value::Number(v.into())),
            "INT4" | "INT" | "INTEGER" => row
                .try_get::<i32, _>(name)
                .ok()
                .map(|v| serde_json::Value::Number(v.into())),
            "INT8" | "BIGINT" => row
                .try_get::<i64, _>(name)
                .ok()
                .map(|v| serde_json::Value::Number(v.into())),
            "FLOAT4" | "REAL" => row
                .try_get::<f32, _>(name)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number),
            "FLOAT8" | "DOUBLE PRECISION" => row
                .try_get::<f64, _>(name)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number),
            "NUMERIC" | "DECIMAL" => row
                .try_get::<sqlx::types::BigDecimal, _>(name)
                .ok()
                .map(|v| serde_json::Value::String(v.to_string())),
            "BOOL" | "BOOLEAN" => row
                .try_get::<bool, _>(name)
                .ok()
                .map(serde_json::Value::Bool),
            "JSON" | "JSONB" => row.try_get::<serde_json::Value, _>(name).ok(),
            "UUID" => row
                .try_get::<sqlx::types::Uuid, _>(name)
                .ok()
                .map(|v| serde_json::Value::String(v.to_string())),
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(name)
                .ok()
                .map(|v| serde_json::Value::String(v.to_rfc3339())),
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => row
                .try_get::<chrono::NaiveDateTime, _>(name)
                .ok()
                .map(|v| serde_json::Value::String(v.to_string())),
            "DATE" => row
                .try_get::<chrono::NaiveDate, _>(name)
                .ok()
                .map(|v| serde_json::Value::String(v.to_string())),
            _ => row
                .try_get::<String, _>(name)
                .ok()
                .map(serde_json::Value::String),
        };

        map.insert(name.to_string(), value.unwrap_or(serde_json::Value::Null));
    }

    serde_json::Value::Object(map)
}

/// Force the `metadata` key of a result row into an object: a serialized
/// string is parsed, anything unusable becomes the empty object. Rows
/// handed to callers never carry metadata as a string.
pub fn normalize_metadata(item: &mut serde_json::Value) {
    let Some(map) = item.as_object_mut() else {
        return;
    };

    let normalized = match map.get("metadata") {
        Some(serde_json::Value::Object(obj)) => serde_json::Value::Object(obj.clone()),
        Some(serde_json::Value::String(raw)) => serde_json::from_str(raw)
            .ok()
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({})),
        _ => serde_json::json!({}),
    };
    map.insert("metadata".to_string(), normalized);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_normalize_metadata_parses_serialized_form() {
        let mut item = json!({"name": "zh", "metadata": "{\"energy\": 240}"});
        normalize_metadata(&mut item);
        assert_eq!(item["metadata"], json!({"energy": 240}));
    }

    #[test]
    fn test_normalize_metadata_defaults_to_empty_object() {
        let mut item = json!({"name": "zh", "metadata": null});
        normalize_metadata(&mut item);
        assert_eq!(item["metadata"], json!({}));

        let mut item = json!({"name": "zh", "metadata": "not json"});
        normalize_metadata(&mut item);
        assert_eq!(item["metadata"], json!({}));

        let mut item = json!({"name": "zh"});
        normalize_metadata(&mut item);
        assert_eq!(item["metadata"], json!({}));
    }

    #[test]
    fn test_normalize_metadata_keeps_objects() {
        let mut item = json!({"metadata": {"status": "done"}});
        normalize_metadata(&mut item);
        assert_eq!(item["metadata"], json!({"status": "done"}));
    }
}
