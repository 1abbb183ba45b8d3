//! Ingestion of vendor JSON dictionaries.
//!
//! A document of shape `{"processes": [record, ...]}` is decoded, each
//! record's navigation entities are resolved (or created) from its `path`,
//! and the main row is upserted with a lock-aware metadata merge. The whole
//! batch runs in one transaction; each record gets a savepoint so a single
//! bad record cannot poison the rest, and a majority of failures rolls the
//! batch back.

use crate::db::{bind_params, id_from_row};
use datacat_sql::SqlParam;
use crate::error::{is_unique_violation, Error, Result};
use crate::metadata::merge_respecting_locks;
use crate::schema_cache::{NavigationTable, SchemaCache};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Acquire, PgConnection, PgPool};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

type JsonMap = Map<String, Value>;

/// Renames attempted before a name collision becomes a hard conflict.
const MAX_RENAME_ATTEMPTS: u32 = 10;

#[derive(Debug, Deserialize)]
struct RecordCollection {
    processes: Vec<JsonMap>,
}

/// Outcome of a batch import.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub failed: usize,
}

/// Navigation names carved out of a record's `path` attribute.
///
/// Segment positions are project convention: 4 is the accelerator, 6 the
/// stage (with a literal `Events` suffix dropped), 7 the campaign, 8 the
/// detector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathEntities {
    pub accelerator: Option<String>,
    pub stage: Option<String>,
    pub campaign: Option<String>,
    pub detector: Option<String>,
}

/// Import a `{"processes": [...]}` document.
pub async fn import_records(
    pool: &PgPool,
    schema: &SchemaCache,
    json_content: &[u8],
) -> Result<IngestReport> {
    let collection: RecordCollection = serde_json::from_slice(json_content)
        .map_err(|e| Error::Validation(format!("invalid import document: {}", e)))?;

    let mut tx = pool.begin().await?;
    let mut processed = 0usize;
    let mut failed = 0usize;

    for (idx, record) in collection.processes.iter().enumerate() {
        let mut savepoint = tx.begin().await?;
        match ingest_record(&mut savepoint, schema, record, idx).await {
            Ok(name) => {
                savepoint.commit().await?;
                processed += 1;
                debug!(%name, "record ingested");
            }
            Err(e) => {
                savepoint.rollback().await?;
                failed += 1;
                warn!(index = idx, error = %e, "record failed to ingest");
            }
        }
    }

    let total = processed + failed;
    if total > 0 && failed * 2 > total {
        tx.rollback().await?;
        return Err(Error::BatchImport { total, failed });
    }

    tx.commit().await?;
    if failed > 0 {
        warn!(processed, failed, "import committed with failures");
    } else {
        info!(processed, "import committed");
    }
    Ok(IngestReport { processed, failed })
}

async fn ingest_record(
    conn: &mut PgConnection,
    schema: &SchemaCache,
    record: &JsonMap,
    idx: usize,
) -> Result<String> {
    let name = record_name(record, idx);

    let entities = record
        .get("path")
        .and_then(Value::as_str)
        .map(parse_path_entities)
        .unwrap_or_default();

    let navigation_ids = resolve_navigation_ids(conn, schema, &entities).await?;
    let metadata = record_metadata(record);

    upsert_main_row(conn, schema, &name, metadata, &navigation_ids).await
}

/// The record's `process-name`, or a synthesized unique fallback.
fn record_name(record: &JsonMap, idx: usize) -> String {
    if let Some(name) = record.get("process-name").and_then(Value::as_str) {
        if !name.trim().is_empty() {
            return name.to_string();
        }
    }
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let tag = Uuid::new_v4().simple().to_string();
    let name = format!("unnamed_{}_{}_{}", timestamp, &tag[..8], idx);
    warn!(index = idx, %name, "record has no process-name; using fallback");
    name
}

/// Everything in the record that is not one of the known attributes
/// becomes metadata.
fn record_metadata(record: &JsonMap) -> JsonMap {
    let mut metadata = record.clone();
    metadata.remove("process-name");
    metadata.remove("path");
    metadata
}

/// Split a path into navigation entity names by segment position. Missing
/// positions stay `None`; the row is still ingested with NULL references.
pub fn parse_path_entities(path: &str) -> PathEntities {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    let pick = |i: usize| -> Option<String> {
        segments
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let stage = pick(6).and_then(|s| {
        let stripped = s.strip_suffix("Events").unwrap_or(&s).to_string();
        (!stripped.is_empty()).then_some(stripped)
    });

    PathEntities {
        accelerator: pick(4),
        stage,
        campaign: pick(7),
        detector: pick(8),
    }
}

/// Resolve each named navigation entity to an id, creating rows on first
/// reference. Only dimensions the discovered schema actually has are
/// touched. Detectors carry the resolved accelerator id when their table
/// has that column.
async fn resolve_navigation_ids(
    conn: &mut PgConnection,
    schema: &SchemaCache,
    entities: &PathEntities,
) -> Result<HashMap<String, i64>> {
    let mut ids = HashMap::new();

    let dimensions: [(&str, &Option<String>); 4] = [
        ("accelerator", &entities.accelerator),
        ("stage", &entities.stage),
        ("campaign", &entities.campaign),
        ("detector", &entities.detector),
    ];

    for (entity_key, name) in dimensions {
        let (Some(table), Some(name)) = (schema.navigation.get(entity_key), name) else {
            continue;
        };

        let extra = if entity_key == "detector" && table.columns.contains("accelerator_id") {
            ids.get("accelerator").map(|id| ("accelerator_id", *id))
        } else {
            None
        };

        let id = get_or_create_entity(conn, table, name, extra).await?;
        ids.insert(entity_key.to_string(), id);
    }

    Ok(ids)
}

/// `SELECT` by case-insensitive name, `INSERT ... RETURNING` when absent.
/// A unique violation means a concurrent ingest won the race; re-select
/// and take its id.
async fn get_or_create_entity(
    conn: &mut PgConnection,
    table: &NavigationTable,
    name: &str,
    extra: Option<(&str, i64)>,
) -> Result<i64> {
    let select_sql = format!(
        "SELECT {} FROM {} WHERE {} ILIKE $1",
        table.primary_key, table.table_name, table.name_column
    );

    if let Some(row) = sqlx::query(&select_sql)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
    {
        return id_from_row(&row);
    }

    let insert_sql = match extra {
        Some((column, _)) => format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) RETURNING {}",
            table.table_name, table.name_column, column, table.primary_key
        ),
        None => format!(
            "INSERT INTO {} ({}) VALUES ($1) RETURNING {}",
            table.table_name, table.name_column, table.primary_key
        ),
    };

    // The insert gets its own savepoint: a unique violation must not abort
    // the surrounding record transaction before the re-select.
    let insert_outcome = {
        let mut savepoint = conn.begin().await?;
        let mut query = sqlx::query(&insert_sql).bind(name);
        if let Some((_, id)) = extra {
            query = query.bind(id);
        }
        match query.fetch_one(&mut *savepoint).await {
            Ok(row) => {
                savepoint.commit().await?;
                Ok(row)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e)
            }
        }
    };

    match insert_outcome {
        Ok(row) => {
            debug!(table = %table.table_name, name, "navigation entity created");
            id_from_row(&row)
        }
        Err(e) if is_unique_violation(&e) => {
            let row = sqlx::query(&select_sql)
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| {
                    Error::Conflict(format!(
                        "could not create or find {} entry {:?}",
                        table.table_name, name
                    ))
                })?;
            id_from_row(&row)
        }
        Err(e) => Err(e.into()),
    }
}

/// Upsert the main row: lock-aware metadata merge, `ON CONFLICT (name)`
/// update, and suffix-based renaming for collisions the conflict target
/// does not cover.
async fn upsert_main_row(
    conn: &mut PgConnection,
    schema: &SchemaCache,
    name: &str,
    metadata: JsonMap,
    navigation_ids: &HashMap<String, i64>,
) -> Result<String> {
    let existing_sql = format!(
        "SELECT metadata FROM {} WHERE name ILIKE $1",
        schema.main_table
    );
    let existing: Option<Value> = sqlx::query_scalar(&existing_sql)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    let merged = match existing.as_ref().and_then(Value::as_object) {
        Some(current) => merge_respecting_locks(current, &metadata),
        None => metadata,
    };

    let mut columns: Vec<String> = vec!["name".to_string()];
    let mut params: Vec<SqlParam> = vec![name.into()];

    for entity_key in schema.navigation.keys() {
        let column = schema.foreign_key_column(entity_key);
        if schema.main_column(&column).is_none() {
            continue;
        }
        params.push(match navigation_ids.get(entity_key) {
            Some(id) => SqlParam::Int(*id),
            None => SqlParam::Null,
        });
        columns.push(column);
    }

    columns.push("metadata".to_string());
    params.push(SqlParam::Json(Value::Object(merged)));

    let upsert_sql = build_upsert_sql(&schema.main_table, &columns);

    let mut final_name = name.to_string();
    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        params[0] = SqlParam::Text(final_name.clone());

        let outcome = {
            let mut savepoint = conn.begin().await?;
            match bind_params(&upsert_sql, &params)
                .execute(&mut *savepoint)
                .await
            {
                Ok(done) => {
                    savepoint.commit().await?;
                    Ok(done)
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(_) => return Ok(final_name),
            Err(e) if is_unique_violation(&e) && attempt < MAX_RENAME_ATTEMPTS => {
                final_name = format!("{}_conflict_{}", name, attempt + 1);
                warn!(name, %final_name, "name collision, retrying with suffix");
            }
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::Conflict(format!(
                    "too many name conflicts for {:?}",
                    name
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    unreachable!("rename loop always returns")
}

fn build_upsert_sql(main_table: &str, columns: &[String]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let mut updates: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != "name")
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    updates.push("last_edited_at = NOW()".to_string());

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (name) DO UPDATE SET {}",
        main_table,
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}
