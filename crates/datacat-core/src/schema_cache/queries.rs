//! Information-schema queries backing schema discovery.

use super::ColumnInfo;
use crate::error::{Error, Result};
use sqlx::{PgPool, Row};
use std::collections::{BTreeSet, HashMap};

/// Cap on harvested metadata keys, bounding startup cost on large catalogs.
const METADATA_KEY_LIMIT: i64 = 50;

/// A base table with its columns and primary key.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Option<String>,
}

/// A foreign-key edge between two tables.
#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub table_name: String,
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Load every base table in the public namespace with column name, type,
/// nullability, and primary-key flag.
pub async fn load_tables(pool: &PgPool) -> Result<HashMap<String, TableInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT
            t.table_name,
            c.column_name,
            c.data_type,
            c.is_nullable,
            c.ordinal_position,
            pk.column_name IS NOT NULL AS is_primary_key
        FROM information_schema.tables t
        JOIN information_schema.columns c
            ON t.table_name = c.table_name AND t.table_schema = c.table_schema
        LEFT JOIN (
            SELECT tc.table_name, kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = 'public'
        ) pk ON c.table_name = pk.table_name AND c.column_name = pk.column_name
        WHERE t.table_schema = 'public'
          AND t.table_type = 'BASE TABLE'
          AND t.table_name NOT LIKE 'pg\_%'
          AND t.table_name NOT LIKE 'sql\_%'
        ORDER BY t.table_name, c.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| Error::Database(format!("table discovery failed: {}", e)))?;

    let mut tables: HashMap<String, TableInfo> = HashMap::new();

    for row in rows {
        let table_name: String = row.get("table_name");
        let is_nullable: String = row.get("is_nullable");
        let is_primary_key: bool = row.get("is_primary_key");
        let ordinal: i32 = row.get("ordinal_position");

        let column = ColumnInfo {
            name: row.get("column_name"),
            data_type: row.get("data_type"),
            nullable: is_nullable == "YES",
            is_primary_key,
            ordinal,
        };

        let entry = tables.entry(table_name).or_insert_with(|| TableInfo {
            columns: Vec::new(),
            primary_key: None,
        });
        if is_primary_key && entry.primary_key.is_none() {
            entry.primary_key = Some(column.name.clone());
        }
        entry.columns.push(column);
    }

    Ok(tables)
}

/// Load every foreign-key edge in the public namespace.
pub async fn load_foreign_keys(pool: &PgPool) -> Result<Vec<ForeignKey>> {
    let rows = sqlx::query(
        r#"
        SELECT
            tc.table_name,
            kcu.column_name,
            ccu.table_name AS referenced_table,
            ccu.column_name AS referenced_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND tc.table_schema = 'public'
        ORDER BY tc.table_name, kcu.column_name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| Error::Database(format!("foreign key discovery failed: {}", e)))?;

    Ok(rows
        .into_iter()
        .map(|row| ForeignKey {
            table_name: row.get("table_name"),
            column_name: row.get("column_name"),
            referenced_table: row.get("referenced_table"),
            referenced_column: row.get("referenced_column"),
        })
        .collect())
}

/// Harvest metadata keys from the main table: top-level keys plus one level
/// of nesting as `parent.child`, each capped at [`METADATA_KEY_LIMIT`].
///
/// The caller has already verified `main_table` against the identifier
/// whitelist; the name is templated because it is schema-dependent.
pub async fn load_metadata_keys(
    pool: &PgPool,
    main_table: &str,
) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
    let top_level_sql = format!(
        r#"
        SELECT DISTINCT jsonb_object_keys(metadata) AS metadata_key
        FROM {main_table}
        WHERE metadata IS NOT NULL
          AND metadata != 'null'::jsonb
        ORDER BY metadata_key
        LIMIT {METADATA_KEY_LIMIT}
        "#
    );

    let nested_sql = format!(
        r#"
        SELECT DISTINCT parent_key || '.' || child_key AS nested_key
        FROM (
            SELECT parent_key, jsonb_object_keys(parent_value) AS child_key
            FROM (
                SELECT key AS parent_key, value AS parent_value
                FROM {main_table}, jsonb_each(metadata)
                WHERE metadata IS NOT NULL
                  AND metadata != 'null'::jsonb
                  AND jsonb_typeof(value) = 'object'
            ) nested_objects
        ) nested_keys
        ORDER BY nested_key
        LIMIT {METADATA_KEY_LIMIT}
        "#
    );

    let top_rows = sqlx::query(&top_level_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("metadata key harvest failed: {}", e)))?;
    let nested_rows = sqlx::query(&nested_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("nested metadata key harvest failed: {}", e)))?;

    let keys = top_rows
        .iter()
        .map(|r| r.get::<String, _>("metadata_key"))
        .collect();
    let nested = nested_rows
        .iter()
        .map(|r| r.get::<String, _>("nested_key"))
        .collect();

    Ok((keys, nested))
}
