//! Database schema discovery and caching.
//!
//! The catalog is table-agnostic: at startup it inspects the configured
//! main table, follows its foreign keys to find the navigation tables, and
//! harvests the metadata key catalog. The result is frozen into a
//! [`SchemaCache`] that every SQL-emitting component reads for the lifetime
//! of the process (a refresh endpoint may rebuild and swap it).

mod queries;

use crate::error::{Error, Result};
use indexmap::IndexMap;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// A column of the main table.
#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub ordinal: i32,
}

impl ColumnInfo {
    /// Whether this column holds text that a free-text search can match.
    pub fn is_textual(&self) -> bool {
        let dt = self.data_type.to_lowercase();
        dt.contains("text") || dt.contains("char")
    }

    /// Whether this column holds a timestamp.
    pub fn is_timestamp(&self) -> bool {
        self.data_type.to_lowercase().contains("timestamp")
    }
}

/// A navigation (lookup) table referenced by the main table.
#[derive(Clone, Debug)]
pub struct NavigationTable {
    pub table_name: String,
    pub primary_key: String,
    pub name_column: String,
    pub columns: BTreeSet<String>,
}

/// The frozen schema-analysis record.
///
/// `navigation` is keyed by entity key (the main-table foreign-key column
/// stripped of its `_id` suffix) and iterates in main-table column-ordinal
/// order; that order is what makes alias assignment deterministic.
#[derive(Clone, Debug)]
pub struct SchemaCache {
    pub main_table: String,
    pub main_primary_key: String,
    pub main_columns: Vec<ColumnInfo>,
    pub navigation: IndexMap<String, NavigationTable>,
    pub metadata_keys: BTreeSet<String>,
    pub metadata_nested: BTreeSet<String>,
}

impl SchemaCache {
    /// Inspect the database and build the schema-analysis record.
    ///
    /// Fails fatally when the main table does not exist. A failure while
    /// harvesting metadata keys only disables metadata auto-detection.
    pub async fn load(pool: &PgPool, main_table: &str) -> Result<Self> {
        if !datacat_sql::is_valid_identifier(main_table) {
            return Err(Error::Configuration(format!(
                "main table name {:?} is not a valid identifier",
                main_table
            )));
        }

        let tables = queries::load_tables(pool).await?;
        let foreign_keys = queries::load_foreign_keys(pool).await?;

        let main = tables.get(main_table).ok_or_else(|| {
            Error::Configuration(format!("main table {:?} not found in schema", main_table))
        })?;

        let main_primary_key = main
            .primary_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", singularize(main_table)));

        // Navigation tables are the targets of foreign keys leaving the
        // main table, ordered by the referencing column's ordinal.
        let mut edges: Vec<&queries::ForeignKey> = foreign_keys
            .iter()
            .filter(|fk| fk.table_name == main_table)
            .collect();
        edges.sort_by_key(|fk| {
            main.columns
                .iter()
                .find(|c| c.name == fk.column_name)
                .map(|c| c.ordinal)
                .unwrap_or(i32::MAX)
        });

        let mut navigation = IndexMap::new();
        for fk in edges {
            let entity_key = fk
                .column_name
                .strip_suffix("_id")
                .unwrap_or(&fk.column_name)
                .to_string();

            let Some(info) = tables.get(&fk.referenced_table) else {
                warn!(
                    table = %fk.referenced_table,
                    "foreign key points at a table the inspector did not see"
                );
                continue;
            };

            let primary_key = info
                .primary_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", singularize(&fk.referenced_table)));

            let name_column = pick_name_column(&info.columns);

            navigation.insert(
                entity_key,
                NavigationTable {
                    table_name: fk.referenced_table.clone(),
                    primary_key,
                    name_column,
                    columns: info.columns.iter().map(|c| c.name.clone()).collect(),
                },
            );
        }

        let (metadata_keys, metadata_nested) =
            match queries::load_metadata_keys(pool, main_table).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "metadata key harvest failed; auto-detection disabled");
                    (BTreeSet::new(), BTreeSet::new())
                }
            };

        info!(
            main_table,
            navigation = navigation.len(),
            metadata_keys = metadata_keys.len(),
            metadata_nested = metadata_nested.len(),
            "schema analysis complete"
        );

        Ok(Self {
            main_table: main_table.to_string(),
            main_primary_key,
            main_columns: main.columns.clone(),
            navigation,
            metadata_keys,
            metadata_nested,
        })
    }

    /// Navigation entity keys in main-table column order.
    pub fn navigation_order(&self) -> impl Iterator<Item = &str> {
        self.navigation.keys().map(String::as_str)
    }

    /// Look up a main-table column by name.
    pub fn main_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.main_columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is a timestamp column of the main table.
    pub fn is_timestamp_column(&self, name: &str) -> bool {
        self.main_column(name).is_some_and(ColumnInfo::is_timestamp)
    }

    /// Whether a dotted field path names a harvested metadata key, either
    /// top-level (`energy`) or one level nested (`params.beam`).
    pub fn is_metadata_field(&self, parts: &[String]) -> bool {
        match parts {
            [] => false,
            [single] => self.metadata_keys.contains(single),
            _ => {
                self.metadata_keys.contains(&parts[0])
                    || self.metadata_nested.contains(&parts.join("."))
            }
        }
    }

    /// The main-table foreign-key column for a navigation entity key.
    pub fn foreign_key_column(&self, entity_key: &str) -> String {
        format!("{}_id", entity_key)
    }
}

/// Pick the column carrying an entity's display name: `name` when present,
/// otherwise the first textual column by ordinal.
fn pick_name_column(columns: &[ColumnInfo]) -> String {
    if columns.iter().any(|c| c.name == "name") {
        return "name".to_string();
    }
    columns
        .iter()
        .find(|c| c.is_textual())
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "name".to_string())
}

/// Plural table name to singular, for conventional `<singular>_id` keys.
pub fn singularize(s: &str) -> String {
    if let Some(stem) = s.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    if let Some(stem) = s.strip_suffix("es") {
        // "stages" -> "stage", "boxes" -> "box", but keep "classes" -> "class"
        if stem.ends_with('x') || stem.ends_with("ch") || stem.ends_with("sh") {
            return stem.to_string();
        }
    }
    if s.ends_with('s') && !s.ends_with("ss") {
        return s[..s.len() - 1].to_string();
    }
    s.to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Hand-built schema fixtures for the pure layers' tests.

    use super::*;

    fn col(name: &str, data_type: &str, ordinal: i32) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            is_primary_key: name == "dataset_id",
            ordinal,
        }
    }

    fn nav(table_name: &str, primary_key: &str, extra: &[&str]) -> NavigationTable {
        let mut columns: BTreeSet<String> = [primary_key, "name", "description"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        columns.extend(extra.iter().map(|s| s.to_string()));
        NavigationTable {
            table_name: table_name.to_string(),
            primary_key: primary_key.to_string(),
            name_column: "name".to_string(),
            columns,
        }
    }

    /// A datasets table joined to accelerators, stages, campaigns, and
    /// detectors, with a couple of harvested metadata keys.
    pub(crate) fn sample_cache() -> SchemaCache {
        let mut navigation = IndexMap::new();
        navigation.insert(
            "accelerator".to_string(),
            nav("accelerators", "accelerator_id", &[]),
        );
        navigation.insert("stage".to_string(), nav("stages", "stage_id", &[]));
        navigation.insert("campaign".to_string(), nav("campaigns", "campaign_id", &[]));
        navigation.insert(
            "detector".to_string(),
            nav("detectors", "detector_id", &["accelerator_id"]),
        );

        SchemaCache {
            main_table: "datasets".to_string(),
            main_primary_key: "dataset_id".to_string(),
            main_columns: vec![
                col("dataset_id", "integer", 1),
                col("name", "text", 2),
                col("accelerator_id", "integer", 3),
                col("stage_id", "integer", 4),
                col("campaign_id", "integer", 5),
                col("detector_id", "integer", 6),
                col("metadata", "jsonb", 7),
                col("created_at", "timestamp without time zone", 8),
                col("last_edited_at", "timestamp without time zone", 9),
            ],
            navigation,
            metadata_keys: ["energy", "status", "cross-section", "params"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            metadata_nested: ["params.beam"].iter().map(|s| s.to_string()).collect(),
        }
    }
}
