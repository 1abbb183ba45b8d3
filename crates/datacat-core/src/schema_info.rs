//! Frontend-facing schema description and the sortable-field catalog.

use crate::config::AppConfig;
use crate::schema_cache::SchemaCache;
use serde_json::{json, Value};

/// Navigation keys in display order: the configured override first (with
/// unknown keys dropped and missing ones appended), alphabetical otherwise.
pub fn navigation_display_order(schema: &SchemaCache, config_order: &[String]) -> Vec<String> {
    if config_order.is_empty() {
        let mut keys: Vec<String> = schema.navigation.keys().cloned().collect();
        keys.sort();
        return keys;
    }

    let mut ordered: Vec<String> = config_order
        .iter()
        .filter(|key| schema.navigation.contains_key(*key))
        .cloned()
        .collect();
    for key in schema.navigation.keys() {
        if !ordered.contains(key) {
            ordered.push(key.clone());
        }
    }
    ordered
}

/// The schema document the frontend renders itself from.
pub fn build_schema_payload(schema: &SchemaCache, config: &AppConfig) -> Value {
    let order = navigation_display_order(schema, &config.navigation_order);

    let menu: Value = order
        .iter()
        .enumerate()
        .map(|(index, key)| {
            (
                key.clone(),
                json!({
                    "columnName": schema.foreign_key_column(key),
                    "orderIndex": index,
                }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    let navigation_tables: Value = schema
        .navigation
        .iter()
        .map(|(key, table)| {
            (
                key.clone(),
                json!({
                    "table_name": table.table_name,
                    "primary_key": table.primary_key,
                    "name_column": table.name_column,
                    "columns": table.columns.iter().collect::<Vec<_>>(),
                }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    let mut tables = vec![schema.main_table.clone()];
    tables.extend(schema.navigation.keys().cloned());

    json!({
        "tables": tables,
        "main_table": schema.main_table,
        "foreign_keys": schema
            .navigation
            .keys()
            .map(|key| schema.foreign_key_column(key))
            .collect::<Vec<_>>(),
        "navigation_config": {
            "order": order,
            "menu": menu,
        },
        "mainTableSchema": {
            "tableName": schema.main_table,
            "primaryKey": schema.main_primary_key,
            "nameColumn": "name",
            "columns": schema
                .main_columns
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>(),
        },
        "navigationTables": navigation_tables,
        "navigationOrder": order,
        "navigation": menu,
        "appTitle": config.app_title,
        "searchPlaceholder": config
            .search_placeholder
            .clone()
            .unwrap_or_else(|| format!("Search {}...", schema.main_table)),
    })
}

/// Every field a caller may sort by: plain main columns (foreign keys and
/// the metadata document excluded), joined `<entity>_name` fields, and the
/// harvested metadata keys, flat and nested.
pub fn sorting_fields(schema: &SchemaCache) -> Vec<String> {
    let foreign_keys: Vec<String> = schema
        .navigation
        .keys()
        .map(|key| schema.foreign_key_column(key))
        .collect();

    let mut fields: Vec<String> = schema
        .main_columns
        .iter()
        .filter(|c| c.name != "metadata" && !foreign_keys.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();

    fields.extend(schema.navigation.keys().map(|key| format!("{}_name", key)));
    fields.extend(schema.metadata_keys.iter().cloned());
    fields.extend(schema.metadata_nested.iter().cloned());

    fields.sort();
    fields
}

/// Response body for the sort-field endpoint.
pub fn sorting_fields_payload(schema: &SchemaCache) -> Value {
    let fields = sorting_fields(schema);
    json!({
        "fields": fields,
        "count": fields.len(),
        "info": "All available fields for sorting. Metadata fields can be used \
                 with or without the 'metadata.' prefix.",
    })
}
