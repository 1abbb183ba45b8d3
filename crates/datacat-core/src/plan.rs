//! JOIN planning.
//!
//! From the schema-analysis record, precompute everything a query needs to
//! reach the navigation graph: the alias table, the FROM/JOIN fragment, the
//! SELECT projection, and the global-search field list. Built once after
//! schema discovery and shared read-only by request handlers.

use crate::error::{Error, Result};
use crate::schema_cache::SchemaCache;
use datacat_sql::is_valid_identifier;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Alias reserved for the main table.
pub const MAIN_ALIAS: &str = "d";

/// Precomputed join structure over the navigation graph.
#[derive(Clone, Debug)]
pub struct JoinPlan {
    /// entity key -> table alias; `d` is never handed out.
    pub alias_map: IndexMap<String, String>,
    /// `FROM <main> d LEFT JOIN ...` in navigation order.
    pub from_and_joins: String,
    /// `d.*` plus `<alias>.<name_col> AS <key>_name` projections.
    pub select_fields: String,
    /// Fields matched by the global-search path, in match order: the main
    /// name, the flattened metadata blob, then every navigation name.
    pub global_search_fields: Vec<String>,
}

impl JoinPlan {
    /// Build the plan from a frozen schema analysis.
    ///
    /// Every identifier that will be templated into SQL is checked against
    /// the unquoted-identifier whitelist first; discovery output normally
    /// passes, but a hostile table name must not reach query text.
    pub fn build(schema: &SchemaCache) -> Result<Self> {
        check_ident(&schema.main_table)?;
        check_ident(&schema.main_primary_key)?;

        let mut used: HashSet<String> = HashSet::new();
        used.insert(MAIN_ALIAS.to_string());

        let mut alias_map = IndexMap::new();
        let mut joins = vec![format!("FROM {} {}", schema.main_table, MAIN_ALIAS)];
        let mut selects = vec![format!("{}.*", MAIN_ALIAS)];
        let mut search_fields = vec![
            format!("{}.name", MAIN_ALIAS),
            format!("jsonb_values_to_text({}.metadata)", MAIN_ALIAS),
        ];

        for (entity_key, table) in &schema.navigation {
            check_ident(entity_key)?;
            check_ident(&table.table_name)?;
            check_ident(&table.primary_key)?;
            check_ident(&table.name_column)?;

            let alias = unique_alias(entity_key, &used);
            used.insert(alias.clone());

            joins.push(format!(
                "LEFT JOIN {} {} ON {}.{}_id = {}.{}",
                table.table_name, alias, MAIN_ALIAS, entity_key, alias, table.primary_key
            ));
            selects.push(format!(
                "{}.{} AS {}_name",
                alias, table.name_column, entity_key
            ));
            search_fields.push(format!("{}.{}", alias, table.name_column));

            alias_map.insert(entity_key.clone(), alias);
        }

        Ok(Self {
            alias_map,
            from_and_joins: joins.join(" "),
            select_fields: selects.join(", "),
            global_search_fields: search_fields,
        })
    }

    /// The alias assigned to a navigation entity key.
    pub fn alias(&self, entity_key: &str) -> Option<&str> {
        self.alias_map.get(entity_key).map(String::as_str)
    }

    /// The aliased name column for an entity key, e.g. `det.name`.
    pub fn aliased_name_column(&self, entity_key: &str, schema: &SchemaCache) -> Option<String> {
        let alias = self.alias(entity_key)?;
        let table = schema.navigation.get(entity_key)?;
        Some(format!("{}.{}", alias, table.name_column))
    }
}

/// Derive a unique alias for an entity key: first three characters, then
/// four, then a numeric suffix. `used` already contains the reserved main
/// alias, so a `d`-prefixed key can never collide with it.
fn unique_alias(entity_key: &str, used: &HashSet<String>) -> String {
    let mut alias = if entity_key.len() > 3 {
        entity_key[..3].to_string()
    } else {
        entity_key.to_string()
    };

    if used.contains(&alias) && entity_key.len() > 3 {
        alias = entity_key[..4].to_string();
    }

    if used.contains(&alias) {
        let mut counter = 1;
        while used.contains(&format!("{}{}", alias, counter)) {
            counter += 1;
        }
        alias = format!("{}{}", alias, counter);
    }

    alias
}

fn check_ident(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "discovered identifier {:?} is not safe to template into SQL",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_cache::testing::sample_cache;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_alias_assignment_is_deterministic() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        assert_eq!(plan.alias("accelerator"), Some("acc"));
        assert_eq!(plan.alias("stage"), Some("sta"));
        assert_eq!(plan.alias("campaign"), Some("cam"));
        assert_eq!(plan.alias("detector"), Some("det"));
    }

    #[test]
    fn test_alias_collision_widens_then_counts() {
        let mut used = HashSet::new();
        used.insert("d".to_string());
        used.insert("det".to_string());
        // Collides at three characters, resolved at four.
        assert_eq!(unique_alias("detectors", &used), "dete");

        used.insert("dete".to_string());
        // Both prefixes taken: numeric suffix.
        assert_eq!(unique_alias("detectors", &used), "dete1");
    }

    #[test]
    fn test_main_alias_is_reserved() {
        let mut used = HashSet::new();
        used.insert("d".to_string());
        // A short key that would want the exact alias "d" must skip it.
        assert_eq!(unique_alias("d", &used), "d1");
    }

    #[test]
    fn test_from_and_joins_shape() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        assert!(plan.from_and_joins.starts_with("FROM datasets d"));
        assert!(plan
            .from_and_joins
            .contains("LEFT JOIN accelerators acc ON d.accelerator_id = acc.accelerator_id"));
        assert!(plan
            .from_and_joins
            .contains("LEFT JOIN detectors det ON d.detector_id = det.detector_id"));
    }

    #[test]
    fn test_select_fields_projection() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        assert!(plan.select_fields.starts_with("d.*"));
        assert!(plan.select_fields.contains("acc.name AS accelerator_name"));
        assert!(plan.select_fields.contains("det.name AS detector_name"));
    }

    #[test]
    fn test_global_search_field_order() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        assert_eq!(plan.global_search_fields[0], "d.name");
        assert_eq!(
            plan.global_search_fields[1],
            "jsonb_values_to_text(d.metadata)"
        );
        assert_eq!(
            &plan.global_search_fields[2..],
            &["acc.name", "sta.name", "cam.name", "det.name"]
        );
    }

    #[test]
    fn test_hostile_identifier_is_rejected() {
        let mut schema = sample_cache();
        schema.main_table = "datasets; DROP TABLE datasets".into();
        assert!(JoinPlan::build(&schema).is_err());
    }
}
