//! AST to SQL translation.
//!
//! A translator is cheap and single-use: build one per query (or call
//! [`SqlTranslator::reset`] between queries). It is never shared across
//! concurrent requests; the parameter list and counter are instance state.

use super::ast::{Ast, CompareOp, Field, Scalar};
use super::dates::parse_date_string;
use crate::error::{Error, Result};
use crate::plan::JoinPlan;
use crate::schema_cache::SchemaCache;
use datacat_sql::{escape_ident, SqlParam};
use tracing::debug;

/// Trigram similarity floor for short fields such as names.
const NAME_SIMILARITY_THRESHOLD: &str = "0.6";
/// Word-similarity floor for the flattened metadata blob.
const METADATA_SIMILARITY_THRESHOLD: &str = "0.4";

/// Walks an [`Ast`] and emits a WHERE clause with `$1..$n` placeholders
/// matching its parameter list by position.
pub struct SqlTranslator<'a> {
    schema: &'a SchemaCache,
    plan: &'a JoinPlan,
    params: Vec<SqlParam>,
}

impl<'a> SqlTranslator<'a> {
    pub fn new(schema: &'a SchemaCache, plan: &'a JoinPlan) -> Self {
        Self {
            schema,
            plan,
            params: Vec::new(),
        }
    }

    /// Drop all accumulated parameters, making the translator reusable.
    pub fn reset(&mut self) {
        self.params.clear();
    }

    /// Parameters accumulated so far, in placeholder order.
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Consume the accumulated parameters.
    pub fn take_params(&mut self) -> Vec<SqlParam> {
        std::mem::take(&mut self.params)
    }

    pub(crate) fn params_len(&self) -> usize {
        self.params.len()
    }

    /// Roll parameters back to a checkpoint taken before a translation
    /// attempt that failed.
    pub(crate) fn truncate_params(&mut self, len: usize) {
        self.params.truncate(len);
    }

    /// Translate a node, appending its parameters to this translator.
    pub fn translate(&mut self, node: &Ast) -> Result<String> {
        match node {
            Ast::Comparison { field, op, value } => {
                self.translate_comparison(field, *op, value.as_ref())
            }
            Ast::GlobalSearch { value, quoted } => Ok(self.translate_global_search(value, *quoted)),
            Ast::Not(term) => Ok(format!("NOT ({})", self.translate(term)?)),
            Ast::And(left, right) => Ok(format!(
                "({} AND {})",
                self.translate(left)?,
                self.translate(right)?
            )),
            Ast::Or(left, right) => Ok(format!(
                "({} OR {})",
                self.translate(left)?,
                self.translate(right)?
            )),
        }
    }

    fn translate_comparison(
        &mut self,
        field: &Field,
        op: CompareOp,
        value: Option<&Scalar>,
    ) -> Result<String> {
        // `field:*` asks whether the field exists at all.
        if op == CompareOp::Has && value.is_some_and(Scalar::is_star) {
            return Ok(self.translate_exists(field));
        }

        let field_sql = self.resolve_field(field, value, Some(op));
        let is_timestamp = self.is_timestamp_expr(&field_sql);

        if op == CompareOp::Has {
            let text = value.map(Scalar::as_text).unwrap_or_default();
            if is_timestamp && text.is_empty() {
                // "last_edited_at:" narrows to rows that have been edited.
                return Ok(format!("{} IS NOT NULL", field_sql));
            }
            let placeholder = self.push_param(SqlParam::Text(text));
            return Ok(format!(
                "{} ILIKE '%' || {} || '%'",
                field_sql, placeholder
            ));
        }

        let sql_op = match op {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Regex => "~*",
            CompareOp::NotRegex => "!~*",
            CompareOp::Has => unreachable!("handled above"),
        };

        let param = match value {
            None => SqlParam::Null,
            Some(Scalar::Int(n)) => SqlParam::Int(*n),
            Some(Scalar::Float(f)) => SqlParam::Float(*f),
            Some(Scalar::Text { value: text, .. }) => {
                if is_timestamp && !matches!(op, CompareOp::Regex | CompareOp::NotRegex) {
                    match parse_date_string(text) {
                        Some(ts) => SqlParam::Timestamp(ts),
                        None => {
                            debug!(value = %text, "date parse failed; binding as text");
                            SqlParam::Text(text.clone())
                        }
                    }
                } else {
                    SqlParam::Text(text.clone())
                }
            }
        };

        let placeholder = self.push_param(param);

        // Exclude NULL timestamps cleanly from ordered comparisons.
        if is_timestamp && op.is_ordering() {
            Ok(format!(
                "({} IS NOT NULL AND {} {} {})",
                field_sql, field_sql, sql_op, placeholder
            ))
        } else {
            Ok(format!("{} {} {}", field_sql, sql_op, placeholder))
        }
    }

    fn translate_exists(&mut self, field: &Field) -> String {
        let parts = &field.parts;
        let is_explicit = field.base() == "metadata" && parts.len() > 1;
        let is_auto = self.schema.is_metadata_field(parts);

        if is_explicit || is_auto {
            let path: &[String] = if is_explicit { &parts[1..] } else { parts };
            if path.len() == 1 {
                let placeholder = self.push_param(SqlParam::text(&path[0]));
                format!("d.metadata ? {}", placeholder)
            } else {
                let placeholder =
                    self.push_param(SqlParam::Text(format!("$.{}", path.join("."))));
                format!("jsonb_path_exists(d.metadata, {}::jsonpath)", placeholder)
            }
        } else {
            let field_sql = self.resolve_field(field, None, None);
            format!("{} IS NOT NULL", field_sql)
        }
    }

    fn translate_global_search(&mut self, value: &str, quoted: bool) -> String {
        let term = value.trim();
        // '*' or nothing: no filter.
        if term == "*" || term.is_empty() {
            return "TRUE".to_string();
        }

        let placeholder = format!("${}", self.params.len() + 1);
        let clause =
            build_search_conditions(&placeholder, quoted, &self.plan.global_search_fields);
        if clause == "TRUE" {
            return clause;
        }
        self.params.push(SqlParam::text(term));
        clause
    }

    /// Resolve a dotted field path to the SQL expression it compares on.
    pub(crate) fn resolve_field(
        &self,
        field: &Field,
        value: Option<&Scalar>,
        op: Option<CompareOp>,
    ) -> String {
        let mut base = field.base().to_string();

        // `detector_name` addresses the joined name column of `detector`.
        if let Some(stripped) = base.strip_suffix("_name") {
            if self.schema.navigation.contains_key(stripped) {
                base = stripped.to_string();
            }
        }

        // Explicit metadata path: metadata.a.b
        if base == "metadata" && field.parts.len() > 1 {
            return json_path_expr(&field.parts[1..], value, op);
        }

        if let Some(column) = self.base_column(&base) {
            return column;
        }

        // Auto-detection: a bare key that exists in the metadata catalog is
        // treated as metadata.<key>.
        if self.schema.is_metadata_field(&field.parts) {
            debug!(field = %field.parts.join("."), "auto-detected metadata field");
            return json_path_expr(&field.parts, value, op);
        }

        // Fall through to a main-table column; the database rejects
        // anything unknown.
        if datacat_sql::is_valid_identifier(&base) {
            format!("d.{}", base)
        } else {
            format!("d.{}", escape_ident(&base))
        }
    }

    fn base_column(&self, base: &str) -> Option<String> {
        match base {
            "name" | "created_at" | "last_edited_at" => Some(format!("d.{}", base)),
            "metadata" => Some("d.metadata".to_string()),
            "metadata_text" => Some("jsonb_values_to_text(d.metadata)".to_string()),
            _ if base == self.schema.main_primary_key => Some(format!("d.{}", base)),
            _ => self.plan.aliased_name_column(base, self.schema),
        }
    }

    fn is_timestamp_expr(&self, field_sql: &str) -> bool {
        field_sql
            .strip_prefix("d.")
            .is_some_and(|column| self.schema.is_timestamp_column(column))
    }

    fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }
}

/// A `d.metadata->'a'->>'b'` extraction over a JSON path, cast to numeric
/// when the comparand is numeric under a magnitude/equality operator.
fn json_path_expr(path: &[String], value: Option<&Scalar>, op: Option<CompareOp>) -> String {
    let quote = |part: &String| format!("'{}'", part.replace('\'', "''"));

    let expr = if path.len() == 1 {
        format!("d.metadata->>{}", quote(&path[0]))
    } else {
        let inner: Vec<String> = path[..path.len() - 1].iter().map(quote).collect();
        format!(
            "d.metadata->{}->>{}",
            inner.join("->"),
            quote(path.last().expect("path is non-empty"))
        )
    };

    let cast = value.is_some_and(Scalar::is_numeric)
        && op.is_some_and(CompareOp::wants_numeric_cast);
    if cast {
        format!("({})::numeric", expr)
    } else {
        expr
    }
}

/// OR together one search condition per field, all sharing `placeholder`.
///
/// Quoted terms use substring match; bare terms use trigram similarity,
/// with a looser word-level match against the metadata blob.
pub(crate) fn build_search_conditions(
    placeholder: &str,
    quoted: bool,
    fields: &[String],
) -> String {
    if fields.is_empty() {
        return "TRUE".to_string();
    }

    let conditions: Vec<String> = fields
        .iter()
        .map(|field| {
            if quoted {
                format!("{} ILIKE '%' || {} || '%'", field, placeholder)
            } else if field.starts_with("jsonb_values_to_text") {
                format!(
                    "word_similarity({}, {}) > {}",
                    placeholder, field, METADATA_SIMILARITY_THRESHOLD
                )
            } else {
                format!(
                    "similarity({}, {}) > {}",
                    placeholder, field, NAME_SIMILARITY_THRESHOLD
                )
            }
        })
        .collect();

    format!("({})", conditions.join(" OR "))
}

/// Resolve a `sort_by` field the same way comparisons resolve, for ORDER BY
/// synthesis. Rejects anything outside the field-path character set before
/// it can reach query text.
pub fn resolve_sort_field(schema: &SchemaCache, plan: &JoinPlan, sort_by: &str) -> Result<String> {
    let parts: Vec<String> = sort_by.split('.').map(str::to_string).collect();
    if parts.iter().any(|p| {
        p.is_empty()
            || !p
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }) {
        return Err(Error::Validation(format!(
            "invalid sort field: {:?}",
            sort_by
        )));
    }

    let field = Field::new(parts);
    let translator = SqlTranslator::new(schema, plan);
    Ok(translator.resolve_field(&field, None, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;
    use crate::schema_cache::testing::sample_cache;
    use pretty_assertions::assert_eq;

    fn translate(query: &str) -> (String, Vec<SqlParam>) {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        let mut translator = SqlTranslator::new(&schema, &plan);
        let ast = parse_query(query).unwrap();
        let sql = translator.translate(&ast).unwrap();
        (sql, translator.take_params())
    }

    fn assert_sequential_placeholders(sql: &str, count: usize) {
        for i in 1..=count {
            assert!(
                sql.contains(&format!("${}", i)),
                "missing ${} in {:?}",
                i,
                sql
            );
        }
        assert!(!sql.contains(&format!("${}", count + 1)));
    }

    #[test]
    fn test_name_equality() {
        let (sql, params) = translate("name = \"zh\"");
        assert_eq!(sql, "d.name = $1");
        assert_eq!(params, vec![SqlParam::text("zh")]);
    }

    #[test]
    fn test_navigation_substring_and_metadata_numeric() {
        let (sql, params) = translate("detector:IDEA AND metadata.energy > 100");
        assert_eq!(
            sql,
            "(det.name ILIKE '%' || $1 || '%' AND (d.metadata->>'energy')::numeric > $2)"
        );
        assert_eq!(params, vec![SqlParam::text("IDEA"), SqlParam::Int(100)]);
    }

    #[test]
    fn test_entity_name_suffix_resolves_to_alias() {
        let (sql, _) = translate("campaign_name:Winter2023");
        assert!(sql.starts_with("cam.name ILIKE"));
    }

    #[test]
    fn test_empty_has_on_timestamp_is_not_null() {
        let (sql, params) = translate("last_edited_at:");
        assert_eq!(sql, "d.last_edited_at IS NOT NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_timestamp_comparison_parses_date_and_guards_null() {
        let (sql, params) = translate("last_edited_at > \"2025-07-20\"");
        assert_eq!(
            sql,
            "(d.last_edited_at IS NOT NULL AND d.last_edited_at > $1)"
        );
        assert!(matches!(params[0], SqlParam::Timestamp(_)));
    }

    #[test]
    fn test_timestamp_equality_has_no_null_guard() {
        let (sql, params) = translate("created_at = \"2024-01-01 08:00\"");
        assert_eq!(sql, "d.created_at = $1");
        assert!(matches!(params[0], SqlParam::Timestamp(_)));
    }

    #[test]
    fn test_unparseable_date_binds_as_text() {
        let (_, params) = translate("last_edited_at > \"soonish\"");
        assert_eq!(params, vec![SqlParam::text("soonish")]);
    }

    #[test]
    fn test_regex_operators() {
        let (sql, _) = translate("detector =~ \"IDEA.*\"");
        assert_eq!(sql, "det.name ~* $1");
        let (sql, _) = translate("detector !~ \"CLD\"");
        assert_eq!(sql, "det.name !~* $1");
    }

    #[test]
    fn test_existence_on_metadata_key() {
        let (sql, params) = translate("energy:*");
        assert_eq!(sql, "d.metadata ? $1");
        assert_eq!(params, vec![SqlParam::text("energy")]);
    }

    #[test]
    fn test_existence_on_nested_metadata_path() {
        let (sql, params) = translate("metadata.params.beam:*");
        assert_eq!(sql, "jsonb_path_exists(d.metadata, $1::jsonpath)");
        assert_eq!(params, vec![SqlParam::text("$.params.beam")]);
    }

    #[test]
    fn test_existence_on_regular_column() {
        let (sql, params) = translate("name:*");
        assert_eq!(sql, "d.name IS NOT NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_auto_detected_metadata_comparison() {
        let (sql, params) = translate("energy >= 240");
        assert_eq!(sql, "(d.metadata->>'energy')::numeric >= $1");
        assert_eq!(params, vec![SqlParam::Int(240)]);
    }

    #[test]
    fn test_auto_detected_text_key_is_not_cast() {
        let (sql, _) = translate("status:done");
        assert_eq!(sql, "d.metadata->>'status' ILIKE '%' || $1 || '%'");
    }

    #[test]
    fn test_unknown_field_falls_through_to_main_table() {
        let (sql, params) = translate("bogus = 5");
        assert_eq!(sql, "d.bogus = $1");
        assert_eq!(params, vec![SqlParam::Int(5)]);
    }

    #[test]
    fn test_global_search_quoted_uses_substring() {
        let (sql, params) = translate("\"higgs sample\"");
        assert!(sql.contains("d.name ILIKE '%' || $1 || '%'"));
        assert!(sql.contains("jsonb_values_to_text(d.metadata) ILIKE '%' || $1 || '%'"));
        assert!(sql.contains("det.name ILIKE '%' || $1 || '%'"));
        // One shared parameter across every field.
        assert_eq!(params, vec![SqlParam::text("higgs sample")]);
        assert!(!sql.contains("$2"));
    }

    #[test]
    fn test_global_search_bare_uses_similarity() {
        let (sql, params) = translate("higgs");
        assert!(sql.contains("similarity($1, d.name) > 0.6"));
        assert!(sql.contains("word_similarity($1, jsonb_values_to_text(d.metadata)) > 0.4"));
        assert!(sql.contains("similarity($1, acc.name) > 0.6"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_global_search_star_matches_everything() {
        let (sql, params) = translate("*");
        assert_eq!(sql, "TRUE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_boolean_composition_parenthesizes() {
        let (sql, params) = translate("NOT (name = a OR name = b) AND name = c");
        assert_eq!(
            sql,
            "(NOT ((d.name = $1 OR d.name = $2)) AND d.name = $3)"
        );
        assert_eq!(params.len(), 3);
        assert_sequential_placeholders(&sql, 3);
    }

    #[test]
    fn test_placeholders_are_sequential_left_to_right() {
        let (sql, params) =
            translate("accelerator = FCC-ee AND stage:sim AND metadata.energy < 365");
        assert_eq!(params.len(), 3);
        assert_sequential_placeholders(&sql, 3);
        let p1 = sql.find("$1").unwrap();
        let p2 = sql.find("$2").unwrap();
        let p3 = sql.find("$3").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn test_resolve_sort_field() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();

        assert_eq!(
            resolve_sort_field(&schema, &plan, "last_edited_at").unwrap(),
            "d.last_edited_at"
        );
        assert_eq!(
            resolve_sort_field(&schema, &plan, "detector_name").unwrap(),
            "det.name"
        );
        assert_eq!(
            resolve_sort_field(&schema, &plan, "metadata.energy").unwrap(),
            "d.metadata->>'energy'"
        );
        assert_eq!(
            resolve_sort_field(&schema, &plan, "status").unwrap(),
            "d.metadata->>'status'"
        );
        assert!(resolve_sort_field(&schema, &plan, "name; DROP TABLE x").is_err());
        assert!(resolve_sort_field(&schema, &plan, "a..b").is_err());
    }

    #[test]
    fn test_reset_clears_state() {
        let schema = sample_cache();
        let plan = JoinPlan::build(&schema).unwrap();
        let mut translator = SqlTranslator::new(&schema, &plan);

        let ast = parse_query("name = x").unwrap();
        translator.translate(&ast).unwrap();
        assert_eq!(translator.params_len(), 1);

        translator.reset();
        assert_eq!(translator.params_len(), 0);

        let sql = translator.translate(&ast).unwrap();
        assert_eq!(sql, "d.name = $1");
    }
}
