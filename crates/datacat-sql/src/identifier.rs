//! SQL identifier handling.
//!
//! Table, column, and alias names are templated into query text because the
//! schema is discovered at runtime. Every such name either comes from the
//! schema-analysis whitelist or passes through [`escape_ident`].

/// Escape a SQL identifier by double-quoting it and doubling embedded quotes.
pub fn escape_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL string literal, doubling embedded single quotes.
///
/// Only for SQL constructs that cannot take parameters; values in regular
/// queries are bound as `SqlParam`s instead.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Check whether a string is safe to interpolate as an unquoted identifier:
/// a letter or underscore followed by letters, digits, or underscores.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
