//! SQL parameter values.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A value bound to a `$n` placeholder.
///
/// The variants cover what the catalog actually binds: query-language
/// comparands, metadata documents, timestamps, and id lists for bulk
/// fetch/delete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SqlParam {
    /// NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text string
    Text(String),
    /// JSON document (metadata payloads)
    Json(JsonValue),
    /// Timestamp without time zone, always UTC
    Timestamp(NaiveDateTime),
    /// Integer array, bound for `= ANY($n)` predicates
    IntArray(Vec<i64>),
}

impl SqlParam {
    /// Create a text parameter.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Check if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this parameter holds a numeric value.
    ///
    /// Drives the `::numeric` cast decision when comparing against JSON
    /// text extraction.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Render the value for debug logging. Text is truncated, never quoted
    /// for SQL use.
    pub fn display_for_log(&self) -> String {
        match self {
            Self::Null => "NULL".into(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) if s.chars().count() > 64 => {
                let truncated: String = s.chars().take(64).collect();
                format!("{}…", truncated)
            }
            Self::Text(s) => s.clone(),
            Self::Json(_) => "<json>".into(),
            Self::Timestamp(t) => t.to_string(),
            Self::IntArray(v) => format!("<{} ids>", v.len()),
        }
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i32> for SqlParam {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<i64> for SqlParam {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for SqlParam {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for SqlParam {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<JsonValue> for SqlParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl From<NaiveDateTime> for SqlParam {
    fn from(t: NaiveDateTime) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Vec<i64>> for SqlParam {
    fn from(v: Vec<i64>) -> Self {
        Self::IntArray(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        let p: SqlParam = "IDEA".into();
        assert!(matches!(p, SqlParam::Text(s) if s == "IDEA"));

        let p: SqlParam = 42i64.into();
        assert!(matches!(p, SqlParam::Int(42)));

        let p: SqlParam = None::<i64>.into();
        assert!(p.is_null());
    }

    #[test]
    fn test_is_numeric() {
        assert!(SqlParam::Int(100).is_numeric());
        assert!(SqlParam::Float(99.5).is_numeric());
        assert!(!SqlParam::text("100").is_numeric());
        assert!(!SqlParam::Null.is_numeric());
    }

    #[test]
    fn test_display_truncates_long_text() {
        let long = "x".repeat(100);
        let shown = SqlParam::text(long).display_for_log();
        assert!(shown.len() < 100);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn test_display_truncates_on_char_boundaries() {
        // Multi-byte input must not split a character at the cutoff.
        let long = "é".repeat(100);
        let shown = SqlParam::text(long).display_for_log();
        assert_eq!(shown.chars().count(), 65);
        assert!(shown.ends_with('…'));
    }
}
