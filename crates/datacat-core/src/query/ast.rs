//! Query-language syntax tree.

/// A dotted field path. The first element selects a column or navigation
/// entity; remaining elements index into the JSON metadata document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub parts: Vec<String>,
}

impl Field {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// The leading path element.
    pub fn base(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }
}

/// Comparison operators of the query language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `:` substring / existence
    Has,
    /// `=~` case-insensitive regex
    Regex,
    /// `!~` case-insensitive regex negation
    NotRegex,
}

impl CompareOp {
    /// Operators that order their operands; these get NULL-excluding
    /// wrapping on timestamp columns.
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Ne | Self::Gt | Self::Lt | Self::Ge | Self::Le)
    }

    /// Operators that compare magnitudes or equality; a numeric comparand
    /// under one of these casts JSON text extraction to numeric.
    pub fn wants_numeric_cast(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Gt | Self::Lt | Self::Ge | Self::Le | Self::Has
        )
    }
}

/// A literal operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text { value: String, quoted: bool },
}

impl Scalar {
    pub fn text(value: impl Into<String>, quoted: bool) -> Self {
        Self::Text {
            value: value.into(),
            quoted,
        }
    }

    /// The operand rendered as text.
    pub fn as_text(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text { value, .. } => value.clone(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// The bare `*` wildcard.
    pub fn is_star(&self) -> bool {
        matches!(self, Self::Text { value, .. } if value == "*")
    }
}

/// The query syntax tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Ast {
    Comparison {
        field: Field,
        op: CompareOp,
        value: Option<Scalar>,
    },
    GlobalSearch {
        value: String,
        quoted: bool,
    },
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
}
