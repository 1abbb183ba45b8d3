//! The catalog query language.
//!
//! A compact filter language over the main table and its navigation graph:
//! `detector:IDEA AND metadata.energy > 100 OR NOT (status = done)`. The
//! parser produces an [`Ast`]; the translator walks it into a parameterized
//! WHERE clause; the hybrid module rescues input the grammar rejects by
//! parsing what it can and routing the rest through similarity search.

pub mod ast;
pub mod dates;
pub mod hybrid;
pub mod parser;
pub mod translate;

pub use ast::{Ast, CompareOp, Field, Scalar};
pub use hybrid::hybrid_where;
pub use parser::parse_query;
pub use translate::SqlTranslator;
