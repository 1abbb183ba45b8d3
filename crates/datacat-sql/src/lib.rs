//! SQL building blocks for the datacat catalog service.
//!
//! Everything that ends up in a query goes through one of two doors:
//! identifiers (table, column, alias names) are escaped and validated via
//! [`identifier`], values are carried as [`SqlParam`]s bound to `$n`
//! placeholders via [`SqlFragment`]. Raw string interpolation of values is
//! never allowed.

pub mod builder;
pub mod identifier;
pub mod param;

pub use builder::SqlFragment;
pub use identifier::{escape_ident, is_valid_identifier, quote_literal};
pub use param::SqlParam;
