//! SQL utilities for record synchronization
//!
//! Provides statement generation, filter rendering, and identifier sanitization.

pub mod filter;
pub mod sanitize;
pub mod statement;

pub use filter::{Filter, build_filter, build_predicates, join_predicates};
pub use sanitize::{quote_identifier, quote_literal, quote_table_name, validate_table_name};
pub use statement::{Partition, Statement, StatementBuilder, partition};
