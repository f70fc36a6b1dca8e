pub mod sanitize;

pub use sanitize::{quote_ident, validate_schema_name};
