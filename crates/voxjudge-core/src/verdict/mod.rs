//! Verdict parsing and validation.
//!
//! Evaluator and curator output is structured JSON validated against JSON
//! Schema. Output that does not validate is rejected; there is no
//! best-effort reading of free text.

mod parser;
mod schema;

pub use parser::{parse_verdict, ParsedVerdict, VerdictParseError};
pub use schema::validate_verdict_schema;
