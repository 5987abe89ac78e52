//! Pipeline configuration: YAML types, `${VAR}` substitution, semantic checks.

pub mod parser;
pub mod types;
pub mod validator;
