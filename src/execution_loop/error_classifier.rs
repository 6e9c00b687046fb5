//! Error Classifier
//!
//! Decides whether an execution result is an error and, if so, labels it
//! for logs and trace payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQLite failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    /// Statement refused by the read-only guard
    Rejected,
    NoSuchTable,
    NoSuchColumn,
    AmbiguousColumn,
    Syntax,
    Other(String),
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::Rejected => write!(f, "Rejected"),
            SqlErrorClass::NoSuchTable => write!(f, "NoSuchTable"),
            SqlErrorClass::NoSuchColumn => write!(f, "NoSuchColumn"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::Syntax => write!(f, "Syntax"),
            SqlErrorClass::Other(msg) => write!(f, "Other({})", msg),
        }
    }
}

/// Outcome of one execution, as seen by the repair controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultClass {
    Valid,
    Invalid(SqlErrorClass),
}

impl ResultClass {
    pub fn is_valid(&self) -> bool {
        matches!(self, ResultClass::Valid)
    }
}

/// A result is an error iff it starts with "error" or "sql error",
/// ignoring case. The empty-result message is not an error.
pub fn is_error_result(result: &str) -> bool {
    let lowered = result.to_lowercase();
    lowered.starts_with("sql error") || lowered.starts_with("error")
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, result: &str) -> ResultClass {
        if !is_error_result(result) {
            return ResultClass::Valid;
        }
        ResultClass::Invalid(self.error_class(result))
    }

    fn error_class(&self, result: &str) -> SqlErrorClass {
        let error_msg = result.to_lowercase();

        if error_msg.contains("only select queries") {
            return SqlErrorClass::Rejected;
        }
        if error_msg.contains("no such table") {
            return SqlErrorClass::NoSuchTable;
        }
        if error_msg.contains("no such column") {
            return SqlErrorClass::NoSuchColumn;
        }
        if error_msg.contains("ambiguous column") {
            return SqlErrorClass::AmbiguousColumn;
        }
        if error_msg.contains("syntax error") || error_msg.contains("incomplete input") {
            return SqlErrorClass::Syntax;
        }

        SqlErrorClass::Other(result.to_string())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
