// Error taxonomy for extraction, storage and sync

use std::path::PathBuf;
use thiserror::Error;

use crate::index::Language;

/// Failure to extract one file. Recovered: the file is skipped and reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error in {path} at line {line}, column {column}")]
    Syntax { path: String, line: u32, column: u32 },

    #[error("{path} is not valid UTF-8")]
    InvalidEncoding { path: String },

    #[error("parsing {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("tree-sitter could not parse {path}: {message}")]
    TreeSitter { path: String, message: String },

    #[error("cannot read {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("adapter crashed on {path}: {message}")]
    Crashed { path: String, message: String },
}

impl ParseError {
    pub fn path(&self) -> &str {
        match self {
            ParseError::Syntax { path, .. }
            | ParseError::InvalidEncoding { path }
            | ParseError::Timeout { path, .. }
            | ParseError::TreeSitter { path, .. }
            | ParseError::Unreadable { path, .. }
            | ParseError::Crashed { path, .. } => path,
        }
    }
}

/// A language front-end cannot run at all. Recovered per language.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{language} adapter unavailable: {reason}")]
pub struct AdapterUnavailableError {
    pub language: Language,
    pub reason: String,
}

/// Store-scoped failures. These abort the current command.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store is corrupted ({detail}); run `structgraph drop` to reset it")]
    Corruption { detail: String },

    #[error("failed to create cache directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corruption(detail: impl Into<String>) -> Self {
        StoreError::Corruption {
            detail: detail.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync cancelled; the cache was left unchanged")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_path() {
        let err = ParseError::Timeout {
            path: "slow.ts".to_string(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.path(), "slow.ts");
        assert_eq!(err.to_string(), "parsing slow.ts timed out after 30000ms");
    }

    #[test]
    fn test_corruption_message_has_remediation() {
        let err = StoreError::corruption("orphaned symbols");
        assert!(err.is_corruption());
        assert!(err.to_string().contains("structgraph drop"));
    }
}
