// src/error.rs

//! Crate-wide error taxonomy
//!
//! Every variant here corresponds to one of the error kinds the batch engine
//! is contractually required to surface: validation failures abort the batch
//! before execution; per-operation failures are captured into that
//! operation's result entry instead of propagating.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed schema validation (unknown type, missing field, bad shape).
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// A `dependsOn` entry referenced an operation id that does not exist.
    #[error("operation '{from}' depends on unknown operation '{missing}'")]
    DependencyMissing { from: String, missing: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected involving operation '{0}'")]
    DependencyCycle(String),

    /// A resolved path escapes the configured root.
    #[error("path escapes root: {0}")]
    PathEscape(PathBuf),

    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// Path already exists where a create expected it not to.
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    /// OS denied the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Expected a file, found a directory (or vice versa).
    #[error("is a directory: {0}")]
    IsDirectory(PathBuf),

    /// File exceeds the configured size limit.
    #[error("size exceeded for {path}: {size} bytes > {limit} byte limit")]
    SizeExceeded { path: PathBuf, size: u64, limit: u64 },

    /// File content is not valid UTF-8 text.
    #[error("binary content at {0}")]
    Binary(PathBuf),

    /// A user-supplied regex failed to compile.
    #[error("invalid regex '{pattern}': {reason}")]
    RegexInvalid { pattern: String, reason: String },

    /// A line number or byte range was out of bounds or malformed.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The AST parser could not parse a file.
    #[error("parse error in {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// An external validator/linter command failed to run (not a nonzero exit —
    /// that's reported as issues, not an error).
    #[error("external command failed: {0}")]
    ExternalCommandFailed(String),

    /// Too many snapshots requested for a single transaction.
    #[error("snapshot budget exceeded: {count} > {max}")]
    SnapshotBudgetExceeded { count: usize, max: usize },

    /// A transaction method was called in a state that does not permit it.
    #[error("invalid transaction state: expected {expected}, found {actual:?}")]
    TransactionInvalidState { expected: String, actual: String },

    /// The batch or operation exceeded its deadline.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The batch or operation was cancelled via the abort signal.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Feature is recognized but intentionally unimplemented (e.g. `Ast` changes).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O error not otherwise classified above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable string tag for the `{kind, message, path?}` error envelope (§6, §7).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaInvalid(_) => "SchemaInvalid",
            Self::DependencyMissing { .. } => "DependencyMissing",
            Self::DependencyCycle(_) => "DependencyCycle",
            Self::PathEscape(_) => "PathEscape",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::IsDirectory(_) => "IsDirectory",
            Self::SizeExceeded { .. } => "SizeExceeded",
            Self::Binary(_) => "Binary",
            Self::RegexInvalid { .. } => "RegexInvalid",
            Self::OutOfRange(_) => "OutOfRange",
            Self::ParseError { .. } => "ParseError",
            Self::ExternalCommandFailed(_) => "ExternalCommandFailed",
            Self::SnapshotBudgetExceeded { .. } => "SnapshotBudgetExceeded",
            Self::TransactionInvalidState { .. } => "TransactionInvalidState",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled(_) => "Cancelled",
            Self::Unsupported(_) => "Unsupported",
            Self::Io(_) => "Internal",
            Self::Internal(_) => "Internal",
        }
    }

    /// The path associated with this error, if any, for the error envelope's `path?` field.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::PathEscape(p)
            | Self::NotFound(p)
            | Self::AlreadyExists(p)
            | Self::PermissionDenied(p)
            | Self::IsDirectory(p)
            | Self::Binary(p) => Some(p),
            Self::SizeExceeded { path, .. } => Some(path),
            Self::ParseError { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
