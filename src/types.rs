// src/types.rs

//! Request/response data model (§3).
//!
//! `Operation` and `Change` are tagged variants over JSON, matching the
//! wire-level request envelope (§6) one-to-one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub options: ExecutionOptions,
}

/// One operation plus its scheduling metadata (`id`, `dependsOn`).
///
/// Can't carry `#[serde(deny_unknown_fields)]` itself — serde rejects that
/// combination on a struct with a `#[serde(flatten)]` field — but `Operation`
/// below denies unknown fields on its own variants, so a stray field not
/// claimed by `id`/`depends_on` still gets rejected once it reaches the
/// flattened enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub id: Option<String>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(flatten)]
    pub operation: Operation,
}

/// Batch-wide execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionOptions {
    pub parallel: bool,
    pub transaction: bool,
    pub continue_on_error: bool,
    pub max_concurrency: usize,
    pub timeout_ms: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            transaction: false,
            continue_on_error: false,
            max_concurrency: 4,
            timeout_ms: 0,
        }
    }
}

/// What kind of extraction an `Analyze` operation should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractKind {
    Symbols,
    Imports,
    Exports,
    Functions,
    Classes,
    Variables,
}

/// A single file to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFile {
    pub path: String,
    pub content: Option<String>,
    pub template: Option<String>,
    pub mode: Option<String>,
}

/// The tagged variant over the five operation kinds (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum Operation {
    Analyze {
        paths: Vec<String>,
        #[serde(default)]
        extract: HashSet<ExtractKind>,
        #[serde(default)]
        patterns: Vec<String>,
        #[serde(default)]
        build_dependency_graph: bool,
    },
    Edit {
        edits: Vec<FileEdit>,
        #[serde(default)]
        validate_syntax: bool,
        #[serde(default)]
        preserve_formatting: bool,
        #[serde(default)]
        dry_run: bool,
    },
    Create {
        files: Vec<CreateFile>,
    },
    Delete {
        paths: Vec<String>,
    },
    Validate {
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        commands: Vec<String>,
        #[serde(default)]
        checks: Vec<String>,
        /// Apply each active rule's `fix()` replacements after checking (§4.6).
        #[serde(default)]
        autofix: bool,
    },
}

impl Operation {
    /// The operation's `type` string, used in results and error envelopes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::Edit { .. } => "edit",
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
            Self::Validate { .. } => "validate",
        }
    }

    /// Read-only operations may share concurrent dispatch slots with each other (§4.8).
    /// A `Validate` with `autofix` set writes to its matched files, so it is
    /// not read-only.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Analyze { .. }) || matches!(self, Self::Validate { autofix, .. } if !autofix)
    }
}

/// One file's edit list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEdit {
    pub file: String,
    #[serde(default)]
    pub create_if_missing: bool,
    pub changes: Vec<Change>,
}

/// A single textual mutation (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Change {
    FindReplace {
        find: String,
        replace: String,
        #[serde(default)]
        regex: bool,
        #[serde(default)]
        replace_all: bool,
    },
    Line {
        line: usize,
        operation: LineOp,
        content: Option<String>,
    },
    Position {
        start: usize,
        end: usize,
        content: String,
    },
    Ast {
        query: String,
        transform: String,
    },
}

/// `Line` change sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOp {
    Insert,
    Replace,
    Delete,
}

/// Terminal lifecycle state of one operation (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Rendered `{kind, message, path?}` error envelope (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    pub path: Option<String>,
}

impl From<&crate::Error> for ErrorEnvelope {
    fn from(e: &crate::Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            path: e.path().map(|p| p.display().to_string()),
        }
    }
}

/// One operation's entry in the aggregate result (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub status: OperationStatus,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorEnvelope>,
    pub duration_ms: u64,
}

/// Batch-level counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// The facade's single return type (§4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub success: bool,
    pub summary: Summary,
    pub results: Vec<OperationResult>,
    pub error: Option<ErrorEnvelope>,
}
