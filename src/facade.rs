// src/facade.rs

//! File-Operations Tool facade (§4.9): the single `execute()` entry point.
//!
//! Owns one File System Service, one Cache, one AST Parser, and creates a
//! Transaction Manager and an Execution Engine per request — the shared
//! services are owned once here, and a fresh `Transaction` is spun up per
//! call.

use crate::analyzer::Analyzer;
use crate::ast::{AstParser, RegexAstParser};
use crate::cache::{CacheConfig, CacheContent, FileCache};
use crate::config::EngineConfig;
use crate::editor::Editor;
use crate::engine::{ExecutionEngine, OperationRunner, StopReason};
use crate::error::{Error, Result};
use crate::fs_service::FileSystemService;
use crate::path_guard::PathGuard;
use crate::planner::{ExecutionPlan, Planner};
use crate::progress::ProgressTracker;
use crate::transaction::TransactionManager;
use crate::types::{
    AggregateResult, CreateFile, ErrorEnvelope, FileEdit, Operation, OperationResult, OperationSpec,
    OperationStatus, Request, Summary,
};
use crate::validator::Validator;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// Owns the five core subsystems and exposes the single `execute` entry
/// point (§4.9).
pub struct FileOpsEngine {
    config: EngineConfig,
    guard: PathGuard,
    fs: FileSystemService,
    cache: FileCache,
    ast: RegexAstParser,
}

impl FileOpsEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let guard = PathGuard::new(&config.root)?;
        let fs = FileSystemService::new(guard.clone());
        let cache = FileCache::new(CacheConfig {
            max_size_bytes: config.max_cache_bytes,
            max_entries: config.max_cache_entries,
            ttl_ms: config.cache_ttl_ms,
            enable_watching: config.enable_watching,
        });
        Ok(Self { config, guard, fs, cache, ast: RegexAstParser })
    }

    /// Roll back any transaction left `active` by a crashed prior run,
    /// older than `max_transaction_age` (§4.4 background sweep). An
    /// embedder calls this periodically — this library never spawns its
    /// own background thread.
    pub fn sweep_stale_transactions(&self) -> Result<Vec<String>> {
        let manager = TransactionManager::new(&self.fs, self.config.txn_dir.clone(), self.config.max_snapshots);
        manager.sweep_stale(self.config.max_transaction_age)
    }

    /// Execute a batch request end to end: plan, (optionally) snapshot,
    /// dispatch, and commit/rollback (§4.9).
    pub fn execute(
        &self,
        request: &Request,
        abort: &AtomicBool,
        progress: &dyn ProgressTracker,
    ) -> Result<AggregateResult> {
        let plan = Planner::new(&self.guard).plan(request)?;

        let manager = TransactionManager::new(&self.fs, self.config.txn_dir.clone(), self.config.max_snapshots);
        let mut tx = if request.options.transaction { Some(manager.begin()?) } else { None };

        if let Some(tx) = tx.as_mut() {
            let affected = self.collect_mutating_paths(request);
            manager.create_snapshots(tx, &affected)?;
        }

        let deadline = if request.options.timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(request.options.timeout_ms))
        } else {
            None
        };

        progress.set_message("executing batch");
        progress.set_length(request.operations.len() as u64);

        let dispatcher = Dispatcher { engine: self, request, progress };
        let exec_engine = ExecutionEngine::new(&plan, &request.options);
        let outcome = exec_engine.run(&dispatcher, abort, deadline);

        match outcome.stop_reason {
            StopReason::Completed => {
                if let Some(tx) = tx.as_mut() {
                    manager.commit(tx)?;
                }
                progress.finish_with_message("batch completed");
            }
            _ => {
                if let Some(tx) = tx.as_mut() {
                    manager.rollback(tx)?;
                }
                progress.finish_with_error("batch did not complete");
            }
        }

        Ok(self.assemble(request, outcome.results))
    }

    /// Derive every path that an `edit`/`create`/`delete` operation may
    /// mutate, plus a `validate` with `autofix` set (§4.4). `analyze` and
    /// `validate` without `autofix` are read-only and never contribute.
    fn collect_mutating_paths(&self, request: &Request) -> Vec<String> {
        let mut paths = Vec::new();
        for spec in &request.operations {
            match &spec.operation {
                Operation::Edit { edits, .. } => paths.extend(edits.iter().map(|e| e.file.clone())),
                Operation::Create { files } => paths.extend(files.iter().map(|f| f.path.clone())),
                Operation::Delete { paths: globs } => {
                    if let Ok(expanded) = self.fs.glob(globs, &Default::default()) {
                        paths.extend(expanded);
                    }
                }
                Operation::Validate { files, autofix: true, .. } => {
                    if let Ok(expanded) = self.fs.glob(files, &Default::default()) {
                        paths.extend(expanded);
                    }
                }
                Operation::Analyze { .. } | Operation::Validate { .. } => {}
            }
        }
        paths
    }

    fn assemble(&self, request: &Request, mut results: Vec<OperationResult>) -> AggregateResult {
        for (result, spec) in results.iter_mut().zip(&request.operations) {
            result.type_name = spec.operation.type_name().to_string();
        }

        let mut summary = Summary::default();
        summary.total = results.len();
        for result in &results {
            match result.status {
                OperationStatus::Completed => summary.successful += 1,
                OperationStatus::Failed => summary.failed += 1,
                OperationStatus::Cancelled => summary.cancelled += 1,
            }
        }

        let error = results
            .iter()
            .find(|r| r.status == OperationStatus::Failed)
            .and_then(|r| r.error.clone());

        AggregateResult { success: summary.failed == 0 && summary.cancelled == 0, summary, results, error }
    }
}

/// Bridges the generic [`ExecutionEngine`] to the concrete operation
/// semantics owned by [`FileOpsEngine`].
struct Dispatcher<'a> {
    engine: &'a FileOpsEngine,
    request: &'a Request,
    progress: &'a dyn ProgressTracker,
}

impl OperationRunner for Dispatcher<'_> {
    fn affected_paths(&self, index: usize) -> HashSet<String> {
        match &self.request.operations[index].operation {
            Operation::Edit { edits, .. } => edits.iter().map(|e| e.file.clone()).collect(),
            Operation::Create { files } => files.iter().map(|f| f.path.clone()).collect(),
            Operation::Delete { paths } => self
                .engine
                .fs
                .glob(paths, &Default::default())
                .map(|p| p.into_iter().collect())
                .unwrap_or_default(),
            Operation::Validate { files, autofix: true, .. } => self
                .engine
                .fs
                .glob(files, &Default::default())
                .map(|p| p.into_iter().collect())
                .unwrap_or_default(),
            Operation::Analyze { .. } | Operation::Validate { .. } => HashSet::new(),
        }
    }

    fn is_read_only(&self, index: usize) -> bool {
        self.request.operations[index].operation.is_read_only()
    }

    fn run(&self, index: usize) -> OperationResult {
        let spec = &self.request.operations[index];
        let started = Instant::now();
        self.progress.set_message(&format!("running {}", spec.operation.type_name()));

        let outcome = run_operation(self.engine, spec);
        self.progress.increment(1);

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(data) => OperationResult {
                id: spec.id.clone(),
                type_name: spec.operation.type_name().to_string(),
                status: OperationStatus::Completed,
                data: Some(data),
                error: None,
                duration_ms,
            },
            Err(e) => OperationResult {
                id: spec.id.clone(),
                type_name: spec.operation.type_name().to_string(),
                status: OperationStatus::Failed,
                data: None,
                error: Some(ErrorEnvelope::from(&e)),
                duration_ms,
            },
        }
    }
}

fn run_operation(engine: &FileOpsEngine, spec: &OperationSpec) -> Result<serde_json::Value> {
    match &spec.operation {
        Operation::Analyze { paths, extract, patterns, build_dependency_graph } => {
            let analyzer = Analyzer::new(&engine.fs, &engine.cache, &engine.ast as &dyn AstParser);
            let report = analyzer.analyze(paths, extract, patterns, *build_dependency_graph)?;
            serde_json::to_value(report).map_err(|e| Error::Internal(e.to_string()))
        }
        Operation::Edit { edits, validate_syntax, preserve_formatting, dry_run } => {
            let editor = Editor::new(&engine.fs, &engine.cache, &engine.ast as &dyn AstParser);
            let outcomes: Result<Vec<_>> = edits
                .iter()
                .map(|edit: &FileEdit| editor.apply(edit, *validate_syntax, *preserve_formatting, *dry_run))
                .collect();
            serde_json::to_value(outcomes?).map_err(|e| Error::Internal(e.to_string()))
        }
        Operation::Create { files } => {
            for file in files {
                if engine.fs.exists(&file.path) {
                    return Err(Error::AlreadyExists(file.path.clone().into()));
                }
                let content = resolve_create_content(file);
                engine.fs.write_many(&[(file.path.clone(), content.into_bytes())])?;
                apply_create_mode(engine, file)?;
            }
            serde_json::to_value(files.iter().map(|f| f.path.clone()).collect::<Vec<_>>())
                .map_err(|e| Error::Internal(e.to_string()))
        }
        Operation::Delete { paths } => {
            let expanded = engine.fs.glob(paths, &Default::default())?;
            engine.fs.delete_many(&expanded)?;
            engine.cache.invalidate_many(&expanded);
            serde_json::to_value(&expanded).map_err(|e| Error::Internal(e.to_string()))
        }
        Operation::Validate { files, commands, checks, autofix } => {
            let validator = Validator::new(&engine.fs, &engine.cache, &engine.ast as &dyn AstParser);
            let expanded = if files.is_empty() { Vec::new() } else { engine.fs.glob(files, &Default::default())? };
            let mut issues = validator.run_files(&expanded, checks)?;
            issues.extend(validator.run_commands(commands)?);
            if *autofix {
                let fixed = validator.apply_fixes(&expanded, checks)?;
                serde_json::to_value(serde_json::json!({ "issues": issues, "fixed": fixed }))
                    .map_err(|e| Error::Internal(e.to_string()))
            } else {
                serde_json::to_value(&issues).map_err(|e| Error::Internal(e.to_string()))
            }
        }
    }
}

fn resolve_create_content(file: &CreateFile) -> String {
    file.content.clone().or_else(|| file.template.clone()).unwrap_or_default()
}

fn apply_create_mode(engine: &FileOpsEngine, file: &CreateFile) -> Result<()> {
    #[cfg(unix)]
    if let Some(mode_str) = &file.mode {
        if let Ok(mode) = u32::from_str_radix(mode_str, 8) {
            use std::os::unix::fs::PermissionsExt;
            let resolved = engine.guard.resolve(&file.path)?;
            std::fs::set_permissions(resolved, std::fs::Permissions::from_mode(mode)).map_err(Error::Io)?;
        }
    }
    #[cfg(not(unix))]
    let _ = (engine, file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::types::{Change, ExecutionOptions};

    fn engine_for(dir: &std::path::Path) -> FileOpsEngine {
        FileOpsEngine::new(EngineConfig::new(dir)).unwrap()
    }

    #[test]
    fn executes_create_then_edit_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let request = Request {
            operations: vec![
                OperationSpec {
                    id: Some("create".to_string()),
                    depends_on: HashSet::new(),
                    operation: Operation::Create {
                        files: vec![CreateFile { path: "a.txt".into(), content: Some("hello".into()), template: None, mode: None }],
                    },
                },
                OperationSpec {
                    id: Some("edit".to_string()),
                    depends_on: HashSet::from(["create".to_string()]),
                    operation: Operation::Edit {
                        edits: vec![FileEdit {
                            file: "a.txt".into(),
                            create_if_missing: false,
                            changes: vec![Change::FindReplace { find: "hello".into(), replace: "world".into(), regex: false, replace_all: false }],
                        }],
                        validate_syntax: false,
                        preserve_formatting: false,
                        dry_run: false,
                    },
                },
            ],
            options: ExecutionOptions::default(),
        };

        let result = engine.execute(&request, &AtomicBool::new(false), &SilentProgress::new()).unwrap();
        assert!(result.success);
        assert_eq!(result.summary.successful, 2);
        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "world");
    }

    #[test]
    fn transaction_rolls_back_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        std::fs::write(dir.path().join("a.txt"), "original").unwrap();

        let mut options = ExecutionOptions::default();
        options.transaction = true;
        let request = Request {
            operations: vec![
                OperationSpec {
                    id: Some("edit".to_string()),
                    depends_on: HashSet::new(),
                    operation: Operation::Edit {
                        edits: vec![FileEdit {
                            file: "a.txt".into(),
                            create_if_missing: false,
                            changes: vec![Change::FindReplace { find: "original".into(), replace: "mutated".into(), regex: false, replace_all: false }],
                        }],
                        validate_syntax: false,
                        preserve_formatting: false,
                        dry_run: false,
                    },
                },
                OperationSpec {
                    id: Some("bad-delete".to_string()),
                    depends_on: HashSet::new(),
                    operation: Operation::Delete { paths: vec!["missing-dir/*.txt".to_string()] },
                },
                OperationSpec {
                    id: Some("doomed".to_string()),
                    depends_on: HashSet::new(),
                    operation: Operation::Create {
                        files: vec![CreateFile { path: "a.txt".into(), content: Some("x".into()), template: None, mode: None }],
                    },
                },
            ],
            options,
        };

        let result = engine.execute(&request, &AtomicBool::new(false), &SilentProgress::new()).unwrap();
        assert!(!result.success);
        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "original");
    }

    #[test]
    fn delete_glob_removes_matched_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        std::fs::write(dir.path().join("a.log"), "x").unwrap();
        std::fs::write(dir.path().join("b.log"), "x").unwrap();

        let request = Request {
            operations: vec![OperationSpec {
                id: None,
                depends_on: HashSet::new(),
                operation: Operation::Delete { paths: vec!["*.log".to_string()] },
            }],
            options: ExecutionOptions::default(),
        };
        let result = engine.execute(&request, &AtomicBool::new(false), &SilentProgress::new()).unwrap();
        assert!(result.success);
        assert!(!dir.path().join("a.log").exists());
        assert!(!dir.path().join("b.log").exists());
    }
}
