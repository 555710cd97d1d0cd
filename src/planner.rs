// src/planner.rs

//! Request Validator & Planner (§4.7): schema validation, dependency
//! resolution, and topological ordering of a batch request.
//!
//! Follows a phased validate-then-order structure: schema checks first,
//! then dependency resolution, then the topological sort, so a malformed
//! request never reaches the scheduler.

use crate::depgraph::DependencyGraph;
use crate::error::{Error, Result};
use crate::path_guard::PathGuard;
use crate::types::{Change, CreateFile, Operation, OperationSpec, Request};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// One operation's place in the plan: its index into `Request::operations`,
/// resolved id, and the indices of operations it depends on.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub index: usize,
    pub id: String,
    pub depends_on: HashSet<usize>,
}

/// The DAG plus a valid topological order (§4.7 Phase 3).
#[derive(Debug)]
pub struct ExecutionPlan {
    pub operations: Vec<PlannedOperation>,
    /// Indices in a valid topological order (not necessarily the only one).
    pub topological_order: Vec<usize>,
    /// `dependents[i]` = indices of operations that list `i` in `dependsOn`.
    pub dependents: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Operations with no unmet dependency, i.e. in-degree 0 initially.
    pub fn initial_ready_set(&self) -> Vec<usize> {
        self.operations
            .iter()
            .filter(|op| op.depends_on.is_empty())
            .map(|op| op.index)
            .collect()
    }
}

/// Validates a request's schema and dependency graph, then produces an
/// [`ExecutionPlan`] (§4.7).
pub struct Planner<'a> {
    guard: &'a PathGuard,
}

impl<'a> Planner<'a> {
    pub fn new(guard: &'a PathGuard) -> Self {
        Self { guard }
    }

    pub fn plan(&self, request: &Request) -> Result<ExecutionPlan> {
        for spec in &request.operations {
            self.validate_schema(spec)?;
        }
        self.validate_max_concurrency(request)?;

        let ids = self.resolve_ids(request);
        self.validate_dependencies(request, &ids)?;

        let planned = self.build_planned_operations(request, &ids);
        let topological_order = self.topological_sort(&planned)?;
        let dependents = self.build_dependents(&planned);

        Ok(ExecutionPlan { operations: planned, topological_order, dependents })
    }

    /// Phase 1: schema validation (§4.7).
    fn validate_schema(&self, spec: &OperationSpec) -> Result<()> {
        match &spec.operation {
            Operation::Analyze { paths, patterns, .. } => {
                if paths.is_empty() {
                    return Err(Error::SchemaInvalid("analyze.paths must not be empty".into()));
                }
                for pattern in patterns {
                    Regex::new(pattern)
                        .map_err(|e| Error::RegexInvalid { pattern: pattern.clone(), reason: e.to_string() })?;
                }
            }
            Operation::Edit { edits, .. } => {
                if edits.is_empty() {
                    return Err(Error::SchemaInvalid("edit.edits must not be empty".into()));
                }
                for edit in edits {
                    self.guard.resolve(&edit.file)?;
                    for change in &edit.changes {
                        self.validate_change(change)?;
                    }
                }
            }
            Operation::Create { files } => {
                if files.is_empty() {
                    return Err(Error::SchemaInvalid("create.files must not be empty".into()));
                }
                for file in files {
                    self.guard.resolve(&file.path)?;
                    self.validate_create_file(file)?;
                }
            }
            Operation::Delete { paths } => {
                if paths.is_empty() {
                    return Err(Error::SchemaInvalid("delete.paths must not be empty".into()));
                }
            }
            Operation::Validate { files, commands, checks, .. } => {
                if files.is_empty() && commands.is_empty() && checks.is_empty() {
                    return Err(Error::SchemaInvalid(
                        "validate must specify at least one of files/commands/checks".into(),
                    ));
                }
                for file in files {
                    self.guard.resolve(file)?;
                }
            }
        }
        Ok(())
    }

    fn validate_change(&self, change: &Change) -> Result<()> {
        match change {
            Change::FindReplace { find, regex, .. } => {
                if find.is_empty() {
                    return Err(Error::SchemaInvalid("find-replace.find must not be empty".into()));
                }
                if *regex {
                    Regex::new(find).map_err(|e| Error::RegexInvalid { pattern: find.clone(), reason: e.to_string() })?;
                }
            }
            Change::Line { line, .. } => {
                if *line == 0 {
                    return Err(Error::OutOfRange("line numbers are 1-indexed".into()));
                }
            }
            Change::Position { start, end, .. } => {
                if start > end {
                    return Err(Error::OutOfRange(format!("position start {start} > end {end}")));
                }
            }
            Change::Ast { .. } => {}
        }
        Ok(())
    }

    fn validate_create_file(&self, file: &CreateFile) -> Result<()> {
        if let Some(mode) = &file.mode {
            let valid_len = mode.len() == 3 || mode.len() == 4;
            let valid_digits = mode.chars().all(|c| ('0'..='7').contains(&c));
            if !valid_len || !valid_digits {
                return Err(Error::SchemaInvalid(format!("invalid file mode '{mode}'")));
            }
        }
        Ok(())
    }

    fn validate_max_concurrency(&self, request: &Request) -> Result<()> {
        if request.options.max_concurrency == 0 {
            return Err(Error::SchemaInvalid("options.maxConcurrency must be >= 1".into()));
        }
        Ok(())
    }

    /// Assign a stable id to every operation: its declared `id`, or a
    /// synthetic one derived from its position for operations that don't
    /// name one (unreferenceable by other operations' `dependsOn`, but
    /// still needed as a DAG node).
    fn resolve_ids(&self, request: &Request) -> Vec<String> {
        request
            .operations
            .iter()
            .enumerate()
            .map(|(idx, spec)| spec.id.clone().unwrap_or_else(|| format!("__op{idx}")))
            .collect()
    }

    /// Phase 2: dependency resolution (§4.7).
    fn validate_dependencies(&self, request: &Request, ids: &[String]) -> Result<()> {
        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();

        for (idx, spec) in request.operations.iter().enumerate() {
            for dep in &spec.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(Error::DependencyMissing { from: ids[idx].clone(), missing: dep.clone() });
                }
            }
        }

        let mut graph = DependencyGraph::new();
        for (idx, spec) in request.operations.iter().enumerate() {
            graph.node(&ids[idx]);
            for dep in &spec.depends_on {
                graph.add_edge(&ids[idx], dep);
            }
        }
        if let Some(cycle) = graph.find_cycles().into_iter().next() {
            return Err(Error::DependencyCycle(cycle.0.join(" -> ")));
        }

        Ok(())
    }

    fn build_planned_operations(&self, request: &Request, ids: &[String]) -> Vec<PlannedOperation> {
        let index_of: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(idx, id)| (id.as_str(), idx)).collect();

        request
            .operations
            .iter()
            .enumerate()
            .map(|(idx, spec)| PlannedOperation {
                index: idx,
                id: ids[idx].clone(),
                depends_on: spec.depends_on.iter().filter_map(|d| index_of.get(d.as_str()).copied()).collect(),
            })
            .collect()
    }

    /// Phase 3: Kahn's algorithm topological sort (§4.7).
    fn topological_sort(&self, planned: &[PlannedOperation]) -> Result<Vec<usize>> {
        let n = planned.len();
        let mut in_degree: Vec<usize> = planned.iter().map(|op| op.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for op in planned {
            for &dep in &op.depends_on {
                dependents[dep].push(op.index);
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(next) = queue.pop() {
            order.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if order.len() != n {
            // Dependency validation above should have already caught any
            // cycle; this is a defensive fallback, not expected in practice.
            return Err(Error::DependencyCycle("unresolved after dependency validation".into()));
        }

        Ok(order)
    }

    fn build_dependents(&self, planned: &[PlannedOperation]) -> Vec<Vec<usize>> {
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); planned.len()];
        for op in planned {
            for &dep in &op.depends_on {
                dependents[dep].push(op.index);
            }
        }
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionOptions, OperationSpec};
    use std::collections::HashSet as Set;

    fn guard() -> (tempfile::TempDir, PathGuard) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        (dir, guard)
    }

    fn op(id: &str, depends_on: &[&str]) -> OperationSpec {
        OperationSpec {
            id: Some(id.to_string()),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            operation: Operation::Delete { paths: vec!["a.txt".to_string()] },
        }
    }

    #[test]
    fn rejects_unknown_dependency() {
        let (_dir, g) = guard();
        let request = Request { operations: vec![op("a", &["missing"])], options: ExecutionOptions::default() };
        let err = Planner::new(&g).plan(&request).unwrap_err();
        assert_eq!(err.kind(), "DependencyMissing");
    }

    #[test]
    fn rejects_dependency_cycle() {
        let (_dir, g) = guard();
        let request = Request {
            operations: vec![op("a", &["b"]), op("b", &["a"])],
            options: ExecutionOptions::default(),
        };
        let err = Planner::new(&g).plan(&request).unwrap_err();
        assert_eq!(err.kind(), "DependencyCycle");
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let (_dir, g) = guard();
        let request = Request {
            operations: vec![op("a", &[]), op("b", &["a"]), op("c", &["b"])],
            options: ExecutionOptions::default(),
        };
        let plan = Planner::new(&g).plan(&request).unwrap();
        let pos_a = plan.topological_order.iter().position(|&i| i == 0).unwrap();
        let pos_b = plan.topological_order.iter().position(|&i| i == 1).unwrap();
        let pos_c = plan.topological_order.iter().position(|&i| i == 2).unwrap();
        assert!(pos_a < pos_b);
        assert!(pos_b < pos_c);
    }

    #[test]
    fn independent_operations_are_both_initially_ready() {
        let (_dir, g) = guard();
        let request = Request { operations: vec![op("a", &[]), op("b", &[])], options: ExecutionOptions::default() };
        let plan = Planner::new(&g).plan(&request).unwrap();
        let ready: Set<usize> = plan.initial_ready_set().into_iter().collect();
        assert_eq!(ready, Set::from([0, 1]));
    }

    #[test]
    fn rejects_empty_glob_list() {
        let (_dir, g) = guard();
        let spec = OperationSpec {
            id: None,
            depends_on: Set::new(),
            operation: Operation::Analyze { paths: vec![], extract: Set::new(), patterns: vec![], build_dependency_graph: false },
        };
        let request = Request { operations: vec![spec], options: ExecutionOptions::default() };
        let err = Planner::new(&g).plan(&request).unwrap_err();
        assert_eq!(err.kind(), "SchemaInvalid");
    }
}
