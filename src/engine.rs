// src/engine.rs

//! Parallel Execution Engine (§4.8): dispatches a planned DAG wave by wave,
//! respecting a concurrency budget and the path-collision rule, and wires
//! in transaction rollback / cancel-on-failure / abort / timeout semantics.
//!
//! Uses an `AtomicBool` cancellation token and the same progress-reporting
//! shape as the rest of the engine, combined with `rayon` for bounded
//! fan-out and `flume` as the completion channel between spawned tasks and
//! the scheduler loop (§9 "event callbacks & async iterators → message
//! channels").

use crate::planner::ExecutionPlan;
use crate::types::{ExecutionOptions, OperationResult, OperationStatus};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Executes one operation and reports what paths it touches. Implemented
/// by the facade, which owns the File System Service, Cache, Editor,
/// Analyzer, and Validator this dispatches into.
pub trait OperationRunner: Sync {
    fn affected_paths(&self, index: usize) -> HashSet<String>;
    fn is_read_only(&self, index: usize) -> bool;
    fn run(&self, index: usize) -> OperationResult;
}

/// What stopped the batch, if anything other than full completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Aborted,
    TimedOut,
    FailedUnderTransaction,
    FailedWithoutContinue,
}

/// Result of running a full batch through the engine.
pub struct EngineOutcome {
    pub results: Vec<OperationResult>,
    pub stop_reason: StopReason,
}

impl EngineOutcome {
    pub fn failed(&self) -> bool {
        !matches!(self.stop_reason, StopReason::Completed)
    }
}

/// Topological scheduler with bounded concurrency (§4.8).
pub struct ExecutionEngine<'a> {
    plan: &'a ExecutionPlan,
    options: &'a ExecutionOptions,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(plan: &'a ExecutionPlan, options: &'a ExecutionOptions) -> Self {
        Self { plan, options }
    }

    /// Run the batch. `abort` is checked before each wave; `deadline` (if
    /// set) enforces `timeoutMs` with the same cancellation semantics.
    pub fn run(&self, runner: &dyn OperationRunner, abort: &AtomicBool, deadline: Option<Instant>) -> EngineOutcome {
        let n = self.plan.operations.len();
        let mut in_degree: Vec<usize> = self.plan.operations.iter().map(|op| op.depends_on.len()).collect();
        let mut ready: VecDeque<usize> = self.plan.initial_ready_set().into_iter().collect();
        let mut results: Vec<Option<OperationResult>> = (0..n).map(|_| None).collect();
        let max_concurrency = if self.options.parallel { self.options.max_concurrency.max(1) } else { 1 };

        let mut stop_reason = StopReason::Completed;

        'dispatch: while !ready.is_empty() {
            if abort.load(Ordering::SeqCst) {
                stop_reason = StopReason::Aborted;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() > d) {
                stop_reason = StopReason::TimedOut;
                break;
            }

            let batch = self.select_batch(runner, &mut ready, max_concurrency);
            let batch_results = self.dispatch_batch(runner, &batch);

            for (index, result) in batch_results {
                let failed = result.status == OperationStatus::Failed;
                results[index] = Some(result);

                if failed {
                    if self.options.transaction {
                        stop_reason = StopReason::FailedUnderTransaction;
                        break 'dispatch;
                    }
                    if !self.options.continue_on_error {
                        stop_reason = StopReason::FailedWithoutContinue;
                        break 'dispatch;
                    }
                }

                for &dependent in &self.plan.dependents[index] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if stop_reason != StopReason::Completed {
            self.cancel_remaining(&mut results);
        }

        EngineOutcome {
            results: results.into_iter().map(|r| r.expect("every operation has a terminal result")).collect(),
            stop_reason,
        }
    }

    /// Greedily pick up to `max_concurrency` ready operations whose
    /// affected-path sets are mutually disjoint (or both read-only),
    /// leaving the rest in `ready` for the next wave (§4.8 path-collision
    /// rule). If every ready operation collides with the first, dispatch
    /// that one alone rather than livelocking.
    fn select_batch(&self, runner: &dyn OperationRunner, ready: &mut VecDeque<usize>, max_concurrency: usize) -> Vec<usize> {
        let mut batch = Vec::new();
        let mut batch_paths: Vec<HashSet<String>> = Vec::new();
        let mut deferred = VecDeque::new();

        while let Some(index) = ready.pop_front() {
            if batch.len() >= max_concurrency {
                deferred.push_back(index);
                continue;
            }
            let paths = runner.affected_paths(index);
            let read_only = runner.is_read_only(index);
            let collides = batch.iter().zip(&batch_paths).any(|(&other, other_paths)| {
                if read_only && runner.is_read_only(other) {
                    false
                } else {
                    !paths.is_disjoint(other_paths)
                }
            });
            if collides {
                deferred.push_back(index);
            } else {
                batch.push(index);
                batch_paths.push(paths);
            }
        }

        if batch.is_empty() {
            if let Some(index) = deferred.pop_front() {
                batch.push(index);
            }
        }

        ready.extend(deferred);
        batch
    }

    fn dispatch_batch(&self, runner: &dyn OperationRunner, batch: &[usize]) -> Vec<(usize, OperationResult)> {
        if batch.len() <= 1 {
            return batch.iter().map(|&index| (index, runner.run(index))).collect();
        }

        let (tx, rx) = flume::unbounded();
        rayon::scope(|scope| {
            for &index in batch {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = runner.run(index);
                    let _ = tx.send((index, result));
                });
            }
        });
        drop(tx);
        rx.iter().collect()
    }

    fn cancel_remaining(&self, results: &mut [Option<OperationResult>]) {
        for (index, slot) in results.iter_mut().enumerate() {
            if slot.is_none() {
                let spec = &self.plan.operations[index];
                *slot = Some(OperationResult {
                    id: Some(spec.id.clone()),
                    type_name: String::new(),
                    status: OperationStatus::Cancelled,
                    data: None,
                    error: None,
                    duration_ms: 0,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_guard::PathGuard;
    use crate::types::{Operation, OperationSpec, Request};
    use std::sync::Mutex;

    struct FakeRunner {
        paths: Vec<HashSet<String>>,
        read_only: Vec<bool>,
        should_fail: HashSet<usize>,
        call_order: Mutex<Vec<usize>>,
    }

    impl OperationRunner for FakeRunner {
        fn affected_paths(&self, index: usize) -> HashSet<String> {
            self.paths[index].clone()
        }
        fn is_read_only(&self, index: usize) -> bool {
            self.read_only[index]
        }
        fn run(&self, index: usize) -> OperationResult {
            self.call_order.lock().unwrap().push(index);
            let status = if self.should_fail.contains(&index) { OperationStatus::Failed } else { OperationStatus::Completed };
            OperationResult { id: Some(index.to_string()), type_name: "delete".into(), status, data: None, error: None, duration_ms: 0 }
        }
    }

    fn spec(id: &str, depends_on: &[&str]) -> OperationSpec {
        OperationSpec {
            id: Some(id.to_string()),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            operation: Operation::Delete { paths: vec!["x".to_string()] },
        }
    }

    fn plan_for(specs: Vec<OperationSpec>) -> ExecutionPlan {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let request = Request { operations: specs, options: ExecutionOptions::default() };
        crate::planner::Planner::new(&guard).plan(&request).unwrap()
    }

    #[test]
    fn runs_all_operations_to_completion() {
        let plan = plan_for(vec![spec("a", &[]), spec("b", &["a"])]);
        let options = ExecutionOptions::default();
        let runner = FakeRunner {
            paths: vec![HashSet::from(["a.txt".to_string()]), HashSet::from(["b.txt".to_string()])],
            read_only: vec![false, false],
            should_fail: HashSet::new(),
            call_order: Mutex::new(Vec::new()),
        };
        let engine = ExecutionEngine::new(&plan, &options);
        let outcome = engine.run(&runner, &AtomicBool::new(false), None);
        assert!(!outcome.failed());
        assert_eq!(outcome.results.len(), 2);
        assert!(*runner.call_order.lock().unwrap() == vec![0, 1]);
    }

    #[test]
    fn failure_without_continue_cancels_remaining() {
        let plan = plan_for(vec![spec("a", &[]), spec("b", &[])]);
        let mut options = ExecutionOptions::default();
        options.continue_on_error = false;
        let runner = FakeRunner {
            paths: vec![HashSet::from(["a.txt".to_string()]), HashSet::from(["b.txt".to_string()])],
            read_only: vec![false, false],
            should_fail: HashSet::from([0]),
            call_order: Mutex::new(Vec::new()),
        };
        let engine = ExecutionEngine::new(&plan, &options);
        let outcome = engine.run(&runner, &AtomicBool::new(false), None);
        assert!(outcome.failed());
        assert!(outcome.results.iter().any(|r| r.status == OperationStatus::Cancelled));
    }

    #[test]
    fn continue_on_error_runs_remaining_after_failure() {
        let plan = plan_for(vec![spec("a", &[]), spec("b", &[])]);
        let mut options = ExecutionOptions::default();
        options.continue_on_error = true;
        let runner = FakeRunner {
            paths: vec![HashSet::from(["a.txt".to_string()]), HashSet::from(["b.txt".to_string()])],
            read_only: vec![false, false],
            should_fail: HashSet::from([0]),
            call_order: Mutex::new(Vec::new()),
        };
        let engine = ExecutionEngine::new(&plan, &options);
        let outcome = engine.run(&runner, &AtomicBool::new(false), None);
        assert!(outcome.results.iter().all(|r| r.status != OperationStatus::Cancelled));
    }

    #[test]
    fn colliding_paths_do_not_dispatch_in_the_same_wave() {
        let plan = plan_for(vec![spec("a", &[]), spec("b", &[])]);
        let mut options = ExecutionOptions::default();
        options.parallel = true;
        options.max_concurrency = 4;
        let runner = FakeRunner {
            paths: vec![HashSet::from(["same.txt".to_string()]), HashSet::from(["same.txt".to_string()])],
            read_only: vec![false, false],
            should_fail: HashSet::new(),
            call_order: Mutex::new(Vec::new()),
        };
        let engine = ExecutionEngine::new(&plan, &options);
        let outcome = engine.run(&runner, &AtomicBool::new(false), None);
        assert!(!outcome.failed());
        assert_eq!(outcome.results.len(), 2);
    }

    #[test]
    fn abort_signal_cancels_remaining_operations() {
        let plan = plan_for(vec![spec("a", &[]), spec("b", &["a"])]);
        let options = ExecutionOptions::default();
        let abort = AtomicBool::new(true);
        let runner = FakeRunner {
            paths: vec![HashSet::new(), HashSet::new()],
            read_only: vec![false, false],
            should_fail: HashSet::new(),
            call_order: Mutex::new(Vec::new()),
        };
        let engine = ExecutionEngine::new(&plan, &options);
        let outcome = engine.run(&runner, &abort, None);
        assert!(outcome.results.iter().all(|r| r.status == OperationStatus::Cancelled));
    }
}
