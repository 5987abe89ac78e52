//! Task graph and its concurrent executor.
//!
//! Ready tasks run concurrently on a [`JoinSet`]; each stage body is blocking
//! and runs under `spawn_blocking`. A task becomes ready once every
//! dependency succeeded. A failed task marks its whole downstream
//! `upstream_failed` without invoking it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sales_etl_types::state::{TaskAttempt, TaskStatus};
use sales_etl_types::{StageError, TaskId};
use tokio::task::JoinSet;

use super::retry::RetryPolicy;
use crate::error::PipelineError;

/// Directed acyclic graph over [`TaskId`]s.
#[derive(Debug, Clone)]
pub struct Dag {
    /// Topological order.
    order: Vec<TaskId>,
    deps: BTreeMap<TaskId, Vec<TaskId>>,
}

impl Dag {
    /// Build a graph from `(task, dependencies)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Orchestration`] for a duplicate task, a
    /// dependency on an undeclared task, or a cycle.
    pub fn new(edges: &[(TaskId, &[TaskId])]) -> Result<Self, PipelineError> {
        let mut deps: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();
        for (task, task_deps) in edges {
            if deps.insert(*task, task_deps.to_vec()).is_some() {
                return Err(PipelineError::Orchestration(format!(
                    "task {task} declared twice"
                )));
            }
        }
        for (task, task_deps) in &deps {
            if let Some(unknown) = task_deps.iter().find(|d| !deps.contains_key(d)) {
                return Err(PipelineError::Orchestration(format!(
                    "task {task} depends on undeclared task {unknown}"
                )));
            }
        }

        // Kahn's algorithm, taking tasks in declaration order for a stable result.
        let mut order = Vec::with_capacity(edges.len());
        let mut placed = BTreeSet::new();
        while order.len() < edges.len() {
            let next = edges.iter().map(|(task, _)| *task).find(|task| {
                !placed.contains(task) && deps[task].iter().all(|d| placed.contains(d))
            });
            match next {
                Some(task) => {
                    placed.insert(task);
                    order.push(task);
                }
                None => {
                    let stuck: Vec<String> = edges
                        .iter()
                        .filter(|(task, _)| !placed.contains(task))
                        .map(|(task, _)| task.to_string())
                        .collect();
                    return Err(PipelineError::Orchestration(format!(
                        "dependency cycle among: {}",
                        stuck.join(", ")
                    )));
                }
            }
        }

        Ok(Self { order, deps })
    }

    /// `{extract_online, extract_instore} -> transform -> load`.
    ///
    /// # Errors
    ///
    /// Never in practice; shares [`Dag::new`]'s validation.
    pub fn sales_etl() -> Result<Self, PipelineError> {
        Self::new(&[
            (TaskId::ExtractOnline, &[]),
            (TaskId::ExtractInstore, &[]),
            (
                TaskId::Transform,
                &[TaskId::ExtractOnline, TaskId::ExtractInstore],
            ),
            (TaskId::Load, &[TaskId::Transform]),
        ])
    }

    /// Tasks in a topological order.
    #[must_use]
    pub fn tasks(&self) -> &[TaskId] {
        &self.order
    }

    /// Direct dependencies of `task`.
    #[must_use]
    pub fn dependencies(&self, task: TaskId) -> &[TaskId] {
        self.deps.get(&task).map_or(&[], Vec::as_slice)
    }

    /// Every task that transitively depends on `task`.
    #[must_use]
    pub fn downstream(&self, task: TaskId) -> BTreeSet<TaskId> {
        let mut found = BTreeSet::new();
        for &candidate in &self.order {
            if self
                .dependencies(candidate)
                .iter()
                .any(|d| *d == task || found.contains(d))
            {
                found.insert(candidate);
            }
        }
        found
    }
}

/// A blocking stage body per task.
pub trait TaskRunner: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Run one attempt of `task`.
    ///
    /// # Errors
    ///
    /// Returns the stage's [`StageError`]; its `retryable` flag decides
    /// whether the executor tries again.
    fn run(&self, task: TaskId) -> Result<Self::Output, StageError>;
}

/// Final state of one task after the graph settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(StageError),
    UpstreamFailed,
    Skipped,
}

impl<T> TaskOutcome<T> {
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Succeeded(_) => TaskStatus::Succeeded,
            Self::Failed(_) => TaskStatus::Failed,
            Self::UpstreamFailed => TaskStatus::UpstreamFailed,
            Self::Skipped => TaskStatus::Skipped,
        }
    }
}

/// Everything one graph execution produced.
#[derive(Debug)]
pub struct DagReport<T> {
    pub outcomes: BTreeMap<TaskId, TaskOutcome<T>>,
    /// Attempts in completion order; tasks that never ran appear once with
    /// attempt 0.
    pub attempts: Vec<TaskAttempt>,
}

impl<T> DagReport<T> {
    /// First failed task in topological order.
    #[must_use]
    pub fn first_failure(&self, dag: &Dag) -> Option<(TaskId, &StageError)> {
        dag.tasks().iter().find_map(|task| match self.outcomes.get(task) {
            Some(TaskOutcome::Failed(err)) => Some((*task, err)),
            _ => None,
        })
    }

    #[must_use]
    pub fn output(&self, task: TaskId) -> Option<&T> {
        match self.outcomes.get(&task) {
            Some(TaskOutcome::Succeeded(output)) => Some(output),
            _ => None,
        }
    }

    /// Retries beyond each task's first attempt.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        let retries = self.attempts.iter().filter(|a| a.attempt > 1).count();
        u32::try_from(retries).unwrap_or(u32::MAX)
    }
}

/// Run every task of `dag` to a terminal state.
///
/// Tasks in `skip` are not invoked once their dependencies succeed; their
/// downstream is skipped too.
///
/// # Errors
///
/// Returns [`PipelineError::Infrastructure`] only if the runtime loses a task.
/// Stage failures are reported in the [`DagReport`], not as errors.
pub async fn execute<R: TaskRunner>(
    dag: &Dag,
    runner: Arc<R>,
    policy: &RetryPolicy,
    skip: &BTreeSet<TaskId>,
) -> Result<DagReport<R::Output>, PipelineError> {
    let mut outcomes: BTreeMap<TaskId, TaskOutcome<R::Output>> = BTreeMap::new();
    let mut attempts = Vec::new();
    let mut running = BTreeSet::new();
    let mut join_set: JoinSet<TaskResult<R::Output>> = JoinSet::new();

    loop {
        // Topological order lets one pass cascade settled states downstream.
        for &task in dag.tasks() {
            if outcomes.contains_key(&task) || running.contains(&task) {
                continue;
            }
            let deps = dag.dependencies(task);
            let any_dep = |pred: fn(&TaskOutcome<R::Output>) -> bool| {
                deps.iter().any(|d| outcomes.get(d).is_some_and(pred))
            };

            let settled = if any_dep(|o| {
                matches!(o, TaskOutcome::Failed(_) | TaskOutcome::UpstreamFailed)
            }) {
                tracing::warn!(task = %task, "Dependency failed, not running task");
                Some(TaskOutcome::UpstreamFailed)
            } else if any_dep(|o| matches!(o, TaskOutcome::Skipped)) {
                Some(TaskOutcome::Skipped)
            } else if !deps
                .iter()
                .all(|d| matches!(outcomes.get(d), Some(TaskOutcome::Succeeded(_))))
            {
                continue;
            } else if skip.contains(&task) {
                tracing::info!(task = %task, "Skipping task");
                Some(TaskOutcome::Skipped)
            } else {
                None
            };

            match settled {
                Some(outcome) => {
                    attempts.push(TaskAttempt {
                        task,
                        attempt: 0,
                        status: outcome.status(),
                        error_message: None,
                    });
                    outcomes.insert(task, outcome);
                }
                None => {
                    running.insert(task);
                    join_set.spawn(run_with_retry(task, Arc::clone(&runner), *policy));
                }
            }
        }

        match join_set.join_next().await {
            None => break,
            Some(Ok(done)) => {
                running.remove(&done.task);
                attempts.extend(done.attempts);
                let outcome = match done.result {
                    Ok(output) => TaskOutcome::Succeeded(output),
                    Err(err) => TaskOutcome::Failed(err),
                };
                outcomes.insert(done.task, outcome);
            }
            Some(Err(e)) => {
                join_set.abort_all();
                return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                    "task join failed: {e}"
                )));
            }
        }
    }

    Ok(DagReport { outcomes, attempts })
}

struct TaskResult<T> {
    task: TaskId,
    attempts: Vec<TaskAttempt>,
    result: Result<T, StageError>,
}

async fn run_with_retry<R: TaskRunner>(
    task: TaskId,
    runner: Arc<R>,
    policy: RetryPolicy,
) -> TaskResult<R::Output> {
    let mut attempts = Vec::new();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        tracing::info!(task = %task, attempt, "Task started");

        let body = Arc::clone(&runner);
        let result = tokio::task::spawn_blocking(move || body.run(task))
            .await
            .unwrap_or_else(|e| {
                Err(StageError::internal(
                    "TASK_PANICKED",
                    format!("task {task} panicked: {e}"),
                ))
            });

        match result {
            Ok(output) => {
                tracing::info!(task = %task, attempt, "Task succeeded");
                attempts.push(TaskAttempt {
                    task,
                    attempt,
                    status: TaskStatus::Succeeded,
                    error_message: None,
                });
                return TaskResult {
                    task,
                    attempts,
                    result: Ok(output),
                };
            }
            Err(err) => {
                attempts.push(TaskAttempt {
                    task,
                    attempt,
                    status: TaskStatus::Failed,
                    error_message: Some(err.to_string()),
                });
                if policy.should_retry(&err, attempt) {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        task = %task,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        category = %err.category,
                        code = %err.code,
                        commit_state = ?err.commit_state,
                        "Retryable error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                tracing::error!(
                    task = %task,
                    attempt,
                    category = %err.category,
                    code = %err.code,
                    retryable = err.retryable,
                    error = %err,
                    "Task failed"
                );
                return TaskResult {
                    task,
                    attempts,
                    result: Err(err),
                };
            }
        }
    }
}
