//! Lane scheduler with bounded concurrency.
//!
//! A single dispatcher thread owns the [`AggregateState`] and hands tasks to
//! a fixed pool of lane threads:
//!
//! ```text
//!                ┌── bounded(1) ──► lane 0 ──┐
//! dispatcher ────┼── bounded(1) ──► lane 1 ──┼──► outcomes ──► dispatcher
//!                └── bounded(1) ──► lane N ──┘
//! ```
//!
//! A lane gets its next task only after the dispatcher has received the
//! outcome of its previous one, so at most `parallelism` tasks are ever in
//! flight. Failed executions are retried with the same seed up to the retry
//! bound. Results are accounted on the dispatcher thread only, and each task
//! id at most once.

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::metrics::DispatchReport;
use crate::engine::partition::Task;
use crate::engine::reducer::AggregateState;
use crate::engine::sampler::{ExecutionLane, LaneError, PartialResult};
use crate::error::{EstimateError, EstimateResult};

/// Caller-held handle that stops a run from dispatching further tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks in flight (lane count).
    pub parallelism: usize,
    /// Re-executions allowed per task after a failure.
    pub retry_bound: u32,
    /// Optional wall-clock budget for the whole dispatch.
    pub budget: Option<Duration>,
    /// How often the dispatcher wakes to check cancellation and budget.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4),
            retry_bound: 1,
            budget: None,
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Assignment {
    index: usize,
    attempt: u32,
}

#[derive(Debug)]
struct Outcome {
    lane: usize,
    assignment: Assignment,
    result: Result<PartialResult, LaneError>,
}

/// Dispatcher over a bounded pool of execution lanes.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `parallelism` is zero.
    pub fn new(config: SchedulerConfig) -> EstimateResult<Self> {
        if config.parallelism == 0 {
            return Err(EstimateError::config("parallelism must be at least 1"));
        }
        Ok(Self { config })
    }

    /// Scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Execute every task on `lane` and account the results into `state`.
    ///
    /// On return with `Ok`, `state` is frozen. On error no estimate is
    /// available: in-flight executions finish their sampling loop and their
    /// results are dropped.
    ///
    /// # Errors
    ///
    /// - `TaskFailure` if a task fails more than `retry_bound` times
    /// - `Cancelled` if `cancel` fires before the run completes
    /// - `BudgetExceeded` if the budget elapses before the run completes
    /// - `GraphCorruption` if `state` does not expect exactly `tasks.len()` results
    /// - `InvalidConfiguration` if `tasks` is empty
    pub fn dispatch<L>(
        &self,
        tasks: &[Task],
        lane: &L,
        state: &mut AggregateState,
        cancel: &CancelToken,
    ) -> EstimateResult<DispatchReport>
    where
        L: ExecutionLane + ?Sized,
    {
        if state.expected_task_count() != tasks.len() as u64 {
            return Err(EstimateError::corruption(format!(
                "state for run {} expects {} results but {} tasks were partitioned",
                state.run_id(),
                state.expected_task_count(),
                tasks.len()
            )));
        }

        if tasks.is_empty() {
            return Err(EstimateError::config("no tasks to dispatch"));
        }

        let lane_count = self.config.parallelism.min(tasks.len());
        let mut report = DispatchReport::with_lanes(lane_count);

        tracing::info!(
            run_id = state.run_id(),
            tasks = tasks.len(),
            lanes = lane_count,
            lane_kind = %lane.kind(),
            "dispatching run"
        );

        let (outcome_tx, outcome_rx) = unbounded::<Outcome>();

        std::thread::scope(|s| {
            let mut lane_txs: Vec<Sender<Assignment>> = Vec::with_capacity(lane_count);

            for lane_id in 0..lane_count {
                let (tx, rx) = bounded::<Assignment>(1);
                lane_txs.push(tx);
                let outcome_tx = outcome_tx.clone();

                s.spawn(move || {
                    while let Ok(assignment) = rx.recv() {
                        let task = &tasks[assignment.index];
                        let result = catch_unwind(AssertUnwindSafe(|| lane.execute(task)))
                            .unwrap_or_else(|_| {
                                Err(LaneError::Fault {
                                    task_id: task.id(),
                                    message: "lane panicked".to_string(),
                                })
                            });
                        let outcome = Outcome {
                            lane: lane_id,
                            assignment,
                            result,
                        };
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(outcome_tx);

            // Lanes exit once their sender is dropped, which happens on every
            // return path out of this closure.
            self.run_dispatcher(tasks, &lane_txs, &outcome_rx, state, cancel, &mut report)
        })?;

        tracing::info!(
            run_id = state.run_id(),
            completed = report.completed,
            retries = report.retries,
            "run complete"
        );
        Ok(report)
    }

    fn run_dispatcher(
        &self,
        tasks: &[Task],
        lane_txs: &[Sender<Assignment>],
        outcomes: &crossbeam_channel::Receiver<Outcome>,
        state: &mut AggregateState,
        cancel: &CancelToken,
        report: &mut DispatchReport,
    ) -> EstimateResult<()> {
        let start = Instant::now();
        // A budget past the end of the clock never expires.
        let deadline = self.config.budget.and_then(|b| start.checked_add(b));
        let total = tasks.len() as u64;

        let mut pending: VecDeque<Assignment> = (0..tasks.len())
            .map(|index| Assignment { index, attempt: 0 })
            .collect();
        let mut idle: VecDeque<usize> = (0..lane_txs.len()).collect();

        while !state.is_frozen() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    run_id = state.run_id(),
                    completed = state.completed_task_count(),
                    "run cancelled"
                );
                return Err(EstimateError::Cancelled {
                    completed: state.completed_task_count(),
                    total,
                });
            }

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Err(self.budget_exceeded(state, report, total));
                }
            }

            while !pending.is_empty() && !idle.is_empty() {
                let (Some(lane), Some(assignment)) = (idle.pop_front(), pending.pop_front()) else {
                    break;
                };
                if lane_txs[lane].send(assignment).is_err() {
                    return Err(EstimateError::TaskFailure {
                        task_id: tasks[assignment.index].id(),
                        attempts: assignment.attempt,
                        reason: format!("lane {lane} is no longer running"),
                    });
                }
                report.dispatched += 1;
            }

            let mut wait = self.config.poll_interval;
            if let Some(deadline) = deadline {
                wait = wait.min(deadline.saturating_duration_since(now));
            }

            let outcome = match outcomes.recv_timeout(wait) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EstimateError::corruption(
                        "every lane exited before the run completed",
                    ));
                }
            };
            idle.push_back(outcome.lane);

            let task = &tasks[outcome.assignment.index];
            let result = match outcome.result {
                Ok(partial)
                    if partial.task_id != task.id() && state.has_accounted(partial.task_id) =>
                {
                    report.discarded += 1;
                    Err(LaneError::Fault {
                        task_id: task.id(),
                        message: format!("stale result for accounted task {}", partial.task_id),
                    })
                }
                Ok(partial) if !partial.is_consistent_with(task) => Err(LaneError::Fault {
                    task_id: task.id(),
                    message: format!(
                        "inconsistent result: {} inside of {} samples for task {}",
                        partial.in_circle_count, partial.sample_count, partial.task_id
                    ),
                }),
                other => other,
            };

            match result {
                Ok(partial) => {
                    state.absorb(partial)?;
                    report.completed += 1;
                    report.per_lane_completed[outcome.lane] += 1;
                    tracing::debug!(
                        task_id = partial.task_id,
                        lane = outcome.lane,
                        in_circle = partial.in_circle_count,
                        "task accounted"
                    );
                }
                Err(err) => {
                    let attempts = outcome.assignment.attempt + 1;
                    if outcome.assignment.attempt >= self.config.retry_bound {
                        tracing::warn!(task_id = task.id(), attempts, error = %err, "task failed");
                        return Err(EstimateError::TaskFailure {
                            task_id: task.id(),
                            attempts,
                            reason: err.to_string(),
                        });
                    }
                    tracing::warn!(task_id = task.id(), attempts, error = %err, "retrying task");
                    report.retries += 1;
                    pending.push_front(Assignment {
                        index: outcome.assignment.index,
                        attempt: attempts,
                    });
                }
            }
        }

        Ok(())
    }

    fn budget_exceeded(
        &self,
        state: &AggregateState,
        report: &DispatchReport,
        total: u64,
    ) -> EstimateError {
        let budget_secs = self.config.budget.map_or(0.0, |b| b.as_secs_f64());
        tracing::warn!(
            run_id = state.run_id(),
            budget_secs,
            completed = state.completed_task_count(),
            "budget exceeded"
        );
        EstimateError::BudgetExceeded {
            budget_secs,
            completed: state.completed_task_count(),
            dispatched: report.dispatched,
            total,
        }
    }
}
