//! Budget-governed bulk approval
//!
//! A pass approves tasks one at a time while an external, draining compute
//! budget lasts. The budget is sampled before every unit; once a sample falls
//! below the governance threshold the rest of the pass is skipped and the
//! skipped ids are handed to the [`Scheduler`] as a fresh run. Units are never
//! started without budget, and no accepted id is dropped.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info, warn};

use crate::clock::TimeStamp;
use crate::config::BatchConfig;
use crate::error::SchedulingError;
use crate::service::{ActionRequest, ApprovalService};
use crate::task::{Action, ApprovalMethod, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Budget(pub u64);

impl Budget {
    pub fn allows(self, governance_threshold: u64) -> bool {
        self.0 >= governance_threshold
    }
}

pub trait BudgetOracle {
    /// Remaining budget, queried once per unit right before it starts.
    fn remaining_budget(&self) -> Budget;
}

/// Budget oracle over a fixed allowance that bills `cost_per_unit` each time
/// a unit is admitted by sampling it.
#[derive(Debug)]
pub struct UnitCostMeter {
    remaining: AtomicU64,
    cost_per_unit: u64,
}

impl UnitCostMeter {
    pub fn new(allowance: u64, cost_per_unit: u64) -> Self {
        Self {
            remaining: AtomicU64::new(allowance),
            cost_per_unit,
        }
    }
}

impl BudgetOracle for UnitCostMeter {
    fn remaining_budget(&self) -> Budget {
        let before = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                Some(left.saturating_sub(self.cost_per_unit))
            })
            .unwrap_or_else(|left| left);
        Budget(before)
    }
}

/// One bounded pass over a list of task ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRun {
    pub task_ids: Vec<TaskId>,
    pub limit: usize,
    pub governance_threshold: u64,
    pub actor: String,
}

impl BatchRun {
    pub fn new(task_ids: Vec<TaskId>, actor: impl Into<String>, config: &BatchConfig) -> Self {
        Self {
            task_ids,
            limit: config.limit.max(1),
            governance_threshold: config.governance_threshold,
            actor: actor.into(),
        }
    }

    /// Same configuration over a different set of ids.
    pub fn continuation(&self, task_ids: Vec<TaskId>) -> Self {
        Self {
            task_ids,
            limit: self.limit.max(1),
            governance_threshold: self.governance_threshold,
            actor: self.actor.clone(),
        }
    }
}

/// A queued run, as persisted by a [`Scheduler`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub task_ids: Vec<TaskId>,
    #[n(2)]
    pub limit: u32,
    #[n(3)]
    pub governance_threshold: u64,
    #[n(4)]
    pub actor: String,
    #[n(5)]
    pub submitted_at: TimeStamp,
}

impl BatchJob {
    pub fn to_run(&self) -> BatchRun {
        BatchRun {
            task_ids: self.task_ids.clone(),
            limit: (self.limit as usize).max(1),
            governance_threshold: self.governance_threshold,
            actor: self.actor.clone(),
        }
    }
}

pub trait Scheduler: Send + Sync {
    /// Queues `run` for a later execution window and returns its job id.
    fn submit(&self, run: &BatchRun, submitted_at: TimeStamp) -> Result<String, SchedulingError>;

    fn take_next(&self) -> Result<Option<BatchJob>, SchedulingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Approved,
    Failed(String),
    Skipped,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(TaskId, UnitOutcome)>,
    /// Job id of the rescheduled run carrying the skipped ids.
    pub continuation: Option<String>,
    pub scheduling_error: Option<SchedulingError>,
}

impl BatchReport {
    fn ids_where(&self, pred: impl Fn(&UnitOutcome) -> bool) -> Vec<TaskId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn approved(&self) -> Vec<TaskId> {
        self.ids_where(|o| *o == UnitOutcome::Approved)
    }

    pub fn failed(&self) -> Vec<TaskId> {
        self.ids_where(|o| matches!(o, UnitOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<TaskId> {
        self.ids_where(|o| *o == UnitOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Closed,
}

// once closed the gate stays closed for the rest of the pass and the budget is
// no longer sampled
fn admit(gate: Gate, governance_threshold: u64, sample: impl FnOnce() -> Budget) -> Gate {
    match gate {
        Gate::Closed => Gate::Closed,
        Gate::Open if sample().allows(governance_threshold) => Gate::Open,
        Gate::Open => Gate::Closed,
    }
}

pub struct GovernedBatchProcessor {
    service: Arc<ApprovalService>,
    scheduler: Arc<dyn Scheduler>,
}

impl GovernedBatchProcessor {
    pub fn new(service: Arc<ApprovalService>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { service, scheduler }
    }

    pub fn run(&self, run: &BatchRun, oracle: &dyn BudgetOracle) -> BatchReport {
        let mut report = BatchReport::default();
        let mut gate = Gate::Open;
        // a zero limit would reschedule the same ids forever
        let limit = run.limit.max(1);

        for (position, task_id) in run.task_ids.iter().enumerate() {
            // ids past the limit were never accepted into this pass
            if position >= limit {
                report.outcomes.push((task_id.clone(), UnitOutcome::Skipped));
                continue;
            }

            let before = gate;
            gate = admit(gate, run.governance_threshold, || oracle.remaining_budget());
            if gate == Gate::Closed {
                if before == Gate::Open {
                    warn!(
                        task_id = %task_id,
                        position,
                        threshold = run.governance_threshold,
                        "budget below governance threshold, skipping remaining units"
                    );
                }
                report.outcomes.push((task_id.clone(), UnitOutcome::Skipped));
                continue;
            }

            let request = ActionRequest::new(task_id.clone(), Action::Approve, run.actor.clone())
                .via(ApprovalMethod::Bulk);
            let outcome = match self.service.act(request) {
                Ok(_) => UnitOutcome::Approved,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "bulk approval failed");
                    UnitOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.push((task_id.clone(), outcome));
        }

        let skipped = report.skipped();
        if !skipped.is_empty() {
            let next = run.continuation(skipped);
            match self.scheduler.submit(&next, self.service.clock().now()) {
                Ok(job_id) => {
                    info!(job_id = %job_id, units = next.task_ids.len(), "skipped units rescheduled");
                    report.continuation = Some(job_id);
                }
                Err(e) => {
                    error!(error = %e, units = next.task_ids.len(), "failed to reschedule skipped units");
                    report.scheduling_error = Some(e);
                }
            }
        }

        info!(
            approved = report.approved().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            "batch pass finished"
        );
        report
    }

    /// Runs the oldest queued job, if any.
    pub fn run_next(&self, oracle: &dyn BudgetOracle) -> Result<Option<BatchReport>, SchedulingError> {
        let Some(job) = self.scheduler.take_next()? else {
            return Ok(None);
        };
        info!(job_id = %job.id, units = job.task_ids.len(), "starting queued batch job");
        Ok(Some(self.run(&job.to_run(), oracle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_bills_each_sample() {
        let meter = UnitCostMeter::new(500, 200);
        assert_eq!(meter.remaining_budget(), Budget(500));
        assert_eq!(meter.remaining_budget(), Budget(300));
        assert_eq!(meter.remaining_budget(), Budget(100));
        assert_eq!(meter.remaining_budget(), Budget(0));
    }

    #[test]
    fn closed_gate_stops_sampling() {
        let mut sampled = false;
        let gate = admit(Gate::Closed, 10, || {
            sampled = true;
            Budget(1_000)
        });
        assert_eq!(gate, Gate::Closed);
        assert!(!sampled);
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(admit(Gate::Open, 200, || Budget(200)), Gate::Open);
        assert_eq!(admit(Gate::Open, 200, || Budget(199)), Gate::Closed);
    }

    #[test]
    fn continuation_keeps_configuration() {
        let run = BatchRun {
            task_ids: vec![TaskId::from("a"), TaskId::from("b")],
            limit: 7,
            governance_threshold: 300,
            actor: "alex".into(),
        };
        let next = run.continuation(vec![TaskId::from("b")]);
        assert_eq!(next.limit, 7);
        assert_eq!(next.governance_threshold, 300);
        assert_eq!(next.actor, "alex");
        assert_eq!(next.task_ids, vec![TaskId::from("b")]);
    }

    #[test]
    fn continuation_never_carries_a_zero_limit() {
        let run = BatchRun {
            task_ids: vec![TaskId::from("a")],
            limit: 0,
            governance_threshold: 200,
            actor: "alex".into(),
        };
        assert_eq!(run.continuation(vec![TaskId::from("a")]).limit, 1);
    }
}
