//! Storage seams and their sled-backed implementation
use std::sync::Arc;

use chrono::NaiveDate;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use tracing::debug;

use crate::batch::{BatchJob, BatchRun, Scheduler};
use crate::clock::TimeStamp;
use crate::delegation::{Delegation, DelegationStore};
use crate::error::{SchedulingError, StoreError};
use crate::task::{ApprovalStatus, ApprovalTask, TaskId, TaskUpdate};
use crate::utils;

/// The system of record's view of approval tasks.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: &ApprovalTask) -> Result<(), StoreError>;

    fn load(&self, id: &TaskId) -> Result<ApprovalTask, StoreError>;

    /// At most one task holding `token`, in `require_status`, whose token
    /// expires on or after `valid_at`.
    fn find_by_token(
        &self,
        token: &str,
        require_status: ApprovalStatus,
        valid_at: TimeStamp,
    ) -> Result<Option<ApprovalTask>, StoreError>;

    /// Applies `update` as one atomic write and returns the stored task.
    ///
    /// With `expected` set the write only lands while the task is still in
    /// that status, otherwise it fails with [`StoreError::StatusChanged`].
    fn write(
        &self,
        id: &TaskId,
        update: &TaskUpdate,
        expected: Option<ApprovalStatus>,
    ) -> Result<ApprovalTask, StoreError>;

    /// Tasks awaiting approval, submitted on or before `submitted_before`,
    /// that have had fewer than `reminder_count_below` reminders.
    fn list_pending(
        &self,
        submitted_before: TimeStamp,
        reminder_count_below: u32,
    ) -> Result<Vec<ApprovalTask>, StoreError>;
}

pub struct SledStore {
    tasks: sled::Tree,
    token_index: sled::Tree, // sha256(token) -> task id
    delegations: sled::Tree,
    jobs: sled::Tree, // uuid7 bytes -> batch job, so iteration follows submission order
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn abort<T>(error: StoreError) -> ConflictableTransactionResult<T, StoreError> {
    Err(ConflictableTransactionError::Abort(error))
}

fn token_key(token: &str) -> String {
    sha256::digest(token)
}

impl SledStore {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self, StoreError> {
        Ok(Self {
            tasks: instance.open_tree("tasks")?,
            token_index: instance.open_tree("token_index")?,
            delegations: instance.open_tree("delegations")?,
            jobs: instance.open_tree("batch_jobs")?,
        })
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }
}

impl TaskStore for SledStore {
    fn insert(&self, task: &ApprovalTask) -> Result<(), StoreError> {
        self.tasks.insert(task.id.as_str().as_bytes(), encode(task)?)?;
        Ok(())
    }

    fn load(&self, id: &TaskId) -> Result<ApprovalTask, StoreError> {
        let raw = self
            .tasks
            .get(id.as_str().as_bytes())?
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        Ok(minicbor::decode(&raw)?)
    }

    fn find_by_token(
        &self,
        token: &str,
        require_status: ApprovalStatus,
        valid_at: TimeStamp,
    ) -> Result<Option<ApprovalTask>, StoreError> {
        let Some(raw_id) = self.token_index.get(token_key(token).as_bytes())? else {
            return Ok(None);
        };
        let id = TaskId(String::from_utf8_lossy(&raw_id).into_owned());
        let task = match self.load(&id) {
            Ok(task) => task,
            Err(StoreError::TaskNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let matches = task.status == require_status
            && task
                .token
                .as_ref()
                .is_some_and(|t| t.value == token && t.expires_at >= valid_at);
        Ok(matches.then_some(task))
    }

    fn write(
        &self,
        id: &TaskId,
        update: &TaskUpdate,
        expected: Option<ApprovalStatus>,
    ) -> Result<ApprovalTask, StoreError> {
        let key = id.as_str().as_bytes();

        let result = (&self.tasks, &self.token_index).transaction(|(tasks, tokens)| {
            let Some(raw) = tasks.get(key)? else {
                return abort(StoreError::TaskNotFound(id.clone()));
            };
            let mut task: ApprovalTask = match minicbor::decode(&raw) {
                Ok(task) => task,
                Err(e) => return abort(StoreError::Decode(e)),
            };
            if let Some(expected) = expected {
                if task.status != expected {
                    return abort(StoreError::StatusChanged {
                        id: id.clone(),
                        expected,
                        found: task.status,
                    });
                }
            }

            let old_token = task.token.as_ref().map(|t| token_key(&t.value));
            update.apply_to(&mut task);
            let new_token = task.token.as_ref().map(|t| token_key(&t.value));

            if old_token != new_token {
                if let Some(old) = &old_token {
                    tokens.remove(old.as_bytes())?;
                }
                if let Some(new) = &new_token {
                    tokens.insert(new.as_bytes(), key)?;
                }
            }

            let encoded = match encode(&task) {
                Ok(encoded) => encoded,
                Err(e) => return abort(e),
            };
            tasks.insert(key, encoded)?;
            Ok(task)
        });

        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Backend(e),
        })
    }

    fn list_pending(
        &self,
        submitted_before: TimeStamp,
        reminder_count_below: u32,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let mut pending = vec![];
        for entry in self.tasks.iter() {
            let (_, raw) = entry?;
            let task: ApprovalTask = minicbor::decode(&raw)?;
            let due = task
                .submitted_at
                .is_some_and(|submitted| submitted <= submitted_before);
            if task.status == ApprovalStatus::PendingApproval
                && due
                && task.reminder_count < reminder_count_below
            {
                pending.push(task);
            }
        }
        Ok(pending)
    }
}

impl DelegationStore for SledStore {
    fn insert(&self, delegation: &Delegation) -> Result<(), StoreError> {
        self.delegations
            .insert(delegation.id.as_bytes(), encode(delegation)?)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Delegation>, StoreError> {
        match self.delegations.get(id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn list_active(&self, approver: &str, as_of: NaiveDate) -> Result<Vec<Delegation>, StoreError> {
        let mut active = vec![];
        for entry in self.delegations.iter() {
            let (_, raw) = entry?;
            let delegation: Delegation = minicbor::decode(&raw)?;
            if delegation.original_approver == approver && delegation.is_active(as_of) {
                active.push(delegation);
            }
        }
        Ok(active)
    }
}

impl Scheduler for SledStore {
    fn submit(&self, run: &BatchRun, submitted_at: TimeStamp) -> Result<String, SchedulingError> {
        let (key, id) =
            utils::new_ordered_id("job").map_err(|e| SchedulingError::Enqueue(e.to_string()))?;
        let job = BatchJob {
            id: id.clone(),
            task_ids: run.task_ids.clone(),
            limit: u32::try_from(run.limit).unwrap_or(u32::MAX),
            governance_threshold: run.governance_threshold,
            actor: run.actor.clone(),
            submitted_at,
        };
        self.jobs
            .insert(key.as_bytes(), encode(&job)?)
            .map_err(StoreError::from)?;
        debug!(job_id = %id, units = job.task_ids.len(), "batch job enqueued");
        Ok(id)
    }

    fn take_next(&self) -> Result<Option<BatchJob>, SchedulingError> {
        match self.jobs.pop_min().map_err(StoreError::from)? {
            Some((_, raw)) => {
                let job: BatchJob = minicbor::decode(&raw).map_err(StoreError::from)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}
