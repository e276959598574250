use chrono::NaiveDate;

use crate::task::{Action, ApprovalStatus, TaskId};

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("cannot {action} a task that is {from}")]
    IllegalTransition {
        action: Action,
        from: ApprovalStatus,
    },
    #[error("access denied: {actor} may not {action} this task")]
    UnauthorizedActor { actor: String, action: Action },
    #[error("a comment is required to {0}")]
    MissingComment(Action),
    #[error("the approval link is invalid or has expired")]
    TokenInvalid,
    #[error("delegation window {start} to {end} is invalid")]
    InvalidDelegation { start: NaiveDate, end: NaiveDate },
    #[error("an approver cannot delegate to themselves")]
    SelfDelegation,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl WorkflowError {
    /// Validation errors are raised before any write happens.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. }
                | Self::UnauthorizedActor { .. }
                | Self::MissingComment(_)
                | Self::TokenInvalid
                | Self::InvalidDelegation { .. }
                | Self::SelfDelegation
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("task {0} was not found")]
    TaskNotFound(TaskId),
    #[error("task {id} moved from {expected} to {found} before the write")]
    StatusChanged {
        id: TaskId,
        expected: ApprovalStatus,
        found: ApprovalStatus,
    },
    #[error("delegation {0} was not found")]
    DelegationNotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to allocate an identifier: {0}")]
    Identifier(String),
    #[error("matching evaluation failed: {0}")]
    Matching(String),
    #[error("a shift of {0} hours leaves the storable time range")]
    TimeOutOfRange(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulingError {
    #[error("could not enqueue batch job: {0}")]
    Enqueue(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a token was refused. Callers only ever see [`WorkflowError::TokenInvalid`].
#[derive(thiserror::Error, Debug)]
pub enum TokenRejection {
    #[error("token was empty")]
    Empty,
    #[error("no pending task holds an unexpired token with this value")]
    Unknown,
    #[error("token lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

impl From<TokenRejection> for WorkflowError {
    fn from(_: TokenRejection) -> Self {
        WorkflowError::TokenInvalid
    }
}

#[derive(thiserror::Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);
