//! Approval workflow for procurement documents kept in an external system
//! of record: the transition table, delegation, action-link tokens and a
//! budget-governed bulk approver.

pub mod batch;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod error;
pub mod logging;
pub mod machine;
pub mod notify;
pub mod projector;
pub mod reminder;
pub mod service;
pub mod store;
pub mod task;
pub mod token;
pub mod utils;

pub use error::{StoreError, WorkflowError};
pub use service::{ActionRequest, ApprovalService, TransitionOutcome};
pub use task::{Action, ApprovalStatus, ApprovalTask, NativeStatus, TaskId, TransactionType};
