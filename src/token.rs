//! Single-task action tokens for approving from a notification link
//!
//! A token only validates while its task is pending approval and unexpired,
//! so resolving the task by any other path retires every outstanding link
//! without a sweep. Refresh and invalidate are best-effort: they log and
//! swallow failures so they never block the transition that triggered them.
use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::delegation::DelegationResolver;
use crate::error::{StoreError, TokenRejection};
use crate::store::TaskStore;
use crate::task::{ActionToken, ApprovalStatus, TaskId, TaskUpdate, TransactionType};

const TOKEN_BYTES: usize = 32;

/// What a valid token entitles its bearer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub task_id: TaskId,
    pub transaction_type: TransactionType,
    pub transaction_id: String,
    /// Effective approver: the active delegate if there is one, else the primary approver.
    pub approver: String,
}

#[derive(Clone)]
pub struct ActionTokenService {
    tasks: Arc<dyn TaskStore>,
    delegations: DelegationResolver,
    clock: Arc<dyn Clock>,
    expiry_hours: i64,
}

impl ActionTokenService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        delegations: DelegationResolver,
        clock: Arc<dyn Clock>,
        expiry_hours: i64,
    ) -> Self {
        Self {
            tasks,
            delegations,
            clock,
            expiry_hours,
        }
    }

    /// 32 bytes from the OS RNG, hex encoded. Uniqueness rests on entropy alone.
    pub fn generate() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn validate(&self, token: &str) -> Result<TokenGrant, TokenRejection> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenRejection::Empty);
        }

        let now = self.clock.now();
        let task = self
            .tasks
            .find_by_token(token, ApprovalStatus::PendingApproval, now)?
            .ok_or(TokenRejection::Unknown)?;
        // the store already filters; fail closed if it did not
        if !task.token_is_live(token, now) {
            return Err(TokenRejection::Unknown);
        }

        let approver = self.delegations.acting_approver(&task, now.date())?;
        Ok(TokenGrant {
            task_id: task.id,
            transaction_type: task.transaction_type,
            transaction_id: task.transaction_id,
            approver,
        })
    }

    /// Issues a fresh token for a task awaiting approval. Returns `None` and
    /// logs on any failure.
    pub fn refresh(&self, task_id: &TaskId) -> Option<String> {
        match self.try_refresh(task_id) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "action token refresh failed");
                None
            }
        }
    }

    fn try_refresh(&self, task_id: &TaskId) -> Result<String, StoreError> {
        let expires_at = self
            .clock
            .now()
            .checked_plus_hours(self.expiry_hours)
            .ok_or(StoreError::TimeOutOfRange(self.expiry_hours))?;
        let value = Self::generate();
        let token = ActionToken {
            value: value.clone(),
            expires_at,
        };
        self.tasks.write(
            task_id,
            &TaskUpdate::default().set_token(token),
            Some(ApprovalStatus::PendingApproval),
        )?;
        debug!(task_id = %task_id, expiry_hours = self.expiry_hours, "action token refreshed");
        Ok(value)
    }

    /// Clears the task's token. Idempotent, and a missing task is a no-op.
    pub fn invalidate(&self, task_id: &TaskId) {
        match self
            .tasks
            .write(task_id, &TaskUpdate::default().clear_token(), None)
        {
            Ok(_) => debug!(task_id = %task_id, "action token invalidated"),
            Err(StoreError::TaskNotFound(_)) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "action token invalidation failed"),
        }
    }
}
