//! Time-bounded approver delegation and acting-approver resolution
use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::clock::Day;
use crate::error::{StoreError, WorkflowError};
use crate::task::{ApprovalTask, TransactionType};
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub original_approver: String,
    #[n(2)]
    pub delegate: String,
    #[n(3)]
    pub start: Day,
    #[n(4)]
    pub end: Day, // inclusive
    #[n(5)]
    pub subsidiary_scope: Option<String>, // None covers every subsidiary
    #[n(6)]
    pub transaction_type_scope: Option<TransactionType>, // None covers every type
    #[n(7)]
    pub deactivated: bool,
}

impl Delegation {
    pub fn is_active(&self, today: NaiveDate) -> bool {
        !self.deactivated && self.start.0 <= today && today <= self.end.0
    }

    fn covers(&self, transaction_type: TransactionType, subsidiary: Option<&str>) -> bool {
        let type_ok = self
            .transaction_type_scope
            .is_none_or(|scope| scope == transaction_type);
        let subsidiary_ok = match (&self.subsidiary_scope, subsidiary) {
            (None, _) => true,
            (Some(scope), Some(subsidiary)) => scope == subsidiary,
            (Some(_), None) => false,
        };
        type_ok && subsidiary_ok
    }

    // a type-scoped match outranks a subsidiary-scoped one
    fn specificity(&self) -> (bool, bool) {
        (
            self.transaction_type_scope.is_some(),
            self.subsidiary_scope.is_some(),
        )
    }
}

/// Picks who may act for `approver` on `today`.
///
/// Only active delegations from `approver` whose scopes cover the task are
/// considered. The most specific one wins; among equally specific grants the
/// most recently started one wins, then the lowest id. Without a match the
/// approver acts for themselves.
pub fn resolve_acting_approver(
    approver: &str,
    transaction_type: TransactionType,
    subsidiary: Option<&str>,
    today: NaiveDate,
    delegations: &[Delegation],
) -> String {
    delegations
        .iter()
        .filter(|d| d.original_approver == approver)
        .filter(|d| d.is_active(today))
        .filter(|d| d.covers(transaction_type, subsidiary))
        .max_by(|a, b| rank(a, b))
        .map(|d| d.delegate.clone())
        .unwrap_or_else(|| approver.to_owned())
}

fn rank(a: &Delegation, b: &Delegation) -> Ordering {
    a.specificity()
        .cmp(&b.specificity())
        .then(a.start.cmp(&b.start))
        .then_with(|| b.id.cmp(&a.id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRequest {
    pub original_approver: String,
    pub delegate: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub subsidiary_scope: Option<String>,
    pub transaction_type_scope: Option<TransactionType>,
}

impl DelegationRequest {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.start > self.end {
            return Err(WorkflowError::InvalidDelegation {
                start: self.start,
                end: self.end,
            });
        }
        if self.original_approver == self.delegate {
            return Err(WorkflowError::SelfDelegation);
        }
        Ok(())
    }
}

pub trait DelegationStore: Send + Sync {
    fn insert(&self, delegation: &Delegation) -> Result<(), StoreError>;
    fn get(&self, id: &str) -> Result<Option<Delegation>, StoreError>;
    /// Delegations granted by `approver` that are active on `as_of`.
    fn list_active(&self, approver: &str, as_of: NaiveDate) -> Result<Vec<Delegation>, StoreError>;
}

#[derive(Clone)]
pub struct DelegationResolver {
    store: Arc<dyn DelegationStore>,
}

impl DelegationResolver {
    pub fn new(store: Arc<dyn DelegationStore>) -> Self {
        Self { store }
    }

    /// Effective approver for `task` on `today`. Always read fresh, never cached.
    pub fn acting_approver(
        &self,
        task: &ApprovalTask,
        today: NaiveDate,
    ) -> Result<String, StoreError> {
        let delegations = self.store.list_active(&task.approver, today)?;
        let acting = resolve_acting_approver(
            &task.approver,
            task.transaction_type,
            task.subsidiary.as_deref(),
            today,
            &delegations,
        );
        if acting != task.approver {
            debug!(task_id = %task.id, approver = %task.approver, acting = %acting, "delegation applied");
        }
        Ok(acting)
    }

    pub fn request(&self, request: DelegationRequest) -> Result<Delegation, WorkflowError> {
        request.validate()?;

        let id = utils::new_uuid_to_bech32("dlg")
            .map_err(|e| StoreError::Identifier(e.to_string()))?;
        let delegation = Delegation {
            id,
            original_approver: request.original_approver,
            delegate: request.delegate,
            start: Day(request.start),
            end: Day(request.end),
            subsidiary_scope: request.subsidiary_scope,
            transaction_type_scope: request.transaction_type_scope,
            deactivated: false,
        };
        self.store.insert(&delegation)?;

        info!(
            delegation_id = %delegation.id,
            approver = %delegation.original_approver,
            delegate = %delegation.delegate,
            start = %delegation.start.0,
            end = %delegation.end.0,
            "delegation created"
        );
        Ok(delegation)
    }

    /// Deactivation counts as expiry. Repeating it is harmless.
    pub fn deactivate(&self, id: &str) -> Result<(), WorkflowError> {
        let Some(mut delegation) = self.store.get(id)? else {
            return Err(StoreError::DelegationNotFound(id.to_owned()).into());
        };
        if !delegation.deactivated {
            delegation.deactivated = true;
            self.store.insert(&delegation)?;
            info!(delegation_id = %id, "delegation deactivated");
        }
        Ok(())
    }
}
