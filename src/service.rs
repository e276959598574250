//! Service layer API for approval workflow operations
use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::delegation::{DelegationResolver, DelegationStore};
use crate::error::{StoreError, WorkflowError};
use crate::machine::{self, Authority, MatchingVerdict, Recipient};
use crate::notify::{NotificationSender, TransitionNotice};
use crate::projector;
use crate::store::TaskStore;
use crate::task::{
    Action, ApprovalMethod, ApprovalStatus, ApprovalTask, NewTask, TaskId, TaskUpdate, Witness,
};
use crate::token::ActionTokenService;
use crate::utils;

/// External evaluator of a vendor bill's matching exception.
pub trait MatchingEvaluator: Send + Sync {
    fn evaluate_matching_exception(&self, task_id: &TaskId) -> Result<MatchingVerdict, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub task_id: TaskId,
    pub action: Action,
    pub actor: String,
    pub comment: Option<String>,
    pub method: ApprovalMethod,
}

impl ActionRequest {
    pub fn new(task_id: TaskId, action: Action, actor: impl Into<String>) -> Self {
        Self {
            task_id,
            action,
            actor: actor.into(),
            comment: None,
            method: ApprovalMethod::Ui,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn via(mut self, method: ApprovalMethod) -> Self {
        self.method = method;
        self
    }
}

/// Side effects that failed after the transition committed. They never turn
/// a successful transition into an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectFailure {
    TokenRefresh,
    Notification { recipient: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub task: ApprovalTask,
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
    pub acting_approver: String,
    /// Fresh action token when the task (re)entered pending approval.
    pub token: Option<String>,
    pub side_effects: Vec<SideEffectFailure>,
}

pub struct ApprovalService {
    tasks: Arc<dyn TaskStore>,
    delegations: DelegationResolver,
    tokens: ActionTokenService,
    notifier: Arc<dyn NotificationSender>,
    matcher: Arc<dyn MatchingEvaluator>,
    clock: Arc<dyn Clock>,
}

pub const SYSTEM_ACTOR: &str = "system";

impl ApprovalService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        delegations: Arc<dyn DelegationStore>,
        notifier: Arc<dyn NotificationSender>,
        matcher: Arc<dyn MatchingEvaluator>,
        clock: Arc<dyn Clock>,
        config: &WorkflowConfig,
    ) -> Self {
        let delegations = DelegationResolver::new(delegations);
        let tokens = ActionTokenService::new(
            tasks.clone(),
            delegations.clone(),
            clock.clone(),
            config.token.expiry_hours,
        );
        Self {
            tasks,
            delegations,
            tokens,
            notifier,
            matcher,
            clock,
        }
    }

    pub fn tokens(&self) -> &ActionTokenService {
        &self.tokens
    }

    pub fn delegations(&self) -> &DelegationResolver {
        &self.delegations
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn load(&self, task_id: &TaskId) -> Result<ApprovalTask, WorkflowError> {
        Ok(self.tasks.load(task_id)?)
    }

    /// Opens a draft approval task for a document entering the flow.
    pub fn open(&self, new: NewTask) -> Result<ApprovalTask, WorkflowError> {
        let id = utils::new_uuid_to_bech32("task")
            .map_err(|e| StoreError::Identifier(e.to_string()))?;
        let task = ApprovalTask::open(TaskId(id), new, self.clock.now());
        self.tasks.insert(&task)?;

        info!(
            task_id = %task.id,
            transaction_id = %task.transaction_id,
            approver = %task.approver,
            "approval task opened"
        );
        Ok(task)
    }

    /// Applies one action. All validation happens before the single write;
    /// token refresh and notices follow it and cannot fail the action.
    pub fn act(&self, request: ActionRequest) -> Result<TransitionOutcome, WorkflowError> {
        let ActionRequest {
            task_id,
            action,
            actor,
            comment,
            method,
        } = request;

        let task = self.tasks.load(&task_id)?;
        let from = task.status;
        let rule = machine::check(action, from, comment.as_deref())?;

        let now = self.clock.now();
        let acting = self.delegations.acting_approver(&task, now.date())?;
        self.authorize(rule.authority, action, &actor, method, &task, &acting)?;

        let verdict = match action {
            Action::RecheckMatching => Some(self.matcher.evaluate_matching_exception(&task_id)?),
            _ => None,
        };
        let to = rule.destination(verdict);

        let mut update = TaskUpdate::default();
        projector::stage(&mut update, to);
        update.acting_approver = Some((acting != task.approver).then(|| acting.clone()));
        match action {
            Action::Submit | Action::Resubmit => {
                update.submitted_at = Some(now);
                update.rejection_comment = Some(None);
            }
            Action::Reject => {
                update.rejection_comment = Some(comment.clone());
            }
            _ => {}
        }
        if to != ApprovalStatus::PendingApproval {
            update = update.clear_token();
        }
        update.witness = Some(Witness {
            actor: actor.clone(),
            action,
            method,
            from,
            to,
            comment: comment.filter(|c| !c.trim().is_empty()),
            recorded_at: now,
        });

        let task = self
            .tasks
            .write(&task_id, &update, Some(from))
            .map_err(|e| match e {
                StoreError::StatusChanged { found, .. } => {
                    WorkflowError::IllegalTransition { action, from: found }
                }
                other => WorkflowError::Store(other),
            })?;

        info!(
            task_id = %task_id,
            action = ?action,
            method = ?method,
            actor = %actor,
            from = %from,
            to = %to,
            "approval transition applied"
        );

        let mut side_effects = vec![];
        let token = if to == ApprovalStatus::PendingApproval {
            let token = self.tokens.refresh(&task_id);
            if token.is_none() {
                side_effects.push(SideEffectFailure::TokenRefresh);
            }
            token
        } else {
            None
        };

        if let Some(recipient) = rule.recipient(to) {
            let recipient_id = match recipient {
                Recipient::ActingApprover => acting.clone(),
                Recipient::Submitter => task.submitter.clone(),
            };
            let notice = TransitionNotice {
                task_id: task_id.clone(),
                recipient_id: recipient_id.clone(),
                action,
                status: to,
                record_type: task.transaction_type,
                record_id: task.transaction_id.clone(),
                link_token: token.clone(),
            };
            if let Err(e) = self.notifier.send_notice(&notice) {
                warn!(task_id = %task_id, recipient = %recipient_id, error = %e, "transition notice not delivered");
                side_effects.push(SideEffectFailure::Notification {
                    recipient: recipient_id,
                    reason: e.to_string(),
                });
            }
        }

        Ok(TransitionOutcome {
            task,
            from,
            to,
            acting_approver: acting,
            token,
            side_effects,
        })
    }

    fn authorize(
        &self,
        authority: Authority,
        action: Action,
        actor: &str,
        method: ApprovalMethod,
        task: &ApprovalTask,
        acting: &str,
    ) -> Result<(), WorkflowError> {
        let allowed = match authority {
            Authority::Anyone => true,
            Authority::ActingApprover => actor == acting,
            Authority::Submitter => actor == task.submitter,
            Authority::System => method == ApprovalMethod::System,
        };
        if allowed {
            Ok(())
        } else {
            warn!(task_id = %task.id, actor = %actor, action = ?action, "actor not authorized");
            Err(WorkflowError::UnauthorizedActor {
                actor: actor.to_owned(),
                action,
            })
        }
    }

    /// Approves or rejects through a notification link. The bearer acts as
    /// whoever the token resolves to.
    pub fn act_with_token(
        &self,
        token: &str,
        action: Action,
        comment: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if !matches!(action, Action::Approve | Action::Reject) {
            return Err(WorkflowError::UnauthorizedActor {
                actor: "approval link".to_owned(),
                action,
            });
        }
        let grant = self.tokens.validate(token).map_err(|rejection| {
            info!(reason = %rejection, "approval link refused");
            WorkflowError::from(rejection)
        })?;

        let mut request =
            ActionRequest::new(grant.task_id, action, grant.approver).via(ApprovalMethod::Link);
        request.comment = comment.map(str::to_owned);
        self.act(request)
    }

    pub fn submit(&self, task_id: &TaskId, actor: &str) -> Result<TransitionOutcome, WorkflowError> {
        self.act(ActionRequest::new(task_id.clone(), Action::Submit, actor))
    }

    pub fn approve(
        &self,
        task_id: &TaskId,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let mut request = ActionRequest::new(task_id.clone(), Action::Approve, actor);
        request.comment = comment.map(str::to_owned);
        self.act(request)
    }

    pub fn reject(
        &self,
        task_id: &TaskId,
        actor: &str,
        comment: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.act(ActionRequest::new(task_id.clone(), Action::Reject, actor).with_comment(comment))
    }

    pub fn resubmit(&self, task_id: &TaskId, actor: &str) -> Result<TransitionOutcome, WorkflowError> {
        self.act(ActionRequest::new(task_id.clone(), Action::Resubmit, actor))
    }

    pub fn recall(&self, task_id: &TaskId, actor: &str) -> Result<TransitionOutcome, WorkflowError> {
        self.act(ActionRequest::new(task_id.clone(), Action::Recall, actor))
    }

    pub fn recheck_matching(
        &self,
        task_id: &TaskId,
        actor: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.act(ActionRequest::new(task_id.clone(), Action::RecheckMatching, actor))
    }

    pub fn approve_exception(
        &self,
        task_id: &TaskId,
        actor: &str,
        comment: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.act(
            ActionRequest::new(task_id.clone(), Action::ApproveException, actor)
                .with_comment(comment),
        )
    }

    /// System-only transitions driven by reminders and the matching process.
    pub fn escalate(&self, task_id: &TaskId) -> Result<TransitionOutcome, WorkflowError> {
        self.act(
            ActionRequest::new(task_id.clone(), Action::Escalate, SYSTEM_ACTOR)
                .via(ApprovalMethod::System),
        )
    }

    pub fn flag_exception(
        &self,
        task_id: &TaskId,
        comment: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let mut request = ActionRequest::new(task_id.clone(), Action::FlagException, SYSTEM_ACTOR)
            .via(ApprovalMethod::System);
        request.comment = comment.map(str::to_owned);
        self.act(request)
    }
}
