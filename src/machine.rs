//! The approval transition table
//!
//! Everything here is pure: which actions are legal from which status, where
//! they lead, whether a comment is mandatory, who must perform them and who
//! hears about it. Persistence and actor resolution live in [`crate::service`].
use crate::error::WorkflowError;
use crate::task::{Action, ApprovalStatus};

use ApprovalStatus::*;

/// Who is allowed to perform an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Any authenticated caller, typically the document owner.
    Anyone,
    /// The task's effective approver after delegation.
    ActingApprover,
    /// The user who originally submitted the document.
    Submitter,
    /// Internal processes only (reminders, matching).
    System,
}

/// Who is told about a completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    ActingApprover,
    Submitter,
}

/// Result of the external matching-exception evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingVerdict {
    Resolved,
    Persists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub action: Action,
    pub from: &'static [ApprovalStatus],
    pub comment_required: bool,
    pub authority: Authority,
}

pub fn rule(action: Action) -> Rule {
    let (from, comment_required, authority): (&'static [ApprovalStatus], bool, Authority) =
        match action {
            Action::Submit => (&[Draft, Recalled], false, Authority::Anyone),
            Action::Approve => (&[PendingApproval, Escalated], false, Authority::ActingApprover),
            Action::Reject => (&[PendingApproval, Escalated], true, Authority::ActingApprover),
            Action::Resubmit => (&[Rejected], false, Authority::Anyone),
            Action::Recall => (&[PendingApproval], false, Authority::Submitter),
            Action::RecheckMatching => (&[PendingExceptionReview], false, Authority::Anyone),
            Action::ApproveException => {
                (&[PendingExceptionReview], true, Authority::ActingApprover)
            }
            Action::Escalate => (&[PendingApproval], false, Authority::System),
            Action::FlagException => (&[PendingApproval, Escalated], false, Authority::System),
        };
    Rule {
        action,
        from,
        comment_required,
        authority,
    }
}

impl Rule {
    pub fn allows_from(&self, current: ApprovalStatus) -> bool {
        self.from.contains(&current)
    }

    /// Destination status. Only `RecheckMatching` consults the verdict, and
    /// stays put unless the exception is known to be resolved.
    pub fn destination(&self, matching: Option<MatchingVerdict>) -> ApprovalStatus {
        match self.action {
            Action::Submit | Action::Resubmit => PendingApproval,
            Action::Approve | Action::ApproveException => Approved,
            Action::Reject => Rejected,
            Action::Recall => Recalled,
            Action::Escalate => Escalated,
            Action::FlagException => PendingExceptionReview,
            Action::RecheckMatching => match matching {
                Some(MatchingVerdict::Resolved) => Approved,
                Some(MatchingVerdict::Persists) | None => PendingExceptionReview,
            },
        }
    }

    pub fn recipient(&self, to: ApprovalStatus) -> Option<Recipient> {
        match self.action {
            Action::Submit | Action::Resubmit | Action::Recall | Action::Escalate => {
                Some(Recipient::ActingApprover)
            }
            Action::Approve | Action::Reject | Action::ApproveException | Action::FlagException => {
                Some(Recipient::Submitter)
            }
            Action::RecheckMatching => (to == Approved).then_some(Recipient::Submitter),
        }
    }
}

pub fn has_comment(comment: Option<&str>) -> bool {
    comment.is_some_and(|c| !c.trim().is_empty())
}

/// Checks that `action` is legal from `current` and that a mandatory comment
/// is present. Legality is checked first.
pub fn check(
    action: Action,
    current: ApprovalStatus,
    comment: Option<&str>,
) -> Result<Rule, WorkflowError> {
    let rule = rule(action);
    if !rule.allows_from(current) {
        return Err(WorkflowError::IllegalTransition {
            action,
            from: current,
        });
    }
    if rule.comment_required && !has_comment(comment) {
        return Err(WorkflowError::MissingComment(action));
    }
    Ok(rule)
}
