//! Approval task records and the typed update applied to them
use std::fmt;

use crate::clock::TimeStamp;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.to_owned())
    }
}

impl<C> minicbor::Encode<C> for TaskId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TaskId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(TaskId(d.str()?.to_owned()))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    #[n(0)]
    PurchaseOrder,
    #[n(1)]
    VendorBill,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingSubmission,
    #[n(2)]
    PendingApproval,
    #[n(3)]
    Escalated,
    #[n(4)]
    PendingExceptionReview,
    #[n(5)]
    Approved,
    #[n(6)]
    Rejected,
    #[n(7)]
    Recalled,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 8] = [
        ApprovalStatus::Draft,
        ApprovalStatus::PendingSubmission,
        ApprovalStatus::PendingApproval,
        ApprovalStatus::Escalated,
        ApprovalStatus::PendingExceptionReview,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::Recalled,
    ];

    /// Status code as carried by the system of record.
    pub fn code(self) -> u8 {
        match self {
            Self::Draft => 1,
            Self::PendingSubmission => 2,
            Self::PendingApproval => 3,
            Self::Escalated => 4,
            Self::PendingExceptionReview => 5,
            Self::Approved => 6,
            Self::Rejected => 7,
            Self::Recalled => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::PendingSubmission => "pending submission",
            Self::PendingApproval => "pending approval",
            Self::Escalated => "escalated",
            Self::PendingExceptionReview => "pending exception review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Recalled => "recalled",
        };
        f.write_str(label)
    }
}

/// The system of record's three-value approval banner.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    #[n(0)]
    PendingApproval,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    #[n(0)]
    Submit,
    #[n(1)]
    Approve,
    #[n(2)]
    Reject,
    #[n(3)]
    Resubmit,
    #[n(4)]
    Recall,
    #[n(5)]
    RecheckMatching,
    #[n(6)]
    ApproveException,
    #[n(7)]
    Escalate,
    #[n(8)]
    FlagException,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Resubmit => "resubmit",
            Self::Recall => "recall",
            Self::RecheckMatching => "recheck matching on",
            Self::ApproveException => "approve the exception on",
            Self::Escalate => "escalate",
            Self::FlagException => "flag an exception on",
        };
        f.write_str(label)
    }
}

/// How an action reached the engine.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalMethod {
    #[n(0)]
    Ui,
    #[n(1)]
    Link,
    #[n(2)]
    Bulk,
    #[n(3)]
    System,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ActionToken {
    #[n(0)]
    pub value: String,
    #[n(1)]
    pub expires_at: TimeStamp,
}

// one entry of the audit trail, appended on every successful transition
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    #[n(0)]
    pub actor: String,
    #[n(1)]
    pub action: Action,
    #[n(2)]
    pub method: ApprovalMethod,
    #[n(3)]
    pub from: ApprovalStatus,
    #[n(4)]
    pub to: ApprovalStatus,
    #[n(5)]
    pub comment: Option<String>,
    #[n(6)]
    pub recorded_at: TimeStamp,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTask {
    #[n(0)]
    pub id: TaskId,
    #[n(1)]
    pub transaction_type: TransactionType,
    #[n(2)]
    pub transaction_id: String,
    #[n(3)]
    pub subsidiary: Option<String>,
    #[n(4)]
    pub status: ApprovalStatus,
    #[n(5)]
    pub native_status: Option<NativeStatus>,
    #[n(6)]
    pub submitter: String,
    #[n(7)]
    pub approver: String,
    #[n(8)]
    pub acting_approver: Option<String>, // last resolved delegate, informational only
    #[n(9)]
    pub reminder_count: u32,
    #[n(10)]
    pub token: Option<ActionToken>,
    #[n(11)]
    pub rejection_comment: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp,
    #[n(13)]
    pub submitted_at: Option<TimeStamp>,
    #[n(14)]
    pub history: Vec<Witness>,
}

/// Input for opening a new approval task on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub transaction_type: TransactionType,
    pub transaction_id: String,
    pub subsidiary: Option<String>,
    pub submitter: String,
    pub approver: String,
}

impl ApprovalTask {
    pub fn open(id: TaskId, new: NewTask, created_at: TimeStamp) -> Self {
        Self {
            id,
            transaction_type: new.transaction_type,
            transaction_id: new.transaction_id,
            subsidiary: new.subsidiary,
            status: ApprovalStatus::Draft,
            native_status: Some(NativeStatus::PendingApproval),
            submitter: new.submitter,
            approver: new.approver,
            acting_approver: None,
            reminder_count: 0,
            token: None,
            rejection_comment: None,
            created_at,
            submitted_at: None,
            history: vec![],
        }
    }

    /// A token is usable only while the task awaits approval and before expiry.
    pub fn token_is_live(&self, value: &str, now: TimeStamp) -> bool {
        self.status == ApprovalStatus::PendingApproval
            && self
                .token
                .as_ref()
                .is_some_and(|token| token.value == value && token.expires_at >= now)
    }
}

/// Typed set of field changes written to a task in one atomic update.
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: Option<ApprovalStatus>,
    pub native_status: Option<NativeStatus>,
    pub acting_approver: Option<Option<String>>,
    pub token: Option<Option<ActionToken>>,
    pub reminder_count: Option<u32>,
    pub submitted_at: Option<TimeStamp>,
    pub rejection_comment: Option<Option<String>>,
    pub witness: Option<Witness>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TaskUpdate::default()
    }

    pub fn set_token(mut self, token: ActionToken) -> Self {
        self.token = Some(Some(token));
        self
    }

    pub fn clear_token(mut self) -> Self {
        self.token = Some(None);
        self
    }

    pub fn apply_to(&self, task: &mut ApprovalTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(native) = self.native_status {
            task.native_status = Some(native);
        }
        if let Some(acting) = &self.acting_approver {
            task.acting_approver = acting.clone();
        }
        if let Some(token) = &self.token {
            task.token = token.clone();
        }
        if let Some(count) = self.reminder_count {
            task.reminder_count = task.reminder_count.max(count);
        }
        if let Some(submitted_at) = self.submitted_at {
            task.submitted_at = Some(submitted_at);
        }
        if let Some(comment) = &self.rejection_comment {
            task.rejection_comment = comment.clone();
        }
        if let Some(witness) = &self.witness {
            task.history.push(witness.clone());
        }
        // tokens only live on tasks awaiting approval
        if task.status != ApprovalStatus::PendingApproval {
            task.token = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ApprovalTask {
        ApprovalTask::open(
            TaskId::from("task_a"),
            NewTask {
                transaction_type: TransactionType::PurchaseOrder,
                transaction_id: "PO-1001".into(),
                subsidiary: Some("emea".into()),
                submitter: "sam".into(),
                approver: "alex".into(),
            },
            TimeStamp::now(),
        )
    }

    #[test]
    fn status_codes_round_trip() {
        for status in ApprovalStatus::ALL {
            assert_eq!(ApprovalStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ApprovalStatus::from_code(0), None);
        assert_eq!(ApprovalStatus::from_code(42), None);
    }

    #[test]
    fn task_record_encoding() {
        let mut task = draft();
        task.token = Some(ActionToken {
            value: "abc".into(),
            expires_at: TimeStamp::now(),
        });

        let encoded = minicbor::to_vec(&task).unwrap();
        let decoded: ApprovalTask = minicbor::decode(&encoded).unwrap();

        assert_eq!(task, decoded);
    }

    #[test]
    fn reminder_count_never_decreases() {
        let mut task = draft();
        task.reminder_count = 3;

        TaskUpdate {
            reminder_count: Some(1),
            ..Default::default()
        }
        .apply_to(&mut task);

        assert_eq!(task.reminder_count, 3);
    }

    #[test]
    fn leaving_pending_approval_drops_the_token() {
        let mut task = draft();
        task.status = ApprovalStatus::PendingApproval;
        task.token = Some(ActionToken {
            value: "abc".into(),
            expires_at: TimeStamp::now().checked_plus_hours(1).unwrap(),
        });

        TaskUpdate {
            status: Some(ApprovalStatus::Approved),
            ..Default::default()
        }
        .apply_to(&mut task);

        assert!(task.token.is_none());
    }

    #[test]
    fn expired_token_is_not_live() {
        let now = TimeStamp::now();
        let mut task = draft();
        task.status = ApprovalStatus::PendingApproval;
        task.token = Some(ActionToken {
            value: "abc".into(),
            expires_at: now.checked_plus_hours(-1).unwrap(),
        });

        assert!(!task.token_is_live("abc", now));
        task.token.as_mut().unwrap().expires_at = now.checked_plus_hours(1).unwrap();
        assert!(task.token_is_live("abc", now));
        assert!(!task.token_is_live("abd", now));
    }
}
