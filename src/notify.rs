//! Outbound notification seam. Delivery is best-effort everywhere.
use tracing::info;

use crate::error::NotifyError;
use crate::task::{Action, ApprovalStatus, TaskId, TransactionType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub task_id: TaskId,
    pub approver_id: String,
    pub record_type: TransactionType,
    pub record_id: String,
    pub reminder_number: u32,
    pub link_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionNotice {
    pub task_id: TaskId,
    pub recipient_id: String,
    pub action: Action,
    pub status: ApprovalStatus,
    pub record_type: TransactionType,
    pub record_id: String,
    pub link_token: Option<String>,
}

pub trait NotificationSender: Send + Sync {
    fn send_reminder(&self, reminder: &Reminder) -> Result<(), NotifyError>;

    fn send_notice(&self, notice: &TransitionNotice) -> Result<(), NotifyError>;
}

/// Sender that only records notifications in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSender for LogNotifier {
    fn send_reminder(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        info!(
            task_id = %reminder.task_id,
            approver = %reminder.approver_id,
            record_id = %reminder.record_id,
            reminder_number = reminder.reminder_number,
            "approval reminder"
        );
        Ok(())
    }

    fn send_notice(&self, notice: &TransitionNotice) -> Result<(), NotifyError> {
        info!(
            task_id = %notice.task_id,
            recipient = %notice.recipient_id,
            action = %notice.action,
            status = %notice.status,
            "approval notice"
        );
        Ok(())
    }
}
