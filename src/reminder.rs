//! Periodic reminders for tasks left waiting on an approver
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ReminderConfig;
use crate::error::{StoreError, WorkflowError};
use crate::notify::{NotificationSender, Reminder};
use crate::service::ApprovalService;
use crate::task::{ApprovalStatus, ApprovalTask, TaskId, TaskUpdate};

#[derive(Debug, Default)]
pub struct ReminderReport {
    pub reminded: Vec<TaskId>,
    pub escalated: Vec<TaskId>,
    pub failed: Vec<(TaskId, String)>,
}

pub struct ReminderService {
    service: Arc<ApprovalService>,
    notifier: Arc<dyn NotificationSender>,
    config: ReminderConfig,
}

impl ReminderService {
    pub fn new(
        service: Arc<ApprovalService>,
        notifier: Arc<dyn NotificationSender>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            service,
            notifier,
            config,
        }
    }

    /// Reminds every approver whose task has waited longer than the
    /// configured window. Only the listing can fail the run; per-task
    /// problems are reported and the run moves on.
    pub fn run(&self) -> Result<ReminderReport, WorkflowError> {
        let now = self.service.clock().now();
        let back = self.config.after_hours.saturating_neg();
        let cutoff = now
            .checked_plus_hours(back)
            .ok_or(StoreError::TimeOutOfRange(back))?;
        let due = self
            .service
            .task_store()
            .list_pending(cutoff, self.config.max_reminders)?;

        let mut report = ReminderReport::default();
        for task in due {
            match self.remind(&task, &mut report) {
                Ok(()) => report.reminded.push(task.id.clone()),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "reminder failed");
                    report.failed.push((task.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            reminded = report.reminded.len(),
            escalated = report.escalated.len(),
            failed = report.failed.len(),
            "reminder run finished"
        );
        Ok(report)
    }

    // The final reminder escalates first, which retires the action token, so
    // it goes out without a link instead of with a dead one.
    fn remind(&self, task: &ApprovalTask, report: &mut ReminderReport) -> Result<(), WorkflowError> {
        let now = self.service.clock().now();
        let approver = self
            .service
            .delegations()
            .acting_approver(task, now.date())?;
        let count = task.reminder_count + 1;

        // the count is recorded whether or not delivery succeeds
        self.service.task_store().write(
            &task.id,
            &TaskUpdate {
                reminder_count: Some(count),
                ..Default::default()
            },
            Some(ApprovalStatus::PendingApproval),
        )?;

        let escalated = if count >= self.config.max_reminders && self.config.escalate_after_final {
            match self.service.escalate(&task.id) {
                Ok(_) => {
                    report.escalated.push(task.id.clone());
                    true
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "escalation after final reminder failed");
                    report.failed.push((task.id.clone(), e.to_string()));
                    false
                }
            }
        } else {
            false
        };
        let link_token = if escalated {
            None
        } else {
            self.service.tokens().refresh(&task.id)
        };

        let reminder = Reminder {
            task_id: task.id.clone(),
            approver_id: approver,
            record_type: task.transaction_type,
            record_id: task.transaction_id.clone(),
            reminder_number: count,
            link_token,
        };
        if let Err(e) = self.notifier.send_reminder(&reminder) {
            warn!(task_id = %task.id, approver = %reminder.approver_id, error = %e, "reminder not delivered");
        }
        Ok(())
    }
}
