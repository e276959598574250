mod support;

use procure_approval::config::{ReminderConfig, WorkflowConfig};
use procure_approval::delegation::DelegationRequest;
use procure_approval::reminder::ReminderService;
use procure_approval::task::{Action, ApprovalStatus};
use support::{Harness, day};

fn reminders(h: &Harness) -> ReminderService {
    ReminderService::new(
        h.service.clone(),
        h.notifier.clone(),
        h.config.reminders.clone(),
    )
}

#[test]
fn nothing_is_due_inside_the_window() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.pending("alex")?;
    h.clock.advance_hours(23);

    let report = reminders(&h).run()?;
    assert!(report.reminded.is_empty());
    assert!(h.notifier.reminders.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn final_reminder_escalates() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let id = h.pending("alex")?;
    let service = reminders(&h);

    for expected in 1..=2 {
        h.clock.advance_hours(24);
        let report = service.run()?;
        assert_eq!(report.reminded, vec![id.clone()]);
        assert!(report.escalated.is_empty());
        assert_eq!(h.service.load(&id)?.reminder_count, expected);
    }

    h.clock.advance_hours(24);
    let report = service.run()?;
    assert_eq!(report.escalated, vec![id.clone()]);

    let task = h.service.load(&id)?;
    assert_eq!(task.reminder_count, 3);
    assert_eq!(task.status, ApprovalStatus::Escalated);
    assert!(task.token.is_none());
    assert_eq!(task.history.last().map(|w| w.action), Some(Action::Escalate));

    let sent = h.notifier.reminders.lock().unwrap().clone();
    let numbers: Vec<u32> = sent.iter().map(|r| r.reminder_number).collect();
    assert_eq!(numbers, [1, 2, 3]);
    assert!(sent.iter().all(|r| r.approver_id == "alex"));
    assert!(sent[..2].iter().all(|r| r.link_token.is_some()));
    // the final reminder follows the escalation, which retired the token
    assert_eq!(sent[2].link_token, None);
    assert_eq!(sent[0].record_id, "PO-20417");

    // escalated tasks are no longer reminded
    h.clock.advance_hours(24);
    assert!(service.run()?.reminded.is_empty());
    Ok(())
}

#[test]
fn reminders_stop_at_the_cap_without_escalation() -> anyhow::Result<()> {
    let config = WorkflowConfig {
        reminders: ReminderConfig {
            escalate_after_final: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_config(config)?;
    let id = h.pending("alex")?;
    let service = reminders(&h);

    for _ in 0..4 {
        h.clock.advance_hours(24);
        service.run()?;
    }

    let task = h.service.load(&id)?;
    assert_eq!(task.status, ApprovalStatus::PendingApproval);
    assert_eq!(task.reminder_count, 3);
    assert_eq!(h.notifier.reminders.lock().unwrap().len(), 3);
    Ok(())
}

#[test]
fn final_reminder_link_works_without_escalation() -> anyhow::Result<()> {
    let config = WorkflowConfig {
        reminders: ReminderConfig {
            escalate_after_final: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_config(config)?;
    let id = h.pending("alex")?;
    let service = reminders(&h);

    for _ in 0..3 {
        h.clock.advance_hours(24);
        service.run()?;
    }

    let last = h.notifier.reminders.lock().unwrap()[2].clone();
    assert_eq!(last.reminder_number, 3);
    let link = last.link_token.unwrap_or_default();
    let outcome = h.service.act_with_token(&link, Action::Approve, None)?;
    assert_eq!(outcome.task.id, id);
    assert_eq!(outcome.task.status, ApprovalStatus::Approved);
    Ok(())
}

#[test]
fn escalated_task_is_still_approvable_after_the_final_reminder() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let id = h.pending("alex")?;
    let service = reminders(&h);

    for _ in 0..3 {
        h.clock.advance_hours(24);
        service.run()?;
    }

    assert_eq!(h.service.load(&id)?.status, ApprovalStatus::Escalated);
    let outcome = h.service.approve(&id, "alex", None)?;
    assert_eq!(outcome.task.status, ApprovalStatus::Approved);
    Ok(())
}

#[test]
fn undelivered_reminder_still_counts() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let id = h.pending("alex")?;
    h.notifier.fail(true);
    h.clock.advance_hours(24);

    let report = reminders(&h).run()?;
    assert_eq!(report.reminded, vec![id.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(h.service.load(&id)?.reminder_count, 1);
    Ok(())
}

#[test]
fn reminder_goes_to_the_delegate() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.pending("alex")?;
    h.service.delegations().request(DelegationRequest {
        original_approver: "alex".into(),
        delegate: "dana".into(),
        start: day(5, 1),
        end: day(5, 31),
        subsidiary_scope: None,
        transaction_type_scope: None,
    })?;
    h.clock.advance_hours(24);

    reminders(&h).run()?;
    let sent = h.notifier.reminders.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].approver_id, "dana");
    Ok(())
}

#[test]
fn reminder_link_is_usable() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let id = h.pending("alex")?;
    h.clock.advance_hours(30);

    reminders(&h).run()?;
    let link = h.notifier.reminders.lock().unwrap()[0]
        .link_token
        .clone()
        .unwrap_or_default();

    let outcome = h.service.act_with_token(&link, Action::Approve, None)?;
    assert_eq!(outcome.task.id, id);
    assert_eq!(outcome.task.status, ApprovalStatus::Approved);
    Ok(())
}

#[test]
fn unrepresentable_window_fails_the_run() -> anyhow::Result<()> {
    let mut config = WorkflowConfig::default();
    config.reminders.after_hours = i64::MAX;
    let h = Harness::with_config(config)?;
    h.pending("alex")?;

    assert!(reminders(&h).run().is_err());
    assert!(h.notifier.reminders.lock().unwrap().is_empty());
    Ok(())
}
