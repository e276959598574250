//! Shared fixtures for the integration tests: a sled database on a temp dir
//! plus scripted collaborators for the parts that live outside the engine.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use procure_approval::batch::{BatchJob, BatchRun, Budget, BudgetOracle, Scheduler};
use procure_approval::clock::{Clock, TimeStamp};
use procure_approval::config::WorkflowConfig;
use procure_approval::error::{NotifyError, SchedulingError, StoreError};
use procure_approval::machine::MatchingVerdict;
use procure_approval::notify::{NotificationSender, Reminder, TransitionNotice};
use procure_approval::service::{ApprovalService, MatchingEvaluator};
use procure_approval::store::SledStore;
use procure_approval::task::{ApprovalTask, NewTask, TaskId, TransactionType};
use tempfile::{TempDir, tempdir};

pub struct TestClock(Mutex<TimeStamp>);

impl TestClock {
    pub fn advance_hours(&self, hours: i64) {
        let mut now = self.0.lock().unwrap();
        *now = now.checked_plus_hours(hours).unwrap();
    }
}

impl Clock for TestClock {
    fn now(&self) -> TimeStamp {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<TransitionNotice>>,
    pub reminders: Mutex<Vec<Reminder>>,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NotificationSender for RecordingNotifier {
    fn send_reminder(&self, reminder: &Reminder) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail relay down".into()));
        }
        self.reminders.lock().unwrap().push(reminder.clone());
        Ok(())
    }

    fn send_notice(&self, notice: &TransitionNotice) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail relay down".into()));
        }
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub struct ScriptedMatcher(pub Mutex<MatchingVerdict>);

impl ScriptedMatcher {
    pub fn set(&self, verdict: MatchingVerdict) {
        *self.0.lock().unwrap() = verdict;
    }
}

impl MatchingEvaluator for ScriptedMatcher {
    fn evaluate_matching_exception(&self, _: &TaskId) -> Result<MatchingVerdict, StoreError> {
        Ok(*self.0.lock().unwrap())
    }
}

/// Hands out the scripted budgets in order, then nothing.
pub struct ScriptedOracle {
    budgets: Mutex<VecDeque<u64>>,
    pub samples: Mutex<usize>,
}

impl ScriptedOracle {
    pub fn new(budgets: impl IntoIterator<Item = u64>) -> Self {
        Self {
            budgets: Mutex::new(budgets.into_iter().collect()),
            samples: Mutex::new(0),
        }
    }
}

impl BudgetOracle for ScriptedOracle {
    fn remaining_budget(&self) -> Budget {
        *self.samples.lock().unwrap() += 1;
        Budget(self.budgets.lock().unwrap().pop_front().unwrap_or(0))
    }
}

pub struct FailingScheduler;

impl Scheduler for FailingScheduler {
    fn submit(&self, _: &BatchRun, _: TimeStamp) -> Result<String, SchedulingError> {
        Err(SchedulingError::Enqueue("scheduler offline".into()))
    }

    fn take_next(&self) -> Result<Option<BatchJob>, SchedulingError> {
        Ok(None)
    }
}

pub fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

pub struct Harness {
    // keeps the database directory alive for the test
    _dir: TempDir,
    pub store: Arc<SledStore>,
    pub service: Arc<ApprovalService>,
    pub notifier: Arc<RecordingNotifier>,
    pub matcher: Arc<ScriptedMatcher>,
    pub clock: Arc<TestClock>,
    pub config: WorkflowConfig,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> anyhow::Result<Self> {
        // Sled locks its directory, so every test gets its own database on temp.
        let dir = tempdir()?;
        let db = Arc::new(sled::open(dir.path().join("approvals.db"))?);
        let store = Arc::new(SledStore::open(db)?);

        let notifier = Arc::new(RecordingNotifier::default());
        let matcher = Arc::new(ScriptedMatcher(Mutex::new(MatchingVerdict::Persists)));
        let start = TimeStamp::new_with(2026, 5, 10, 12, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("bad fixture time"))?;
        let clock = Arc::new(TestClock(Mutex::new(start)));

        let service = Arc::new(ApprovalService::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            matcher.clone(),
            clock.clone(),
            &config,
        ));

        Ok(Self {
            _dir: dir,
            store,
            service,
            notifier,
            matcher,
            clock,
            config,
        })
    }

    /// Draft purchase order for the emea subsidiary, submitted by sam.
    pub fn purchase_order(&self, approver: &str) -> anyhow::Result<ApprovalTask> {
        Ok(self.service.open(NewTask {
            transaction_type: TransactionType::PurchaseOrder,
            transaction_id: "PO-20417".into(),
            subsidiary: Some("emea".into()),
            submitter: "sam".into(),
            approver: approver.into(),
        })?)
    }

    /// Purchase order already submitted and waiting on `approver`.
    pub fn pending(&self, approver: &str) -> anyhow::Result<TaskId> {
        let task = self.purchase_order(approver)?;
        self.service.submit(&task.id, "sam")?;
        Ok(task.id)
    }
}
