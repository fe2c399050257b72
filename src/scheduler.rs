// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Decides which accounts and windows to recompute and hands the work to the queue.
//!
//! A batch yields one task per distinct transit recipient it touches plus one
//! for the edited account, all keyed by `(max_date, min_date, account)` and
//! deduplicated within the batch only. Tasks from different batches may
//! overlap; every write is an idempotent upsert so overlapping runs converge.

use crate::base::AccountId;
use crate::date_range::{DateRangeBuilder, RangeMode};
use crate::error::BudgetError;
use crate::events::{ChangeEvent, EventSink};
use crate::ingest::AppliedEdit;
use crate::ledger::{DailyLedger, LedgerComputer};
use crate::task_queue::{Deadline, Job, JobId, TaskQueue};
use chrono::{Days, NaiveDate};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// One (account, window) recompute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecalcTask {
    pub account: AccountId,
    pub target_date: NaiveDate,
    pub window_start: Option<NaiveDate>,
    pub mode: RangeMode,
    /// Queue a horizon extension for the account once this task finishes.
    pub extend_horizon: bool,
}

impl RecalcTask {
    /// Window between the earliest and latest edited dates of a batch.
    pub fn incremental(account: AccountId, max_date: NaiveDate, min_date: NaiveDate) -> Self {
        Self {
            account,
            target_date: max_date,
            window_start: Some(min_date),
            mode: RangeMode::Incremental,
            extend_horizon: true,
        }
    }

    pub fn full_rescan(
        account: AccountId,
        target_date: NaiveDate,
        window_start: Option<NaiveDate>,
    ) -> Self {
        Self {
            account,
            target_date,
            window_start,
            mode: RangeMode::FullRescan,
            extend_horizon: false,
        }
    }

    fn label(&self) -> String {
        format!("recompute {} up to {}", self.account, self.target_date)
    }
}

/// Plans the recompute tasks for one applied batch.
///
/// Transit recipients come first, in the order the batch references them;
/// the edited account follows unless one of them already is the same key.
pub fn plan_batch(account: &AccountId, edits: &[AppliedEdit]) -> Vec<RecalcTask> {
    let (Some(min_date), Some(max_date)) = (
        edits.iter().map(|edit| edit.date).min(),
        edits.iter().map(|edit| edit.date).max(),
    ) else {
        return Vec::new();
    };

    let recipients = edits.iter().flat_map(|edit| {
        edit.transit_recipient
            .iter()
            .chain(edit.displaced_recipient.iter())
    });

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for target in recipients.chain(std::iter::once(account)) {
        if seen.insert((max_date, min_date, target.clone())) {
            tasks.push(RecalcTask::incremental(target.clone(), max_date, min_date));
        }
    }
    tasks
}

struct SchedulerInner {
    computer: LedgerComputer,
    ranges: DateRangeBuilder,
    queue: Arc<dyn TaskQueue>,
    events: Arc<dyn EventSink>,
    horizon_days: u32,
}

/// Dispatches recompute tasks and runs them when the queue calls back.
#[derive(Clone)]
pub struct RecalculationScheduler {
    inner: Arc<SchedulerInner>,
}

impl RecalculationScheduler {
    pub fn new(
        computer: LedgerComputer,
        ranges: DateRangeBuilder,
        queue: Arc<dyn TaskQueue>,
        events: Arc<dyn EventSink>,
        horizon_days: u32,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                computer,
                ranges,
                queue,
                events,
                horizon_days,
            }),
        }
    }

    /// Plans and dispatches the tasks for an applied batch without waiting for them.
    ///
    /// Tasks the queue refuses are logged and skipped.
    pub fn schedule_batch(&self, account: &AccountId, edits: &[AppliedEdit]) -> Vec<JobId> {
        plan_batch(account, edits)
            .into_iter()
            .filter_map(|task| match self.dispatch(task) {
                Ok(id) => Some(id),
                Err(error) => {
                    warn!(%account, %error, "recompute not scheduled");
                    None
                }
            })
            .collect()
    }

    /// Submits `task` to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::QueueClosed`] if the queue refuses the job.
    pub fn dispatch(&self, task: RecalcTask) -> Result<JobId, BudgetError> {
        let scheduler = self.clone();
        let label = task.label();
        self.inner.queue.submit(Job::new(label, move |deadline| {
            scheduler.run(&task, deadline).map(|_| ())
        }))
    }

    /// Full rescan up to `today + horizon_days`.
    pub fn horizon_task(&self, account: AccountId, window_start: Option<NaiveDate>) -> RecalcTask {
        let today = self.inner.computer.today();
        let horizon = today
            .checked_add_days(Days::new(u64::from(self.inner.horizon_days)))
            .unwrap_or(today);
        RecalcTask::full_rescan(account, horizon, window_start)
    }

    /// Runs `task` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::TaskTimedOut`] if `deadline` passes mid-window.
    pub fn run(
        &self,
        task: &RecalcTask,
        deadline: &Deadline,
    ) -> Result<Vec<DailyLedger>, BudgetError> {
        let dates = self.inner.ranges.build(
            &task.account,
            task.target_date,
            task.window_start,
            task.mode,
        );
        let ledgers = self
            .inner
            .computer
            .compute_dates(&task.account, &dates, deadline)?;

        info!(
            account = %task.account,
            mode = ?task.mode,
            first = ?dates.first(),
            last = ?dates.last(),
            "recomputed window"
        );
        self.inner
            .events
            .publish(ChangeEvent::AccountChanged(task.account.clone()));

        if task.extend_horizon {
            let follow_up = self.horizon_task(task.account.clone(), task.window_start);
            if let Err(error) = self.dispatch(follow_up) {
                warn!(account = %task.account, %error, "horizon extension not scheduled");
            }
        }
        Ok(ledgers)
    }
}
