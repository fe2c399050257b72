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

use crate::base::{AccountId, OperationId};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::date_range::DateRangeBuilder;
use crate::error::BudgetError;
use crate::events::{ChangeEvent, DocumentEvent, EventBus, EventSink};
use crate::ingest::ChangeIngestor;
use crate::ledger::{DailyLedger, LedgerComputer};
use crate::operation::{BudgetOperation, ChangeRecord, parse_batch};
use crate::planning::{PlanningGrid, planning_grid};
use crate::scheduler::{RecalcTask, RecalculationScheduler};
use crate::store::{
    InMemoryMovementStore, InMemoryOperationStore, MetricKind, MovementKey, MovementStore,
    OperationStore,
};
use crate::task_queue::{JobId, TaskQueue, WorkerPool};
use chrono::NaiveDate;
use crossbeam::channel::Receiver;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Reply to a submitted change batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub success: bool,
    /// Recompute jobs dispatched for the batch; they may still be running.
    #[serde(skip)]
    pub jobs: Vec<JobId>,
}

/// Entry point tying ingestion, scheduling and computation together.
pub struct Engine {
    catalog: Arc<Catalog>,
    operations: Arc<dyn OperationStore>,
    movements: Arc<dyn MovementStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    ingestor: ChangeIngestor,
    computer: LedgerComputer,
    scheduler: RecalculationScheduler,
}

impl Engine {
    /// In-memory engine on a worker pool sized by `Settings::default()`.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Applies a JSON edit batch and schedules recomputation.
    ///
    /// Unparsable payloads are an empty batch and succeed without effect.
    ///
    /// # Errors
    ///
    /// See [`Engine::submit_records`].
    pub fn submit_changes(
        &self,
        account: &AccountId,
        payload: &str,
    ) -> Result<SubmitOutcome, BudgetError> {
        self.submit_records(account, &parse_batch(payload))
    }

    /// Applies edits in order and schedules recomputation for what was applied.
    ///
    /// Returns once ingestion completes; recomputation runs on the queue.
    ///
    /// # Errors
    ///
    /// The validation error of the first rejected edit. Edits before it stay
    /// written and their recomputation is still scheduled.
    pub fn submit_records(
        &self,
        account: &AccountId,
        changes: &[ChangeRecord],
    ) -> Result<SubmitOutcome, BudgetError> {
        let report = self.ingestor.apply_batch(account, changes);
        let jobs = self.scheduler.schedule_batch(account, &report.applied);
        match report.error {
            Some(error) => Err(error),
            None => Ok(SubmitOutcome {
                success: true,
                jobs,
            }),
        }
    }

    /// Full rescan up to the Plan horizon for one account, or for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::QueueClosed`] if the queue refuses a job.
    pub fn extend_horizon(
        &self,
        account: Option<&AccountId>,
        window_start: Option<NaiveDate>,
    ) -> Result<Vec<JobId>, BudgetError> {
        let accounts = match account {
            Some(account) => vec![account.clone()],
            None => self.catalog.account_ids(),
        };
        accounts
            .into_iter()
            .map(|account| {
                let task = self.scheduler.horizon_task(account, window_start);
                self.scheduler.dispatch(task)
            })
            .collect()
    }

    /// Writes an operation outside a batch and schedules its recompute.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::QueueClosed`] if the queue refuses a job.
    pub fn save_operation(&self, op: BudgetOperation) -> Result<Vec<JobId>, BudgetError> {
        self.operations.save(op.clone());
        self.handle(DocumentEvent::OperationSaved(op))
    }

    /// Removes an operation and schedules recompute of every ledger it fed.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::OperationNotFound`] for unknown ids.
    pub fn delete_operation(&self, id: &OperationId) -> Result<Vec<JobId>, BudgetError> {
        let op = self
            .operations
            .remove(id)
            .ok_or(BudgetError::OperationNotFound(*id))?;
        self.handle(DocumentEvent::OperationDeleted(op))
    }

    /// Reacts to a structural change made outside the engine.
    ///
    /// | Event | Reaction |
    /// |-------|----------|
    /// | OperationSaved / OperationDeleted | Full rescan of the owner and transit recipient from the operation date |
    /// | ExpenseItemUpdated | `AccountChanged` for every account listing the item |
    /// | AccountUpdated | `AccountChanged` |
    /// | AccountRenamed | `FullRefresh` |
    /// | AccountDeleted | Drops the account from the catalog, then `FullRefresh` |
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::QueueClosed`] if the queue refuses a job.
    pub fn handle(&self, event: DocumentEvent) -> Result<Vec<JobId>, BudgetError> {
        debug!(?event, operation = ?event.operation_id(), "document event");
        match event {
            DocumentEvent::OperationSaved(op) | DocumentEvent::OperationDeleted(op) => {
                let mut accounts = vec![op.account.clone()];
                accounts.extend(op.transit_recipient.clone().filter(|r| *r != op.account));
                accounts
                    .into_iter()
                    .map(|account| {
                        let task = RecalcTask::full_rescan(account, op.date, Some(op.date));
                        self.scheduler.dispatch(task)
                    })
                    .collect()
            }
            DocumentEvent::ExpenseItemUpdated(item) => {
                for account in self.catalog.accounts_using(&item) {
                    self.events.publish(ChangeEvent::AccountChanged(account));
                }
                Ok(Vec::new())
            }
            DocumentEvent::AccountUpdated(account) => {
                self.events.publish(ChangeEvent::AccountChanged(account));
                Ok(Vec::new())
            }
            DocumentEvent::AccountRenamed { .. } => {
                self.events.publish(ChangeEvent::FullRefresh);
                Ok(Vec::new())
            }
            DocumentEvent::AccountDeleted(account) => {
                self.catalog.remove_account(&account);
                self.events.publish(ChangeEvent::FullRefresh);
                Ok(Vec::new())
            }
        }
    }

    /// Planning pivot for `today ± days`.
    pub fn planning_data(&self, account: &AccountId, days: u32) -> PlanningGrid {
        planning_grid(
            &self.catalog,
            self.operations.as_ref(),
            self.movements.as_ref(),
            account,
            self.clock.today(),
            days,
        )
    }

    /// Stored value of one metric, zero when no snapshot exists.
    pub fn snapshot(&self, account: &AccountId, date: NaiveDate, metric: MetricKind) -> Decimal {
        self.movements
            .get(&MovementKey::new(account.clone(), date, metric))
            .unwrap_or(Decimal::ZERO)
    }

    /// Stored values of all four metrics.
    pub fn ledger(&self, account: &AccountId, date: NaiveDate) -> DailyLedger {
        DailyLedger {
            date,
            balance: self.snapshot(account, date, MetricKind::Balance),
            movement: self.snapshot(account, date, MetricKind::Movement),
            transfer: self.snapshot(account, date, MetricKind::Transfer),
            remaining: self.snapshot(account, date, MetricKind::Remaining),
        }
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn operations(&self) -> &dyn OperationStore {
        self.operations.as_ref()
    }

    pub fn movements(&self) -> &dyn MovementStore {
        self.movements.as_ref()
    }

    pub fn computer(&self) -> &LedgerComputer {
        &self.computer
    }

    pub fn scheduler(&self) -> &RecalculationScheduler {
        &self.scheduler
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles an [`Engine`]; unset parts fall back to in-memory stores, the
/// system clock and a [`WorkerPool`].
#[derive(Default)]
pub struct EngineBuilder {
    settings: Settings,
    catalog: Option<Arc<Catalog>>,
    operations: Option<Arc<dyn OperationStore>>,
    movements: Option<Arc<dyn MovementStore>>,
    clock: Option<Arc<dyn Clock>>,
    queue: Option<Arc<dyn TaskQueue>>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn operations(mut self, operations: Arc<dyn OperationStore>) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn movements(mut self, movements: Arc<dyn MovementStore>) -> Self {
        self.movements = Some(movements);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Engine {
        let settings = self.settings;
        let catalog = self.catalog.unwrap_or_default();
        let operations = self
            .operations
            .unwrap_or_else(|| Arc::new(InMemoryOperationStore::new()));
        let movements = self
            .movements
            .unwrap_or_else(|| Arc::new(InMemoryMovementStore::new()));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new(settings.timezone)));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(WorkerPool::new(settings.workers, settings.task_timeout)));
        let events = Arc::new(EventBus::new());

        let computer = LedgerComputer::new(
            Arc::clone(&operations),
            Arc::clone(&movements),
            Arc::clone(&catalog),
            Arc::clone(&clock),
        );
        let ranges = DateRangeBuilder::new(
            Arc::clone(&operations),
            Arc::clone(&movements),
            Arc::clone(&clock),
        );
        let scheduler = RecalculationScheduler::new(
            computer.clone(),
            ranges,
            queue,
            events.clone(),
            settings.horizon_days,
        );
        let ingestor = ChangeIngestor::new(Arc::clone(&operations), Arc::clone(&catalog));

        Engine {
            catalog,
            operations,
            movements,
            clock,
            events,
            ingestor,
            computer,
            scheduler,
        }
    }
}
