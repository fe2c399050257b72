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

//! # Budget Movements
//!
//! Recalculation engine for a day-by-day budget ledger. Plan and Fact
//! operations recorded against accounts roll up into four stored metrics per
//! account and date: Balance, Movement, Transfer and Remaining.
//!
//! ## Core Components
//!
//! - [`Engine`]: facade accepting edit batches and document events
//! - [`ChangeIngestor`]: applies edits, keeps Plan/Fact rows paired
//! - [`RecalculationScheduler`]: plans and dispatches recompute tasks
//! - [`DateRangeBuilder`]: picks the contiguous window a task recomputes
//! - [`LedgerComputer`]: derives and stores the metrics for one date
//! - [`TaskQueue`]: at-most-once background execution ([`WorkerPool`], [`InlineQueue`])
//!
//! ## Example
//!
//! ```
//! use budget_movements::{
//!     Account, Catalog, ChangeRecord, Engine, EntryType, ExpenseItem, FixedClock, InlineQueue,
//!     OperationKind,
//! };
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
//! let catalog = Arc::new(Catalog::new());
//! catalog.put_expense_item(ExpenseItem::new("rent", EntryType::Credit));
//! catalog.put_account(Account::new("A").with_items(["rent"]));
//!
//! let engine = Engine::builder()
//!     .catalog(catalog)
//!     .clock(Arc::new(FixedClock::new(today)))
//!     .queue(Arc::new(InlineQueue::new()))
//!     .build();
//!
//! let account = "A".into();
//! let edit = ChangeRecord::new(today, OperationKind::Fact).item("rent").sum(dec!(100));
//! engine.submit_records(&account, &[edit]).unwrap();
//!
//! let ledger = engine.ledger(&account, today);
//! assert_eq!(ledger.movement, dec!(-100));
//! assert_eq!(ledger.remaining, dec!(-100));
//! ```
//!
//! ## Concurrency
//!
//! Edits to one account are serialized during ingestion. Recompute tasks run
//! on the queue without mutual exclusion; each date's metrics are derived from
//! stored state, so a later task for the same window overwrites an earlier one
//! with the same values.

mod base;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod date_range;
mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod ledger;
pub mod operation;
pub mod planning;
pub mod scheduler;
pub mod store;
pub mod task_queue;

pub use base::{AccountId, ExpenseItemId, OperationId};
pub use catalog::{Account, Catalog, EntryType, ExpenseItem};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Settings;
pub use date_range::{DateRangeBuilder, RangeMode};
pub use engine::{Engine, EngineBuilder, SubmitOutcome};
pub use error::BudgetError;
pub use events::{ChangeEvent, DocumentEvent, EventBus, EventSink};
pub use ingest::{AppliedEdit, ChangeIngestor, IngestReport};
pub use ledger::{DailyLedger, LedgerComputer};
pub use operation::{BudgetOperation, ChangeRecord, OperationKind, parse_batch};
pub use planning::PlanningGrid;
pub use scheduler::{RecalcTask, RecalculationScheduler};
pub use store::{
    InMemoryMovementStore, InMemoryOperationStore, MetricKind, MovementKey, MovementSnapshot,
    MovementStore, OperationFilter, OperationStore,
};
pub use task_queue::{Deadline, InlineQueue, Job, JobId, TaskQueue, TaskState, WorkerPool};
