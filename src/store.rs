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

//! Repository interfaces for raw operations and computed snapshots.
//!
//! The engine only needs filtered reads and key-based upserts. The in-memory
//! implementations here back the CLI and the test-suite; durable stores plug
//! in behind the same traits.

use crate::base::{AccountId, ExpenseItemId, OperationId};
use crate::operation::{BudgetOperation, OperationKind};
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The four derived daily aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Balance,
    Movement,
    Transfer,
    Remaining,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Balance,
        MetricKind::Movement,
        MetricKind::Transfer,
        MetricKind::Remaining,
    ];
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Balance => "Balance",
            Self::Movement => "Movement",
            Self::Transfer => "Transfer",
            Self::Remaining => "Remaining",
        };
        f.write_str(name)
    }
}

/// Unique key of a movement snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MovementKey {
    pub account: AccountId,
    pub date: NaiveDate,
    pub kind: MetricKind,
}

impl MovementKey {
    pub fn new(account: AccountId, date: NaiveDate, kind: MetricKind) -> Self {
        Self {
            account,
            date,
            kind,
        }
    }
}

/// One persisted ledger cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementSnapshot {
    pub account: AccountId,
    pub date: NaiveDate,
    pub metric: MetricKind,
    pub value: Decimal,
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No prior row and the value is zero; nothing written.
    Skipped,
    Inserted,
    Updated,
    /// Row already held this exact value.
    Unchanged,
}

/// Predicate over budget operations. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    account: Option<AccountId>,
    date: Option<NaiveDate>,
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
    kind: Option<OperationKind>,
    group_index: Option<u32>,
    /// `Some(None)` selects placeholders only.
    expense_item: Option<Option<ExpenseItemId>>,
    positive_sum: bool,
    transit_recipient: Option<AccountId>,
}

impl OperationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: &AccountId) -> Self {
        self.account = Some(account.clone());
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Inclusive lower bound on the date.
    pub fn from(mut self, date: NaiveDate) -> Self {
        self.from = Some(date);
        self
    }

    /// Inclusive upper bound on the date.
    pub fn until(mut self, date: NaiveDate) -> Self {
        self.until = Some(date);
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn group(mut self, group_index: u32) -> Self {
        self.group_index = Some(group_index);
        self
    }

    pub fn placeholder(mut self) -> Self {
        self.expense_item = Some(None);
        self
    }

    pub fn positive(mut self) -> Self {
        self.positive_sum = true;
        self
    }

    pub fn transit_to(mut self, recipient: &AccountId) -> Self {
        self.transit_recipient = Some(recipient.clone());
        self
    }

    pub fn matches(&self, op: &BudgetOperation) -> bool {
        self.account.as_ref().is_none_or(|account| &op.account == account)
            && self.date.is_none_or(|date| op.date == date)
            && self.from.is_none_or(|from| op.date >= from)
            && self.until.is_none_or(|until| op.date <= until)
            && self.kind.is_none_or(|kind| op.kind == kind)
            && self.group_index.is_none_or(|group| op.group_index == group)
            && self
                .expense_item
                .as_ref()
                .is_none_or(|item| &op.expense_item == item)
            && (!self.positive_sum || op.sum > Decimal::ZERO)
            && self
                .transit_recipient
                .as_ref()
                .is_none_or(|recipient| op.transit_recipient.as_ref() == Some(recipient))
    }
}

/// Durable table of raw operations.
pub trait OperationStore: Send + Sync {
    fn get(&self, id: &OperationId) -> Option<BudgetOperation>;

    /// Operations matching `filter`, ordered by date, account, kind, group and id.
    fn select(&self, filter: &OperationFilter) -> Vec<BudgetOperation>;

    /// Inserts or replaces the row with the operation's id.
    fn save(&self, op: BudgetOperation);

    fn remove(&self, id: &OperationId) -> Option<BudgetOperation>;

    /// Distinct dates at or after `from` referenced by `account`'s operations.
    fn dates_from(&self, account: &AccountId, from: NaiveDate) -> BTreeSet<NaiveDate> {
        self.select(&OperationFilter::new().account(account).from(from))
            .into_iter()
            .map(|op| op.date)
            .collect()
    }

    fn count(&self, filter: &OperationFilter) -> usize {
        self.select(filter).len()
    }
}

/// Durable table of computed snapshots, unique on (account, date, metric).
pub trait MovementStore: Send + Sync {
    fn get(&self, key: &MovementKey) -> Option<Decimal>;

    /// Writes `value` under `key`.
    ///
    /// A zero value with no prior row is skipped; an existing row is always
    /// brought to `value`, including zero.
    fn upsert(&self, key: MovementKey, value: Decimal) -> UpsertOutcome;

    /// Distinct dates at or after `from` that hold a snapshot for `account`.
    fn dates_from(&self, account: &AccountId, from: NaiveDate) -> BTreeSet<NaiveDate>;

    /// All snapshots of `account` ordered by date and metric.
    fn snapshots(&self, account: &AccountId) -> Vec<MovementSnapshot>;
}

/// Operation table held in a [`DashMap`] keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    rows: DashMap<OperationId, BudgetOperation>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn get(&self, id: &OperationId) -> Option<BudgetOperation> {
        self.rows.get(id).map(|row| row.clone())
    }

    fn select(&self, filter: &OperationFilter) -> Vec<BudgetOperation> {
        let mut ops: Vec<BudgetOperation> = self
            .rows
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        ops.sort_by(|a, b| {
            (a.date, &a.account, a.kind, a.group_index, a.id)
                .cmp(&(b.date, &b.account, b.kind, b.group_index, b.id))
        });
        ops
    }

    fn save(&self, op: BudgetOperation) {
        self.rows.insert(op.id, op);
    }

    fn remove(&self, id: &OperationId) -> Option<BudgetOperation> {
        self.rows.remove(id).map(|(_, op)| op)
    }
}

/// Snapshot table: one ordered map per account.
#[derive(Debug, Default)]
pub struct InMemoryMovementStore {
    accounts: DashMap<AccountId, BTreeMap<(NaiveDate, MetricKind), Decimal>>,
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MovementStore for InMemoryMovementStore {
    fn get(&self, key: &MovementKey) -> Option<Decimal> {
        self.accounts
            .get(&key.account)
            .and_then(|cells| cells.get(&(key.date, key.kind)).copied())
    }

    fn upsert(&self, key: MovementKey, value: Decimal) -> UpsertOutcome {
        // Shard lock held across check-and-write.
        let mut cells = self.accounts.entry(key.account).or_default();
        match cells.get_mut(&(key.date, key.kind)) {
            Some(current) if *current == value => UpsertOutcome::Unchanged,
            Some(current) => {
                *current = value;
                UpsertOutcome::Updated
            }
            None if value.is_zero() => UpsertOutcome::Skipped,
            None => {
                cells.insert((key.date, key.kind), value);
                UpsertOutcome::Inserted
            }
        }
    }

    fn dates_from(&self, account: &AccountId, from: NaiveDate) -> BTreeSet<NaiveDate> {
        self.accounts
            .get(account)
            .map(|cells| {
                cells
                    .range((from, MetricKind::Balance)..)
                    .map(|((date, _), _)| *date)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshots(&self, account: &AccountId) -> Vec<MovementSnapshot> {
        self.accounts
            .get(account)
            .map(|cells| {
                cells
                    .iter()
                    .map(|((date, metric), value)| MovementSnapshot {
                        account: account.clone(),
                        date: *date,
                        metric: *metric,
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
