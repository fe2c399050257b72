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

//! Applies user edit batches to the operation store.
//!
//! Every edit is written immediately; there is no batch-wide transaction.
//! Writes keep the Plan/Fact pairing: each Plan row has a Fact row (possibly
//! an empty placeholder) on the same account, date and group index.

use crate::base::{AccountId, OperationId};
use crate::catalog::Catalog;
use crate::error::BudgetError;
use crate::operation::{BudgetOperation, ChangeRecord, OperationKind};
use crate::store::{OperationFilter, OperationStore};
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The effect of one applied edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub date: NaiveDate,
    /// Rows created or overwritten, in write order.
    pub written: Vec<OperationId>,
    /// Account whose Transfer the edited row now feeds.
    pub transit_recipient: Option<AccountId>,
    /// Account the edited row fed before this edit and no longer does.
    pub displaced_recipient: Option<AccountId>,
}

/// Result of applying a batch: the applied prefix and the edit that stopped it.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub applied: Vec<AppliedEdit>,
    pub error: Option<BudgetError>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Validates and writes edit records.
pub struct ChangeIngestor {
    operations: Arc<dyn OperationStore>,
    catalog: Arc<Catalog>,
    /// Serializes group index allocation per account.
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl ChangeIngestor {
    pub fn new(operations: Arc<dyn OperationStore>, catalog: Arc<Catalog>) -> Self {
        Self {
            operations,
            catalog,
            locks: DashMap::new(),
        }
    }

    /// Applies `changes` in order, stopping at the first failing edit.
    ///
    /// Edits applied before the failure stay written.
    pub fn apply_batch(&self, account: &AccountId, changes: &[ChangeRecord]) -> IngestReport {
        let mut report = IngestReport::default();
        for (position, change) in changes.iter().enumerate() {
            match self.apply(account, change) {
                Ok(applied) => report.applied.push(applied),
                Err(error) => {
                    warn!(%account, position, %error, "edit rejected, batch stopped");
                    report.error = Some(error);
                    break;
                }
            }
        }
        info!(
            %account,
            edits = changes.len(),
            applied = report.applied.len(),
            "ingested change batch"
        );
        report
    }

    /// Applies one edit.
    ///
    /// # Errors
    ///
    /// - [`BudgetError::UnknownAccount`] - Account or transit recipient is not registered.
    /// - [`BudgetError::UnknownExpenseItem`] - Expense item is not registered.
    /// - [`BudgetError::NegativeSum`] - Sum is below zero.
    /// - [`BudgetError::GroupIndexExhausted`] - The date has no group index left to allocate.
    pub fn apply(
        &self,
        account: &AccountId,
        change: &ChangeRecord,
    ) -> Result<AppliedEdit, BudgetError> {
        self.validate(account, change)?;

        let lock = self.locks.entry(account.clone()).or_default().clone();
        let _guard = lock.lock();

        if change.is_placeholder() {
            self.apply_placeholder(account, change.date, change.kind)
        } else {
            self.apply_item(account, change)
        }
    }

    fn validate(&self, account: &AccountId, change: &ChangeRecord) -> Result<(), BudgetError> {
        if !self.catalog.contains_account(account) {
            return Err(BudgetError::UnknownAccount(account.clone()));
        }
        if change.sum.is_some_and(|sum| sum < Decimal::ZERO) {
            return Err(BudgetError::NegativeSum);
        }
        if let Some(item) = &change.expense_item {
            if self.catalog.expense_item(item).is_none() {
                return Err(BudgetError::UnknownExpenseItem(item.clone()));
            }
        }
        if let Some(recipient) = &change.transit_recipient {
            if !self.catalog.contains_account(recipient) {
                return Err(BudgetError::UnknownAccount(recipient.clone()));
            }
        }
        Ok(())
    }

    /// A cleared row: opens a fresh group of empty rows on the date.
    fn apply_placeholder(
        &self,
        account: &AccountId,
        date: NaiveDate,
        kind: OperationKind,
    ) -> Result<AppliedEdit, BudgetError> {
        let day = OperationFilter::new().account(account).date(date);
        let mut written = Vec::new();

        if self.operations.count(&day) == 0 {
            written.push(self.create_placeholder(account, date, OperationKind::Plan, 0));
            written.push(self.create_placeholder(account, date, OperationKind::Fact, 0));
        }

        let group = self.next_group_index(&day, date)?;
        written.push(self.create_placeholder(account, date, OperationKind::Fact, group));
        if kind == OperationKind::Plan {
            written.push(self.create_placeholder(account, date, OperationKind::Plan, group));
        }

        debug!(%account, %date, group, rows = written.len(), "opened placeholder group");
        Ok(AppliedEdit {
            date,
            written,
            transit_recipient: None,
            displaced_recipient: None,
        })
    }

    fn apply_item(
        &self,
        account: &AccountId,
        change: &ChangeRecord,
    ) -> Result<AppliedEdit, BudgetError> {
        let mut op = match self.locate(account, change) {
            Some(op) => op,
            None => {
                let group = match change.group_index {
                    Some(group) => group,
                    None => {
                        let slot = OperationFilter::new()
                            .account(account)
                            .date(change.date)
                            .kind(change.kind);
                        self.next_group_index(&slot, change.date)?
                    }
                };
                BudgetOperation::placeholder(account.clone(), change.date, change.kind, group)
            }
        };

        let previous_recipient = op.transit_recipient.take();
        op.apply(change);
        self.operations.save(op.clone());
        debug!(%account, id = %op.id, date = %op.date, group = op.group_index, "wrote operation");

        let mut written = vec![op.id];
        if op.kind == OperationKind::Plan {
            written.extend(self.ensure_fact(&op.account, op.date, op.group_index));
        }

        let displaced_recipient =
            previous_recipient.filter(|previous| op.transit_recipient.as_ref() != Some(previous));
        Ok(AppliedEdit {
            date: op.date,
            written,
            transit_recipient: op.transit_recipient,
            displaced_recipient,
        })
    }

    /// Existing row by id, or the empty slot the edit fills.
    fn locate(&self, account: &AccountId, change: &ChangeRecord) -> Option<BudgetOperation> {
        match change.id {
            Some(id) => self
                .operations
                .get(&id)
                .filter(|existing| &existing.account == account),
            None => {
                let group = change.group_index?;
                self.operations
                    .select(
                        &OperationFilter::new()
                            .account(account)
                            .date(change.date)
                            .kind(change.kind)
                            .group(group)
                            .placeholder(),
                    )
                    .into_iter()
                    .next()
            }
        }
    }

    fn ensure_fact(&self, account: &AccountId, date: NaiveDate, group: u32) -> Option<OperationId> {
        let fact = OperationFilter::new()
            .account(account)
            .date(date)
            .kind(OperationKind::Fact)
            .group(group);
        if self.operations.count(&fact) > 0 {
            return None;
        }
        Some(self.create_placeholder(account, date, OperationKind::Fact, group))
    }

    fn next_group_index(
        &self,
        filter: &OperationFilter,
        date: NaiveDate,
    ) -> Result<u32, BudgetError> {
        match self.operations.select(filter).iter().map(|op| op.group_index).max() {
            None => Ok(0),
            Some(max) => max
                .checked_add(1)
                .ok_or(BudgetError::GroupIndexExhausted(date)),
        }
    }

    fn create_placeholder(
        &self,
        account: &AccountId,
        date: NaiveDate,
        kind: OperationKind,
        group: u32,
    ) -> OperationId {
        let op = BudgetOperation::placeholder(account.clone(), date, kind, group);
        let id = op.id;
        self.operations.save(op);
        id
    }
}
