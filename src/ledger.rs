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

//! Daily ledger aggregates.
//!
//! For one account and date:
//!
//! ```text
//! Balance(d)   = Remaining(d-1)
//! Movement(d)  = Σ sign(entry_type) · sum      over the account's effective operations
//! Transfer(d)  = Σ sum                         over effective operations routed to the account
//! Remaining(d) = Balance(d) + Movement(d) + Transfer(d)
//! ```
//!
//! "Effective" depends on the reference date: Plan rows for future dates,
//! Fact rows for past dates, and for today one row kind per
//! `(account, expense item, group)` slot, Fact winning over Plan.

use crate::base::{AccountId, ExpenseItemId};
use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::error::BudgetError;
use crate::operation::{BudgetOperation, OperationKind};
use crate::store::{MetricKind, MovementKey, MovementStore, OperationFilter, OperationStore};
use crate::task_queue::Deadline;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The four metrics of one account on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyLedger {
    pub date: NaiveDate,
    pub balance: Decimal,
    pub movement: Decimal,
    pub transfer: Decimal,
    pub remaining: Decimal,
}

impl DailyLedger {
    pub fn get(&self, metric: MetricKind) -> Decimal {
        match metric {
            MetricKind::Balance => self.balance,
            MetricKind::Movement => self.movement,
            MetricKind::Transfer => self.transfer,
            MetricKind::Remaining => self.remaining,
        }
    }
}

/// Selects the operations that count towards `date`, given the reference date.
///
/// Rows with a zero sum never count.
pub fn select_effective(
    ops: Vec<BudgetOperation>,
    date: NaiveDate,
    today: NaiveDate,
) -> Vec<BudgetOperation> {
    let positive = ops.into_iter().filter(|op| op.sum > Decimal::ZERO);
    match date.cmp(&today) {
        Ordering::Greater => positive.filter(|op| op.kind == OperationKind::Plan).collect(),
        Ordering::Less => positive.filter(|op| op.kind == OperationKind::Fact).collect(),
        Ordering::Equal => {
            let mut slots: BTreeMap<(AccountId, Option<ExpenseItemId>, u32), Vec<BudgetOperation>> =
                BTreeMap::new();
            for op in positive {
                slots
                    .entry((op.account.clone(), op.expense_item.clone(), op.group_index))
                    .or_default()
                    .push(op);
            }
            slots
                .into_values()
                .flat_map(|slot| {
                    let kind = if slot.iter().any(|op| op.kind == OperationKind::Fact) {
                        OperationKind::Fact
                    } else {
                        OperationKind::Plan
                    };
                    slot.into_iter().filter(move |op| op.kind == kind)
                })
                .collect()
        }
    }
}

/// Computes and persists ledger metrics.
#[derive(Clone)]
pub struct LedgerComputer {
    operations: Arc<dyn OperationStore>,
    movements: Arc<dyn MovementStore>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
}

impl LedgerComputer {
    pub fn new(
        operations: Arc<dyn OperationStore>,
        movements: Arc<dyn MovementStore>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            operations,
            movements,
            catalog,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Remaining of the previous day, zero when no snapshot exists.
    pub fn balance(&self, account: &AccountId, date: NaiveDate) -> Decimal {
        date.pred_opt()
            .and_then(|previous| {
                self.movements.get(&MovementKey::new(
                    account.clone(),
                    previous,
                    MetricKind::Remaining,
                ))
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Signed sum of the account's own effective operations.
    ///
    /// Operations whose expense item is missing from the catalog contribute zero.
    pub fn movement(&self, account: &AccountId, date: NaiveDate) -> Decimal {
        let ops = self
            .operations
            .select(&OperationFilter::new().account(account).date(date).positive());
        select_effective(ops, date, self.today())
            .iter()
            .map(|op| {
                let sign = op
                    .expense_item
                    .as_ref()
                    .and_then(|item| self.catalog.entry_type(item))
                    .map(|entry_type| entry_type.sign())
                    .unwrap_or(Decimal::ZERO);
                sign * op.sum
            })
            .sum()
    }

    /// Unsigned sum of effective operations, from any account, routed to `account`.
    pub fn transfer(&self, account: &AccountId, date: NaiveDate) -> Decimal {
        let ops = self
            .operations
            .select(&OperationFilter::new().transit_to(account).date(date).positive());
        select_effective(ops, date, self.today())
            .iter()
            .map(|op| op.sum)
            .sum()
    }

    /// Computes all four metrics for one date and persists them.
    ///
    /// Remaining is written last so it never precedes its inputs.
    pub fn compute_date(&self, account: &AccountId, date: NaiveDate) -> DailyLedger {
        let balance = self.balance(account, date);
        let movement = self.movement(account, date);
        let transfer = self.transfer(account, date);
        let ledger = DailyLedger {
            date,
            balance,
            movement,
            transfer,
            remaining: balance + movement + transfer,
        };

        for metric in MetricKind::ALL {
            self.movements.upsert(
                MovementKey::new(account.clone(), date, metric),
                ledger.get(metric),
            );
        }

        debug!(
            %account,
            %date,
            %balance,
            %movement,
            %transfer,
            remaining = %ledger.remaining,
            "computed ledger"
        );
        ledger
    }

    /// Computes `dates` in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::TaskTimedOut`] once `deadline` passes; dates
    /// already computed stay persisted.
    pub fn compute_dates(
        &self,
        account: &AccountId,
        dates: &[NaiveDate],
        deadline: &Deadline,
    ) -> Result<Vec<DailyLedger>, BudgetError> {
        debug_assert!(dates.windows(2).all(|pair| pair[0] < pair[1]));
        let mut computed = Vec::with_capacity(dates.len());
        for date in dates {
            deadline.check()?;
            computed.push(self.compute_date(account, *date));
        }
        Ok(computed)
    }
}
