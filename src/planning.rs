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

//! Read-only pivot of operations and snapshots for planning screens.
//!
//! One [`PlanningDay`] per date in `today ± days`; inside it one row per
//! `(kind, group_index)` present on the date, with a cell per expense item
//! that has an operation in that slot. A kind with no rows gets an empty
//! group 0 row.

use crate::base::{AccountId, ExpenseItemId, OperationId};
use crate::catalog::Catalog;
use crate::date_range::contiguous;
use crate::operation::{BudgetOperation, OperationKind};
use crate::store::{MetricKind, MovementKey, MovementStore, OperationFilter, OperationStore};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// One operation shown in the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningCell {
    pub id: OperationId,
    pub sum: Decimal,
    pub transit_recipient: Option<AccountId>,
    pub description: String,
    pub comment: String,
}

impl From<&BudgetOperation> for PlanningCell {
    fn from(op: &BudgetOperation) -> Self {
        Self {
            id: op.id,
            sum: op.sum,
            transit_recipient: op.transit_recipient.clone(),
            description: op.description.clone(),
            comment: op.comment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningRow {
    pub kind: OperationKind,
    pub group_index: u32,
    pub cells: BTreeMap<ExpenseItemId, PlanningCell>,
}

impl PlanningRow {
    fn empty(kind: OperationKind, group_index: u32) -> Self {
        Self {
            kind,
            group_index,
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningDay {
    pub date: NaiveDate,
    /// Stored snapshot values; zero where none exists.
    pub metrics: BTreeMap<MetricKind, Decimal>,
    pub plan_total: Decimal,
    pub fact_total: Decimal,
    /// Fact total as a percentage of the plan total.
    pub fact_ratio: Decimal,
    pub rows: Vec<PlanningRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningGrid {
    pub account: AccountId,
    /// Columns, ordered by priority.
    pub expense_items: Vec<ExpenseItemId>,
    pub days: Vec<PlanningDay>,
}

/// Fact as a percentage of plan, two decimals. The denominator is floored to 1.
pub fn fact_ratio(fact_total: Decimal, plan_total: Decimal) -> Decimal {
    let denominator = plan_total.max(Decimal::ONE);
    (fact_total * Decimal::ONE_HUNDRED / denominator).round_dp(2)
}

/// Builds the grid for `account` over `today - days ..= today + days`.
pub fn planning_grid(
    catalog: &Catalog,
    operations: &dyn OperationStore,
    movements: &dyn MovementStore,
    account: &AccountId,
    today: NaiveDate,
    days: u32,
) -> PlanningGrid {
    let span = Days::new(u64::from(days));
    let first = today.checked_sub_days(span).unwrap_or(today);
    let last = today.checked_add_days(span).unwrap_or(today);

    let mut by_date: BTreeMap<NaiveDate, Vec<BudgetOperation>> = BTreeMap::new();
    for op in operations.select(&OperationFilter::new().account(account).from(first).until(last)) {
        by_date.entry(op.date).or_default().push(op);
    }

    let days = contiguous(first, last)
        .into_iter()
        .map(|date| {
            let ops = by_date.remove(&date).unwrap_or_default();
            planning_day(movements, account, date, &ops)
        })
        .collect();

    PlanningGrid {
        account: account.clone(),
        expense_items: catalog
            .available_expense_items(account)
            .into_iter()
            .map(|item| item.id)
            .collect(),
        days,
    }
}

fn planning_day(
    movements: &dyn MovementStore,
    account: &AccountId,
    date: NaiveDate,
    ops: &[BudgetOperation],
) -> PlanningDay {
    let metrics = MetricKind::ALL
        .into_iter()
        .map(|metric| {
            let value = movements
                .get(&MovementKey::new(account.clone(), date, metric))
                .unwrap_or(Decimal::ZERO);
            (metric, value)
        })
        .collect();

    let total = |kind: OperationKind| -> Decimal {
        ops.iter()
            .filter(|op| op.kind == kind && !op.is_placeholder())
            .map(|op| op.sum)
            .sum()
    };
    let plan_total = total(OperationKind::Plan);
    let fact_total = total(OperationKind::Fact);

    let mut rows = Vec::new();
    for kind in OperationKind::ALL {
        let mut groups: BTreeMap<u32, PlanningRow> = BTreeMap::new();
        for op in ops.iter().filter(|op| op.kind == kind) {
            let row = groups
                .entry(op.group_index)
                .or_insert_with(|| PlanningRow::empty(kind, op.group_index));
            if let Some(item) = &op.expense_item {
                row.cells.insert(item.clone(), PlanningCell::from(op));
            }
        }
        if groups.is_empty() {
            groups.insert(0, PlanningRow::empty(kind, 0));
        }
        rows.extend(groups.into_values());
    }

    PlanningDay {
        date,
        metrics,
        plan_total,
        fact_total,
        fact_ratio: fact_ratio(fact_total, plan_total),
        rows,
    }
}
