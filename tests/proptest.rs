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

//! Property-based tests for the ledger recurrence.
//!
//! These tests verify invariants that should hold for any set of operations
//! around the reference date.

use budget_movements::{
    Account, AccountId, BudgetOperation, Catalog, Deadline, EntryType, ExpenseItem,
    ExpenseItemId, FixedClock, InMemoryMovementStore, InMemoryOperationStore, LedgerComputer,
    MetricKind, MovementKey, MovementStore, OperationKind, OperationStore, RangeMode,
    date_range::DateRangeBuilder,
};
use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

const ITEMS: [&str; 4] = ["Salary", "Rent", "Opening", "Missing"];
const ACCOUNTS: [&str; 2] = ["A", "B"];

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
}

/// A sum from 0 to 10000 with 2 decimal places.
fn arb_sum() -> impl Strategy<Value = Decimal> {
    (0i64..=1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

#[derive(Debug, Clone)]
struct OpSpec {
    account: usize,
    offset: i64,
    fact: bool,
    item: usize,
    group: u32,
    sum: Decimal,
    transit: Option<usize>,
}

fn arb_op() -> impl Strategy<Value = OpSpec> {
    (
        0..ACCOUNTS.len(),
        -10i64..=10,
        any::<bool>(),
        0..ITEMS.len(),
        0u32..3,
        arb_sum(),
        prop::option::of(0..ACCOUNTS.len()),
    )
        .prop_map(|(account, offset, fact, item, group, sum, transit)| OpSpec {
            account,
            offset,
            fact,
            item,
            group,
            sum,
            transit,
        })
}

impl OpSpec {
    fn build(&self) -> BudgetOperation {
        let day = if self.offset < 0 {
            today().checked_sub_days(Days::new(self.offset.unsigned_abs()))
        } else {
            today().checked_add_days(Days::new(self.offset.unsigned_abs()))
        }
        .unwrap();
        let kind = if self.fact {
            OperationKind::Fact
        } else {
            OperationKind::Plan
        };
        let mut op =
            BudgetOperation::placeholder(AccountId::new(ACCOUNTS[self.account]), day, kind, self.group);
        op.expense_item = Some(ExpenseItemId::new(ITEMS[self.item]));
        op.sum = self.sum;
        op.transit_recipient = self.transit.map(|i| AccountId::new(ACCOUNTS[i]));
        op
    }
}

struct World {
    movements: Arc<InMemoryMovementStore>,
    computer: LedgerComputer,
    ranges: DateRangeBuilder,
}

fn world(ops: &[OpSpec]) -> World {
    let catalog = Arc::new(Catalog::new());
    catalog.put_expense_item(ExpenseItem::new("Salary", EntryType::Debit));
    catalog.put_expense_item(ExpenseItem::new("Rent", EntryType::Credit));
    catalog.put_expense_item(ExpenseItem::new("Opening", EntryType::Balance));
    for id in ACCOUNTS {
        catalog.put_account(Account::new(id).with_items(["Salary", "Rent", "Opening"]));
    }
    let operations = Arc::new(InMemoryOperationStore::new());
    for op in ops {
        operations.save(op.build());
    }
    let movements = Arc::new(InMemoryMovementStore::new());
    let clock = Arc::new(FixedClock::new(today()));
    World {
        computer: LedgerComputer::new(
            operations.clone(),
            movements.clone(),
            catalog,
            clock.clone(),
        ),
        ranges: DateRangeBuilder::new(operations, movements.clone(), clock),
        movements,
    }
}

fn rescan(world: &World, account: &AccountId) -> Vec<NaiveDate> {
    let horizon = today().checked_add_days(Days::new(15)).unwrap();
    let start = today().checked_sub_days(Days::new(15)).unwrap();
    let dates = world
        .ranges
        .build(account, horizon, Some(start), RangeMode::FullRescan);
    world
        .computer
        .compute_dates(account, &dates, &Deadline::none())
        .unwrap();
    dates
}

fn value(world: &World, account: &AccountId, date: NaiveDate, metric: MetricKind) -> Decimal {
    world
        .movements
        .get(&MovementKey::new(account.clone(), date, metric))
        .unwrap_or(Decimal::ZERO)
}

// =============================================================================
// Recurrence Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Remaining is the sum of its parts and carries into the next Balance.
    #[test]
    fn remaining_recurrence_holds(ops in prop::collection::vec(arb_op(), 0..25)) {
        let world = world(&ops);

        for name in ACCOUNTS {
            let account = AccountId::new(name);
            let dates = rescan(&world, &account);
            prop_assert!(dates.contains(&today()));

            for date in &dates {
                let balance = value(&world, &account, *date, MetricKind::Balance);
                let movement = value(&world, &account, *date, MetricKind::Movement);
                let transfer = value(&world, &account, *date, MetricKind::Transfer);
                let remaining = value(&world, &account, *date, MetricKind::Remaining);
                prop_assert_eq!(remaining, balance + movement + transfer);
            }
            for pair in dates.windows(2) {
                prop_assert_eq!(
                    value(&world, &account, pair[1], MetricKind::Balance),
                    value(&world, &account, pair[0], MetricKind::Remaining)
                );
            }
        }
    }

    /// Recomputing a stable window changes nothing.
    #[test]
    fn recompute_is_idempotent(ops in prop::collection::vec(arb_op(), 0..25)) {
        let world = world(&ops);
        let accounts: Vec<AccountId> = ACCOUNTS.into_iter().map(AccountId::new).collect();

        for account in &accounts {
            rescan(&world, account);
        }
        let first: Vec<_> = accounts.iter().flat_map(|a| world.movements.snapshots(a)).collect();

        for account in &accounts {
            rescan(&world, account);
        }
        let second: Vec<_> = accounts.iter().flat_map(|a| world.movements.snapshots(a)).collect();

        prop_assert_eq!(first, second);
    }

    /// Transfers add the raw sum regardless of the item's entry type.
    #[test]
    fn transfer_is_never_negative(ops in prop::collection::vec(arb_op(), 0..25)) {
        let world = world(&ops);
        for name in ACCOUNTS {
            let account = AccountId::new(name);
            for date in rescan(&world, &account) {
                prop_assert!(value(&world, &account, date, MetricKind::Transfer) >= Decimal::ZERO);
            }
        }
    }
}
