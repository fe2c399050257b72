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

//! Ledger computation integration tests.

use budget_movements::{
    Account, AccountId, BudgetError, BudgetOperation, Catalog, Deadline, EntryType, ExpenseItem,
    ExpenseItemId, FixedClock, InMemoryMovementStore, InMemoryOperationStore, LedgerComputer,
    MetricKind, MovementKey, MovementStore, OperationKind, OperationStore,
    date_range::contiguous,
};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const TODAY: &str = "2025-03-15";

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct World {
    operations: Arc<InMemoryOperationStore>,
    movements: Arc<InMemoryMovementStore>,
    computer: LedgerComputer,
}

fn world() -> World {
    let catalog = Arc::new(Catalog::new());
    catalog.put_expense_item(ExpenseItem::new("Salary", EntryType::Debit));
    catalog.put_expense_item(ExpenseItem::new("Rent", EntryType::Credit));
    catalog.put_expense_item(ExpenseItem::new("Opening", EntryType::Balance));
    catalog.put_expense_item(ExpenseItem::new("Move", EntryType::Credit).transit());
    for id in ["A", "B"] {
        catalog.put_account(Account::new(id).with_items(["Salary", "Rent", "Opening", "Move"]));
    }

    let operations = Arc::new(InMemoryOperationStore::new());
    let movements = Arc::new(InMemoryMovementStore::new());
    let computer = LedgerComputer::new(
        operations.clone(),
        movements.clone(),
        catalog,
        Arc::new(FixedClock::new(date(TODAY))),
    );
    World {
        operations,
        movements,
        computer,
    }
}

fn op(account: &str, day: &str, kind: OperationKind, item: &str, sum: Decimal) -> BudgetOperation {
    let mut op = BudgetOperation::placeholder(AccountId::new(account), date(day), kind, 0);
    op.expense_item = Some(ExpenseItemId::new(item));
    op.sum = sum;
    op
}

fn stored(world: &World, account: &str, day: &str, metric: MetricKind) -> Option<Decimal> {
    world
        .movements
        .get(&MovementKey::new(AccountId::new(account), date(day), metric))
}

#[test]
fn remaining_is_balance_plus_movement_plus_transfer() {
    let w = world();
    w.operations.save(op("A", "2025-03-10", OperationKind::Fact, "Salary", dec!(1000)));
    w.operations.save(op("A", "2025-03-12", OperationKind::Fact, "Rent", dec!(300)));
    let mut transit = op("B", "2025-03-13", OperationKind::Fact, "Move", dec!(50));
    transit.transit_recipient = Some(AccountId::new("A"));
    w.operations.save(transit);
    w.operations.save(op("A", "2025-03-18", OperationKind::Plan, "Rent", dec!(25)));

    let dates = contiguous(date("2025-03-10"), date("2025-03-20"));
    let ledgers = w
        .computer
        .compute_dates(&AccountId::new("A"), &dates, &Deadline::none())
        .unwrap();

    for ledger in &ledgers {
        assert_eq!(ledger.remaining, ledger.balance + ledger.movement + ledger.transfer);
    }
    for pair in ledgers.windows(2) {
        assert_eq!(pair[1].balance, pair[0].remaining);
    }
    assert_eq!(ledgers.last().unwrap().remaining, dec!(725));
}

#[test]
fn future_fact_is_not_counted() {
    let w = world();
    let a = AccountId::new("A");
    w.operations.save(op("A", "2025-03-20", OperationKind::Fact, "Salary", dec!(100)));

    assert_eq!(w.computer.movement(&a, date("2025-03-20")), Decimal::ZERO);

    w.operations.save(op("A", "2025-03-20", OperationKind::Plan, "Salary", dec!(40)));
    assert_eq!(w.computer.movement(&a, date("2025-03-20")), dec!(40));
}

#[test]
fn past_plan_is_not_counted() {
    let w = world();
    w.operations.save(op("A", "2025-03-01", OperationKind::Plan, "Salary", dec!(100)));
    assert_eq!(
        w.computer.movement(&AccountId::new("A"), date("2025-03-01")),
        Decimal::ZERO
    );
}

#[test]
fn entry_type_controls_movement_sign() {
    let w = world();
    let a = AccountId::new("A");
    w.operations.save(op("A", "2025-03-01", OperationKind::Fact, "Rent", dec!(100)));
    w.operations.save(op("A", "2025-03-02", OperationKind::Fact, "Salary", dec!(100)));
    w.operations.save(op("A", "2025-03-03", OperationKind::Fact, "Opening", dec!(100)));

    assert_eq!(w.computer.movement(&a, date("2025-03-01")), dec!(-100));
    assert_eq!(w.computer.movement(&a, date("2025-03-02")), dec!(100));
    assert_eq!(w.computer.movement(&a, date("2025-03-03")), Decimal::ZERO);
}

#[test]
fn transfer_adds_without_sign() {
    let w = world();
    let mut transit = op("A", "2025-03-05", OperationKind::Fact, "Move", dec!(50));
    transit.transit_recipient = Some(AccountId::new("B"));
    w.operations.save(transit);

    assert_eq!(w.computer.transfer(&AccountId::new("B"), date("2025-03-05")), dec!(50));
    assert_eq!(w.computer.movement(&AccountId::new("A"), date("2025-03-05")), dec!(-50));
    assert_eq!(w.computer.transfer(&AccountId::new("A"), date("2025-03-05")), Decimal::ZERO);
}

#[test]
fn fact_wins_over_plan_today() {
    let w = world();
    let a = AccountId::new("A");
    w.operations.save(op("A", TODAY, OperationKind::Plan, "Salary", dec!(200)));
    w.operations.save(op("A", TODAY, OperationKind::Fact, "Salary", dec!(180)));

    let next = date(TODAY).checked_add_days(Days::new(1)).unwrap();
    let ledgers = w
        .computer
        .compute_dates(&a, &[date(TODAY), next], &Deadline::none())
        .unwrap();

    assert_eq!(ledgers[0].movement, dec!(180));
    assert_eq!(ledgers[0].balance, Decimal::ZERO);
    assert_eq!(ledgers[0].transfer, Decimal::ZERO);
    assert_eq!(ledgers[0].remaining, dec!(180));
    assert_eq!(ledgers[1].balance, dec!(180));
}

#[test]
fn plan_counts_today_while_fact_is_empty() {
    let w = world();
    let a = AccountId::new("A");
    w.operations.save(op("A", TODAY, OperationKind::Plan, "Rent", dec!(70)));
    w.operations.save(op("A", TODAY, OperationKind::Fact, "Rent", Decimal::ZERO));

    assert_eq!(w.computer.movement(&a, date(TODAY)), dec!(-70));
}

#[test]
fn today_groups_are_selected_independently() {
    let w = world();
    let a = AccountId::new("A");
    w.operations.save(op("A", TODAY, OperationKind::Plan, "Salary", dec!(200)));
    w.operations.save(op("A", TODAY, OperationKind::Fact, "Salary", dec!(180)));
    let mut second_plan = op("A", TODAY, OperationKind::Plan, "Salary", dec!(30));
    second_plan.group_index = 1;
    w.operations.save(second_plan);

    assert_eq!(w.computer.movement(&a, date(TODAY)), dec!(210));
}

#[test]
fn missing_expense_item_contributes_zero() {
    let w = world();
    w.operations.save(op("A", "2025-03-01", OperationKind::Fact, "Unknown", dec!(999)));
    w.operations.save(op("A", "2025-03-01", OperationKind::Fact, "Salary", dec!(1)));

    assert_eq!(w.computer.movement(&AccountId::new("A"), date("2025-03-01")), dec!(1));
}

#[test]
fn zero_values_are_not_written_until_a_row_exists() {
    let w = world();
    let a = AccountId::new("A");
    let day = "2025-03-01";

    w.computer.compute_date(&a, date(day));
    for metric in MetricKind::ALL {
        assert_eq!(stored(&w, "A", day, metric), None);
    }

    let salary = op("A", day, OperationKind::Fact, "Salary", dec!(10));
    let id = salary.id;
    w.operations.save(salary);
    w.computer.compute_date(&a, date(day));
    assert_eq!(stored(&w, "A", day, MetricKind::Movement), Some(dec!(10)));
    assert_eq!(stored(&w, "A", day, MetricKind::Balance), None);

    w.operations.remove(&id);
    w.computer.compute_date(&a, date(day));
    assert_eq!(stored(&w, "A", day, MetricKind::Movement), Some(Decimal::ZERO));
    assert_eq!(stored(&w, "A", day, MetricKind::Remaining), Some(Decimal::ZERO));
}

#[test]
fn expired_deadline_stops_the_window() {
    let w = world();
    w.operations.save(op("A", "2025-03-01", OperationKind::Fact, "Salary", dec!(10)));

    let result = w.computer.compute_dates(
        &AccountId::new("A"),
        &[date("2025-03-01")],
        &Deadline::after(Duration::ZERO),
    );

    assert_eq!(result, Err(BudgetError::TaskTimedOut));
    assert_eq!(stored(&w, "A", "2025-03-01", MetricKind::Movement), None);
}
