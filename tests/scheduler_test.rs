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

//! Recompute scheduling: cascades to transit recipients, horizon extension,
//! and execution on the worker pool.

use budget_movements::{
    Account, AccountId, AppliedEdit, Catalog, ChangeEvent, ChangeRecord, Engine, EntryType,
    ExpenseItem, FixedClock, InlineQueue, MetricKind, MovementKey, MovementStore, OperationFilter,
    OperationKind, OperationStore, RangeMode, Settings, TaskQueue, TaskState, WorkerPool,
    scheduler::plan_batch,
};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn today() -> NaiveDate {
    date("2025-03-15")
}

fn catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    catalog.put_expense_item(ExpenseItem::new("Salary", EntryType::Debit));
    catalog.put_expense_item(ExpenseItem::new("Move", EntryType::Credit).transit());
    for id in ["A", "B", "C"] {
        catalog.put_account(Account::new(id).with_items(["Salary", "Move"]));
    }
    catalog
}

fn inline_engine() -> Engine {
    Engine::builder()
        .catalog(catalog())
        .clock(Arc::new(FixedClock::new(today())))
        .queue(Arc::new(InlineQueue::new()))
        .build()
}

fn pooled_engine(timeout: Duration) -> (Engine, Arc<WorkerPool>) {
    let pool = Arc::new(WorkerPool::new(4, timeout));
    let engine = Engine::builder()
        .settings(Settings::default().with_task_timeout(timeout))
        .catalog(catalog())
        .clock(Arc::new(FixedClock::new(today())))
        .queue(pool.clone())
        .build();
    (engine, pool)
}

fn transit(day: NaiveDate, sum: Decimal, recipient: &str) -> ChangeRecord {
    ChangeRecord::new(day, OperationKind::Fact)
        .item("Move")
        .sum(sum)
        .transit_to(recipient)
}

fn edit(day: &str, recipient: Option<&str>, displaced: Option<&str>) -> AppliedEdit {
    AppliedEdit {
        date: date(day),
        written: Vec::new(),
        transit_recipient: recipient.map(AccountId::new),
        displaced_recipient: displaced.map(AccountId::new),
    }
}

#[test]
fn batch_plans_recipients_then_edited_account() {
    let a = AccountId::new("A");
    let tasks = plan_batch(
        &a,
        &[
            edit("2025-03-10", Some("B"), None),
            edit("2025-03-20", Some("C"), Some("B")),
            edit("2025-03-12", None, None),
        ],
    );

    let accounts: Vec<&str> = tasks.iter().map(|task| task.account.as_str()).collect();
    assert_eq!(accounts, ["B", "C", "A"]);
    for task in &tasks {
        assert_eq!(task.mode, RangeMode::Incremental);
        assert_eq!(task.target_date, date("2025-03-20"));
        assert_eq!(task.window_start, Some(date("2025-03-10")));
        assert!(task.extend_horizon);
    }
}

#[test]
fn transit_edit_recomputes_recipient() {
    let engine = inline_engine();
    let events = engine.subscribe();
    let a = AccountId::new("A");
    let b = AccountId::new("B");
    let day = date("2025-03-12");

    let outcome = engine
        .submit_records(&a, &[transit(day, dec!(500), "B")])
        .unwrap();

    assert!(outcome.success);
    assert_eq!(engine.snapshot(&b, day, MetricKind::Transfer), dec!(500));
    assert_eq!(engine.snapshot(&b, today(), MetricKind::Remaining), dec!(500));
    assert_eq!(engine.snapshot(&a, day, MetricKind::Movement), dec!(-500));

    let notified: BTreeSet<String> = events
        .try_iter()
        .filter_map(|event| match event {
            ChangeEvent::AccountChanged(account) => Some(account.to_string()),
            ChangeEvent::FullRefresh => None,
        })
        .collect();
    assert_eq!(notified, BTreeSet::from(["A".to_owned(), "B".to_owned()]));
}

#[test]
fn repointing_transit_clears_previous_recipient() {
    let engine = inline_engine();
    let a = AccountId::new("A");
    let day = date("2025-03-12");
    let outcome = engine
        .submit_records(&a, &[transit(day, dec!(500), "B")])
        .unwrap();
    assert!(!outcome.jobs.is_empty());

    let id = engine
        .operations()
        .select(&OperationFilter::new().account(&a))[0]
        .id;
    engine
        .submit_records(&a, &[transit(day, dec!(500), "C").with_id(id)])
        .unwrap();

    let b = AccountId::new("B");
    assert_eq!(engine.snapshot(&b, day, MetricKind::Transfer), Decimal::ZERO);
    assert_eq!(engine.snapshot(&b, today(), MetricKind::Remaining), Decimal::ZERO);
    let c = AccountId::new("C");
    assert_eq!(engine.snapshot(&c, day, MetricKind::Transfer), dec!(500));
}

#[test]
fn horizon_follows_every_edit() {
    let engine = inline_engine();
    let a = AccountId::new("A");
    let edit = ChangeRecord::new(today(), OperationKind::Fact)
        .item("Salary")
        .sum(dec!(100));

    engine.submit_records(&a, &[edit]).unwrap();

    let horizon = today().checked_add_days(Days::new(30)).unwrap();
    assert_eq!(engine.snapshot(&a, horizon, MetricKind::Remaining), dec!(100));
    let beyond = horizon.succ_opt().unwrap();
    let key = MovementKey::new(a, beyond, MetricKind::Remaining);
    assert_eq!(engine.movements().get(&key), None);
}

#[test]
fn extend_horizon_covers_every_account() {
    let engine = inline_engine();
    let jobs = engine.extend_horizon(None, None).unwrap();
    assert_eq!(jobs.len(), 3);

    let jobs = engine.extend_horizon(Some(&AccountId::new("A")), None).unwrap();
    assert_eq!(jobs.len(), 1);
}

#[test]
fn worker_pool_converges_after_many_batches() {
    let (engine, pool) = pooled_engine(Duration::from_secs(30));
    let a = AccountId::new("A");

    for offset in 0..10u64 {
        let day = date("2025-03-01").checked_add_days(Days::new(offset)).unwrap();
        let salary = ChangeRecord::new(day, OperationKind::Fact)
            .item("Salary")
            .sum(dec!(10));
        engine.submit_records(&a, &[salary]).unwrap();
        pool.wait_idle();
    }
    engine.submit_records(&a, &[transit(date("2025-03-05"), dec!(30), "B")]).unwrap();
    pool.wait_idle();

    assert_eq!(engine.snapshot(&a, today(), MetricKind::Remaining), dec!(70));
    assert_eq!(engine.snapshot(&AccountId::new("B"), today(), MetricKind::Remaining), dec!(30));
    assert_eq!(pool.stats().failed, 0);
    assert!(pool.stats().completed >= 22);
}

#[test]
fn finished_jobs_report_done() {
    let (engine, pool) = pooled_engine(Duration::from_secs(30));
    let jobs = engine.extend_horizon(None, None).unwrap();
    pool.wait_idle();
    for job in jobs {
        assert_eq!(pool.state(job), Some(TaskState::Done));
    }
}

#[test]
fn timed_out_task_stops_without_writing() {
    let (engine, pool) = pooled_engine(Duration::ZERO);
    let a = AccountId::new("A");
    let edit = ChangeRecord::new(date("2025-03-10"), OperationKind::Fact)
        .item("Salary")
        .sum(dec!(5));

    let outcome = engine.submit_records(&a, &[edit]).unwrap();
    pool.wait_idle();

    assert!(outcome.success);
    assert_eq!(engine.operations().count(&OperationFilter::new()), 1);
    assert_eq!(engine.snapshot(&a, date("2025-03-10"), MetricKind::Movement), Decimal::ZERO);
    assert_eq!(pool.stats().failed, 1);
}

#[test]
fn closed_pool_refuses_work() {
    let (engine, pool) = pooled_engine(Duration::from_secs(30));
    pool.close();
    let edit = ChangeRecord::new(today(), OperationKind::Fact)
        .item("Salary")
        .sum(dec!(5));

    let outcome = engine.submit_records(&AccountId::new("A"), &[edit]).unwrap();

    assert!(outcome.success);
    assert!(outcome.jobs.is_empty());
    assert!(engine.extend_horizon(None, None).is_err());
}
