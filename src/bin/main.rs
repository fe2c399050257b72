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

use budget_movements::{
    Account, AccountId, BudgetOperation, Catalog, Clock, Engine, EntryType, ExpenseItem,
    ExpenseItemId, FixedClock, OperationFilter, OperationId, OperationKind, Settings, SystemClock,
    WorkerPool,
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Budget Movements - Recompute daily ledgers from operation CSV files
///
/// Loads the catalog and operations, optionally applies a JSON edit batch,
/// recomputes every account through the Plan horizon and writes all
/// snapshots to stdout.
#[derive(Parser, Debug)]
#[command(name = "budget-movements")]
#[command(about = "Recomputes balance, movement, transfer and remaining ledgers", long_about = None)]
struct Args {
    /// Expense items CSV
    ///
    /// Expected format: id,entry_type,transit,priority,mandatory
    #[arg(long, value_name = "FILE")]
    expense_items: PathBuf,

    /// Accounts CSV
    ///
    /// Expected format: id,organization,bank,expense_items (items separated by ';')
    #[arg(long, value_name = "FILE")]
    accounts: PathBuf,

    /// Operations CSV
    ///
    /// Expected format: date,kind,account,expense_item,sum,transit_recipient,group_index,description
    #[arg(long, value_name = "FILE")]
    operations: PathBuf,

    /// JSON array of edits to submit before the final recompute
    #[arg(long, value_name = "FILE", requires = "account")]
    changes: Option<PathBuf>,

    /// Account the edit batch applies to
    #[arg(long, requires = "changes")]
    account: Option<String>,

    /// Overrides the current date (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,

    #[arg(long, env = "BUDGET_TIMEZONE", default_value = "Europe/Moscow")]
    timezone: String,

    #[arg(long, env = "BUDGET_HORIZON_DAYS", default_value_t = 30)]
    horizon_days: u32,

    #[arg(long, env = "BUDGET_WORKERS", default_value_t = 4)]
    workers: usize,

    #[arg(long, env = "BUDGET_TASK_TIMEOUT_SECS", default_value_t = 300)]
    task_timeout_secs: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("budget_movements=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let timezone = match args.timezone.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Invalid timezone '{}': {}", args.timezone, e);
            process::exit(1);
        }
    };
    let settings = Settings::default()
        .with_timezone(timezone)
        .with_horizon_days(args.horizon_days)
        .with_workers(args.workers)
        .with_task_timeout(Duration::from_secs(args.task_timeout_secs));

    let catalog = Arc::new(Catalog::new());
    for (path, loader) in [
        (&args.expense_items, load_expense_items::<BufReader<File>> as Loader),
        (&args.accounts, load_accounts::<BufReader<File>> as Loader),
    ] {
        if let Err(e) = open(path).and_then(|file| loader(&catalog, file)) {
            eprintln!("Error loading '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    let clock: Arc<dyn Clock> = match args.today {
        Some(today) => Arc::new(FixedClock::new(today)),
        None => Arc::new(SystemClock::new(settings.timezone)),
    };
    let pool = Arc::new(WorkerPool::new(settings.workers, settings.task_timeout));
    let engine = Engine::builder()
        .settings(settings)
        .catalog(catalog)
        .clock(clock)
        .queue(pool.clone())
        .build();

    if let Err(e) = open(&args.operations).and_then(|file| load_operations(&engine, file)) {
        eprintln!("Error loading '{}': {}", args.operations.display(), e);
        process::exit(1);
    }

    if let (Some(path), Some(account)) = (&args.changes, &args.account) {
        let payload = match fs::read_to_string(path) {
            Ok(payload) => payload,
            Err(e) => {
                eprintln!("Error reading '{}': {}", path.display(), e);
                process::exit(1);
            }
        };
        if let Err(e) = engine.submit_changes(&AccountId::new(account.as_str()), &payload) {
            eprintln!("Error applying changes: {}", e);
            process::exit(1);
        }
        pool.wait_idle();
    }

    if let Err(e) = recompute_all(&engine) {
        eprintln!("Error scheduling recompute: {}", e);
        process::exit(1);
    }
    pool.wait_idle();
    let stats = pool.stats();
    info!(completed = stats.completed, failed = stats.failed, "recompute finished");

    if let Err(e) = write_snapshots(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

type Loader = fn(&Catalog, BufReader<File>) -> Result<usize, csv::Error>;

fn open(path: &Path) -> Result<BufReader<File>, csv::Error> {
    Ok(BufReader::new(File::open(path)?))
}

fn reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

#[derive(Debug, Deserialize)]
struct ExpenseItemRecord {
    id: String,
    entry_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    transit: Option<bool>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    priority: Option<i32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    mandatory: Option<bool>,
}

impl ExpenseItemRecord {
    /// Returns `None` for unknown entry types.
    fn into_item(self) -> Option<ExpenseItem> {
        let entry_type = match self.entry_type.to_lowercase().as_str() {
            "debit" => EntryType::Debit,
            "credit" => EntryType::Credit,
            "balance" => EntryType::Balance,
            _ => return None,
        };
        let mut item = ExpenseItem::new(self.id, entry_type).priority(self.priority.unwrap_or(0));
        item.is_transit = self.transit.unwrap_or(false);
        item.is_mandatory = self.mandatory.unwrap_or(false);
        Some(item)
    }
}

/// Loads expense items into `catalog`, skipping malformed rows.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn load_expense_items<R: Read>(catalog: &Catalog, input: R) -> Result<usize, csv::Error> {
    let mut loaded = 0;
    for result in reader(input).deserialize::<ExpenseItemRecord>() {
        match result.map(ExpenseItemRecord::into_item) {
            Ok(Some(item)) => {
                catalog.put_expense_item(item);
                loaded += 1;
            }
            Ok(None) => warn!("skipping expense item with unknown entry type"),
            Err(e) => warn!(error = %e, "skipping malformed expense item row"),
        }
    }
    Ok(loaded)
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: String,
    #[serde(default)]
    organization: String,
    #[serde(default)]
    bank: String,
    #[serde(default)]
    expense_items: String,
}

/// Loads accounts into `catalog`, skipping malformed rows.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn load_accounts<R: Read>(catalog: &Catalog, input: R) -> Result<usize, csv::Error> {
    let mut loaded = 0;
    for result in reader(input).deserialize::<AccountRecord>() {
        match result {
            Ok(record) => {
                let items = record
                    .expense_items
                    .split(';')
                    .map(str::trim)
                    .filter(|item| !item.is_empty());
                let mut account = Account::new(record.id).with_items(items);
                account.organization = record.organization;
                account.bank = record.bank;
                catalog.put_account(account);
                loaded += 1;
            }
            Err(e) => warn!(error = %e, "skipping malformed account row"),
        }
    }
    Ok(loaded)
}

#[derive(Debug, Deserialize)]
struct OperationRecord {
    date: NaiveDate,
    kind: OperationKind,
    account: String,
    #[serde(default)]
    expense_item: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sum: Option<Decimal>,
    #[serde(default)]
    transit_recipient: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    group_index: Option<u32>,
    #[serde(default)]
    description: String,
}

impl OperationRecord {
    fn into_operation(self) -> BudgetOperation {
        BudgetOperation {
            id: OperationId::generate(),
            date: self.date,
            kind: self.kind,
            account: AccountId::new(self.account),
            expense_item: non_empty(self.expense_item).map(ExpenseItemId::new),
            sum: self.sum.unwrap_or(Decimal::ZERO),
            transit_recipient: non_empty(self.transit_recipient).map(AccountId::new),
            external_recipient: None,
            description: self.description,
            comment: String::new(),
            group_index: self.group_index.unwrap_or(0),
        }
    }
}

/// Stores raw operations without scheduling any recompute.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn load_operations<R: Read>(engine: &Engine, input: R) -> Result<usize, csv::Error> {
    let mut loaded = 0;
    for result in reader(input).deserialize::<OperationRecord>() {
        match result {
            Ok(record) => {
                engine.operations().save(record.into_operation());
                loaded += 1;
            }
            Err(e) => warn!(error = %e, "skipping malformed operation row"),
        }
    }
    info!(loaded, "operations loaded");
    Ok(loaded)
}

/// Schedules a full rescan through the horizon for every account, starting
/// at the earliest stored operation.
///
/// # Errors
///
/// Returns the queue's error if it refuses a job.
pub fn recompute_all(engine: &Engine) -> Result<usize, budget_movements::BudgetError> {
    let earliest = engine
        .operations()
        .select(&OperationFilter::new())
        .first()
        .map(|op| op.date);
    engine.extend_horizon(None, earliest).map(|jobs| jobs.len())
}

/// Writes every stored snapshot as `account,date,metric,value`.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_snapshots<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in engine.catalog().account_ids() {
        for snapshot in engine.movements().snapshots(&account) {
            wtr.serialize(&snapshot)?;
        }
    }
    wtr.flush()?;
    Ok(())
}
