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

//! Error types for ingestion and recomputation.

use crate::base::{AccountId, ExpenseItemId, OperationId};
use chrono::NaiveDate;
use thiserror::Error;

/// Budget engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetError {
    /// Referenced account is not registered in the catalog
    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Referenced expense item is not registered in the catalog
    #[error("unknown expense item: {0}")]
    UnknownExpenseItem(ExpenseItemId),

    /// Operation sums are non-negative; direction comes from the entry type
    #[error("invalid sum (must not be negative)")]
    NegativeSum,

    /// Mandatory expense items cannot be deleted
    #[error("cannot delete mandatory expense item: {0}")]
    MandatoryExpenseItem(ExpenseItemId),

    /// Referenced operation does not exist
    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    /// Every group index on the date is taken
    #[error("no group index left to allocate on {0}")]
    GroupIndexExhausted(NaiveDate),

    /// The task queue no longer accepts jobs
    #[error("task queue is closed")]
    QueueClosed,

    /// A recompute job ran past its execution timeout
    #[error("task exceeded its execution timeout")]
    TaskTimedOut,
}
