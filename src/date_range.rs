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

//! Recompute windows.

use crate::base::AccountId;
use crate::clock::Clock;
use crate::store::{MovementStore, OperationFilter, OperationStore};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;

/// How much of an account's history a recompute covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeMode {
    /// Only the span between the window start (or today) and the target.
    Incremental,
    /// Every date with operations (owned or routed to the account) or
    /// snapshots from the start boundary on.
    FullRescan,
}

/// Builds the contiguous, ascending list of dates one account needs recomputed.
#[derive(Clone)]
pub struct DateRangeBuilder {
    operations: Arc<dyn OperationStore>,
    movements: Arc<dyn MovementStore>,
    clock: Arc<dyn Clock>,
}

impl DateRangeBuilder {
    pub fn new(
        operations: Arc<dyn OperationStore>,
        movements: Arc<dyn MovementStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            operations,
            movements,
            clock,
        }
    }

    /// Dates to recompute for `account` after a change at `target_date`.
    ///
    /// The first date never lies after today, so a window always reaches
    /// back at least to the reference date. The result is never empty and,
    /// in [`RangeMode::FullRescan`], always contains today.
    pub fn build(
        &self,
        account: &AccountId,
        target_date: NaiveDate,
        window_start: Option<NaiveDate>,
        mode: RangeMode,
    ) -> Vec<NaiveDate> {
        let today = self.clock.today();
        let window_start = window_start.unwrap_or(today);

        let candidates: BTreeSet<NaiveDate> = match mode {
            RangeMode::Incremental => [window_start, target_date].into(),
            RangeMode::FullRescan => {
                let boundary = target_date.min(today).min(window_start);
                let mut dates = self.operations.dates_from(account, boundary);
                dates.extend(
                    self.operations
                        .select(&OperationFilter::new().transit_to(account).from(boundary))
                        .into_iter()
                        .map(|op| op.date),
                );
                dates.extend(self.movements.dates_from(account, boundary));
                dates.insert(today);
                dates.insert(target_date);
                dates
            }
        };

        // Both sets always hold target_date, so first/last exist.
        let first = candidates.first().copied().unwrap_or(target_date).min(today);
        let last = candidates.last().copied().unwrap_or(target_date);
        contiguous(first, last)
    }
}

/// Every date from `first` to `last`, inclusive. Empty if `first > last`.
pub fn contiguous(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    first.iter_days().take_while(|date| *date <= last).collect()
}
