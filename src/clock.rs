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

//! Reference date used to choose between Plan and Fact rows.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Clock abstracts the current date so recomputation stays deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current date in the reference timezone.
    fn today(&self) -> NaiveDate;
}

/// Wall clock pinned to a fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(chrono_tz::Europe::Moscow)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.timezone).date_naive()
    }
}

/// Clock frozen on one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    today: NaiveDate,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.today.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}
