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

//! Runtime settings for the recompute engine.

use chrono_tz::Tz;
use std::time::Duration;

/// Days of Plan horizon kept populated ahead of today.
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Timezone that defines the reference date ("today").
    pub timezone: Tz,
    pub horizon_days: u32,
    /// Worker threads serving the recompute queue.
    pub workers: usize,
    /// Execution bound for a single recompute job.
    pub task_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Moscow,
            horizon_days: DEFAULT_HORIZON_DAYS,
            workers: 4,
            task_timeout: Duration::from_secs(300),
        }
    }
}

impl Settings {
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }
}
