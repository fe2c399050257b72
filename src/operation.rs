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

//! Budget operations and the edit records that create or change them.

use crate::base::{AccountId, ExpenseItemId, OperationId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// Forecast vs. realized operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(alias = "plan")]
    Plan,
    #[serde(alias = "fact")]
    Fact,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::Plan, OperationKind::Fact];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Fact => "Fact",
        }
    }
}

/// One ledger entry candidate.
///
/// A row without an expense item is a placeholder: it keeps a Plan/Fact slot
/// alive for its `group_index` and never contributes to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOperation {
    pub id: OperationId,
    pub date: NaiveDate,
    pub kind: OperationKind,
    pub account: AccountId,
    pub expense_item: Option<ExpenseItemId>,
    pub sum: Decimal,
    pub transit_recipient: Option<AccountId>,
    pub external_recipient: Option<String>,
    pub description: String,
    pub comment: String,
    pub group_index: u32,
}

impl BudgetOperation {
    /// Creates an empty row for `(account, date, kind, group_index)`.
    pub fn placeholder(
        account: AccountId,
        date: NaiveDate,
        kind: OperationKind,
        group_index: u32,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            date,
            kind,
            account,
            expense_item: None,
            sum: Decimal::ZERO,
            transit_recipient: None,
            external_recipient: None,
            description: String::new(),
            comment: String::new(),
            group_index,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.expense_item.is_none()
    }

    /// Overwrites the editable fields. Absent optional values reset to empty.
    pub(crate) fn apply(&mut self, change: &ChangeRecord) {
        self.expense_item = change.expense_item.clone();
        self.sum = change.sum.unwrap_or(Decimal::ZERO);
        self.transit_recipient = change.transit_recipient.clone();
        self.external_recipient = change.external_recipient.clone();
        self.description = change.description.clone().unwrap_or_default();
        self.comment = change.comment.clone().unwrap_or_default();
    }
}

/// One user edit inside a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Existing row to overwrite. Ids that cannot be parsed are treated as absent.
    #[serde(default, alias = "name", deserialize_with = "lenient_id")]
    pub id: Option<OperationId>,
    pub date: NaiveDate,
    pub kind: OperationKind,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub expense_item: Option<ExpenseItemId>,
    #[serde(default, deserialize_with = "flexible_sum")]
    pub sum: Option<Decimal>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub transit_recipient: Option<AccountId>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub external_recipient: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub group_index: Option<u32>,
}

impl ChangeRecord {
    /// An edit for `date`/`kind` with every other field empty.
    pub fn new(date: NaiveDate, kind: OperationKind) -> Self {
        Self {
            id: None,
            date,
            kind,
            expense_item: None,
            sum: None,
            transit_recipient: None,
            external_recipient: None,
            description: None,
            comment: None,
            group_index: None,
        }
    }

    pub fn item(mut self, item: impl Into<String>) -> Self {
        self.expense_item = Some(ExpenseItemId::new(item));
        self
    }

    pub fn sum(mut self, sum: Decimal) -> Self {
        self.sum = Some(sum);
        self
    }

    pub fn transit_to(mut self, recipient: impl Into<String>) -> Self {
        self.transit_recipient = Some(AccountId::new(recipient));
        self
    }

    pub fn group(mut self, group_index: u32) -> Self {
        self.group_index = Some(group_index);
        self
    }

    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.expense_item.is_none()
    }
}

/// Parses a JSON array of [`ChangeRecord`]s.
///
/// Malformed payloads are logged and yield an empty batch.
pub fn parse_batch(payload: &str) -> Vec<ChangeRecord> {
    match serde_json::from_str::<Vec<ChangeRecord>>(payload) {
        Ok(records) => records,
        Err(error) => {
            warn!(%error, "discarding unparsable change batch");
            Vec::new()
        }
    }
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(T::from))
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<OperationId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| Uuid::parse_str(value.trim()).ok().map(OperationId)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSum {
    Number(serde_json::Number),
    Text(String),
}

/// Accepts `200`, `180.5` or `"180.50"`; parsed exactly, never through `f64`.
fn flexible_sum<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Option::<RawSum>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(RawSum::Number(number)) => number.to_string(),
        Some(RawSum::Text(text)) => text.trim().to_owned(),
    };
    if text.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(<D::Error as DeError>::custom)
}
