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

//! Accounts and expense items.
//!
//! Both are managed outside the engine and treated as read-only while a
//! recompute runs. The catalog only answers the lookups the ledger and the
//! ingestion path need.

use crate::base::{AccountId, ExpenseItemId};
use crate::error::BudgetError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Controls the sign an expense item contributes to Movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
    Balance,
}

impl EntryType {
    /// Multiplier applied to an operation sum in the Movement metric.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Debit => Decimal::ONE,
            Self::Credit => Decimal::NEGATIVE_ONE,
            Self::Balance => Decimal::ZERO,
        }
    }
}

/// A spending or income category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseItem {
    pub id: ExpenseItemId,
    pub entry_type: EntryType,
    /// Marks the category as a transfer conduit between accounts.
    #[serde(default)]
    pub is_transit: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub is_mandatory: bool,
    /// Display-only list of allowed external recipients.
    #[serde(default)]
    pub allowed_external_recipients: Vec<String>,
}

impl ExpenseItem {
    pub fn new(id: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            id: ExpenseItemId::new(id),
            entry_type,
            is_transit: false,
            priority: 0,
            read_only: false,
            is_mandatory: false,
            allowed_external_recipients: Vec::new(),
        }
    }

    pub fn transit(mut self) -> Self {
        self.is_transit = true;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.is_mandatory = true;
        self
    }
}

/// Organization-bank rule: the owner of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub organization: String,
    pub bank: String,
    pub expense_items: Vec<ExpenseItemId>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(id),
            organization: String::new(),
            bank: String::new(),
            expense_items: Vec::new(),
        }
    }

    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expense_items = items.into_iter().map(ExpenseItemId::new).collect();
        self
    }
}

/// Concurrent registry of accounts and expense items.
#[derive(Debug, Default)]
pub struct Catalog {
    accounts: DashMap<AccountId, Account>,
    expense_items: DashMap<ExpenseItemId, ExpenseItem>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an account.
    pub fn put_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Inserts or replaces an expense item.
    pub fn put_expense_item(&self, item: ExpenseItem) {
        self.expense_items.insert(item.id.clone(), item);
    }

    pub fn account(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).map(|entry| entry.clone())
    }

    pub fn expense_item(&self, id: &ExpenseItemId) -> Option<ExpenseItem> {
        self.expense_items.get(id).map(|entry| entry.clone())
    }

    pub fn contains_account(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn entry_type(&self, id: &ExpenseItemId) -> Option<EntryType> {
        self.expense_items.get(id).map(|entry| entry.entry_type)
    }

    /// All account ids, sorted.
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Accounts whose item list includes `item`.
    pub fn accounts_using(&self, item: &ExpenseItemId) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .accounts
            .iter()
            .filter(|entry| entry.expense_items.contains(item))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Expense items available to `account`, ordered by priority.
    ///
    /// Items listed on the account but missing from the catalog are skipped.
    pub fn available_expense_items(&self, account: &AccountId) -> Vec<ExpenseItem> {
        let Some(account) = self.account(account) else {
            return Vec::new();
        };
        let mut items: Vec<ExpenseItem> = account
            .expense_items
            .iter()
            .filter_map(|id| self.expense_item(id))
            .collect();
        items.sort_by_key(|item| item.priority);
        items
    }

    /// Removes an account; its operations and snapshots stay in the stores.
    pub fn remove_account(&self, id: &AccountId) -> Option<Account> {
        self.accounts.remove(id).map(|(_, account)| account)
    }

    /// Removes an expense item.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetError::MandatoryExpenseItem`] for mandatory items and
    /// [`BudgetError::UnknownExpenseItem`] if the item does not exist.
    pub fn remove_expense_item(&self, id: &ExpenseItemId) -> Result<ExpenseItem, BudgetError> {
        match self.expense_items.get(id).map(|entry| entry.is_mandatory) {
            None => Err(BudgetError::UnknownExpenseItem(id.clone())),
            Some(true) => Err(BudgetError::MandatoryExpenseItem(id.clone())),
            Some(false) => self
                .expense_items
                .remove(id)
                .map(|(_, item)| item)
                .ok_or_else(|| BudgetError::UnknownExpenseItem(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn entry_type_signs() {
        assert_eq!(EntryType::Debit.sign() * dec!(100), dec!(100));
        assert_eq!(EntryType::Credit.sign() * dec!(100), dec!(-100));
        assert_eq!(EntryType::Balance.sign() * dec!(100), Decimal::ZERO);
    }

    #[test]
    fn available_items_sorted_by_priority() {
        let catalog = Catalog::new();
        catalog.put_expense_item(ExpenseItem::new("Salary", EntryType::Credit).priority(2));
        catalog.put_expense_item(ExpenseItem::new("Rent", EntryType::Debit).priority(1));
        catalog.put_account(Account::new("A").with_items(["Salary", "Rent", "Missing"]));

        let names: Vec<String> = catalog
            .available_expense_items(&AccountId::new("A"))
            .into_iter()
            .map(|item| item.id.0)
            .collect();
        assert_eq!(names, vec!["Rent", "Salary"]);
    }

    #[test]
    fn mandatory_items_cannot_be_removed() {
        let catalog = Catalog::new();
        catalog.put_expense_item(ExpenseItem::new("Taxes", EntryType::Credit).mandatory());
        catalog.put_expense_item(ExpenseItem::new("Misc", EntryType::Credit));

        let taxes = ExpenseItemId::new("Taxes");
        assert_eq!(
            catalog.remove_expense_item(&taxes),
            Err(BudgetError::MandatoryExpenseItem(taxes.clone()))
        );
        assert!(catalog.expense_item(&taxes).is_some());
        assert!(catalog.remove_expense_item(&ExpenseItemId::new("Misc")).is_ok());
        assert_eq!(
            catalog.remove_expense_item(&ExpenseItemId::new("Misc")),
            Err(BudgetError::UnknownExpenseItem(ExpenseItemId::new("Misc")))
        );
    }

    #[test]
    fn accounts_using_item() {
        let catalog = Catalog::new();
        catalog.put_account(Account::new("B").with_items(["Rent"]));
        catalog.put_account(Account::new("A").with_items(["Rent", "Salary"]));
        catalog.put_account(Account::new("C").with_items(["Salary"]));

        assert_eq!(
            catalog.accounts_using(&ExpenseItemId::new("Rent")),
            vec![AccountId::new("A"), AccountId::new("B")]
        );
    }
}
