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

//! Change notifications in and out of the engine.
//!
//! [`ChangeEvent`]s go out to whoever renders or caches ledgers.
//! [`DocumentEvent`]s come in from the code that edits operations, accounts
//! and expense items outside of a submitted batch.

use crate::base::{AccountId, ExpenseItemId, OperationId};
use crate::operation::BudgetOperation;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

/// Outgoing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Ledger or operations of one account changed.
    AccountChanged(AccountId),
    /// The set of accounts itself changed (rename, delete).
    FullRefresh,
}

/// Receiver of outgoing notifications.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

/// Fans events out to channel subscribers. Disconnected subscribers are dropped.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: ChangeEvent) {
        trace!(?event, "publishing");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Incoming structural change, dispatched by [`crate::Engine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// An operation was written outside `submit_changes`.
    OperationSaved(BudgetOperation),
    /// An operation was removed from the store by an external actor.
    OperationDeleted(BudgetOperation),
    ExpenseItemUpdated(ExpenseItemId),
    AccountUpdated(AccountId),
    AccountRenamed { from: AccountId, to: AccountId },
    AccountDeleted(AccountId),
}

impl DocumentEvent {
    /// Operation id carried by the event, if any.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::OperationSaved(op) | Self::OperationDeleted(op) => Some(op.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(ChangeEvent::AccountChanged(AccountId::new("A")));
        bus.publish(ChangeEvent::FullRefresh);

        for receiver in [first, second] {
            let events: Vec<ChangeEvent> = receiver.try_iter().collect();
            assert_eq!(
                events,
                vec![
                    ChangeEvent::AccountChanged(AccountId::new("A")),
                    ChangeEvent::FullRefresh
                ]
            );
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        let live = bus.subscribe();

        bus.publish(ChangeEvent::FullRefresh);

        assert_eq!(bus.subscribers.lock().len(), 1);
        assert_eq!(live.try_recv(), Ok(ChangeEvent::FullRefresh));
    }
}
