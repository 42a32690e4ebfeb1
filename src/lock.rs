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

//! Per-entity locks acquired in a fixed global order.
//!
//! Every operation names all the entities it will touch up front and takes
//! their locks sorted by [`LockKey`]'s ordering:
//! accounts → catalog → member → book → copy → loan → reservation.
//! Two operations can therefore never wait on each other in a cycle.
//!
//! Coverage rules the coordinator relies on:
//! - every write to a copy also holds its book's lock, so a book lock
//!   guards that book's copies and reservation queue;
//! - every write to a loan also holds its member's lock.

use crate::base::{BookId, CopyId, LoanId, ReservationId, UserId};
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lockable entity. Variant order is acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum LockKey {
    /// Username registry.
    Accounts,
    /// ISBN registry.
    Catalog,
    Member(UserId),
    Book(BookId),
    Copy(CopyId),
    Loan(LoanId),
    Reservation(ReservationId),
}

/// Held locks; released on drop.
pub(crate) struct LockSet<'a> {
    manager: &'a LockManager,
    guards: Vec<(LockKey, ArcMutexGuard<RawMutex, ()>)>,
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..).rev() {
            drop(guard);
            self.manager.prune(key);
        }
    }
}

/// Lock table. An entry lives only while some operation holds or waits
/// on it.
#[derive(Default)]
pub(crate) struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks until every key is held. Duplicate keys are taken once.
    pub(crate) fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> LockSet<'_> {
        let ordered: BTreeSet<LockKey> = keys.into_iter().collect();
        let guards = ordered
            .into_iter()
            .map(|key| {
                // Clone the Arc so the map shard is released before blocking.
                let lock = Arc::clone(self.locks.entry(key).or_default().value());
                (key, lock.lock_arc())
            })
            .collect();
        LockSet {
            manager: self,
            guards,
        }
    }

    /// Drops the entry for `key` once nobody holds or awaits it.
    ///
    /// Cloning happens under the shard lock in `acquire`, so a count of one
    /// checked under the same shard lock means no other reference exists.
    fn prune(&self, key: LockKey) {
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}
