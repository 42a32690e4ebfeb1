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

//! Record storage.
//!
//! The coordinator only needs keyed single-record reads and writes plus a
//! filtered scan. Any backend offering atomic single-record writes can sit
//! behind [`RecordStore`]; [`InMemoryStore`] is the default.

use crate::base::{BookId, CopyId, LoanId, ReservationId, UserId};
use crate::book::{Book, BookCopy};
use crate::error::StoreError;
use crate::loan::Loan;
use crate::member::{Librarian, Member, User};
use crate::reservation::Reservation;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// A storable record with a stable identifier.
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Ord + fmt::Display + From<u32> + Send + Sync + 'static;

    /// Label used in error messages.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
}

/// Keyed storage for one record type.
pub trait RecordStore<R: Record>: Send + Sync {
    /// Reserves a fresh identifier.
    fn next_id(&self) -> Result<R::Id, StoreError>;

    fn get(&self, id: R::Id) -> Result<Option<R>, StoreError>;

    /// All records accepted by `filter`, in no particular order.
    fn find(&self, filter: &dyn Fn(&R) -> bool) -> Result<Vec<R>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the id is taken.
    fn insert(&self, record: R) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Missing`] if the id is unknown.
    fn update(&self, record: R) -> Result<(), StoreError>;

    /// Used only to undo an insert.
    fn remove(&self, id: R::Id) -> Result<(), StoreError>;
}

/// Concurrent in-memory store.
pub struct InMemoryStore<R: Record> {
    records: DashMap<R::Id, R>,
    sequence: AtomicU32,
}

impl<R: Record> InMemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            sequence: AtomicU32::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<R: Record> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> for InMemoryStore<R> {
    fn next_id(&self) -> Result<R::Id, StoreError> {
        Ok(R::Id::from(self.sequence.fetch_add(1, Ordering::Relaxed)))
    }

    fn get(&self, id: R::Id) -> Result<Option<R>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    fn find(&self, filter: &dyn Fn(&R) -> bool) -> Result<Vec<R>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect())
    }

    fn insert(&self, record: R) -> Result<(), StoreError> {
        // Entry API keeps check-and-insert atomic.
        match self.records.entry(record.id()) {
            Entry::Occupied(entry) => Err(StoreError::Duplicate {
                kind: R::KIND,
                id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    fn update(&self, record: R) -> Result<(), StoreError> {
        match self.records.get_mut(&record.id()) {
            Some(mut existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StoreError::Missing {
                kind: R::KIND,
                id: record.id().to_string(),
            }),
        }
    }

    fn remove(&self, id: R::Id) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing {
                kind: R::KIND,
                id: id.to_string(),
            })
    }
}

macro_rules! impl_record {
    ($record:ty, $id:ty, $kind:literal) => {
        impl Record for $record {
            type Id = $id;
            const KIND: &'static str = $kind;

            fn id(&self) -> $id {
                self.id
            }
        }
    };
}

impl_record!(User, UserId, "user");
impl_record!(Member, UserId, "member");
impl_record!(Librarian, UserId, "librarian");
impl_record!(Book, BookId, "book");
impl_record!(BookCopy, CopyId, "copy");
impl_record!(Loan, LoanId, "loan");
impl_record!(Reservation, ReservationId, "reservation");

/// One store per record type.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn RecordStore<User>>,
    pub members: Arc<dyn RecordStore<Member>>,
    pub librarians: Arc<dyn RecordStore<Librarian>>,
    pub books: Arc<dyn RecordStore<Book>>,
    pub copies: Arc<dyn RecordStore<BookCopy>>,
    pub loans: Arc<dyn RecordStore<Loan>>,
    pub reservations: Arc<dyn RecordStore<Reservation>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryStore::new()),
            members: Arc::new(InMemoryStore::new()),
            librarians: Arc::new(InMemoryStore::new()),
            books: Arc::new(InMemoryStore::new()),
            copies: Arc::new(InMemoryStore::new()),
            loans: Arc::new(InMemoryStore::new()),
            reservations: Arc::new(InMemoryStore::new()),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory()
    }
}
