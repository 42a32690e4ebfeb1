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

//! Compensating write journal.
//!
//! Stores only guarantee single-record atomicity. A [`Changeset`] remembers
//! how to undo each write it performs so a multi-record operation that
//! fails part way can be unwound, newest write first.

use crate::error::{LibraryError, StoreError};
use crate::store::{Record, RecordStore};

type Undo<'a> = Box<dyn FnOnce() -> Result<(), StoreError> + 'a>;

pub(crate) struct Changeset<'a> {
    undo: Vec<Undo<'a>>,
}

impl<'a> Changeset<'a> {
    fn new() -> Self {
        Self { undo: Vec::new() }
    }

    pub(crate) fn insert<R: Record>(
        &mut self,
        store: &'a dyn RecordStore<R>,
        record: R,
    ) -> Result<(), StoreError> {
        let id = record.id();
        store.insert(record)?;
        self.undo.push(Box::new(move || store.remove(id)));
        Ok(())
    }

    /// Replaces `before` with `after`.
    pub(crate) fn update<R: Record>(
        &mut self,
        store: &'a dyn RecordStore<R>,
        before: &R,
        after: R,
    ) -> Result<(), StoreError> {
        store.update(after)?;
        let before = before.clone();
        self.undo.push(Box::new(move || store.update(before)));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.undo.len()
    }

    /// Undoes every applied write. Returns `false` if any undo failed.
    fn rollback(self) -> bool {
        let mut clean = true;
        for undo in self.undo.into_iter().rev() {
            if let Err(error) = undo() {
                tracing::error!(%error, "compensating write failed");
                clean = false;
            }
        }
        clean
    }
}

/// Runs `writes`, unwinding them all if one fails.
pub(crate) fn apply<'a, T>(
    operation: &'static str,
    writes: impl FnOnce(&mut Changeset<'a>) -> Result<T, StoreError>,
) -> Result<T, LibraryError> {
    let mut changes = Changeset::new();
    match writes(&mut changes) {
        Ok(value) => Ok(value),
        Err(source) => {
            tracing::warn!(
                operation,
                error = %source,
                applied = changes.len(),
                "store write failed, rolling back"
            );
            let rolled_back = changes.rollback();
            Err(LibraryError::StoreFailure {
                source,
                rolled_back,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{BookId, CopyId};
    use crate::book::{BookCopy, CopyStatus};
    use crate::store::InMemoryStore;

    fn copy(id: u32, status: CopyStatus) -> BookCopy {
        BookCopy {
            id: CopyId(id),
            book_id: BookId(1),
            barcode: format!("isbn-{id:03}"),
            sequence: id,
            status,
        }
    }

    #[test]
    fn successful_writes_stay_applied() {
        let backing = InMemoryStore::new();
        let store: &dyn RecordStore<BookCopy> = &backing;
        let before = copy(1, CopyStatus::Available);
        store.insert(before.clone()).unwrap();

        apply("test", |tx| {
            tx.update(store, &before, copy(1, CopyStatus::Borrowed))?;
            tx.insert(store, copy(2, CopyStatus::Available))
        })
        .unwrap();

        assert_eq!(store.get(CopyId(1)).unwrap().unwrap().status, CopyStatus::Borrowed);
        assert!(store.get(CopyId(2)).unwrap().is_some());
    }

    #[test]
    fn failed_write_unwinds_earlier_ones() {
        let backing = InMemoryStore::new();
        let store: &dyn RecordStore<BookCopy> = &backing;
        let before = copy(1, CopyStatus::Available);
        store.insert(before.clone()).unwrap();

        let result = apply("test", |tx| {
            tx.update(store, &before, copy(1, CopyStatus::Borrowed))?;
            tx.insert(store, copy(2, CopyStatus::Available))?;
            // Missing record: fails
            tx.update(store, &copy(3, CopyStatus::Available), copy(3, CopyStatus::Lost))
        });

        assert!(matches!(
            result,
            Err(LibraryError::StoreFailure {
                rolled_back: true,
                ..
            })
        ));
        assert_eq!(store.get(CopyId(1)).unwrap().unwrap().status, CopyStatus::Available);
        assert!(store.get(CopyId(2)).unwrap().is_none());
    }
}
