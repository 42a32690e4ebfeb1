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

//! Catalog titles and their physical copies.
//!
//! Copy status transitions driven by lending:
//!
//! ```text
//!  Available ──issue──► Borrowed ──return──► Available
//!      │                    │
//!      │                    └──return, queue waiting──► Reserved
//!      └──reservation ready──► Reserved ──issue to holder──► Borrowed
//! ```

use crate::base::{BookId, CopyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog entry.
///
/// `available_copies` mirrors the number of this book's copies whose status
/// is [`CopyStatus::Available`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub total_copies: u32,
    pub available_copies: u32,
    pub is_retired: bool,
    pub added_at: DateTime<Utc>,
}

impl Book {
    fn assert_invariants(&self) {
        debug_assert!(
            self.available_copies <= self.total_copies,
            "Invariant violated: {} available of {} copies",
            self.available_copies,
            self.total_copies
        );
    }

    /// A copy of this book became Available.
    pub(crate) fn copy_freed(&mut self) {
        self.available_copies += 1;
        self.assert_invariants();
    }

    /// A copy of this book stopped being Available.
    pub(crate) fn copy_taken(&mut self) {
        debug_assert!(self.available_copies > 0, "no available copy to take");
        self.available_copies = self.available_copies.saturating_sub(1);
    }

    pub(crate) fn copies_added(&mut self, count: u32) {
        self.total_copies += count;
        self.available_copies += count;
        self.assert_invariants();
    }

    pub(crate) fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.author.to_lowercase().contains(&needle)
            || self.isbn.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Available,
    Borrowed,
    Reserved,
    Maintenance,
    Lost,
}

/// One physical copy of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: CopyId,
    pub book_id: BookId,
    pub barcode: String,
    /// Position in the book's barcode sequence, starting at 1.
    pub sequence: u32,
    pub status: CopyStatus,
}

impl BookCopy {
    pub fn is_available(&self) -> bool {
        self.status == CopyStatus::Available
    }
}

/// Most copies a single catalog intake may create.
pub const MAX_COPIES_PER_INTAKE: u32 = 1_000;

/// Barcode for the `sequence`-th copy of the book with `isbn`.
pub fn barcode(isbn: &str, sequence: u32) -> String {
    format!("{isbn}-{sequence:03}")
}

/// Input for catalog intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub copies: u32,
}
