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

//! Error types for lending operations.

use thiserror::Error;

/// Business rules a request can break.
///
/// Each variant names exactly one rule so callers can tell the reader
/// which precondition failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Member status is Suspended or Expired
    #[error("member is not active")]
    MemberInactive,

    /// Member already holds as many books as allowed
    #[error("borrowing limit of {limit} books reached")]
    LoanLimitReached { limit: u32 },

    /// Outstanding fines exceed the configured threshold
    #[error("outstanding fines exceed the allowed maximum")]
    FinesTooHigh,

    /// Copy is not Available (or is held for someone else)
    #[error("copy is not available for loan")]
    CopyUnavailable,

    /// Loan already has a return date
    #[error("loan has already been returned")]
    AlreadyReturned,

    /// Loan was renewed the maximum number of times
    #[error("renewal limit of {limit} reached")]
    RenewalLimitReached { limit: u32 },

    /// Another member is waiting for the book
    #[error("book has pending reservations")]
    BookHasWaiters,

    /// Member holds as many pending reservations as allowed
    #[error("reservation limit of {limit} reached")]
    ReservationLimitReached { limit: u32 },

    /// Book is retired from circulation
    #[error("book is retired")]
    BookRetired,

    /// Member already has an open reservation for the book
    #[error("member already has an open reservation for this book")]
    AlreadyReserved,

    /// Reservation is not in the state the operation requires
    #[error("reservation is not {expected}")]
    ReservationState { expected: &'static str },

    /// Approval must follow queue order
    #[error("reservation is not first in the queue")]
    NotFirstInQueue,

    /// Copy belongs to a different book than the request
    #[error("copy does not belong to this book")]
    CopyBookMismatch,

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Copy must be in maintenance to be released from it
    #[error("copy is not in maintenance")]
    CopyNotInMaintenance,

    /// Copy count is beyond what one intake may create
    #[error("at most {max} copies can be added at once")]
    InvalidCopyCount { max: u32 },

    /// A book with this ISBN is already cataloged
    #[error("ISBN is already cataloged")]
    IsbnTaken,

    /// Username is empty or blank
    #[error("username must not be blank")]
    InvalidUsername,

    /// Password is empty or cannot be hashed
    #[error("password is not acceptable")]
    InvalidPassword,

    /// Username is already registered
    #[error("username is already taken")]
    UsernameTaken,

    /// Unknown username or wrong password
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Session role may not perform the operation
    #[error("operation not permitted for this session")]
    NotPermitted,
}

/// Failure reported by a record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Insert of an id that is already present
    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    /// Update or remove of an id that is not present
    #[error("{kind} {id} is missing")]
    Missing { kind: &'static str, id: String },

    /// Backend could not serve the request
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of a [`LibraryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PolicyViolation,
    StoreFailure,
}

/// Lending operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    /// Referenced record does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// A business rule precondition failed; nothing was written
    #[error("policy violation: {0}")]
    PolicyViolation(#[from] Policy),

    /// Persistence failed part way through the write sequence.
    ///
    /// `rolled_back` is `false` only when undoing earlier writes also
    /// failed, in which case state may be partially applied.
    #[error("store failure (rolled back: {rolled_back}): {source}")]
    StoreFailure {
        #[source]
        source: StoreError,
        rolled_back: bool,
    },
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::StoreFailure { .. } => ErrorKind::StoreFailure,
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// The broken rule, if this is a policy violation.
    pub fn policy(&self) -> Option<&Policy> {
        match self {
            Self::PolicyViolation(policy) => Some(policy),
            _ => None,
        }
    }
}

/// Reads happen before any write, so a failed read has nothing to undo.
impl From<StoreError> for LibraryError {
    fn from(source: StoreError) -> Self {
        Self::StoreFailure {
            source,
            rolled_back: true,
        }
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;
