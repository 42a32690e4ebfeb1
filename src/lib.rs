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

//! # Library Lending
//!
//! This library provides a lending and reservation engine for a book
//! library: loans with due dates and renewals, overdue fines, and a
//! first-come reservation queue per title.
//!
//! ## Core Components
//!
//! - [`Library`]: Transaction coordinator owning every multi-record write
//! - [`Loan`]: Borrowing of one copy by one member
//! - [`Reservation`]: Queued request for the next free copy of a title
//! - [`compute_fine`]: Overdue fine policy
//! - [`RecordStore`]: Persistence seam, with an in-memory implementation
//! - [`LibraryError`]: Error kinds returned by every operation
//!
//! ## Example
//!
//! ```
//! use library_lending_rs::{AuthConfig, Library, LibraryConfig, NewBook};
//!
//! let config = LibraryConfig {
//!     auth: AuthConfig { hash_memory_kib: 8, hash_iterations: 1, hash_parallelism: 1 },
//!     ..LibraryConfig::default()
//! };
//! let library = Library::in_memory(&config).unwrap();
//!
//! library.register_librarian(None, "admin", "secret", "Admin").unwrap();
//! let staff = library.login("admin", "secret").unwrap();
//! let (book, copies) = library
//!     .add_book(&staff, NewBook {
//!         isbn: "9780141439518".into(),
//!         title: "Pride and Prejudice".into(),
//!         author: "Jane Austen".into(),
//!         copies: 2,
//!     })
//!     .unwrap();
//!
//! let reader = library.register_member("ada", "pw", "Ada").unwrap();
//! let session = library.login("ada", "pw").unwrap();
//! let loan = library.issue_loan(&session, reader.id, copies[0].id).unwrap();
//!
//! assert_eq!(library.get_book(book.id).unwrap().available_copies, 1);
//! assert!(loan.is_open());
//! ```
//!
//! ## Thread Safety
//!
//! The coordinator locks the members, books, copies, loans and reservations
//! an operation touches, in one global order. Operations on unrelated
//! members and titles run in parallel.

mod base;
mod book;
mod changeset;
mod clock;
mod config;
pub mod error;
mod fine;
mod library;
mod loan;
mod lock;
mod member;
mod queries;
mod registry;
mod reservation;
pub mod store;

pub use base::{BookId, CopyId, LoanId, ReservationId, UserId};
pub use book::{Book, BookCopy, CopyStatus, MAX_COPIES_PER_INTAKE, NewBook, barcode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, LendingPolicy, LibraryConfig, LoggingConfig};
pub use error::{ErrorKind, LibraryError, LibraryResult, Policy, StoreError};
pub use fine::{compute_fine, days_overdue};
pub use library::Library;
pub use loan::{Loan, LoanStatus};
pub use member::{Librarian, Member, MemberStatus, Role, Session, User};
pub use reservation::{Reservation, ReservationStatus, next_in_queue};
pub use store::{InMemoryStore, Record, RecordStore, Stores};
