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

//! Accounts and catalog intake.
//!
//! Registration writes an identity record and its role profile as one
//! unit: if the profile cannot be stored the identity is removed again.

use crate::base::{BookId, CopyId};
use crate::book::{Book, BookCopy, CopyStatus, MAX_COPIES_PER_INTAKE, NewBook, barcode};
use crate::changeset::apply;
use crate::error::{LibraryResult, Policy};
use crate::library::{Library, load, rejected};
use crate::lock::LockKey;
use crate::member::{Librarian, Member, Role, Session, User};
use crate::reservation::next_in_queue;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tracing::info;

impl Library {
    // === Accounts ===

    /// Registers a borrower.
    ///
    /// # Errors
    ///
    /// - [`Policy::InvalidUsername`] / [`Policy::InvalidPassword`] - Blank input.
    /// - [`Policy::UsernameTaken`] - Username already registered.
    pub fn register_member(
        &self,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> LibraryResult<User> {
        const OP: &str = "register_member";
        let password_hash = self.hash_password(password).map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Accounts]);
        let user = self.new_user(username, password_hash, display_name, Role::Member)?;
        let member = Member::new(user.id, self.policy.max_books_allowed, user.created_at);

        apply(OP, |tx| {
            tx.insert(&*self.stores.users, user.clone())?;
            tx.insert(&*self.stores.members, member)
        })?;

        info!(user = %user.id, username = %user.username, "member registered");
        Ok(user)
    }

    /// Registers a staff account.
    ///
    /// Without a session this only succeeds while no librarian exists yet,
    /// so the first account can bootstrap the system.
    pub fn register_librarian(
        &self,
        session: Option<&Session>,
        username: &str,
        password: &str,
        display_name: &str,
    ) -> LibraryResult<User> {
        const OP: &str = "register_librarian";
        let password_hash = self.hash_password(password).map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Accounts]);

        match session {
            Some(session) => session.ensure_librarian().map_err(|p| rejected(OP, p))?,
            None => {
                if !self.stores.librarians.find(&|_| true)?.is_empty() {
                    return Err(rejected(OP, Policy::NotPermitted));
                }
            }
        }

        let user = self.new_user(username, password_hash, display_name, Role::Librarian)?;
        let librarian = Librarian {
            id: user.id,
            hired_at: user.created_at,
        };

        apply(OP, |tx| {
            tx.insert(&*self.stores.users, user.clone())?;
            tx.insert(&*self.stores.librarians, librarian)
        })?;

        info!(user = %user.id, username = %user.username, "librarian registered");
        Ok(user)
    }

    /// Opens a session for a registered user.
    ///
    /// Unknown usernames and wrong passwords fail identically.
    pub fn login(&self, username: &str, password: &str) -> LibraryResult<Session> {
        const OP: &str = "login";
        let username = username.trim();
        let user = self
            .stores
            .users
            .find(&|u| u.username == username)?
            .into_iter()
            .next()
            .ok_or_else(|| rejected(OP, Policy::InvalidCredentials))?;

        let verified = PasswordHash::new(&user.password_hash)
            .map(|hash| self.hasher.verify_password(password.as_bytes(), &hash).is_ok())
            .unwrap_or(false);
        if !verified {
            return Err(rejected(OP, Policy::InvalidCredentials));
        }

        info!(user = %user.id, role = ?user.role, "session opened");
        Ok(Session::new(user.id, user.role))
    }

    fn hash_password(&self, password: &str) -> Result<String, Policy> {
        if password.is_empty() {
            return Err(Policy::InvalidPassword);
        }
        let salt = SaltString::generate(&mut OsRng);
        self.hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| Policy::InvalidPassword)
    }

    /// Builds an identity record. Caller holds the accounts lock.
    fn new_user(
        &self,
        username: &str,
        password_hash: String,
        display_name: &str,
        role: Role,
    ) -> LibraryResult<User> {
        const OP: &str = "register";
        let username = username.trim();
        if username.is_empty() {
            return Err(rejected(OP, Policy::InvalidUsername));
        }
        if !self
            .stores
            .users
            .find(&|u| u.username == username)?
            .is_empty()
        {
            return Err(rejected(OP, Policy::UsernameTaken));
        }
        Ok(User {
            id: self.stores.users.next_id()?,
            username: username.to_string(),
            display_name: display_name.to_string(),
            password_hash,
            role,
            created_at: self.clock.now(),
        })
    }

    // === Catalog ===

    /// Catalogs a new title with `copies` physical copies.
    ///
    /// Copies get barcodes `{ISBN}-001`, `{ISBN}-002`, ...
    pub fn add_book(
        &self,
        session: &Session,
        new_book: NewBook,
    ) -> LibraryResult<(Book, Vec<BookCopy>)> {
        const OP: &str = "add_book";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Catalog]);

        check_copy_count(new_book.copies).map_err(|p| rejected(OP, p))?;
        let isbn = new_book.isbn.trim().to_string();
        if !self.stores.books.find(&|b| b.isbn == isbn)?.is_empty() {
            return Err(rejected(OP, Policy::IsbnTaken));
        }

        let now = self.clock.now();
        let book = Book {
            id: self.stores.books.next_id()?,
            isbn,
            title: new_book.title,
            author: new_book.author,
            total_copies: new_book.copies,
            available_copies: new_book.copies,
            is_retired: false,
            added_at: now,
        };
        let copies = self.new_copies(&book, 1, new_book.copies)?;

        apply(OP, |tx| {
            tx.insert(&*self.stores.books, book.clone())?;
            for copy in &copies {
                tx.insert(&*self.stores.copies, copy.clone())?;
            }
            Ok(())
        })?;

        info!(book = %book.id, isbn = %book.isbn, copies = copies.len(), "book cataloged");
        Ok((book, copies))
    }

    /// Adds `count` copies to an existing title, continuing its barcode sequence.
    pub fn add_copies(
        &self,
        session: &Session,
        book_id: BookId,
        count: u32,
    ) -> LibraryResult<Vec<BookCopy>> {
        const OP: &str = "add_copies";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        check_copy_count(count).map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Book(book_id)]);

        let book = load(&*self.stores.books, book_id)?;
        let next_sequence = self
            .stores
            .copies
            .find(&|c| c.book_id == book_id)?
            .iter()
            .map(|c| c.sequence)
            .max()
            .map_or(1, |max| max + 1);
        if next_sequence.checked_add(count).is_none()
            || book.total_copies.checked_add(count).is_none()
        {
            return Err(rejected(
                OP,
                Policy::InvalidCopyCount {
                    max: MAX_COPIES_PER_INTAKE,
                },
            ));
        }
        let mut copies = self.new_copies(&book, next_sequence, count)?;

        // Waiting members are served before the new copies reach the shelf.
        let now = self.clock.now();
        let mut title = book.clone();
        title.copies_added(count);
        let mut queue = self.book_reservations(book_id)?;
        let mut handoffs = Vec::new();
        for copy in &mut copies {
            let Some(slot) = next_in_queue(&queue)
                .and_then(|next| queue.iter().position(|r| r.id == next.id))
            else {
                break;
            };
            let waiting = queue[slot].clone();
            queue[slot].mark_ready(copy.id, now, &self.policy);
            copy.status = CopyStatus::Reserved;
            title.copy_taken();
            handoffs.push((waiting, queue[slot].clone()));
        }

        apply(OP, |tx| {
            for copy in &copies {
                tx.insert(&*self.stores.copies, copy.clone())?;
            }
            for (before, after) in &handoffs {
                tx.update(&*self.stores.reservations, before, after.clone())?;
            }
            tx.update(&*self.stores.books, &book, title.clone())
        })?;

        info!(
            book = %book_id,
            added = count,
            total = title.total_copies,
            reserved = handoffs.len(),
            "copies added"
        );
        Ok(copies)
    }

    /// Takes a title out of circulation. Existing loans and queues are kept.
    pub fn retire_book(&self, session: &Session, book_id: BookId) -> LibraryResult<Book> {
        const OP: &str = "retire_book";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Book(book_id)]);

        let book = load(&*self.stores.books, book_id)?;
        let mut retired = book.clone();
        retired.is_retired = true;
        apply(OP, |tx| tx.update(&*self.stores.books, &book, retired.clone()))?;

        info!(book = %book_id, "book retired");
        Ok(retired)
    }

    /// Moves an Available copy into maintenance, or a copy in maintenance
    /// back into circulation (serving the reservation queue first).
    pub fn set_copy_maintenance(
        &self,
        session: &Session,
        copy_id: CopyId,
        in_maintenance: bool,
    ) -> LibraryResult<BookCopy> {
        const OP: &str = "set_copy_maintenance";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let peek = load(&*self.stores.copies, copy_id)?;
        let _locks = self
            .locks
            .acquire([LockKey::Book(peek.book_id), LockKey::Copy(copy_id)]);

        let copy = load(&*self.stores.copies, copy_id)?;
        let book = load(&*self.stores.books, copy.book_id)?;
        let mut title = book.clone();

        let updated = if in_maintenance {
            if !copy.is_available() {
                return Err(rejected(OP, Policy::CopyUnavailable));
            }
            let mut parked = copy.clone();
            parked.status = CopyStatus::Maintenance;
            title.copy_taken();
            apply(OP, |tx| {
                tx.update(&*self.stores.books, &book, title)?;
                tx.update(&*self.stores.copies, &copy, parked.clone())
            })?;
            parked
        } else {
            if copy.status != CopyStatus::Maintenance {
                return Err(rejected(OP, Policy::CopyNotInMaintenance));
            }
            let release = self.release_copy(&mut title, copy, self.clock.now())?;
            apply(OP, |tx| {
                tx.update(&*self.stores.books, &book, title)?;
                release.write(tx, &self.stores)
            })?;
            load(&*self.stores.copies, copy_id)?
        };

        info!(copy = %copy_id, status = ?updated.status, "copy maintenance updated");
        Ok(updated)
    }

    fn new_copies(
        &self,
        book: &Book,
        first_sequence: u32,
        count: u32,
    ) -> LibraryResult<Vec<BookCopy>> {
        (first_sequence..first_sequence + count)
            .map(|sequence| {
                Ok(BookCopy {
                    id: self.stores.copies.next_id()?,
                    book_id: book.id,
                    barcode: barcode(&book.isbn, sequence),
                    sequence,
                    status: CopyStatus::Available,
                })
            })
            .collect()
    }
}

fn check_copy_count(count: u32) -> Result<(), Policy> {
    if count > MAX_COPIES_PER_INTAKE {
        return Err(Policy::InvalidCopyCount {
            max: MAX_COPIES_PER_INTAKE,
        });
    }
    Ok(())
}
