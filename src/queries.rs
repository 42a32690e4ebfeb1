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

//! Read-only views over the record stores.
//!
//! Queries take no locks. Each record read is consistent on its own, but a
//! listing may interleave with a concurrent operation.

use crate::base::{BookId, CopyId, LoanId, ReservationId, UserId};
use crate::book::{Book, BookCopy};
use crate::error::{LibraryError, LibraryResult};
use crate::library::{Library, load, rejected};
use crate::loan::Loan;
use crate::member::{Member, Session};
use crate::reservation::Reservation;
use chrono::Duration;
use std::cmp::Reverse;

impl Library {
    // === Members ===

    pub fn get_member(&self, session: &Session, member_id: UserId) -> LibraryResult<Member> {
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected("get_member", p))?;
        load(&*self.stores.members, member_id)
    }

    /// All member profiles, by id. Librarians only.
    pub fn members(&self, session: &Session) -> LibraryResult<Vec<Member>> {
        session
            .ensure_librarian()
            .map_err(|p| rejected("members", p))?;
        let mut members = self.stores.members.find(&|_| true)?;
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    /// Every loan the member ever took, newest first.
    pub fn member_loan_history(
        &self,
        session: &Session,
        member_id: UserId,
    ) -> LibraryResult<Vec<Loan>> {
        self.member_loans(session, member_id, "member_loan_history", |_| true)
    }

    /// Loans the member has not returned yet, newest first.
    pub fn member_active_loans(
        &self,
        session: &Session,
        member_id: UserId,
    ) -> LibraryResult<Vec<Loan>> {
        self.member_loans(session, member_id, "member_active_loans", Loan::is_open)
    }

    pub fn member_reservations(
        &self,
        session: &Session,
        member_id: UserId,
    ) -> LibraryResult<Vec<Reservation>> {
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected("member_reservations", p))?;
        load(&*self.stores.members, member_id)?;
        let mut reservations = self
            .stores
            .reservations
            .find(&|r| r.member_id == member_id)?;
        reservations.sort_by_key(|r| Reverse(r.requested_at));
        Ok(reservations)
    }

    fn member_loans(
        &self,
        session: &Session,
        member_id: UserId,
        operation: &'static str,
        keep: fn(&Loan) -> bool,
    ) -> LibraryResult<Vec<Loan>> {
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected(operation, p))?;
        load(&*self.stores.members, member_id)?;
        let mut loans = self
            .stores
            .loans
            .find(&|l| l.member_id == member_id && keep(l))?;
        loans.sort_by_key(|l| (Reverse(l.loan_date), Reverse(l.id)));
        Ok(loans)
    }

    /// Open loans past their due date, most overdue first. Librarians only.
    pub fn overdue_loans(&self, session: &Session) -> LibraryResult<Vec<Loan>> {
        session
            .ensure_librarian()
            .map_err(|p| rejected("overdue_loans", p))?;
        let now = self.clock.now();
        let mut loans = self.stores.loans.find(&|l| l.is_overdue(now))?;
        loans.sort_by_key(|l| l.due_date);
        Ok(loans)
    }

    pub fn get_loan(&self, session: &Session, loan_id: LoanId) -> LibraryResult<Loan> {
        let loan = load(&*self.stores.loans, loan_id)?;
        session
            .ensure_can_act_for(loan.member_id)
            .map_err(|p| rejected("get_loan", p))?;
        Ok(loan)
    }

    pub fn get_reservation(
        &self,
        session: &Session,
        reservation_id: ReservationId,
    ) -> LibraryResult<Reservation> {
        let reservation = load(&*self.stores.reservations, reservation_id)?;
        session
            .ensure_can_act_for(reservation.member_id)
            .map_err(|p| rejected("get_reservation", p))?;
        Ok(reservation)
    }

    // === Catalog ===

    pub fn get_book(&self, book_id: BookId) -> LibraryResult<Book> {
        load(&*self.stores.books, book_id)
    }

    pub fn get_copy(&self, copy_id: CopyId) -> LibraryResult<BookCopy> {
        load(&*self.stores.copies, copy_id)
    }

    pub fn find_copy_by_barcode(&self, barcode: &str) -> LibraryResult<BookCopy> {
        self.stores
            .copies
            .find(&|c| c.barcode == barcode)?
            .into_iter()
            .next()
            .ok_or_else(|| LibraryError::not_found("copy", barcode))
    }

    pub fn find_book_by_isbn(&self, isbn: &str) -> LibraryResult<Book> {
        let isbn = isbn.trim();
        self.stores
            .books
            .find(&|b| b.isbn == isbn)?
            .into_iter()
            .next()
            .ok_or_else(|| LibraryError::not_found("book", isbn))
    }

    /// Every cataloged title, retired ones included, by id.
    pub fn books(&self) -> LibraryResult<Vec<Book>> {
        let mut books = self.stores.books.find(&|_| true)?;
        books.sort_by_key(|b| b.id);
        Ok(books)
    }

    /// Copies of a title in barcode order.
    pub fn book_copies(&self, book_id: BookId) -> LibraryResult<Vec<BookCopy>> {
        load(&*self.stores.books, book_id)?;
        let mut copies = self.stores.copies.find(&|c| c.book_id == book_id)?;
        copies.sort_by_key(|c| c.sequence);
        Ok(copies)
    }

    /// Open reservations for a book in queue order.
    pub fn book_queue(&self, book_id: BookId) -> LibraryResult<Vec<Reservation>> {
        load(&*self.stores.books, book_id)?;
        let mut queue = self.book_reservations(book_id)?;
        queue.retain(Reservation::is_open);
        queue.sort_by_key(|r| r.queue_position);
        Ok(queue)
    }

    /// Case-insensitive match on title, author or ISBN. Retired titles are
    /// left out.
    pub fn search_books(&self, text: &str) -> LibraryResult<Vec<Book>> {
        let mut books = self
            .stores
            .books
            .find(&|b| !b.is_retired && b.matches(text))?;
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    /// Circulating titles with at least one copy on the shelf.
    pub fn available_books(&self) -> LibraryResult<Vec<Book>> {
        let mut books = self
            .stores
            .books
            .find(&|b| !b.is_retired && b.available_copies > 0)?;
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    /// Titles cataloged within the last `days` days, newest first.
    pub fn new_arrivals(&self, days: u32) -> LibraryResult<Vec<Book>> {
        // A window reaching past the earliest representable time covers everything
        let since = self
            .clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(days)));
        let mut books = self
            .stores
            .books
            .find(&|b| !b.is_retired && since.is_none_or(|since| b.added_at >= since))?;
        books.sort_by_key(|b| (Reverse(b.added_at), Reverse(b.id)));
        Ok(books)
    }
}
