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

//! Library transaction coordinator.
//!
//! The [`Library`] is the central component that turns lending intents into
//! record writes. It is the only writer of the derived counters
//! (`available_copies`, `current_books_count`, `fines_owed`).
//!
//! # Operation Shape
//!
//! Every mutating operation follows the same steps:
//!
//! 1. Peek at the records that say which entities are involved.
//! 2. Lock those entities in the global order (see [`crate::lock`]).
//! 3. Re-read and validate every rule; the first violation is returned and
//!    nothing has been written.
//! 4. Write through a changeset so a store failure unwinds earlier writes.
//!
//! # Thread Safety
//!
//! Operations on different members and books run in parallel. Operations
//! sharing a member or a book are serialized by the lock manager, so two
//! concurrent loans cannot both pass the borrowing limit check.

use crate::base::{BookId, CopyId, LoanId, ReservationId, UserId};
use crate::book::{Book, BookCopy, CopyStatus};
use crate::changeset::{Changeset, apply};
use crate::clock::{Clock, SystemClock};
use crate::config::{LendingPolicy, LibraryConfig};
use crate::error::{LibraryError, LibraryResult, Policy, StoreError};
use crate::loan::{Loan, check_issue};
use crate::lock::{LockKey, LockManager};
use crate::member::{Member, MemberStatus, Session};
use crate::reservation::{
    Reservation, ReservationStatus, check_request, next_in_queue, next_queue_position,
};
use crate::store::{Record, RecordStore, Stores};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use config::ConfigError;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Lending engine over a set of record stores.
///
/// # Invariants
///
/// - A member's `current_books_count` equals their loans with no return date.
/// - A book's `available_copies` equals its copies with status Available.
/// - A freed copy goes to the earliest Pending reservation before it is
///   ever observable as Available.
pub struct Library {
    pub(crate) stores: Stores,
    pub(crate) policy: LendingPolicy,
    pub(crate) hasher: Argon2<'static>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: LockManager,
}

pub(crate) fn load<R: Record>(store: &dyn RecordStore<R>, id: R::Id) -> LibraryResult<R> {
    store
        .get(id)?
        .ok_or_else(|| LibraryError::not_found(R::KIND, id))
}

/// Logs and converts a broken rule.
pub(crate) fn rejected(operation: &'static str, policy: Policy) -> LibraryError {
    debug!(operation, reason = %policy, "request rejected");
    LibraryError::PolicyViolation(policy)
}

/// A copy going back on the shelf, or straight to the next waiter.
pub(crate) struct Release {
    before: BookCopy,
    after: BookCopy,
    handoff: Option<(Reservation, Reservation)>,
}

impl Release {
    pub(crate) fn reserved_for(&self) -> Option<UserId> {
        self.handoff.as_ref().map(|(_, ready)| ready.member_id)
    }

    pub(crate) fn write<'a>(
        self,
        tx: &mut Changeset<'a>,
        stores: &'a Stores,
    ) -> Result<(), StoreError> {
        tx.update(&*stores.copies, &self.before, self.after)?;
        if let Some((before, after)) = self.handoff {
            tx.update(&*stores.reservations, &before, after)?;
        }
        Ok(())
    }
}

impl Library {
    pub fn new(
        config: &LibraryConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            stores,
            policy: config.lending.clone(),
            hasher: config.auth.hasher()?,
            clock,
            locks: LockManager::new(),
        })
    }

    /// In-memory stores and the system clock.
    pub fn in_memory(config: &LibraryConfig) -> Result<Self, ConfigError> {
        Self::new(config, Stores::in_memory(), Arc::new(SystemClock))
    }

    pub fn policy(&self) -> &LendingPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // === Lending ===

    /// Lends `copy_id` to `member_id` for one loan period.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - Member, copy or book does not exist.
    /// - [`Policy::MemberInactive`] - Member is Suspended or Expired.
    /// - [`Policy::LoanLimitReached`] - Member already holds the maximum.
    /// - [`Policy::FinesTooHigh`] - Outstanding fines exceed the threshold.
    /// - [`Policy::CopyUnavailable`] - Copy is not Available, or held for someone else.
    pub fn issue_loan(
        &self,
        session: &Session,
        member_id: UserId,
        copy_id: CopyId,
    ) -> LibraryResult<Loan> {
        const OP: &str = "issue_loan";
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected(OP, p))?;
        let peek = load(&*self.stores.copies, copy_id)?;
        let _locks = self.locks.acquire([
            LockKey::Member(member_id),
            LockKey::Book(peek.book_id),
            LockKey::Copy(copy_id),
        ]);

        let member = load(&*self.stores.members, member_id)?;
        let copy = load(&*self.stores.copies, copy_id)?;
        let book = load(&*self.stores.books, copy.book_id)?;
        let hold = match copy.status {
            CopyStatus::Reserved => self
                .stores
                .reservations
                .find(&|r| {
                    r.assigned_copy_id == Some(copy_id) && r.status == ReservationStatus::Ready
                })?
                .into_iter()
                .next(),
            _ => None,
        };
        check_issue(&self.policy, &member, &copy, hold.as_ref()).map_err(|p| rejected(OP, p))?;

        let now = self.clock.now();
        let loan = Loan::open(
            self.stores.loans.next_id()?,
            member_id,
            &copy,
            now,
            &self.policy,
        );

        let mut borrower = member.clone();
        borrower.current_books_count += 1;
        let mut lent = copy.clone();
        lent.status = CopyStatus::Borrowed;
        let mut title = book.clone();
        if copy.is_available() {
            title.copy_taken();
        }
        // Borrowing another copy settles the member's own hold, and the
        // copy it kept aside goes to the next in line.
        let (hold, released) = match hold {
            Some(reservation) => (Some(reservation), None),
            None => match self.own_ready_hold(member_id, copy.book_id)? {
                Some(own) => {
                    let held = own
                        .assigned_copy_id
                        .map(|id| load(&*self.stores.copies, id))
                        .transpose()?;
                    let release = match held {
                        Some(held) => Some(self.release_copy(&mut title, held, now)?),
                        None => None,
                    };
                    (Some(own), release)
                }
                None => (None, None),
            },
        };
        let fulfilled = match hold {
            Some(reservation) => {
                let mut done = reservation.clone();
                done.fulfill(now).map_err(|p| rejected(OP, p))?;
                Some((reservation, done))
            }
            None => None,
        };

        apply(OP, |tx| {
            tx.update(&*self.stores.members, &member, borrower)?;
            if title != book {
                tx.update(&*self.stores.books, &book, title)?;
            }
            tx.update(&*self.stores.copies, &copy, lent)?;
            if let Some((before, after)) = fulfilled {
                tx.update(&*self.stores.reservations, &before, after)?;
            }
            if let Some(release) = released {
                release.write(tx, &self.stores)?;
            }
            tx.insert(&*self.stores.loans, loan.clone())
        })?;

        info!(
            loan = %loan.id,
            member = %member_id,
            copy = %copy_id,
            due = %loan.due_date,
            "loan issued"
        );
        Ok(loan)
    }

    /// Extends an open loan by one loan period.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - No such loan.
    /// - [`Policy::AlreadyReturned`] - Loan is closed.
    /// - [`Policy::RenewalLimitReached`] - Renewal cap reached.
    /// - [`Policy::BookHasWaiters`] - Someone has a Pending reservation for the book.
    pub fn renew_loan(&self, session: &Session, loan_id: LoanId) -> LibraryResult<Loan> {
        const OP: &str = "renew_loan";
        let peek = load(&*self.stores.loans, loan_id)?;
        session
            .ensure_can_act_for(peek.member_id)
            .map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([
            LockKey::Member(peek.member_id),
            LockKey::Book(peek.book_id),
            LockKey::Loan(loan_id),
        ]);

        let loan = load(&*self.stores.loans, loan_id)?;
        let has_waiters = !self
            .stores
            .reservations
            .find(&|r| r.book_id == loan.book_id && r.is_pending())?
            .is_empty();

        let mut renewed = loan.clone();
        renewed
            .renew(&self.policy, has_waiters)
            .map_err(|p| rejected(OP, p))?;

        apply(OP, |tx| tx.update(&*self.stores.loans, &loan, renewed.clone()))?;

        info!(
            loan = %loan_id,
            renewals = renewed.renewal_count,
            due = %renewed.due_date,
            "loan renewed"
        );
        Ok(renewed)
    }

    /// Closes a loan, charging any overdue fine.
    ///
    /// The copy goes to the earliest Pending reservation for its book if
    /// there is one, otherwise back on the shelf.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - No such loan.
    /// - [`Policy::AlreadyReturned`] - Loan is closed.
    pub fn return_loan(&self, session: &Session, loan_id: LoanId) -> LibraryResult<Loan> {
        const OP: &str = "return_loan";
        let peek = load(&*self.stores.loans, loan_id)?;
        session
            .ensure_can_act_for(peek.member_id)
            .map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([
            LockKey::Member(peek.member_id),
            LockKey::Book(peek.book_id),
            LockKey::Copy(peek.copy_id),
            LockKey::Loan(loan_id),
        ]);

        let loan = load(&*self.stores.loans, loan_id)?;
        let member = load(&*self.stores.members, loan.member_id)?;
        let copy = load(&*self.stores.copies, loan.copy_id)?;
        let book = load(&*self.stores.books, loan.book_id)?;

        let now = self.clock.now();
        let mut closed = loan.clone();
        let fine = closed
            .close(now, self.policy.fine_per_day)
            .map_err(|p| rejected(OP, p))?;

        let mut borrower = member.clone();
        if fine > Decimal::ZERO {
            borrower.charge(fine);
        }
        debug_assert!(
            borrower.current_books_count > 0,
            "Invariant violated: open loan for member with no books"
        );
        borrower.current_books_count = borrower.current_books_count.saturating_sub(1);

        let mut title = book.clone();
        let release = self.release_copy(&mut title, copy, now)?;
        let reserved_for = release.reserved_for();

        apply(OP, |tx| {
            tx.update(&*self.stores.loans, &loan, closed.clone())?;
            tx.update(&*self.stores.members, &member, borrower)?;
            tx.update(&*self.stores.books, &book, title)?;
            release.write(tx, &self.stores)
        })?;

        info!(
            loan = %loan_id,
            member = %loan.member_id,
            %fine,
            reserved_for = ?reserved_for,
            "loan returned"
        );
        Ok(closed)
    }

    // === Reservations ===

    /// Puts `member_id` in the queue for `book_id`.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - Member or book does not exist.
    /// - [`Policy::MemberInactive`] - Member is not Active.
    /// - [`Policy::BookRetired`] - Book is out of circulation.
    /// - [`Policy::ReservationLimitReached`] - Too many Pending reservations.
    /// - [`Policy::AlreadyReserved`] - Member is already queued for the book.
    pub fn request_reservation(
        &self,
        session: &Session,
        member_id: UserId,
        book_id: BookId,
    ) -> LibraryResult<Reservation> {
        const OP: &str = "request_reservation";
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected(OP, p))?;
        let _locks = self
            .locks
            .acquire([LockKey::Member(member_id), LockKey::Book(book_id)]);

        let member = load(&*self.stores.members, member_id)?;
        let book = load(&*self.stores.books, book_id)?;
        let mine = self
            .stores
            .reservations
            .find(&|r| r.member_id == member_id)?;
        check_request(&self.policy, &member, &mine, &book).map_err(|p| rejected(OP, p))?;

        let queue = self.book_reservations(book_id)?;
        let reservation = Reservation::new(
            self.stores.reservations.next_id()?,
            member_id,
            book_id,
            next_queue_position(&queue),
            self.clock.now(),
        );

        apply(OP, |tx| {
            tx.insert(&*self.stores.reservations, reservation.clone())
        })?;

        info!(
            reservation = %reservation.id,
            member = %member_id,
            book = %book_id,
            position = reservation.queue_position,
            "reservation queued"
        );
        Ok(reservation)
    }

    /// Assigns an Available copy to the reservation at the head of its queue.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - Reservation or copy does not exist.
    /// - [`Policy::NotPermitted`] - Caller is not a librarian.
    /// - [`Policy::ReservationState`] - Reservation is not Pending.
    /// - [`Policy::CopyBookMismatch`] - Copy is of a different book.
    /// - [`Policy::CopyUnavailable`] - Copy is not Available.
    /// - [`Policy::NotFirstInQueue`] - An earlier Pending reservation exists.
    pub fn approve_reservation(
        &self,
        session: &Session,
        reservation_id: ReservationId,
        copy_id: CopyId,
    ) -> LibraryResult<Reservation> {
        const OP: &str = "approve_reservation";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let peek = load(&*self.stores.reservations, reservation_id)?;
        let _locks = self.locks.acquire([
            LockKey::Member(peek.member_id),
            LockKey::Book(peek.book_id),
            LockKey::Copy(copy_id),
            LockKey::Reservation(reservation_id),
        ]);

        let reservation = load(&*self.stores.reservations, reservation_id)?;
        let copy = load(&*self.stores.copies, copy_id)?;
        let book = load(&*self.stores.books, reservation.book_id)?;
        if !reservation.is_pending() {
            return Err(rejected(OP, Policy::ReservationState { expected: "pending" }));
        }
        if copy.book_id != reservation.book_id {
            return Err(rejected(OP, Policy::CopyBookMismatch));
        }
        if !copy.is_available() {
            return Err(rejected(OP, Policy::CopyUnavailable));
        }
        let queue = self.book_reservations(reservation.book_id)?;
        if next_in_queue(&queue).map(|r| r.id) != Some(reservation_id) {
            return Err(rejected(OP, Policy::NotFirstInQueue));
        }

        let now = self.clock.now();
        let mut ready = reservation.clone();
        ready.mark_ready(copy_id, now, &self.policy);
        let mut held = copy.clone();
        held.status = CopyStatus::Reserved;
        let mut title = book.clone();
        title.copy_taken();

        apply(OP, |tx| {
            tx.update(&*self.stores.books, &book, title)?;
            tx.update(&*self.stores.copies, &copy, held)?;
            tx.update(&*self.stores.reservations, &reservation, ready.clone())
        })?;

        info!(
            reservation = %reservation_id,
            copy = %copy_id,
            member = %reservation.member_id,
            "reservation ready"
        );
        Ok(ready)
    }

    /// Cancels an open reservation.
    ///
    /// Other queue positions are left as they are. A copy held by a Ready
    /// reservation is offered to the next in line.
    pub fn cancel_reservation(
        &self,
        session: &Session,
        reservation_id: ReservationId,
    ) -> LibraryResult<Reservation> {
        const OP: &str = "cancel_reservation";
        let peek = load(&*self.stores.reservations, reservation_id)?;
        session
            .ensure_can_act_for(peek.member_id)
            .map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire(
            [
                Some(LockKey::Member(peek.member_id)),
                Some(LockKey::Book(peek.book_id)),
                peek.assigned_copy_id.map(LockKey::Copy),
                Some(LockKey::Reservation(reservation_id)),
            ]
            .into_iter()
            .flatten(),
        );

        let reservation = load(&*self.stores.reservations, reservation_id)?;
        let mut cancelled = reservation.clone();
        let released = cancelled.cancel().map_err(|p| rejected(OP, p))?;

        let now = self.clock.now();
        let shelf = self.shelve_released(reservation.book_id, released, now)?;

        apply(OP, |tx| {
            tx.update(&*self.stores.reservations, &reservation, cancelled.clone())?;
            if let Some((book, title, release)) = shelf {
                tx.update(&*self.stores.books, &book, title)?;
                release.write(tx, &self.stores)?;
            }
            Ok(())
        })?;

        info!(
            reservation = %reservation_id,
            member = %reservation.member_id,
            position = reservation.queue_position,
            "reservation cancelled"
        );
        Ok(cancelled)
    }

    /// Expires Ready reservations whose hold has elapsed.
    ///
    /// Each held copy is offered to the next Pending reservation, or
    /// returned to the shelf. Meant to be driven by an external scheduler.
    /// Returns the number of reservations expired.
    pub fn expire_reservations(&self, session: &Session) -> LibraryResult<usize> {
        const OP: &str = "expire_reservations";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let now = self.clock.now();
        let due = self.stores.reservations.find(&|r| r.hold_elapsed(now))?;

        let mut expired = 0;
        for candidate in due {
            if self.expire_one(&candidate, now)? {
                expired += 1;
            }
        }
        info!(expired, "reservation holds swept");
        Ok(expired)
    }

    fn expire_one(&self, peek: &Reservation, now: DateTime<Utc>) -> LibraryResult<bool> {
        let _locks = self.locks.acquire(
            [
                Some(LockKey::Member(peek.member_id)),
                Some(LockKey::Book(peek.book_id)),
                peek.assigned_copy_id.map(LockKey::Copy),
                Some(LockKey::Reservation(peek.id)),
            ]
            .into_iter()
            .flatten(),
        );

        let reservation = load(&*self.stores.reservations, peek.id)?;
        if !reservation.hold_elapsed(now) {
            return Ok(false);
        }
        let mut expired = reservation.clone();
        let released = expired.expire();
        let shelf = self.shelve_released(reservation.book_id, released, now)?;

        apply("expire_reservation", |tx| {
            tx.update(&*self.stores.reservations, &reservation, expired)?;
            if let Some((book, title, release)) = shelf {
                tx.update(&*self.stores.books, &book, title)?;
                release.write(tx, &self.stores)?;
            }
            Ok(())
        })?;

        info!(
            reservation = %reservation.id,
            member = %reservation.member_id,
            "reservation hold expired"
        );
        Ok(true)
    }

    // === Fines and members ===

    /// Pays down a member's fines. Overpayment leaves the balance at zero.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::NotFound`] - No such member.
    /// - [`Policy::InvalidAmount`] - Amount is zero or negative.
    pub fn pay_fine(
        &self,
        session: &Session,
        member_id: UserId,
        amount: Decimal,
    ) -> LibraryResult<Member> {
        const OP: &str = "pay_fine";
        session
            .ensure_can_act_for(member_id)
            .map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Member(member_id)]);

        let member = load(&*self.stores.members, member_id)?;
        let mut payer = member.clone();
        payer.pay(amount).map_err(|p| rejected(OP, p))?;
        let settled = if payer.fines_owed.is_zero() {
            self.stores
                .loans
                .find(&|l| l.member_id == member_id && l.has_unpaid_fine())?
        } else {
            Vec::new()
        };

        apply(OP, |tx| {
            tx.update(&*self.stores.members, &member, payer.clone())?;
            for loan in &settled {
                let mut paid = loan.clone();
                paid.fine_paid = true;
                tx.update(&*self.stores.loans, loan, paid)?;
            }
            Ok(())
        })?;

        info!(
            member = %member_id,
            paid = %amount,
            owed = %payer.fines_owed,
            "fine paid"
        );
        Ok(payer)
    }

    /// Changes a member's standing. Librarians only.
    pub fn set_member_status(
        &self,
        session: &Session,
        member_id: UserId,
        status: MemberStatus,
    ) -> LibraryResult<Member> {
        const OP: &str = "set_member_status";
        session.ensure_librarian().map_err(|p| rejected(OP, p))?;
        let _locks = self.locks.acquire([LockKey::Member(member_id)]);

        let member = load(&*self.stores.members, member_id)?;
        let mut changed = member.clone();
        changed.status = status;
        apply(OP, |tx| {
            tx.update(&*self.stores.members, &member, changed.clone())
        })?;

        info!(member = %member_id, ?status, "member status changed");
        Ok(changed)
    }

    // === Shared steps ===

    /// The member's Ready reservation for `book_id`, if any.
    fn own_ready_hold(
        &self,
        member_id: UserId,
        book_id: BookId,
    ) -> LibraryResult<Option<Reservation>> {
        Ok(self
            .stores
            .reservations
            .find(&|r| {
                r.member_id == member_id
                    && r.book_id == book_id
                    && r.status == ReservationStatus::Ready
            })?
            .into_iter()
            .next())
    }

    /// Every reservation ever made for `book_id`.
    pub(crate) fn book_reservations(&self, book_id: BookId) -> LibraryResult<Vec<Reservation>> {
        Ok(self
            .stores
            .reservations
            .find(&|r| r.book_id == book_id)?)
    }

    /// Makes `copy` Available again, then hands it to the next Pending
    /// reservation for its book if there is one.
    ///
    /// Caller holds the book's lock; `book` is updated in place.
    pub(crate) fn release_copy(
        &self,
        book: &mut Book,
        copy: BookCopy,
        now: DateTime<Utc>,
    ) -> LibraryResult<Release> {
        let mut after = copy.clone();
        after.status = CopyStatus::Available;
        book.copy_freed();

        let queue = self.book_reservations(book.id)?;
        let handoff = match next_in_queue(&queue) {
            Some(next) => {
                let mut ready = next.clone();
                ready.mark_ready(after.id, now, &self.policy);
                after.status = CopyStatus::Reserved;
                book.copy_taken();
                Some((next.clone(), ready))
            }
            None => None,
        };

        Ok(Release {
            before: copy,
            after,
            handoff,
        })
    }

    /// Loads what is needed to put a copy freed by a reservation back in
    /// circulation.
    fn shelve_released(
        &self,
        book_id: BookId,
        released: Option<CopyId>,
        now: DateTime<Utc>,
    ) -> LibraryResult<Option<(Book, Book, Release)>> {
        let Some(copy_id) = released else {
            return Ok(None);
        };
        let book = load(&*self.stores.books, book_id)?;
        let copy = load(&*self.stores.copies, copy_id)?;
        let mut title = book.clone();
        let release = self.release_copy(&mut title, copy, now)?;
        Ok(Some((book, title, release)))
    }
}
