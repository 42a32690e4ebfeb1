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

//! Reservation queue.
//!
//! ```text
//!  Pending ──copy freed / approved──► Ready ──issued to holder──► Fulfilled
//!     │                                 │
//!     └──cancel──► Cancelled ◄──cancel──┤
//!                                       └──hold elapsed──► Expired
//! ```
//!
//! Queue positions are handed out per book in creation order and are never
//! renumbered. The next reservation served is always the Pending one with
//! the smallest position.

use crate::base::{BookId, CopyId, ReservationId, UserId};
use crate::book::Book;
use crate::config::LendingPolicy;
use crate::error::Policy;
use crate::member::Member;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Ready,
    Fulfilled,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub member_id: UserId,
    pub book_id: BookId,
    pub status: ReservationStatus,
    pub queue_position: u32,
    pub requested_at: DateTime<Utc>,
    pub assigned_copy_id: Option<CopyId>,
    pub available_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub fulfilled_date: Option<DateTime<Utc>>,
}

impl Reservation {
    pub(crate) fn new(
        id: ReservationId,
        member_id: UserId,
        book_id: BookId,
        queue_position: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            member_id,
            book_id,
            status: ReservationStatus::Pending,
            queue_position,
            requested_at: now,
            assigned_copy_id: None,
            available_date: None,
            expiry_date: None,
            fulfilled_date: None,
        }
    }

    /// Pending or Ready.
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Pending | ReservationStatus::Ready
        )
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// A Ready reservation whose hold has run out.
    pub fn hold_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Ready && self.expiry_date.is_some_and(|expiry| expiry < now)
    }

    /// Assigns `copy` and starts the hold period.
    pub(crate) fn mark_ready(&mut self, copy: CopyId, now: DateTime<Utc>, policy: &LendingPolicy) {
        debug_assert!(self.is_pending(), "only pending reservations become ready");
        self.status = ReservationStatus::Ready;
        self.assigned_copy_id = Some(copy);
        self.available_date = Some(now);
        self.expiry_date = Some(now + Duration::days(i64::from(policy.reservation_hold_days)));
    }

    pub(crate) fn fulfill(&mut self, now: DateTime<Utc>) -> Result<(), Policy> {
        if self.status != ReservationStatus::Ready {
            return Err(Policy::ReservationState { expected: "ready" });
        }
        self.status = ReservationStatus::Fulfilled;
        self.fulfilled_date = Some(now);
        Ok(())
    }

    /// Cancels the reservation, returning the copy it was holding, if any.
    pub(crate) fn cancel(&mut self) -> Result<Option<CopyId>, Policy> {
        if !self.is_open() {
            return Err(Policy::ReservationState { expected: "open" });
        }
        let released = self.held_copy();
        self.status = ReservationStatus::Cancelled;
        Ok(released)
    }

    /// Expires a Ready reservation, returning the copy it was holding.
    pub(crate) fn expire(&mut self) -> Option<CopyId> {
        let released = self.held_copy();
        self.status = ReservationStatus::Expired;
        released
    }

    fn held_copy(&self) -> Option<CopyId> {
        match self.status {
            ReservationStatus::Ready => self.assigned_copy_id,
            _ => None,
        }
    }
}

/// Checks whether `member` may join the queue for `book`.
///
/// `member_reservations` holds every reservation the member has made.
pub(crate) fn check_request(
    policy: &LendingPolicy,
    member: &Member,
    member_reservations: &[Reservation],
    book: &Book,
) -> Result<(), Policy> {
    member.ensure_active()?;
    if book.is_retired {
        return Err(Policy::BookRetired);
    }
    let pending = member_reservations.iter().filter(|r| r.is_pending()).count();
    if pending >= policy.max_pending_reservations as usize {
        return Err(Policy::ReservationLimitReached {
            limit: policy.max_pending_reservations,
        });
    }
    if member_reservations
        .iter()
        .any(|r| r.book_id == book.id && r.is_open())
    {
        return Err(Policy::AlreadyReserved);
    }
    Ok(())
}

/// Position for a new reservation on a book.
///
/// Counts every reservation ever made for the book, so positions freed by
/// cancellation or expiry are never handed out again.
pub(crate) fn next_queue_position(book_reservations: &[Reservation]) -> u32 {
    book_reservations
        .iter()
        .map(|r| r.queue_position)
        .max()
        .map_or(1, |max| max + 1)
}

/// The Pending reservation to serve next, if any.
pub fn next_in_queue(book_reservations: &[Reservation]) -> Option<&Reservation> {
    book_reservations
        .iter()
        .filter(|r| r.is_pending())
        .min_by_key(|r| r.queue_position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn reservation(id: u32, member: u32, position: u32) -> Reservation {
        Reservation::new(ReservationId(id), UserId(member), BookId(1), position, now())
    }

    fn book() -> Book {
        Book {
            id: BookId(1),
            isbn: "9780000000001".into(),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            total_copies: 1,
            available_copies: 0,
            is_retired: false,
            added_at: now(),
        }
    }

    #[test]
    fn first_position_is_one() {
        assert_eq!(next_queue_position(&[]), 1);
    }

    #[test]
    fn cancelled_positions_are_not_reused() {
        let mut only = reservation(1, 1, 1);
        only.cancel().unwrap();
        assert_eq!(next_queue_position(&[only]), 2);
    }

    #[test]
    fn next_in_queue_takes_smallest_pending_position() {
        let mut served = reservation(1, 1, 1);
        served.mark_ready(CopyId(1), now(), &LendingPolicy::default());
        let later = reservation(3, 3, 5);
        let earlier = reservation(2, 2, 3);

        let queue = vec![served, later, earlier];
        assert_eq!(next_in_queue(&queue).map(|r| r.id), Some(ReservationId(2)));
    }

    #[test]
    fn empty_queue_has_no_next() {
        let mut cancelled = reservation(1, 1, 1);
        cancelled.cancel().unwrap();
        assert!(next_in_queue(&[cancelled]).is_none());
    }

    #[test]
    fn ready_sets_hold_window() {
        let mut r = reservation(1, 1, 1);
        r.mark_ready(CopyId(9), now(), &LendingPolicy::default());
        assert_eq!(r.status, ReservationStatus::Ready);
        assert_eq!(r.assigned_copy_id, Some(CopyId(9)));
        assert_eq!(r.available_date, Some(now()));
        assert_eq!(r.expiry_date, Some(now() + Duration::days(3)));
        assert!(!r.hold_elapsed(now() + Duration::days(3)));
        assert!(r.hold_elapsed(now() + Duration::days(3) + Duration::seconds(1)));
    }

    #[test]
    fn cancel_ready_releases_copy() {
        let mut r = reservation(1, 1, 1);
        r.mark_ready(CopyId(9), now(), &LendingPolicy::default());
        assert_eq!(r.cancel(), Ok(Some(CopyId(9))));
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert_eq!(
            r.cancel(),
            Err(Policy::ReservationState { expected: "open" })
        );
    }

    #[test]
    fn fulfill_requires_ready() {
        let mut r = reservation(1, 1, 1);
        assert_eq!(
            r.fulfill(now()),
            Err(Policy::ReservationState { expected: "ready" })
        );
        r.mark_ready(CopyId(2), now(), &LendingPolicy::default());
        r.fulfill(now()).unwrap();
        assert_eq!(r.status, ReservationStatus::Fulfilled);
        assert_eq!(r.fulfilled_date, Some(now()));
    }

    #[test]
    fn request_rules() {
        let policy = LendingPolicy::default();
        let member = Member::new(UserId(1), 3, now());

        let mut retired = book();
        retired.is_retired = true;
        assert_eq!(
            check_request(&policy, &member, &[], &retired),
            Err(Policy::BookRetired)
        );

        let existing = vec![reservation(1, 1, 1)];
        assert_eq!(
            check_request(&policy, &member, &existing, &book()),
            Err(Policy::AlreadyReserved)
        );

        let mut elsewhere: Vec<Reservation> = (1..=3).map(|i| reservation(i, 1, 1)).collect();
        for (i, r) in elsewhere.iter_mut().enumerate() {
            r.book_id = BookId(10 + i as u32);
        }
        assert_eq!(
            check_request(&policy, &member, &elsewhere, &book()),
            Err(Policy::ReservationLimitReached { limit: 3 })
        );

        assert!(check_request(&policy, &member, &[], &book()).is_ok());
    }
}
