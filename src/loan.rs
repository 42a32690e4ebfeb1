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

//! Loan lifecycle.
//!
//! ```text
//!  Loan (Active) ──renew (≤ max_renewals, no waiters)──► Loan (Active, due += period)
//!        │
//!        └──return──► Loan (Returned, fine computed)
//! ```
//!
//! The rules here are pure: they inspect and mutate in-memory records.
//! Locking and persistence belong to the coordinator.

use crate::base::{BookId, CopyId, LoanId, UserId};
use crate::book::{BookCopy, CopyStatus};
use crate::config::LendingPolicy;
use crate::error::Policy;
use crate::fine::compute_fine;
use crate::member::Member;
use crate::reservation::{Reservation, ReservationStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    Returned,
    Overdue,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub member_id: UserId,
    pub copy_id: CopyId,
    pub book_id: BookId,
    pub status: LoanStatus,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub fine_amount: Decimal,
    pub fine_paid: bool,
    pub renewal_count: u32,
}

fn loan_period(policy: &LendingPolicy) -> Duration {
    Duration::days(i64::from(policy.loan_period_days))
}

impl Loan {
    /// Opens a loan starting at `now`.
    pub(crate) fn open(
        id: LoanId,
        member_id: UserId,
        copy: &BookCopy,
        now: DateTime<Utc>,
        policy: &LendingPolicy,
    ) -> Self {
        Self {
            id,
            member_id,
            copy_id: copy.id,
            book_id: copy.book_id,
            status: LoanStatus::Active,
            loan_date: now,
            due_date: now + loan_period(policy),
            return_date: None,
            fine_amount: Decimal::ZERO,
            fine_paid: false,
            renewal_count: 0,
        }
    }

    /// True while the copy is still out.
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now > self.due_date
    }

    /// Fine the loan would carry if returned at `now`.
    ///
    /// For display only; the persisted fine is computed at return time.
    pub fn provisional_fine(&self, now: DateTime<Utc>, rate_per_day: Decimal) -> Decimal {
        match self.return_date {
            Some(_) => self.fine_amount,
            None => compute_fine(self.due_date, now, rate_per_day),
        }
    }

    /// Extends the due date by one loan period.
    pub(crate) fn renew(
        &mut self,
        policy: &LendingPolicy,
        book_has_waiters: bool,
    ) -> Result<(), Policy> {
        if !self.is_open() {
            return Err(Policy::AlreadyReturned);
        }
        if self.renewal_count >= policy.max_renewals {
            return Err(Policy::RenewalLimitReached {
                limit: policy.max_renewals,
            });
        }
        if book_has_waiters {
            return Err(Policy::BookHasWaiters);
        }
        self.due_date += loan_period(policy);
        self.renewal_count += 1;
        Ok(())
    }

    /// Closes the loan at `now` and returns the fine it incurred.
    pub(crate) fn close(&mut self, now: DateTime<Utc>, rate_per_day: Decimal) -> Result<Decimal, Policy> {
        if !self.is_open() {
            return Err(Policy::AlreadyReturned);
        }
        let fine = compute_fine(self.due_date, now, rate_per_day);
        self.return_date = Some(now);
        self.status = LoanStatus::Returned;
        if fine > Decimal::ZERO {
            self.fine_amount = fine;
        }
        Ok(fine)
    }

    pub(crate) fn has_unpaid_fine(&self) -> bool {
        self.fine_amount > Decimal::ZERO && !self.fine_paid
    }
}

/// Checks whether `member` may borrow `copy`.
///
/// A Reserved copy may go only to the member whose Ready reservation
/// `hold` is assigned to it.
pub(crate) fn check_issue(
    policy: &LendingPolicy,
    member: &Member,
    copy: &BookCopy,
    hold: Option<&Reservation>,
) -> Result<(), Policy> {
    member.ensure_active()?;
    if member.current_books_count >= member.max_books_allowed {
        return Err(Policy::LoanLimitReached {
            limit: member.max_books_allowed,
        });
    }
    if member.fines_owed > policy.max_outstanding_fine {
        return Err(Policy::FinesTooHigh);
    }
    match copy.status {
        CopyStatus::Available => Ok(()),
        CopyStatus::Reserved => match hold {
            Some(reservation)
                if reservation.member_id == member.id
                    && reservation.status == ReservationStatus::Ready
                    && reservation.assigned_copy_id == Some(copy.id) =>
            {
                Ok(())
            }
            _ => Err(Policy::CopyUnavailable),
        },
        _ => Err(Policy::CopyUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ReservationId;
    use crate::member::MemberStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn member() -> Member {
        Member::new(UserId(1), 3, now())
    }

    fn copy(status: CopyStatus) -> BookCopy {
        BookCopy {
            id: CopyId(10),
            book_id: BookId(1),
            barcode: "978-001".into(),
            sequence: 1,
            status,
        }
    }

    fn loan() -> Loan {
        Loan::open(LoanId(1), UserId(1), &copy(CopyStatus::Available), now(), &LendingPolicy::default())
    }

    #[test]
    fn open_sets_due_date_one_period_out() {
        let loan = loan();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.due_date, now() + Duration::days(14));
        assert_eq!(loan.book_id, BookId(1));
        assert!(loan.is_open());
    }

    #[test]
    fn renew_extends_due_date_and_counts() {
        let policy = LendingPolicy::default();
        let mut loan = loan();
        loan.renew(&policy, false).unwrap();
        assert_eq!(loan.renewal_count, 1);
        assert_eq!(loan.due_date, now() + Duration::days(28));
    }

    #[test]
    fn renew_stops_at_cap() {
        let policy = LendingPolicy::default();
        let mut loan = loan();
        loan.renew(&policy, false).unwrap();
        loan.renew(&policy, false).unwrap();
        assert_eq!(
            loan.renew(&policy, false),
            Err(Policy::RenewalLimitReached { limit: 2 })
        );
        assert_eq!(loan.renewal_count, 2);
    }

    #[test]
    fn renew_blocked_by_waiters_even_when_fresh() {
        let mut loan = loan();
        assert_eq!(
            loan.renew(&LendingPolicy::default(), true),
            Err(Policy::BookHasWaiters)
        );
        assert_eq!(loan.renewal_count, 0);
    }

    #[test]
    fn close_computes_fine() {
        let mut loan = loan();
        let returned = loan.due_date + Duration::days(5);
        let fine = loan.close(returned, dec!(0.50)).unwrap();
        assert_eq!(fine, dec!(2.50));
        assert_eq!(loan.fine_amount, dec!(2.50));
        assert_eq!(loan.status, LoanStatus::Returned);
        assert_eq!(loan.return_date, Some(returned));
        assert!(loan.has_unpaid_fine());
    }

    #[test]
    fn close_twice_rejected() {
        let mut loan = loan();
        loan.close(now(), dec!(0.50)).unwrap();
        assert_eq!(loan.close(now(), dec!(0.50)), Err(Policy::AlreadyReturned));
        assert_eq!(
            loan.renew(&LendingPolicy::default(), false),
            Err(Policy::AlreadyReturned)
        );
    }

    #[test]
    fn overdue_is_derived_from_due_date() {
        let loan = loan();
        assert!(!loan.is_overdue(loan.due_date));
        assert!(loan.is_overdue(loan.due_date + Duration::seconds(1)));
        assert_eq!(
            loan.provisional_fine(loan.due_date + Duration::days(3), dec!(0.50)),
            dec!(1.50)
        );
    }

    #[test]
    fn issue_checks_in_order() {
        let policy = LendingPolicy::default();
        let available = copy(CopyStatus::Available);

        let mut inactive = member();
        inactive.status = MemberStatus::Expired;
        inactive.current_books_count = 3;
        assert_eq!(
            check_issue(&policy, &inactive, &available, None),
            Err(Policy::MemberInactive)
        );

        let mut full = member();
        full.current_books_count = 3;
        assert_eq!(
            check_issue(&policy, &full, &available, None),
            Err(Policy::LoanLimitReached { limit: 3 })
        );

        let mut owing = member();
        owing.fines_owed = dec!(10.01);
        assert_eq!(
            check_issue(&policy, &owing, &available, None),
            Err(Policy::FinesTooHigh)
        );

        let mut at_threshold = member();
        at_threshold.fines_owed = dec!(10.00);
        assert!(check_issue(&policy, &at_threshold, &available, None).is_ok());

        assert_eq!(
            check_issue(&policy, &member(), &copy(CopyStatus::Borrowed), None),
            Err(Policy::CopyUnavailable)
        );
    }

    #[test]
    fn reserved_copy_goes_only_to_holder() {
        let policy = LendingPolicy::default();
        let reserved = copy(CopyStatus::Reserved);
        let mut hold = Reservation::new(ReservationId(1), UserId(1), BookId(1), 1, now());
        hold.mark_ready(reserved.id, now(), &policy);

        assert!(check_issue(&policy, &member(), &reserved, Some(&hold)).is_ok());

        let other = Member::new(UserId(2), 3, now());
        assert_eq!(
            check_issue(&policy, &other, &reserved, Some(&hold)),
            Err(Policy::CopyUnavailable)
        );
        assert_eq!(
            check_issue(&policy, &member(), &reserved, None),
            Err(Policy::CopyUnavailable)
        );
    }
}
