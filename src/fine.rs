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

//! Overdue fine computation.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use library_lending_rs::compute_fine;
//! use rust_decimal_macros::dec;
//!
//! let due = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let returned = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
//! assert_eq!(compute_fine(due, returned, dec!(0.50)), dec!(2.50));
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Whole days `returned` lies past `due`; partial days are dropped.
pub fn days_overdue(due: DateTime<Utc>, returned: DateTime<Utc>) -> i64 {
    (returned - due).num_days().max(0)
}

/// Fine owed for returning at `returned` a loan due at `due`.
///
/// Zero when returned on time or early.
pub fn compute_fine(due: DateTime<Utc>, returned: DateTime<Utc>, rate_per_day: Decimal) -> Decimal {
    Decimal::from(days_overdue(due, returned)) * rate_per_day
}
