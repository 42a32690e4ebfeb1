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

//! Users, role profiles and sessions.
//!
//! A user is one identity record plus one profile record keyed by the
//! same [`UserId`]. The [`Role`] on the identity says which profile store
//! holds the rest.

use crate::base::UserId;
use crate::error::Policy;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Librarian,
}

/// Identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    /// PHC string produced by argon2.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Active,
    Suspended,
    Expired,
}

/// Borrower profile.
///
/// `fines_owed` and `current_books_count` are derived fields written only
/// by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub status: MemberStatus,
    pub fines_owed: Decimal,
    pub current_books_count: u32,
    pub max_books_allowed: u32,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn new(id: UserId, max_books_allowed: u32, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: MemberStatus::Active,
            fines_owed: Decimal::ZERO,
            current_books_count: 0,
            max_books_allowed,
            joined_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub(crate) fn ensure_active(&self) -> Result<(), Policy> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Policy::MemberInactive)
        }
    }

    /// Adds a fine to the balance.
    pub(crate) fn charge(&mut self, amount: Decimal) {
        self.fines_owed += amount;
    }

    /// Pays down the balance, never below zero.
    pub(crate) fn pay(&mut self, amount: Decimal) -> Result<(), Policy> {
        if amount <= Decimal::ZERO {
            return Err(Policy::InvalidAmount);
        }
        self.fines_owed = (self.fines_owed - amount).max(Decimal::ZERO);
        Ok(())
    }
}

/// Staff profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Librarian {
    pub id: UserId,
    pub hired_at: DateTime<Utc>,
}

/// Authenticated caller, passed into every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    user_id: UserId,
    role: Role,
}

impl Session {
    pub(crate) fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_librarian(&self) -> bool {
        self.role == Role::Librarian
    }

    /// Librarians act on anyone; members only on themselves.
    pub(crate) fn ensure_can_act_for(&self, member: UserId) -> Result<(), Policy> {
        if self.is_librarian() || self.user_id == member {
            Ok(())
        } else {
            Err(Policy::NotPermitted)
        }
    }

    pub(crate) fn ensure_librarian(&self) -> Result<(), Policy> {
        if self.is_librarian() {
            Ok(())
        } else {
            Err(Policy::NotPermitted)
        }
    }
}
