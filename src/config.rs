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

//! Configuration for the lending engine.
//!
//! Values are layered: built-in defaults, then an optional file, then
//! `LIBRARY__<SECTION>__<KEY>` environment variables.
//!
//! ```
//! use library_lending_rs::LendingPolicy;
//!
//! let policy = LendingPolicy::default();
//! assert_eq!(policy.loan_period_days, 14);
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lending rules applied by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LendingPolicy {
    pub loan_period_days: u32,
    pub max_books_allowed: u32,
    /// Members owing more than this cannot borrow.
    pub max_outstanding_fine: Decimal,
    pub max_renewals: u32,
    pub fine_per_day: Decimal,
    pub max_pending_reservations: u32,
    /// How long a Ready reservation holds its copy.
    pub reservation_hold_days: u32,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: 14,
            max_books_allowed: 3,
            max_outstanding_fine: dec!(10.00),
            max_renewals: 2,
            fine_per_day: dec!(0.50),
            max_pending_reservations: 3,
            reservation_hold_days: 3,
        }
    }
}

/// Password hashing cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        // argon2 crate defaults
        Self {
            hash_memory_kib: 19 * 1024,
            hash_iterations: 2,
            hash_parallelism: 1,
        }
    }
}

impl AuthConfig {
    /// Password hasher for these cost settings.
    pub fn hasher(&self) -> Result<Argon2<'static>, ConfigError> {
        let params = Params::new(
            self.hash_memory_kib,
            self.hash_iterations,
            self.hash_parallelism,
            None,
        )
        .map_err(|e| ConfigError::Message(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub lending: LendingPolicy,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl LibraryConfig {
    /// Loads configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("LIBRARY").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let policy = LendingPolicy::default();
        assert_eq!(policy.loan_period_days, 14);
        assert_eq!(policy.max_books_allowed, 3);
        assert_eq!(policy.max_outstanding_fine, dec!(10.00));
        assert_eq!(policy.max_renewals, 2);
        assert_eq!(policy.fine_per_day, dec!(0.50));
        assert_eq!(policy.max_pending_reservations, 3);
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let config = LibraryConfig::load(None).unwrap();
        assert_eq!(config.lending, LendingPolicy::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_reads_file_overrides() {
        let dir = std::env::temp_dir().join(format!("library-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("library.toml");
        std::fs::write(
            &path,
            "[lending]\nloan_period_days = 21\nmax_books_allowed = 5\n",
        )
        .unwrap();

        let config = LibraryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.lending.loan_period_days, 21);
        assert_eq!(config.lending.max_books_allowed, 5);
        assert_eq!(config.lending.max_renewals, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn hasher_rejects_impossible_cost() {
        let auth = AuthConfig {
            hash_memory_kib: 1,
            hash_iterations: 1,
            hash_parallelism: 1,
        };
        assert!(auth.hasher().is_err());
        assert!(AuthConfig::default().hasher().is_ok());
    }
}
