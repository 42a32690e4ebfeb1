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

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use chrono::{DateTime, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use library_lending_rs::{
    Library, LibraryConfig, LibraryError, ManualClock, MemberStatus, NewBook, Session, Stores,
    UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Library Lending - Replay a lending script
///
/// Reads lending events from a CSV file and outputs member (or book)
/// states to stdout. Rejected events are logged to stderr and skipped.
#[derive(Parser, Debug)]
#[command(name = "library-lending-rs")]
#[command(about = "Replays library lending CSV scripts", long_about = None)]
struct Args {
    /// Path to CSV file with lending events
    ///
    /// Expected format: type,member,item,value,at
    /// Example: cargo run -- events.csv > members.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the book report instead of the member report
    #[arg(long)]
    books: bool,
}

fn main() {
    let args = Args::parse();

    let config = match LibraryConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let replay = match replay_events(BufReader::new(file), &config, Utc::now()) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error replaying events: {}", e);
            process::exit(1);
        }
    };

    let written = if args.books {
        write_books(&replay, std::io::stdout())
    } else {
        write_members(&replay, std::io::stdout())
    };
    if let Err(e) = written {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, member, item, value, at`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    event: String,
    member: Option<String>,
    item: Option<String>,
    value: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    at: Option<DateTime<Utc>>,
}

/// Errors that abort a replay.
#[derive(Error, Debug)]
enum ReplayError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// Reasons a single row is skipped.
#[derive(Error, Debug)]
enum RowError {
    #[error("unknown event type '{0}'")]
    UnknownEvent(String),

    #[error("missing '{0}' column")]
    Missing(&'static str),

    #[error("unknown member '{0}'")]
    UnknownMember(String),

    #[error("invalid value '{0}'")]
    InvalidValue(String),

    #[error("no open {0} matches the row")]
    NothingOpen(&'static str),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// Library state after a script has been applied.
struct Replay {
    library: Library,
    clock: Arc<ManualClock>,
    staff: Session,
    members: BTreeMap<String, UserId>,
}

impl Replay {
    fn new(config: &LibraryConfig, start: DateTime<Utc>) -> Result<Self, ReplayError> {
        let clock = Arc::new(ManualClock::new(start));
        let library = Library::new(config, Stores::in_memory(), clock.clone())?;

        let password = SaltString::generate(&mut OsRng).to_string();
        let staff = library
            .register_librarian(None, "replay", &password, "Replay")
            .and_then(|_| library.login("replay", &password))?;

        Ok(Self {
            library,
            clock,
            staff,
            members: BTreeMap::new(),
        })
    }

    fn member(&self, record: &CsvRecord) -> Result<UserId, RowError> {
        let username = required(&record.member, "member")?;
        self.members
            .get(username)
            .copied()
            .ok_or_else(|| RowError::UnknownMember(username.to_string()))
    }

    /// Applies one row on behalf of the member it names.
    fn apply(&mut self, record: &CsvRecord) -> Result<(), RowError> {
        if let Some(at) = record.at {
            self.clock.set(at);
        }
        let library = &self.library;
        let staff = &self.staff;

        match record.event.to_lowercase().as_str() {
            "register" => {
                let username = required(&record.member, "member")?;
                let password = SaltString::generate(&mut OsRng).to_string();
                let display_name = record.value.as_deref().unwrap_or(username);
                let user = library.register_member(username, &password, display_name)?;
                self.members.insert(user.username, user.id);
            }
            "add_book" => {
                let isbn = required(&record.item, "item")?;
                let new_book = parse_book(isbn, required(&record.value, "value")?)?;
                library.add_book(staff, new_book)?;
            }
            "issue" => {
                let member = self.member(record)?;
                let copy = library.find_copy_by_barcode(required(&record.item, "item")?)?;
                library.issue_loan(staff, member, copy.id)?;
            }
            "renew" | "return" => {
                let member = self.member(record)?;
                let copy = library.find_copy_by_barcode(required(&record.item, "item")?)?;
                let loan = library
                    .member_active_loans(staff, member)?
                    .into_iter()
                    .find(|l| l.copy_id == copy.id)
                    .ok_or(RowError::NothingOpen("loan"))?;
                if record.event.eq_ignore_ascii_case("renew") {
                    library.renew_loan(staff, loan.id)?;
                } else {
                    library.return_loan(staff, loan.id)?;
                }
            }
            "reserve" => {
                let member = self.member(record)?;
                let book = library.find_book_by_isbn(required(&record.item, "item")?)?;
                library.request_reservation(staff, member, book.id)?;
            }
            "cancel" => {
                let member = self.member(record)?;
                let book = library.find_book_by_isbn(required(&record.item, "item")?)?;
                let reservation = library
                    .member_reservations(staff, member)?
                    .into_iter()
                    .find(|r| r.book_id == book.id && r.is_open())
                    .ok_or(RowError::NothingOpen("reservation"))?;
                library.cancel_reservation(staff, reservation.id)?;
            }
            "pay" => {
                let member = self.member(record)?;
                let raw = required(&record.value, "value")?;
                let amount: Decimal = raw
                    .parse()
                    .map_err(|_| RowError::InvalidValue(raw.to_string()))?;
                library.pay_fine(staff, member, amount)?;
            }
            "expire" => {
                library.expire_reservations(staff)?;
            }
            other => return Err(RowError::UnknownEvent(other.to_string())),
        }
        Ok(())
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, RowError> {
    field.as_deref().ok_or(RowError::Missing(name))
}

/// Parses an `add_book` value of the form `title;author;copies`.
fn parse_book(isbn: &str, value: &str) -> Result<NewBook, RowError> {
    let invalid = || RowError::InvalidValue(value.to_string());
    let mut parts = value.splitn(3, ';').map(str::trim);
    let (Some(title), Some(author), Some(copies)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    Ok(NewBook {
        isbn: isbn.to_string(),
        title: title.to_string(),
        author: author.to_string(),
        copies: copies.parse().map_err(|_| invalid())?,
    })
}

/// Replay lending events from a CSV reader.
///
/// Rows are applied in file order against a fresh in-memory library whose
/// clock starts at `start` and moves to each row's `at` time when present.
/// Rejected and malformed rows are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, member, item, value, at`
/// - `register`: `member` username, optional display name in `value`
/// - `add_book`: `item` ISBN, `value` as `title;author;copies`
/// - `issue` / `renew` / `return`: `member` username, `item` copy barcode
/// - `reserve` / `cancel`: `member` username, `item` ISBN
/// - `pay`: `member` username, `value` amount
/// - `expire`: sweeps elapsed reservation holds
///
/// # Example
///
/// ```csv
/// type,member,item,value,at
/// add_book,,9780141439518,Pride and Prejudice;Jane Austen;2,2024-01-01T09:00:00Z
/// register,ada,,Ada Lovelace,
/// issue,ada,9780141439518-001,,2024-01-01T10:00:00Z
/// return,ada,9780141439518-001,,2024-01-20T10:00:00Z
/// ```
///
/// # Errors
///
/// Returns an error if the CSV structure is invalid or the library cannot
/// be set up from `config`.
fn replay_events<R: Read>(
    reader: R,
    config: &LibraryConfig,
    start: DateTime<Utc>,
) -> Result<Replay, ReplayError> {
    let mut replay = Replay::new(config, start)?;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        // Header is line 1
        let line = index + 2;
        match result {
            Ok(record) => {
                if let Err(error) = replay.apply(&record) {
                    warn!(line, event = %record.event, %error, "skipping row");
                }
            }
            Err(error) => {
                warn!(line, %error, "skipping malformed row");
            }
        }
    }

    info!(members = replay.members.len(), "replay finished");
    Ok(replay)
}

#[derive(Debug, Serialize)]
struct MemberRow<'a> {
    member: &'a str,
    status: MemberStatus,
    books: u32,
    fines_owed: Decimal,
}

#[derive(Debug, Serialize)]
struct BookRow<'a> {
    isbn: &'a str,
    title: &'a str,
    total: u32,
    available: u32,
    retired: bool,
}

/// Write member states to a CSV writer, ordered by username.
///
/// # CSV Format
///
/// Columns: `member, status, books, fines_owed`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_members<W: Write>(replay: &Replay, writer: W) -> Result<(), ReplayError> {
    let mut wtr = Writer::from_writer(writer);

    for (username, id) in &replay.members {
        let member = replay.library.get_member(&replay.staff, *id)?;
        wtr.serialize(MemberRow {
            member: username,
            status: member.status,
            books: member.current_books_count,
            fines_owed: member.fines_owed,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write book states to a CSV writer, in catalog order.
///
/// # CSV Format
///
/// Columns: `isbn, title, total, available, retired`
fn write_books<W: Write>(replay: &Replay, writer: W) -> Result<(), ReplayError> {
    let mut wtr = Writer::from_writer(writer);

    let books = replay.library.books()?;
    for book in &books {
        wtr.serialize(BookRow {
            isbn: &book.isbn,
            title: &book.title,
            total: book.total_copies,
            available: book.available_copies,
            retired: book.is_retired,
        })?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
