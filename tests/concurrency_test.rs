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

//! Concurrency tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real coordinator from many threads and verify
//! that limit checks cannot be raced past and that the lock order never
//! produces a cycle.

use chrono::{TimeZone, Utc};
use library_lending_rs::{
    AuthConfig, BookCopy, CopyStatus, Library, LibraryConfig, ManualClock, NewBook, Policy,
    Session, Stores, UserId,
};
use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn library() -> (Library, Session) {
    let config = LibraryConfig {
        auth: AuthConfig {
            hash_memory_kib: 8,
            hash_iterations: 1,
            hash_parallelism: 1,
        },
        ..LibraryConfig::default()
    };
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let library = Library::new(&config, Stores::in_memory(), clock).unwrap();
    library
        .register_librarian(None, "staff", "pw", "Staff")
        .unwrap();
    let staff = library.login("staff", "pw").unwrap();
    (library, staff)
}

fn add_book(library: &Library, staff: &Session, isbn: &str, copies: u32) -> Vec<BookCopy> {
    library
        .add_book(
            staff,
            NewBook {
                isbn: isbn.to_string(),
                title: format!("Title {isbn}"),
                author: "Author".to_string(),
                copies,
            },
        )
        .unwrap()
        .1
}

fn add_member(library: &Library, username: &str) -> (UserId, Session) {
    let user = library.register_member(username, "pw", username).unwrap();
    (user.id, library.login(username, "pw").unwrap())
}

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Tests ===

/// Many threads borrowing for one member never push past the limit.
#[test]
fn concurrent_loans_respect_member_limit() {
    let (library, staff) = library();
    let copies = add_book(&library, &staff, "111", 40);
    let (ada, session) = add_member(&library, "ada");
    let library = Arc::new(library);
    let issued = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = copies
        .into_iter()
        .map(|copy| {
            let library = library.clone();
            let issued = issued.clone();
            thread::spawn(move || match library.issue_loan(&session, ada, copy.id) {
                Ok(_) => {
                    issued.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => {
                    assert_eq!(error.policy(), Some(&Policy::LoanLimitReached { limit: 3 }));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(issued.load(Ordering::SeqCst), 3);
    let member = library.get_member(&staff, ada).unwrap();
    assert_eq!(member.current_books_count, 3);
}

/// Only one of many members racing for a single copy gets it.
#[test]
fn single_copy_goes_to_one_borrower() {
    let (library, staff) = library();
    let copies = add_book(&library, &staff, "111", 1);
    let members: Vec<_> = (0..16)
        .map(|i| add_member(&library, &format!("member{i}")))
        .collect();
    let library = Arc::new(library);
    let copy = copies[0].id;

    let handles: Vec<_> = members
        .into_iter()
        .map(|(id, session)| {
            let library = library.clone();
            thread::spawn(move || library.issue_loan(&session, id, copy).is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    let book = library.get_book(copies[0].book_id).unwrap();
    assert_eq!(book.available_copies, 0);
    assert_eq!(library.get_copy(copy).unwrap().status, CopyStatus::Borrowed);
}

/// Mixed lending and queue traffic across shared members and books.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let (library, staff) = library();
    let books: Vec<Vec<BookCopy>> = (0..3)
        .map(|i| add_book(&library, &staff, &format!("978-{i}"), 3))
        .collect();
    let members: Vec<(UserId, Session)> = (0..6)
        .map(|i| add_member(&library, &format!("member{i}")))
        .collect();
    let library = Arc::new(library);

    const OPS_PER_THREAD: usize = 200;

    let handles: Vec<_> = members
        .iter()
        .enumerate()
        .map(|(t, &(member, session))| {
            let library = library.clone();
            let books = books.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let copies = &books[(t + i) % books.len()];
                    let copy = &copies[i % copies.len()];
                    match i % 5 {
                        0 | 1 => {
                            let _ = library.issue_loan(&session, member, copy.id);
                        }
                        2 => {
                            let _ = library.request_reservation(&session, member, copy.book_id);
                        }
                        3 => {
                            if let Ok(loans) = library.member_active_loans(&session, member) {
                                if let Some(loan) = loans.first() {
                                    let _ = library.return_loan(&session, loan.id);
                                }
                            }
                        }
                        _ => {
                            if let Ok(reservations) = library.member_reservations(&session, member)
                            {
                                if let Some(r) = reservations.iter().find(|r| r.is_open()) {
                                    let _ = library.cancel_reservation(&session, r.id);
                                }
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    for (member, _) in &members {
        let open = library.member_active_loans(&staff, *member).unwrap().len();
        let profile = library.get_member(&staff, *member).unwrap();
        assert_eq!(profile.current_books_count as usize, open);
    }
    for copies in &books {
        let book_id = copies[0].book_id;
        let on_shelf = library
            .book_copies(book_id)
            .unwrap()
            .iter()
            .filter(|c| c.is_available())
            .count();
        assert_eq!(
            library.get_book(book_id).unwrap().available_copies as usize,
            on_shelf
        );
    }
}
