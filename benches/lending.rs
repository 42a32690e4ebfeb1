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

//! Benchmarks for the lending engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded issue / return cycles
//! - Reservation handoff on return
//! - Multi-threaded lending across members and titles
//! - Multi-threaded lending contending on one title
//! - Fine computation

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use library_lending_rs::{
    AuthConfig, BookCopy, Library, LibraryConfig, ManualClock, NewBook, Session, Stores, UserId,
    compute_fine,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

struct Setup {
    library: Library,
    staff: Session,
    members: Vec<(UserId, Session)>,
    copies: Vec<BookCopy>,
}

/// Library with `members` borrowers and `books` titles of `copies` each.
fn setup(members: usize, books: usize, copies: u32) -> Setup {
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
    library.register_librarian(None, "staff", "pw", "Staff").unwrap();
    let staff = library.login("staff", "pw").unwrap();

    let members = (0..members)
        .map(|i| {
            let name = format!("member{i}");
            let user = library.register_member(&name, "pw", &name).unwrap();
            (user.id, library.login(&name, "pw").unwrap())
        })
        .collect();

    let mut all_copies = Vec::new();
    for i in 0..books {
        let (_, book_copies) = library
            .add_book(
                &staff,
                NewBook {
                    isbn: format!("978-{i}"),
                    title: format!("Book {i}"),
                    author: "Author".to_string(),
                    copies,
                },
            )
            .unwrap();
        all_copies.extend(book_copies);
    }

    Setup {
        library,
        staff,
        members,
        copies: all_copies,
    }
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_issue_return(c: &mut Criterion) {
    let s = setup(1, 1, 1);
    let (member, session) = s.members[0];
    let copy = s.copies[0].id;

    c.bench_function("issue_return", |b| {
        b.iter(|| {
            let loan = s.library.issue_loan(&session, member, black_box(copy)).unwrap();
            s.library.return_loan(&session, loan.id).unwrap();
        })
    });
}

fn bench_loan_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("loan_throughput");

    for count in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || setup(count, 1, count as u32),
                |s| {
                    for (i, (member, session)) in s.members.iter().enumerate() {
                        let loan = s
                            .library
                            .issue_loan(session, *member, s.copies[i].id)
                            .unwrap();
                        s.library.return_loan(session, loan.id).unwrap();
                    }
                    black_box(&s.library);
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// =============================================================================
// Reservation Benchmarks
// =============================================================================

fn bench_reservation_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_handoff");

    for waiting in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(waiting),
            waiting,
            |b, &waiting| {
                b.iter_batched(
                    || {
                        // One borrower plus a queue of `waiting` members on one copy
                        let s = setup(waiting + 1, 1, 1);
                        let (holder, session) = s.members[0];
                        let loan = s.library.issue_loan(&session, holder, s.copies[0].id).unwrap();
                        for (member, session) in &s.members[1..] {
                            s.library
                                .request_reservation(session, *member, s.copies[0].book_id)
                                .unwrap();
                        }
                        (s, loan.id)
                    },
                    |(s, loan)| {
                        s.library.return_loan(&s.staff, loan).unwrap();
                        black_box(&s.library);
                    },
                    criterion::BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_lending(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_lending");

    for num_members in [10, 100].iter() {
        let cycles = 20;
        group.throughput(Throughput::Elements(*num_members as u64 * cycles * 2));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_members),
            num_members,
            |b, &num_members| {
                let s = setup(num_members, 4, num_members as u32);
                b.iter(|| {
                    // Member i always borrows the i-th copy of a rotating title
                    s.members
                        .par_iter()
                        .enumerate()
                        .for_each(|(i, (member, session))| {
                            for cycle in 0..cycles as usize {
                                let title = (i + cycle) % 4;
                                let copy = s.copies[title * num_members + i].id;
                                let loan = s.library.issue_loan(session, *member, copy).unwrap();
                                s.library.return_loan(session, loan.id).unwrap();
                            }
                        });
                })
            },
        );
    }
    group.finish();
}

fn bench_contended_issue(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_issue");

    for num_members in [10, 100].iter() {
        let cycles = 20;
        group.throughput(Throughput::Elements(*num_members as u64 * cycles * 2));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_members),
            num_members,
            |b, &num_members| {
                // Every member works on the same title, so all writes share its lock
                let s = setup(num_members, 1, num_members as u32);
                b.iter(|| {
                    s.members
                        .par_iter()
                        .zip(s.copies.par_iter())
                        .for_each(|((member, session), copy)| {
                            for _ in 0..cycles {
                                let loan = s.library.issue_loan(session, *member, copy.id).unwrap();
                                s.library.return_loan(session, loan.id).unwrap();
                            }
                        });
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Fine Policy Benchmarks
// =============================================================================

fn bench_compute_fine(c: &mut Criterion) {
    let due = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let returned = due + Duration::days(37) + Duration::hours(5);
    let rate = Decimal::new(50, 2);

    c.bench_function("compute_fine", |b| {
        b.iter(|| compute_fine(black_box(due), black_box(returned), black_box(rate)))
    });
}

criterion_group!(
    benches,
    bench_issue_return,
    bench_loan_throughput,
    bench_reservation_handoff,
    bench_parallel_lending,
    bench_contended_issue,
    bench_compute_fine,
);
criterion_main!(benches);
