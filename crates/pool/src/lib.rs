//! Round-based, bounded-concurrency job pool
//!
//! A [`JobPool`] owns a fixed set of worker threads that stay alive for the
//! life of the pool. Work is organised in rounds:
//!
//! ```text
//! start_round ─▶ submit* ─▶ wait ─▶ (inspect results) ─▶ start_round ─▶ ...
//! ```
//!
//! Within a round jobs run in parallel with no ordering guarantee; rounds are
//! strictly sequential. Job failures and panics are collected as data and
//! never take down a worker or the round.
//!
//! # Threads
//!
//! ```text
//! submit ─▶ [public queue] ─▶ feeder ─▶ [internal queue] ─▶ worker × N
//!                                                              │
//!                                      results + wait group ◀──┘
//! ```
//!
//! A watchdog thread reports jobs that exceed the soft timeout. Nothing is
//! ever cancelled.

mod job;
mod pool;
mod report;
mod wait_group;
mod worker;

pub use job::{Job, JobError, JobFn, JobRecord, Outcome};
pub use pool::{JobPool, PoolError};
pub use report::{RoundError, log_errors_slice, log_slowest_slice};
pub use worker::{WorkerInfo, WorkerState};
