//! Core types and engine for the clan statistics tracker.
//!
//! Snapshots of clans are captured from the upstream game API, compacted by
//! the [`codec`], appended to a [`store::SnapshotStore`], and summarised into
//! fixed-shape [`metric::Stats`] records whose differences over lookback
//! windows are cached on each entity for reporting.
//!
//! This crate is deliberately free of HTTP and database dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod accessor;
pub mod codec;
pub mod delta;
pub mod entity;
pub mod error;
pub mod metric;
pub mod record;
pub mod refresh;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod summary;
pub mod upstream;

pub use error::{Error, Result};
