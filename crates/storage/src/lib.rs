#![forbid(unsafe_code)]
//! SQLite-backed issue graph store with a line-delimited textual mirror.
//!
//! The store keeps a relational, content-addressed database of work items
//! with a first-class dependency graph, and mirrors it into a JSONL
//! snapshot suitable for tracking with the user's version-control workflow.
//! The mirror is cooperative: imports are staleness-detected, exports are
//! atomic, and collisions resolve last-writer-wins with tombstone and
//! timestamp protection.

mod last_touched;
mod store;

pub use last_touched::{clear_last_touched, get_last_touched_id, set_last_touched_id};
pub use store::*;
