#![forbid(unsafe_code)]
//! Pure domain layer for the braid issue graph.
//!
//! No I/O and no SQL live here: this crate defines the entities, their
//! validation rules, the canonical content hash, the adaptive short-ID
//! generator, and the blocking-semantics classification that the storage
//! crate materializes.

pub mod error;
pub mod graph;
pub mod hash;
pub mod idgen;
pub mod model;
pub mod timefmt;

pub use error::DomainError;
