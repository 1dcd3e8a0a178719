//! Dataset Module - persisted traffic stores
//!
//! Collected raw traffic, detected anomalies and (optionally) normal
//! traffic, each an append-only delimited file behind a single writer.

pub mod router;
pub mod writer;

#[cfg(test)]
mod tests;

pub use router::{spawn, RouterHandle, Stores};
