//! Features Module - record validation and feature encoding
//!
//! Wire line → `RawRecord` → `PacketRecord` → encoded row, in the column
//! order fixed by `layout.rs`.

pub mod encoder;
pub mod layout;
pub mod record;
pub mod vocabulary;

#[cfg(test)]
mod tests;

// Re-export common types
pub use encoder::{EncodedBatch, FeatureEncoder};
pub use layout::FEATURE_COUNT;
pub use record::{PacketRecord, RawRecord};
pub use vocabulary::EncodingVocabulary;
