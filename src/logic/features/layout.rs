//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema shared by the serving path and
//! every model artifact.**
//!
//! ## Rules:
//! 1. Add feature → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove feature → increment FEATURE_VERSION
//!
//! A model trained against another layout is rejected at load time
//! through the layout hash.

use crc32fast::Hasher;

use crate::logic::error::ArtifactError;

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT
// ============================================================================

/// Feature names in exact order they appear in the wire record and in the
/// encoded vector
pub const FEATURE_LAYOUT: &[&str] = &[
    "packet_size",   // 0: numeric
    "protocol",      // 1: numeric (IP protocol number)
    "src_ip",        // 2: categorical (vocabulary index)
    "dst_ip",        // 3: categorical (vocabulary index)
    "time_interval", // 4: numeric (seconds since previous packet)
];

/// Total number of features. Must match FEATURE_LAYOUT.len()
pub const FEATURE_COUNT: usize = 5;

pub const PACKET_SIZE: usize = 0;
pub const PROTOCOL: usize = 1;
pub const SRC_IP: usize = 2;
pub const DST_IP: usize = 3;
pub const TIME_INTERVAL: usize = 4;

/// Columns that are min-max normalized before scoring
pub const NORMALIZED_COLUMNS: [usize; 2] = [PACKET_SIZE, TIME_INTERVAL];

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// Compute CRC32 hash of the feature layout
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);

    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

// ============================================================================
// LAYOUT VALIDATION
// ============================================================================

/// Validate that an artifact was produced against the current layout
pub fn validate_layout(incoming_version: u8, incoming_hash: u32) -> Result<(), ArtifactError> {
    let current_hash = layout_hash();

    if incoming_version != FEATURE_VERSION || incoming_hash != current_hash {
        return Err(ArtifactError::LayoutMismatch {
            expected_version: FEATURE_VERSION,
            expected_hash: current_hash,
            actual_version: incoming_version,
            actual_hash: incoming_hash,
        });
    }

    Ok(())
}
