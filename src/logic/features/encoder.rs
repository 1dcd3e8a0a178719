//! Feature Encoding Pipeline
//!
//! Raw batch → `n × FEATURE_COUNT` matrix in layout order. Categorical
//! fields go through their vocabularies (never fails); numeric fields are
//! coerced and any record with a missing number is dropped before scoring.

use ndarray::Array2;

use super::layout::{DST_IP, FEATURE_COUNT, PACKET_SIZE, PROTOCOL, SRC_IP, TIME_INTERVAL};
use super::record::{PacketRecord, RawRecord};
use super::vocabulary::EncodingVocabulary;
use crate::logic::error::CoercionError;

/// Rows that survived coercion, with the raw records in the same order
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub features: Array2<f32>,
    pub records: Vec<RawRecord>,
    pub dropped: usize,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read-only encoder over the trained vocabularies
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    src_ip: EncodingVocabulary,
    dst_ip: EncodingVocabulary,
}

impl FeatureEncoder {
    pub fn new(src_ip: EncodingVocabulary, dst_ip: EncodingVocabulary) -> Self {
        Self { src_ip, dst_ip }
    }

    pub fn src_vocabulary(&self) -> &EncodingVocabulary {
        &self.src_ip
    }

    pub fn dst_vocabulary(&self) -> &EncodingVocabulary {
        &self.dst_ip
    }

    /// Encode one coerced record
    pub fn encode_packet(&self, packet: &PacketRecord) -> [f32; FEATURE_COUNT] {
        let mut row = [0.0f32; FEATURE_COUNT];
        row[PACKET_SIZE] = packet.packet_size as f32;
        row[PROTOCOL] = packet.protocol as f32;
        row[SRC_IP] = self.src_ip.lookup(&packet.src_ip) as f32;
        row[DST_IP] = self.dst_ip.lookup(&packet.dst_ip) as f32;
        row[TIME_INTERVAL] = packet.time_interval as f32;
        row
    }

    /// Encode one raw record
    pub fn encode_record(&self, raw: &RawRecord) -> Result<[f32; FEATURE_COUNT], CoercionError> {
        PacketRecord::try_from(raw).map(|packet| self.encode_packet(&packet))
    }

    /// Encode a whole batch, dropping rows that fail coercion
    pub fn encode_batch(&self, batch: Vec<RawRecord>) -> EncodedBatch {
        let mut data = Vec::with_capacity(batch.len() * FEATURE_COUNT);
        let mut records = Vec::with_capacity(batch.len());
        let mut dropped = 0;

        for raw in batch {
            match self.encode_record(&raw) {
                Ok(row) => {
                    data.extend_from_slice(&row);
                    records.push(raw);
                }
                Err(e) => {
                    log::warn!("Dropping record {} before scoring: {}", raw, e);
                    dropped += 1;
                }
            }
        }

        let features = Array2::from_shape_vec((records.len(), FEATURE_COUNT), data)
            .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COUNT)));

        EncodedBatch {
            features,
            records,
            dropped,
        }
    }
}
