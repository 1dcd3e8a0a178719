//! Integration tests: validator → batch assembler → encoder

use crate::logic::features::{EncodingVocabulary, FeatureEncoder, RawRecord, FEATURE_COUNT};
use crate::logic::model::BatchAssembler;

const VALID_LINE: &str = "1200,6,192.168.0.1,10.0.0.1,0.005";

/// Feed lines through validation and batching, collecting flushed batches
fn assemble(lines: &[&str], batch_size: usize) -> (Vec<Vec<RawRecord>>, usize, usize) {
    let mut assembler = BatchAssembler::new(batch_size);
    let mut flushed = Vec::new();
    let mut malformed = 0;

    for line in lines {
        match RawRecord::parse_line(line) {
            Some(record) => {
                if let Some(batch) = assembler.push(record) {
                    flushed.push(batch);
                }
            }
            None => malformed += 1,
        }
    }

    (flushed, malformed, assembler.len())
}

#[test]
fn test_ten_valid_lines_flush_once() {
    let lines = vec![VALID_LINE; 10];
    let (flushed, malformed, pending) = assemble(&lines, 10);

    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].len(), 10);
    assert_eq!(malformed, 0);
    assert_eq!(pending, 0);
    assert!(flushed[0].iter().all(|r| r.to_row() == VALID_LINE));
}

#[test]
fn test_malformed_line_does_not_count_toward_batch() {
    let mut lines = vec!["1200,6"];
    lines.extend(std::iter::repeat(VALID_LINE).take(10));
    let (flushed, malformed, pending) = assemble(&lines, 10);

    assert_eq!(malformed, 1);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].len(), 10);
    assert_eq!(pending, 0);
}

#[test]
fn test_malformed_lines_interleaved() {
    let lines = [
        VALID_LINE,
        "garbage",
        VALID_LINE,
        "1,2,3,4,5,6",
        VALID_LINE,
    ];
    let (flushed, malformed, pending) = assemble(&lines, 2);

    assert_eq!(malformed, 2);
    assert_eq!(flushed.len(), 1);
    assert_eq!(pending, 1);
}

#[test]
fn test_flushed_batch_encodes_to_matrix() {
    let encoder = FeatureEncoder::new(
        EncodingVocabulary::fit("src_ip", ["192.168.0.1"]),
        EncodingVocabulary::fit("dst_ip", ["10.0.0.1"]),
    );

    let mut lines = vec![VALID_LINE; 9];
    lines.push("1200,6,203.0.113.5,10.0.0.1,0.005");
    let (mut flushed, _, _) = assemble(&lines, 10);
    let batch = flushed.remove(0);

    let encoded = encoder.encode_batch(batch);
    assert_eq!(encoded.features.shape(), &[10, FEATURE_COUNT]);
    assert_eq!(encoded.features[[0, 2]], 0.0);
    assert_eq!(
        encoded.features[[9, 2]],
        encoder.src_vocabulary().unknown_index() as f32
    );
    // Original values kept alongside the encoded row
    assert_eq!(encoded.records[9].src_ip, "203.0.113.5");
}
