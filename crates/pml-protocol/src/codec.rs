// SPDX-License-Identifier: MIT OR Apache-2.0
//! Streaming JSONL batch encoder/decoder and validation utilities.

use crate::{Envelope, JsonlCodec, ProtocolError};

/// Streaming JSONL encoder/decoder for batch operations over a worker's
/// stdio pipe.
#[derive(Debug, Clone, Copy)]
pub struct StreamingCodec;

impl StreamingCodec {
    /// Encode multiple envelopes into a single JSONL string.
    #[must_use]
    pub fn encode_batch(envelopes: &[Envelope]) -> String {
        let mut out = String::new();
        for env in envelopes {
            if let Ok(line) = JsonlCodec::encode(env) {
                out.push_str(&line);
            }
        }
        out
    }

    /// Decode a JSONL string into a vec of results, one per non-blank line.
    pub fn decode_batch(input: &str) -> Vec<Result<Envelope, ProtocolError>> {
        input.lines().filter(|l| !l.trim().is_empty()).map(|l| JsonlCodec::decode(l.trim())).collect()
    }

    /// Count the number of non-blank lines in a JSONL string.
    #[must_use]
    pub fn line_count(input: &str) -> usize {
        input.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Validate each non-blank line, returning `(line_number, error)`
    /// pairs (1-based) for lines that fail to parse.
    pub fn validate_jsonl(input: &str) -> Vec<(usize, ProtocolError)> {
        input.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()).filter_map(|(idx, l)| JsonlCodec::decode(l.trim()).err().map(|e| (idx + 1, e))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_envelopes() -> Vec<Envelope> {
        vec![Envelope::Fatal { error: "err1".into() }, Envelope::Fatal { error: "err2".into() }, Envelope::Final { node_id: "a".into(), outcome: Ok(serde_json::json!(null)) }]
    }

    #[test]
    fn encode_batch_produces_one_line_per_envelope() {
        let batch = StreamingCodec::encode_batch(&sample_envelopes());
        assert_eq!(StreamingCodec::line_count(&batch), 3);
    }

    #[test]
    fn decode_batch_recovers_all_envelopes() {
        let batch = StreamingCodec::encode_batch(&sample_envelopes());
        let decoded = StreamingCodec::decode_batch(&batch);
        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().all(Result::is_ok));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let batch = format!("\n{}\n\n", JsonlCodec::encode(&Envelope::Fatal { error: "x".into() }).unwrap());
        assert_eq!(StreamingCodec::line_count(&batch), 1);
    }

    #[test]
    fn validate_jsonl_flags_bad_lines_with_one_based_numbers() {
        let good = JsonlCodec::encode(&Envelope::Run { trace_id: Uuid::new_v4(), node_id: "a".into(), arguments: serde_json::json!({}) }).unwrap();
        let input = format!("{good}not json\n");
        let errors = StreamingCodec::validate_jsonl(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 2);
    }
}
