// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! JSONL wire format spoken between the Controlled DAG Executor and a
//! zero-permission sandbox worker over the worker's stdio pipe.
//!
//! The worker never calls a tool directly: every tool invocation is
//! proxied back to the host as an `rpc_call`, answered with an
//! `rpc_result`, and every span the worker opens is mirrored to the
//! host as a `trace` message so the host's [`pml-core`
//! trace tree](../pml_core/trace/index.html) stays authoritative.

pub mod codec;
pub mod router;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// JSONL message envelope exchanged between executor and worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Envelope {
    /// Worker announcement sent as the first message after spawn.
    Hello {
        /// Protocol version the worker speaks.
        contract_version: u32,
        /// Process id of the worker, for host-side bookkeeping.
        pid: u32,
    },

    /// Host request telling the worker to begin executing one node.
    Run {
        /// Trace id for the span this run corresponds to.
        trace_id: Uuid,
        /// The node id (from the capability's static structure) to run.
        node_id: String,
        /// Resolved, ready-to-use arguments for the node's tool call.
        arguments: serde_json::Value,
    },

    /// Worker request to have the host proxy a tool call it cannot make
    /// directly (the worker process itself holds zero permissions).
    RpcCall {
        /// Correlates this call with its eventual `rpc_result`.
        call_id: Uuid,
        /// `server:action` tool identifier.
        tool_id: String,
        /// Arguments to pass to the tool.
        arguments: serde_json::Value,
    },

    /// Host response to an [`Envelope::RpcCall`].
    RpcResult {
        /// The `call_id` this result answers.
        call_id: Uuid,
        /// `Ok(value)` on success, `Err(message)` on tool failure.
        outcome: Result<serde_json::Value, String>,
    },

    /// A trace span lifecycle event mirrored from the worker to the host.
    Trace {
        /// The span this event concerns.
        trace_id: Uuid,
        /// The enclosing span, if any.
        parent_trace_id: Option<Uuid>,
        /// `"start"` or `"finish"`.
        event: String,
        /// Event-specific payload (arguments on start, result on finish).
        payload: serde_json::Value,
    },

    /// Worker reports that a node finished, successfully or not.
    Final {
        /// The node id this result is for.
        node_id: String,
        /// `Ok(value)` on success, `Err(message)` on failure.
        outcome: Result<serde_json::Value, String>,
    },

    /// Unrecoverable worker-side error; the host should treat this as
    /// `WORKER_PANIC` and tear the worker process down.
    Fatal {
        /// Human-readable error description.
        error: String,
    },
}

/// Errors arising from encoding, decoding, or protocol-level violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received a message type that was not expected at this point.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// The envelope type that was expected.
        expected: String,
        /// The envelope type that was actually received.
        got: String,
    },
}

/// Stateless codec for encoding/decoding [`Envelope`] messages as
/// newline-delimited JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize an [`Envelope`] to a newline-terminated JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the envelope cannot be serialized.
    pub fn encode(msg: &Envelope) -> Result<String, ProtocolError> {
        let mut s = serde_json::to_string(msg)?;
        s.push('\n');
        Ok(s)
    }

    /// Deserialize a single JSON line into an [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the line is not valid JSON or
    /// does not match any [`Envelope`] variant.
    pub fn decode(line: &str) -> Result<Envelope, ProtocolError> {
        Ok(serde_json::from_str::<Envelope>(line)?)
    }
}

/// The envelope's wire-level type tag (matches the `t` field).
#[must_use]
pub fn envelope_type(env: &Envelope) -> &'static str {
    match env {
        Envelope::Hello { .. } => "hello",
        Envelope::Run { .. } => "run",
        Envelope::RpcCall { .. } => "rpc_call",
        Envelope::RpcResult { .. } => "rpc_result",
        Envelope::Trace { .. } => "trace",
        Envelope::Final { .. } => "final",
        Envelope::Fatal { .. } => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_trailing_newline() {
        let env = Envelope::Fatal { error: "boom".into() };
        let line = JsonlCodec::encode(&env).unwrap();
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn rpc_call_roundtrips() {
        let env = Envelope::RpcCall { call_id: Uuid::new_v4(), tool_id: "fs:read".into(), arguments: serde_json::json!({"path": "a"}) };
        let line = JsonlCodec::encode(&env).unwrap();
        let decoded = JsonlCodec::decode(line.trim()).unwrap();
        assert_eq!(envelope_type(&decoded), "rpc_call");
    }

    #[test]
    fn rpc_result_carries_error_outcome() {
        let env = Envelope::RpcResult { call_id: Uuid::new_v4(), outcome: Err("denied".into()) };
        let line = JsonlCodec::encode(&env).unwrap();
        let decoded: Envelope = JsonlCodec::decode(line.trim()).unwrap();
        match decoded {
            Envelope::RpcResult { outcome, .. } => assert_eq!(outcome, Err("denied".to_string())),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(JsonlCodec::decode("not json").is_err());
    }

    #[test]
    fn envelope_type_covers_all_variants() {
        let samples = vec![
            Envelope::Hello { contract_version: 1, pid: 1 },
            Envelope::Run { trace_id: Uuid::new_v4(), node_id: "a".into(), arguments: serde_json::json!({}) },
            Envelope::Trace { trace_id: Uuid::new_v4(), parent_trace_id: None, event: "start".into(), payload: serde_json::json!({}) },
            Envelope::Final { node_id: "a".into(), outcome: Ok(serde_json::json!(null)) },
        ];
        for env in samples {
            assert!(!envelope_type(&env).is_empty());
        }
    }
}
