// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Trace sink: redaction plus file-backed persistence of per-run
//! [`TraceTree`]s, serving the `history`/`whois` read paths.

pub mod redact;

use pml_core::TraceTree;
use redact::Redactor;
use std::path::PathBuf;
use uuid::Uuid;

/// Errors persisting or loading a trace tree.
#[derive(Debug, thiserror::Error)]
pub enum TraceStoreError {
    /// No trace tree exists for the given run id.
    #[error("no trace recorded for run `{0}`")]
    NotFound(Uuid),
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Underlying JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A file-backed store of per-run trace trees, one JSON file per
/// `run_id`, with redaction applied before every write.
pub struct TraceStore {
    root: PathBuf,
    redactor: Redactor,
}

impl TraceStore {
    /// Open (or create) a trace store rooted at `root`, redacting with
    /// `redactor` before every [`Self::save`].
    pub fn open(root: impl Into<PathBuf>, redactor: Redactor) -> Result<Self, TraceStoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, redactor })
    }

    fn trace_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }

    /// Redact and persist `trace` under `run_id`.
    pub fn save(&self, run_id: Uuid, trace: &TraceTree) -> Result<(), TraceStoreError> {
        let mut sanitized = trace.clone();
        for span in &mut sanitized.spans {
            span.arguments = self.redactor.redacted(&span.arguments);
            if let Some(result) = &span.result {
                span.result = Some(self.redactor.redacted(result));
            }
        }
        let json = serde_json::to_string_pretty(&sanitized)?;
        std::fs::write(self.trace_path(run_id), json)?;
        Ok(())
    }

    /// Load the (already-redacted) trace tree for `run_id`.
    pub fn load(&self, run_id: Uuid) -> Result<TraceTree, TraceStoreError> {
        let path = self.trace_path(run_id);
        if !path.exists() {
            return Err(TraceStoreError::NotFound(run_id));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// List all run ids with a stored trace.
    pub fn list(&self) -> Result<Vec<Uuid>, TraceStoreError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pml_core::{SpanKind, SpanStatus, TraceSpan};

    fn sample_trace() -> TraceTree {
        let root_id = Uuid::new_v4();
        TraceTree {
            spans: vec![TraceSpan::start(root_id, None, None, SpanKind::Workflow, chrono::Utc::now(), serde_json::json!({"apiKey": "sk-secret"}))],
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path(), Redactor::defaults()).unwrap();
        let run_id = Uuid::new_v4();
        let trace = sample_trace();
        store.save(run_id, &trace).unwrap();
        let loaded = store.load(run_id).unwrap();
        assert_eq!(loaded.spans.len(), 1);
    }

    #[test]
    fn save_redacts_sensitive_fields_before_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path(), Redactor::defaults()).unwrap();
        let run_id = Uuid::new_v4();
        store.save(run_id, &sample_trace()).unwrap();
        let loaded = store.load(run_id).unwrap();
        assert_eq!(loaded.spans[0].arguments["apiKey"], serde_json::json!("[REDACTED]"));
    }

    #[test]
    fn load_missing_run_errors_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path(), Redactor::defaults()).unwrap();
        let err = store.load(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, TraceStoreError::NotFound(_)));
    }

    #[test]
    fn list_returns_all_saved_run_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path(), Redactor::defaults()).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.save(a, &sample_trace()).unwrap();
        store.save(b, &sample_trace()).unwrap();
        let mut ids = store.list().unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
