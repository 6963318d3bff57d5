//! # Batch Upload Module
//!
//! Accumulates validated records as flat store documents and flushes
//! them to the persistent-store collaborator on a fixed timer tick.
//!
//! ## Delivery Policy
//! At-most-once, bounded memory: the pending batch is cleared on every
//! tick whether the flush succeeded, failed, or uploading is disabled.
//! A store outage therefore loses that tick's records rather than
//! growing an unbounded retry queue; the next tick starts fresh.
//! Upload errors are logged and reflected in the status indicator, never
//! fatal to the pipeline.
//!
//! ## Document Shape
//! One document per channel per record, matching what the dashboard's
//! training tooling expects: `sensor` tag, the numeric fields, plus
//! subject / activity / timestamp session metadata.

use crate::error::StoreError;
use crate::validate::ValidatedRecord;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// One flat key/value record as the store receives it.
pub type StoreDocument = BTreeMap<String, serde_json::Value>;

/// Persistent-store collaborator: a single bulk insert is the whole
/// contract. Failures come back as values, never panics.
pub trait RecordStore: Send {
    fn bulk_insert(&mut self, docs: &[StoreDocument]) -> Result<(), StoreError>;
}

/// Line-delimited JSON store backend.
///
/// Appends one JSON document per line, which downstream tooling ingests
/// the same way it ingested the original document database exports.
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordStore for JsonlStore {
    fn bulk_insert(&mut self, docs: &[StoreDocument]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StoreError::Io)?;

        for doc in docs {
            let line = serde_json::to_string(doc).map_err(|e| StoreError::Serialize(e.to_string()))?;
            writeln!(file, "{}", line).map_err(StoreError::Io)?;
        }
        Ok(())
    }
}

/// Session metadata stamped onto every uploaded document.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub subject: String,
    pub activity: String,
}

/// Upload indicator state for the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct UploadStatus {
    pub enabled: bool,
    /// Outcome of the most recent flush that actually wrote (None until then)
    pub last_flush_ok: Option<bool>,
    pub uploaded_docs: usize,
    /// Successful document counts per activity label
    pub activity_counts: HashMap<String, usize>,
}

/// Accumulates store documents and flushes them on the session's timer.
pub struct BatchUploader {
    store: Box<dyn RecordStore>,
    meta: SessionMeta,
    batch: Vec<StoreDocument>,
    enabled: bool,
    status: UploadStatus,
}

impl BatchUploader {
    pub fn new(store: Box<dyn RecordStore>, meta: SessionMeta, enabled: bool) -> Self {
        Self {
            store,
            meta,
            batch: Vec::new(),
            enabled,
            status: UploadStatus {
                enabled,
                ..UploadStatus::default()
            },
        }
    }

    /// Append a record to the pending batch as flat documents.
    pub fn push(&mut self, record: &ValidatedRecord) {
        let timestamp = timestamp_rfc3339(record.timestamp_ns());
        for (channel, fields) in record.record().iter() {
            let mut doc = StoreDocument::new();
            doc.insert(
                "sensor".to_string(),
                serde_json::Value::from(channel.wire_name()),
            );
            for (field, value) in fields {
                doc.insert(field.clone(), serde_json::json!(value));
            }
            doc.insert(
                "subject".to_string(),
                serde_json::Value::from(self.meta.subject.as_str()),
            );
            doc.insert(
                "activity_id".to_string(),
                serde_json::Value::from(self.meta.activity.as_str()),
            );
            doc.insert(
                "timestamp".to_string(),
                serde_json::Value::from(timestamp.as_str()),
            );
            self.batch.push(doc);
        }
    }

    /// Timer tick: attempt the flush and clear the batch regardless.
    pub fn flush(&mut self) {
        let batch = std::mem::take(&mut self.batch);

        if !self.enabled {
            if !batch.is_empty() {
                log::debug!("Upload disabled; discarding {} pending documents", batch.len());
            }
            return;
        }
        if batch.is_empty() {
            return;
        }

        match self.store.bulk_insert(&batch) {
            Ok(()) => {
                log::debug!("Flushed {} documents", batch.len());
                self.status.last_flush_ok = Some(true);
                self.status.uploaded_docs += batch.len();
                *self
                    .status
                    .activity_counts
                    .entry(self.meta.activity.clone())
                    .or_insert(0) += batch.len();
            }
            Err(e) => {
                // At-most-once: the documents are already gone
                log::error!("Upload flush failed, {} documents lost: {}", batch.len(), e);
                self.status.last_flush_ok = Some(false);
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            log::info!("Upload {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
        self.status.enabled = enabled;
    }

    /// Change the activity label stamped onto subsequent documents.
    pub fn set_activity(&mut self, activity: String) {
        self.meta.activity = activity;
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn status(&self) -> UploadStatus {
        self.status.clone()
    }

    /// Drop pending documents and statistics on session restart.
    pub fn reset(&mut self) {
        self.batch.clear();
        self.status = UploadStatus {
            enabled: self.enabled,
            ..UploadStatus::default()
        };
    }
}

fn timestamp_rfc3339(timestamp_ns: u64) -> String {
    let secs = (timestamp_ns / 1_000_000_000) as i64;
    let nanos = (timestamp_ns % 1_000_000_000) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| timestamp_ns.to_string())
}
