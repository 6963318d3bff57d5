//! # Live Chart Data Module
//!
//! Bounded most-recent-N storage backing the dashboard's charts. The
//! pipeline thread appends every validated record here; the presentation
//! layer pulls snapshots on its own schedule and never receives pushes.
//!
//! Writes and reads happen on different threads, so each access goes
//! through a reader/writer lock. Sample history per metric is bounded by
//! the configured ring capacity, so a long session cannot grow memory.

use crate::record::SensorChannel;
use crate::ring::{RingBuffer, Sample};
use crate::validate::ValidatedRecord;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type MetricKey = (SensorChannel, String);

struct ChartData {
    capacity: usize,
    series: HashMap<MetricKey, RingBuffer<Sample>>,
}

/// Shared handle to the per-metric ring buffers.
///
/// Clones refer to the same underlying data; the session keeps one for
/// the fan-out router and gives one to the presentation collaborator.
#[derive(Clone)]
pub struct LiveCharts {
    inner: Arc<RwLock<ChartData>>,
}

impl LiveCharts {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ChartData {
                capacity,
                series: HashMap::new(),
            })),
        }
    }

    /// Append every field of a validated record, all stamped with the
    /// record's capture instant.
    pub fn append(&self, record: &ValidatedRecord) {
        let time = record.timestamp_ns();
        let mut data = self.inner.write().unwrap();
        let capacity = data.capacity;
        for (channel, fields) in record.record().iter() {
            for (field, value) in fields {
                data.series
                    .entry((channel, field.clone()))
                    .or_insert_with(|| RingBuffer::new(capacity))
                    .push(Sample {
                        time,
                        value: *value,
                    });
            }
        }
    }

    /// Snapshot of one metric's samples, oldest first.
    pub fn samples(&self, channel: SensorChannel, field: &str) -> Vec<Sample> {
        let data = self.inner.read().unwrap();
        data.series
            .get(&(channel, field.to_string()))
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Most recent sample of one metric.
    #[allow(dead_code)]
    pub fn latest(&self, channel: SensorChannel, field: &str) -> Option<Sample> {
        let data = self.inner.read().unwrap();
        data.series
            .get(&(channel, field.to_string()))
            .and_then(|ring| ring.last().copied())
    }

    /// Metrics that have received at least one sample.
    #[allow(dead_code)]
    pub fn metrics(&self) -> Vec<MetricKey> {
        let data = self.inner.read().unwrap();
        let mut keys: Vec<MetricKey> = data.series.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop all samples; called when a session restarts.
    pub fn clear(&self) {
        let mut data = self.inner.write().unwrap();
        data.series.clear();
    }
}
