//! # Fan-out Routing Module
//!
//! Delivers each validated record, unchanged, to the three sinks in a
//! fixed order: live charts, then the batch uploader, then the feature
//! aggregator. Delivery is synchronous and unretried at this layer; each
//! sink owns its failure handling, and none of them can see a mutated
//! record because routing only ever hands out shared references.

use crate::charts::LiveCharts;
use crate::features::FeatureAggregator;
use crate::uploader::BatchUploader;
use crate::validate::ValidatedRecord;

/// Owns the sinks and fans validated records out to them.
pub struct FanoutRouter {
    charts: LiveCharts,
    uploader: BatchUploader,
    features: FeatureAggregator,
}

impl FanoutRouter {
    pub fn new(charts: LiveCharts, uploader: BatchUploader, features: FeatureAggregator) -> Self {
        Self {
            charts,
            uploader,
            features,
        }
    }

    /// Deliver one record to every sink, in the fixed order.
    pub fn route(&mut self, record: &ValidatedRecord) {
        self.charts.append(record);
        self.uploader.push(record);
        self.features.push(record);
    }

    /// The uploader, for flush ticks and upload toggling.
    pub fn uploader_mut(&mut self) -> &mut BatchUploader {
        &mut self.uploader
    }

    /// The aggregator, for classification ticks.
    pub fn features_mut(&mut self) -> &mut FeatureAggregator {
        &mut self.features
    }

    pub fn features(&self) -> &FeatureAggregator {
        &self.features
    }

    pub fn uploader(&self) -> &BatchUploader {
        &self.uploader
    }

    /// Reset all sink state for a fresh session.
    pub fn reset(&mut self) {
        self.charts.clear();
        self.uploader.reset();
        self.features.reset();
    }
}
