//! # Feature Aggregation Module
//!
//! Maintains short sliding windows over the classification-relevant
//! measurements and, on a slow timer tick, turns them into the feature
//! vector the activity classifier expects.
//!
//! ## Feature Vector Contract
//! The classifier collaborator was trained on a fixed channel order:
//! `[avg_bpm, avg_resp, body_temp, step_rate, rotation_rate]`. The
//! aggregator is responsible for producing exactly that order; changing
//! it silently breaks every downstream model.
//!
//! ## Empty-Window Guard
//! Until every required channel has produced at least one sample, ticks
//! skip prediction entirely rather than feeding the model a mean of an
//! empty set.

use crate::record::SensorChannel;
use crate::ring::RingBuffer;
use crate::validate::ValidatedRecord;

/// One slot of the feature vector: where its samples come from.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub channel: SensorChannel,
    pub field: &'static str,
}

/// The pre-agreed feature order. Index in this table == index in the
/// vector handed to the classifier.
pub const FEATURE_ORDER: &[FeatureSpec] = &[
    FeatureSpec {
        name: "avg_bpm",
        channel: SensorChannel::Pulse,
        field: "pulse_BPM",
    },
    FeatureSpec {
        name: "avg_resp",
        channel: SensorChannel::Respiration,
        field: "BRPM",
    },
    FeatureSpec {
        name: "body_temp",
        channel: SensorChannel::BodyTemp,
        field: "Celsius",
    },
    FeatureSpec {
        name: "step_rate",
        channel: SensorChannel::Accelerometer,
        field: "s_rate",
    },
    FeatureSpec {
        name: "rotation_rate",
        channel: SensorChannel::Gyroscope,
        field: "r_rate",
    },
];

/// Classifier output handed back to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// External classifier collaborator.
///
/// `features` always follows `FEATURE_ORDER`. Failures come back as
/// values; the aggregator logs them and keeps going.
pub trait ActivityClassifier: Send {
    fn predict(&self, features: &[f64]) -> Result<Prediction, String>;
}

/// Coarse threshold baseline used when no trained model is wired in.
///
/// Labels come from the activity roster the data-collection UI offers.
pub struct HeuristicClassifier;

impl ActivityClassifier for HeuristicClassifier {
    fn predict(&self, features: &[f64]) -> Result<Prediction, String> {
        if features.len() != FEATURE_ORDER.len() {
            return Err(format!(
                "expected {} features, got {}",
                FEATURE_ORDER.len(),
                features.len()
            ));
        }
        let avg_bpm = features[0];
        let step_rate = features[3];

        let (label, confidence) = if step_rate >= 130.0 {
            ("Skipping", 0.6)
        } else if step_rate >= 60.0 {
            ("Walking", 0.7)
        } else if avg_bpm >= 100.0 {
            ("Lifting", 0.55)
        } else {
            ("Idle", 0.8)
        };
        Ok(Prediction {
            label: label.to_string(),
            confidence,
        })
    }
}

/// Sliding-window mean aggregator feeding the classifier on a cadence.
pub struct FeatureAggregator {
    windows: Vec<RingBuffer<f64>>,
    classifier: Box<dyn ActivityClassifier>,
    latest: Option<Prediction>,
}

impl FeatureAggregator {
    pub fn new(classifier: Box<dyn ActivityClassifier>, window: usize) -> Self {
        Self {
            windows: FEATURE_ORDER
                .iter()
                .map(|_| RingBuffer::new(window.max(1)))
                .collect(),
            classifier,
            latest: None,
        }
    }

    /// Feed any classification-relevant fields of a record into their
    /// windows. Records without relevant fields are ignored.
    pub fn push(&mut self, record: &ValidatedRecord) {
        for (i, spec) in FEATURE_ORDER.iter().enumerate() {
            if let Some(value) = record.record().get(spec.channel, spec.field) {
                self.windows[i].push(value);
            }
        }
    }

    /// Timer tick: compute means and classify, unless a window is empty.
    pub fn tick(&mut self) -> Option<Prediction> {
        let mut features = Vec::with_capacity(FEATURE_ORDER.len());
        for (i, spec) in FEATURE_ORDER.iter().enumerate() {
            let window = &self.windows[i];
            if window.is_empty() {
                log::debug!("Skipping classification: no samples for {}", spec.name);
                return None;
            }
            let sum: f64 = window.iter().sum();
            features.push(sum / window.len() as f64);
        }

        match self.classifier.predict(&features) {
            Ok(prediction) => {
                log::debug!(
                    "Activity: {} ({:.0}%)",
                    prediction.label,
                    prediction.confidence * 100.0
                );
                self.latest = Some(prediction.clone());
                Some(prediction)
            }
            Err(e) => {
                log::error!("Classifier failed: {}", e);
                None
            }
        }
    }

    /// Most recent successful prediction, if any.
    #[allow(dead_code)]
    pub fn latest(&self) -> Option<&Prediction> {
        self.latest.as_ref()
    }

    /// Drop windowed samples and the last prediction on session restart.
    pub fn reset(&mut self) {
        for window in &mut self.windows {
            window.clear();
        }
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SensorRecord;
    use crate::validate::{RangeTable, Validator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        last_features: Arc<std::sync::Mutex<Vec<f64>>>,
    }

    impl ActivityClassifier for CountingClassifier {
        fn predict(&self, features: &[f64]) -> Result<Prediction, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_features.lock().unwrap() = features.to_vec();
            Ok(Prediction {
                label: "Test".to_string(),
                confidence: 1.0,
            })
        }
    }

    fn counting_aggregator(window: usize) -> (FeatureAggregator, Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<f64>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let features = Arc::new(std::sync::Mutex::new(Vec::new()));
        let aggregator = FeatureAggregator::new(
            Box::new(CountingClassifier {
                calls: calls.clone(),
                last_features: features.clone(),
            }),
            window,
        );
        (aggregator, calls, features)
    }

    fn full_record(bpm: f64, brpm: f64, temp: f64, steps: f64, rot: f64) -> ValidatedRecord {
        let mut record = SensorRecord::new();
        record.insert(SensorChannel::Pulse, "pulse_BPM", bpm);
        record.insert(SensorChannel::Respiration, "BRPM", brpm);
        record.insert(SensorChannel::BodyTemp, "Celsius", temp);
        record.insert(SensorChannel::Accelerometer, "s_rate", steps);
        record.insert(SensorChannel::Gyroscope, "r_rate", rot);
        Validator::new(RangeTable::default()).validate(record)
    }

    #[test]
    fn test_no_prediction_while_any_window_empty() {
        let (mut aggregator, calls, _) = counting_aggregator(4);

        // Nothing seen yet
        assert!(aggregator.tick().is_none());

        // Four of five channels present: still guarded
        let mut record = SensorRecord::new();
        record.insert(SensorChannel::Pulse, "pulse_BPM", 70.0);
        record.insert(SensorChannel::Respiration, "BRPM", 15.0);
        record.insert(SensorChannel::BodyTemp, "Celsius", 36.5);
        record.insert(SensorChannel::Accelerometer, "s_rate", 10.0);
        aggregator.push(&Validator::new(RangeTable::default()).validate(record));
        assert!(aggregator.tick().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Final channel arrives: prediction fires
        aggregator.push(&full_record(70.0, 15.0, 36.5, 10.0, 3.0));
        assert!(aggregator.tick().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_means_follow_feature_order() {
        let (mut aggregator, _, features) = counting_aggregator(8);
        aggregator.push(&full_record(60.0, 12.0, 36.0, 0.0, 0.0));
        aggregator.push(&full_record(80.0, 18.0, 37.0, 20.0, 10.0));

        aggregator.tick().unwrap();
        let f = features.lock().unwrap().clone();
        assert_eq!(f, vec![70.0, 15.0, 36.5, 10.0, 5.0]);
    }

    #[test]
    fn test_window_slides() {
        let (mut aggregator, _, features) = counting_aggregator(2);
        for bpm in [60.0, 70.0, 90.0] {
            aggregator.push(&full_record(bpm, 15.0, 36.5, 0.0, 0.0));
        }
        aggregator.tick().unwrap();
        // Window of 2 keeps only the last two pulse samples
        assert_eq!(features.lock().unwrap()[0], 80.0);
    }

    #[test]
    fn test_reset_clears_windows_and_latest() {
        let (mut aggregator, calls, _) = counting_aggregator(4);
        aggregator.push(&full_record(70.0, 15.0, 36.5, 10.0, 3.0));
        aggregator.tick().unwrap();
        assert!(aggregator.latest().is_some());

        aggregator.reset();
        assert!(aggregator.latest().is_none());
        assert!(aggregator.tick().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heuristic_labels() {
        let classifier = HeuristicClassifier;
        let idle = classifier.predict(&[65.0, 14.0, 36.5, 2.0, 1.0]).unwrap();
        assert_eq!(idle.label, "Idle");
        let walking = classifier.predict(&[90.0, 20.0, 36.8, 95.0, 40.0]).unwrap();
        assert_eq!(walking.label, "Walking");
        let skipping = classifier.predict(&[120.0, 28.0, 37.0, 160.0, 80.0]).unwrap();
        assert_eq!(skipping.label, "Skipping");
        let lifting = classifier.predict(&[120.0, 25.0, 37.0, 5.0, 2.0]).unwrap();
        assert_eq!(lifting.label, "Lifting");
        assert!(classifier.predict(&[1.0, 2.0]).is_err());
    }
}
