//! # Measurement Validation Module
//!
//! Clamps each parsed field into its physically valid range before the
//! record is fanned out. Out-of-range values are pulled to the nearest
//! bound and kept, not rejected: a glitched ADC read becomes a saturated
//! sample instead of a hole in the stream. The clamp is silent apart
//! from a debug log line.
//!
//! The range table is data-driven so new channels extend it without
//! touching parsing logic.

use crate::record::{SensorChannel, SensorRecord};
use std::time::{SystemTime, UNIX_EPOCH};

/// How a rule matches a field name.
#[derive(Debug, Clone, Copy)]
enum FieldMatch {
    Exact(&'static str),
    /// Matches any field ending in the suffix (raw `*_mV` channels)
    Suffix(&'static str),
}

/// One clamp rule: which fields it covers and their valid bounds.
#[derive(Debug, Clone, Copy)]
pub struct RangeRule {
    channel: Option<SensorChannel>,
    field: FieldMatch,
    lo: f64,
    hi: f64,
}

impl RangeRule {
    pub const fn exact(channel: SensorChannel, field: &'static str, lo: f64, hi: f64) -> Self {
        Self {
            channel: Some(channel),
            field: FieldMatch::Exact(field),
            lo,
            hi,
        }
    }

    /// Rule for a field-name suffix on any channel.
    pub const fn suffix(suffix: &'static str, lo: f64, hi: f64) -> Self {
        Self {
            channel: None,
            field: FieldMatch::Suffix(suffix),
            lo,
            hi,
        }
    }

    fn matches(&self, channel: SensorChannel, field: &str) -> bool {
        if let Some(c) = self.channel {
            if c != channel {
                return false;
            }
        }
        match self.field {
            FieldMatch::Exact(name) => field == name,
            FieldMatch::Suffix(suffix) => field.ends_with(suffix),
        }
    }
}

/// Physically valid bounds per field, from the sensor module's datasheets.
const DEFAULT_RULES: &[RangeRule] = &[
    RangeRule::exact(SensorChannel::Pulse, "pulse_BPM", 0.0, 180.0),
    RangeRule::exact(SensorChannel::Respiration, "BRPM", 0.0, 45.0),
    RangeRule::exact(SensorChannel::BodyTemp, "Celsius", 10.0, 45.0),
    RangeRule::exact(SensorChannel::Accelerometer, "s_rate", 0.0, 205.0),
    RangeRule::exact(SensorChannel::Gyroscope, "r_rate", 0.0, 210.0),
    RangeRule::exact(SensorChannel::BloodOxygen, "SpO2_pct", 0.0, 100.0),
    // Raw ADC readings on any channel are bounded by the 3.3V rail
    RangeRule::suffix("_mV", 0.0, 3300.0),
];

/// The clamp table. First matching rule wins; fields with no rule pass
/// through unchanged.
pub struct RangeTable {
    rules: Vec<RangeRule>,
}

impl Default for RangeTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl RangeTable {
    /// Extend the table with an additional rule (checked before defaults).
    #[allow(dead_code)]
    pub fn with_rule(mut self, rule: RangeRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Declared bounds for a field, if any.
    pub fn bounds(&self, channel: SensorChannel, field: &str) -> Option<(f64, f64)> {
        self.rules
            .iter()
            .find(|r| r.matches(channel, field))
            .map(|r| (r.lo, r.hi))
    }

    /// Snap a value into its declared range; idempotent by construction.
    pub fn clamp(&self, channel: SensorChannel, field: &str, value: f64) -> f64 {
        match self.bounds(channel, field) {
            Some((lo, hi)) => value.clamp(lo, hi),
            None => value,
        }
    }
}

/// A sensor record whose every field has passed the clamp table, plus
/// the capture timestamp assigned when it entered the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    record: SensorRecord,
    timestamp_ns: u64,
}

impl ValidatedRecord {
    pub fn record(&self) -> &SensorRecord {
        &self.record
    }

    /// Capture time, nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }
}

/// Applies the clamp table and stamps records as they pass through.
pub struct Validator {
    table: RangeTable,
}

impl Validator {
    pub fn new(table: RangeTable) -> Self {
        Self { table }
    }

    pub fn validate(&self, mut record: SensorRecord) -> ValidatedRecord {
        let timestamp_ns = now_ns();
        for (channel, fields) in record.fields_mut() {
            for (field, value) in fields.iter_mut() {
                let clamped = self.table.clamp(channel, field, *value);
                if clamped != *value {
                    log::debug!(
                        "Clamped {}.{} from {} to {}",
                        channel.wire_name(),
                        field,
                        value,
                        clamped
                    );
                    *value = clamped;
                }
            }
        }
        ValidatedRecord {
            record,
            timestamp_ns,
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_pulls_to_nearest_bound() {
        let table = RangeTable::default();
        assert_eq!(table.clamp(SensorChannel::Pulse, "pulse_BPM", 500.0), 180.0);
        assert_eq!(table.clamp(SensorChannel::Pulse, "pulse_BPM", -5.0), 0.0);
        assert_eq!(table.clamp(SensorChannel::Pulse, "pulse_BPM", 72.0), 72.0);
    }

    #[test]
    fn test_clamp_is_idempotent_and_in_bounds() {
        let table = RangeTable::default();
        let inputs = [-1e9, -1.0, 0.0, 17.3, 180.0, 181.0, 1e12];
        for v in inputs {
            let once = table.clamp(SensorChannel::Pulse, "pulse_BPM", v);
            let twice = table.clamp(SensorChannel::Pulse, "pulse_BPM", once);
            assert_eq!(once, twice);
            assert!((0.0..=180.0).contains(&once));
        }
    }

    #[test]
    fn test_undeclared_field_passes_through() {
        let table = RangeTable::default();
        assert_eq!(
            table.clamp(SensorChannel::Accelerometer, "X_g", -27.5),
            -27.5
        );
        assert_eq!(table.bounds(SensorChannel::Pressure, "hPa"), None);
    }

    #[test]
    fn test_mv_suffix_applies_to_any_channel() {
        let table = RangeTable::default();
        assert_eq!(table.clamp(SensorChannel::Pulse, "pulse_mV", 5000.0), 3300.0);
        assert_eq!(
            table.clamp(SensorChannel::Respiration, "resp_mV", -10.0),
            0.0
        );
    }

    #[test]
    fn test_extension_rule_takes_precedence() {
        let table = RangeTable::default().with_rule(RangeRule::exact(
            SensorChannel::Pulse,
            "pulse_BPM",
            30.0,
            120.0,
        ));
        assert_eq!(table.clamp(SensorChannel::Pulse, "pulse_BPM", 150.0), 120.0);
    }

    #[test]
    fn test_validator_clamps_record_in_place() {
        let mut record = SensorRecord::new();
        record.insert(SensorChannel::Pulse, "pulse_BPM", 500.0);
        record.insert(SensorChannel::BodyTemp, "Celsius", 5.0);
        record.insert(SensorChannel::Pressure, "hPa", 1013.2);

        let validated = Validator::new(RangeTable::default()).validate(record);
        let r = validated.record();
        assert_eq!(r.get(SensorChannel::Pulse, "pulse_BPM"), Some(180.0));
        assert_eq!(r.get(SensorChannel::BodyTemp, "Celsius"), Some(10.0));
        assert_eq!(r.get(SensorChannel::Pressure, "hPa"), Some(1013.2));
        assert!(validated.timestamp_ns() > 0);
    }
}
