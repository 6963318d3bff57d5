//! # Sensor Record Module
//!
//! Turns the wire records extracted by the frame decoder into structured
//! measurement sets. The sensor module sends loosely-shaped JSON (or CSV
//! lines on older firmware), so parsing is two-phase: a strict pass
//! first, then a lenient recovery pass that tolerates the malformations
//! the firmware's hand-rolled formatter produces (single quotes,
//! trailing commas) before the record is dropped for good.
//!
//! ## Key Types
//! - `SensorChannel`: closed set of known measurement streams
//! - `SensorRecord`: known channels mapped to named numeric fields for one capture instant
//! - `RecordParser`: strategy-selected parser, one per session
//!
//! ## Failure Policy
//! A record that fails both passes is dropped with a logged reason.
//! Unknown channel names and non-numeric fields are skipped, not fatal.
//! Parsing never leaves partial state behind on failure.

use crate::error::ParseError;
use std::collections::BTreeMap;

/// A named physiological or motion measurement stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorChannel {
    Pulse,
    Respiration,
    BodyTemp,
    Accelerometer,
    Gyroscope,
    Pressure,
    BloodOxygen,
}

impl SensorChannel {
    /// Canonical wire name, used for store documents and metric keys.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SensorChannel::Pulse => "PulseSensor",
            SensorChannel::Respiration => "RespiratoryRate",
            SensorChannel::BodyTemp => "ObjectTemp",
            SensorChannel::Accelerometer => "Accelerometer",
            SensorChannel::Gyroscope => "Gyroscope",
            SensorChannel::Pressure => "Pressure",
            SensorChannel::BloodOxygen => "SpO2",
        }
    }

    /// Resolve a wire name, including the short aliases older firmware used.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "PulseSensor" => Some(SensorChannel::Pulse),
            "RespiratoryRate" => Some(SensorChannel::Respiration),
            "ObjectTemp" | "AmbientTemp" => Some(SensorChannel::BodyTemp),
            "Accelerometer" | "Accel" => Some(SensorChannel::Accelerometer),
            "Gyroscope" | "Gyro" => Some(SensorChannel::Gyroscope),
            "Pressure" => Some(SensorChannel::Pressure),
            "SpO2" | "BloodOxygen" => Some(SensorChannel::BloodOxygen),
            _ => None,
        }
    }
}

/// Named numeric fields for one channel (e.g. `{"pulse_BPM": 72.0}`).
pub type FieldMap = BTreeMap<String, f64>;

/// One capture instant's measurements across one or more channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRecord {
    readings: BTreeMap<SensorChannel, FieldMap>,
}

impl SensorRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: SensorChannel, field: &str, value: f64) {
        self.readings
            .entry(channel)
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn get(&self, channel: SensorChannel, field: &str) -> Option<f64> {
        self.readings.get(&channel)?.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Channels and their fields in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorChannel, &FieldMap)> {
        self.readings.iter().map(|(c, f)| (*c, f))
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = (SensorChannel, &mut FieldMap)> {
        self.readings.iter_mut().map(|(c, f)| (*c, f))
    }
}

/// One CSV column mapped onto a channel field.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub channel: SensorChannel,
    pub field: String,
}

impl ColumnSpec {
    /// Parse a dotted `Channel.field` config key.
    pub fn parse(key: &str) -> Option<Self> {
        let (channel, field) = key.split_once('.')?;
        let channel = SensorChannel::from_wire(channel)?;
        if field.is_empty() {
            return None;
        }
        Some(Self {
            channel,
            field: field.to_string(),
        })
    }
}

/// Parse strategy matching the session's wire framing.
#[derive(Debug, Clone)]
pub enum ParseStrategy {
    /// Bracket-framed JSON payloads
    Json,
    /// Positional CSV lines mapped through a fixed column schema
    Csv { columns: Vec<ColumnSpec> },
}

/// Turns raw wire records into validated-ready `SensorRecord`s.
pub struct RecordParser {
    strategy: ParseStrategy,
}

impl RecordParser {
    pub fn new(strategy: ParseStrategy) -> Self {
        Self { strategy }
    }

    /// Parse one wire record into one or more sensor records.
    ///
    /// Either returns well-formed records or fails without side effects;
    /// the caller logs the error and drops the record.
    pub fn parse(&self, raw: &str) -> Result<Vec<SensorRecord>, ParseError> {
        match &self.strategy {
            ParseStrategy::Json => parse_json_record(raw),
            ParseStrategy::Csv { columns } => parse_csv_line(raw, columns).map(|r| vec![r]),
        }
    }
}

fn parse_json_record(raw: &str) -> Result<Vec<SensorRecord>, ParseError> {
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => v,
        Err(strict_err) => {
            // Recovery pass for the firmware's loose formatting
            let cleaned = lenient_cleanup(raw);
            serde_json::from_str::<serde_json::Value>(&cleaned)
                .map_err(|_| ParseError::Syntax(strict_err.to_string()))?
        }
    };

    let objects: Vec<&serde_json::Map<String, serde_json::Value>> = match &value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| ParseError::Shape("array element is not an object".to_string()))
            })
            .collect::<Result<_, _>>()?,
        serde_json::Value::Object(map) => vec![map],
        other => {
            return Err(ParseError::Shape(format!(
                "expected object or array, got {}",
                json_type_name(other)
            )))
        }
    };

    let mut records = Vec::new();
    for object in objects {
        let record = record_from_object(object)?;
        if !record.is_empty() {
            records.push(record);
        }
    }

    if records.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(records)
}

/// Build a record from one wire object.
///
/// Two shapes occur in practice: nested (`{"PulseSensor": {"pulse_BPM": 72}}`,
/// possibly several channels per object) and flat with a `sensor` tag
/// (`{"sensor": "PulseSensor", "pulse_BPM": 72}`), which is what the
/// stored documents look like.
fn record_from_object(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Result<SensorRecord, ParseError> {
    let mut record = SensorRecord::new();

    if let Some(tag) = object.get("sensor").and_then(|v| v.as_str()) {
        match SensorChannel::from_wire(tag) {
            Some(channel) => {
                for (field, value) in object {
                    if field.as_str() == "sensor" {
                        continue;
                    }
                    insert_numeric(&mut record, channel, field, value);
                }
            }
            None => {
                log::warn!("Ignoring record for unknown sensor channel {:?}", tag);
            }
        }
        return Ok(record);
    }

    for (name, fields) in object {
        let Some(channel) = SensorChannel::from_wire(name) else {
            log::warn!("Ignoring unknown sensor channel {:?}", name);
            continue;
        };
        let Some(fields) = fields.as_object() else {
            return Err(ParseError::Shape(format!(
                "channel {} payload is not an object",
                name
            )));
        };
        for (field, value) in fields {
            insert_numeric(&mut record, channel, field, value);
        }
    }

    Ok(record)
}

fn insert_numeric(
    record: &mut SensorRecord,
    channel: SensorChannel,
    field: &str,
    value: &serde_json::Value,
) {
    match value.as_f64() {
        Some(v) => record.insert(channel, field, v),
        None => {
            log::debug!(
                "Dropping non-numeric field {}.{} = {}",
                channel.wire_name(),
                field,
                value
            );
        }
    }
}

fn parse_csv_line(line: &str, columns: &[ColumnSpec]) -> Result<SensorRecord, ParseError> {
    let cells: Vec<&str> = line.split(',').map(str::trim).collect();
    if cells.len() != columns.len() {
        return Err(ParseError::ColumnCount {
            expected: columns.len(),
            got: cells.len(),
        });
    }

    let mut record = SensorRecord::new();
    for (spec, cell) in columns.iter().zip(&cells) {
        let value: f64 = cell.parse().map_err(|_| ParseError::BadNumber {
            column: format!("{}.{}", spec.channel.wire_name(), spec.field),
            value: (*cell).to_string(),
        })?;
        record.insert(spec.channel, &spec.field, value);
    }

    if record.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(record)
}

/// Best-effort cleanup of minor wire malformations before re-parsing:
/// single quotes become double quotes, and trailing commas before a
/// closing brace or bracket are removed.
fn lenient_cleanup(raw: &str) -> String {
    let requoted: String = raw
        .chars()
        .map(|c| if c == '\'' { '"' } else { c })
        .collect();

    let mut out = String::with_capacity(requoted.len());
    let mut chars = requoted.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' {
            // Look past whitespace for a closing delimiter
            let mut lookahead = chars.clone();
            while let Some(&next) = lookahead.peek() {
                if next.is_whitespace() {
                    lookahead.next();
                } else {
                    break;
                }
            }
            if matches!(lookahead.peek(), Some('}') | Some(']')) {
                continue; // drop the trailing comma
            }
        }
        out.push(c);
    }
    out
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_parser() -> RecordParser {
        RecordParser::new(ParseStrategy::Json)
    }

    #[test]
    fn test_parse_nested_single_channel() {
        let records = json_parser()
            .parse("[{\"PulseSensor\":{\"pulse_BPM\":72.5}}]")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(72.5));
    }

    #[test]
    fn test_parse_multi_channel_object() {
        let raw = "[{\"PulseSensor\":{\"pulse_BPM\":70},\"Gyro\":{\"r_rate\":33}}]";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(70.0));
        assert_eq!(records[0].get(SensorChannel::Gyroscope, "r_rate"), Some(33.0));
    }

    #[test]
    fn test_parse_batched_array() {
        let raw = "[{\"PulseSensor\":{\"pulse_BPM\":70}},{\"RespiratoryRate\":{\"BRPM\":16}}]";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].get(SensorChannel::Respiration, "BRPM"),
            Some(16.0)
        );
    }

    #[test]
    fn test_parse_flat_tagged_shape() {
        let raw = "{\"sensor\":\"Accel\",\"s_rate\":94,\"X_g\":0.1}";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(
            records[0].get(SensorChannel::Accelerometer, "s_rate"),
            Some(94.0)
        );
        assert_eq!(
            records[0].get(SensorChannel::Accelerometer, "X_g"),
            Some(0.1)
        );
    }

    #[test]
    fn test_lenient_recovers_single_quotes_and_trailing_comma() {
        let raw = "[{'PulseSensor':{'pulse_BPM':66,}},]";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(66.0));
    }

    #[test]
    fn test_unparseable_record_is_error_not_panic() {
        let err = json_parser().parse("[{\"PulseSensor\":{{]").unwrap_err();
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn test_unknown_channel_skipped() {
        let raw = "[{\"MysterySensor\":{\"x\":1},\"PulseSensor\":{\"pulse_BPM\":60}}]";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(60.0));
        assert_eq!(records[0].iter().count(), 1);
    }

    #[test]
    fn test_only_unknown_channels_is_empty_error() {
        let err = json_parser().parse("[{\"MysterySensor\":{\"x\":1}}]").unwrap_err();
        assert!(matches!(err, ParseError::Empty));
    }

    #[test]
    fn test_non_numeric_field_dropped() {
        let raw = "[{\"PulseSensor\":{\"pulse_BPM\":61,\"status\":\"ok\"}}]";
        let records = json_parser().parse(raw).unwrap();
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(61.0));
        assert_eq!(records[0].get(SensorChannel::Pulse, "status"), None);
    }

    fn csv_parser() -> RecordParser {
        let columns = vec![
            ColumnSpec::parse("PulseSensor.pulse_BPM").unwrap(),
            ColumnSpec::parse("RespiratoryRate.BRPM").unwrap(),
            ColumnSpec::parse("ObjectTemp.Celsius").unwrap(),
        ];
        RecordParser::new(ParseStrategy::Csv { columns })
    }

    #[test]
    fn test_csv_line_maps_positionally() {
        let records = csv_parser().parse("72, 18, 36.6").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(SensorChannel::Pulse, "pulse_BPM"), Some(72.0));
        assert_eq!(records[0].get(SensorChannel::BodyTemp, "Celsius"), Some(36.6));
    }

    #[test]
    fn test_csv_wrong_column_count() {
        let err = csv_parser().parse("72,18").unwrap_err();
        assert!(matches!(
            err,
            ParseError::ColumnCount { expected: 3, got: 2 }
        ));
    }

    #[test]
    fn test_csv_bad_number() {
        let err = csv_parser().parse("72,abc,36.6").unwrap_err();
        assert!(matches!(err, ParseError::BadNumber { .. }));
    }

    #[test]
    fn test_column_spec_parse() {
        let spec = ColumnSpec::parse("Gyro.r_rate").unwrap();
        assert_eq!(spec.channel, SensorChannel::Gyroscope);
        assert_eq!(spec.field, "r_rate");
        assert!(ColumnSpec::parse("NotAChannel.x").is_none());
        assert!(ColumnSpec::parse("Gyro").is_none());
    }
}
