//! Row decoding for delimited meter readings.
//!
//! A row is `entity,measurement,timestamp`. Fields are validated in order
//! and the first invalid one determines the rejection.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// Field separator of input rows.
pub const FIELD_DELIMITER: char = ',';

/// Number of fields in a valid row.
pub const FIELD_COUNT: usize = 3;

/// A validated meter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub entity: u64,
    pub measurement: f64,
    /// Reading time in the configured fixed offset.
    pub timestamp: DateTime<FixedOffset>,
}

/// Reasons a row is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed row: expected {expected} fields, found {fields}", expected = FIELD_COUNT)]
    MalformedRow { fields: usize },

    #[error("invalid entity id: {raw:?}")]
    InvalidEntityId { raw: String },

    #[error("invalid measurement: {raw:?}")]
    InvalidMeasurement { raw: String },

    #[error("invalid timestamp: {raw:?}")]
    InvalidTimestamp { raw: String },
}

/// RejectKind classifies a [`DecodeError`] for logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RejectKind {
    MalformedRow = 0,
    InvalidEntityId = 1,
    InvalidMeasurement = 2,
    InvalidTimestamp = 3,
}

/// Number of RejectKind variants, used for array sizing.
pub const REJECT_KIND_COUNT: usize = 4;

impl RejectKind {
    /// All kinds in discriminant order.
    pub const ALL: [RejectKind; REJECT_KIND_COUNT] = [
        Self::MalformedRow,
        Self::InvalidEntityId,
        Self::InvalidMeasurement,
        Self::InvalidTimestamp,
    ];

    /// Returns the canonical log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRow => "malformed_row",
            Self::InvalidEntityId => "invalid_entity_id",
            Self::InvalidMeasurement => "invalid_measurement",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl DecodeError {
    pub const fn kind(&self) -> RejectKind {
        match self {
            Self::MalformedRow { .. } => RejectKind::MalformedRow,
            Self::InvalidEntityId { .. } => RejectKind::InvalidEntityId,
            Self::InvalidMeasurement { .. } => RejectKind::InvalidMeasurement,
            Self::InvalidTimestamp { .. } => RejectKind::InvalidTimestamp,
        }
    }
}

/// Decodes one raw row, reading its timestamp in `offset`.
pub fn decode_row(line: &str, offset: FixedOffset) -> Result<Reading, DecodeError> {
    let mut fields = line.split(FIELD_DELIMITER);
    let (Some(entity), Some(measurement), Some(timestamp), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(DecodeError::MalformedRow {
            fields: line.split(FIELD_DELIMITER).count(),
        });
    };

    Ok(Reading {
        entity: parse_entity(entity)?,
        measurement: parse_measurement(measurement)?,
        timestamp: parse_timestamp(timestamp, offset)?,
    })
}

fn parse_entity(raw: &str) -> Result<u64, DecodeError> {
    raw.parse().map_err(|_| DecodeError::InvalidEntityId {
        raw: raw.to_string(),
    })
}

fn parse_measurement(raw: &str) -> Result<f64, DecodeError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| DecodeError::InvalidMeasurement {
            raw: raw.to_string(),
        })
}

fn parse_timestamp(raw: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>, DecodeError> {
    raw.parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|utc| utc.with_timezone(&offset))
        .ok_or_else(|| DecodeError::InvalidTimestamp {
            raw: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).expect("zero offset")
    }

    #[test]
    fn test_valid_row() {
        let reading = decode_row("123,10.5,1609459200", utc()).expect("valid row");
        assert_eq!(reading.entity, 123);
        assert_eq!(reading.measurement, 10.5);
        assert_eq!(reading.timestamp.timestamp(), 1_609_459_200);
        assert_eq!(reading.timestamp.year(), 2021);
        assert_eq!(reading.timestamp.month(), 1);
    }

    #[test]
    fn test_timestamp_read_in_configured_offset() {
        let cet = FixedOffset::east_opt(3600).expect("valid offset");
        // 2020-12-31T23:30:00Z
        let reading = decode_row("1,1,1609457400", cet).expect("valid row");
        assert_eq!(reading.timestamp.year(), 2021);
        assert_eq!(reading.timestamp.hour(), 0);
        assert_eq!(reading.timestamp.minute(), 30);
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(
            decode_row("123,10.5", utc()),
            Err(DecodeError::MalformedRow { fields: 2 })
        );
        assert_eq!(
            decode_row("1,2,3,4", utc()),
            Err(DecodeError::MalformedRow { fields: 4 })
        );
        assert_eq!(
            decode_row("", utc()),
            Err(DecodeError::MalformedRow { fields: 1 })
        );
    }

    #[test]
    fn test_malformed_row_message_names_field_count() {
        let err = decode_row("123,10.5", utc()).expect_err("two fields");
        assert_eq!(
            err.to_string(),
            format!("malformed row: expected {FIELD_COUNT} fields, found 2")
        );
    }

    #[test]
    fn test_negative_entity_rejected() {
        let err = decode_row("-1,10.5,1609459200", utc()).expect_err("negative id");
        assert_eq!(
            err,
            DecodeError::InvalidEntityId {
                raw: "-1".to_string()
            }
        );
        assert_eq!(err.kind(), RejectKind::InvalidEntityId);
    }

    #[test]
    fn test_non_numeric_entity_rejected() {
        let err = decode_row("abc,10.5,1609459200", utc()).expect_err("bad id");
        assert_eq!(err.kind(), RejectKind::InvalidEntityId);
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_invalid_measurements_rejected() {
        for raw in ["abc", "-0.5", "NaN", "inf", ""] {
            let row = format!("1,{raw},1609459200");
            let err = decode_row(&row, utc()).expect_err("bad measurement");
            assert_eq!(
                err,
                DecodeError::InvalidMeasurement {
                    raw: raw.to_string()
                },
                "row {row:?}"
            );
        }
    }

    #[test]
    fn test_zero_measurement_accepted() {
        let reading = decode_row("1,0,1609459200", utc()).expect("zero is valid");
        assert_eq!(reading.measurement, 0.0);
    }

    #[test]
    fn test_invalid_timestamps_rejected() {
        for raw in ["abc", "-1", "1.5", "9223372036854775807"] {
            let row = format!("1,10.5,{raw}");
            let err = decode_row(&row, utc()).expect_err("bad timestamp");
            assert_eq!(err.kind(), RejectKind::InvalidTimestamp, "row {row:?}");
        }
    }

    #[test]
    fn test_first_invalid_field_wins() {
        let err = decode_row("x,y,z", utc()).expect_err("all invalid");
        assert_eq!(err.kind(), RejectKind::InvalidEntityId);

        let err = decode_row("1,y,z", utc()).expect_err("measurement and timestamp invalid");
        assert_eq!(err.kind(), RejectKind::InvalidMeasurement);
    }

    #[test]
    fn test_reject_kind_labels() {
        let labels: Vec<&str> = RejectKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            labels,
            [
                "malformed_row",
                "invalid_entity_id",
                "invalid_measurement",
                "invalid_timestamp"
            ]
        );
        for (i, kind) in RejectKind::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i);
        }
    }
}
