//! Capture timestamp resolution from split second/nanosecond stamp fields.

use crate::dataset::Cell;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Missing stamp field '{0}'")]
    Missing(String),

    #[error("Stamp field '{field}' is not an integer: {value:?}")]
    NotInteger { field: String, value: String },

    #[error("Nanoseconds out of range: {0}")]
    NanosOutOfRange(i64),

    #[error("Seconds out of range: {0}")]
    SecondsOutOfRange(i64),
}

/// Combine whole seconds and a nanosecond remainder into a UTC instant.
///
/// The remainder is truncated to microseconds.
pub fn resolve(secs: i64, nsecs: i64) -> Result<DateTime<Utc>, TimestampError> {
    if !(0..NANOS_PER_SECOND).contains(&nsecs) {
        return Err(TimestampError::NanosOutOfRange(nsecs));
    }

    let base = DateTime::from_timestamp(secs, 0).ok_or(TimestampError::SecondsOutOfRange(secs))?;

    base.checked_add_signed(Duration::microseconds(nsecs / 1000))
        .ok_or(TimestampError::SecondsOutOfRange(secs))
}

/// Read an integer stamp field from a dataset cell.
pub fn stamp_field(field: &str, cell: Option<&Cell>) -> Result<i64, TimestampError> {
    match cell {
        None | Some(Cell::Null) => Err(TimestampError::Missing(field.to_string())),
        Some(Cell::Integer(value)) => Ok(*value),
        Some(Cell::Text(text)) => text.trim().parse().map_err(|_| TimestampError::NotInteger {
            field: field.to_string(),
            value: text.clone(),
        }),
        Some(Cell::Bytes(bytes)) => Err(TimestampError::NotInteger {
            field: field.to_string(),
            value: format!("<{} bytes>", bytes.len()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_resolve_truncates_to_microseconds() {
        let instant = resolve(0, 500_000).unwrap();
        assert_eq!(instant, DateTime::<Utc>::UNIX_EPOCH + Duration::microseconds(500));

        let instant = resolve(0, 1_999).unwrap();
        assert_eq!(instant, DateTime::<Utc>::UNIX_EPOCH + Duration::microseconds(1));

        let instant = resolve(0, 999).unwrap();
        assert_eq!(instant, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_resolve_recorded_stamp() {
        let instant = resolve(1_700_000_000, 123_456_789).unwrap();
        let expected = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(instant, expected);
    }

    #[test]
    fn test_resolve_rejects_bad_nanoseconds() {
        assert_eq!(resolve(10, -1), Err(TimestampError::NanosOutOfRange(-1)));
        assert_eq!(
            resolve(10, 1_000_000_000),
            Err(TimestampError::NanosOutOfRange(1_000_000_000))
        );
        assert!(resolve(10, 999_999_999).is_ok());
    }

    #[test]
    fn test_resolve_rejects_unrepresentable_seconds() {
        assert_eq!(resolve(i64::MAX, 0), Err(TimestampError::SecondsOutOfRange(i64::MAX)));
    }

    #[test]
    fn test_stamp_field_parsing() {
        assert_eq!(stamp_field("secs", Some(&Cell::Integer(7))), Ok(7));
        assert_eq!(stamp_field("secs", Some(&Cell::Text(" 42 ".to_string()))), Ok(42));
        assert_eq!(
            stamp_field("nsecs", Some(&Cell::Text("-5".to_string()))),
            Ok(-5)
        );
    }

    #[test]
    fn test_stamp_field_rejects_non_integers() {
        assert!(matches!(
            stamp_field("nsecs", Some(&Cell::Text("12.5".to_string()))),
            Err(TimestampError::NotInteger { .. })
        ));
        assert!(matches!(
            stamp_field("nsecs", Some(&Cell::Text("abc".to_string()))),
            Err(TimestampError::NotInteger { .. })
        ));
        assert!(matches!(
            stamp_field("nsecs", Some(&Cell::Bytes(vec![1]))),
            Err(TimestampError::NotInteger { .. })
        ));
        assert_eq!(
            stamp_field("secs", None),
            Err(TimestampError::Missing("secs".to_string()))
        );
        assert_eq!(
            stamp_field("secs", Some(&Cell::Null)),
            Err(TimestampError::Missing("secs".to_string()))
        );
    }
}
