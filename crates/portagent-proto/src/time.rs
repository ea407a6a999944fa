//! NTP timestamp conversions.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;

use crate::errors::{PacketError, Result};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch
/// (1970-01-01).
pub const NTP_UNIX_DELTA: u64 = 2_208_988_800;

/// Current time as NTP seconds (seconds since 1900-01-01 UTC).
pub fn ntp_now() -> f64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    since_unix.as_secs_f64() + NTP_UNIX_DELTA as f64
}

/// Parse an ISO-8601 UTC timestamp into NTP seconds.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS` with an optional fractional part and an
/// optional trailing `Z`; the input is assumed to be UTC either way.
///
/// # Errors
///
/// [`PacketError::BadTimestamp`] when the input does not parse.
pub fn ntp_from_iso8601(input: &str) -> Result<f64> {
    let trimmed = input.strip_suffix('Z').unwrap_or(input);

    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| PacketError::BadTimestamp { input: input.to_string() })?;

    let unix = parsed.and_utc().timestamp() as f64
        + f64::from(parsed.and_utc().timestamp_subsec_micros()) / 1e6;

    if unix < -(NTP_UNIX_DELTA as f64) {
        return Err(PacketError::BadTimestamp { input: input.to_string() });
    }

    Ok(unix + NTP_UNIX_DELTA as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_past_the_unix_epoch_offset() {
        assert!(ntp_now() > NTP_UNIX_DELTA as f64);
    }

    #[test]
    fn unix_epoch_maps_to_the_delta() {
        let ntp = ntp_from_iso8601("1970-01-01T00:00:00.0Z").expect("parses");
        assert!((ntp - NTP_UNIX_DELTA as f64).abs() < f64::EPSILON);
    }

    #[test]
    fn fraction_and_zulu_are_optional() {
        let plain = ntp_from_iso8601("2014-04-01T12:30:45").expect("parses");
        let zulu = ntp_from_iso8601("2014-04-01T12:30:45Z").expect("parses");
        let frac = ntp_from_iso8601("2014-04-01T12:30:45.500000Z").expect("parses");

        assert!((plain - zulu).abs() < f64::EPSILON);
        assert!((frac - zulu - 0.5).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ntp_from_iso8601("not a timestamp").is_err());
        assert!(ntp_from_iso8601("2014-04-01 12:30:45").is_err());
        assert!(ntp_from_iso8601("").is_err());
    }
}
