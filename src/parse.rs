use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::SyncError;

/// Persisted state timestamps use Python-style microseconds and no zone suffix.
pub const STATE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const MDTM_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parse a cutoff as written in config (`2024-01-01T00:00:00.000000Z`) or state
/// (`2024-01-01T00:00:00.000000`). The result is naive UTC.
pub fn parse_cutoff(input: &str) -> Result<NaiveDateTime, SyncError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SyncError::InvalidTimestamp(input.to_string()));
    }
    let naive = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')).unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(t);
        }
    }
    // explicit offsets are converted, not dropped
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc).naive_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        && let Some(t) = d.and_hms_opt(0, 0, 0)
    {
        return Ok(t);
    }
    Err(SyncError::InvalidTimestamp(input.to_string()))
}

pub fn format_state_timestamp(t: &NaiveDateTime) -> String {
    t.format(STATE_TIMESTAMP_FORMAT).to_string()
}

/// Parse an MDTM reply (`213 20240101000000`) or its bare value. Fractional
/// seconds some servers append (`20240101000000.123`) are dropped.
pub fn parse_mdtm_reply(reply: &str) -> Option<DateTime<Utc>> {
    let s = reply.trim();
    let value = match s.split_once(' ') {
        Some((code, rest)) if code.len() == 3 && code.chars().all(|c| c.is_ascii_digit()) => {
            rest.trim()
        }
        _ => s,
    };
    let stamp = value.split('.').next().unwrap_or(value);
    if stamp.len() != 14 || !stamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, MDTM_FORMAT).ok().map(|t| t.and_utc())
}
