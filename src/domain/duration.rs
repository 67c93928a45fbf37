//! Duration fields as accepted on the wire.
//!
//! Callers may send either whole seconds (`3600`) or a unit string
//! (`"1h"`, `"90m"`, `"1h30m"`, `"45s"`, `"2d"`).

use crate::errors::{ApprovalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationInput {
    Seconds(u64),
    Text(String),
}

impl DurationInput {
    pub fn to_duration(&self, field: &str) -> Result<Duration> {
        match self {
            DurationInput::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationInput::Text(text) => parse_duration(text)
                .map_err(|message| ApprovalError::invalid_field(message, field)),
        }
    }

    /// Like [`DurationInput::to_duration`], rejecting anything above `max`
    pub fn to_duration_at_most(&self, field: &str, max: Duration) -> Result<Duration> {
        let duration = self.to_duration(field)?;
        if duration > max {
            return Err(ApprovalError::invalid_field(
                format!("{} must not exceed {}s", field, max.as_secs()),
                field,
            ));
        }
        Ok(duration)
    }
}

/// `at + ttl`, or `Invalid` when the result does not fit a timestamp
pub fn deadline(at: DateTime<Utc>, ttl: Duration, field: &str) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| at.checked_add_signed(ttl))
        .ok_or_else(|| ApprovalError::invalid_field(format!("{} is out of range", field), field))
}

impl From<Duration> for DurationInput {
    fn from(value: Duration) -> Self {
        DurationInput::Seconds(value.as_secs())
    }
}

/// Parse `12h`, `30m`, `1h30m`, `45s`, `2d` or a bare number of seconds.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("Invalid duration '': expected format like 12h, 30m, 45s".to_string());
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }

        let quantity: u64 = number
            .parse()
            .map_err(|_| format!("Invalid duration '{}': missing quantity before '{}'", value, ch))?;
        number.clear();

        let unit = match ch {
            'd' | 'D' => 86_400,
            'h' | 'H' => 3_600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => {
                return Err(format!(
                    "Invalid duration unit '{}': expected one of d (days), h (hours), m (minutes), s (seconds)",
                    ch
                ))
            }
        };
        total = quantity
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("Invalid duration '{}': overflow", value))?;
    }

    if !number.is_empty() {
        return Err(format!("Invalid duration '{}': trailing number without unit", value));
    }

    Ok(Duration::from_secs(total))
}
