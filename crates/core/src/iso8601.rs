// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ISO-8601 parsing for timer definitions.
//!
//! Three shapes are recognised: durations (`P[nY][nM][nD][T[nH][nM][nS]]`),
//! repeating intervals (`R[n]/<duration>`, empty count = infinite), and
//! absolute dates (RFC3339 with or without sub-second precision, or plain
//! `YYYY-MM-DD` taken as midnight UTC). Calendar units are approximated:
//! a year is 365 days, a month is 30 days.

use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use thiserror::Error;

const YEAR_SECS: f64 = 365.0 * 86_400.0;
const MONTH_SECS: f64 = 30.0 * 86_400.0;
const DAY_SECS: f64 = 86_400.0;

#[derive(Debug, Error, PartialEq)]
pub enum Iso8601Error {
    #[error("invalid ISO-8601 duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid ISO-8601 date: {0:?}")]
    InvalidDate(String),

    #[error("invalid ISO-8601 repeating interval: {0:?}")]
    InvalidCycle(String),
}

/// A parsed repeating interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    /// Number of repetitions; `None` means repeat forever.
    pub repetitions: Option<u32>,
    pub interval: Duration,
}

/// Parse an ISO-8601 duration such as `PT30S` or `P1DT2H`.
///
/// Fractional values are accepted (`PT0.5S`).
pub fn parse_duration(text: &str) -> Result<Duration, Iso8601Error> {
    let invalid = || Iso8601Error::InvalidDuration(text.to_string());
    let body = text.strip_prefix('P').ok_or_else(invalid)?;

    let mut total_secs = 0f64;
    let mut in_time = false;
    let mut num = String::new();
    let mut saw_component = false;

    for c in body.chars() {
        match c {
            'T' if !in_time && num.is_empty() => in_time = true,
            '0'..='9' | '.' => num.push(c),
            unit => {
                let value: f64 = num.parse().map_err(|_| invalid())?;
                num.clear();
                let mult = match (in_time, unit) {
                    (false, 'Y') => YEAR_SECS,
                    (false, 'M') => MONTH_SECS,
                    (false, 'D') => DAY_SECS,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                total_secs += value * mult;
                saw_component = true;
            }
        }
    }

    if !num.is_empty() || !saw_component || !total_secs.is_finite() || total_secs < 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs_f64(total_secs))
}

/// Parse a repeating interval such as `R3/PT1S` or `R/PT10S`.
pub fn parse_cycle(text: &str) -> Result<Cycle, Iso8601Error> {
    let invalid = || Iso8601Error::InvalidCycle(text.to_string());
    let rest = text.strip_prefix('R').ok_or_else(invalid)?;
    let (count, duration_text) = rest.split_once('/').ok_or_else(invalid)?;

    let repetitions = if count.is_empty() {
        None
    } else {
        Some(count.parse::<u32>().map_err(|_| invalid())?)
    };
    let interval = parse_duration(duration_text)
        .map_err(|_| invalid())?;
    Ok(Cycle { repetitions, interval })
}

/// Parse an absolute date: RFC3339, or plain `YYYY-MM-DD` as midnight UTC.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>, Iso8601Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(Iso8601Error::InvalidDate(text.to_string()))
}

#[cfg(test)]
#[path = "iso8601_tests.rs"]
mod tests;
