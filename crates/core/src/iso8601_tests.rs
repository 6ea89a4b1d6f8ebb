// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    seconds = { "PT30S", 30_000 },
    fractional_seconds = { "PT1.5S", 1_500 },
    sub_second = { "PT0.25S", 250 },
    minutes = { "PT5M", 300_000 },
    hours_minutes = { "PT1H30M", 5_400_000 },
    days = { "P1D", 86_400_000 },
    day_and_time = { "P2DT3H4M5S", 183_845_000 },
    month_approx = { "P1M", 2_592_000_000 },
    year_approx = { "P1Y", 31_536_000_000 },
    zero = { "PT0S", 0 },
)]
fn duration_parses(text: &str, expected_ms: u64) {
    assert_eq!(parse_duration(text).unwrap(), Duration::from_millis(expected_ms));
}

#[parameterized(
    empty = { "" },
    bare_p = { "P" },
    bare_pt = { "PT" },
    missing_p = { "30S" },
    missing_value = { "PTS" },
    unknown_unit = { "P1X" },
    trailing_number = { "PT30" },
    time_unit_in_date_part = { "P1H" },
    negative_via_garbage = { "PT-5S" },
)]
fn duration_rejects(text: &str) {
    assert!(matches!(parse_duration(text), Err(Iso8601Error::InvalidDuration(_))));
}

#[parameterized(
    bounded = { "R3/PT1S", Some(3), 1_000 },
    infinite = { "R/PT10S", None, 10_000 },
    zero_count = { "R0/PT1S", Some(0), 1_000 },
    long_interval = { "R2/P1DT1H", Some(2), 90_000_000 },
)]
fn cycle_parses(text: &str, repetitions: Option<u32>, interval_ms: u64) {
    let cycle = parse_cycle(text).unwrap();
    assert_eq!(cycle.repetitions, repetitions);
    assert_eq!(cycle.interval, Duration::from_millis(interval_ms));
}

#[parameterized(
    missing_r = { "PT1S" },
    missing_slash = { "R3PT1S" },
    bad_count = { "Rx/PT1S" },
    bad_duration = { "R3/1S" },
)]
fn cycle_rejects(text: &str) {
    assert!(matches!(parse_cycle(text), Err(Iso8601Error::InvalidCycle(_))));
}

#[test]
fn date_rfc3339() {
    let dt = parse_date("2026-08-01T12:00:00Z").unwrap();
    assert_eq!(dt.timestamp(), 1_785_585_600);
}

#[test]
fn date_rfc3339_sub_second() {
    let dt = parse_date("2026-08-01T12:00:00.250Z").unwrap();
    assert_eq!(dt.timestamp_millis() % 1_000, 250);
}

#[test]
fn date_rfc3339_offset_normalised_to_utc() {
    let with_offset = parse_date("2026-08-01T14:00:00+02:00").unwrap();
    let utc = parse_date("2026-08-01T12:00:00Z").unwrap();
    assert_eq!(with_offset, utc);
}

#[test]
fn date_plain_is_midnight_utc() {
    let dt = parse_date("2026-08-01").unwrap();
    assert_eq!(dt, parse_date("2026-08-01T00:00:00Z").unwrap());
}

#[test]
fn date_rejects_garbage() {
    assert!(matches!(parse_date("not-a-date"), Err(Iso8601Error::InvalidDate(_))));
}

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn whole_second_durations_parse_exactly(secs in 0u32..1_000_000) {
            let parsed = parse_duration(&format!("PT{secs}S")).unwrap();
            prop_assert_eq!(parsed, Duration::from_secs(u64::from(secs)));
        }

        #[test]
        fn bounded_cycles_parse_exactly(count in 0u32..1_000, secs in 1u32..100_000) {
            let cycle = parse_cycle(&format!("R{count}/PT{secs}S")).unwrap();
            prop_assert_eq!(cycle.repetitions, Some(count));
            prop_assert_eq!(cycle.interval, Duration::from_secs(u64::from(secs)));
        }
    }
}
