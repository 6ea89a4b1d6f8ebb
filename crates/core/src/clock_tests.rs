// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::new();
    let start = clock.now();
    let start_ms = clock.epoch_ms();

    clock.advance(Duration::from_secs(30));

    assert_eq!(clock.now() - start, Duration::from_secs(30));
    assert_eq!(clock.epoch_ms() - start_ms, 30_000);
}

#[test]
fn fake_clock_now_utc_tracks_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    assert_eq!(clock.now_utc().timestamp_millis(), 1_700_000_000_000);

    clock.advance(Duration::from_millis(1_500));
    assert_eq!(clock.now_utc().timestamp_millis(), 1_700_000_001_500);
}

#[test]
fn system_clock_epoch_is_sane() {
    let clock = SystemClock;
    // Well after 2020-01-01, well before year 3000.
    let ms = clock.epoch_ms();
    assert!(ms > 1_577_836_800_000);
    assert!(ms < 32_503_680_000_000);
}
