// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use flow_core::FakeClock;
use flow_store::StoreConfig;
use serde_json::json;

struct Fixture {
    _dir: tempfile::TempDir,
    clock: FakeClock,
    registry: JobRegistry<FakeClock>,
    store: Store,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::new(dir.path().join("db"));
    config.flush_every_ms = None;
    let store = Store::open(&config).unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let registry = JobRegistry::new(store.clone(), clock.clone());
    Fixture { _dir: dir, clock, registry, store }
}

fn create(fx: &Fixture, job_type: &str, max_retries: u32) -> JobId {
    fx.registry
        .create_job(
            job_type,
            InstanceId::from_string("inst-1"),
            "task1",
            TokenId::from_string("tok-1"),
            HashMap::new(),
            Variables::new(),
            max_retries,
        )
        .unwrap()
}

#[test]
fn created_job_is_pending_with_token_back_pointer() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);

    let job = fx.registry.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retries, 3);
    assert_eq!(job.token_id_var(), Some("tok-1"));
}

#[test]
fn activate_claims_up_to_max_count_of_matching_type() {
    let fx = fixture();
    for _ in 0..3 {
        create(&fx, "payment", 3);
    }
    create(&fx, "shipping", 3);

    let claimed = fx.registry.activate("payment", "worker-a", 2, Duration::from_secs(30)).unwrap();
    assert_eq!(claimed.len(), 2);
    for job in &claimed {
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker_id.as_deref(), Some("worker-a"));
        assert!(job.started_at.is_some());
    }

    // One payment job left, shipping untouched.
    assert_eq!(
        fx.registry.activate("payment", "worker-b", 10, Duration::from_secs(30)).unwrap().len(),
        1
    );
    assert_eq!(
        fx.registry.activate("shipping", "worker-b", 10, Duration::from_secs(30)).unwrap().len(),
        1
    );
}

#[test]
fn activation_prefers_higher_priority_then_age() {
    let fx = fixture();
    let low = create(&fx, "payment", 3);
    fx.clock.advance(Duration::from_secs(1));
    let high = create(&fx, "payment", 3);

    let mut job = fx.registry.get(&high).unwrap();
    job.priority = 10;
    fx.store.put_json(&keys::job(high.as_str()), &job).unwrap();

    let claimed = fx.registry.activate("payment", "w", 2, Duration::from_secs(30)).unwrap();
    assert_eq!(claimed[0].id, high);
    assert_eq!(claimed[1].id, low);
}

#[test]
fn complete_merges_result_variables() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();

    let result: Variables = [("receipt".to_string(), json!("r-9"))].into();
    let job = fx.registry.complete(&id, &result).unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.variables.get("receipt"), Some(&json!("r-9")));
    // Back-pointer still intact after the merge.
    assert_eq!(job.token_id_var(), Some("tok-1"));
}

#[test]
fn complete_requires_running_status() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    assert!(matches!(
        fx.registry.complete(&id, &Variables::new()),
        Err(EngineError::InvalidRequest(_))
    ));
}

#[test]
fn fail_with_retries_defers_with_default_backoff() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();

    let outcome = fx.registry.fail(&id, "boom", None, None).unwrap();
    assert!(!outcome.exhausted);
    assert_eq!(outcome.job.status, JobStatus::Deferred);
    assert_eq!(outcome.job.retries, 2);
    assert_eq!(outcome.job.error_message.as_deref(), Some("boom"));

    // First retry: base 1 s, jitter at most 25%.
    let now = fx.clock.now_utc();
    let scheduled_at = outcome.job.scheduled_at.unwrap();
    assert!(scheduled_at >= now + chrono::Duration::seconds(1));
    assert!(scheduled_at <= now + chrono::Duration::milliseconds(1_250));
}

#[test]
fn fail_with_explicit_backoff_duration() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();

    let outcome = fx.registry.fail(&id, "boom", Some(2), Some("PT1S")).unwrap();
    let scheduled_at = outcome.job.scheduled_at.unwrap();
    assert_eq!(scheduled_at, fx.clock.now_utc() + chrono::Duration::seconds(1));
}

#[test]
fn deferred_job_reactivates_only_after_backoff() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();
    fx.registry.fail(&id, "boom", None, Some("PT5S")).unwrap();

    assert!(fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap().is_empty());

    fx.clock.advance(Duration::from_secs(5));
    let claimed = fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
}

#[test]
fn job_with_n_retries_is_attempted_n_plus_one_times() {
    let fx = fixture();
    let id = create(&fx, "payment", 2);

    let mut attempts = 0;
    loop {
        let claimed =
            fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();
        if claimed.is_empty() {
            break;
        }
        attempts += 1;
        let outcome = fx.registry.fail(&id, "boom", None, Some("PT1S")).unwrap();
        if outcome.exhausted {
            break;
        }
        fx.clock.advance(Duration::from_secs(2));
    }

    assert_eq!(attempts, 3);
    let job = fx.registry.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[test]
fn exhausted_retries_open_a_job_incident() {
    let fx = fixture();
    let id = create(&fx, "payment", 0);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();

    let outcome = fx.registry.fail(&id, "boom", None, None).unwrap();
    assert!(outcome.exhausted);
    assert_eq!(outcome.job.status, JobStatus::Failed);

    let incidents: Vec<Incident> = fx.store.scan_json(keys::INCIDENT_PREFIX).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].kind, IncidentKind::Job);
    assert_eq!(incidents[0].job_id, Some(id));
}

#[test]
fn expired_activation_lock_allows_reclaim() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "dead-worker", 1, Duration::from_secs(10)).unwrap();

    // Still locked.
    assert!(fx.registry.activate("payment", "w2", 1, Duration::from_secs(10)).unwrap().is_empty());

    fx.clock.advance(Duration::from_secs(11));
    let claimed = fx.registry.activate("payment", "w2", 1, Duration::from_secs(10)).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].worker_id.as_deref(), Some("w2"));
}

#[test]
fn cancel_is_noop_for_terminal_jobs() {
    let fx = fixture();
    let id = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 1, Duration::from_secs(30)).unwrap();
    fx.registry.complete(&id, &Variables::new()).unwrap();

    let job = fx.registry.cancel(&id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[test]
fn cancel_stops_pending_and_running_jobs() {
    let fx = fixture();
    let pending = create(&fx, "payment", 3);
    let running = create(&fx, "payment", 3);
    fx.registry.activate("payment", "w", 2, Duration::from_secs(30)).unwrap();
    // Both activated; cancel them.
    assert_eq!(fx.registry.cancel(&pending).unwrap().status, JobStatus::Canceled);
    assert_eq!(fx.registry.cancel(&running).unwrap().status, JobStatus::Canceled);
}
