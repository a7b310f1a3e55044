//! Property tests for the retry controller, duration parsing and the
//! replication counters.

use kouch_client::{ClientError, Database};
use kouch_protocol::{Document, PutOptions};
use kouch_replicate::{
    parse_duration, replicate, retry, CancellationToken, ReplicateError, ReplicateOptions,
    RetryPolicy,
};
use kouch_testkit::{writes_strategy, ReplicationPair};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

/// Counts invocations of a unit of work that always fails with `error`.
async fn count_calls(policy: &RetryPolicy, error: ClientError) -> (u64, ClientError) {
    let calls = Arc::new(AtomicU64::new(0));
    let cancel = CancellationToken::new();
    let out: Result<(), ClientError> = retry(policy, &cancel, || {
        let calls = calls.clone();
        let error = error.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(error)
        }
    })
    .await;
    (calls.load(Ordering::SeqCst), out.unwrap_err())
}

/// Applies writes with server-generated revisions, updating documents that
/// already exist.
async fn apply_writes(db: &dyn Database, writes: &[(String, Map<String, Value>)]) {
    for (id, body) in writes {
        let mut doc = Document::from_value(Value::Object(body.clone())).unwrap();
        if let Ok(current) = db.get(id, Default::default()).await {
            if let Some(rev) = current.rev().unwrap() {
                doc.set_rev(&rev);
            }
        }
        db.put(id, doc, PutOptions::default()).await.unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn retry_never_exceeds_budget(max_attempts in 0i64..20) {
        let policy = RetryPolicy::new(max_attempts).with_delay(Duration::ZERO);
        let (calls, err) = runtime().block_on(count_calls(&policy, ClientError::transient("down")));
        prop_assert_eq!(calls, max_attempts as u64 + 1);
        prop_assert!(err.is_transient());
    }

    #[test]
    fn retry_with_backoff_never_exceeds_budget(max_attempts in 0i64..6) {
        let policy = RetryPolicy::new(max_attempts);
        let (calls, _) = runtime().block_on(count_calls(&policy, ClientError::transient("down")));
        prop_assert!(calls <= max_attempts as u64 + 1);
    }

    #[test]
    fn permanent_error_runs_once(max_attempts in -1i64..20, status in 400u16..500) {
        prop_assume!(status != 408 && status != 429);
        let error = ClientError::from_status(status, b"{}");
        prop_assume!(!error.is_transient());
        let policy = RetryPolicy::new(max_attempts).with_delay(Duration::ZERO);
        let (calls, err) = runtime().block_on(count_calls(&policy, error.clone()));
        prop_assert_eq!(calls, 1);
        prop_assert_eq!(err, error);
    }

    #[test]
    fn parsed_durations_are_non_negative(secs in 0.0f64..1e6) {
        let parsed = parse_duration(&format!("{secs}")).unwrap().unwrap();
        prop_assert!((parsed.as_secs_f64() - secs).abs() < 1e-6);
    }

    #[test]
    fn negative_durations_are_usage_errors(secs in 0.001f64..1e6, unit in "(|ns|us|ms|s|m|h)") {
        let err = parse_duration(&format!("-{secs}{unit}")).unwrap_err();
        prop_assert_eq!(err, ReplicateError::usage("negative timeout not permitted"));
    }

    #[test]
    fn compound_durations_add_up(h in 0u64..48, m in 0u64..60, s in 0u64..60) {
        let parsed = parse_duration(&format!("{h}h{m}m{s}s")).unwrap().unwrap();
        prop_assert_eq!(parsed, Duration::from_secs(h * 3600 + m * 60 + s));
    }

    #[test]
    fn counters_are_conserved_and_rerun_is_idempotent(
        initial in writes_strategy(12),
        later in writes_strategy(12),
    ) {
        runtime().block_on(async {
            let pair = ReplicationPair::new();
            apply_writes(&pair.source, &initial).await;
            let cancel = CancellationToken::new();
            let opts = ReplicateOptions::new().with_batch_size(3);

            let first = replicate(&cancel, &pair.target, &pair.source, &opts).await.unwrap();
            prop_assert!(first.docs_written + first.doc_write_failures <= first.docs_read);
            prop_assert!(first.docs_read <= first.missing_found);
            prop_assert!(first.missing_found <= first.missing_checked);
            prop_assert!(first.end_time >= first.start_time);

            let second = replicate(&cancel, &pair.target, &pair.source, &opts).await.unwrap();
            prop_assert_eq!(second.docs_read, 0);
            prop_assert_eq!(second.missing_found, 0);

            apply_writes(&pair.source, &later).await;
            let third = replicate(&cancel, &pair.target, &pair.source, &opts).await.unwrap();
            prop_assert!(third.docs_written + third.doc_write_failures <= third.docs_read);
            prop_assert!(third.docs_read <= third.missing_found);
            prop_assert!(third.missing_found <= third.missing_checked);
            prop_assert_eq!(
                pair.source_client.dump("source"),
                pair.target_client.dump("target")
            );
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test(start_paused = true)]
async fn unlimited_retry_honours_deadline() {
    let calls = Arc::new(AtomicU64::new(0));
    let cancel = CancellationToken::new();
    let policy = RetryPolicy::unlimited().with_deadline(Duration::from_secs(1));
    let start = tokio::time::Instant::now();

    let out: Result<(), ClientError> = retry(&policy, &cancel, || {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(ClientError::transient(format!("attempt {n} failed")))
        }
    })
    .await;

    let n = calls.load(Ordering::SeqCst);
    assert!(n >= 1);
    assert!(start.elapsed() <= Duration::from_millis(1200));
    assert_eq!(out, Err(ClientError::transient(format!("attempt {n} failed"))));
}

#[tokio::test(start_paused = true)]
async fn no_attempt_starts_after_deadline() {
    let deadline = Duration::from_millis(750);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();
    let policy = RetryPolicy::unlimited()
        .with_delay(Duration::from_millis(100))
        .with_deadline(deadline);
    let origin = tokio::time::Instant::now();

    let _: Result<(), ClientError> = retry(&policy, &cancel, || {
        let starts = starts.clone();
        async move {
            starts.lock().unwrap().push(origin.elapsed());
            Err(ClientError::transient("down"))
        }
    })
    .await;

    let recorded = starts.lock().unwrap().clone();
    assert!(recorded.len() >= 7);
    assert!(recorded.iter().all(|t| *t < deadline));
}
