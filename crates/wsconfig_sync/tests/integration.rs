//! Integration tests for the poller, the cache and the sync service.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use wsconfig_diff::{DiffError, Watermark};
use wsconfig_model::{WorkspaceConfig, WorkspaceConfigs};
use wsconfig_sync::{
    BackoffConfig, ConfigCache, ConfigSync, DeltaFetcher, FetchError, Poller, PollerConfig,
    PollerState, ScriptedFetcher, SyncError, SyncOptions,
};

type Fetcher = ScriptedFetcher<WorkspaceConfigs>;
type Cache = ConfigCache<WorkspaceConfigs>;
type TestPoller = Poller<WorkspaceConfigs, Arc<Fetcher>, Arc<Cache>>;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_630_454_400 + secs, 0).unwrap()
}

fn workspace(secs: i64) -> WorkspaceConfig {
    WorkspaceConfig {
        sources: HashMap::new(),
        destinations: HashMap::new(),
        connections: HashMap::new(),
        updated_at: ts(secs),
    }
}

fn delta(updated: &[(&str, i64)], unchanged: &[&str]) -> WorkspaceConfigs {
    let mut configs = WorkspaceConfigs::new();
    for (id, secs) in updated {
        configs
            .workspaces
            .insert_updated(id.to_string(), workspace(*secs));
    }
    for id in unchanged {
        configs.workspaces.insert_unchanged(id.to_string());
    }
    configs
}

fn config(interval_secs: u64, backoff: BackoffConfig) -> PollerConfig {
    PollerConfig::new(Duration::from_secs(interval_secs)).with_backoff(backoff)
}

fn poller(config: PollerConfig, fetcher: &Arc<Fetcher>, cache: &Arc<Cache>) -> Arc<TestPoller> {
    Arc::new(Poller::new(config, Arc::clone(fetcher), Arc::clone(cache)).unwrap())
}

fn spawn_run(poller: &Arc<TestPoller>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let poller = Arc::clone(poller);
    let cancel = cancel.clone();
    tokio::spawn(async move { poller.run(cancel).await })
}

async fn at(start: Instant, millis: u64) {
    sleep_until(start + Duration::from_millis(millis)).await;
}

// ============================================================================
// Poller
// ============================================================================

#[tokio::test(start_paused = true)]
async fn first_poll_is_immediate_and_watermark_flows() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 1), ("workspace2", 2)], &[]));
    fetcher.push_response(delta(&[("workspace2", 3)], &["workspace1"]));
    let cache = Arc::new(Cache::new());
    let poller = poller(config(10, BackoffConfig::default()), &fetcher, &cache);
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 1).await;
    assert_eq!(fetcher.requests(), vec![Watermark::ZERO]);
    assert_eq!(cache.get().workspace_ids(), vec!["workspace1", "workspace2"]);
    assert_eq!(poller.watermark(), Watermark::at(ts(2)));
    assert_eq!(poller.state(), PollerState::Idle);

    at(start, 10_001).await;
    assert_eq!(
        fetcher.requests(),
        vec![Watermark::ZERO, Watermark::at(ts(2))]
    );
    assert_eq!(poller.watermark(), Watermark::at(ts(3)));
    assert_eq!(cache.get().workspace("workspace1"), Some(&workspace(1)));

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(poller.state(), PollerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failed_first_poll_waits_for_the_next_tick() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_error("connection refused");
    fetcher.push_response(delta(&[("workspace1", 1)], &[]));
    let cache = Arc::new(Cache::new());
    let backoff = BackoffConfig::constant(Duration::from_millis(100));
    let poller = poller(config(10, backoff), &fetcher, &cache);
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 5_000).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(poller.stats().retries, 0);
    assert!(poller.watermark().is_zero());

    at(start, 10_001).await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(poller.watermark(), Watermark::at(ts(1)));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn backoff_is_bounded_by_the_retry_limit() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    let cache = Arc::new(Cache::new());
    let backoff = BackoffConfig::constant(Duration::from_millis(100))
        .with_max_elapsed_time(None)
        .with_max_retries(Some(3));
    let poller = poller(
        config(10, backoff).with_poll_on_start(false),
        &fetcher,
        &cache,
    );
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 9_000).await;
    assert_eq!(fetcher.calls(), 0);

    // Tick at 10s, retries at 10.1s, 10.2s and 10.3s.
    at(start, 10_500).await;
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(poller.state(), PollerState::GivenUp);
    let stats = poller.stats();
    assert_eq!(stats.polls, 4);
    assert_eq!(stats.failures, 4);
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.episodes_given_up, 1);
    assert!(stats.last_error.unwrap().contains("no scripted response left"));

    // The next episode starts a full interval after giving up.
    at(start, 20_200).await;
    assert_eq!(fetcher.calls(), 4);
    at(start, 20_350).await;
    assert_eq!(fetcher.calls(), 5);
    assert_eq!(poller.state(), PollerState::Backoff { attempt: 1 });

    cancel.cancel();
    task.await.unwrap();
    assert!(poller.watermark().is_zero());
}

#[tokio::test(start_paused = true)]
async fn success_during_backoff_resumes_the_interval() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_error("timeout");
    fetcher.push_error("timeout");
    fetcher.push_response(delta(&[("workspace1", 1)], &[]));
    let cache = Arc::new(Cache::new());
    let backoff = BackoffConfig::constant(Duration::from_secs(1)).with_max_retries(Some(5));
    let poller = poller(
        config(10, backoff).with_poll_on_start(false),
        &fetcher,
        &cache,
    );
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 12_500).await;
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(poller.state(), PollerState::Idle);
    assert_eq!(poller.watermark(), Watermark::at(ts(1)));
    let stats = poller.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.changes, 1);
    assert!(stats.last_error.is_none());

    at(start, 21_500).await;
    assert_eq!(fetcher.calls(), 3);
    at(start, 22_500).await;
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(fetcher.requests()[3], Watermark::at(ts(1)));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_merge_keeps_the_watermark() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 1)], &[]));
    fetcher.push_response(delta(&[("workspace2", 5)], &["workspace9"]));
    let cache = Arc::new(Cache::new());
    let poller = poller(config(10, BackoffConfig::no_retry()), &fetcher, &cache);
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 10_001).await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(poller.watermark(), Watermark::at(ts(1)));
    assert_eq!(cache.get().workspace_ids(), vec!["workspace1"]);
    let stats = poller.stats();
    assert_eq!(stats.failures, 1);
    assert!(stats.last_error.unwrap().contains("workspace9"));

    at(start, 20_001).await;
    assert_eq!(fetcher.requests()[2], Watermark::at(ts(1)));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    let cache = Arc::new(Cache::new());
    let backoff = BackoffConfig::constant(Duration::from_secs(3_600)).with_max_elapsed_time(None);
    let poller = poller(
        config(1, backoff).with_poll_on_start(false),
        &fetcher,
        &cache,
    );
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 1_500).await;
    assert_eq!(fetcher.calls(), 1);
    assert!(poller.state().is_backing_off());

    cancel.cancel();
    tokio::time::timeout(Duration::from_millis(10), task)
        .await
        .expect("poller ignored cancellation")
        .unwrap();
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(poller.state(), PollerState::Stopped);
}

struct HangingFetcher;

impl DeltaFetcher<WorkspaceConfigs> for HangingFetcher {
    async fn fetch(
        &self,
        _target: &mut WorkspaceConfigs,
        _updated_after: Watermark,
    ) -> Result<(), FetchError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_an_inflight_fetch() {
    let cache = Arc::new(Cache::new());
    let poller = Arc::new(
        Poller::<WorkspaceConfigs, _, _>::new(
            PollerConfig::default(),
            HangingFetcher,
            Arc::clone(&cache),
        )
        .unwrap(),
    );
    let cancel = CancellationToken::new();
    let task = {
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(poller.state(), PollerState::Polling);

    cancel.cancel();
    tokio::time::timeout(Duration::from_millis(10), task)
        .await
        .expect("poller ignored cancellation")
        .unwrap();
    assert_eq!(poller.stats().polls, 0);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_every_attempt() {
    let start = Instant::now();
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 1)], &[]));
    fetcher.push_response(delta(&[], &["workspace1"]));
    let cache = Arc::new(Cache::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let poller = {
        let seen = Arc::clone(&seen);
        Arc::new(
            Poller::<WorkspaceConfigs, _, _>::new(
                config(10, BackoffConfig::no_retry()),
                Arc::clone(&fetcher),
                Arc::clone(&cache),
            )
            .unwrap()
            .on_response(move |changed, err: Option<&SyncError>| {
                seen.lock().push((changed, err.map(ToString::to_string)));
            }),
        )
    };
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 20_001).await;
    cancel.cancel();
    task.await.unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], (true, None));
    assert_eq!(seen[1], (false, None));
    assert!(!seen[2].0);
    assert!(seen[2]
        .1
        .as_deref()
        .unwrap()
        .starts_with("failed to get updated workspace configs"));
    assert_eq!(poller.watermark(), Watermark::at(ts(1)));
}

#[tokio::test]
async fn poll_once_outside_the_loop() {
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 4)], &[]));
    let cache = Arc::new(Cache::new());
    let outcome = poller(PollerConfig::default(), &fetcher, &cache)
        .poll_once()
        .await
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.watermark, Watermark::at(ts(4)));
    assert_eq!(cache.watermark(), Watermark::at(ts(4)));
}

#[tokio::test]
async fn resumes_from_a_persisted_snapshot() {
    let seeded = Cache::new();
    seeded
        .set(delta(&[("workspace1", 1), ("workspace2", 2)], &[]))
        .await
        .unwrap();
    let persisted = seeded.get().to_json().unwrap();
    let watermark = seeded.watermark();

    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace2", 3)], &["workspace1"]));
    let snapshot = WorkspaceConfigs::from_json(&persisted).unwrap();
    let cache = Arc::new(Cache::new().with_snapshot(snapshot, watermark));
    let poller = Arc::new(
        TestPoller::new(PollerConfig::default(), Arc::clone(&fetcher), Arc::clone(&cache))
            .unwrap()
            .with_watermark(watermark),
    );

    let outcome = poller.poll_once().await.unwrap();
    assert!(outcome.changed);
    assert_eq!(fetcher.requests(), vec![Watermark::at(ts(2))]);
    assert_eq!(cache.get().workspace("workspace1"), Some(&workspace(1)));
    assert_eq!(cache.get().workspace("workspace2"), Some(&workspace(3)));
    assert_eq!(poller.watermark(), Watermark::at(ts(3)));
}

#[tokio::test]
async fn persisted_watermark_without_the_snapshot_is_rejected() {
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace2", 3)], &["workspace1"]));
    let cache = Arc::new(Cache::new());
    let poller = Arc::new(
        TestPoller::new(PollerConfig::default(), Arc::clone(&fetcher), Arc::clone(&cache))
            .unwrap()
            .with_watermark(Watermark::at(ts(2))),
    );

    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Diff(DiffError::InconsistentDelta { .. })
    ));
    assert_eq!(poller.watermark(), Watermark::at(ts(2)));
    assert!(cache.get().workspace_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_notification_keeps_the_merge() {
    let start = Instant::now();
    let cache = Arc::new(Cache::new());
    let mut subscription = cache.subscribe();
    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();

    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 2)], &[]));
    let poller = Arc::new(
        TestPoller::new(
            config(10, BackoffConfig::no_retry()),
            Arc::clone(&fetcher),
            Arc::clone(&cache),
        )
        .unwrap()
        .with_watermark(Watermark::at(ts(1))),
    );
    let cancel = CancellationToken::new();
    let task = spawn_run(&poller, &cancel);

    at(start, 1).await;
    assert_eq!(cache.watermark(), Watermark::at(ts(2)));
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(cache.get().workspace("workspace1"), Some(&workspace(2)));
    assert_eq!(poller.watermark(), Watermark::at(ts(1)));
    assert_eq!(subscription.recv().await.unwrap().sequence, 1);
    assert!(subscription.try_recv().is_none());
}

#[test]
fn poller_rejects_invalid_config() {
    let fetcher = Arc::new(Fetcher::new());
    let cache = Arc::new(Cache::new());
    let result = Poller::<WorkspaceConfigs, _, _>::new(
        PollerConfig::new(Duration::ZERO),
        Arc::clone(&fetcher),
        Arc::clone(&cache),
    );
    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn subscribers_get_one_notification_per_merge_in_order() {
    let cache = Cache::with_buffer(8);
    let mut first = cache.subscribe();
    let mut second = cache.subscribe();

    cache
        .set(delta(&[("workspace1", 1), ("workspace2", 2)], &[]))
        .await
        .unwrap();
    cache
        .set(delta(&[], &["workspace1", "workspace2"]))
        .await
        .unwrap();
    let err = cache.set(delta(&[], &["workspace3"])).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Diff(DiffError::InconsistentDelta { .. })
    ));

    for subscription in [&mut first, &mut second] {
        let one = subscription.recv().await.unwrap();
        assert_eq!(one.sequence, 1);
        assert!(one.changed);
        assert_eq!(one.watermark, Watermark::at(ts(2)));

        let two = subscription.recv().await.unwrap();
        assert_eq!(two.sequence, 2);
        assert!(!two.changed);
        assert_eq!(two.watermark, Watermark::at(ts(2)));

        assert!(subscription.try_recv().is_none());
    }
}

#[tokio::test]
async fn reads_are_snapshots() {
    let cache = Cache::new();
    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();

    let mut snapshot = cache.get();
    snapshot.workspaces.remove(&"workspace1".to_string());
    assert_eq!(cache.get().workspace_ids(), vec!["workspace1"]);

    let before = cache.get();
    cache
        .set(delta(&[("workspace2", 2)], &[]))
        .await
        .unwrap();
    assert_eq!(before.workspace_ids(), vec!["workspace1"]);
    assert_eq!(cache.get().workspace_ids(), vec!["workspace2"]);
}

#[tokio::test(start_paused = true)]
async fn slow_subscriber_holds_back_the_next_merge() {
    let cache = Arc::new(Cache::new());
    let mut subscription = cache.subscribe();

    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();

    let second = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.set(delta(&[("workspace1", 2)], &[])).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!second.is_finished());

    assert_eq!(subscription.recv().await.unwrap().sequence, 1);
    second.await.unwrap().unwrap();
    assert_eq!(subscription.recv().await.unwrap().sequence, 2);
}

#[tokio::test]
async fn closed_subscribers_are_pruned() {
    let cache = Cache::new();
    let mut kept = cache.subscribe();
    let dropped = cache.subscribe();
    assert_eq!(cache.subscriber_count(), 2);

    drop(dropped);
    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();

    assert_eq!(cache.subscriber_count(), 1);
    assert_eq!(kept.recv().await.unwrap().sequence, 1);
}

#[tokio::test]
async fn reset_requires_a_full_snapshot() {
    let cache = Cache::new();
    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();

    cache.reset().await;
    assert!(cache.get().workspace_ids().is_empty());
    assert!(cache.watermark().is_zero());

    let err = cache.set(delta(&[], &["workspace1"])).await.unwrap_err();
    assert!(matches!(err, SyncError::Diff(_)));

    cache
        .set(delta(&[("workspace1", 1)], &[]))
        .await
        .unwrap();
    assert_eq!(cache.watermark(), Watermark::at(ts(1)));
}

// ============================================================================
// Service
// ============================================================================

#[tokio::test(start_paused = true)]
async fn config_sync_end_to_end() {
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 1), ("workspace2", 2)], &[]));
    fetcher.push_response(delta(&[("workspace3", 3)], &["workspace1"]));

    let options = SyncOptions::default().with_poller(config(10, BackoffConfig::no_retry()));
    let mut sync: ConfigSync<WorkspaceConfigs, _> =
        ConfigSync::start(Arc::clone(&fetcher), options).unwrap();
    let mut updates = sync.subscribe();
    assert!(sync.is_running());

    let first = updates.recv().await.unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(sync.get().workspace_ids(), vec!["workspace1", "workspace2"]);

    let second = updates.recv().await.unwrap();
    assert_eq!(second.sequence, 2);
    assert_eq!(second.watermark, Watermark::at(ts(3)));
    assert_eq!(sync.get().workspace_ids(), vec!["workspace1", "workspace3"]);
    assert_eq!(sync.watermark(), Watermark::at(ts(3)));
    assert_eq!(sync.stats().successes, 2);

    sync.close(Duration::from_secs(1)).await.unwrap();
    assert!(!sync.is_running());
    assert_eq!(sync.state(), PollerState::Stopped);
    sync.close(Duration::from_secs(1)).await.unwrap();
    assert_eq!(fetcher.requests(), vec![Watermark::ZERO, Watermark::at(ts(2))]);
}

#[tokio::test(start_paused = true)]
async fn dropping_config_sync_stops_polling() {
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace1", 1)], &[]));
    let options = SyncOptions::default().with_poller(config(10, BackoffConfig::no_retry()));
    let sync: ConfigSync<WorkspaceConfigs, _> =
        ConfigSync::start(Arc::clone(&fetcher), options).unwrap();
    let mut updates = sync.subscribe();
    updates.recv().await.unwrap();

    drop(sync);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetcher.calls(), 1);
    assert!(updates.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn config_sync_resumes_from_persisted_state() {
    let fetcher = Arc::new(Fetcher::new());
    fetcher.push_response(delta(&[("workspace3", 3)], &["workspace1", "workspace2"]));
    let snapshot = delta(&[("workspace1", 1), ("workspace2", 2)], &[]);

    let options = SyncOptions::default().with_poller(config(10, BackoffConfig::no_retry()));
    let mut sync: ConfigSync<WorkspaceConfigs, _> = ConfigSync::resume(
        Arc::clone(&fetcher),
        options,
        snapshot,
        Watermark::at(ts(2)),
    )
    .unwrap();
    let mut updates = sync.subscribe();

    let first = updates.recv().await.unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.watermark, Watermark::at(ts(3)));
    assert_eq!(
        sync.get().workspace_ids(),
        vec!["workspace1", "workspace2", "workspace3"]
    );
    assert_eq!(fetcher.requests(), vec![Watermark::at(ts(2))]);
    assert_eq!(sync.stats().failures, 0);

    sync.close(Duration::from_secs(1)).await.unwrap();
}

#[test]
fn config_sync_rejects_invalid_options() {
    let options = SyncOptions::default().with_notification_buffer(0);
    let result: Result<ConfigSync<WorkspaceConfigs, _>, _> =
        ConfigSync::start(Arc::new(Fetcher::new()), options);
    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}

#[test]
fn config_sync_needs_a_runtime() {
    let result: Result<ConfigSync<WorkspaceConfigs, _>, _> =
        ConfigSync::start(Arc::new(Fetcher::new()), SyncOptions::default());
    assert!(matches!(result, Err(SyncError::Task(_))));
}
