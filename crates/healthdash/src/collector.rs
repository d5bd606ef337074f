//! Incremental collection from a health source into storage.
//!
//! Each method keeps its own sync cursor. A collection pass fetches records
//! starting at the cursor, stores them with de-duplication and moves the
//! cursor to the newest record seen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::gateway::HealthSource;
use crate::record::HealthRecord;
use crate::storage::Storage;

/// Result of collecting one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectOutcome {
    /// Method collected.
    pub method: String,
    /// Records returned by the source.
    pub fetched: usize,
    /// Records stored for the first time.
    pub inserted: usize,
    /// Records that replaced a stored copy.
    pub updated: usize,
    /// Cursor after this pass.
    pub since: DateTime<Utc>,
}

/// A method that failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodFailure {
    /// Method that failed.
    pub method: String,
    /// Rendered error.
    pub error: String,
}

/// Summary of one pass over all configured methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// When the cycle began.
    pub started_at: DateTime<Utc>,
    /// Methods that were collected.
    pub outcomes: Vec<CollectOutcome>,
    /// Methods that failed.
    pub failures: Vec<MethodFailure>,
}

impl CycleReport {
    /// Total records fetched across methods.
    #[must_use]
    pub fn total_fetched(&self) -> usize {
        self.outcomes.iter().map(|o| o.fetched).sum()
    }

    /// Total records newly stored across methods.
    #[must_use]
    pub fn total_inserted(&self) -> usize {
        self.outcomes.iter().map(|o| o.inserted).sum()
    }

    /// True when no method failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A cloneable handle used to stop a running collector.
#[derive(Debug, Clone, Default)]
pub struct CollectorHandle {
    stop_signal: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CollectorHandle {
    /// Create a new collector handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the collector to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Resolve once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.should_stop() {
                return;
            }
            notified.await;
        }
    }
}

/// Drives collection from a [`HealthSource`] into [`Storage`].
#[derive(Debug)]
pub struct Collector<S> {
    source: S,
    storage: Storage,
    config: CollectorConfig,
    retention: Option<chrono::Duration>,
}

impl<S: HealthSource> Collector<S> {
    /// Create a collector.
    pub fn new(source: S, storage: Storage, config: CollectorConfig) -> Self {
        Self {
            source,
            storage,
            config,
            retention: None,
        }
    }

    /// Prune records older than `max_age` after every cycle.
    #[must_use]
    pub fn with_retention(mut self, max_age: Option<Duration>) -> Self {
        self.retention = max_age.and_then(|d| chrono::Duration::from_std(d).ok());
        self
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn initial_cursor(&self) -> Result<DateTime<Utc>> {
        let hours = self.config.initial_lookback_hours;
        chrono::Duration::try_hours(i64::from(hours))
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .ok_or_else(|| Error::InvalidTimeSpec {
                input: format!("{hours}h"),
            })
    }

    /// Collect one method.
    ///
    /// The cursor only moves when the source returned records; it is set to
    /// the `end` (or `start`) of the newest one.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching or storing fails. The cursor is left
    /// untouched in that case.
    pub async fn collect_once(&self, method: &str) -> Result<CollectOutcome> {
        let since = match self.storage.sync_cursor(method)? {
            Some(cursor) => cursor,
            None => self.initial_cursor()?,
        };

        let mut records = self.source.fetch(method, since).await?;
        records.sort_by_key(HealthRecord::cursor_time);

        let summary = self.storage.upsert_records(method, &records)?;

        let since = match records.last() {
            Some(newest) => {
                let cursor = newest.cursor_time();
                self.storage.set_sync_cursor(method, cursor)?;
                cursor
            }
            None => since,
        };

        Ok(CollectOutcome {
            method: method.to_string(),
            fetched: records.len(),
            inserted: summary.inserted,
            updated: summary.updated,
            since,
        })
    }

    /// Collect every method in `methods`.
    ///
    /// A failing method is logged and recorded; the remaining methods are
    /// still collected.
    pub async fn run_cycle(&self, methods: &[String]) -> CycleReport {
        let started_at = Utc::now();
        let mut report = CycleReport {
            started_at,
            outcomes: Vec::with_capacity(methods.len()),
            failures: Vec::new(),
        };

        for method in methods {
            match self.collect_once(method).await {
                Ok(outcome) => {
                    info!(
                        method = %outcome.method,
                        fetched = outcome.fetched,
                        inserted = outcome.inserted,
                        since = %outcome.since,
                        "Collected"
                    );
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(method = %method, source = self.source.name(), "Collection failed: {}", e);
                    report.failures.push(MethodFailure {
                        method: method.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(max_age) = self.retention {
            match self.storage.prune_older_than(max_age) {
                Ok(pruned) if pruned > 0 => debug!(pruned, "Pruned after cycle"),
                Ok(_) => {}
                Err(e) => warn!("Pruning failed: {}", e),
            }
        }

        report
    }

    /// Run cycles every `tick_seconds` until stopped or interrupted.
    ///
    /// The first cycle starts immediately. Ctrl-C and
    /// [`CollectorHandle::stop`] both end the loop, also mid-cycle. A
    /// method's records and cursor are written with no await point between
    /// them, so an interrupted cycle never leaves a method half-written.
    ///
    /// # Errors
    ///
    /// Currently infallible; per-method errors are reported in the cycle log.
    pub async fn run(&self, methods: &[String], handle: &CollectorHandle) -> Result<()> {
        let tick = Duration::from_secs(self.config.tick_seconds.max(1));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!(
            source = self.source.name(),
            methods = methods.len(),
            tick_seconds = tick.as_secs(),
            "Collector started"
        );

        let mut cycles: u64 = 0;
        loop {
            if handle.should_stop() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut ctrl_c => {
                    info!("Interrupt received");
                    break;
                }
                () = handle.stopped() => break,
            }

            tokio::select! {
                report = self.run_cycle(methods) => {
                    cycles += 1;
                    info!(
                        cycle = cycles,
                        fetched = report.total_fetched(),
                        inserted = report.total_inserted(),
                        failed = report.failures.len(),
                        "Cycle finished"
                    );
                }
                _ = &mut ctrl_c => {
                    info!("Interrupt received during cycle");
                    break;
                }
                () = handle.stopped() => break,
            }
        }

        info!(cycles, "Collector stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockSource {
        responses: Mutex<HashMap<String, Vec<Value>>>,
        failing: Vec<String>,
        calls: Mutex<Vec<(String, DateTime<Utc>)>>,
        stop_on_fetch: Option<CollectorHandle>,
    }

    impl MockSource {
        fn respond(&self, method: &str, items: Vec<Value>) {
            self.responses
                .lock()
                .unwrap()
                .insert(method.to_string(), items);
        }

        fn calls(&self) -> Vec<(String, DateTime<Utc>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl HealthSource for MockSource {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch(&self, method: &str, since: DateTime<Utc>) -> Result<Vec<HealthRecord>> {
            self.calls.lock().unwrap().push((method.to_string(), since));
            if let Some(handle) = &self.stop_on_fetch {
                handle.stop();
            }
            if self.failing.iter().any(|m| m == method) {
                return Err(Error::gateway_status(500, format!("/api/v2/fetch/{method}"), "down"));
            }
            let items = self
                .responses
                .lock()
                .unwrap()
                .get(method)
                .cloned()
                .unwrap_or_default();
            Ok(items
                .iter()
                .filter_map(|item| HealthRecord::from_gateway(item, Utc::now()))
                .collect())
        }
    }

    fn collector(source: MockSource) -> Collector<MockSource> {
        Collector::new(
            source,
            Storage::open_in_memory().unwrap(),
            CollectorConfig::default(),
        )
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 23, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_collect_uses_initial_lookback() {
        let c = collector(MockSource::default());

        let before = Utc::now();
        let outcome = c.collect_once("steps").await.unwrap();

        let since = c.source().calls()[0].1;
        let expected = before - chrono::Duration::hours(24);
        assert!((since - expected).num_seconds().abs() <= 5);
        assert_eq!(outcome.fetched, 0);
        assert_eq!(outcome.since, since);
    }

    #[tokio::test]
    async fn test_out_of_range_lookback_fails_without_fetching() {
        let config = CollectorConfig {
            initial_lookback_hours: u32::MAX,
            ..CollectorConfig::default()
        };
        let c = Collector::new(
            MockSource::default(),
            Storage::open_in_memory().unwrap(),
            config,
        );

        let err = c.collect_once("steps").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimeSpec { .. }));
        assert!(c.source().calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_fetch_leaves_cursor_unset() {
        let c = collector(MockSource::default());
        c.collect_once("steps").await.unwrap();

        assert!(c.storage().sync_cursor("steps").unwrap().is_none());
        assert_eq!(c.storage().count(Some("steps")).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cursor_advances_to_newest_end_or_start() {
        let source = MockSource::default();
        source.respond(
            "steps",
            vec![
                json!({"_id": "b", "start": "2025-08-23T09:00:00Z", "end": "2025-08-23T09:30:00Z"}),
                json!({"_id": "c", "start": "2025-08-23T10:00:00Z"}),
                json!({"_id": "a", "start": "2025-08-23T08:00:00Z", "end": "2025-08-23T08:10:00Z"}),
            ],
        );
        let c = collector(source);

        let outcome = c.collect_once("steps").await.unwrap();

        assert_eq!(outcome.fetched, 3);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.since, ts(10, 0));
        assert_eq!(c.storage().sync_cursor("steps").unwrap(), Some(ts(10, 0)));
    }

    #[tokio::test]
    async fn test_second_collect_starts_at_cursor_and_dedups() {
        let source = MockSource::default();
        let item = json!({"_id": "a", "start": "2025-08-23T08:00:00Z", "end": "2025-08-23T08:10:00Z",
                          "data": {"steps": {"count": 10}}});
        source.respond("steps", vec![item]);
        let c = collector(source);

        c.collect_once("steps").await.unwrap();

        c.source().respond(
            "steps",
            vec![json!({"_id": "a", "start": "2025-08-23T08:00:00Z", "end": "2025-08-23T08:10:00Z",
                        "data": {"steps": {"count": 12}}})],
        );
        let outcome = c.collect_once("steps").await.unwrap();

        assert_eq!(c.source().calls()[1].1, ts(8, 10));
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.updated, 1);

        let stored = c.storage().records("steps").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value("steps", "count"), Some(12.0));
    }

    #[tokio::test]
    async fn test_cycle_continues_after_failure() {
        let source = MockSource {
            failing: vec!["heartRate".to_string()],
            ..MockSource::default()
        };
        source.respond("steps", vec![json!({"_id": "s1", "start": "2025-08-23T08:00:00Z"})]);
        source.respond("distance", vec![json!({"_id": "d1", "start": "2025-08-23T08:00:00Z"})]);
        let c = collector(source);

        let methods = vec![
            "steps".to_string(),
            "heartRate".to_string(),
            "distance".to_string(),
        ];
        let report = c.run_cycle(&methods).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].method, "heartRate");
        assert!(report.failures[0].error.contains("500"));
        assert!(!report.is_clean());
        assert_eq!(report.total_fetched(), 2);
        assert!(c.storage().sync_cursor("heartRate").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cycle_prunes_with_retention() {
        let source = MockSource::default();
        let old = (Utc::now() - chrono::Duration::days(10)).to_rfc3339();
        let new = Utc::now().to_rfc3339();
        source.respond(
            "steps",
            vec![json!({"_id": "old", "start": old}), json!({"_id": "new", "start": new})],
        );
        let c = collector(source).with_retention(Some(Duration::from_secs(7 * 24 * 3600)));

        c.run_cycle(&["steps".to_string()]).await;

        let stored = c.storage().records("steps").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, "new");
    }

    #[tokio::test]
    async fn test_run_returns_when_already_stopped() {
        let c = collector(MockSource::default());
        let handle = CollectorHandle::new();
        handle.stop();

        c.run(&["steps".to_string()], &handle).await.unwrap();
        assert!(c.source().calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let handle = CollectorHandle::new();
        let source = MockSource {
            stop_on_fetch: Some(handle.clone()),
            ..MockSource::default()
        };
        let c = collector(source);

        tokio::time::timeout(
            Duration::from_secs(5),
            c.run(&["steps".to_string()], &handle),
        )
        .await
        .expect("collector did not stop")
        .unwrap();

        assert_eq!(c.source().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_stopped_resolves_after_stop() {
        let handle = CollectorHandle::new();
        let waiter = handle.clone();

        let (_, ()) = tokio::join!(async { handle.stop() }, waiter.stopped());
        assert!(waiter.should_stop());
    }

    #[test]
    fn test_handle_clone_shares_signal() {
        let a = CollectorHandle::new();
        let b = a.clone();

        a.stop();
        assert!(b.should_stop());

        b.reset();
        assert!(!a.should_stop());
    }
}
