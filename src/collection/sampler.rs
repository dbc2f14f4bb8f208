// =============================================================================
// Snapshot Sampler — fixed-cadence order-book collection
// =============================================================================
//
// Runs a single task that, for every tick of a fixed-grid schedule:
//   1. sleeps until the tick's target (never a negative sleep),
//   2. fetches the book through the connector, bounded by a timeout,
//   3. derives the snapshot fields and appends to the series.
//
// Fetch failures, timeouts and crossed books are soft: they are counted and logged and the loop moves on
// to the next tick without backoff. A run that captures nothing is reported
// as `CollectionError::NoSnapshots`, never as an empty success.
//
// The stop flag is only consulted at tick boundaries; an in-flight fetch is
// never interrupted by it.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::schedule::TickSchedule;
use crate::exchange::OrderBookSource;
use crate::runtime_config::AppConfig;
use crate::types::{Snapshot, SnapshotSeries, DEEP_LEVELS};

// =============================================================================
// Settings / results
// =============================================================================

/// Parameters of one collection run.
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub symbol: String,
    pub depth: usize,
    pub interval: Duration,
    pub duration: Duration,
    pub fetch_timeout: Duration,
}

impl SamplerSettings {
    pub fn from_config(config: &AppConfig, duration: Duration) -> Self {
        Self {
            symbol: config.symbol.clone(),
            depth: config.depth,
            interval: config.interval(),
            duration,
            fetch_timeout: config.fetch_timeout(),
        }
    }

    /// Approximate number of ticks the run will attempt.
    pub fn expected_snapshots(&self) -> u128 {
        if self.interval.is_zero() {
            return 0;
        }
        self.duration.as_nanos() / self.interval.as_nanos()
    }

    fn validate(&self) -> Result<(), CollectionError> {
        if self.interval.is_zero() {
            return Err(CollectionError::InvalidSettings(
                "interval must be positive".into(),
            ));
        }
        if self.duration.is_zero() {
            return Err(CollectionError::InvalidSettings(
                "duration must be positive".into(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(CollectionError::InvalidSettings(
                "fetch timeout must be positive".into(),
            ));
        }
        if self.depth < DEEP_LEVELS {
            return Err(CollectionError::InvalidSettings(format!(
                "depth {} is below the {DEEP_LEVELS} levels the snapshot metrics need",
                self.depth
            )));
        }
        Ok(())
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub snapshots: usize,
    pub errors: usize,
    /// Ticks that started more than one interval behind their target.
    pub late_ticks: usize,
}

impl CollectionSummary {
    /// snapshots / (snapshots + errors); 0.0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.snapshots + self.errors;
        if attempts == 0 {
            0.0
        } else {
            self.snapshots as f64 / attempts as f64
        }
    }
}

/// A completed run with at least one snapshot.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub series: SnapshotSeries,
    pub summary: CollectionSummary,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("no snapshots collected ({errors} failed fetches)")]
    NoSnapshots { errors: usize },

    #[error("invalid sampler settings: {0}")]
    InvalidSettings(String),
}

// =============================================================================
// Sampler
// =============================================================================

pub struct Sampler<'a> {
    source: &'a dyn OrderBookSource,
    settings: SamplerSettings,
    stop: Arc<AtomicBool>,
}

impl<'a> Sampler<'a> {
    pub fn new(source: &'a dyn OrderBookSource, settings: SamplerSettings) -> Self {
        Self {
            source,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned stop flag.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sample the book until `duration` elapses or a stop is requested.
    pub async fn run(&self) -> Result<CollectionRun, CollectionError> {
        let settings = &self.settings;
        settings.validate()?;

        info!(
            exchange = %self.source.name(),
            symbol = %settings.symbol,
            duration_secs = settings.duration.as_secs_f64(),
            interval_secs = settings.interval.as_secs_f64(),
            expected_snapshots = settings.expected_snapshots() as u64,
            "starting data collection"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let end = start.checked_add(settings.duration).ok_or_else(|| {
            CollectionError::InvalidSettings("duration is out of range".into())
        })?;

        let mut schedule = TickSchedule::new(start, settings.interval);
        let mut series = SnapshotSeries::new();
        let mut summary = CollectionSummary::default();

        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            if self.stop_requested() {
                info!(tick = schedule.tick_index(), "stop requested, ending collection");
                break;
            }

            if schedule.is_behind(now) {
                summary.late_ticks += 1;
                warn!(
                    tick = schedule.tick_index(),
                    lag_secs = format!("{:.1}", schedule.lag(now).as_secs_f64()),
                    "running behind schedule"
                );
            }

            let wait = schedule.delay(now);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
                if Instant::now() >= end {
                    break;
                }
                if self.stop_requested() {
                    info!(tick = schedule.tick_index(), "stop requested, ending collection");
                    break;
                }
            }

            self.tick(start, started_at, end, &mut series, &mut summary)
                .await;
            schedule.advance();
        }

        info!(
            snapshots = summary.snapshots,
            errors = summary.errors,
            late_ticks = summary.late_ticks,
            success_rate_pct = format!("{:.1}", summary.success_rate() * 100.0),
            "collection complete"
        );

        if series.is_empty() {
            error!(errors = summary.errors, "no snapshots collected");
            return Err(CollectionError::NoSnapshots {
                errors: summary.errors,
            });
        }

        Ok(CollectionRun {
            series,
            summary,
            started_at,
        })
    }

    /// One fetch + append. Every failure is counted, none is propagated.
    async fn tick(
        &self,
        start: Instant,
        started_at: DateTime<Utc>,
        end: Instant,
        series: &mut SnapshotSeries,
        summary: &mut CollectionSummary,
    ) {
        let settings = &self.settings;
        let fetched = tokio::time::timeout(
            settings.fetch_timeout,
            self.source.fetch(&settings.symbol, settings.depth),
        )
        .await;

        let book = match fetched {
            Ok(Ok(book)) => book,
            Ok(Err(e)) => {
                summary.errors += 1;
                warn!(error = %e, total_errors = summary.errors, "failed to fetch snapshot");
                return;
            }
            Err(_) => {
                summary.errors += 1;
                warn!(
                    timeout_secs = settings.fetch_timeout.as_secs_f64(),
                    total_errors = summary.errors,
                    "snapshot fetch timed out"
                );
                return;
            }
        };

        if let Err(e) = book.check_not_crossed() {
            summary.errors += 1;
            warn!(error = %e, total_errors = summary.errors, "snapshot rejected");
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(start);
        let timestamp = started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let snapshot = Snapshot::from_book(settings.symbol.clone(), timestamp, &book);

        let (spread_bps, mid_price, imbalance) =
            (snapshot.spread_bps, snapshot.mid_price, snapshot.imbalance_5);

        if let Err(e) = series.push(snapshot) {
            summary.errors += 1;
            warn!(error = %e, total_errors = summary.errors, "snapshot dropped");
            return;
        }
        summary.snapshots += 1;

        info!(
            n = summary.snapshots,
            spread_bps = ?spread_bps,
            mid = ?mid_price,
            imbalance = ?imbalance,
            elapsed_secs = elapsed.as_secs(),
            remaining_secs = end.saturating_duration_since(now).as_secs(),
            "snapshot"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookLevel, OrderBookDepth};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const MS: Duration = Duration::from_millis(1);

    /// Connector double that records call instants and can be slow or flaky.
    struct ScriptedSource {
        calls: Mutex<Vec<Instant>>,
        delay: Duration,
        fail: fn(usize) -> bool,
        book: fn(usize) -> OrderBookDepth,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl ScriptedSource {
        fn new(delay: Duration, fail: fn(usize) -> bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                delay,
                fail,
                book: |_| book(),
                stop_after: None,
            }
        }

        fn call_offsets(&self, start: Instant) -> Vec<Duration> {
            self.calls.lock().iter().map(|t| *t - start).collect()
        }
    }

    fn book() -> OrderBookDepth {
        let bids = (0..10).map(|i| BookLevel::new(100.0 - i as f64, 1.0)).collect();
        let asks = (0..10).map(|i| BookLevel::new(101.0 + i as f64, 2.0)).collect();
        OrderBookDepth::new(bids, asks)
    }

    #[async_trait]
    impl OrderBookSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn initialise(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, _symbol: &str, _depth: usize) -> Result<OrderBookDepth> {
            let index = {
                let mut calls = self.calls.lock();
                calls.push(Instant::now());
                calls.len() - 1
            };
            if let Some((n, flag)) = &self.stop_after {
                if index + 1 >= *n {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if (self.fail)(index) {
                anyhow::bail!("scripted failure on call {index}");
            }
            Ok((self.book)(index))
        }
    }

    fn settings(interval: Duration, duration: Duration) -> SamplerSettings {
        SamplerSettings {
            symbol: "BTC/USDT".into(),
            depth: 20,
            interval,
            duration,
            fetch_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_grid_and_derive_fields() {
        let source = ScriptedSource::new(Duration::ZERO, |_| false);
        let start = Instant::now();
        let run = Sampler::new(&source, settings(MS * 10, MS * 100))
            .run()
            .await
            .unwrap();

        assert_eq!(run.summary.snapshots, 10);
        assert_eq!(run.summary.errors, 0);
        let expected: Vec<Duration> = (0..10u32).map(|n| MS * (10 * n)).collect();
        assert_eq!(source.call_offsets(start), expected);

        let first = &run.series.snapshots()[0];
        assert_eq!(first.mid_price, Some(100.5));
        assert_eq!(first.imbalance_5, Some((5.0 - 10.0) / 15.0));
        let ts: Vec<_> = run.series.snapshots().iter().map(|s| s.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn soft_failures_are_counted_and_success_rate_is_exact() {
        // Every second call fails.
        let source = ScriptedSource::new(Duration::ZERO, |i| i % 2 == 1);
        let run = Sampler::new(&source, settings(MS * 10, MS * 100))
            .run()
            .await
            .unwrap();

        assert_eq!(run.summary.snapshots, 5);
        assert_eq!(run.summary.errors, 5);
        assert_eq!(run.series.len(), 5);
        assert_eq!(
            run.summary.success_rate(),
            run.summary.snapshots as f64 / (run.summary.snapshots + run.summary.errors) as f64
        );
        assert_eq!(run.summary.success_rate(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn crossed_books_are_soft_failures() {
        let mut source = ScriptedSource::new(Duration::ZERO, |_| false);
        source.book = |i| {
            if i % 2 == 0 {
                book()
            } else {
                OrderBookDepth::new(
                    (0..10).map(|l| BookLevel::new(102.0 - l as f64, 1.0)).collect(),
                    (0..10).map(|l| BookLevel::new(101.0 + l as f64, 1.0)).collect(),
                )
            }
        };
        let run = Sampler::new(&source, settings(MS * 10, MS * 100))
            .run()
            .await
            .unwrap();

        assert_eq!(run.summary.snapshots, 5);
        assert_eq!(run.summary.errors, 5);
        assert!(run
            .series
            .snapshots()
            .iter()
            .all(|s| s.spread.unwrap() >= 0.0 && s.spread_bps.unwrap() >= 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_signal_no_snapshots() {
        let source = ScriptedSource::new(Duration::ZERO, |_| true);
        let result = Sampler::new(&source, settings(MS * 10, MS * 50)).run().await;
        assert_eq!(result.unwrap_err(), CollectionError::NoSnapshots { errors: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_stays_anchored_to_the_grid() {
        // Each fetch takes 50ms against a 20ms interval.
        let source = ScriptedSource::new(MS * 50, |_| false);
        let start = Instant::now();
        let run = Sampler::new(&source, settings(MS * 20, MS * 200))
            .run()
            .await
            .unwrap();

        // No sleeping while late: each tick starts as soon as the previous
        // fetch returns. Re-anchoring to completion time would give 0/70/140.
        assert_eq!(
            source.call_offsets(start),
            vec![Duration::ZERO, MS * 50, MS * 100, MS * 150]
        );
        // Lags of 30, 60 and 90ms each exceed one interval.
        assert_eq!(run.summary.late_ticks, 3);
        assert_eq!(run.summary.snapshots, 4);
        assert_eq!(run.summary.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_is_a_soft_failure() {
        let source = ScriptedSource::new(MS * 50, |_| false);
        let mut s = settings(MS * 100, MS * 300);
        s.fetch_timeout = MS * 30;
        let result = Sampler::new(&source, s).run().await;
        assert_eq!(result.unwrap_err(), CollectionError::NoSnapshots { errors: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flag_ends_run_at_tick_boundary() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::new(Duration::ZERO, |_| false);
        source.stop_after = Some((3, stop.clone()));
        let run = Sampler::new(&source, settings(MS * 10, MS * 1000))
            .with_stop_flag(stop)
            .run()
            .await
            .unwrap();
        // The third fetch raises the flag but still completes.
        assert_eq!(run.summary.snapshots, 3);
        assert_eq!(source.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_collects_nothing() {
        let source = ScriptedSource::new(Duration::ZERO, |_| false);
        let stop = Arc::new(AtomicBool::new(true));
        let sampler = Sampler::new(&source, settings(MS * 10, MS * 100)).with_stop_flag(stop);
        assert_eq!(
            sampler.run().await.unwrap_err(),
            CollectionError::NoSnapshots { errors: 0 }
        );
        assert!(source.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_before_fetching() {
        let source = ScriptedSource::new(Duration::ZERO, |_| false);

        let zero_interval = settings(Duration::ZERO, MS * 100);
        let mut zero_timeout = settings(MS * 10, MS * 100);
        zero_timeout.fetch_timeout = Duration::ZERO;
        let mut shallow = settings(MS * 10, MS * 100);
        shallow.depth = DEEP_LEVELS - 1;
        let endless = settings(MS * 10, Duration::MAX);

        for s in [zero_interval, zero_timeout, shallow, endless] {
            let result = Sampler::new(&source, s).run().await;
            assert!(matches!(result, Err(CollectionError::InvalidSettings(_))));
        }
        assert!(source.calls.lock().is_empty());
    }

    #[test]
    fn success_rate_of_empty_summary_is_zero() {
        assert_eq!(CollectionSummary::default().success_rate(), 0.0);
        let s = CollectionSummary {
            snapshots: 3,
            errors: 1,
            late_ticks: 0,
        };
        assert_eq!(s.success_rate(), 0.75);
    }

    #[test]
    fn expected_snapshots_is_duration_over_interval() {
        let s = settings(Duration::from_secs(20), Duration::from_secs(3600));
        assert_eq!(s.expected_snapshots(), 180);
    }
}
