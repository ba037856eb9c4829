//! Extraction scheduler: the windowed polling loop.
//!
//! Each cycle selects evidence received after the cursor, dispatches every
//! row to its extractor and commits the results in page order. The cursor
//! then moves according to what the page looked like:
//!
//! | Page | `last_execution` | Interval |
//! |------|------------------|----------|
//! | empty | now − skew margin | base |
//! | complete | now − skew margin | fast |
//! | overflow | receipt time of the last row | fast |
//!
//! The cursor lives in memory only. On restart it is rewound by the
//! configured lookback; rows already marked `processed` are excluded by the
//! filter, so the replayed window is idempotent.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, SchedulerConfig, MAX_MINUTES_AGO, MAX_SKEW_MARGIN_SECS};
use crate::db;
use crate::dispatch::{Dispatch, DispatchResult, ExtractorRegistry};
use crate::persist::Committer;
use crate::store::sqlite::SqliteStore;
use crate::store::{EvidenceFilter, EvidencePage, ProcessedFilter, Store};

/// Empty cycles between two "no data" diagnostics.
const NO_DATA_REPORT_EVERY: u64 = 10;

/// Tunables for one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub base_interval: StdDuration,
    pub fast_interval: StdDuration,
    /// How far back the cursor starts on a cold start.
    pub lookback: Duration,
    /// Subtracted from "now" whenever the cursor follows the wall clock.
    pub skew_margin: Duration,
    pub page_size: usize,
    /// Restrict the run to one capture session. Implies single-shot.
    pub target_id: Option<String>,
    /// Re-process rows regardless of their `processed` flag.
    pub repeat: bool,
    pub single: bool,
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            base_interval: StdDuration::from_secs(config.frequency_secs),
            fast_interval: StdDuration::from_millis(config.fast_interval_ms),
            lookback: lookback_minutes(config.minutes_ago)?,
            skew_margin: skew_margin_secs(config.skew_margin_secs)?,
            page_size: config.page_size,
            target_id: None,
            repeat: false,
            single: false,
        })
    }

    pub fn single_shot(&self) -> bool {
        self.single || self.target_id.is_some()
    }
}

/// Cold-start lookback, bounded by [`MAX_MINUTES_AGO`].
pub fn lookback_minutes(minutes: i64) -> Result<Duration> {
    if !(0..=MAX_MINUTES_AGO).contains(&minutes) {
        bail!(
            "minutes ago must be between 0 and {}, got {}",
            MAX_MINUTES_AGO,
            minutes
        );
    }
    Duration::try_minutes(minutes).ok_or_else(|| anyhow!("lookback of {} minutes is out of range", minutes))
}

fn skew_margin_secs(secs: i64) -> Result<Duration> {
    if !(0..=MAX_SKEW_MARGIN_SECS).contains(&secs) {
        bail!(
            "skew margin must be between 0 and {} seconds, got {}",
            MAX_SKEW_MARGIN_SECS,
            secs
        );
    }
    Duration::try_seconds(secs).ok_or_else(|| anyhow!("skew margin of {} seconds is out of range", secs))
}

/// `now - by`, floored at the epoch.
fn rewind(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(by).unwrap_or(DateTime::UNIX_EPOCH)
}

/// What a fetched page means for the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageShape {
    Empty,
    /// Every matching row fit in the page.
    Complete,
    /// Position of the last row returned.
    Overflow {
        last_saving_time: DateTime<Utc>,
        last_id: String,
    },
}

impl PageShape {
    pub fn of(page: &EvidencePage) -> Self {
        match page.rows.last() {
            None => PageShape::Empty,
            Some(last) if page.overflow => PageShape::Overflow {
                last_saving_time: last.saving_time,
                last_id: last.id.clone(),
            },
            Some(_) => PageShape::Complete,
        }
    }
}

/// Process-local progress through the evidence timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub last_execution: DateTime<Utc>,
    /// Set after an overflow: rows stamped exactly `last_execution` with a
    /// greater id are still ahead of the cursor.
    pub last_id: Option<String>,
    pub no_data_streak: u64,
    pub computed_interval: StdDuration,
}

impl Cursor {
    /// Cursor for a fresh process: `now - lookback`, or the epoch when a
    /// single session is targeted.
    pub fn cold_start(now: DateTime<Utc>, options: &SchedulerOptions) -> Result<Self> {
        let last_execution = if options.target_id.is_some() {
            DateTime::UNIX_EPOCH
        } else {
            now.checked_sub_signed(options.lookback)
                .ok_or_else(|| anyhow!("lookback of {} reaches before the calendar", options.lookback))?
        };
        Ok(Self {
            last_execution,
            last_id: None,
            no_data_streak: 0,
            computed_interval: options.base_interval,
        })
    }

    pub fn advance(&mut self, shape: &PageShape, now: DateTime<Utc>, options: &SchedulerOptions) {
        match &shape {
            PageShape::Empty => {
                self.no_data_streak += 1;
                self.last_execution = rewind(now, options.skew_margin);
                self.last_id = None;
                self.computed_interval = options.base_interval;
            }
            PageShape::Complete => {
                self.last_execution = rewind(now, options.skew_margin);
                self.last_id = None;
                self.computed_interval = options.fast_interval;
            }
            PageShape::Overflow {
                last_saving_time,
                last_id,
            } => {
                self.last_execution = *last_saving_time;
                self.last_id = Some(last_id.clone());
                self.computed_interval = options.fast_interval;
            }
        }
    }
}

/// Diagnostics for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub usable: usize,
    pub skipped: usize,
    pub failed: usize,
    pub upserted: usize,
    pub write_errors: usize,
    pub overflow: bool,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: Arc<ExtractorRegistry>,
    committer: Committer,
    options: SchedulerOptions,
    cursor: Cursor,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ExtractorRegistry>,
        options: SchedulerOptions,
    ) -> Result<Self> {
        let cursor = Cursor::cold_start(Utc::now(), &options)?;
        Ok(Self {
            committer: Committer::new(store.clone()),
            store,
            registry,
            options,
            cursor,
        })
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Selection filter for the next cycle.
    pub fn filter(&self) -> EvidenceFilter {
        match self.options.target_id {
            Some(ref id) => EvidenceFilter {
                saved_after: Some(self.cursor.last_execution),
                after_id: self.cursor.last_id.clone(),
                processed: ProcessedFilter::Any,
                metadata_id: Some(id.clone()),
            },
            None => EvidenceFilter {
                saved_after: Some(self.cursor.last_execution),
                after_id: self.cursor.last_id.clone(),
                processed: if self.options.repeat {
                    ProcessedFilter::Any
                } else {
                    ProcessedFilter::Unprocessed
                },
                metadata_id: None,
            },
        }
    }

    /// Runs one fetch → dispatch → commit cycle.
    ///
    /// Fails only when the page cannot be fetched; extraction faults and
    /// individual write errors are counted in the report instead.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let filter = self.filter();
        let page = self
            .store
            .read_evidence(&filter, self.options.page_size)
            .await
            .context("failed to fetch evidence page")?;

        let shape = PageShape::of(&page);
        self.cursor.advance(&shape, Utc::now(), &self.options);

        let mut report = CycleReport {
            fetched: page.rows.len(),
            overflow: page.overflow,
            ..Default::default()
        };

        match shape {
            PageShape::Empty => {
                if self.cursor.no_data_streak % NO_DATA_REPORT_EVERY == 0 {
                    info!(
                        streak = self.cursor.no_data_streak,
                        filter = ?filter,
                        "no data at the last query"
                    );
                }
                return Ok(report);
            }
            PageShape::Complete => {
                debug!(matching = report.fetched, "fetched complete page");
            }
            PageShape::Overflow {
                last_saving_time, ..
            } => {
                info!(
                    first = %page.rows[0].saving_time,
                    last = %last_saving_time,
                    "overflow, cursor follows the last row"
                );
            }
        }

        let mut results = Vec::with_capacity(page.rows.len());
        for mut row in page.rows {
            debug!(
                "{} [{}] {} {}.{} {} {}",
                short(&row.id, 4),
                row.saving_time.format("%H:%M:%S"),
                short(&row.metadata_id, 6),
                row.packet,
                row.incremental,
                row.size,
                row.selector
            );

            let DispatchResult { url, outcome } = self.registry.dispatch(&row);
            match outcome {
                Dispatch::Extracted(_) => report.usable += 1,
                Dispatch::Skipped => report.skipped += 1,
                Dispatch::Failed(ref err) => {
                    report.failed += 1;
                    warn!(evidence = %row.id, selector = %row.selector, error = %err, "extraction failed");
                }
            }

            row.url_shape = Some(url.shape);
            results.push((row, outcome.into_metadata()));
        }

        let applied = self.committer.apply_all(&results).await;
        report.upserted = applied.upserted;
        report.write_errors = applied.write_errors;

        if report.usable > 0 {
            self.cursor.no_data_streak = 0;
        }

        info!(
            usable = report.usable,
            total = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            write_errors = report.write_errors,
            overflow = report.overflow,
            "cycle complete"
        );
        Ok(report)
    }

    /// Whether the loop ends after a cycle that produced `report`.
    pub fn should_stop(&self, report: &CycleReport) -> bool {
        self.options.single_shot() && !report.overflow
    }

    /// Polls until a single-shot run completes, or until a fetch fails.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let report = self.run_cycle().await?;
            if self.should_stop(&report) {
                info!("single execution done");
                return Ok(());
            }
            tokio::time::sleep(self.cursor.computed_interval).await;
        }
    }
}

fn short(s: &str, n: usize) -> &str {
    s.get(..n).unwrap_or(s)
}

/// Command-line overrides for `evd parse`.
#[derive(Debug, Clone, Default)]
pub struct ParseOverrides {
    pub frequency_secs: Option<u64>,
    pub minutes_ago: Option<i64>,
    pub id: Option<String>,
    pub repeat: bool,
    pub single: bool,
}

pub fn resolve_options(config: &Config, overrides: ParseOverrides) -> Result<SchedulerOptions> {
    let mut options = SchedulerOptions::from_config(&config.scheduler)?;
    if let Some(secs) = overrides.frequency_secs.filter(|s| *s > 0) {
        options.base_interval = StdDuration::from_secs(secs);
    }
    if let Some(minutes) = overrides.minutes_ago {
        options.lookback = lookback_minutes(minutes).context("invalid --minutes-ago")?;
    }
    options.target_id = overrides.id;
    options.repeat = overrides.repeat;
    options.single = overrides.single;
    Ok(options)
}

/// Entry point for `evd parse`.
pub async fn run_parse(config: &Config, overrides: ParseOverrides) -> Result<()> {
    let options = resolve_options(config, overrides)?;
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let registry = Arc::new(ExtractorRegistry::with_builtins());

    let mut scheduler = Scheduler::new(store, registry, options)?;
    info!(
        since = %scheduler.cursor().last_execution,
        target = ?scheduler.options().target_id,
        repeat = scheduler.options().repeat,
        single = scheduler.options().single_shot(),
        "scheduler starting"
    );
    scheduler.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Extractor, SelectorKey};
    use crate::error::ExtractionError;
    use crate::models::{Account, Evidence, Metadata, UrlShape, WriteResult};
    use crate::store::memory::InMemoryStore;
    use scraper::Html;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn options(page_size: usize) -> SchedulerOptions {
        SchedulerOptions {
            base_interval: StdDuration::from_millis(5),
            fast_interval: StdDuration::from_millis(1),
            lookback: Duration::minutes(10),
            skew_margin: Duration::minutes(2),
            page_size,
            target_id: None,
            repeat: false,
            single: false,
        }
    }

    fn row(i: usize, metadata_id: &str, saving_time: DateTime<Utc>) -> Evidence {
        Evidence {
            id: format!("row-{}", i),
            metadata_id: metadata_id.to_string(),
            href: "https://www.amazon.com/Kettle/dp/B000111".to_string(),
            public_key: "K".to_string(),
            client_time: saving_time,
            saving_time,
            html: format!("<div id=\"p{}\"></div>", i),
            size: 20,
            selector: "#dp".to_string(),
            incremental: i as i64,
            packet: i,
            is_product: true,
            tag: None,
            processed: None,
            url_shape: None,
        }
    }

    /// Records every row it sees; panics on the configured packet.
    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
        explode_on: Option<usize>,
    }

    impl Extractor for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn extract(&self, _: &Html, evidence: &Evidence) -> Result<Option<Value>, ExtractionError> {
            self.seen.lock().unwrap().push(evidence.id.clone());
            if self.explode_on == Some(evidence.packet) {
                panic!("variant fault on packet {}", evidence.packet);
            }
            Ok(Some(json!({ "packets": [evidence.packet] })))
        }
    }

    fn registry(seen: Arc<Mutex<Vec<String>>>, explode_on: Option<usize>) -> Arc<ExtractorRegistry> {
        let mut registry = ExtractorRegistry::new();
        registry.register(
            SelectorKey::Any,
            UrlShape::Product,
            Box::new(Recording { seen, explode_on }),
        );
        Arc::new(registry)
    }

    async fn seeded(n: usize, metadata_id: &str) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let base = Utc::now() - Duration::minutes(5);
        let rows: Vec<Evidence> = (0..n)
            .map(|i| row(i, metadata_id, base + Duration::seconds(i as i64)))
            .collect();
        store.write_evidence(&rows).await.unwrap();
        store
    }

    #[test]
    fn cursor_follows_page_shape() {
        let opts = options(10);
        let now = Utc::now();
        let mut cursor = Cursor::cold_start(now, &opts).unwrap();
        assert_eq!(cursor.last_execution, now - Duration::minutes(10));

        cursor.advance(&PageShape::Empty, now, &opts);
        assert_eq!(cursor.last_execution, now - Duration::minutes(2));
        assert_eq!(cursor.computed_interval, opts.base_interval);
        assert_eq!(cursor.no_data_streak, 1);

        let last = now - Duration::seconds(30);
        let overflow = PageShape::Overflow {
            last_saving_time: last,
            last_id: "row-3".to_string(),
        };
        cursor.advance(&overflow, now, &opts);
        assert_eq!(cursor.last_execution, last);
        assert_eq!(cursor.last_id.as_deref(), Some("row-3"));
        assert_eq!(cursor.computed_interval, opts.fast_interval);

        cursor.advance(&PageShape::Complete, now, &opts);
        assert_eq!(cursor.last_execution, now - Duration::minutes(2));
        assert_eq!(cursor.last_id, None);
        assert_eq!(cursor.computed_interval, opts.fast_interval);
    }

    #[test]
    fn cursor_never_regresses_past_the_skew_margin() {
        let opts = options(10);
        let start = Utc::now();
        let mut cursor = Cursor::cold_start(start, &opts).unwrap();
        let shapes = [
            PageShape::Overflow {
                last_saving_time: start - Duration::seconds(5),
                last_id: "a".to_string(),
            },
            PageShape::Empty,
            PageShape::Overflow {
                last_saving_time: start + Duration::seconds(3),
                last_id: "b".to_string(),
            },
            PageShape::Complete,
            PageShape::Empty,
        ];
        for (i, shape) in shapes.iter().enumerate() {
            let now = start + Duration::seconds(i as i64 * 4);
            let before = cursor.last_execution;
            cursor.advance(shape, now, &opts);
            assert!(cursor.last_execution >= before - opts.skew_margin);
        }
    }

    #[test]
    fn target_id_forces_single_shot_and_full_history() {
        let mut opts = options(10);
        opts.target_id = Some("m".to_string());
        assert!(opts.single_shot());
        let cursor = Cursor::cold_start(Utc::now(), &opts).unwrap();
        assert_eq!(cursor.last_execution, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn overflowing_pages_visit_every_row_once() {
        let store = seeded(5, "m").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(store.clone(), registry(seen.clone(), None), options(2)).unwrap();

        let mut overflows = 0;
        loop {
            let report = scheduler.run_cycle().await.unwrap();
            if !report.overflow {
                break;
            }
            overflows += 1;
        }
        assert_eq!(overflows, 2);

        let seen = seen.lock().unwrap().clone();
        let expected: Vec<String> = (0..5).map(|i| format!("row-{}", i)).collect();
        assert_eq!(seen, expected);
        assert_eq!(store.stats().await.unwrap().processed, 5);

        let idle = scheduler.run_cycle().await.unwrap();
        assert_eq!(idle.fetched, 0);
    }

    #[tokio::test]
    async fn one_faulty_row_does_not_affect_its_siblings() {
        let store = seeded(5, "m").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(store.clone(), registry(seen, Some(2)), options(10)).unwrap();

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.usable, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.write_errors, 0);

        let rows = store.evidence().unwrap();
        assert_eq!(rows.iter().filter(|r| r.processed == Some(true)).count(), 4);
        assert_eq!(rows[2].processed, Some(false));
        assert_eq!(rows[3].processed, Some(true));
        assert_eq!(rows[4].processed, Some(true));
    }

    #[tokio::test]
    async fn page_results_merge_in_order() {
        let store = seeded(3, "m").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(store.clone(), registry(seen, None), options(10)).unwrap();

        scheduler.run_cycle().await.unwrap();
        let doc = store.get_metadata("m").await.unwrap().unwrap();
        assert_eq!(doc.fields["packets"], json!([0, 1, 2]));
        assert_eq!(store.stats().await.unwrap().metadata, 1);
    }

    #[tokio::test]
    async fn unsupported_rows_are_marked_and_not_reselected() {
        let store = Arc::new(InMemoryStore::new());
        let mut other = row(0, "m", Utc::now() - Duration::minutes(5));
        other.href = "https://www.amazon.com/gp/help".to_string();
        store.write_evidence(&[other]).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(store.clone(), registry(seen, None), options(10)).unwrap();
        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);

        let rows = store.evidence().unwrap();
        assert_eq!(rows[0].processed, Some(false));
        assert_eq!(rows[0].url_shape, Some(UrlShape::Other));

        let filter = EvidenceFilter {
            saved_after: Some(Utc::now() - Duration::minutes(10)),
            ..scheduler.filter()
        };
        assert!(store.read_evidence(&filter, 10).await.unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn single_shot_runs_until_overflow_clears() {
        let store = seeded(3, "m").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut opts = options(2);
        opts.single = true;
        let mut scheduler = Scheduler::new(store.clone(), registry(seen.clone(), None), opts).unwrap();

        scheduler.run().await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(store.stats().await.unwrap().unprocessed, 0);
    }

    #[tokio::test]
    async fn targeted_run_reprocesses_one_session() {
        let store = seeded(2, "m").await;
        let older = row(9, "other", Utc::now() - Duration::days(3));
        store.write_evidence(&[older]).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut opts = options(10);
        opts.target_id = Some("m".to_string());
        let mut scheduler = Scheduler::new(store.clone(), registry(seen.clone(), None), opts).unwrap();
        scheduler.run().await.unwrap();
        scheduler.run_cycle().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.iter().all(|id| id != "row-9"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn overrides_replace_config_values() {
        let config = Config::minimal("x.sqlite");
        let options = resolve_options(
            &config,
            ParseOverrides {
                frequency_secs: Some(3),
                minutes_ago: Some(60),
                id: Some("m".to_string()),
                repeat: true,
                single: false,
            },
        )
        .unwrap();
        assert_eq!(options.base_interval, StdDuration::from_secs(3));
        assert_eq!(options.lookback, Duration::minutes(60));
        assert!(options.single_shot());
        assert!(options.repeat);
    }

    #[test]
    fn out_of_range_lookback_is_an_error() {
        let config = Config::minimal("x.sqlite");
        for minutes in [-5, 1_000_000_000_000] {
            let overrides = ParseOverrides {
                minutes_ago: Some(minutes),
                ..Default::default()
            };
            assert!(resolve_options(&config, overrides).is_err());
        }

        let mut opts = options(10);
        opts.lookback = Duration::days(365 * 300_000);
        assert!(Cursor::cold_start(Utc::now(), &opts).is_err());
    }

    #[tokio::test]
    async fn rows_tied_across_batches_are_all_visited() {
        let store = Arc::new(InMemoryStore::new());
        let t = Utc::now() - Duration::minutes(5);
        let stamped = [("A0", 0), ("A1", 1), ("A2", 2), ("B0", 1), ("B1", 2)];
        let rows: Vec<Evidence> = stamped
            .iter()
            .enumerate()
            .map(|(i, (id, offset))| Evidence {
                id: id.to_string(),
                ..row(i, "m", t + Duration::microseconds(*offset))
            })
            .collect();
        store.write_evidence(&rows).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler =
            Scheduler::new(store.clone(), registry(seen.clone(), None), options(2)).unwrap();
        while scheduler.run_cycle().await.unwrap().overflow {}

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["A0", "A1", "A2", "B0", "B1"]);
        assert_eq!(store.stats().await.unwrap().unprocessed, 0);
    }

    /// Store whose every operation fails.
    struct FailingStore;

    #[async_trait::async_trait]
    impl Store for FailingStore {
        async fn find_account(&self, _: &str) -> Result<Option<Account>> {
            bail!("disk I/O error")
        }
        async fn insert_account(&self, _: &Account) -> Result<Account> {
            bail!("disk I/O error")
        }
        async fn write_evidence(&self, _: &[Evidence]) -> Result<WriteResult> {
            bail!("disk I/O error")
        }
        async fn read_evidence(&self, _: &EvidenceFilter, _: usize) -> Result<EvidencePage> {
            bail!("disk I/O error")
        }
        async fn update_evidence(&self, _: &Evidence) -> Result<()> {
            bail!("disk I/O error")
        }
        async fn upsert_metadata(&self, _: &Metadata) -> Result<()> {
            bail!("disk I/O error")
        }
        async fn get_metadata(&self, _: &str) -> Result<Option<Metadata>> {
            bail!("disk I/O error")
        }
        async fn metadata_by_owner(&self, _: &str, _: usize, _: usize) -> Result<Vec<Metadata>> {
            bail!("disk I/O error")
        }
        async fn stats(&self) -> Result<crate::store::StoreStats> {
            bail!("disk I/O error")
        }
    }

    #[tokio::test]
    async fn fetch_failure_stops_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler =
            Scheduler::new(Arc::new(FailingStore), registry(seen.clone(), None), options(10)).unwrap();
        let err = scheduler.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed to fetch evidence page"));
        assert!(seen.lock().unwrap().is_empty());
    }
}
