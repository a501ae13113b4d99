use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use pixiv_harvest::backoff::Sleeper;
use pixiv_harvest::config::{CrawlSettings, IngestSettings};
use pixiv_harvest::crawler::{AbortReason, CrawlOutcome, CrawlReport, PageCrawler};
use pixiv_harvest::db::{self, ImageStore, NewImage};
use pixiv_harvest::model::{
    FollowingPage, FollowingQuery, ImageUrls, Item, PageMeta, SearchPage, SearchParams,
};
use pixiv_harvest::pixiv::{PixivApi, PixivError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Search(u32),
    Pages(String),
    Sleep(Duration),
    Insert(usize),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn item(id: String) -> Item {
    let date = DateTime::parse_from_rfc3339("2025-04-01T00:00:05+09:00").unwrap();
    Item {
        id,
        title: "title".into(),
        description: String::new(),
        illust_type: 0,
        x_restrict: 0,
        url: String::new(),
        tags: vec!["cat".into()],
        user_id: "42".into(),
        user_name: "artist".into(),
        profile_image_url: String::new(),
        width: 100,
        height: 100,
        page_count: 1,
        bookmark_count: 0,
        ai_type: 1,
        create_date: date,
        update_date: date,
        meta: Vec::new(),
    }
}

/// Search pages of `per_page` single-image artworks with scripted failures.
struct FakePixiv {
    total: u64,
    last_page: u32,
    per_page: u32,
    timeouts: Mutex<HashMap<u32, u32>>,
    empties: Mutex<HashMap<u32, u32>>,
    api_errors: HashSet<u32>,
    meta_failures: Mutex<HashMap<String, u32>>,
    events: EventLog,
}

impl FakePixiv {
    fn new(total: u64, last_page: u32, per_page: u32, events: EventLog) -> Self {
        Self {
            total,
            last_page,
            per_page,
            timeouts: Mutex::default(),
            empties: Mutex::default(),
            api_errors: HashSet::new(),
            meta_failures: Mutex::default(),
            events,
        }
    }

    fn timeouts(mut self, page: u32, times: u32) -> Self {
        self.timeouts.get_mut().insert(page, times);
        self
    }

    fn empties(mut self, page: u32, times: u32) -> Self {
        self.empties.get_mut().insert(page, times);
        self
    }

    fn api_error(mut self, page: u32) -> Self {
        self.api_errors.insert(page);
        self
    }

    fn meta_failures(mut self, id: &str, times: u32) -> Self {
        self.meta_failures.get_mut().insert(id.to_string(), times);
        self
    }
}

async fn take_one(counter: &Mutex<HashMap<String, u32>>, key: &str) -> bool {
    let mut guard = counter.lock().await;
    match guard.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

async fn take_page(counter: &Mutex<HashMap<u32, u32>>, page: u32) -> bool {
    let mut guard = counter.lock().await;
    match guard.get_mut(&page) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl PixivApi for FakePixiv {
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, PixivError> {
        let page = params.p;
        self.events.lock().await.push(Event::Search(page));
        if self.api_errors.contains(&page) {
            return Err(PixivError::Api {
                message: "invalid request".into(),
            });
        }
        if take_page(&self.timeouts, page).await {
            return Err(PixivError::Timeout {
                url: format!("page {}", page),
            });
        }
        let items = if take_page(&self.empties, page).await {
            Vec::new()
        } else {
            (1..=self.per_page)
                .map(|i| item(format!("{}{:02}", page, i)))
                .collect()
        };
        Ok(SearchPage {
            items,
            total: self.total,
            last_page: self.last_page,
        })
    }

    async fn illust_pages(&self, illust_id: &str) -> Result<Vec<PageMeta>, PixivError> {
        self.events
            .lock()
            .await
            .push(Event::Pages(illust_id.to_string()));
        if take_one(&self.meta_failures, illust_id).await {
            return Err(PixivError::Timeout {
                url: illust_id.to_string(),
            });
        }
        Ok(vec![PageMeta {
            urls: ImageUrls {
                original: format!("https://i.pximg.net/img-original/{}_p0.png", illust_id),
                ..ImageUrls::default()
            },
            width: 100,
            height: 100,
        }])
    }

    async fn following(
        &self,
        _user_id: &str,
        _query: &FollowingQuery,
    ) -> Result<FollowingPage, PixivError> {
        unreachable!("crawler never lists following")
    }
}

struct RecordingSleeper {
    events: EventLog,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.events.lock().await.push(Event::Sleep(duration));
    }
}

/// Logs every batch, then writes it to sqlite when a pool is attached.
struct RecordingStore {
    events: EventLog,
    pool: Option<sqlx::SqlitePool>,
}

#[async_trait]
impl ImageStore for RecordingStore {
    async fn insert_batch(&self, rows: &[NewImage]) -> Result<u64> {
        self.events.lock().await.push(Event::Insert(rows.len()));
        match &self.pool {
            Some(pool) => db::insert_images(pool, rows).await,
            None => Ok(rows.len() as u64),
        }
    }
}

struct Harness {
    events: EventLog,
    sleeper: RecordingSleeper,
    store: RecordingStore,
}

impl Harness {
    async fn with_pool() -> Self {
        let mut h = Self::new();
        h.store.pool = Some(setup_pool().await);
        h
    }

    fn new() -> Self {
        let events: EventLog = Arc::default();
        Self {
            sleeper: RecordingSleeper {
                events: events.clone(),
            },
            store: RecordingStore {
                events: events.clone(),
                pool: None,
            },
            events,
        }
    }

    async fn run(&self, api: &FakePixiv, crawl: CrawlSettings) -> CrawlReport {
        PageCrawler::new(api, &self.store, &self.sleeper, crawl, IngestSettings::default())
            .run(&SearchParams::new("cat"))
            .await
    }

    async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    async fn sleeps(&self) -> Vec<Duration> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Sleep(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    async fn searches(&self) -> Vec<u32> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Search(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    async fn inserts(&self) -> Vec<usize> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Insert(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    async fn row_count(&self) -> i64 {
        db::count_images(self.store.pool.as_ref().unwrap())
            .await
            .unwrap()
    }
}

fn fast_settings(max_retries: u32) -> CrawlSettings {
    CrawlSettings {
        max_retries,
        ..CrawlSettings::default()
    }
}

#[tokio::test]
async fn zero_results_abort_without_ingestion() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(0, 0, 0, h.events.clone());
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Aborted(AbortReason::NoResults));
    assert_eq!(report.abort_reason().unwrap().to_string(), "no results");
    assert_eq!(h.searches().await, vec![1]);
    assert!(h.inserts().await.is_empty());
    assert_eq!(h.row_count().await, 0);
}

#[tokio::test]
async fn page_cap_aborts_before_any_store_call() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(90_000, 1500, 60, h.events.clone());
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::PageLimitExceeded {
            last_page: 1500,
            cap: 1000
        })
    );
    assert_eq!(
        report.abort_reason().unwrap().to_string(),
        "page-limit exceeded"
    );
    assert_eq!(h.events().await, vec![Event::Search(1)]);
    assert_eq!(h.row_count().await, 0);
}

#[tokio::test]
async fn last_page_equal_to_cap_also_aborts() {
    let h = Harness::new();
    let api = FakePixiv::new(60_000, 1000, 60, h.events.clone());
    let report = h.run(&api, CrawlSettings::default()).await;
    assert!(matches!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::PageLimitExceeded { .. })
    ));
    assert!(h.inserts().await.is_empty());
}

#[tokio::test]
async fn failing_page_recovers_after_three_timeouts() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(10, 5, 2, h.events.clone()).timeouts(5, 3);
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 0 });
    assert_eq!(report.pages_ingested, 5);
    assert_eq!(h.sleeps().await, vec![Duration::from_secs(20); 3]);
    assert_eq!(h.searches().await, vec![1, 2, 3, 4, 5, 5, 5, 5]);
    assert_eq!(h.row_count().await, 10);
    let page_five = db::images_by_user(h.store.pool.as_ref().unwrap(), "42", 1, 2)
        .await
        .unwrap();
    let ids: Vec<_> = page_five.into_iter().map(|img| img.img_id).collect();
    assert_eq!(ids, vec!["502", "501"]);
}

#[tokio::test]
async fn exhausted_page_is_skipped_and_crawl_continues() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(6, 3, 2, h.events.clone()).timeouts(2, 100);
    let settings = CrawlSettings {
        max_retries: 4,
        retry_delay_secs: 1,
        ..CrawlSettings::default()
    };
    let report = h.run(&api, settings).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 1 });
    assert_eq!(report.skipped_pages, vec![2]);
    assert_eq!(report.pages_ingested, 2);
    assert_eq!(h.searches().await, vec![1, 2, 2, 2, 2, 3]);
    assert_eq!(h.sleeps().await, vec![Duration::from_secs(1); 3]);
    assert_eq!(h.row_count().await, 4);
}

#[tokio::test]
async fn first_page_reuses_probe_response() {
    let h = Harness::new();
    let api = FakePixiv::new(3, 3, 1, h.events.clone());
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 0 });
    assert_eq!(report.total, 3);
    assert_eq!(report.last_page, 3);
    assert_eq!(
        h.events().await,
        vec![
            Event::Search(1),
            Event::Pages("101".into()),
            Event::Search(2),
            Event::Pages("201".into()),
            Event::Search(3),
            Event::Pages("301".into()),
            Event::Insert(3),
        ]
    );
}

#[tokio::test]
async fn cooldown_after_page_ninety_with_pages_left() {
    let h = Harness::new();
    let api = FakePixiv::new(200, 200, 1, h.events.clone());
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 0 });
    assert_eq!(h.sleeps().await, vec![Duration::from_secs(30)]);

    let events = h.events().await;
    let pause = events
        .iter()
        .position(|e| *e == Event::Sleep(Duration::from_secs(30)))
        .unwrap();
    assert_eq!(events[pause - 1], Event::Pages("9001".into()));
    assert_eq!(events[pause + 1], Event::Search(91));
    assert_eq!(h.inserts().await, vec![100, 100]);
    assert_eq!(report.ingest.rows_inserted, 200);
}

#[tokio::test]
async fn no_cooldown_near_the_end() {
    let h = Harness::new();
    let api = FakePixiv::new(100, 100, 1, h.events.clone());
    h.run(&api, CrawlSettings::default()).await;
    assert!(h.sleeps().await.is_empty());
}

#[tokio::test]
async fn failed_probe_aborts() {
    let h = Harness::new();
    let api = FakePixiv::new(10, 5, 2, h.events.clone()).timeouts(1, 100);
    let report = h.run(&api, fast_settings(3)).await;

    assert_eq!(
        report.outcome,
        CrawlOutcome::Aborted(AbortReason::ProbeFailed { attempts: 3 })
    );
    assert_eq!(h.searches().await, vec![1, 1, 1]);
    assert_eq!(h.sleeps().await.len(), 2);
    assert!(h.inserts().await.is_empty());
}

#[tokio::test]
async fn api_errors_consume_retry_budget_by_default() {
    let h = Harness::new();
    let api = FakePixiv::new(6, 3, 2, h.events.clone()).api_error(2);
    let report = h.run(&api, fast_settings(3)).await;

    assert_eq!(report.skipped_pages, vec![2]);
    assert_eq!(h.searches().await, vec![1, 2, 2, 2, 3]);
}

#[tokio::test]
async fn api_errors_abandon_page_when_retries_disabled() {
    let h = Harness::new();
    let api = FakePixiv::new(6, 3, 2, h.events.clone()).api_error(2);
    let settings = CrawlSettings {
        retry_api_errors: false,
        ..fast_settings(3)
    };
    let report = h.run(&api, settings).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 1 });
    assert_eq!(h.searches().await, vec![1, 2, 3]);
    assert!(h.sleeps().await.is_empty());
    assert_eq!(report.ingest.rows_inserted, 4);
}

#[tokio::test]
async fn strict_enrichment_failure_refetches_the_page() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(4, 2, 2, h.events.clone()).meta_failures("201", 2);
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 0 });
    assert_eq!(h.searches().await, vec![1, 2, 2, 2]);
    assert_eq!(h.sleeps().await.len(), 2);
    assert_eq!(h.row_count().await, 4);
}

#[tokio::test]
async fn partial_pages_skip_only_failed_artworks() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(4, 2, 2, h.events.clone()).meta_failures("201", 1);
    let settings = CrawlSettings {
        allow_partial_pages: true,
        ..CrawlSettings::default()
    };
    let report = h.run(&api, settings).await;

    assert_eq!(h.searches().await, vec![1, 2]);
    assert!(h.sleeps().await.is_empty());
    assert_eq!(report.ingest.items_skipped, 1);
    assert_eq!(h.row_count().await, 3);
}

#[tokio::test]
async fn empty_page_counts_as_failed_attempt() {
    let h = Harness::new();
    let api = FakePixiv::new(6, 3, 2, h.events.clone()).empties(3, 1);
    let report = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(report.outcome, CrawlOutcome::Done { pages_skipped: 0 });
    assert_eq!(h.searches().await, vec![1, 2, 3, 3]);
    assert_eq!(h.sleeps().await, vec![Duration::from_secs(20)]);
    assert_eq!(report.ingest.rows_inserted, 6);
}

#[tokio::test]
async fn rerun_inserts_nothing_new() {
    let h = Harness::with_pool().await;
    let api = FakePixiv::new(4, 2, 2, h.events.clone());
    let first = h.run(&api, CrawlSettings::default()).await;
    let second = h.run(&api, CrawlSettings::default()).await;

    assert_eq!(first.ingest.rows_inserted, 4);
    assert_eq!(second.ingest.rows_inserted, 0);
    assert_eq!(second.ingest.duplicates, 4);
    assert_eq!(h.row_count().await, 4);
}
