//! Pagination state machine driving one search crawl.

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backoff::{RetryPolicy, Sleeper};
use crate::config::{CrawlSettings, IngestSettings};
use crate::db::ImageStore;
use crate::enrich::{EnrichError, MetaEnricher};
use crate::ingest::{BatchIngester, IngestStats};
use crate::model::{Item, SearchPage, SearchParams};
use crate::pixiv::{PixivApi, PixivError};

/// Why a page attempt failed.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("search failed: {0}")]
    Search(PixivError),
    #[error("enrichment failed: {0}")]
    Enrich(EnrichError),
    #[error("page returned no artworks")]
    Empty,
}

impl PageError {
    pub fn is_transient(&self) -> bool {
        match self {
            PageError::Search(err) => err.is_transient(),
            PageError::Enrich(err) => err.is_transient(),
            PageError::Empty => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("page-limit exceeded")]
    PageLimitExceeded { last_page: u32, cap: u32 },
    #[error("no results")]
    NoResults,
    #[error("probe failed after {attempts} attempts")]
    ProbeFailed { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Done { pages_skipped: usize },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub total: u64,
    pub last_page: u32,
    pub pages_ingested: u32,
    pub skipped_pages: Vec<u32>,
    pub ingest: IngestStats,
}

impl CrawlReport {
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.outcome {
            CrawlOutcome::Aborted(reason) => Some(reason),
            CrawlOutcome::Done { .. } => None,
        }
    }
}

#[derive(Debug)]
enum CrawlState {
    Start,
    Probing,
    Crawling { page: u32 },
    Cooldown { pause: Duration, next_page: u32 },
    Done,
    Aborted(AbortReason),
}

pub struct PageCrawler<'a> {
    api: &'a dyn PixivApi,
    store: &'a dyn ImageStore,
    sleeper: &'a dyn Sleeper,
    crawl: CrawlSettings,
    ingest: IngestSettings,
}

impl<'a> PageCrawler<'a> {
    pub fn new(
        api: &'a dyn PixivApi,
        store: &'a dyn ImageStore,
        sleeper: &'a dyn Sleeper,
        crawl: CrawlSettings,
        ingest: IngestSettings,
    ) -> Self {
        Self {
            api,
            store,
            sleeper,
            crawl,
            ingest,
        }
    }

    /// Crawl every result page of `params.keyword` into the store.
    pub async fn run(&self, params: &SearchParams) -> CrawlReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("crawl", %run_id, keyword = %params.keyword);
        self.run_states(params).instrument(span).await
    }

    async fn run_states(&self, params: &SearchParams) -> CrawlReport {
        let retry = self.crawl.retry_policy();
        let cooldown = self.crawl.cooldown_policy();
        let enricher = MetaEnricher::new(
            self.api,
            self.crawl.meta_concurrency,
            self.crawl.allow_partial_pages,
        );
        let mut ingester = BatchIngester::new(self.store, self.sleeper, &self.ingest);

        let mut total = 0;
        let mut last_page = 0;
        let mut probed: Option<SearchPage> = None;
        let mut pages_ingested = 0;
        let mut skipped_pages = Vec::new();

        let mut state = CrawlState::Start;
        let outcome = loop {
            state = match state {
                CrawlState::Start => {
                    info!("crawl started");
                    CrawlState::Probing
                }
                CrawlState::Probing => match self.probe(params, &retry).await {
                    Err(attempts) => CrawlState::Aborted(AbortReason::ProbeFailed { attempts }),
                    Ok(page) => {
                        total = page.total;
                        last_page = page.last_page;
                        info!(total, last_page, "probed first page");
                        if page.last_page >= self.crawl.page_cap {
                            CrawlState::Aborted(AbortReason::PageLimitExceeded {
                                last_page: page.last_page,
                                cap: self.crawl.page_cap,
                            })
                        } else if page.total == 0 {
                            CrawlState::Aborted(AbortReason::NoResults)
                        } else {
                            last_page = page.last_page.max(1);
                            probed = Some(page);
                            CrawlState::Crawling { page: 1 }
                        }
                    }
                },
                CrawlState::Crawling { page } if page > last_page => CrawlState::Done,
                CrawlState::Crawling { page } => {
                    match self.crawl_page(&enricher, params, page, probed.take(), &retry).await {
                        Ok(items) => {
                            info!(page, last_page, items = items.len(), "page fetched");
                            ingester.ingest(&items).await;
                            pages_ingested += 1;
                        }
                        Err(err) => {
                            error!(page, err = %err, "page skipped");
                            skipped_pages.push(page);
                        }
                    }
                    match cooldown.pause_after(page, last_page) {
                        Some(pause) => CrawlState::Cooldown {
                            pause,
                            next_page: page + 1,
                        },
                        None => CrawlState::Crawling { page: page + 1 },
                    }
                }
                CrawlState::Cooldown { pause, next_page } => {
                    info!(secs = pause.as_secs(), next_page, "cooling down");
                    self.sleeper.sleep(pause).await;
                    CrawlState::Crawling { page: next_page }
                }
                CrawlState::Done => {
                    break CrawlOutcome::Done {
                        pages_skipped: skipped_pages.len(),
                    }
                }
                CrawlState::Aborted(reason) => {
                    warn!(%reason, last_page, cap = self.crawl.page_cap, "crawl aborted");
                    break CrawlOutcome::Aborted(reason);
                }
            };
        };

        let ingest = ingester.finish().await;
        info!(
            pages_ingested,
            skipped = skipped_pages.len(),
            rows = ingest.rows_inserted,
            duplicates = ingest.duplicates,
            "crawl finished"
        );
        CrawlReport {
            outcome,
            total,
            last_page,
            pages_ingested,
            skipped_pages,
            ingest,
        }
    }

    /// Search page 1 under the retry policy. On failure returns the number of
    /// attempts spent.
    async fn probe(&self, params: &SearchParams, retry: &RetryPolicy) -> Result<SearchPage, u32> {
        let first = params.for_page(1);
        let mut attempt = 1;
        loop {
            match self.api.search(&first).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    if !self.crawl.retry_api_errors && !err.is_transient() {
                        warn!(attempt, err = %err, "probe failed permanently");
                        return Err(attempt);
                    }
                    match retry.delay_after(attempt) {
                        Some(delay) => {
                            warn!(attempt, err = %err, "probe failed; retrying");
                            self.sleeper.sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            warn!(attempt, err = %err, "probe failed; giving up");
                            return Err(attempt);
                        }
                    }
                }
            }
        }
    }

    /// Fetch and enrich one page. The first attempt uses `prefetched` when
    /// present.
    async fn crawl_page(
        &self,
        enricher: &MetaEnricher<'_>,
        params: &SearchParams,
        page: u32,
        mut prefetched: Option<SearchPage>,
        retry: &RetryPolicy,
    ) -> Result<Vec<Item>, PageError> {
        let mut attempt = 1;
        loop {
            let result = match prefetched.take() {
                Some(found) => Ok(found),
                None => self
                    .api
                    .search(&params.for_page(page))
                    .await
                    .map_err(PageError::Search),
            };
            let result = match result {
                Ok(found) if found.items.is_empty() => Err(PageError::Empty),
                Ok(mut found) => match enricher.enrich(&mut found).await {
                    Ok(report) => {
                        if !report.failed.is_empty() {
                            warn!(page, failed = ?report.failed, "page ingested without some artworks");
                        }
                        Ok(found.items)
                    }
                    Err(err) => Err(PageError::Enrich(err)),
                },
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(items) => return Ok(items),
                Err(err) => err,
            };
            if !self.crawl.retry_api_errors && !err.is_transient() {
                return Err(err);
            }
            match retry.delay_after(attempt) {
                Some(delay) => {
                    warn!(page, attempt, err = %err, "page attempt failed; retrying");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            }
        }
    }
}
