//! Expansion of enriched artworks into per-sub-page records and their
//! batched persistence.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::backoff::{RetryPolicy, Sleeper};
use crate::config::IngestSettings;
use crate::db::{ImageStore, NewImage};
use crate::model::Item;

pub const DEFAULT_FILE_EXT: &str = "jpg";
const ALLOWED_EXTS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
const MAX_TEXT_CHARS: usize = 255;
const DEFAULT_SCORE: i64 = -100;
const SOURCE: &str = "pixiv";

static EXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z0-9]+)$").expect("valid extension regex"));

/// Extension of the file a URL points at, restricted to the known image
/// formats. Anything else maps to [`DEFAULT_FILE_EXT`].
pub fn file_ext_from_url(url: &str) -> String {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();
    EXT_RE
        .captures(file)
        .map(|c| c[1].to_ascii_lowercase())
        .filter(|ext| ALLOWED_EXTS.contains(&ext.as_str()))
        .unwrap_or_else(|| DEFAULT_FILE_EXT.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn non_empty(s: &str) -> Option<String> {
    Some(s.to_string()).filter(|s| !s.trim().is_empty())
}

/// One record per sub-page `0..page_count` that has metadata.
pub fn expand_item(item: &Item, updated: DateTime<Utc>) -> Vec<NewImage> {
    let page_count = item.page_count as usize;
    if item.meta.len() < page_count {
        warn!(
            id = %item.id,
            page_count,
            meta = item.meta.len(),
            "metadata covers fewer sub-pages than reported"
        );
    }

    let title = truncate_chars(&item.title, MAX_TEXT_CHARS);
    let user_name = truncate_chars(&item.user_name, MAX_TEXT_CHARS);
    let created = item.create_date.with_timezone(&Utc);

    item.meta
        .iter()
        .take(page_count)
        .enumerate()
        .map(|(idx, meta)| NewImage {
            img_id: item.id.clone(),
            page: idx as u32,
            page_count: item.page_count,
            title: title.clone(),
            description: non_empty(&item.description),
            tags: item.tags.clone(),
            urls: meta.urls.clone(),
            url: item.url.clone(),
            user_id: item.user_id.clone(),
            user_name: user_name.clone(),
            user_avatar: non_empty(&item.profile_image_url),
            width: meta.width,
            height: meta.height,
            bookmarks: item.bookmark_count,
            views: 0,
            source: SOURCE.to_string(),
            x_restrict: item.x_restrict,
            ai_type: item.ai_type,
            created,
            updated,
            file_ext: file_ext_from_url(&meta.urls.original),
            hash: String::new(),
            score: DEFAULT_SCORE,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub items_seen: u64,
    /// Items dropped because they carried no metadata.
    pub items_skipped: u64,
    pub records_built: u64,
    pub batches_flushed: u64,
    pub rows_inserted: u64,
    /// Records the store already held.
    pub duplicates: u64,
    pub batches_abandoned: u64,
    pub records_dropped: u64,
}

/// Accumulates records and writes them in fixed-size batches.
pub struct BatchIngester<'a> {
    store: &'a dyn ImageStore,
    sleeper: &'a dyn Sleeper,
    batch_size: usize,
    policy: RetryPolicy,
    pending: Vec<NewImage>,
    stats: IngestStats,
}

impl<'a> BatchIngester<'a> {
    pub fn new(store: &'a dyn ImageStore, sleeper: &'a dyn Sleeper, settings: &IngestSettings) -> Self {
        let batch_size = settings.batch_size.max(1);
        Self {
            store,
            sleeper,
            batch_size,
            policy: settings.retry_policy(),
            pending: Vec::with_capacity(batch_size),
            stats: IngestStats::default(),
        }
    }

    pub async fn ingest(&mut self, items: &[Item]) {
        let updated = Utc::now();
        for item in items {
            self.stats.items_seen += 1;
            if !item.is_enriched() {
                debug!(id = %item.id, "skipping artwork without metadata");
                self.stats.items_skipped += 1;
                continue;
            }
            for record in expand_item(item, updated) {
                self.stats.records_built += 1;
                self.pending.push(record);
                if self.pending.len() >= self.batch_size {
                    self.flush().await;
                }
            }
        }
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Flush whatever is left and return the totals.
    pub async fn finish(mut self) -> IngestStats {
        if !self.pending.is_empty() {
            self.flush().await;
        }
        self.stats
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        let rows = batch.len() as u64;
        let mut attempt = 1;
        loop {
            match self.store.insert_batch(&batch).await {
                Ok(inserted) => {
                    self.stats.batches_flushed += 1;
                    self.stats.rows_inserted += inserted;
                    self.stats.duplicates += rows.saturating_sub(inserted);
                    info!(rows, inserted, "batch flushed");
                    return;
                }
                Err(err) => match self.policy.delay_after(attempt) {
                    Some(delay) => {
                        warn!(rows, attempt, err = %err, "batch flush failed; retrying");
                        self.sleeper.sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        error!(rows, attempt, err = %err, "batch flush failed; dropping batch");
                        self.stats.batches_abandoned += 1;
                        self.stats.records_dropped += rows;
                        return;
                    }
                },
            }
        }
    }
}
