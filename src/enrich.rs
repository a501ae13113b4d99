//! Per-artwork sub-page metadata fan-out.

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{PageMeta, SearchPage};
use crate::pixiv::{PixivApi, PixivError};

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("metadata fetch failed for {} of {total} artworks", .failed.len())]
    Incomplete {
        failed: Vec<(String, PixivError)>,
        total: usize,
    },
}

impl EnrichError {
    /// Whether refetching the page may fix it.
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichError::Incomplete { failed, .. } => failed.iter().any(|(_, e)| e.is_transient()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub total: usize,
    pub enriched: usize,
    /// Ids left without metadata, in page order.
    pub failed: Vec<String>,
}

pub struct MetaEnricher<'a> {
    api: &'a dyn PixivApi,
    concurrency: usize,
    allow_partial: bool,
}

impl<'a> MetaEnricher<'a> {
    pub fn new(api: &'a dyn PixivApi, concurrency: usize, allow_partial: bool) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
            allow_partial,
        }
    }

    /// Attach sub-page metadata to every item of `page`.
    ///
    /// At most `concurrency` requests are in flight. Items whose request
    /// fails keep an empty `meta`. Unless partial pages are allowed, any
    /// failure is returned as [`EnrichError::Incomplete`].
    pub async fn enrich(&self, page: &mut SearchPage) -> Result<EnrichReport, EnrichError> {
        let api = self.api;
        let mut results: Vec<(usize, Result<Vec<PageMeta>, PixivError>)> =
            stream::iter(page.items.iter().enumerate().map(|(idx, item)| {
                let id = item.id.clone();
                async move { (idx, api.illust_pages(&id).await) }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let total = page.items.len();
        let mut enriched = 0;
        let mut failed = Vec::new();
        for (idx, result) in results {
            let item = &mut page.items[idx];
            match result {
                Ok(meta) => {
                    if meta.is_empty() {
                        debug!(id = %item.id, "artwork has no sub-page metadata");
                    } else {
                        enriched += 1;
                    }
                    item.meta = meta;
                }
                Err(err) => {
                    warn!(id = %item.id, %err, "failed to fetch artwork pages");
                    item.meta.clear();
                    failed.push((item.id.clone(), err));
                }
            }
        }

        if !failed.is_empty() && !self.allow_partial {
            return Err(EnrichError::Incomplete { failed, total });
        }
        Ok(EnrichReport {
            total,
            enriched,
            failed: failed.into_iter().map(|(id, _)| id).collect(),
        })
    }
}
