use crate::client::ClientError;
use crate::client::types::duration_secs;
use crate::remote::api::BacklogApi;
use crate::remote::types::{ItemPage, RemoteItem};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Listing flags and pacing for a full collection fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default = "default_true")]
    pub include_closed: bool,
    #[serde(default = "default_true")]
    pub include_subtasks: bool,
    /// Pause between consecutive page requests
    #[serde(default = "default_page_delay", with = "duration_secs")]
    pub page_delay: Duration,
    /// Guard against servers that never signal the end of the listing
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_true() -> bool {
    true
}

fn default_page_delay() -> Duration {
    Duration::from_millis(300)
}

fn default_max_pages() -> u32 {
    1_000
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            include_closed: true,
            include_subtasks: true,
            page_delay: default_page_delay(),
            max_pages: default_max_pages(),
        }
    }
}

/// A fetch that did not reach the end of the listing. The partial result is discarded.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(
        "Partial fetch: page {page} failed after {pages_fetched} pages ({items_fetched} items): {source}"
    )]
    Partial {
        page: u32,
        pages_fetched: u32,
        items_fetched: usize,
        #[source]
        source: ClientError,
    },
    #[error("Page limit of {max_pages} reached before the last page ({items_fetched} items)")]
    PageLimitExceeded { max_pages: u32, items_fetched: usize },
}

#[derive(Debug, Clone, Copy, Default)]
struct PageCursor {
    page: u32,
    items_fetched: usize,
    finished: bool,
}

/// Walks every page of a collection listing.
///
/// Each call to [`PaginatedFetcher::pages`] or [`PaginatedFetcher::fetch_all`]
/// starts again from page 0; nothing is cached between calls.
pub struct PaginatedFetcher<'a> {
    api: &'a BacklogApi,
    options: FetchOptions,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(api: &'a BacklogApi, options: FetchOptions) -> Self {
        Self { api, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Lazy stream of non-empty pages, ending at the first empty page or the
    /// page the server flags as last.
    pub fn pages(&self) -> impl Stream<Item = Result<ItemPage, FetchError>> + '_ {
        futures::stream::try_unfold(PageCursor::default(), move |cursor| async move {
            if cursor.finished {
                return Ok(None);
            }

            if cursor.page >= self.options.max_pages {
                return Err(FetchError::PageLimitExceeded {
                    max_pages: self.options.max_pages,
                    items_fetched: cursor.items_fetched,
                });
            }

            if cursor.page > 0 && !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }

            let page = self
                .api
                .list_page(cursor.page, &self.options)
                .await
                .map_err(|source| FetchError::Partial {
                    page: cursor.page,
                    pages_fetched: cursor.page,
                    items_fetched: cursor.items_fetched,
                    source,
                })?;

            if page.items.is_empty() {
                return Ok(None);
            }

            let next = PageCursor {
                page: cursor.page + 1,
                items_fetched: cursor.items_fetched + page.items.len(),
                finished: page.last_page == Some(true),
            };
            Ok(Some((page, next)))
        })
    }

    /// Collect every item of the collection in encounter order.
    ///
    /// Items repeated across pages are kept once, at their first position.
    pub async fn fetch_all(&self) -> Result<Vec<RemoteItem>, FetchError> {
        let mut pages = std::pin::pin!(self.pages());
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut page_count = 0u32;

        while let Some(page) = pages.try_next().await? {
            page_count += 1;
            for item in page.items {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                } else {
                    debug!("Item {} repeated across pages, keeping first copy", item.id);
                }
            }
        }

        info!(
            "Fetched {} items in {} pages from collection {}",
            items.len(),
            page_count,
            self.api.collection_id()
        );
        Ok(items)
    }
}
