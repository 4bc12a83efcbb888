//! Lazy, single-use cursor over a server-side scroll
//!
//! The scroll is opened on the first fetch and cleared as soon as a page
//! comes back empty, a fetch fails, or the cursor is dropped early.

use futures::stream::{self, Stream};
use indexsync_storage::{SearchEngine, SearchHit};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;

type Transform<T> = Box<dyn Fn(SearchHit) -> T + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorState {
    NotStarted,
    Open { scroll_id: Option<String> },
    Exhausted,
}

/// Cursor over every hit of a query, fetched page by page
///
/// Each page holds at most `page_size` hits per shard of the target indices.
pub struct ScrollCursor<T> {
    engine: Arc<dyn SearchEngine>,
    indices: Vec<String>,
    query: Value,
    page_size: usize,
    keep_alive: Duration,
    transform: Transform<T>,
    state: CursorState,
    buffer: VecDeque<T>,
}

impl<T: Send + 'static> ScrollCursor<T> {
    pub fn new<F>(
        engine: Arc<dyn SearchEngine>,
        indices: Vec<String>,
        query: Value,
        page_size: usize,
        keep_alive: Duration,
        transform: F,
    ) -> Self
    where
        F: Fn(SearchHit) -> T + Send + Sync + 'static,
    {
        Self {
            engine,
            indices,
            query,
            page_size: page_size.max(1),
            keep_alive,
            transform: Box::new(transform),
            state: CursorState::NotStarted,
            buffer: VecDeque::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted && self.buffer.is_empty()
    }

    /// Next page of transformed hits, `None` once the scroll is drained
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        let Some(hits) = self.fetch().await? else {
            return Ok(None);
        };
        Ok(Some(hits.into_iter().map(|hit| (self.transform)(hit)).collect()))
    }

    /// Next single item
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.buffer.is_empty() {
            match self.fetch().await? {
                Some(hits) => {
                    let transform = &self.transform;
                    self.buffer.extend(hits.into_iter().map(|hit| transform(hit)));
                }
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }

    /// Drain the cursor into a vector
    pub async fn try_collect_all(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page);
        }
        Ok(items)
    }

    /// The cursor as a stream of items; an error ends the stream
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(item)) => Some((Ok(item), cursor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), cursor)),
            }
        })
    }

    async fn fetch(&mut self) -> Result<Option<Vec<SearchHit>>> {
        let next_scroll = match &self.state {
            CursorState::Exhausted => return Ok(None),
            CursorState::NotStarted => Some(None),
            CursorState::Open {
                scroll_id: Some(scroll_id),
            } => Some(Some(scroll_id.clone())),
            // engine returned everything in the first page
            CursorState::Open { scroll_id: None } => None,
        };
        let Some(next_scroll) = next_scroll else {
            self.state = CursorState::Exhausted;
            return Ok(None);
        };

        let result = match next_scroll {
            None => {
                debug!(
                    "Opening scroll over {:?} ({} per shard)",
                    self.indices, self.page_size
                );
                self.engine
                    .open_scroll(&self.indices, &self.query, self.page_size, self.keep_alive)
                    .await
            }
            Some(scroll_id) => self.engine.scroll(&scroll_id, self.keep_alive).await,
        };

        match result {
            Ok(page) if page.hits.is_empty() => {
                let scroll_id = page.scroll_id.or_else(|| self.current_scroll_id());
                self.finish(scroll_id).await;
                Ok(None)
            }
            Ok(page) => {
                self.state = CursorState::Open {
                    scroll_id: page.scroll_id,
                };
                Ok(Some(page.hits))
            }
            Err(e) => {
                let scroll_id = self.current_scroll_id();
                self.finish(scroll_id).await;
                Err(e.into())
            }
        }
    }

    fn current_scroll_id(&self) -> Option<String> {
        match &self.state {
            CursorState::Open { scroll_id } => scroll_id.clone(),
            _ => None,
        }
    }

    async fn finish(&mut self, scroll_id: Option<String>) {
        self.state = CursorState::Exhausted;
        if let Some(scroll_id) = scroll_id {
            if let Err(e) = self.engine.clear_scroll(&scroll_id).await {
                warn!("Failed to clear scroll {}: {}", scroll_id, e);
            }
        }
    }
}

impl<T> Drop for ScrollCursor<T> {
    fn drop(&mut self) {
        let CursorState::Open {
            scroll_id: Some(scroll_id),
        } = &self.state
        else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let engine = self.engine.clone();
        let scroll_id = scroll_id.clone();
        handle.spawn(async move {
            if let Err(e) = engine.clear_scroll(&scroll_id).await {
                warn!("Failed to clear scroll {}: {}", scroll_id, e);
            }
        });
    }
}
