//! Limit/offset pagination shared by the message, conversation and trace
//! listings.
//!
//! Every fetch is stamped with a request generation. A response is applied
//! only if no newer fetch was started after it, so a slow early response can
//! never overwrite the result of a later one.

use async_trait::async_trait;

use crate::error::DeckError;

/// Cursor position plus the `total` reported by the latest fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    limit: u64,
    offset: u64,
    total: u64,
}

impl PaginationState {
    pub fn new(limit: u64) -> Result<Self, DeckError> {
        Self::at(limit, 0, 0)
    }

    /// `offset` is aligned down to a multiple of `limit`.
    pub fn at(limit: u64, offset: u64, total: u64) -> Result<Self, DeckError> {
        if limit == 0 {
            return Err(DeckError::Pagination("limit must be greater than zero".into()));
        }
        Ok(Self {
            limit,
            offset: offset - offset % limit,
            total,
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(self.limit)
    }

    /// 1-based, clamped to the last page when `total` shrank under the cursor.
    pub fn current_page(&self) -> u64 {
        (self.offset / self.limit)
            .saturating_add(1)
            .min(self.total_pages().max(1))
    }

    pub fn has_next(&self) -> bool {
        self.current_page() < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.current_page() > 1
    }

    pub fn next_offset(&self) -> Option<u64> {
        self.has_next().then(|| self.current_page() * self.limit)
    }

    pub fn prev_offset(&self) -> Option<u64> {
        self.has_prev().then(|| (self.current_page() - 2) * self.limit)
    }

    /// Offset of the last page for the current `total`.
    pub fn last_offset(&self) -> u64 {
        (self.total_pages().max(1) - 1) * self.limit
    }

    /// True when the cursor points past the data (e.g. after deletions).
    pub fn is_past_end(&self) -> bool {
        self.offset > 0 && self.offset >= self.total
    }
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// A list endpoint that can be read one page at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Error: Send;

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Page<Self::Item>, Self::Error>;
}

/// Items with a stable identity, needed for the id-merging append.
pub trait Identified {
    fn item_id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Replace,
    Append,
}

/// Handle for one in-flight fetch; see [`PaginatedCollection::begin_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub limit: u64,
    pub offset: u64,
    pub mode: FetchMode,
}

pub struct PaginatedCollection<S: PageSource> {
    source: S,
    state: PaginationState,
    items: Vec<S::Item>,
    /// Offset of the first page held in `items`; load-more keeps it fixed.
    start: u64,
    generation: u64,
}

impl<S: PageSource> PaginatedCollection<S> {
    pub fn new(source: S, limit: u64) -> Result<Self, DeckError> {
        Ok(Self {
            source,
            state: PaginationState::new(limit)?,
            items: Vec::new(),
            start: 0,
            generation: 0,
        })
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn items(&self) -> &[S::Item] {
        &self.items
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Generation of the most recently started fetch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a fetch. Starting another one makes this ticket stale.
    pub fn begin_fetch(&mut self, offset: u64, mode: FetchMode) -> FetchTicket {
        self.generation += 1;
        let limit = self.state.limit;
        FetchTicket {
            generation: self.generation,
            limit,
            offset: offset - offset % limit,
            mode,
        }
    }

    /// Apply a fetched page. Returns `false` (and leaves state untouched)
    /// when a newer fetch has been started since `ticket` was issued.
    pub fn complete(&mut self, ticket: FetchTicket, page: Page<S::Item>) -> bool {
        if !self.accept(&ticket) {
            return false;
        }
        match ticket.mode {
            FetchMode::Replace => {
                self.items = page.items;
                self.start = ticket.offset;
            }
            // No id de-duplication: a refresh racing with load-more can
            // legitimately repeat items. Use `complete_merging` to merge.
            FetchMode::Append => self.items.extend(page.items),
        }
        self.state.offset = ticket.offset;
        self.state.total = page.total;
        true
    }

    fn accept(&self, ticket: &FetchTicket) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(
                stale = ticket.generation,
                latest = self.generation,
                "Discarding stale page response"
            );
            return false;
        }
        true
    }

    async fn fetch(&mut self, offset: u64, mode: FetchMode) -> Result<bool, S::Error> {
        let ticket = self.begin_fetch(offset, mode);
        let page = self.source.fetch_page(ticket.limit, ticket.offset).await?;
        Ok(self.complete(ticket, page))
    }

    /// Replace the items with the page at `offset`.
    pub async fn load_page(&mut self, offset: u64) -> Result<bool, S::Error> {
        self.fetch(offset, FetchMode::Replace).await
    }

    pub async fn first_page(&mut self) -> Result<bool, S::Error> {
        self.load_page(0).await
    }

    /// Re-fetch every page currently held, from the first one shown up to
    /// the cursor. If the data shrank beneath the cursor the collection steps
    /// back to the new last page.
    pub async fn refresh(&mut self) -> Result<bool, S::Error> {
        let applied = self.reload_range().await?;
        if applied && self.items.is_empty() && self.state.is_past_end() {
            let last = self.state.last_offset();
            tracing::debug!(from = self.state.offset, to = last, "Page emptied, stepping back");
            return self.load_page(last).await;
        }
        Ok(applied)
    }

    /// Offsets `start..=state.offset` under a single ticket, stopping early at
    /// a short page.
    async fn reload_range(&mut self) -> Result<bool, S::Error> {
        let end = self.state.offset;
        let ticket = self.begin_fetch(self.start, FetchMode::Replace);
        let mut items = Vec::new();
        let mut offset = ticket.offset;
        let total = loop {
            let page = self.source.fetch_page(ticket.limit, offset).await?;
            let short = (page.items.len() as u64) < ticket.limit;
            if page.items.is_empty() && offset > ticket.offset {
                // cursor stays on the last page that still has rows
                offset -= ticket.limit;
                break page.total;
            }
            items.extend(page.items);
            if short || offset >= end {
                break page.total;
            }
            offset = offset.saturating_add(ticket.limit);
        };
        if !self.accept(&ticket) {
            return Ok(false);
        }
        if offset != ticket.offset {
            tracing::debug!(from = ticket.offset, to = offset, "Reloaded accumulated pages");
        }
        self.items = items;
        self.start = ticket.offset;
        self.state.offset = offset;
        self.state.total = total;
        Ok(true)
    }

    /// Guarded: a no-op returning `Ok(false)` on the last page.
    pub async fn next_page(&mut self) -> Result<bool, S::Error> {
        match self.state.next_offset() {
            Some(offset) => self.load_page(offset).await,
            None => Ok(false),
        }
    }

    /// Guarded: a no-op returning `Ok(false)` on the first page.
    pub async fn prev_page(&mut self) -> Result<bool, S::Error> {
        match self.state.prev_offset() {
            Some(offset) => self.load_page(offset).await,
            None => Ok(false),
        }
    }

    /// Fetch the next page and append it after the current items, without
    /// de-duplicating by id.
    pub async fn load_more(&mut self) -> Result<bool, S::Error> {
        match self.state.next_offset() {
            Some(offset) => self.fetch(offset, FetchMode::Append).await,
            None => Ok(false),
        }
    }
}

impl<S> PaginatedCollection<S>
where
    S: PageSource,
    S::Item: Identified,
{
    /// Like [`complete`](Self::complete), but appended items replace
    /// existing items with the same id instead of duplicating them.
    pub fn complete_merging(&mut self, ticket: FetchTicket, page: Page<S::Item>) -> bool {
        if ticket.mode == FetchMode::Replace {
            return self.complete(ticket, page);
        }
        if !self.accept(&ticket) {
            return false;
        }
        for item in page.items {
            match self
                .items
                .iter()
                .position(|existing| existing.item_id() == item.item_id())
            {
                Some(i) => self.items[i] = item,
                None => self.items.push(item),
            }
        }
        self.state.offset = ticket.offset;
        self.state.total = page.total;
        true
    }

    /// Opt-in id-merging variant of [`load_more`](Self::load_more).
    pub async fn load_more_merging(&mut self) -> Result<bool, S::Error> {
        let Some(offset) = self.state.next_offset() else {
            return Ok(false);
        };
        let ticket = self.begin_fetch(offset, FetchMode::Append);
        let page = self.source.fetch_page(ticket.limit, ticket.offset).await?;
        Ok(self.complete_merging(ticket, page))
    }
}

// ============================================================================
// TESTS
// ============================================================================
