//! Paginated, filterable list controller.
//!
//! The controller owns one authoritative [`ListQuery`] and the last page it
//! accepted. Every fetch it issues carries a generation number; a response is
//! applied only if its generation is still the latest one issued, so the
//! visible rows never regress to an older term or page regardless of the
//! order in which responses arrive. State is kept behind a lock that is never
//! held across an await.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use futures::future::try_join;
use shared::{
    pagination::{offset_for_page, page_in_range, total_pages},
    protocol::ListFilter,
};
use tracing::{debug, warn};

use crate::{
    error::ListError,
    source::{DataSource, MutationSink, Record, RecordKey},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    term: String,
    page: u32,
}

impl ListQuery {
    pub fn first_page(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            page: 1,
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn offset(&self, page_size: u32) -> u64 {
        offset_for_page(self.page, page_size)
    }

    fn with_page(&self, page: u32) -> Self {
        Self {
            term: self.term.clone(),
            page: page.max(1),
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::first_page("")
    }
}

/// Whether a fetch's response became the visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// A newer fetch was issued before this one completed; its result was
    /// dropped.
    Superseded,
}

/// Snapshot handed to the presentation layer. `rows`, `term`, `page` and
/// `total_count` always describe the same accepted response.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel<R> {
    pub rows: Vec<R>,
    pub term: String,
    pub page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub is_loading: bool,
}

impl<R: Record> ViewModel<R> {
    pub fn row(&self, key: &R::Key) -> Option<&R> {
        self.rows.iter().find(|row| &row.key() == key)
    }

    pub fn has_previous_page(&self) -> bool {
        self.page > 1
    }

    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages
    }
}

struct ControllerState<R> {
    query: ListQuery,
    settled: ListQuery,
    rows: Vec<R>,
    total_count: u64,
    is_loading: bool,
    generation: u64,
}

impl<R> ControllerState<R> {
    fn issue(&mut self) -> FetchTicket {
        self.generation += 1;
        self.is_loading = true;
        FetchTicket {
            generation: self.generation,
            query: self.query.clone(),
        }
    }
}

struct FetchTicket {
    generation: u64,
    query: ListQuery,
}

/// Rolls back the loading state of a fetch whose future was dropped before
/// its response arrived, unless a newer fetch has been issued since.
struct InFlight<'a, R> {
    state: &'a Mutex<ControllerState<R>>,
    generation: u64,
    finished: bool,
}

impl<R> Drop for InFlight<'_, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == self.generation {
            debug!(generation = self.generation, "fetch abandoned before completion");
            state.is_loading = false;
            state.query = state.settled.clone();
        }
    }
}

pub struct ListController<S: DataSource> {
    source: S,
    page_size: u32,
    state: Mutex<ControllerState<S::Record>>,
}

impl<S: DataSource> ListController<S> {
    /// Starts on page 1 with an empty term and no rows. Call
    /// [`refresh`](Self::refresh) to load the first page.
    pub fn new(source: S, page_size: u32) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            state: Mutex::new(ControllerState {
                query: ListQuery::default(),
                settled: ListQuery::default(),
                rows: Vec::new(),
                total_count: 0,
                is_loading: false,
                generation: 0,
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The most recently requested query, which may still be loading.
    pub fn query(&self) -> ListQuery {
        self.lock_state().query.clone()
    }

    pub fn view_model(&self) -> ViewModel<S::Record> {
        let state = self.lock_state();
        ViewModel {
            rows: state.rows.clone(),
            term: state.settled.term.clone(),
            page: state.settled.page,
            total_pages: total_pages(state.total_count, self.page_size),
            total_count: state.total_count,
            is_loading: state.is_loading,
        }
    }

    /// Replaces the term and loads its first page. Any fetch still in flight
    /// is superseded. Dropping the returned future before it completes
    /// abandons the request and restores the last accepted query.
    pub async fn search(&self, term: impl Into<String>) -> Result<FetchOutcome, ListError> {
        let ticket = {
            let mut state = self.lock_state();
            state.query = ListQuery::first_page(term);
            state.issue()
        };
        self.fetch(ticket).await
    }

    /// Loads page `page` of the current term. Pages outside
    /// `1..=total_pages` of the last accepted response are rejected without
    /// touching any state. While a new term is still loading its page count
    /// is unknown, so only page 1 is accepted.
    pub async fn go_to_page(&self, page: u32) -> Result<FetchOutcome, ListError> {
        let ticket = {
            let mut state = self.lock_state();
            let total_pages = if state.query.term == state.settled.term {
                total_pages(state.total_count, self.page_size)
            } else {
                1
            };
            if !page_in_range(page, total_pages) {
                debug!(requested = page, total_pages, "rejecting out-of-range page");
                return Err(ListError::InvalidPageRequest {
                    requested: page,
                    total_pages,
                });
            }
            state.query = state.query.with_page(page);
            state.issue()
        };
        self.fetch(ticket).await
    }

    /// Re-fetches the current term and page. The page index is kept even if
    /// the page comes back empty.
    pub async fn refresh(&self) -> Result<FetchOutcome, ListError> {
        let ticket = self.lock_state().issue();
        self.fetch(ticket).await
    }

    async fn fetch(&self, ticket: FetchTicket) -> Result<FetchOutcome, ListError> {
        let mut in_flight = InFlight {
            state: &self.state,
            generation: ticket.generation,
            finished: false,
        };
        let filter = ListFilter::new(ticket.query.term());
        let offset = ticket.query.offset(self.page_size);
        debug!(
            generation = ticket.generation,
            term = ticket.query.term(),
            page = ticket.query.page(),
            offset,
            "fetching page"
        );

        let result = try_join(
            self.source.count(&filter),
            self.source.list(&filter, offset, self.page_size),
        )
        .await
        .and_then(|(total_count, rows)| {
            if rows.len() > self.page_size as usize {
                return Err(anyhow!(
                    "data source returned {} rows for a page size of {}",
                    rows.len(),
                    self.page_size
                ));
            }
            Ok((total_count, rows))
        });

        in_flight.finished = true;
        let mut state = self.lock_state();
        if state.generation != ticket.generation {
            debug!(
                generation = ticket.generation,
                latest = state.generation,
                term = ticket.query.term(),
                page = ticket.query.page(),
                "dropping superseded response"
            );
            return Ok(FetchOutcome::Superseded);
        }

        state.is_loading = false;
        match result {
            Ok((total_count, rows)) => {
                state.rows = rows;
                state.total_count = total_count;
                state.settled = ticket.query;
                Ok(FetchOutcome::Applied)
            }
            Err(source) => {
                state.query = state.settled.clone();
                warn!(
                    term = ticket.query.term(),
                    page = ticket.query.page(),
                    error = %format!("{source:#}"),
                    "page fetch failed"
                );
                Err(ListError::FetchFailure {
                    term: ticket.query.term,
                    page: ticket.query.page,
                    source,
                })
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState<S::Record>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: MutationSink> ListController<S> {
    pub async fn create(&self, draft: &S::Draft) -> Result<FetchOutcome, ListError> {
        self.source
            .create(draft)
            .await
            .map_err(|source| mutation_failure("create", source))?;
        self.refresh().await
    }

    pub async fn update(
        &self,
        key: &RecordKey<S>,
        draft: &S::Draft,
    ) -> Result<FetchOutcome, ListError> {
        self.source
            .update(key, draft)
            .await
            .map_err(|source| mutation_failure("update", source))?;
        self.refresh().await
    }

    /// Removes one record and refreshes the current page. If that empties
    /// the page, navigating back is left to the caller.
    pub async fn remove(&self, key: &RecordKey<S>) -> Result<FetchOutcome, ListError> {
        self.source
            .remove(key)
            .await
            .map_err(|source| mutation_failure("remove", source))?;
        self.refresh().await
    }
}

fn mutation_failure(action: &'static str, source: anyhow::Error) -> ListError {
    warn!(action, error = %format!("{source:#}"), "mutation failed");
    ListError::MutationFailure { action, source }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
