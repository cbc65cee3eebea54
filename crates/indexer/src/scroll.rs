//! Exhaustive scans over a kept-alive scroll cursor.
//!
//! A [`ScrollSession`] moves through a small state machine:
//!
//! ```text
//!            open
//!              │
//!              ▼
//!   ┌────── Open ──────┐
//!   │        │         │
//!  short   ttl idle   close
//!  page    or context  │
//!   │      missing     │
//!   ▼        ▼         ▼
//! Exhausted Expired  Closed
//! ```
//!
//! Continuing from any state but `Open` fails with
//! [`CursorError::InvalidCursor`]. With no concurrent writes, the pages of a
//! session visit every match exactly once, in session sort order.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ScrollConfig;
use crate::core::ClusterClient;
use crate::error::{CursorError, CursorState, IndexerResult, TransportError};
use crate::types::{Hit, SearchRequest, SearchResponse, SortField};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// More pages may follow.
    Open,
    /// The last page was returned.
    Exhausted,
    /// The keep-alive elapsed or the cluster dropped the context.
    Expired,
    /// Closed by the caller.
    Closed,
}

impl SessionState {
    fn as_cursor_state(self) -> Option<CursorState> {
        match self {
            SessionState::Open => None,
            SessionState::Exhausted => Some(CursorState::Exhausted),
            SessionState::Expired => Some(CursorState::Expired),
            SessionState::Closed => Some(CursorState::Closed),
        }
    }
}

/// An open scan.
#[derive(Debug, Clone)]
pub struct ScrollSession {
    token: Option<String>,
    page_size: usize,
    sort: Vec<SortField>,
    ttl: Duration,
    state: SessionState,
    last_activity: Instant,
    pages: usize,
}

impl ScrollSession {
    /// Continuation token of the most recent page.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Requested hits per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Sort order of the session.
    pub fn sort(&self) -> &[SortField] {
        &self.sort
    }

    /// Keep-alive between continuations.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once the last page was returned.
    pub fn is_exhausted(&self) -> bool {
        self.state == SessionState::Exhausted
    }

    /// Pages returned so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn record_page(&mut self, response: &SearchResponse) {
        if let Some(token) = &response.scroll_id {
            self.token = Some(token.clone());
        }
        self.last_activity = Instant::now();
        self.pages += 1;
        if response.hits.len() < self.page_size {
            self.state = SessionState::Exhausted;
        }
    }

    fn idle_expired(&self) -> bool {
        self.last_activity.elapsed() >= self.ttl
    }
}

/// Opens, continues and closes scroll sessions.
#[derive(Debug, Clone)]
pub struct ScrollManager {
    client: Arc<dyn ClusterClient>,
    config: ScrollConfig,
}

impl ScrollManager {
    /// Creates a manager with default page size and keep-alive from
    /// `config`.
    pub fn new(client: Arc<dyn ClusterClient>, config: ScrollConfig) -> Self {
        Self { client, config }
    }

    /// Opens a session with the configured page size and keep-alive.
    pub async fn open(
        &self,
        request: SearchRequest,
    ) -> IndexerResult<(ScrollSession, SearchResponse)> {
        self.open_with(request, self.config.page_size, self.config.ttl)
            .await
    }

    /// Opens a session and returns its first page.
    ///
    /// Sorts by physical order when the request has no sort.
    pub async fn open_with(
        &self,
        mut request: SearchRequest,
        page_size: usize,
        ttl: Duration,
    ) -> IndexerResult<(ScrollSession, SearchResponse)> {
        let page_size = page_size.max(1);
        if request.sort.is_empty() {
            request.sort.push(SortField::doc_order());
        }
        request.size = Some(page_size);
        request.from = None;
        request.scroll = Some(ttl);

        let response = self.client.search(&request).await?;

        let mut session = ScrollSession {
            token: None,
            page_size,
            sort: request.sort,
            ttl,
            state: SessionState::Open,
            last_activity: Instant::now(),
            pages: 0,
        };
        session.record_page(&response);

        if session.state == SessionState::Open && session.token.is_none() {
            return Err(TransportError::Decode {
                backend_name: self.client.name().to_string(),
                message: "search response carried no scroll id".to_string(),
            }
            .into());
        }

        debug!(
            indices = ?request.indices,
            hits = response.hits.len(),
            page_size = page_size,
            exhausted = session.is_exhausted(),
            "Opened scroll"
        );

        if session.is_exhausted() {
            self.release(&session).await;
        }
        Ok((session, response))
    }

    /// Returns the next page of an open session.
    pub async fn continue_scan(
        &self,
        session: &mut ScrollSession,
    ) -> IndexerResult<SearchResponse> {
        if let Some(state) = session.state.as_cursor_state() {
            return Err(CursorError::InvalidCursor { state }.into());
        }

        if session.idle_expired() {
            debug!(ttl_ms = session.ttl.as_millis() as u64, "Scroll keep-alive elapsed");
            session.state = SessionState::Expired;
            self.release(session).await;
            return Err(CursorError::InvalidCursor {
                state: CursorState::Expired,
            }
            .into());
        }

        let token = session.token.clone().unwrap_or_default();
        let response = match self.client.scroll(&token, session.ttl).await {
            Ok(response) => response,
            Err(TransportError::ScrollContextMissing { message, .. }) => {
                debug!(reason = %message, "Scroll context missing on cluster");
                session.state = SessionState::Expired;
                return Err(CursorError::InvalidCursor {
                    state: CursorState::Expired,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        session.record_page(&response);
        debug!(
            page = session.pages,
            hits = response.hits.len(),
            exhausted = session.is_exhausted(),
            "Continued scroll"
        );

        if session.is_exhausted() {
            self.release(session).await;
        }
        Ok(response)
    }

    /// Closes a session and releases its server context.
    ///
    /// Release failures are logged, not returned.
    pub async fn close(&self, session: &mut ScrollSession) {
        if session.state == SessionState::Open {
            self.release(session).await;
        }
        session.state = SessionState::Closed;
    }

    /// Walks every page of a scan and collects all hits.
    pub async fn scan_all(&self, request: SearchRequest) -> IndexerResult<Vec<Hit>> {
        let (mut session, first) = self.open(request).await?;
        let mut hits = first.hits;

        while session.state == SessionState::Open {
            match self.continue_scan(&mut session).await {
                Ok(page) => hits.extend(page.hits),
                Err(e) => {
                    self.close(&mut session).await;
                    return Err(e);
                }
            }
        }

        Ok(hits)
    }

    async fn release(&self, session: &ScrollSession) {
        let Some(token) = session.token.as_deref() else {
            return;
        };
        if let Err(e) = self.client.clear_scroll(token).await {
            warn!(error = %e, "Failed to clear scroll context");
        }
    }
}
