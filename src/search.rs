use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    api::{AdvancedSearchQuery, Backend, SearchFilters},
    errors::ApiError,
    models::{CulturalSite, Pagination, SearchSuggestion, Sorting},
};

pub const DEBOUNCE: Duration = Duration::from_millis(300);
/// shorter queries mean "no active search"
pub const MIN_QUERY_CHARS: usize = 2;
pub const AUTOCOMPLETE_LIMIT: u32 = 10;

/// What a single search request produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome<R> {
    pub results: Vec<R>,
    pub total: u64,
    pub pagination: Option<Pagination>,
    pub sorting: Option<Sorting>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchState<R> {
    /// the query the current results belong to
    pub query: String,
    pub results: Vec<R>,
    pub total: u64,
    pub pagination: Option<Pagination>,
    pub sorting: Option<Sorting>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<R> Default for SearchState<R> {
    fn default() -> Self {
        Self {
            query: String::new(),
            results: Vec::new(),
            total: 0,
            pagination: None,
            sorting: None,
            loading: false,
            error: None,
        }
    }
}

type Runner<R> = Arc<
    dyn Fn(String, SearchFilters, CancellationToken) -> BoxFuture<'static, Result<SearchOutcome<R>, ApiError>>
        + Send
        + Sync,
>;

struct Pending {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl Pending {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

/// Search-as-you-type with debounce-with-replace semantics.
///
/// At most one invocation is pending at a time; every new [`DebouncedSearch::search`] replaces
/// it, so only the last query typed within the debounce window reaches the backend.
pub struct DebouncedSearch<R> {
    runner: Runner<R>,
    delay: Duration,
    state: Arc<watch::Sender<SearchState<R>>>,
    pending: Mutex<Option<Pending>>,
}

impl<R> DebouncedSearch<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(delay: Duration, runner: F) -> Self
    where
        F: Fn(String, SearchFilters, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SearchOutcome<R>, ApiError>> + Send + 'static,
    {
        let runner: Runner<R> =
            Arc::new(move |query, filters, token| runner(query, filters, token).boxed());

        Self {
            runner,
            delay,
            state: Arc::new(watch::channel(SearchState::default()).0),
            pending: Mutex::new(None),
        }
    }

    pub fn search(&self, query: &str, filters: SearchFilters) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let query = query.trim().to_string();
        if query.chars().count() < MIN_QUERY_CHARS {
            self.state.send_replace(SearchState::default());
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_search(
            self.runner.clone(),
            self.state.clone(),
            self.delay,
            query,
            filters,
            token.clone(),
        ));

        *pending = Some(Pending { handle, token });
    }

    /// drops the pending invocation and any request in flight, and empties the state
    pub fn clear_search(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
        self.state.send_replace(SearchState::default());
    }

    pub fn state(&self) -> SearchState<R> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState<R>> {
        self.state.subscribe()
    }
}

impl<R> Drop for DebouncedSearch<R> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
    }
}

async fn run_search<R: Clone>(
    runner: Runner<R>,
    state: Arc<watch::Sender<SearchState<R>>>,
    delay: Duration,
    query: String,
    filters: SearchFilters,
    token: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    state.send_if_modified(|state| {
        if token.is_cancelled() {
            return false;
        }
        state.loading = true;
        state.error = None;
        true
    });

    debug!(%query, "searching");
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = runner(query.clone(), filters, token.clone()) => result,
    };

    state.send_if_modified(|state| {
        if token.is_cancelled() {
            return false;
        }

        *state = match result {
            Ok(outcome) => SearchState {
                query,
                results: outcome.results,
                total: outcome.total,
                pagination: outcome.pagination,
                sorting: outcome.sorting,
                loading: false,
                error: None,
            },
            Err(e) if e.is_cancelled() => SearchState {
                loading: false,
                ..state.clone()
            },
            Err(e) => SearchState {
                query,
                error: Some(e.to_string()),
                ..SearchState::default()
            },
        };
        true
    });
}

/// name suggestions for the search box
pub fn autocomplete(backend: Arc<dyn Backend>) -> DebouncedSearch<SearchSuggestion> {
    DebouncedSearch::new(DEBOUNCE, move |query: String, _filters, cancel| {
        let backend = backend.clone();
        async move {
            let response = backend
                .autocomplete(&query, AUTOCOMPLETE_LIMIT, &cancel)
                .await?;
            Ok(SearchOutcome {
                total: response.total.max(response.suggestions.len() as u64),
                results: response.suggestions,
                pagination: None,
                sorting: None,
            })
        }
    })
}

/// full search with filters, sorting and pagination
pub fn advanced(backend: Arc<dyn Backend>) -> DebouncedSearch<CulturalSite> {
    DebouncedSearch::new(DEBOUNCE, move |q: String, filters, cancel| {
        let backend = backend.clone();
        async move {
            let response = backend
                .advanced_search(&AdvancedSearchQuery { q, filters }, &cancel)
                .await?;
            Ok(SearchOutcome {
                results: response.sites,
                total: response.total_matches,
                pagination: Some(response.pagination),
                sorting: Some(response.sorting),
            })
        }
    })
}
