use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ApiError;

type Producer<D, T> =
    Arc<dyn Fn(D, CancellationToken) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

struct Current<D> {
    deps: D,
    token: CancellationToken,
}

struct Inner<D, T> {
    producer: Producer<D, T>,
    state: watch::Sender<FetchState<T>>,
    current: Mutex<Option<Current<D>>>,
    label: Option<&'static str>,
}

/// Loading/error/data state around an async producer, re-run whenever its dependencies change.
///
/// Starting a request cancels the one before it, and a request only writes its result if it
/// is still the latest one at the moment of writing, so a slow superseded response never
/// overwrites a newer one. Dropping the handle cancels whatever is in flight.
pub struct Resource<D, T> {
    inner: Arc<Inner<D, T>>,
}

impl<D, T> Resource<D, T>
where
    D: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn(D, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self::build(None, producer)
    }

    /// like [`Resource::new`], additionally logs how long every run took under `label`
    pub fn labelled<F, Fut>(label: &'static str, producer: F) -> Self
    where
        F: Fn(D, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self::build(Some(label), producer)
    }

    fn build<F, Fut>(label: Option<&'static str>, producer: F) -> Self
    where
        F: Fn(D, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let producer: Producer<D, T> = Arc::new(move |deps, token| producer(deps, token).boxed());

        Self {
            inner: Arc::new(Inner {
                producer,
                state: watch::channel(FetchState::default()).0,
                current: Mutex::new(None),
                label,
            }),
        }
    }

    /// runs the producer if `deps` differ from the last ones, returns `None` otherwise
    pub fn set_deps(&self, deps: D) -> Option<JoinHandle<()>> {
        let unchanged = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|current| current.deps == deps);

        if unchanged {
            None
        } else {
            Some(self.start(deps))
        }
    }

    /// runs the producer again with the last dependencies, `None` if there never were any
    pub fn refetch(&self) -> Option<JoinHandle<()>> {
        let deps = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|current| current.deps.clone())?;

        Some(self.start(deps))
    }

    fn start(&self, deps: D) -> JoinHandle<()> {
        let token = CancellationToken::new();

        {
            let mut current = self
                .inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let previous = current.replace(Current {
                deps: deps.clone(),
                token: token.clone(),
            });
            if let Some(previous) = previous {
                previous.token.cancel();
            }

            self.inner.state.send_modify(|state| state.loading = true);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(deps, token).await })
    }

    /// cancels the request in flight, keeping whatever data is already there
    pub fn cancel(&self) {
        let current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = current.as_ref() {
            current.token.cancel();
        }
        self.inner.state.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }

    pub fn state(&self) -> FetchState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.inner.state.subscribe()
    }

    /// waits until no request is in flight and returns the state at that point
    pub async fn settled(&self) -> FetchState<T> {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|state| !state.loading).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        };
        state
    }
}

impl<D, T> Inner<D, T> {
    async fn run(&self, deps: D, token: CancellationToken) {
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = (self.producer)(deps, token.clone()) => result,
        };

        if let Some(label) = self.label {
            debug!(
                resource = label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "fetch finished"
            );
        }

        // checked under the channel's write lock, so a newer request can't slip in between
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }

            match result {
                Ok(data) => {
                    *state = FetchState {
                        data: Some(data),
                        loading: false,
                        error: None,
                    };
                }
                Err(e) if e.is_cancelled() => state.loading = false,
                Err(e) => {
                    *state = FetchState {
                        data: None,
                        loading: false,
                        error: Some(e.to_string()),
                    };
                }
            }
            true
        });
    }
}

impl<D, T> Drop for Resource<D, T> {
    fn drop(&mut self) {
        let current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = current.as_ref() {
            current.token.cancel();
        }
    }
}
