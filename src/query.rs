use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::store::CacheStore;

/// State of one fetch flight: loading first, then settled with exactly one
/// of `data`/`error`.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub is_loading: bool,
}

impl<T> QueryState<T> {
    fn loading() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: true,
        }
    }

    fn settled(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => Self {
                data: Some(value),
                error: None,
                is_loading: false,
            },
            Err(error) => Self {
                data: None,
                error: Some(error),
                is_loading: false,
            },
        }
    }

    fn into_result(self) -> Result<T, FetchError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.data.ok_or(FetchError::Interrupted)
    }
}

type FlightHandle<T> = watch::Receiver<QueryState<T>>;

/// How a caller ended up relating to the flight registry for a key.
enum Attached<T> {
    /// The cache answered while taking the registry lock.
    Cached(T),
    /// Another caller's flight is running; this caller observes it.
    Waiter(FlightHandle<T>),
    /// This caller registered the flight and owns the producer invocation.
    Leader(FlightHandle<T>),
}

/// Keyed fetch cache.
///
/// Composes an owned [`CacheStore`] with a registry of in-flight fetches.
/// Concurrent `fetch` calls for the same key run the producer once; every
/// caller receives the flight's settled result. Cloning yields another
/// handle to the same store and registry, so all consumers holding a clone
/// observe each other's fetches and refetches.
pub struct QueryCache<T> {
    store: Arc<CacheStore<T>>,
    in_flight: Arc<Mutex<HashMap<String, FlightHandle<T>>>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(store: CacheStore<T>) -> Self {
        Self {
            store: Arc::new(store),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch the value for `key`, consulting the cache first.
    ///
    /// On a cache miss, either joins the flight already running for `key`
    /// (the producer is dropped unused) or registers a new flight and runs
    /// `producer` exactly once. The flight runs as a spawned task, so it
    /// settles and populates the cache even if this caller is dropped
    /// mid-await; failed flights cache nothing.
    pub async fn fetch<F, Fut>(&self, key: &str, producer: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(value) = self.store.get(key) {
            debug!(key, "Cache hit");
            return Ok(value);
        }

        let attached = {
            let mut flights = self.in_flight.lock().unwrap();
            if let Some(rx) = flights.get(key) {
                Attached::Waiter(rx.clone())
            } else if let Some(value) = self.store.get(key) {
                // A flight settled between the miss above and taking the lock
                Attached::Cached(value)
            } else {
                debug!(key, "Cache miss, starting fetch");
                Attached::Leader(self.register_flight(&mut flights, key, producer))
            }
        };

        match attached {
            Attached::Cached(value) => Ok(value),
            Attached::Waiter(rx) => {
                debug!(key, "Joining in-flight fetch");
                await_settled(rx).await
            }
            Attached::Leader(rx) => await_settled(rx).await,
        }
    }

    /// Invalidate `key` and fetch it fresh, bypassing the cache.
    ///
    /// Any flight already running for `key` is waited out first (its result
    /// is discarded), so producer invocations for a key never overlap. The
    /// producer then runs exactly once and its value replaces the cache
    /// entry for every consumer of the key.
    pub async fn refetch<F, Fut>(&self, key: &str, producer: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let mut producer = Some(producer);
        loop {
            let attached = {
                let mut flights = self.in_flight.lock().unwrap();
                match flights.get(key) {
                    Some(rx) => Attached::Waiter(rx.clone()),
                    None => {
                        self.store.invalidate(key);
                        info!(key, "Refetching");
                        let producer = producer
                            .take()
                            .expect("refetch registers at most one flight");
                        Attached::Leader(self.register_flight(&mut flights, key, producer))
                    }
                }
            };

            match attached {
                Attached::Waiter(rx) => {
                    debug!(key, "Refetch waiting for in-flight fetch to settle");
                    let _ = await_settled(rx).await;
                }
                Attached::Leader(rx) => return await_settled(rx).await,
                Attached::Cached(_) => unreachable!("refetch never consults the cache"),
            }
        }
    }

    /// Cached value for `key`, without fetching.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.store.get(key)
    }

    /// Whether an unexpired entry is cached for `key`, without touching its
    /// recency.
    pub fn is_cached(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Whether a flight for `key` is currently running.
    pub fn is_loading(&self, key: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(key)
    }

    /// Observe the flight currently running for `key`, if any.
    ///
    /// The receiver reports the loading state, then the settled state; the
    /// settled state remains readable after the flight is gone.
    pub fn subscribe(&self, key: &str) -> Option<watch::Receiver<QueryState<T>>> {
        self.in_flight.lock().unwrap().get(key).cloned()
    }

    /// Drop the cache entry for `key`, reporting whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.store.invalidate(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Insert a flight for `key` into the (locked) registry and spawn the
    /// task that drives it: run the producer, cache a success, then
    /// deregister and settle. The producer runs in its own task so a panic
    /// is contained and reported as [`FetchError::Producer`].
    fn register_flight<F, Fut>(
        &self,
        flights: &mut HashMap<String, FlightHandle<T>>,
        key: &str,
        producer: F,
    ) -> FlightHandle<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(QueryState::loading());
        flights.insert(key.to_string(), rx.clone());

        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.in_flight);
        let key = key.to_string();
        let fut = producer();

        tokio::spawn(async move {
            let result = match tokio::spawn(fut).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(key = %key, error = %err, "Producer task did not settle");
                    Err(FetchError::Producer(err.to_string()))
                }
            };

            match &result {
                Ok(value) => {
                    store.insert(&key, value.clone());
                    debug!(key = %key, "Stored fetched value");
                }
                Err(err) => {
                    debug!(key = %key, error = %err, "Fetch failed, nothing cached");
                }
            }

            // Deregister before settling so callers that observe the settled
            // state never find a stale registry entry.
            registry.lock().unwrap().remove(&key);
            let _ = tx.send(QueryState::settled(result));
        });

        rx
    }
}

/// Wait until the flight behind `rx` settles and return its result.
async fn await_settled<T: Clone>(mut rx: FlightHandle<T>) -> Result<T, FetchError> {
    loop {
        {
            let state = rx.borrow_and_update();
            if !state.is_loading {
                return (*state).clone().into_result();
            }
        }
        if rx.changed().await.is_err() {
            // Sender gone; the last broadcast value is all there will be
            let state = rx.borrow();
            return (*state).clone().into_result();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::store::CachePolicy;

    fn unbounded() -> QueryCache<String> {
        QueryCache::new(CacheStore::new(CachePolicy::default()))
    }

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<String, FetchError>> + Send>>
    {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        }
    }

    #[tokio::test]
    async fn first_fetch_runs_producer_once_and_caches() {
        let cache = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache.fetch("products", counting_producer(&calls, "v1")).await;

        assert_eq!(result, Ok("v1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek("products"), Some("v1".to_string()));
        assert!(!cache.is_loading("products"));
    }

    #[tokio::test]
    async fn cached_key_skips_producer() {
        let cache = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .fetch("products", counting_producer(&calls, "v1"))
            .await
            .unwrap();
        let result = cache.fetch("products", counting_producer(&calls, "v2")).await;

        assert_eq!(result, Ok("v1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_next_fetch_to_produce() {
        let cache = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .fetch("products", counting_producer(&calls, "v1"))
            .await
            .unwrap();
        assert!(cache.invalidate("products"));

        let result = cache.fetch("products", counting_producer(&calls, "v2")).await;
        assert_eq!(result, Ok("v2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_flight() {
        let cache = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let leader = tokio::spawn({
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                cache
                    .fetch("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        entered.notify_one();
                        release.notified().await;
                        Ok("v".to_string())
                    })
                    .await
            }
        });

        entered.notified().await;
        assert!(cache.is_loading("k"));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                tokio::spawn({
                    let cache = cache.clone();
                    async move {
                        cache
                            .fetch("k", || async move {
                                panic!("waiter must not invoke its producer")
                            })
                            .await
                    }
                })
            })
            .collect();
        // Let every waiter attach to the flight before releasing it
        tokio::task::yield_now().await;

        release.notify_one();

        assert_eq!(leader.await.unwrap(), Ok("v".to_string()));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok("v".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_loading("k"));
    }

    #[tokio::test]
    async fn failed_flight_delivers_same_error_to_all_waiters() {
        let cache = unbounded();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let leader = tokio::spawn({
            let cache = cache.clone();
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                cache
                    .fetch("k", move || async move {
                        entered.notify_one();
                        release.notified().await;
                        Err::<String, _>(FetchError::Transport("boom".to_string()))
                    })
                    .await
            }
        });

        entered.notified().await;
        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .fetch("k", || async move {
                        panic!("waiter must not invoke its producer")
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        release.notify_one();

        let expected = Err(FetchError::Transport("boom".to_string()));
        assert_eq!(leader.await.unwrap(), expected);
        assert_eq!(waiter.await.unwrap(), expected);
        assert_eq!(cache.peek("k"), None);
        assert!(!cache.is_loading("k"));
    }

    #[tokio::test]
    async fn refetch_always_runs_producer_and_overwrites() {
        let cache = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .fetch("products", counting_producer(&calls, "v1"))
            .await
            .unwrap();

        let result = cache
            .refetch("products", counting_producer(&calls, "v2"))
            .await;

        assert_eq!(result, Ok("v2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek("products"), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn refetch_waits_for_running_fetch() {
        let cache = unbounded();
        let events = Arc::new(Mutex::new(Vec::new()));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let fetcher = tokio::spawn({
            let cache = cache.clone();
            let events = Arc::clone(&events);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                cache
                    .fetch("k", move || async move {
                        events.lock().unwrap().push("fetch-start");
                        entered.notify_one();
                        release.notified().await;
                        events.lock().unwrap().push("fetch-end");
                        Ok("v1".to_string())
                    })
                    .await
            }
        });

        entered.notified().await;
        let refetcher = tokio::spawn({
            let cache = cache.clone();
            let events = Arc::clone(&events);
            async move {
                cache
                    .refetch("k", move || async move {
                        events.lock().unwrap().push("refetch-start");
                        events.lock().unwrap().push("refetch-end");
                        Ok("v2".to_string())
                    })
                    .await
            }
        });
        // Let the refetch attach behind the running flight
        tokio::task::yield_now().await;

        release.notify_one();

        assert_eq!(fetcher.await.unwrap(), Ok("v1".to_string()));
        assert_eq!(refetcher.await.unwrap(), Ok("v2".to_string()));
        assert_eq!(cache.peek("k"), Some("v2".to_string()));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["fetch-start", "fetch-end", "refetch-start", "refetch-end"]
        );
    }

    #[tokio::test]
    async fn panicking_producer_surfaces_as_error() {
        let cache = unbounded();

        let result = cache
            .fetch("k", || async move { panic!("producer blew up") })
            .await;

        assert!(matches!(result, Err(FetchError::Producer(_))));
        assert_eq!(cache.peek("k"), None);
        assert!(!cache.is_loading("k"));

        // The registry is clean, so the key is fetchable again
        let calls = Arc::new(AtomicUsize::new(0));
        let result = cache.fetch("k", counting_producer(&calls, "v")).await;
        assert_eq!(result, Ok("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribe_observes_loading_then_settled() {
        let cache = unbounded();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        assert!(cache.subscribe("k").is_none());

        let leader = tokio::spawn({
            let cache = cache.clone();
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                cache
                    .fetch("k", move || async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok("v".to_string())
                    })
                    .await
            }
        });

        entered.notified().await;
        let mut rx = cache.subscribe("k").expect("flight is running");
        {
            let state = rx.borrow();
            assert!(state.is_loading);
            assert!(state.data.is_none());
            assert!(state.error.is_none());
        }

        release.notify_one();
        leader.await.unwrap().unwrap();

        rx.changed().await.unwrap();
        let state = rx.borrow();
        assert!(!state.is_loading);
        assert_eq!(state.data, Some("v".to_string()));
        assert!(state.error.is_none());
    }
}
