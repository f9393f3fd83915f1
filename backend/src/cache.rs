//! Route cache keyed by rounded start/goal and route type.
//!
//! Each request scope (a client context, or the shared scope for anonymous
//! callers) remembers the last start/goal pair it asked for. When a scope
//! moves to a different pair, ready entries for its previous pair are dropped
//! unless another scope still observes that pair. In-flight fetches are never
//! dropped: concurrent requests for the same key always share one fetch, and
//! the fetch runs as its own task so it completes even if every waiting caller
//! goes away. A finished fetch is stored only if its pair is still observed.
//! Failed fetches are never stored.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use tokio::task::JoinError;

use crate::models::{Coordinate, RouteRequest, RouteType};

/// Scope used for callers without a client context.
pub const SHARED_SCOPE: &str = "";

/// Scopes remembered at once; the least recently active one is forgotten
/// first.
const MAX_SCOPES: usize = 1024;

const MICRO_DEGREES: f64 = 1_000_000.0;

/// Start/goal pair rounded to 6 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    start: (i64, i64),
    goal: (i64, i64),
}

impl RouteKey {
    pub fn new(start: Coordinate, goal: Coordinate) -> Self {
        Self {
            start: to_micro(start),
            goal: to_micro(goal),
        }
    }
}

fn to_micro(c: Coordinate) -> (i64, i64) {
    (
        (c.latitude * MICRO_DEGREES).round() as i64,
        (c.longitude * MICRO_DEGREES).round() as i64,
    )
}

fn write_micro(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    write!(f, "{sign}{}.{:06}", abs / 1_000_000, abs % 1_000_000)
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_micro(f, self.start.0)?;
        f.write_str(",")?;
        write_micro(f, self.start.1)?;
        f.write_str("_")?;
        write_micro(f, self.goal.0)?;
        f.write_str(",")?;
        write_micro(f, self.goal.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub route: RouteKey,
    pub route_type: RouteType,
}

impl CacheKey {
    pub fn for_request(request: &RouteRequest) -> Self {
        Self {
            route: RouteKey::new(request.start, request.goal),
            route_type: request.route_type,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.route, self.route_type)
    }
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
        }
    }
}

pub type FetchResult<T, E> = Result<CacheEntry<T>, Arc<E>>;
type InFlight<T, E> = Shared<BoxFuture<'static, FetchResult<T, E>>>;

struct State<T, E> {
    /// Last start/goal pair per scope.
    observed: LruCache<String, RouteKey>,
    ready: HashMap<CacheKey, CacheEntry<T>>,
    in_flight: HashMap<CacheKey, InFlight<T, E>>,
}

impl<T, E> State<T, E> {
    fn is_observed(&self, route: RouteKey) -> bool {
        self.observed.iter().any(|(_, pair)| *pair == route)
    }

    fn observe(&mut self, scope: &str, route: RouteKey) {
        if self.observed.get(scope) == Some(&route) {
            return;
        }
        let Some((displaced, previous)) = self.observed.push(scope.to_string(), route) else {
            return;
        };
        if previous == route {
            return;
        }
        if displaced == scope {
            tracing::debug!("scope {:?} moved from {} to {}", scope, previous, route);
        } else {
            tracing::debug!("forgetting scope {:?} at {}", displaced, previous);
        }
        self.release(previous);
    }

    /// Drop ready entries for `route` once no scope observes it.
    fn release(&mut self, route: RouteKey) {
        if self.is_observed(route) {
            return;
        }
        let before = self.ready.len();
        self.ready.retain(|key, _| key.route != route);
        let dropped = before - self.ready.len();
        if dropped > 0 {
            tracing::info!("start/goal {} no longer requested, dropped {} cached routes", route, dropped);
        }
    }

    fn complete(&mut self, key: CacheKey, entry: CacheEntry<T>) {
        self.in_flight.remove(&key);
        if !self.is_observed(key.route) {
            tracing::debug!("discarding route for {}, start/goal no longer requested", key);
            return;
        }
        let divergent = self.ready.contains_key(&key);
        if divergent {
            tracing::warn!(
                target: "cache_coherence",
                "CacheCoherenceWarning: second fetch completed for cached key {}",
                key
            );
        }
        debug_assert!(!divergent, "divergent write for cache key {key}");
        self.ready.insert(key, entry);
    }
}

pub struct RouteCache<T, E> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for RouteCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Default for RouteCache<T, E> {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(MAX_SCOPES).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Arc::new(Mutex::new(State {
                observed: LruCache::new(capacity),
                ready: HashMap::new(),
                in_flight: HashMap::new(),
            })),
        }
    }
}

impl<T, E> RouteCache<T, E>
where
    T: Send + Sync + 'static,
    E: From<JoinError> + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ready entry for `key`, if any. Does not touch any scope.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.lock().ready.get(key).cloned()
    }

    /// Serve `key` from the cache, join an in-flight fetch for it, or start
    /// one with `fetch`. `scope` defaults to [`SHARED_SCOPE`].
    pub async fn get_or_fetch<F, Fut>(
        &self,
        scope: Option<&str>,
        key: CacheKey,
        fetch: F,
    ) -> FetchResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut state = self.lock();
            state.observe(scope.unwrap_or(SHARED_SCOPE), key.route);

            if let Some(entry) = state.ready.get(&key) {
                tracing::debug!("route cache hit for {}", key);
                return Ok(entry.clone());
            }

            match state.in_flight.get(&key) {
                Some(pending) => {
                    tracing::debug!("joining in-flight fetch for {}", key);
                    pending.clone()
                }
                None => {
                    tracing::debug!("route cache miss for {}, fetching", key);
                    let pending = self.spawn_fetch(key, fetch());
                    state.in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn spawn_fetch<Fut>(&self, key: CacheKey, fetch: Fut) -> InFlight<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        // The fetch gets its own task so a panic there still clears the
        // in-flight slot.
        let task = tokio::spawn(async move {
            let result = tokio::spawn(fetch).await;
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(Ok(value)) => {
                    let entry = CacheEntry {
                        value: Arc::new(value),
                        fetched_at: Utc::now(),
                    };
                    state.complete(key, entry.clone());
                    Ok(entry)
                }
                Ok(Err(err)) => {
                    state.in_flight.remove(&key);
                    Err(Arc::new(err))
                }
                Err(join_error) => {
                    state.in_flight.remove(&key);
                    Err(Arc::new(E::from(join_error)))
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(Arc::new(E::from(join_error))),
            }
        }
        .boxed()
        .shared()
    }

    /// `"<route key>: [types]"` per cached pair.
    pub fn status(&self) -> Vec<String> {
        let state = self.lock();
        let mut by_route: HashMap<RouteKey, Vec<RouteType>> = HashMap::new();
        for key in state.ready.keys() {
            by_route.entry(key.route).or_default().push(key.route_type);
        }
        let mut lines: Vec<String> = by_route
            .into_iter()
            .map(|(route, mut types)| {
                types.sort();
                let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                format!("{route}: [{}]", names.join(", "))
            })
            .collect();
        lines.sort();
        lines
    }

    /// Drop every ready entry and forget all scopes. Fetches still running
    /// are kept for their waiters but will not write back unless their pair
    /// is requested again.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.ready.clear();
        state.observed.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("upstream down")]
        Down,
        #[error(transparent)]
        Join(#[from] JoinError),
    }

    type Cache = RouteCache<String, TestError>;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    fn key(goal_lat: f64, route_type: RouteType) -> CacheKey {
        CacheKey::for_request(&RouteRequest {
            start: coord(37.5665, 126.978),
            goal: coord(goal_lat, 126.978),
            route_type,
        })
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        value: &str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, TestError>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[test]
    fn test_route_key_rounds_to_six_decimals() {
        let a = RouteKey::new(coord(37.56650001, 126.978), coord(37.57, -0.5));
        let b = RouteKey::new(coord(37.5665, 126.97800004), coord(37.57, -0.5));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "37.566500,126.978000_37.570000,-0.500000");
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(37.57, RouteType::Normal);

        let first = cache
            .get_or_fetch(None, k, counted(&calls, Duration::ZERO, "route"))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch(None, k, counted(&calls, Duration::ZERO, "other"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*second.value, "route");
        assert!(Arc::ptr_eq(&first.value, &second.value));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(37.57, RouteType::Safe);

        let (a, b) = tokio::join!(
            cache.get_or_fetch(None, k, counted(&calls, Duration::from_millis(50), "route")),
            cache.get_or_fetch(None, k, counted(&calls, Duration::from_millis(50), "route")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.unwrap().value, &b.unwrap().value));
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_populates_cache() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key(37.57, RouteType::Normal);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.get_or_fetch(None, k, counted(&calls, Duration::from_millis(50), "route")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get(&k).map(|e| (*e.value).clone()), Some("route".to_string()));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Cache::new();
        let k = key(37.57, RouteType::Normal);

        let err = cache
            .get_or_fetch(None, k, || async { Err(TestError::Down) })
            .await
            .unwrap_err();
        assert!(matches!(*err, TestError::Down));
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.in_flight(), 0);

        let ok = cache
            .get_or_fetch(None, k, || async { Ok("retry".to_string()) })
            .await
            .unwrap();
        assert_eq!(*ok.value, "retry");
    }

    #[tokio::test]
    async fn test_new_pair_invalidates_everything() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let old_normal = key(37.57, RouteType::Normal);
        let old_safe = key(37.57, RouteType::Safe);
        let new_normal = key(37.58, RouteType::Normal);

        cache.get_or_fetch(None, old_normal, counted(&calls, Duration::ZERO, "a")).await.unwrap();
        cache.get_or_fetch(None, old_safe, counted(&calls, Duration::ZERO, "b")).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_fetch(None, new_normal, counted(&calls, Duration::ZERO, "c")).await.unwrap();
        assert!(cache.get(&old_normal).is_none());
        assert!(cache.get(&old_safe).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_route_type_switch_keeps_other_type() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let normal = key(37.57, RouteType::Normal);
        let safe = key(37.57, RouteType::Safe);

        cache.get_or_fetch(None, normal, counted(&calls, Duration::ZERO, "n")).await.unwrap();
        cache.get_or_fetch(None, safe, counted(&calls, Duration::ZERO, "s")).await.unwrap();
        let again = cache
            .get_or_fetch(None, normal, counted(&calls, Duration::ZERO, "n2"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*again.value, "n");
        assert_eq!(
            cache.status(),
            vec!["37.566500,126.978000_37.570000,126.978000: [normal, safe]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stale_fetch_does_not_write_back() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let old = key(37.57, RouteType::Normal);
        let new = key(37.58, RouteType::Normal);

        let slow = {
            let cache = cache.clone();
            let fetch = counted(&calls, Duration::from_millis(50), "old");
            tokio::spawn(async move { cache.get_or_fetch(None, old, fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.get_or_fetch(None, new, counted(&calls, Duration::ZERO, "new")).await.unwrap();

        // The original caller still receives its result.
        let stale = slow.await.unwrap().unwrap();
        assert_eq!(*stale.value, "old");
        assert!(cache.get(&old).is_none());
        assert!(cache.get(&new).is_some());
    }

    #[tokio::test]
    async fn test_overlapping_pairs_share_in_flight_fetch() {
        let cache = Cache::new();
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let a = key(37.57, RouteType::Safe);
        let b = key(37.58, RouteType::Safe);
        let slow = Duration::from_millis(100);

        let (first, other, second) = tokio::join!(
            cache.get_or_fetch(None, a, counted(&calls_a, slow, "a")),
            cache.get_or_fetch(None, b, counted(&calls_b, slow, "b")),
            cache.get_or_fetch(None, a, counted(&calls_a, slow, "a2")),
        );

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(*other.unwrap().value, "b");
        // A was requested last, so only A is kept.
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_scopes_invalidate_independently() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = key(37.57, RouteType::Normal);
        let b = key(37.58, RouteType::Normal);
        let c = key(37.59, RouteType::Normal);

        cache.get_or_fetch(Some("alice"), a, counted(&calls, Duration::ZERO, "a")).await.unwrap();
        cache.get_or_fetch(Some("bob"), b, counted(&calls, Duration::ZERO, "b")).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_fetch(Some("alice"), c, counted(&calls, Duration::ZERO, "c")).await.unwrap();
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());

        let again = cache
            .get_or_fetch(Some("bob"), b, counted(&calls, Duration::ZERO, "b2"))
            .await
            .unwrap();
        assert_eq!(*again.value, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pair_kept_while_another_scope_observes_it() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = key(37.57, RouteType::Normal);
        let b = key(37.58, RouteType::Normal);

        cache.get_or_fetch(Some("alice"), a, counted(&calls, Duration::ZERO, "a")).await.unwrap();
        cache.get_or_fetch(Some("bob"), a, counted(&calls, Duration::ZERO, "a2")).await.unwrap();
        cache.get_or_fetch(Some("alice"), b, counted(&calls, Duration::ZERO, "b")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_some());
    }

    async fn explode() -> Result<String, TestError> {
        panic!("fetch exploded")
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_not_left_in_flight() {
        let cache = Cache::new();
        let k = key(37.57, RouteType::Normal);

        let err = cache
            .get_or_fetch(None, k, explode)
            .await
            .unwrap_err();
        assert!(matches!(*err, TestError::Join(_)));
        assert_eq!(cache.in_flight(), 0);

        let ok = cache
            .get_or_fetch(None, k, || async { Ok("retry".to_string()) })
            .await
            .unwrap();
        assert_eq!(*ok.value, "retry");
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = Cache::new();
        let k = key(37.57, RouteType::Normal);
        cache.get_or_fetch(None, k, || async { Ok("x".to_string()) }).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.status().is_empty());
    }
}
