//! Canonical title resolution with dedup and a bounded cache.
//!
//! Concurrent callers asking for the same normalized title share one
//! in-flight backend request. Successful resolutions are cached until
//! evicted by capacity pressure; failed resolutions fall back to the
//! original input and are negative-cached for a short TTL so transient
//! backend outages self-heal without request storms.
//!
//! The LRU order queue is stamped: touching an entry pushes a fresh
//! (key, stamp) pair and leaves the old pair behind as a ghost, which
//! eviction skips when the stamps no longer match.

use crate::backend::BackendApi;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use linkrally_core::title::{normalize, titles_equal};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Maximum number of cached resolutions.
pub const DEFAULT_CAPACITY: usize = 1000;
/// How long a failed resolution shadows the backend.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    value: String,
    /// `None` for successful resolutions; negative entries expire
    expires_at: Option<Instant>,
    stamp: u64,
}

struct ResolverState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<(String, u64)>,
    inflight: HashMap<String, Shared<BoxFuture<'static, String>>>,
    next_stamp: u64,
}

impl ResolverState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            inflight: HashMap::new(),
            next_stamp: 0,
        }
    }

    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    /// Relocates `key` to the most-recently-used position.
    fn touch(&mut self, key: &str, capacity: usize) {
        let stamp = self.stamp();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stamp = stamp;
            self.order.push_back((key.to_string(), stamp));
        }
        self.compact(capacity);
    }

    /// Drops ghost pairs once they dominate the queue. Hits push a fresh
    /// pair per touch, so without this the queue grows with read count
    /// even while the entry map stays within capacity.
    fn compact(&mut self, capacity: usize) {
        if self.order.len() <= capacity.max(16) * 2 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(key, stamp)| entries.get(key).is_some_and(|e| e.stamp == *stamp));
    }

    fn insert(&mut self, key: String, value: String, expires_at: Option<Instant>, capacity: usize) {
        let stamp = self.stamp();
        self.order.push_back((key.clone(), stamp));
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                stamp,
            },
        );
        while self.entries.len() > capacity {
            let Some((old_key, old_stamp)) = self.order.pop_front() else {
                break;
            };
            let is_live = self
                .entries
                .get(&old_key)
                .is_some_and(|e| e.stamp == old_stamp);
            if is_live {
                self.entries.remove(&old_key);
            }
            // stale stamp: ghost pair left behind by a touch, skip
        }
        self.compact(capacity);
    }
}

/// Deduplicating, bounded cache over the backend's `canonical_title` call.
///
/// The resolver never fails: when the backend cannot resolve a title the
/// original input is returned (and negative-cached).
pub struct CanonicalTitleResolver {
    backend: Arc<dyn BackendApi>,
    state: Arc<Mutex<ResolverState>>,
    capacity: usize,
    negative_ttl: Duration,
}

impl CanonicalTitleResolver {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self::with_options(backend, DEFAULT_CAPACITY, DEFAULT_NEGATIVE_TTL)
    }

    /// Capacity and negative TTL are injectable for tests.
    pub fn with_options(
        backend: Arc<dyn BackendApi>,
        capacity: usize,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(ResolverState::new())),
            capacity,
            negative_ttl,
        }
    }

    /// Resolves `title` to its backend-canonical form.
    pub async fn resolve(&self, title: &str) -> String {
        let key = normalize(title);
        if key.is_empty() {
            return title.to_string();
        }

        let shared = {
            let mut state = self.state.lock().await;

            match state.entries.get(&key) {
                Some(entry) if entry.expires_at.is_none_or(|t| Instant::now() < t) => {
                    let value = entry.value.clone();
                    state.touch(&key, self.capacity);
                    return value;
                }
                Some(_) => {
                    // negative entry past its TTL
                    state.entries.remove(&key);
                }
                None => {}
            }

            if let Some(existing) = state.inflight.get(&key) {
                existing.clone()
            } else {
                let backend = Arc::clone(&self.backend);
                let state_arc = Arc::clone(&self.state);
                let raw = title.trim().to_string();
                let key_owned = key.clone();
                let capacity = self.capacity;
                let ttl = self.negative_ttl;
                let fut: BoxFuture<'static, String> = async move {
                    let outcome = backend.canonical_title(&raw).await;
                    let mut state = state_arc.lock().await;
                    state.inflight.remove(&key_owned);
                    let (value, expires_at) = match outcome {
                        Ok(canonical) => (canonical, None),
                        Err(e) => {
                            tracing::warn!(
                                target: "resolver",
                                title = %raw,
                                error = %e,
                                "canonical lookup failed; returning input title"
                            );
                            (raw, Some(Instant::now() + ttl))
                        }
                    };
                    state.insert(key_owned, value.clone(), expires_at, capacity);
                    value
                }
                .boxed();
                let shared = fut.shared();
                state.inflight.insert(key.clone(), shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Whether two titles refer to the same canonical article.
    pub async fn canonically_equal(&self, a: &str, b: &str) -> bool {
        if titles_equal(a, b) {
            return true;
        }
        let canonical_a = self.resolve(a).await;
        let canonical_b = self.resolve(b).await;
        titles_equal(&canonical_a, &canonical_b)
    }

    /// Number of live cache entries (test/diagnostic hook).
    pub async fn cached_entries(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatRequest, ChatResponse, MoveValidation, MoveValidationRequest};
    use async_trait::async_trait;
    use linkrally_core::{RallyError, Result};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockBackend {
        canonical: StdMutex<HashMap<String, String>>,
        calls: AtomicUsize,
        per_title_calls: StdMutex<HashMap<String, usize>>,
        delay: Option<Duration>,
        fail_first: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                canonical: StdMutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                per_title_calls: StdMutex::new(HashMap::new()),
                delay: None,
                fail_first: AtomicUsize::new(0),
            }
        }

        fn with_mapping(mut self, from: &str, to: &str) -> Self {
            self.canonical
                .get_mut()
                .unwrap()
                .insert(from.to_string(), to.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn failing_first(self, n: usize) -> Self {
            self.fail_first.store(n, Ordering::SeqCst);
            self
        }

        fn calls_for(&self, title: &str) -> usize {
            *self
                .per_title_calls
                .lock()
                .unwrap()
                .get(title)
                .unwrap_or(&0)
        }
    }

    #[async_trait]
    impl BackendApi for MockBackend {
        async fn health(&self) -> Result<()> {
            Ok(())
        }

        async fn all_articles(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn canonical_title(&self, title: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .per_title_calls
                .lock()
                .unwrap()
                .entry(title.to_string())
                .or_insert(0) += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RallyError::network("backend unavailable"));
            }
            let canonical = self.canonical.lock().unwrap();
            Ok(canonical
                .get(title)
                .cloned()
                .unwrap_or_else(|| title.to_string()))
        }

        async fn article_links(&self, _title: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Err(RallyError::internal("not used"))
        }

        async fn validate_move(&self, _request: MoveValidationRequest) -> Result<MoveValidation> {
            Err(RallyError::internal("not used"))
        }
    }

    #[tokio::test]
    async fn resolves_to_backend_exact_spelling() {
        let backend = Arc::new(MockBackend::new().with_mapping("pokemon", "Pokémon"));
        let resolver = CanonicalTitleResolver::new(backend);
        assert_eq!(resolver.resolve("pokemon").await, "Pokémon");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_share_one_backend_call() {
        let backend = Arc::new(
            MockBackend::new()
                .with_mapping("capybara", "Capybara")
                .with_delay(Duration::from_millis(50)),
        );
        let resolver = Arc::new(CanonicalTitleResolver::new(backend.clone()));

        let mut tasks = Vec::new();
        for variant in ["capybara", "Capybara", "CAPYBARA", " capybara "] {
            let resolver = Arc::clone(&resolver);
            tasks.push(tokio::spawn(
                async move { resolver.resolve(variant).await },
            ));
        }
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert!(results.iter().all(|r| r == "Capybara"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_hits_do_not_call_backend_again() {
        let backend = Arc::new(MockBackend::new().with_mapping("rodent", "Rodent"));
        let resolver = CanonicalTitleResolver::new(backend.clone());
        resolver.resolve("rodent").await;
        resolver.resolve("Rodent").await;
        resolver.resolve("RODENT ").await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_returns_input_and_negative_cache_expires() {
        let backend = Arc::new(
            MockBackend::new()
                .with_mapping("pokemon", "Pokémon")
                .failing_first(1),
        );
        let resolver = CanonicalTitleResolver::with_options(
            backend.clone(),
            DEFAULT_CAPACITY,
            Duration::from_millis(40),
        );

        // failure falls back to the original input
        assert_eq!(resolver.resolve("pokemon").await, "pokemon");
        // still shadowed by the negative entry
        assert_eq!(resolver.resolve("pokemon").await, "pokemon");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // TTL elapsed: the backend is consulted again and succeeds
        assert_eq!(resolver.resolve("pokemon").await, "Pokémon");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_hits_keep_the_order_queue_bounded() {
        let backend = Arc::new(MockBackend::new());
        let resolver = CanonicalTitleResolver::with_options(
            backend.clone(),
            2,
            DEFAULT_NEGATIVE_TTL,
        );

        resolver.resolve("capybara").await;
        for _ in 0..10_000 {
            resolver.resolve("capybara").await;
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let state = resolver.state.lock().await;
        assert_eq!(state.entries.len(), 1);
        // ghost pairs are compacted away instead of accumulating per hit
        assert!(
            state.order.len() <= 64,
            "order queue grew to {}",
            state.order.len()
        );
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let backend = Arc::new(MockBackend::new());
        let resolver = CanonicalTitleResolver::with_options(
            backend.clone(),
            2,
            DEFAULT_NEGATIVE_TTL,
        );

        resolver.resolve("a").await;
        resolver.resolve("b").await;
        // touch "a" so "b" becomes least recently used
        resolver.resolve("a").await;
        resolver.resolve("c").await;
        assert_eq!(resolver.cached_entries().await, 2);

        // "a" survived the eviction, "b" did not
        resolver.resolve("a").await;
        assert_eq!(backend.calls_for("a"), 1);
        resolver.resolve("b").await;
        assert_eq!(backend.calls_for("b"), 2);
    }
}
