//! Decoded-bitmap pool with single-flight loading.
//!
//! Bitmaps are keyed by a content signature (icon, color, size). A miss runs
//! the caller's loader once; concurrent requests for the same key await the
//! same shared future and observe the same result, success or failure.
//! Failures are never cached. Entries are evicted least-recently-used first
//! once either the entry budget or the byte budget is exceeded, and every
//! evicted image is disposed before the call that evicted it returns.

use crate::prelude::HashMap;
use crate::traits::{DecodedImage, PoolStats};
use futures::future::{BoxFuture, FutureExt, Shared};
use instant::Instant;
use lru::LruCache;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("decode failed for '{key}': {message}")]
    Decode { key: String, message: String },
}

impl BitmapError {
    pub fn decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Plain RGBA8 pixel buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaImage {
    /// Solid-color image, mostly useful for placeholder icons
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }
}

impl DecodedImage for RgbaImage {
    fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// One cached bitmap
#[derive(Debug)]
pub struct PooledBitmap<I> {
    pub key: String,
    pub image: Arc<I>,
    pub size_bytes: usize,
    pub last_access: Instant,
}

/// Counters specific to the bitmap pool
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct BitmapStats {
    pub pool: PoolStats,
    /// Requests that joined an in-flight load instead of starting one
    pub coalesced: u64,
    pub failed_loads: u64,
    /// Loads handed back without caching because they exceed the budget
    pub uncached: u64,
    pub disposed: u64,
    pub bytes: usize,
}

type LoadResult<I> = Result<Arc<I>, BitmapError>;
type SharedLoad<I> = Shared<BoxFuture<'static, LoadResult<I>>>;

struct Inner<I> {
    cache: LruCache<String, PooledBitmap<I>>,
    bytes: usize,
    max_entries: usize,
    max_bytes: usize,
    in_flight: HashMap<String, (u64, SharedLoad<I>)>,
    next_load_id: u64,
    stats: BitmapStats,
}

impl<I: DecodedImage> Inner<I> {
    fn enforce_limits(&mut self) {
        while self.cache.len() > self.max_entries || self.bytes > self.max_bytes {
            match self.cache.pop_lru() {
                Some((key, evicted)) => {
                    self.bytes = self.bytes.saturating_sub(evicted.size_bytes);
                    evicted.image.dispose();
                    self.stats.pool.evictions += 1;
                    self.stats.disposed += 1;
                    log::trace!("evicted bitmap '{}' ({} bytes)", key, evicted.size_bytes);
                }
                None => break,
            }
        }
    }

    fn finish_load(&mut self, key: &str, load_id: u64, result: &LoadResult<I>) {
        match self.in_flight.get(key) {
            Some((id, _)) if *id == load_id => {
                self.in_flight.remove(key);
            }
            // Another waiter already recorded this load
            _ => return,
        }

        match result {
            Ok(image) => {
                let size_bytes = image.byte_size();
                // Caching it would evict and dispose the image its callers hold
                if size_bytes > self.max_bytes || self.max_entries == 0 {
                    self.stats.uncached += 1;
                    log::debug!(
                        "bitmap '{}' ({} bytes) does not fit the pool, returning it uncached",
                        key,
                        size_bytes
                    );
                    return;
                }
                let entry = PooledBitmap {
                    key: key.to_string(),
                    image: image.clone(),
                    size_bytes,
                    last_access: Instant::now(),
                };
                if let Some(replaced) = self.cache.put(key.to_string(), entry) {
                    self.bytes = self.bytes.saturating_sub(replaced.size_bytes);
                    replaced.image.dispose();
                    self.stats.disposed += 1;
                }
                self.bytes += size_bytes;
                self.enforce_limits();
            }
            Err(e) => {
                self.stats.failed_loads += 1;
                log::warn!("bitmap load failed: {}", e);
            }
        }
    }
}

/// LRU bitmap pool bounded by entry count and bytes
pub struct BitmapPool<I: DecodedImage> {
    inner: Arc<Mutex<Inner<I>>>,
}

impl<I: DecodedImage> BitmapPool<I> {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cache: LruCache::unbounded(),
                bytes: 0,
                max_entries,
                max_bytes,
                in_flight: HashMap::default(),
                next_load_id: 1,
                stats: BitmapStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<I>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the bitmap for `key`, decoding it with `loader` on a miss.
    ///
    /// `loader` is only invoked when neither the cache nor an in-flight load
    /// can serve the request.
    pub async fn get<F, Fut>(&self, key: &str, loader: F) -> Result<Arc<I>, BitmapError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<I, BitmapError>> + Send + 'static,
    {
        let (load_id, shared) = {
            let mut inner = self.lock();

            if let Some(entry) = inner.cache.get_mut(key) {
                entry.last_access = Instant::now();
                let image = entry.image.clone();
                inner.stats.pool.hits += 1;
                return Ok(image);
            }

            if let Some((load_id, shared)) = inner.in_flight.get(key) {
                let joined = (*load_id, shared.clone());
                inner.stats.coalesced += 1;
                joined
            } else {
                inner.stats.pool.misses += 1;
                let load_id = inner.next_load_id;
                inner.next_load_id += 1;
                let shared = loader().map(|result| result.map(Arc::new)).boxed().shared();
                inner
                    .in_flight
                    .insert(key.to_string(), (load_id, shared.clone()));
                (load_id, shared)
            }
        };

        let result = shared.await;
        self.lock().finish_load(key, load_id, &result);
        result
    }

    /// Cached bitmap without loading or touching recency
    pub fn peek(&self, key: &str) -> Option<Arc<I>> {
        self.lock().cache.peek(key).map(|entry| entry.image.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().cache.contains(key)
    }

    /// Change the budgets, evicting the excess immediately
    pub fn set_limits(&self, max_entries: usize, max_bytes: usize) {
        let mut inner = self.lock();
        inner.max_entries = max_entries;
        inner.max_bytes = max_bytes;
        inner.enforce_limits();
    }

    /// Drop and dispose every cached bitmap
    pub fn clear(&self) {
        let mut inner = self.lock();
        while let Some((_, evicted)) = inner.cache.pop_lru() {
            evicted.image.dispose();
            inner.stats.disposed += 1;
        }
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        self.lock().bytes
    }

    pub fn limits(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.max_entries, inner.max_bytes)
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> BitmapStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.pool.size = inner.cache.len();
        stats.bytes = inner.bytes;
        stats
    }
}

impl<I: DecodedImage> Clone for BitmapPool<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TrackedImage {
        bytes: usize,
        disposed: Arc<AtomicUsize>,
    }

    impl DecodedImage for TrackedImage {
        fn byte_size(&self) -> usize {
            self.bytes
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(bytes: usize, disposed: &Arc<AtomicUsize>) -> TrackedImage {
        TrackedImage {
            bytes,
            disposed: disposed.clone(),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_loader() {
        let pool = BitmapPool::new(4, 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let image = pool
                .get("bus:red:32", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RgbaImage::filled(2, 2, [255, 0, 0, 255]))
                })
                .await
                .unwrap();
            assert_eq!(image.byte_size(), 16);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.pool.misses, 1);
        assert_eq!(stats.pool.hits, 2);
        assert_eq!(stats.bytes, 16);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_decode() {
        let pool: BitmapPool<RgbaImage> = BitmapPool::new(4, 1024);
        let calls = Arc::new(AtomicUsize::new(0));

        let request = |pool: BitmapPool<RgbaImage>, calls: Arc<AtomicUsize>| async move {
            pool.get("truck:blue:48", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(RgbaImage::filled(1, 1, [0, 0, 255, 255]))
            })
            .await
        };

        let (a, b, c) = tokio::join!(
            request(pool.clone(), calls.clone()),
            request(pool.clone(), calls.clone()),
            request(pool.clone(), calls.clone()),
        );

        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().coalesced, 2);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_failure_is_not_cached() {
        let pool: BitmapPool<RgbaImage> = BitmapPool::new(4, 1024);

        let failing = |pool: BitmapPool<RgbaImage>| async move {
            pool.get("broken", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(BitmapError::decode("broken", "truncated png"))
            })
            .await
        };
        let (a, b) = tokio::join!(failing(pool.clone()), failing(pool.clone()));
        assert_eq!(a.unwrap_err(), BitmapError::decode("broken", "truncated png"));
        assert_eq!(b.unwrap_err(), BitmapError::decode("broken", "truncated png"));
        assert!(!pool.contains("broken"));
        assert_eq!(pool.stats().failed_loads, 1);

        // Other keys are unaffected and the failed key can be retried
        let ok = pool
            .get("broken", || async { Ok(RgbaImage::filled(1, 1, [0; 4])) })
            .await;
        assert!(ok.is_ok());
        assert!(pool.contains("broken"));
    }

    #[tokio::test]
    async fn test_entry_limit_evicts_lru_and_disposes() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let pool = BitmapPool::new(2, 1_000_000);

        for key in ["a", "b"] {
            let image = tracked(10, &disposed);
            pool.get(key, move || async move { Ok(image) }).await.unwrap();
        }
        // Touch "a" so "b" is the eviction candidate
        let image = tracked(10, &disposed);
        pool.get("a", move || async move { Ok(image) }).await.unwrap();
        let image = tracked(10, &disposed);
        pool.get("c", move || async move { Ok(image) }).await.unwrap();

        assert!(pool.contains("a"));
        assert!(!pool.contains("b"));
        assert!(pool.contains("c"));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_byte_budget_is_enforced() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let pool = BitmapPool::new(100, 250);

        for key in ["a", "b", "c"] {
            let image = tracked(100, &disposed);
            pool.get(key, move || async move { Ok(image) }).await.unwrap();
        }

        assert_eq!(pool.len(), 2);
        assert!(pool.bytes_used() <= 250);
        assert!(!pool.contains("a"));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shrinking_limits_evicts_immediately() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let pool = BitmapPool::new(10, 10_000);
        for key in ["a", "b", "c", "d"] {
            let image = tracked(10, &disposed);
            pool.get(key, move || async move { Ok(image) }).await.unwrap();
        }

        pool.set_limits(2, 10_000);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("c"));
        assert!(pool.contains("d"));
        assert_eq!(disposed.load(Ordering::SeqCst), 2);

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(disposed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_oversized_bitmap_is_returned_live_and_uncached() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let pool = BitmapPool::new(10, 500);
        let small = tracked(100, &disposed);
        pool.get("small", move || async move { Ok(small) }).await.unwrap();

        let large = tracked(1000, &disposed);
        let image = pool
            .get("large", move || async move { Ok(large) })
            .await
            .unwrap();

        assert_eq!(image.byte_size(), 1000);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
        assert!(!pool.contains("large"));
        assert!(pool.contains("small"));
        assert_eq!(pool.bytes_used(), 100);
        assert_eq!(pool.stats().uncached, 1);
    }
}
