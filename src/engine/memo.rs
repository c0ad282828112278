//! Single-flight memoization of async work.
//!
//! The first caller for a key creates the computation; every concurrent and
//! later caller awaits that same computation and sees the same result,
//! success or failure. Entries are never evicted, so asking again for
//! finished work is a map lookup.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

/// A computation that may still be running, shareable between waiters.
pub type Pending<V> = Shared<BoxFuture<'static, V>>;

pub struct Memoizer<K, V> {
    entries: Mutex<HashMap<K, Pending<V>>>,
}

impl<K, V> Memoizer<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the computation for `key`, creating it with `producer` if this is
    /// the first request.
    ///
    /// `producer` is called at most once per key for the memoizer's lifetime.
    /// It runs under the table lock and must only build the future, not touch
    /// this memoizer.
    pub fn get<F, Fut>(&self, key: K, producer: F) -> Pending<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.entries
            .lock()
            .entry(key)
            .or_insert_with(|| producer().boxed().shared())
            .clone()
    }

    /// The result for `key`, if its computation has finished.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries
            .lock()
            .get(key)
            .and_then(|pending| pending.peek().cloned())
    }

    /// Whether the computation for `key` has finished.
    pub fn is_finished(&self, key: &K) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|pending| pending.peek().is_some())
    }

    /// Whether a computation for `key` was ever started.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K, V> Default for Memoizer<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;

    fn counting_producer(
        calls: Arc<AtomicUsize>,
        result: Result<u32, String>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> {
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let memo: Memoizer<&str, Result<u32, String>> = Memoizer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..8)
            .map(|_| memo.get("page", counting_producer(calls.clone(), Ok(7))))
            .collect();
        let results = join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(7)));
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_retained() {
        let memo: Memoizer<&str, Result<u32, String>> = Memoizer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = memo
            .get("page", counting_producer(calls.clone(), Err("boom".into())))
            .await;
        let second = memo
            .get("page", counting_producer(calls.clone(), Ok(1)))
            .await;

        assert_eq!(first, Err("boom".to_string()));
        assert_eq!(second, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let memo: Memoizer<&str, Result<u32, String>> = Memoizer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = memo.get("a", counting_producer(calls.clone(), Ok(1))).await;
        let b = memo.get("b", counting_producer(calls.clone(), Ok(2))).await;

        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.len(), 2);
    }

    #[tokio::test]
    async fn test_peek_only_sees_finished_work() {
        let memo: Memoizer<&str, Result<u32, String>> = Memoizer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let pending = memo.get("page", counting_producer(calls.clone(), Ok(3)));
        assert!(memo.contains(&"page"));
        assert_eq!(memo.peek(&"page"), None);
        assert!(!memo.is_finished(&"page"));

        pending.await.unwrap();
        assert_eq!(memo.peek(&"page"), Some(Ok(3)));
        assert!(memo.is_finished(&"page"));
        assert_eq!(memo.peek(&"other"), None);
    }
}
