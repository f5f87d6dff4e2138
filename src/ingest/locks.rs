use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async locks, one per URL. Entries disappear once no guard or
/// waiter holds them.
#[derive(Default)]
pub struct UrlLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl UrlLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, url: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(existing) = locks.get(url).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(url.to_string(), Arc::downgrade(&lock));
        lock
    }

    pub async fn lock(&self, url: &str) -> OwnedMutexGuard<()> {
        self.handle(url).lock_owned().await
    }

    /// Lock several URLs, always in sorted order.
    pub async fn lock_many(&self, urls: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&str> = urls.iter().map(String::as_str).collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for url in ordered {
            guards.push(self.lock(url).await);
        }
        guards
    }

    /// URLs with a live guard or waiter.
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.values().filter(|lock| lock.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_url_is_exclusive() {
        let locks = UrlLocks::new();
        let guard = locks.lock("https://d/a").await;

        let blocked = tokio::time::timeout(Duration::from_millis(30), locks.lock("https://d/a")).await;
        assert!(blocked.is_err());

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(30), locks.lock("https://d/a")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn other_urls_are_not_blocked() {
        let locks = UrlLocks::new();
        let _a = locks.lock("https://d/a").await;
        let b = tokio::time::timeout(Duration::from_millis(30), locks.lock("https://d/b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_forgotten() {
        let locks = UrlLocks::new();
        {
            let _guards = locks
                .lock_many(&["https://d/b".to_string(), "https://d/a".to_string()])
                .await;
            assert_eq!(locks.tracked(), 2);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
