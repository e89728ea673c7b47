//! Result Cache (spec.md §4.7): `AddressFingerprint -> Verdict`, with a
//! TTL, bounded LRU-ish capacity, and per-key coalescing so concurrent
//! verifications of the same address share one SMTP probe (spec.md §8
//! invariant 4).
//!
//! Grounded on `open-hims-rustcare-engine/secrets-service`'s
//! `moka::future::Cache::get_with`, the same coalescing primitive
//! `mx::cache` uses: the first caller's future runs to completion and
//! populates the entry; everyone else awaits that same future instead of
//! issuing a redundant probe (spec.md §9 "per-key coalescing").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::address::AddressFingerprint;
use crate::verdict::Verdict;

/// A computed verdict plus whether it is allowed to remain cached. A
/// deadline-exceeded verdict is coalesced like any other (so concurrent
/// callers share the one timed-out attempt) but must not persist
/// afterwards (spec.md §4.8, §8 invariant 8).
struct Entry {
    verdict: Verdict,
    cacheable: bool,
}

pub struct ResultCache {
    cache: Cache<AddressFingerprint, Arc<Entry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, fingerprint: &AddressFingerprint) -> Option<Verdict> {
        self.cache.get(fingerprint).await.map(|entry| entry.verdict.clone())
    }

    /// Coalesced compute-or-fetch: `init` runs at most once per key among
    /// concurrently-racing callers. `init` returns `(Verdict, cacheable)`;
    /// non-cacheable verdicts (deadline exceeded) are evicted immediately
    /// after being handed back so no trace of them survives in the cache.
    pub async fn get_with<F, Fut>(&self, fingerprint: AddressFingerprint, init: F) -> Verdict
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (Verdict, bool)> + Send + 'static,
    {
        let entry = self
            .cache
            .get_with(fingerprint, async move {
                let (verdict, cacheable) = init().await;
                Arc::new(Entry { verdict, cacheable })
            })
            .await;

        if !entry.cacheable {
            tracing::debug!(target: "result_cache", fingerprint = %fingerprint, "evicting non-cacheable verdict");
            self.cache.invalidate(&fingerprint).await;
        }
        entry.verdict.clone()
    }

    pub async fn invalidate(&self, fingerprint: &AddressFingerprint) {
        self.cache.invalidate(fingerprint).await;
    }

    /// Direct write-through, used by the `skip_cache` path: the caller has
    /// already computed the verdict itself, so there is nothing to coalesce.
    pub async fn insert(&self, fingerprint: AddressFingerprint, verdict: Verdict) {
        self.cache
            .insert(fingerprint, Arc::new(Entry { verdict, cacheable: true }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Reason, Status};
    use chrono::Utc;

    fn sample_verdict() -> Verdict {
        Verdict {
            status: Status::Valid,
            reason: Reason::MailboxExists,
            confidence: 0.98,
            smtp_code: Some(250),
            smtp_response: Some("OK".to_string()),
            mx_host: Some("mx.example.com".to_string()),
            mx_records: Vec::new(),
            is_catch_all: false,
            is_disposable: false,
            duration_ms: 42,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn caches_a_cacheable_verdict() {
        let cache = ResultCache::new(Duration::from_secs(60), 100);
        let fp = AddressFingerprint::compute("user@example.com", b"salt");

        let verdict = cache.get_with(fp, || async { (sample_verdict(), true) }).await;
        assert_eq!(verdict.smtp_code, Some(250));
        assert!(cache.get(&fp).await.is_some());
    }

    #[tokio::test]
    async fn insert_writes_through_directly() {
        let cache = ResultCache::new(Duration::from_secs(60), 100);
        let fp = AddressFingerprint::compute("user@example.com", b"salt");

        cache.insert(fp, sample_verdict()).await;
        assert_eq!(cache.get(&fp).await.unwrap().smtp_code, Some(250));
    }

    #[tokio::test]
    async fn does_not_retain_a_non_cacheable_verdict() {
        let cache = ResultCache::new(Duration::from_secs(60), 100);
        let fp = AddressFingerprint::compute("user@example.com", b"salt");

        let mut verdict = sample_verdict();
        verdict.status = Status::Unknown;
        verdict.reason = Reason::DeadlineExceeded;

        let returned = cache
            .get_with(fp, move || async move { (verdict, false) })
            .await;
        assert_eq!(returned.reason, Reason::DeadlineExceeded);
        assert!(cache.get(&fp).await.is_none());
    }
}
