//! Per-entry TTL cache for MX lookups (spec.md §4.2 "MX TTL Cache").
//!
//! Grounded on `open-hims-rustcare-engine/secrets-service`'s use of
//! `moka::future::Cache` for coalesced, TTL-bounded async lookups. moka's
//! per-entry `Expiry` trait is what lets each domain carry its own clamped
//! TTL instead of one cache-wide duration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;

use super::types::MxLookupOutcome;

/// An [`MxLookupOutcome`] paired with the TTL it should be cached for. The
/// TTL itself (clamped positive/negative bound per spec.md §4.2) is private
/// to the cache layer; callers only ever see the outcome.
pub(crate) struct CachedMx {
    pub outcome: MxLookupOutcome,
    pub ttl: Duration,
}

struct MxExpiry;

impl Expiry<String, Arc<CachedMx>> for MxExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CachedMx>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub(crate) fn build(max_capacity: u64) -> Cache<String, Arc<CachedMx>> {
    Cache::builder()
        .max_capacity(max_capacity)
        .expire_after(MxExpiry)
        .build()
}
