//! Domain Metadata Store (spec.md §3 "DomainMetadata", §4.6).
//!
//! Grounded on `open-hims-rustcare-engine`'s use of `dashmap::DashMap` for
//! concurrent per-key state without a single coarse lock — the same shape
//! the Rate Gate (`rate_gate.rs`) uses for its per-domain counters. Unlike
//! the Result Cache and MX cache, metadata has no fixed TTL: each field
//! (catch-all, MX records) expires on its own schedule, tracked here as
//! explicit timestamps rather than handed to a generic cache.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

use crate::mx::MxRecord;

/// Tri-state catch-all judgment (spec.md §3: "unknown|yes|no").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchAll {
    Unknown,
    Yes,
    No,
}

impl CatchAll {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Yes => Some(true),
            Self::No => Some(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DomainMetadata {
    pub domain: String,
    pub catch_all: CatchAll,
    pub catch_all_checked_at: Option<DateTime<Utc>>,
    pub disposable: bool,
    pub mx_records: Vec<MxRecord>,
    pub mx_expires_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl DomainMetadata {
    fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            catch_all: CatchAll::Unknown,
            catch_all_checked_at: None,
            disposable: false,
            mx_records: Vec::new(),
            mx_expires_at: None,
            last_probe_at: None,
        }
    }

    /// True when the catch-all judgment is fresh enough to trust without
    /// re-probing (spec.md §4.6: "freshness window is long, default 7 days").
    pub fn catch_all_is_fresh(&self, freshness: ChronoDuration, now: DateTime<Utc>) -> bool {
        match self.catch_all_checked_at {
            Some(checked_at) => now - checked_at < freshness,
            None => false,
        }
    }
}

/// Concurrent store keyed by domain. Updates to `catch_all` are monotonic:
/// once set, a value is only overwritten once its freshness window has
/// elapsed (spec.md §3 "Updated monotonically").
pub struct DomainMetaStore {
    entries: DashMap<String, Arc<DomainMetadata>>,
}

impl DomainMetaStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, domain: &str) -> Option<Arc<DomainMetadata>> {
        self.entries.get(domain).map(|entry| entry.clone())
    }

    /// Mutates the entry for `domain` in place under the `DashMap` shard
    /// lock — `and_modify` and `or_insert_with` are one atomic entry-API
    /// call, so a concurrent reader/writer on the same key never observes a
    /// torn read-clone-insert sequence (spec.md §3: "a per-key lock taken
    /// at the moment of population"). `insert_default` builds the value
    /// for a domain seen for the first time; `modify` mutates the existing
    /// `Arc` in place for every subsequent call.
    fn update(
        &self,
        domain: &str,
        insert_default: impl FnOnce() -> DomainMetadata,
        modify: impl FnOnce(&mut DomainMetadata),
    ) {
        self.entries
            .entry(domain.to_string())
            .and_modify(|arc| {
                let mut meta = (**arc).clone();
                modify(&mut meta);
                *arc = Arc::new(meta);
            })
            .or_insert_with(|| {
                let mut meta = insert_default();
                modify(&mut meta);
                Arc::new(meta)
            });
    }

    /// Record whether `domain` is a known disposable provider. Unlike
    /// `catch_all`, this isn't a probe-derived judgment that needs a
    /// freshness window — it's a static-list lookup the caller has already
    /// made — so it's simply overwritten each time the caller re-checks.
    pub fn record_disposable(&self, domain: &str, is_disposable: bool) {
        self.update(
            domain,
            || DomainMetadata::new(domain),
            |meta| meta.disposable = is_disposable,
        );
    }

    pub fn record_mx(&self, domain: &str, records: Vec<MxRecord>, expires_at: DateTime<Utc>) {
        self.update(
            domain,
            || DomainMetadata::new(domain),
            |meta| {
                meta.mx_records = records.clone();
                meta.mx_expires_at = Some(expires_at);
            },
        );
    }

    pub fn record_probe(&self, domain: &str, at: DateTime<Utc>) {
        self.update(
            domain,
            || DomainMetadata::new(domain),
            |meta| meta.last_probe_at = Some(at),
        );
    }

    /// Record a catch-all judgment, honouring the monotonic-freshness rule:
    /// a currently-fresh `yes`/`no` is left untouched. The freshness check
    /// and the write happen inside the same `and_modify` closure, under
    /// the same shard lock, so no concurrent caller can race between the
    /// check and the write.
    pub fn record_catch_all(
        &self,
        domain: &str,
        is_catch_all: bool,
        freshness: ChronoDuration,
        now: DateTime<Utc>,
    ) {
        let verdict = if is_catch_all { CatchAll::Yes } else { CatchAll::No };
        self.entries
            .entry(domain.to_string())
            .and_modify(|arc| {
                if arc.catch_all != CatchAll::Unknown && arc.catch_all_is_fresh(freshness, now) {
                    return;
                }
                let mut meta = (**arc).clone();
                meta.catch_all = verdict;
                meta.catch_all_checked_at = Some(now);
                *arc = Arc::new(meta);
            })
            .or_insert_with(|| {
                let mut meta = DomainMetadata::new(domain);
                meta.catch_all = verdict;
                meta.catch_all_checked_at = Some(now);
                Arc::new(meta)
            });
    }
}

impl Default for DomainMetaStore {
    fn default() -> Self {
        Self::new()
    }
}
