//! Verifier Facade (spec.md §4.8): composes every other component into one
//! `verify(address, deadline) -> Verdict` entry point, plus a batch variant
//! (spec.md §6 "Batch inbound").
//!
//! Grounded on the teacher's `smtp_verify::probe::check_mailaddress_exists`
//! (the single function that strings normalization, DNS, and the SMTP
//! dialogue together) generalized with the Result Cache / Domain Metadata
//! / Rate Gate / Catch-all Detector layers the teacher has no equivalent
//! of — each of those is its own module, grounded separately in DESIGN.md.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;

use crate::address::{self, Address};
use crate::cache::ResultCache;
use crate::catchall::CatchallDetector;
use crate::classifier::{self, Classification};
use crate::config::Config;
use crate::domain_meta::{CatchAll, DomainMetaStore};
use crate::error::VerifyError;
use crate::mx::{MxFailureReason, MxRecord, MxResolver};
use crate::rate_gate::RateGate;
use crate::smtp::SmtpProber;
use crate::verdict::{Reason, Status, Verdict};

const DEFAULT_DEADLINE_MS: u64 = 30_000;
const MAX_BATCH_SIZE: usize = 1000;

/// Inbound single-address request (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    #[serde(default)]
    pub skip_cache: bool,
    pub deadline_ms: Option<u64>,
}

impl VerifyRequest {
    pub fn new(email: impl Into<String>) -> Self {
        Self { email: email.into(), skip_cache: false, deadline_ms: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPriority {
    Express,
    Standard,
    Bulk,
}

/// Inbound batch request (spec.md §6). `priority` is accepted and carried
/// through for the external scheduler to act on; the core itself applies
/// no priority-dependent throttling (see DESIGN.md).
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub emails: Vec<String>,
    pub priority: Option<BatchPriority>,
}

pub struct Verifier {
    config: Config,
    mx_resolver: Arc<MxResolver>,
    prober: SmtpProber,
    domain_meta: Arc<DomainMetaStore>,
    result_cache: Arc<ResultCache>,
    salt: [u8; 16],
}

impl Clone for Verifier {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            mx_resolver: self.mx_resolver.clone(),
            prober: self.prober.clone(),
            domain_meta: self.domain_meta.clone(),
            result_cache: self.result_cache.clone(),
            salt: self.salt,
        }
    }
}

impl Verifier {
    pub fn new(config: Config) -> Result<Self, VerifyError> {
        let mx_resolver = Arc::new(
            MxResolver::from_system_conf(&config.cache).map_err(VerifyError::Resolve)?,
        );
        let rate_gate = Arc::new(RateGate::new(&config.rate));
        let prober = SmtpProber::new(mx_resolver.clone(), rate_gate);
        let domain_meta = Arc::new(DomainMetaStore::new());
        let result_cache = Arc::new(ResultCache::new(
            config.cache.result_ttl(),
            config.cache.result_max_capacity,
        ));
        let salt = rand::random();

        Ok(Self { config, mx_resolver, prober, domain_meta, result_cache, salt })
    }

    /// `verify(raw_input, deadline) -> Verdict` (spec.md §4.8).
    pub async fn verify(&self, request: VerifyRequest) -> Verdict {
        let start = Instant::now();

        let address = match address::normalize(&request.email) {
            Ok(address) => address,
            Err(err) => {
                tracing::debug!(target: "verify", reason = %err, "syntax rejection");
                return syntax_error_verdict(start);
            }
        };
        tracing::debug!(target: "verify", domain = %address.domain(), skip_cache = request.skip_cache, "verification started");

        let deadline_ms = request.deadline_ms.unwrap_or(DEFAULT_DEADLINE_MS);
        let deadline = start + Duration::from_millis(deadline_ms);
        let fingerprint = address.fingerprint(&self.salt);

        let mx_resolver = self.mx_resolver.clone();
        let prober = self.prober.clone();
        let domain_meta = self.domain_meta.clone();
        let cfg = self.config.clone();

        if request.skip_cache {
            let (verdict, cacheable) =
                run_pipeline(mx_resolver, prober, domain_meta, cfg, address, deadline, start).await;
            if cacheable {
                self.result_cache.insert(fingerprint, verdict.clone()).await;
            }
            verdict
        } else {
            self.result_cache
                .get_with(fingerprint, move || async move {
                    run_pipeline(mx_resolver, prober, domain_meta, cfg, address, deadline, start).await
                })
                .await
        }
    }

    /// `{ emails, priority } -> { results }` (spec.md §6); batches above
    /// [`MAX_BATCH_SIZE`] are rejected outright rather than truncated.
    pub async fn verify_batch(&self, batch: BatchRequest) -> Result<Vec<Verdict>, VerifyError> {
        if batch.emails.len() > MAX_BATCH_SIZE {
            return Err(VerifyError::BatchTooLarge(batch.emails.len(), MAX_BATCH_SIZE));
        }

        let mut handles = Vec::with_capacity(batch.emails.len());
        for email in batch.emails {
            let verifier = self.clone();
            handles.push(tokio::spawn(async move {
                verifier.verify(VerifyRequest::new(email)).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|_| task_panicked_verdict()));
        }
        Ok(results)
    }
}

fn syntax_error_verdict(start: Instant) -> Verdict {
    Verdict {
        status: Status::Invalid,
        reason: Reason::SyntaxError,
        confidence: 1.0,
        smtp_code: None,
        smtp_response: None,
        mx_host: None,
        mx_records: Vec::new(),
        is_catch_all: false,
        is_disposable: false,
        duration_ms: start.elapsed().as_millis() as u64,
        checked_at: Utc::now(),
    }
}

fn task_panicked_verdict() -> Verdict {
    Verdict {
        status: Status::Unknown,
        reason: Reason::ProtocolError,
        confidence: 0.10,
        smtp_code: None,
        smtp_response: None,
        mx_host: None,
        mx_records: Vec::new(),
        is_catch_all: false,
        is_disposable: false,
        duration_ms: 0,
        checked_at: Utc::now(),
    }
}

struct Evidence {
    smtp_code: Option<u16>,
    smtp_response: Option<String>,
    mx_host: Option<String>,
    mx_records: Vec<MxRecord>,
    is_disposable: bool,
}

impl Evidence {
    fn empty() -> Self {
        Self {
            smtp_code: None,
            smtp_response: None,
            mx_host: None,
            mx_records: Vec::new(),
            is_disposable: false,
        }
    }
}

fn classify_mx_failure(reason: Option<MxFailureReason>) -> Classification {
    match reason {
        Some(MxFailureReason::Timeout) | Some(MxFailureReason::ServFail) => {
            Classification { status: Status::Unknown, reason: Reason::ConnectionFailed, confidence: 0.20 }
        }
        _ => classifier::classify_no_mx(),
    }
}

fn build_verdict(classification: Classification, evidence: Evidence, start: Instant) -> Verdict {
    Verdict {
        is_catch_all: classification.status == Status::CatchAll,
        status: classification.status,
        reason: classification.reason,
        confidence: classification.confidence,
        smtp_code: evidence.smtp_code,
        smtp_response: evidence.smtp_response,
        mx_host: evidence.mx_host,
        mx_records: evidence.mx_records,
        is_disposable: evidence.is_disposable,
        duration_ms: start.elapsed().as_millis() as u64,
        checked_at: Utc::now(),
    }
}

/// Steps 2-7 of spec.md §4.8, wrapped in an overall deadline: anything
/// still in flight when the deadline passes is cancelled (dropping every
/// held Rate Gate lease) and the caller gets an uncacheable
/// `unknown/deadline_exceeded` (spec.md §4.8, §8 invariant 8).
async fn run_pipeline(
    mx_resolver: Arc<MxResolver>,
    prober: SmtpProber,
    domain_meta: Arc<DomainMetaStore>,
    cfg: Config,
    address: Address,
    deadline: Instant,
    start: Instant,
) -> (Verdict, bool) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout(
        remaining,
        run_pipeline_inner(mx_resolver, prober, domain_meta, cfg, address, deadline),
    )
    .await
    {
        Ok((classification, evidence)) => (build_verdict(classification, evidence, start), true),
        Err(_) => {
            tracing::warn!(target: "verify", elapsed_ms = start.elapsed().as_millis() as u64, "deadline exceeded");
            (
                build_verdict(classifier::classify_deadline_exceeded(), Evidence::empty(), start),
                false,
            )
        }
    }
}

async fn run_pipeline_inner(
    mx_resolver: Arc<MxResolver>,
    prober: SmtpProber,
    domain_meta: Arc<DomainMetaStore>,
    cfg: Config,
    address: Address,
    deadline: Instant,
) -> (Classification, Evidence) {
    let domain = address.domain().to_string();
    let freshness = ChronoDuration::from_std(cfg.catchall.freshness_window())
        .unwrap_or_else(|_| ChronoDuration::zero());

    // spec.md §4.8 step 3: "Consult Domain Metadata" — the disposable flag
    // is read back from the store rather than recomputed from the static
    // list on every call; a domain seen for the first time is looked up
    // once and the result recorded so every later verification of the same
    // domain is a pure metadata read.
    let existing_meta = domain_meta.get(&domain);
    let is_disposable = match &existing_meta {
        Some(meta) => meta.disposable,
        None => {
            let computed = crate::disposable::is_disposable(&domain);
            domain_meta.record_disposable(&domain, computed);
            computed
        }
    };
    if is_disposable {
        tracing::info!(target: "verify", domain = %domain, "disposable domain short-circuit");
        let mut evidence = Evidence::empty();
        evidence.is_disposable = true;
        return (classifier::classify_disposable(), evidence);
    }

    if let Some(meta) = &existing_meta {
        if meta.catch_all == CatchAll::Yes && meta.catch_all_is_fresh(freshness, Utc::now()) {
            tracing::debug!(target: "verify", domain = %domain, "known catch-all, skipping MX contact");
            return (classifier::classify_catch_all(), Evidence::empty());
        }
    }

    let mx_outcome = match mx_resolver.resolve(&domain).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(target: "verify", domain = %domain, error = %err, "MX resolution failed");
            return (classify_mx_failure(Some(MxFailureReason::ServFail)), Evidence::empty());
        }
    };
    if mx_outcome.is_empty() {
        tracing::info!(target: "verify", domain = %domain, reason = ?mx_outcome.reason, "no usable MX records");
        return (classify_mx_failure(mx_outcome.reason), Evidence::empty());
    }

    domain_meta.record_mx(
        &domain,
        mx_outcome.records.clone(),
        Utc::now()
            + ChronoDuration::from_std(cfg.cache.mx_ttl_max()).unwrap_or_else(|_| ChronoDuration::zero()),
    );

    let outcome = prober
        .probe(&domain, address.local(), &mx_outcome.records, &cfg, deadline)
        .await;
    domain_meta.record_probe(&domain, Utc::now());
    tracing::debug!(
        target: "verify",
        domain = %domain,
        mx_host = %outcome.mx_host,
        smtp_code = ?outcome.smtp_code,
        "probe completed"
    );

    let mut classification = classifier::classify(outcome.smtp_code);
    let evidence = Evidence {
        smtp_code: outcome.smtp_code,
        smtp_response: outcome.smtp_response.clone(),
        mx_host: (!outcome.mx_host.is_empty()).then(|| outcome.mx_host.clone()),
        mx_records: mx_outcome.records.clone(),
        is_disposable: false,
    };

    if classification.status == Status::Valid && cfg.catchall.enabled {
        let stale = match domain_meta.get(&domain) {
            Some(meta) => meta.catch_all == CatchAll::Unknown || !meta.catch_all_is_fresh(freshness, Utc::now()),
            None => true,
        };
        if stale {
            let winning_mx = MxRecord::new(outcome.mx_host.clone(), 0);
            let judgment = CatchallDetector::new(&prober)
                .detect(&domain, &winning_mx, &cfg, deadline)
                .await;
            tracing::info!(
                target: "verify",
                domain = %domain,
                accepted = judgment.accepted,
                rejected = judgment.rejected,
                inconclusive = judgment.inconclusive,
                is_catch_all = judgment.is_catch_all,
                "catch-all judgment recorded"
            );
            domain_meta.record_catch_all(&domain, judgment.is_catch_all, freshness, Utc::now());
            if judgment.is_catch_all {
                classification = classifier::classify_catch_all();
            }
        }
    }

    (classification, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_batch_synchronously() {
        let verifier = Verifier::new(Config::with_mail_from("postmaster@example.com"))
            .expect("resolver init from system conf");
        let emails = vec!["user@example.com".to_string(); MAX_BATCH_SIZE + 1];

        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(verifier.verify_batch(BatchRequest { emails, priority: None }));

        assert!(matches!(result, Err(VerifyError::BatchTooLarge(_, _))));
    }

    #[tokio::test]
    async fn syntax_rejection_never_touches_the_network() {
        let verifier = Verifier::new(Config::with_mail_from("postmaster@example.com"))
            .expect("resolver init from system conf");

        let verdict = verifier.verify(VerifyRequest::new("not an email")).await;

        assert_eq!(verdict.status, Status::Invalid);
        assert_eq!(verdict.reason, Reason::SyntaxError);
        assert_eq!(verdict.confidence, 1.0);
        assert!(verdict.smtp_code.is_none());
    }
}
