//! Classifier (spec.md §4.5): a pure mapping from `(smtp_code, context)` to
//! `(status, reason, confidence)`. Represented as a data table, not nested
//! conditionals, per spec.md §9 ("the classifier table is data, not code
//! branches, so it can be audited and tested in isolation") — the teacher's
//! `smtp_verify::util::confidence_for` is the closest precedent (a small
//! match on outcome kind to a confidence float) but covers far fewer cases
//! than the table below requires.

use crate::verdict::{Reason, Status};

/// Confidence assigned to an RCPT 5xx reply outside {550,551,553}; see
/// spec.md §9's open question on whether this band is warranted.
pub const SMTP_ERROR_5XX_CONFIDENCE: f32 = 0.70;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub reason: Reason,
    pub confidence: f32,
}

impl Classification {
    fn new(status: Status, reason: Reason, confidence: f32) -> Self {
        Self { status, reason, confidence }
    }
}

/// The base table lookup (spec.md §4.5), before any contextual override.
/// `smtp_code` is `None` for connection-level failures (timeout, refused).
pub fn classify(smtp_code: Option<u16>) -> Classification {
    match smtp_code {
        Some(250) | Some(251) => {
            Classification::new(Status::Valid, Reason::MailboxExists, 0.98)
        }
        Some(550) | Some(551) | Some(553) => {
            Classification::new(Status::Invalid, Reason::MailboxNotFound, 0.95)
        }
        Some(450) | Some(451) | Some(452) => {
            Classification::new(Status::Unknown, Reason::TemporaryFailure, 0.30)
        }
        Some(421) => Classification::new(Status::Unknown, Reason::RateLimited, 0.20),
        Some(code) if (500..600).contains(&code) => Classification::new(
            Status::Invalid,
            Reason::SmtpError(code),
            SMTP_ERROR_5XX_CONFIDENCE,
        ),
        Some(code) => Classification::new(
            Status::Invalid,
            Reason::SmtpError(code),
            SMTP_ERROR_5XX_CONFIDENCE,
        ),
        None => Classification::new(Status::Unknown, Reason::ConnectionFailed, 0.20),
    }
}

/// Disposable-domain short-circuit: applied before any SMTP contact
/// (spec.md §4.5, §4.8 step 3).
pub fn classify_disposable() -> Classification {
    Classification::new(Status::Risky, Reason::DisposableDomain, 0.90)
}

/// No MX records resolved for the domain (spec.md §4.5, §4.8 step 4).
pub fn classify_no_mx() -> Classification {
    Classification::new(Status::Invalid, Reason::NoMxRecords, 0.95)
}

/// Provisional valid refined by a positive catch-all judgment (spec.md
/// §4.5, §4.6).
pub fn classify_catch_all() -> Classification {
    Classification::new(Status::CatchAll, Reason::CatchAllDomain, 0.50)
}

/// Verification exhausted its deadline (spec.md §4.8, §7).
pub fn classify_deadline_exceeded() -> Classification {
    Classification::new(Status::Unknown, Reason::DeadlineExceeded, 0.10)
}

/// Rate Gate could not issue a lease before the deadline (spec.md §7).
pub fn classify_rate_gate_timeout() -> Classification {
    Classification::new(Status::Unknown, Reason::RateLimited, 0.20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_deterministic_valid_codes() {
        assert_eq!(classify(Some(250)).status, Status::Valid);
        assert_eq!(classify(Some(251)).confidence, 0.98);
    }

    #[test]
    fn maps_deterministic_invalid_codes() {
        for code in [550, 551, 553] {
            let c = classify(Some(code));
            assert_eq!(c.status, Status::Invalid);
            assert_eq!(c.reason, Reason::MailboxNotFound);
            assert_eq!(c.confidence, 0.95);
        }
    }

    #[test]
    fn maps_temporary_failure_band() {
        for code in [450, 451, 452] {
            assert_eq!(classify(Some(code)).status, Status::Unknown);
        }
    }

    #[test]
    fn maps_421_to_rate_limited() {
        let c = classify(Some(421));
        assert_eq!(c.reason, Reason::RateLimited);
        assert_eq!(c.confidence, 0.20);
    }

    #[test]
    fn maps_other_5xx_to_smtp_error_band() {
        let c = classify(Some(554));
        assert_eq!(c.status, Status::Invalid);
        assert_eq!(c.confidence, SMTP_ERROR_5XX_CONFIDENCE);
        assert_eq!(c.reason, Reason::SmtpError(554));
    }

    #[test]
    fn maps_absent_code_to_connection_failed() {
        let c = classify(None);
        assert_eq!(c.reason, Reason::ConnectionFailed);
        assert_eq!(c.confidence, 0.20);
    }
}
