//! Verdict and its constituent enums (spec.md §3 "Verdict").
//!
//! Grounded on the teacher's `smtp_verify::types::{Existence,
//! SmtpProbeReport}` (an outcome enum plus a report struct carrying
//! confidence and transcript), reshaped to the richer five-way `Status`
//! and explicit `reason` tag the spec requires, and made `Serialize` via
//! `serde_json` for the external JSON shape (spec.md §6).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mx::MxRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Valid,
    Invalid,
    CatchAll,
    Unknown,
    Risky,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::CatchAll => "catch-all",
            Self::Unknown => "unknown",
            Self::Risky => "risky",
        };
        f.write_str(tag)
    }
}

/// A short, stable reason tag (spec.md §3, §4.5). `SmtpError` carries the
/// offending code so the tag round-trips as `smtp_error_<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    MailboxExists,
    MailboxNotFound,
    TemporaryFailure,
    RateLimited,
    SmtpError(u16),
    ConnectionFailed,
    DisposableDomain,
    NoMxRecords,
    CatchAllDomain,
    DeadlineExceeded,
    SyntaxError,
    ProtocolError,
}

impl Reason {
    pub fn as_tag(&self) -> String {
        match self {
            Self::MailboxExists => "mailbox_exists".to_string(),
            Self::MailboxNotFound => "mailbox_not_found".to_string(),
            Self::TemporaryFailure => "temporary_failure".to_string(),
            Self::RateLimited => "rate_limited".to_string(),
            Self::SmtpError(code) => format!("smtp_error_{code}"),
            Self::ConnectionFailed => "connection_failed".to_string(),
            Self::DisposableDomain => "disposable_domain".to_string(),
            Self::NoMxRecords => "no_mx_records".to_string(),
            Self::CatchAllDomain => "catch_all_domain".to_string(),
            Self::DeadlineExceeded => "deadline_exceeded".to_string(),
            Self::SyntaxError => "syntax_error".to_string(),
            Self::ProtocolError => "protocol_error".to_string(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_tag())
    }
}

impl Serialize for Reason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.as_tag())
    }
}

impl<'de> Deserialize<'de> for Reason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "mailbox_exists" => Self::MailboxExists,
            "mailbox_not_found" => Self::MailboxNotFound,
            "temporary_failure" => Self::TemporaryFailure,
            "rate_limited" => Self::RateLimited,
            "connection_failed" => Self::ConnectionFailed,
            "disposable_domain" => Self::DisposableDomain,
            "no_mx_records" => Self::NoMxRecords,
            "catch_all_domain" => Self::CatchAllDomain,
            "deadline_exceeded" => Self::DeadlineExceeded,
            "syntax_error" => Self::SyntaxError,
            "protocol_error" => Self::ProtocolError,
            other => other
                .strip_prefix("smtp_error_")
                .and_then(|code| code.parse().ok())
                .map(Self::SmtpError)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown reason tag: {other}")))?,
        })
    }
}

/// The structured outcome of one verification (spec.md §3). Invariants
/// enforced by construction in `verifier.rs`, not here: `status=valid`
/// implies `is_catch_all=false`; `status=catch-all` implies
/// `is_catch_all=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    pub reason: Reason,
    pub confidence: f32,
    pub smtp_code: Option<u16>,
    pub smtp_response: Option<String>,
    pub mx_host: Option<String>,
    pub mx_records: Vec<MxRecord>,
    pub is_catch_all: bool,
    pub is_disposable: bool,
    pub duration_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl Verdict {
    /// Visible-field equality for round-trip tests (spec.md §8): wall-clock
    /// fields (`checked_at`, `duration_ms`) are excluded.
    pub fn eq_ignoring_timestamps(&self, other: &Self) -> bool {
        self.status == other.status
            && self.reason == other.reason
            && (self.confidence - other.confidence).abs() < f32::EPSILON
            && self.smtp_code == other.smtp_code
            && self.smtp_response == other.smtp_response
            && self.mx_host == other.mx_host
            && self.mx_records == other.mx_records
            && self.is_catch_all == other.is_catch_all
            && self.is_disposable == other.is_disposable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_json() {
        for reason in [
            Reason::MailboxExists,
            Reason::SmtpError(554),
            Reason::CatchAllDomain,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            let back: Reason = serde_json::from_str(&json).unwrap();
            assert_eq!(reason, back);
        }
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&Status::CatchAll).unwrap();
        assert_eq!(json, "\"catch-all\"");
    }
}
