//! Property-based checks for spec.md §8's universal invariants that don't
//! need live SMTP traffic: syntax normalization, the classifier table's
//! confidence bounds, fingerprint stability, and Verdict's JSON round-trip.

use chrono::Utc;
use proptest::prelude::*;

use mailgate::address;
use mailgate::classifier::classify;
use mailgate::mx::MxRecord;
use mailgate::verdict::{Reason, Status, Verdict};

fn local_part_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,15}"
}

fn domain_label_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,10}"
}

fn tld_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,8}"
}

proptest! {
    /// Invariant 2 (spec.md §8): for any input that passes the Syntax
    /// Filter, `verdict.domain` equals the lowercased domain of the
    /// normalized address.
    #[test]
    fn normalized_domain_is_always_lowercase(
        local in local_part_strategy(),
        label_a in domain_label_strategy(),
        label_b in tld_strategy(),
    ) {
        let raw = format!("{local}@{label_a}.{label_b}");
        let upper = raw.to_ascii_uppercase();
        let address = address::normalize(&upper).expect("well-formed address");
        prop_assert_eq!(address.domain(), format!("{label_a}.{label_b}"));
        prop_assert_eq!(address.domain(), address.domain().to_ascii_lowercase());
    }

    /// Fingerprints are stable for a given (address, salt) pair and change
    /// whenever the salt does.
    #[test]
    fn fingerprint_is_deterministic_and_salt_sensitive(
        local in local_part_strategy(),
        label_a in domain_label_strategy(),
        label_b in tld_strategy(),
        salt_a in ".*",
        salt_b in ".*",
    ) {
        let raw = format!("{local}@{label_a}.{label_b}");
        let address = address::normalize(&raw).expect("well-formed address");

        let fp1 = address.fingerprint(salt_a.as_bytes());
        let fp2 = address.fingerprint(salt_a.as_bytes());
        prop_assert_eq!(fp1, fp2);

        if salt_a != salt_b {
            let fp3 = address.fingerprint(salt_b.as_bytes());
            prop_assert_ne!(fp1, fp3);
        }
    }

    /// Classifier confidence is always in [0, 1], and the deterministic
    /// RCPT codes (250/251/550/551/553) land in the 0.95-0.98 band spec.md
    /// §3 reserves for deterministic outcomes.
    #[test]
    fn classifier_confidence_is_bounded(code in any::<u16>()) {
        let classification = classify(Some(code));
        prop_assert!(classification.confidence >= 0.0 && classification.confidence <= 1.0);
        if matches!(code, 250 | 251 | 550 | 551 | 553) {
            prop_assert!(classification.confidence >= 0.95);
        }
    }

    /// A Verdict round-trips through JSON with every visible field intact
    /// (spec.md §8 "Round-trip").
    #[test]
    fn verdict_round_trips_through_json(
        status_idx in 0..5u8,
        code in prop::option::of(100u16..700),
        priority in 0u16..65535,
    ) {
        let status = match status_idx {
            0 => Status::Valid,
            1 => Status::Invalid,
            2 => Status::CatchAll,
            3 => Status::Unknown,
            _ => Status::Risky,
        };
        let verdict = Verdict {
            status,
            reason: Reason::MailboxExists,
            confidence: 0.9,
            smtp_code: code,
            smtp_response: code.map(|c| format!("reply {c}")),
            mx_host: Some("mx.example.com".to_string()),
            mx_records: vec![MxRecord::new("mx.example.com", priority)],
            is_catch_all: status == Status::CatchAll,
            is_disposable: false,
            duration_ms: 12,
            checked_at: Utc::now(),
        };

        let json = serde_json::to_string(&verdict).expect("serialize");
        let restored: Verdict = serde_json::from_str(&json).expect("deserialize");
        prop_assert!(verdict.eq_ignoring_timestamps(&restored));
    }
}
