//! Syntax Filter and [`Address`]/[`AddressFingerprint`] types (spec.md §3, §4.1).
//!
//! Pure and deterministic: no I/O, no allocation beyond building the
//! normalized strings. Grounded on the teacher's `validator::{mod,local,
//! domain}` (local-part atext rules, per-label length/charset rules, IDNA
//! conversion), reshaped into a single `normalize` entry point that returns
//! either a normalized [`Address`] or a [`SyntaxRejection`] rather than a
//! report-with-reasons, since the spec treats "syntax ok or not" as a single
//! branch point ahead of the rest of the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const MAX_TOTAL_LEN: usize = 254;
const MAX_LABEL_LEN: usize = 63;

/// A normalized email address: trimmed, lowercased, split at the single `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    local: String,
    domain: String,
}

impl Address {
    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `local@domain`, the canonical form hashed for [`AddressFingerprint`]
    /// and logged in place of the raw address.
    pub fn normalized(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    pub fn fingerprint(&self, salt: &[u8]) -> AddressFingerprint {
        AddressFingerprint::compute(&self.normalized(), salt)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid address: {reason}")]
pub struct SyntaxRejection {
    pub reason: String,
}

impl SyntaxRejection {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validate and normalize a raw address per spec.md §4.1.
pub fn normalize(raw: &str) -> Result<Address, SyntaxRejection> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(SyntaxRejection::new("empty address"));
    }
    if input.len() > MAX_TOTAL_LEN {
        return Err(SyntaxRejection::new(format!(
            "total length {} exceeds {MAX_TOTAL_LEN}",
            input.len()
        )));
    }

    let mut parts = input.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let rest = match parts.next() {
        Some(rest) => rest,
        None => return Err(SyntaxRejection::new("must contain exactly one '@'")),
    };
    if rest.contains('@') {
        return Err(SyntaxRejection::new("must contain exactly one '@'"));
    }

    if local.is_empty() {
        return Err(SyntaxRejection::new("local part is empty"));
    }
    if !is_valid_local(local) {
        return Err(SyntaxRejection::new("local part has invalid characters"));
    }

    let domain = rest.to_ascii_lowercase();
    validate_domain(&domain)?;

    Ok(Address {
        local: local.to_ascii_lowercase(),
        domain,
    })
}

fn is_valid_local(local: &str) -> bool {
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    local.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '!' | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '*'
                    | '+'
                    | '-'
                    | '/'
                    | '='
                    | '?'
                    | '^'
                    | '_'
                    | '`'
                    | '{'
                    | '|'
                    | '}'
                    | '~'
                    | '.'
            )
    })
}

fn validate_domain(domain: &str) -> Result<(), SyntaxRejection> {
    if domain.is_empty() {
        return Err(SyntaxRejection::new("domain is empty"));
    }
    if domain.contains("..") {
        return Err(SyntaxRejection::new("domain has consecutive dots"));
    }

    let ascii_domain = idna::domain_to_ascii(domain)
        .map_err(|_| SyntaxRejection::new("domain IDNA conversion failed"))?;

    let labels: Vec<&str> = ascii_domain.split('.').collect();
    if labels.len() < 2 {
        return Err(SyntaxRejection::new("domain must have at least 2 labels"));
    }

    for label in &labels {
        validate_label(label)?;
    }

    let tld = labels.last().copied().unwrap_or_default();
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SyntaxRejection::new(
            "domain TLD must be at least 2 non-numeric letters",
        ));
    }

    Ok(())
}

fn validate_label(label: &str) -> Result<(), SyntaxRejection> {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return Err(SyntaxRejection::new(format!(
            "domain label '{label}' length {} invalid (1..={MAX_LABEL_LEN})",
            label.len()
        )));
    }
    let first = label.chars().next().unwrap();
    let last = label.chars().next_back().unwrap();
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(SyntaxRejection::new(format!(
            "domain label '{label}' must start and end with an alphanumeric"
        )));
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(SyntaxRejection::new(format!(
            "domain label '{label}' has invalid characters"
        )));
    }
    Ok(())
}

/// A 256-bit salted hash of the normalized address (spec.md §3). Used as the
/// Result Cache key so addresses are never stored in plaintext by the cache
/// or by logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressFingerprint([u8; 32]);

impl AddressFingerprint {
    pub fn compute(normalized_address: &str, salt: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(normalized_address.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for AddressFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AddressFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AddressFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != 64 {
            return Err(serde::de::Error::custom("fingerprint must be 64 hex chars"));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(serde::de::Error::custom)?;
            bytes[i] = u8::from_str_radix(s, 16).map_err(serde::de::Error::custom)?;
        }
        Ok(Self(bytes))
    }
}
