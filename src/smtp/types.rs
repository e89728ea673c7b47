use serde::{Deserialize, Serialize};

/// A parsed (possibly multi-line) SMTP reply (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        let upper = cap.to_ascii_uppercase();
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .map(|token| token.eq_ignore_ascii_case(&upper))
                .unwrap_or(false)
        })
    }
}

/// The state in which an attempt ended, tagging `ProbeOutcome` so the
/// Classifier and retry policy know what happened without re-deriving it
/// from the SMTP code alone (spec.md §4.4: "it records the code that
/// failed and the state in which it failed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpState {
    Connect,
    Banner,
    Ehlo,
    StartTls,
    Mail,
    Rcpt,
    Done,
}
