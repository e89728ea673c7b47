//! SMTP Prober (spec.md §4.4): an explicit state machine over a single
//! RCPT TO handshake, with retry/backoff and multi-MX failover.

mod error;
mod probe;
mod session;
mod types;

pub use error::SmtpError;
pub use probe::{ProbeOutcome, SmtpProber};
pub use types::{SmtpReply, SmtpState};
