#![forbid(unsafe_code)]
//! mailgate — SMTP-handshake email deliverability verification.
//!
//! The crate answers, for a submitted address, whether a mailbox is likely to
//! exist, whether its domain is a catch-all, whether the address is
//! disposable, or whether verification was inconclusive. It never sends
//! message content: every probe is a `RCPT TO` handshake that is aborted with
//! `QUIT` before any `DATA` would be sent.
//!
//! The entry point is [`Verifier`]; everything else composes it.

pub mod address;
pub mod cache;
pub mod catchall;
pub mod classifier;
pub mod config;
pub mod disposable;
pub mod domain_meta;
pub mod error;
pub mod mx;
pub mod rate_gate;
pub mod smtp;
pub mod verdict;
pub mod verifier;

pub use address::{Address, AddressFingerprint, SyntaxRejection};
pub use config::Config;
pub use error::VerifyError;
pub use mx::{MxRecord, MxResolver};
pub use verdict::{Reason, Status, Verdict};
pub use verifier::{BatchPriority, BatchRequest, VerifyRequest, Verifier};
