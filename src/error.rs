//! Crate-wide error taxonomy.
//!
//! Mirrors the teacher's per-module `thiserror` enums (`SmtpVerifyError`,
//! `MxError`), folded into one [`VerifyError`] for the plumbing inside
//! [`crate::verifier::Verifier`]. Per spec.md §7, nothing here crosses the
//! Verifier Facade as a propagated error: every outcome, recoverable or
//! not, becomes a [`crate::Verdict`]. `VerifyError` stays `pub` only because
//! [`crate::mx::MxResolver`] is usable independently of the facade and
//! returns [`MxError`] directly (wrapped here as `VerifyError::Resolve`);
//! the SMTP and Rate Gate layers fold their own errors into
//! [`crate::smtp::ProbeOutcome`]/a synthetic `421` before they ever reach
//! this type, so this enum carries only the variants actually constructed
//! somewhere in the crate.

use thiserror::Error;

use crate::mx::MxError;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Resolve(#[from] MxError),

    #[error("batch of {0} addresses exceeds the maximum of {1}")]
    BatchTooLarge(usize, usize),
}
