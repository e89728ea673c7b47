//! DNS MX resolution (spec.md §4.2 "MX Resolver").
//!
//! The public entry point is [`MxResolver::resolve`], an async, TTL-cached
//! MX lookup. [`MxResolver::resolve_addresses`] additionally resolves an
//! individual exchange hostname to dialable addresses for the SMTP prober.

mod cache;
mod error;
mod resolver;
mod types;

pub use error::MxError;
pub use resolver::MxResolver;
pub use types::{sort_by_priority, MxFailureReason, MxLookupOutcome, MxRecord};
