//! Static disposable-domain list (spec.md §4.5 contextual override:
//! "domain present in disposable list ⇒ status=risky").
//!
//! Grounded on the teacher's `phf` dependency (there used for Unicode
//! confusable tables in `validator::spec`); repurposed here for O(1)
//! compile-time set membership instead of a runtime-loaded blocklist, since
//! shipping and updating the list is delegated to the external collaborators
//! (spec.md §1 scopes persistent data management out of the core).

use phf::phf_set;

static DISPOSABLE_DOMAINS: phf::Set<&'static str> = phf_set! {
    "tempmail.com",
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "yopmail.com",
    "trashmail.com",
    "getnada.com",
    "throwawaymail.com",
    "sharklasers.com",
    "dispostable.com",
    "maildrop.cc",
    "fakeinbox.com",
    "mintemail.com",
    "mailnesia.com",
    "tempail.com",
};

/// True if `domain` (already lowercased) is a known disposable/throwaway
/// mail provider.
pub fn is_disposable(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(domain)
}
