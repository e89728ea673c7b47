//! Catch-all Detector (spec.md §4.6).
//!
//! Grounded on the teacher's inline catch-all probing in
//! `smtp_verify::probe::probe_host` (random alias generation via
//! `smtp_verify::util::random_local_part`, accept/reject/tempfail tallying)
//! lifted out into its own component per the spec's decomposition, and
//! re-targeted at one-shot [`SmtpProber::probe_single`] calls through the
//! Rate Gate rather than inline RCPTs on an already-open session, so the
//! same per-domain spacing and concurrency ceilings apply to catch-all
//! probes as to the primary one (spec.md §4.6: "through the same Rate
//! Gate").

use std::time::Instant;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::Config;
use crate::mx::MxRecord;
use crate::smtp::SmtpProber;

/// Generates `len`-character lowercase-alphanumeric local-parts unlikely to
/// collide with a real mailbox.
fn random_local_part(len: usize) -> String {
    let length = len.clamp(8, 32);
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Result of probing `probe_count` random local-parts at a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchAllJudgment {
    pub is_catch_all: bool,
    pub accepted: u8,
    pub rejected: u8,
    pub inconclusive: u8,
}

pub struct CatchallDetector<'a> {
    prober: &'a SmtpProber,
}

impl<'a> CatchallDetector<'a> {
    pub fn new(prober: &'a SmtpProber) -> Self {
        Self { prober }
    }

    /// Probe `cfg.catchall.probe_count` random local-parts against `mx`,
    /// spaced by `catchall.intra_probe_delay`, and judge the domain a
    /// catch-all once at least half (rounded up) come back 250/251
    /// (spec.md §4.6, §8 invariant 7).
    pub async fn detect(
        &self,
        domain: &str,
        mx: &MxRecord,
        cfg: &Config,
        deadline: Instant,
    ) -> CatchAllJudgment {
        let probe_count = cfg.catchall.probe_count.max(1);
        let threshold = probe_count.div_ceil(2);

        let mut accepted = 0u8;
        let mut rejected = 0u8;
        let mut inconclusive = 0u8;

        for i in 0..probe_count {
            if i > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let delay = cfg.catchall.intra_probe_delay().min(remaining);
                tokio::time::sleep(delay).await;
            }
            if Instant::now() >= deadline {
                inconclusive += probe_count - i;
                break;
            }

            let local = random_local_part(12);
            let outcome = self.prober.probe_single(domain, &local, mx, cfg, deadline).await;
            match outcome.smtp_code {
                Some(250) | Some(251) => accepted += 1,
                Some(550) | Some(551) | Some(553) => rejected += 1,
                _ => inconclusive += 1,
            }
        }

        CatchAllJudgment {
            is_catch_all: accepted >= threshold,
            accepted,
            rejected,
            inconclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_local_part_has_bounded_length_and_charset() {
        let local = random_local_part(4);
        assert!(local.len() >= 8);
        assert!(local.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn threshold_is_half_rounded_up() {
        assert_eq!(1u8.div_ceil(2), 1);
        assert_eq!(2u8.div_ceil(2), 1);
        assert_eq!(3u8.div_ceil(2), 2);
    }
}
