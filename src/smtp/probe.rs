//! SMTP Prober (spec.md §4.4): runs the RCPT TO state machine against one
//! MX at a time, with retry/backoff and multi-MX failover, and returns the
//! reply code and text for the Classifier to interpret.
//!
//! Grounded on the teacher's `smtp_verify::probe::probe_host` (the
//! connect → banner → EHLO → [STARTTLS → EHLO'] → MAIL → RCPT sequence,
//! QUIT-on-every-exit discipline, STARTTLS-capability gating) generalized
//! with the explicit [`SmtpState`] tagging, retry budget, and MX failover
//! spec.md §4.4 adds on top of the teacher's single-host probe.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::mx::{MxRecord, MxResolver};
use crate::rate_gate::RateGate;

use super::error::SmtpError;
use super::session::SmtpSession;
use super::types::SmtpState;

/// The outcome of one attempt against one MX host. Never itself an `Err`:
/// transport/protocol failures are folded into `retryable`/`rate_limited`
/// so the retry policy and Classifier share one vocabulary (spec.md §7).
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub mx_host: String,
    pub reached_state: SmtpState,
    pub smtp_code: Option<u16>,
    pub smtp_response: Option<String>,
    pub retryable: bool,
    pub rate_limited: bool,
    pub transcript: Vec<String>,
}

impl ProbeOutcome {
    fn failed(mx_host: String, state: SmtpState, retryable: bool, transcript: Vec<String>) -> Self {
        Self {
            mx_host,
            reached_state: state,
            smtp_code: None,
            smtp_response: None,
            retryable,
            rate_limited: false,
            transcript,
        }
    }

    fn coded(
        mx_host: String,
        state: SmtpState,
        code: u16,
        response: String,
        retryable: bool,
        rate_limited: bool,
        transcript: Vec<String>,
    ) -> Self {
        Self {
            mx_host,
            reached_state: state,
            smtp_code: Some(code),
            smtp_response: Some(response),
            retryable,
            rate_limited,
            transcript,
        }
    }

    /// 250/251 or 550/551/553 at RCPT: spec.md §4.4's "deterministic" reply
    /// that ends the multi-MX failover loop outright.
    pub fn is_deterministic(&self) -> bool {
        matches!(self.smtp_code, Some(250) | Some(251) | Some(550) | Some(551) | Some(553))
    }
}

/// `retryable`/`rate_limited` flags for a completed (non-connection-level)
/// SMTP reply. A `421` "ends the attempt" outright (spec.md §4.4) rather
/// than being retried with backoff on the same MX.
fn terminal_flags(reply: &super::types::SmtpReply) -> (bool, bool) {
    let rate_limited = reply.code == 421;
    let retryable = reply.is_transient_failure() && !rate_limited;
    (retryable, rate_limited)
}

async fn with_timeout<F, T>(
    step_timeout: Duration,
    deadline: Instant,
    fut: F,
) -> Result<T, SmtpError>
where
    F: Future<Output = Result<T, SmtpError>>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    let bound = step_timeout.min(remaining);
    tokio::time::timeout(bound, fut).await.map_err(SmtpError::from)?
}

fn build_tls_connector(verify: bool) -> Result<native_tls::TlsConnector, native_tls::Error> {
    native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
}

/// RFC 5321 local-parts outside the dot-atom charset require quoting; our
/// Syntax Filter only ever admits dot-atom locals, so this is defensive.
fn format_local_for_rcpt(local: &str) -> String {
    let needs_quoting = local
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c)));
    if needs_quoting {
        format!("\"{}\"", local.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        local.to_string()
    }
}

#[derive(Clone)]
pub struct SmtpProber {
    resolver: Arc<MxResolver>,
    rate_gate: Arc<RateGate>,
}

impl SmtpProber {
    pub fn new(resolver: Arc<MxResolver>, rate_gate: Arc<RateGate>) -> Self {
        Self { resolver, rate_gate }
    }

    /// Try each MX in priority order until a deterministic reply is
    /// produced or every MX has been exhausted (spec.md §4.4, §4.8 step 5).
    pub async fn probe(
        &self,
        domain: &str,
        target_local: &str,
        mx_records: &[MxRecord],
        cfg: &Config,
        deadline: Instant,
    ) -> ProbeOutcome {
        let mut last = None;
        for mx in mx_records {
            if Instant::now() >= deadline {
                break;
            }
            tracing::debug!(target: "smtp_probe", domain = %domain, mx_host = %mx.exchange, "probing MX");
            let outcome = self
                .probe_one_mx_with_retry(domain, target_local, mx, cfg, deadline)
                .await;
            let deterministic = outcome.is_deterministic();
            if !deterministic {
                tracing::debug!(
                    target: "smtp_probe",
                    domain = %domain,
                    mx_host = %mx.exchange,
                    smtp_code = ?outcome.smtp_code,
                    "non-deterministic reply, advancing to next MX"
                );
            }
            last = Some(outcome);
            if deterministic {
                break;
            }
        }
        last.unwrap_or_else(|| {
            ProbeOutcome::failed(String::new(), SmtpState::Connect, false, Vec::new())
        })
    }

    /// Single-shot probe against one specific MX, no retry budget — used by
    /// the Catch-all Detector, which treats a transient failure as
    /// inconclusive rather than something to retry (spec.md §4.6).
    pub async fn probe_single(
        &self,
        domain: &str,
        target_local: &str,
        mx: &MxRecord,
        cfg: &Config,
        deadline: Instant,
    ) -> ProbeOutcome {
        match self.rate_gate.acquire(domain, &mx.exchange, deadline).await {
            Ok(lease) => {
                let outcome = self.attempt(domain, target_local, mx, cfg, deadline).await;
                drop(lease);
                if outcome.rate_limited {
                    self.rate_gate.register_rate_limited(domain);
                }
                outcome
            }
            Err(_) => ProbeOutcome::coded(
                mx.exchange.clone(),
                SmtpState::Connect,
                421,
                "rate gate timeout".to_string(),
                false,
                true,
                Vec::new(),
            ),
        }
    }

    async fn probe_one_mx_with_retry(
        &self,
        domain: &str,
        target_local: &str,
        mx: &MxRecord,
        cfg: &Config,
        deadline: Instant,
    ) -> ProbeOutcome {
        let mut attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return ProbeOutcome::failed(
                    mx.exchange.clone(),
                    SmtpState::Connect,
                    false,
                    Vec::new(),
                );
            }

            let outcome = match self.rate_gate.acquire(domain, &mx.exchange, deadline).await {
                Ok(lease) => {
                    let outcome = self.attempt(domain, target_local, mx, cfg, deadline).await;
                    drop(lease);
                    outcome
                }
                Err(_) => ProbeOutcome::coded(
                    mx.exchange.clone(),
                    SmtpState::Connect,
                    421,
                    "rate gate timeout".to_string(),
                    false,
                    true,
                    Vec::new(),
                ),
            };

            if outcome.rate_limited {
                self.rate_gate.register_rate_limited(domain);
            }

            if outcome.retryable && attempt + 1 < cfg.retry.max_attempts {
                let backoff = cfg.retry.backoff_for(attempt);
                attempt += 1;
                tracing::debug!(
                    target: "smtp_probe",
                    domain = %domain,
                    mx_host = %mx.exchange,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after retryable failure"
                );
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return outcome;
                }
                tokio::time::sleep(backoff.min(remaining)).await;
                continue;
            }

            return outcome;
        }
    }

    async fn attempt(
        &self,
        domain: &str,
        target_local: &str,
        mx: &MxRecord,
        cfg: &Config,
        deadline: Instant,
    ) -> ProbeOutcome {
        self.attempt_inner(domain, target_local, mx, cfg, deadline, true).await
    }

    /// `allow_starttls` is `false` only on the one reconnect-without-TLS
    /// attempt spec.md §4.4 allows after a STARTTLS handshake has already
    /// torn down the cleartext connection (see the STARTTLS branch below) —
    /// it is never set `false` by an external caller.
    async fn attempt_inner(
        &self,
        domain: &str,
        target_local: &str,
        mx: &MxRecord,
        cfg: &Config,
        deadline: Instant,
        allow_starttls: bool,
    ) -> ProbeOutcome {
        let smtp = &cfg.smtp;
        let host = mx.exchange.clone();

        let addrs = match with_timeout(smtp.connect_timeout(), deadline, async {
            self.resolver
                .resolve_addresses(&host, smtp.port)
                .await
                .map_err(SmtpError::from)
        })
        .await
        {
            Ok(addrs) if !addrs.is_empty() => addrs,
            _ => return ProbeOutcome::failed(host, SmtpState::Connect, true, Vec::new()),
        };

        let mut session =
            match with_timeout(smtp.connect_timeout(), deadline, SmtpSession::connect(&host, &addrs)).await
            {
                Ok(session) => session,
                Err(_) => return ProbeOutcome::failed(host, SmtpState::Connect, true, Vec::new()),
            };

        let banner = match with_timeout(smtp.read_timeout(), deadline, session.read_banner()).await {
            Ok(reply) => reply,
            Err(_) => {
                session.quit().await;
                return ProbeOutcome::failed(host, SmtpState::Banner, true, session.transcript);
            }
        };
        if banner.code == 521 {
            // RFC 7504: "521 host does not accept mail" — the teacher's
            // probe_host short-circuits here rather than attempting EHLO;
            // not retryable (the MX has declared itself permanently out of
            // service) but non-deterministic, so multi-MX failover advances.
            session.quit().await;
            return ProbeOutcome::failed(host, SmtpState::Banner, false, session.transcript);
        }
        if !banner.is_positive_completion() {
            let (retryable, rate_limited) = terminal_flags(&banner);
            session.quit().await;
            return ProbeOutcome::coded(
                host,
                SmtpState::Banner,
                banner.code,
                banner.text(),
                retryable,
                rate_limited,
                session.transcript,
            );
        }

        let helo_cmd = format!("EHLO {}", smtp.ehlo_hostname);
        let mut ehlo = match with_timeout(smtp.write_timeout(), deadline, session.send_command(&helo_cmd)).await {
            Ok(reply) => reply,
            Err(_) => {
                session.quit().await;
                return ProbeOutcome::failed(host, SmtpState::Ehlo, true, session.transcript);
            }
        };
        if !ehlo.is_positive_completion() {
            let (retryable, rate_limited) = terminal_flags(&ehlo);
            session.quit().await;
            return ProbeOutcome::coded(
                host,
                SmtpState::Ehlo,
                ehlo.code,
                ehlo.text(),
                retryable,
                rate_limited,
                session.transcript,
            );
        }

        if allow_starttls && ehlo.has_capability("STARTTLS") {
            let connector = match build_tls_connector(smtp.starttls_verify) {
                Ok(connector) => connector,
                Err(_) => {
                    session.quit().await;
                    return ProbeOutcome::failed(host, SmtpState::StartTls, true, session.transcript);
                }
            };
            let tls_reply =
                with_timeout(smtp.write_timeout(), deadline, session.starttls(&host, &connector)).await;
            match tls_reply {
                Ok(reply) if reply.is_positive_completion() => {
                    ehlo = match with_timeout(
                        smtp.write_timeout(),
                        deadline,
                        session.send_command(&helo_cmd),
                    )
                    .await
                    {
                        Ok(reply) => reply,
                        Err(_) => {
                            session.quit().await;
                            return ProbeOutcome::failed(host, SmtpState::Ehlo, true, session.transcript);
                        }
                    };
                }
                Ok(_reply) => {
                    // STARTTLS declined (non-2xx): the server never left
                    // plaintext framing, so the session continues exactly
                    // as it would have without advertising the capability.
                    tracing::debug!(
                        target: "smtp_probe",
                        domain = %domain,
                        mx_host = %host,
                        "STARTTLS declined, continuing in plaintext"
                    );
                }
                Err(_) => {
                    // The server already acknowledged STARTTLS (2xx) before
                    // the TLS handshake itself failed, so it has torn down
                    // cleartext framing on this connection — spec.md §4.4:
                    // reconnect once without attempting STARTTLS again,
                    // rather than falling back to plaintext on the same
                    // socket.
                    tracing::debug!(
                        target: "smtp_probe",
                        domain = %domain,
                        mx_host = %host,
                        "STARTTLS handshake failed, reconnecting without STARTTLS"
                    );
                    session.quit().await;
                    return self
                        .attempt_inner(domain, target_local, mx, cfg, deadline, false)
                        .await;
                }
            }
        }
        let _ = &ehlo;

        let mail_cmd = format!("MAIL FROM:<{}>", smtp.mail_from);
        let mail_reply = match with_timeout(smtp.write_timeout(), deadline, session.send_command(&mail_cmd)).await {
            Ok(reply) => reply,
            Err(_) => {
                session.quit().await;
                return ProbeOutcome::failed(host, SmtpState::Mail, true, session.transcript);
            }
        };
        if !mail_reply.is_positive_completion() {
            let (retryable, rate_limited) = terminal_flags(&mail_reply);
            session.quit().await;
            return ProbeOutcome::coded(
                host,
                SmtpState::Mail,
                mail_reply.code,
                mail_reply.text(),
                retryable,
                rate_limited,
                session.transcript,
            );
        }

        let rcpt_cmd = format!("RCPT TO:<{}@{}>", format_local_for_rcpt(target_local), domain);
        let rcpt_reply = match with_timeout(smtp.write_timeout(), deadline, session.send_command(&rcpt_cmd)).await {
            Ok(reply) => reply,
            Err(_) => {
                session.quit().await;
                return ProbeOutcome::failed(host, SmtpState::Rcpt, true, session.transcript);
            }
        };

        let (retryable, rate_limited) = terminal_flags(&rcpt_reply);
        session.rset().await;
        session.quit().await;
        ProbeOutcome::coded(
            host,
            SmtpState::Rcpt,
            rcpt_reply.code,
            rcpt_reply.text(),
            retryable,
            rate_limited,
            session.transcript,
        )
    }
}
