//! End-to-end scenarios (spec.md §8) driven against an in-process mock SMTP
//! listener. Each scenario below pins one row of the scenario table to a
//! runnable test; scenarios that don't require live SMTP traffic (syntax
//! rejection, disposable short-circuit, no-MX) are checked against the
//! component that owns that decision directly, since there is nothing an
//! SMTP mock could add.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use mailgate::address;
use mailgate::catchall::CatchallDetector;
use mailgate::classifier;
use mailgate::config::Config;
use mailgate::disposable;
use mailgate::mx::{MxRecord, MxResolver};
use mailgate::rate_gate::RateGate;
use mailgate::smtp::SmtpProber;
use mailgate::verdict::{Reason, Status};

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

async fn serve_script(mut socket: TcpStream, banner: &str, replies: &[&str]) {
    let _ = socket.write_all(banner.as_bytes()).await;
    let (read_half, mut write_half) = socket.split();
    let mut reader = BufReader::new(read_half);
    for reply in replies {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Spawns a listener that serves `connections` sequential clients, each
/// getting an independent copy of the same script.
async fn spawn_repeating_mock(connections: usize, banner: &'static str, replies: Vec<&'static str>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        for _ in 0..connections {
            if let Ok((socket, _)) = listener.accept().await {
                serve_script(socket, banner, &replies).await;
            }
        }
    });
    port
}

/// Spawns a listener that serves a distinct script per connection, in order.
async fn spawn_sequenced_mock(scripts: Vec<(&'static str, Vec<&'static str>)>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        for (banner, replies) in scripts {
            if let Ok((socket, _)) = listener.accept().await {
                serve_script(socket, banner, &replies).await;
            }
        }
    });
    port
}

fn fast_config(port: u16) -> Config {
    let mut cfg = Config::with_mail_from("postmaster@example.com");
    cfg.smtp.port = port;
    cfg.smtp.connect_timeout_ms = 500;
    cfg.smtp.read_timeout_ms = 300;
    cfg.smtp.write_timeout_ms = 300;
    cfg.retry.max_attempts = 1;
    cfg.rate.per_domain_interval_ms = 20;
    cfg.catchall.intra_probe_delay_ms = 10;
    cfg
}

fn local_prober(cfg: &Config) -> SmtpProber {
    let resolver = Arc::new(MxResolver::with_config(
        ResolverConfig::default(),
        ResolverOpts::default(),
        &cfg.cache,
    ));
    let rate_gate = Arc::new(RateGate::new(&cfg.rate));
    SmtpProber::new(resolver, rate_gate)
}

fn loopback_mx() -> MxRecord {
    MxRecord::new("127.0.0.1", 0)
}

#[tokio::test]
async fn scenario_1_valid_mailbox() {
    let port = spawn_repeating_mock(
        1,
        "220 mx.example.com ESMTP\r\n",
        vec!["250 mx.example.com\r\n", "250 OK\r\n", "250 Accepted\r\n", "221 Bye\r\n"],
    )
    .await;
    let cfg = fast_config(port);
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(5);

    let outcome = prober
        .probe("example.com", "user", &[loopback_mx()], &cfg, deadline)
        .await;
    let classification = classifier::classify(outcome.smtp_code);

    assert_eq!(outcome.smtp_code, Some(250));
    assert_eq!(classification.status, Status::Valid);
    assert_eq!(classification.reason, Reason::MailboxExists);
    assert!((classification.confidence - 0.98).abs() < 0.01);
}

#[tokio::test]
async fn scenario_2_invalid_mailbox() {
    let port = spawn_repeating_mock(
        1,
        "220 mx.example.com ESMTP\r\n",
        vec!["250 mx.example.com\r\n", "250 OK\r\n", "550 No such user\r\n", "221 Bye\r\n"],
    )
    .await;
    let cfg = fast_config(port);
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(5);

    let outcome = prober
        .probe("example.com", "nobody", &[loopback_mx()], &cfg, deadline)
        .await;
    let classification = classifier::classify(outcome.smtp_code);

    assert_eq!(outcome.smtp_code, Some(550));
    assert_eq!(classification.status, Status::Invalid);
    assert_eq!(classification.reason, Reason::MailboxNotFound);
    assert!((classification.confidence - 0.95).abs() < 0.01);
}

#[tokio::test]
async fn scenario_3_catchall_domain() {
    let probe_count = 2usize;
    // one primary RCPT + `probe_count` catch-all probes, all accepted.
    let port = spawn_repeating_mock(
        1 + probe_count,
        "220 mx.catchall.test ESMTP\r\n",
        vec!["250 mx.catchall.test\r\n", "250 OK\r\n", "250 Accepted\r\n", "221 Bye\r\n"],
    )
    .await;
    let mut cfg = fast_config(port);
    cfg.catchall.probe_count = probe_count as u8;
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(5);

    let primary = prober
        .probe("catchall.test", "anything", &[loopback_mx()], &cfg, deadline)
        .await;
    let mut classification = classifier::classify(primary.smtp_code);
    assert_eq!(classification.status, Status::Valid);

    let judgment = CatchallDetector::new(&prober)
        .detect("catchall.test", &loopback_mx(), &cfg, deadline)
        .await;
    if judgment.is_catch_all {
        classification = classifier::classify_catch_all();
    }

    assert!(judgment.is_catch_all);
    assert_eq!(classification.status, Status::CatchAll);
    assert_eq!(classification.reason, Reason::CatchAllDomain);
}

#[tokio::test]
async fn scenario_4_timeout() {
    // Banner arrives, then the mock goes silent: EHLO never gets a reply.
    let port = spawn_repeating_mock(1, "220 timeout.test ESMTP\r\n", vec![]).await;
    let cfg = fast_config(port);
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(2);

    let outcome = prober
        .probe("timeout.test", "slow", &[loopback_mx()], &cfg, deadline)
        .await;
    let classification = classifier::classify(outcome.smtp_code);

    assert_eq!(outcome.smtp_code, None);
    assert_eq!(classification.status, Status::Unknown);
    assert_eq!(classification.reason, Reason::ConnectionFailed);
}

#[tokio::test]
async fn scenario_5_rate_limited_then_retry_observes_cooldown() {
    let port = spawn_sequenced_mock(vec![
        (
            "220 rate.test ESMTP\r\n",
            vec!["250 rate.test\r\n", "250 OK\r\n", "421 too fast\r\n"],
        ),
        (
            "220 rate.test ESMTP\r\n",
            vec!["250 rate.test\r\n", "250 OK\r\n", "250 Accepted\r\n", "221 Bye\r\n"],
        ),
    ])
    .await;
    let mut cfg = fast_config(port);
    cfg.rate.cooldown_factor = 10;
    cfg.rate.cooldown_idle_secs = 60;
    cfg.rate.per_domain_interval_ms = 10;
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(5);

    let start = Instant::now();
    let first = prober
        .probe("rate.test", "burst", &[loopback_mx()], &cfg, deadline)
        .await;
    assert_eq!(first.smtp_code, Some(421));
    assert!(first.rate_limited);

    let second = prober
        .probe("rate.test", "burst", &[loopback_mx()], &cfg, deadline)
        .await;
    let elapsed = start.elapsed();

    assert_eq!(second.smtp_code, Some(250));
    assert!(
        elapsed >= Duration::from_millis(cfg.rate.per_domain_interval_ms * cfg.rate.cooldown_factor as u64 / 2),
        "expected the cooldown to push the retry out, elapsed={elapsed:?}"
    );
}

/// spec.md §4.4: "if the TLS handshake fails, the prober falls back to
/// plaintext on the same connection only if the server did not already
/// tear it down — otherwise it reconnects once without STARTTLS." The
/// first connection advertises STARTTLS, replies 220 to it, then the mock
/// closes the socket instead of completing a TLS handshake (the server has
/// already torn down cleartext framing), so the client must reconnect once
/// with STARTTLS suppressed and complete the RCPT dialogue on the fresh
/// plaintext connection.
#[tokio::test]
async fn scenario_starttls_handshake_failure_reconnects_without_tls() {
    let port = spawn_sequenced_mock(vec![
        (
            "220 mx.tls.test ESMTP\r\n",
            vec!["250-mx.tls.test\r\n250 STARTTLS\r\n", "220 Ready to start TLS\r\n"],
        ),
        (
            "220 mx.tls.test ESMTP\r\n",
            vec!["250 mx.tls.test\r\n", "250 OK\r\n", "250 Accepted\r\n", "221 Bye\r\n"],
        ),
    ])
    .await;
    let mut cfg = fast_config(port);
    cfg.retry.max_attempts = 1;
    let prober = local_prober(&cfg);
    let deadline = Instant::now() + Duration::from_secs(5);

    let outcome = prober
        .probe("tls.test", "user", &[loopback_mx()], &cfg, deadline)
        .await;
    let classification = classifier::classify(outcome.smtp_code);

    assert_eq!(outcome.smtp_code, Some(250));
    assert_eq!(classification.status, Status::Valid);
}

#[test]
fn scenario_6_disposable_domain_short_circuits() {
    assert!(disposable::is_disposable("tempmail.com"));
    let classification = classifier::classify_disposable();
    assert_eq!(classification.status, Status::Risky);
    assert_eq!(classification.reason, Reason::DisposableDomain);
    assert!((classification.confidence - 0.90).abs() < 0.01);
}

#[test]
fn scenario_7_syntax_rejection() {
    assert!(address::normalize("not an email").is_err());
}

#[test]
fn scenario_8_no_mx_records() {
    let classification = classifier::classify_no_mx();
    assert_eq!(classification.status, Status::Invalid);
    assert_eq!(classification.reason, Reason::NoMxRecords);
    assert!((classification.confidence - 0.95).abs() < 0.01);
}
