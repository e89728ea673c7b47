#[path = "mailgate-cli/args.rs"]
mod args;
#[path = "mailgate-cli/output.rs"]
mod output;

use std::io::{self, BufRead};

use anyhow::{Context, Result};
use clap::Parser;

use args::{Cli, Commands};
use mailgate::{Config, Verifier, VerifyRequest};
use output::{any_invalid, write_reports, OutputRow};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env_unvalidated().context("loading configuration")?;
    if let Some(from) = &cli.mail_from {
        config.smtp.mail_from = from.clone();
    }
    config.validate().context(
        "smtp.mail_from is required: set MAILGATE_SMTP__MAIL_FROM or pass --from",
    )?;

    let verifier = Verifier::new(config).context("initializing verifier")?;

    let mut rows = Vec::new();

    if cli.stdin {
        for line in io::stdin().lock().lines() {
            let email = line.context("read stdin")?;
            if email.trim().is_empty() {
                continue;
            }
            rows.push(verify_one(&verifier, email, &cli).await);
        }
    } else if let Some(Commands::Verify { email }) = &cli.cmd {
        rows.push(verify_one(&verifier, email.clone(), &cli).await);
    } else {
        eprintln!("usage: mailgate-cli verify <email> | mailgate-cli --stdin");
        return Ok(());
    }

    write_reports(&rows, &cli)?;

    if any_invalid(&rows) {
        std::process::exit(2);
    }
    Ok(())
}

async fn verify_one(verifier: &Verifier, email: String, cli: &Cli) -> OutputRow {
    let request = VerifyRequest {
        email: email.clone(),
        skip_cache: cli.skip_cache,
        deadline_ms: cli.deadline_ms,
    };
    let verdict = verifier.verify(request).await;
    OutputRow { email, verdict }
}
