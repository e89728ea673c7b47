use std::fs::File;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use mailgate::Verdict;

use crate::args::Cli;

pub struct OutputRow {
    pub email: String,
    pub verdict: Verdict,
}

pub fn write_reports(rows: &[OutputRow], cli: &Cli) -> Result<()> {
    match cli.format.as_str() {
        "human" => write_human(rows, cli),
        "json" => write_json(rows, cli),
        "ndjson" => write_ndjson(rows, cli),
        other => bail!("unknown --format '{other}', use: human|json|ndjson"),
    }
}

pub fn any_invalid(rows: &[OutputRow]) -> bool {
    rows.iter()
        .any(|row| matches!(row.verdict.status, mailgate::Status::Invalid))
}

fn open_sink(cli: &Cli) -> Result<Box<dyn Write>> {
    match &cli.out {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("create {path}"))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn write_human(rows: &[OutputRow], cli: &Cli) -> Result<()> {
    let mut sink = open_sink(cli)?;
    for row in rows {
        let v = &row.verdict;
        writeln!(
            sink,
            "{} :: {}/{} (confidence {:.2}{})",
            row.email,
            v.status,
            v.reason,
            v.confidence,
            v.smtp_code.map(|c| format!(", smtp {c}")).unwrap_or_default(),
        )?;
    }
    Ok(())
}

fn write_json(rows: &[OutputRow], cli: &Cli) -> Result<()> {
    let mut sink = open_sink(cli)?;
    let flattened: Vec<_> = rows
        .iter()
        .map(|row| serde_json::json!({ "email": row.email, "verdict": row.verdict }))
        .collect();
    serde_json::to_writer_pretty(&mut sink, &flattened)?;
    writeln!(sink)?;
    Ok(())
}

fn write_ndjson(rows: &[OutputRow], cli: &Cli) -> Result<()> {
    let mut sink = open_sink(cli)?;
    for row in rows {
        let line = serde_json::json!({ "email": row.email, "verdict": row.verdict });
        writeln!(sink, "{}", serde_json::to_string(&line)?)?;
    }
    Ok(())
}
