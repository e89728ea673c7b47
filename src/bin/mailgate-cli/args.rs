use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mailgate-cli")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Commands>,

    /// read addresses from stdin (one per line) instead of a subcommand
    #[arg(long)]
    pub stdin: bool,

    /// write the report to a file instead of stdout
    #[arg(long)]
    pub out: Option<String>,

    /// output format: human|json|ndjson
    #[arg(long, default_value = "human")]
    pub format: String,

    /// MAIL FROM envelope sender, overrides MAILGATE_SMTP__MAIL_FROM
    #[arg(long = "from")]
    pub mail_from: Option<String>,

    /// per-address verification deadline in milliseconds
    #[arg(long = "deadline-ms")]
    pub deadline_ms: Option<u64>,

    /// bypass the Result Cache for this run
    #[arg(long)]
    pub skip_cache: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// verify a single address
    Verify { email: String },
}
