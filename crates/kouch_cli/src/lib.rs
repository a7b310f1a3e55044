//! # kouchctl
//!
//! Command-line administration for CouchDB servers.
//!
//! ## Commands
//!
//! - `kouchctl get [doc|db|security|version] [dsn]` - Read a resource
//! - `kouchctl put [doc|db|security] [dsn]` - Write a resource
//! - `kouchctl post [doc|compact|cluster-setup|replicate] [dsn]` - Create a
//!   document or run a server-side action
//! - `kouchctl delete [doc|db] [dsn]` - Delete a resource
//! - `kouchctl ping [dsn]` - Check that the server is up
//!
//! ## Configuration
//!
//! - `--kouchconfig` - YAML config file with named contexts
//!   (default `~/.kouchctl/config`)
//! - `KOUCHCTL_URL` - Server URL, overriding the config file
//!
//! A positional DSN overrides both. Every command runs under the retry
//! policy given by `--retry`, `--retry-delay` and `--retry-timeout`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod error;
pub mod output;

use clap::{Args, Parser, Subcommand};
use commands::delete::DeleteArgs;
use commands::get::GetArgs;
use commands::ping::PingArgs;
use commands::post::PostArgs;
use commands::put::PutArgs;
use commands::Session;
use config::KouchConfig;
use error::CliResult;
use kouch_client::exit;
use kouch_replicate::CancellationToken;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// kouchctl - administer CouchDB servers.
#[derive(Debug, Parser)]
#[command(name = "kouchctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Flags accepted by every command.
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub kouchconfig: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Number of retries after a transient failure; negative retries forever
    #[arg(long, global = true, default_value_t = 0, allow_negative_numbers = true)]
    pub retry: i64,

    /// Delay between retries; exponential backoff when unset
    #[arg(long, global = true, value_name = "DURATION")]
    pub retry_delay: Option<String>,

    /// Give up retrying after this long
    #[arg(long, global = true, value_name = "DURATION")]
    pub retry_timeout: Option<String>,

    /// Per-request timeout
    #[arg(long, global = true, value_name = "DURATION")]
    pub request_timeout: Option<String>,

    /// TCP connect timeout
    #[arg(long, global = true, value_name = "DURATION")]
    pub connect_timeout: Option<String>,

    /// Output format: json, raw, yaml or go-template[=TEMPLATE]
    #[arg(short, long, global = true, default_value = "json")]
    pub format: String,

    /// Template for the go-template format
    #[arg(long, global = true)]
    pub template: Option<String>,

    /// Request body: JSON, @file or @- for stdin
    #[arg(long, global = true)]
    pub data: Option<String>,

    /// Request option, repeatable
    #[arg(short = 'O', long = "option", global = true, value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Document IDs to replicate, repeatable or comma-separated
    #[arg(long = "doc-id", global = true, value_delimiter = ',')]
    pub doc_ids: Vec<String>,

    /// Server URL used when the config file names none
    #[arg(long, global = true, env = "KOUCHCTL_URL", hide = true)]
    pub url: Option<String>,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch a resource.
    Get(GetArgs),
    /// Create or replace a resource.
    Put(PutArgs),
    /// Create a document or run a server action.
    Post(PostArgs),
    /// Delete a resource.
    #[command(alias = "del")]
    Delete(DeleteArgs),
    /// Check that the server is up.
    Ping(PingArgs),
}

impl Commands {
    /// The positional DSN given to the command, if any.
    pub fn dsn(&self) -> Option<&str> {
        match self {
            Commands::Get(args) => args.dsn(),
            Commands::Put(args) => args.dsn(),
            Commands::Post(args) => args.dsn(),
            Commands::Delete(args) => args.dsn(),
            Commands::Ping(args) => args.dsn.as_deref(),
        }
    }
}

/// Runs a parsed command, writing results to `out` and the error message to
/// `err`. Returns the process exit code.
pub async fn execute(
    cli: &Cli,
    cancel: CancellationToken,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    match dispatch(cli, cancel, out).await {
        Ok(()) => exit::OK,
        Err(e) => {
            debug!(error = ?e, "command failed");
            let _ = writeln!(err, "Error: {e}");
            e.exit_code()
        }
    }
}

async fn dispatch(cli: &Cli, cancel: CancellationToken, out: &mut dyn Write) -> CliResult<()> {
    let config = KouchConfig::load(cli.global.kouchconfig.as_deref())?;
    let mut session = Session::new(&cli.global, &config, cli.command.dsn(), cancel, out)?;
    match &cli.command {
        Commands::Get(args) => commands::get::execute(args, &mut session).await,
        Commands::Put(args) => commands::put::execute(args, &mut session).await,
        Commands::Post(args) => commands::post::execute(args, &mut session).await,
        Commands::Delete(args) => commands::delete::execute(args, &mut session).await,
        Commands::Ping(_) => commands::ping::execute(&mut session).await,
    }
}

/// Parses arguments and runs the command.
///
/// Help and version requests exit 0; malformed arguments exit with the
/// usage code.
pub async fn run_from<I, T>(args: I, out: &mut dyn Write, err: &mut dyn Write) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => execute(&cli, CancellationToken::new(), out, err).await,
        Err(e) if !e.use_stderr() => {
            let _ = write!(out, "{e}");
            exit::OK
        }
        Err(e) => {
            let _ = write!(err, "{e}");
            exit::USAGE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::get::GetTarget;
    use commands::post::PostTarget;

    #[test]
    fn parse_global_flags_after_verb() {
        let cli = Cli::parse_from([
            "kouchctl",
            "get",
            "http://localhost:5984/db/doc",
            "--retry",
            "-1",
            "--retry-delay",
            "1s",
            "-O",
            "rev=1-abc",
            "-f",
            "yaml",
        ]);
        assert_eq!(cli.global.retry, -1);
        assert_eq!(cli.global.retry_delay.as_deref(), Some("1s"));
        assert_eq!(cli.global.options, ["rev=1-abc"]);
        assert_eq!(cli.global.format, "yaml");
        assert_eq!(cli.command.dsn(), Some("http://localhost:5984/db/doc"));
    }

    #[test]
    fn parse_targets_and_aliases() {
        let cli = Cli::parse_from(["kouchctl", "get", "sec", "http://h/db"]);
        assert!(matches!(
            cli.command,
            Commands::Get(ref a) if matches!(a.target, Some(GetTarget::Security(_)))
        ));
        assert_eq!(cli.command.dsn(), Some("http://h/db"));

        let cli = Cli::parse_from(["kouchctl", "post", "cluster", "http://h/"]);
        assert!(matches!(
            cli.command,
            Commands::Post(ref a) if matches!(a.target, Some(PostTarget::ClusterSetup(_)))
        ));

        let cli = Cli::parse_from(["kouchctl", "del", "http://h/db"]);
        assert!(matches!(cli.command, Commands::Delete(_)));
    }

    #[test]
    fn doc_ids_split_on_commas() {
        let cli = Cli::parse_from([
            "kouchctl",
            "post",
            "rep",
            "--doc-id",
            "a,b",
            "--doc-id",
            "c",
        ]);
        assert_eq!(cli.global.doc_ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn bad_flag_is_usage() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = run_from(["kouchctl", "get", "--bogus"], &mut out, &mut err).await;
        assert_eq!(code, exit::USAGE);
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn help_exits_zero() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = run_from(["kouchctl", "--help"], &mut out, &mut err).await;
        assert_eq!(code, exit::OK);
        assert!(String::from_utf8(out).unwrap().contains("kouchctl"));
    }
}
