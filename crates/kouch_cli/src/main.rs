//! kouchctl - command-line administration for CouchDB servers.

use anyhow::Context;
use clap::Parser;
use kouch_cli::{execute, Cli};
use kouch_client::exit;
use kouch_replicate::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { exit::USAGE } else { exit::OK });
        }
    };

    // Logs go to stderr; stdout carries command output.
    let filter = if cli.global.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let code = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        let mut out = std::io::stdout().lock();
        let mut err = std::io::stderr().lock();
        execute(&cli, cancel, &mut out, &mut err).await
    });
    std::process::exit(code);
}
