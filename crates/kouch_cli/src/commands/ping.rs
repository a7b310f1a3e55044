//! `ping` - check that the server is up.

use super::Session;
use crate::error::CliResult;
use clap::Args;
use kouch_client::ClientError;

/// Arguments for the ping command.
#[derive(Debug, Args)]
pub struct PingArgs {
    /// Server URL.
    pub dsn: Option<String>,
}

/// Execute the ping command.
///
/// A server that answers but reports it is not ready counts as a transient
/// failure, so `--retry` waits for it.
pub async fn execute(session: &mut Session<'_>) -> CliResult<()> {
    let client = session.client()?;
    let server = session.dsn()?.server_base().to_string();
    let server = server.as_str();
    let client = client.as_ref();
    session
        .retry(move || async move {
            if client.ping().await? {
                Ok::<(), ClientError>(())
            } else {
                Err(ClientError::transient(format!("{server} is not responding")))
            }
        })
        .await?;
    session.ok()
}
