//! `get` - read documents, databases, security objects and server version.

use super::{DsnArg, Session};
use crate::error::CliResult;
use clap::{Args, Subcommand};
use kouch_protocol::GetOptions;
use serde_json::json;

/// Arguments for the get command.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct GetArgs {
    /// What to fetch; detected from the DSN when omitted.
    #[command(subcommand)]
    pub target: Option<GetTarget>,

    #[command(flatten)]
    pub dsn: DsnArg,
}

/// Objects `get` can fetch.
#[derive(Debug, Subcommand)]
pub enum GetTarget {
    /// Fetch a document.
    Doc(DsnArg),
    /// Fetch database information.
    Db(DsnArg),
    /// Fetch a database's security object.
    #[command(alias = "sec")]
    Security(DsnArg),
    /// Fetch server version information.
    Version(DsnArg),
}

impl GetArgs {
    /// The positional DSN, wherever it was given.
    pub fn dsn(&self) -> Option<&str> {
        match &self.target {
            Some(
                GetTarget::Doc(d) | GetTarget::Db(d) | GetTarget::Security(d) | GetTarget::Version(d),
            ) => d.dsn.as_deref(),
            None => self.dsn.dsn.as_deref(),
        }
    }
}

/// Execute the get command.
pub async fn execute(args: &GetArgs, session: &mut Session<'_>) -> CliResult<()> {
    match &args.target {
        Some(GetTarget::Doc(_)) => doc(session).await,
        Some(GetTarget::Db(_)) => db(session).await,
        Some(GetTarget::Security(_)) => security(session).await,
        Some(GetTarget::Version(_)) => version(session).await,
        None => {
            let dsn = session.dsn()?;
            if dsn.has_doc() {
                doc(session).await
            } else if dsn.has_db() {
                db(session).await
            } else {
                version(session).await
            }
        }
    }
}

async fn doc(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let doc_id = session.doc_id()?;
    let opts = GetOptions::from_options(session.options().clone())?;
    let doc = {
        let (db, id) = (db.as_ref(), doc_id.as_str());
        session.retry(move || db.get_raw(id, opts.clone())).await?
    };
    session.output_body(&doc)
}

async fn db(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let info = session.retry(|| db.info()).await?;
    session.output_body(&info)
}

async fn security(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let security = session.retry(|| db.security()).await?;
    session.output(&json!(security))
}

async fn version(session: &mut Session<'_>) -> CliResult<()> {
    let client = session.client()?;
    let version = session.retry(|| client.version()).await?;
    session.output_body(&version)
}
