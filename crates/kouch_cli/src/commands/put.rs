//! `put` - write documents, create databases, replace security objects.

use super::{DsnArg, Session};
use crate::error::{CliError, CliResult};
use clap::{Args, Subcommand};
use kouch_protocol::{Document, PutOptions, SecurityObject};
use serde_json::json;

/// Arguments for the put command.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct PutArgs {
    /// What to write; detected from the DSN when omitted.
    #[command(subcommand)]
    pub target: Option<PutTarget>,

    #[command(flatten)]
    pub dsn: DsnArg,
}

/// Objects `put` can write.
#[derive(Debug, Subcommand)]
pub enum PutTarget {
    /// Create or update a document from --data.
    Doc(DsnArg),
    /// Create a database.
    Db(DsnArg),
    /// Replace a database's security object with --data.
    #[command(alias = "sec")]
    Security(DsnArg),
}

impl PutArgs {
    /// The positional DSN, wherever it was given.
    pub fn dsn(&self) -> Option<&str> {
        match &self.target {
            Some(PutTarget::Doc(d) | PutTarget::Db(d) | PutTarget::Security(d)) => {
                d.dsn.as_deref()
            }
            None => self.dsn.dsn.as_deref(),
        }
    }
}

/// Execute the put command.
pub async fn execute(args: &PutArgs, session: &mut Session<'_>) -> CliResult<()> {
    match &args.target {
        Some(PutTarget::Doc(_)) => doc(session).await,
        Some(PutTarget::Db(_)) => db(session).await,
        Some(PutTarget::Security(_)) => security(session).await,
        None => {
            if session.dsn()?.has_doc() {
                doc(session).await
            } else {
                db(session).await
            }
        }
    }
}

async fn doc(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let doc_id = session.doc_id()?;
    let doc = Document::from_value(session.require_data()?)?;
    let opts = PutOptions::from_options(session.options().clone());
    let rev = {
        let (db, id) = (db.as_ref(), doc_id.as_str());
        session
            .retry(move || db.put(id, doc.clone(), opts.clone()))
            .await?
    };
    session.output(&json!({"ok": true, "id": doc_id, "rev": rev}))
}

async fn db(session: &mut Session<'_>) -> CliResult<()> {
    let client = session.client()?;
    let dsn = session.dsn()?;
    let name = dsn
        .db()
        .ok_or_else(|| CliError::usage(format!("no database specified in {dsn}")))?
        .to_string();
    session.retry(|| client.create_db(&name)).await?;
    session.ok()
}

/// An empty object is sent as `{"admins":{},"members":{}}`.
async fn security(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let security: SecurityObject = serde_json::from_value(session.require_data()?)
        .map_err(|e| CliError::data(format!("invalid security object: {e}")))?;
    session.retry(|| db.set_security(&security)).await?;
    session.ok()
}
