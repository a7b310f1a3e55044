//! `delete` - delete documents and databases.

use super::{DsnArg, Session};
use crate::error::{CliError, CliResult};
use clap::{Args, Subcommand};
use kouch_protocol::{GetOptions, RevisionId};
use serde_json::{json, Value};

/// Arguments for the delete command.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct DeleteArgs {
    /// What to delete; detected from the DSN when omitted.
    #[command(subcommand)]
    pub target: Option<DeleteTarget>,

    #[command(flatten)]
    pub dsn: DsnArg,
}

/// Objects `delete` can remove.
#[derive(Debug, Subcommand)]
pub enum DeleteTarget {
    /// Delete a document. Pass -O rev=... or the current revision is used.
    Doc(DsnArg),
    /// Delete a database.
    Db(DsnArg),
}

impl DeleteArgs {
    /// The positional DSN, wherever it was given.
    pub fn dsn(&self) -> Option<&str> {
        match &self.target {
            Some(DeleteTarget::Doc(d) | DeleteTarget::Db(d)) => d.dsn.as_deref(),
            None => self.dsn.dsn.as_deref(),
        }
    }
}

/// Execute the delete command.
pub async fn execute(args: &DeleteArgs, session: &mut Session<'_>) -> CliResult<()> {
    match &args.target {
        Some(DeleteTarget::Doc(_)) => doc(session).await,
        Some(DeleteTarget::Db(_)) => db(session).await,
        None => {
            let dsn = session.dsn()?;
            if dsn.has_doc() {
                doc(session).await
            } else if dsn.has_db() {
                db(session).await
            } else {
                Err(CliError::usage(format!(
                    "no database or document specified in {dsn}"
                )))
            }
        }
    }
}

async fn doc(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let doc_id = session.doc_id()?;
    let (db, id) = (db.as_ref(), doc_id.as_str());

    let rev = match session.options().get("rev") {
        Some(Value::String(s)) => RevisionId::parse(s)?,
        Some(other) => return Err(CliError::data(format!("invalid revision: {other}"))),
        None => {
            let current = session
                .retry(move || db.get(id, GetOptions::default()))
                .await?;
            current
                .rev()?
                .ok_or_else(|| CliError::data(format!("document {id} has no revision")))?
        }
    };

    let rev = session.retry(|| db.delete(id, &rev)).await?;
    session.output(&json!({"ok": true, "id": doc_id, "rev": rev}))
}

async fn db(session: &mut Session<'_>) -> CliResult<()> {
    let client = session.client()?;
    let dsn = session.dsn()?;
    let name = dsn
        .db()
        .ok_or_else(|| CliError::usage(format!("no database specified in {dsn}")))?
        .to_string();
    session.retry(|| client.destroy_db(&name)).await?;
    session.ok()
}
