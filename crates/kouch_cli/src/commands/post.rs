//! `post` - create documents, trigger compaction, configure clusters and
//! replicate.

use super::replicate::{self, ReplicateArgs};
use super::{DsnArg, Session};
use crate::error::{CliError, CliResult};
use clap::{Args, Subcommand};
use kouch_protocol::{Document, PutOptions};
use serde_json::json;

/// Arguments for the post command.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct PostArgs {
    /// What to post; a document when omitted.
    #[command(subcommand)]
    pub target: Option<PostTarget>,

    #[command(flatten)]
    pub dsn: DsnArg,
}

/// Actions `post` can perform.
#[derive(Debug, Subcommand)]
pub enum PostTarget {
    /// Create a document from --data with a server-assigned id.
    Doc(DsnArg),
    /// Start compaction of a database.
    Compact(DsnArg),
    /// Configure a cluster from --data.
    #[command(alias = "cluster")]
    ClusterSetup(DsnArg),
    /// Replicate between two databases.
    #[command(alias = "rep")]
    Replicate(ReplicateArgs),
}

impl PostArgs {
    /// The positional DSN, wherever it was given.
    pub fn dsn(&self) -> Option<&str> {
        match &self.target {
            Some(PostTarget::Doc(d) | PostTarget::Compact(d) | PostTarget::ClusterSetup(d)) => {
                d.dsn.as_deref()
            }
            Some(PostTarget::Replicate(r)) => r.dsn.dsn.as_deref(),
            None => self.dsn.dsn.as_deref(),
        }
    }
}

/// Execute the post command.
pub async fn execute(args: &PostArgs, session: &mut Session<'_>) -> CliResult<()> {
    match &args.target {
        Some(PostTarget::Doc(_)) | None => doc(session).await,
        Some(PostTarget::Compact(_)) => compact(session).await,
        Some(PostTarget::ClusterSetup(_)) => cluster_setup(session).await,
        Some(PostTarget::Replicate(_)) => replicate::execute(session).await,
    }
}

async fn doc(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    let doc = Document::from_value(session.require_data()?)?;
    let opts = PutOptions::from_options(session.options().clone());
    let (id, rev) = {
        let db = db.as_ref();
        session
            .retry(move || db.create_doc(doc.clone(), opts.clone()))
            .await?
    };
    session.output(&json!({"ok": true, "id": id, "rev": rev}))
}

async fn compact(session: &mut Session<'_>) -> CliResult<()> {
    let db = session.database()?;
    session.retry(|| db.compact()).await?;
    session.ok()
}

async fn cluster_setup(session: &mut Session<'_>) -> CliResult<()> {
    let client = session.client()?;
    let body = session.data()?.ok_or_else(|| {
        CliError::usage("cluster setup requires --data, e.g. '{\"action\":\"finish_cluster\"}'")
    })?;
    let response = {
        let client = client.as_ref();
        session
            .retry(move || client.cluster_setup(body.clone()))
            .await?
    };
    session.output_body(&response)
}
