//! `post replicate` - one-shot replication between two databases.
//!
//! `source` and `target` come from `-O` options. Each is a URL, a database
//! name on the session's server, or an object
//! `{"url": ..., "user": ..., "password": ...}`. Either may be omitted when
//! the DSN supplies it.

use super::{DsnArg, Session};
use crate::error::{CliError, CliResult};
use clap::Args;
use kouch_client::{Database, Dsn};
use kouch_replicate::{ReplicateOptions, Replicator};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Arguments for the replicate command.
#[derive(Debug, Args)]
pub struct ReplicateArgs {
    #[command(flatten)]
    pub dsn: DsnArg,
}

/// Execute the replicate command.
pub async fn execute(session: &mut Session<'_>) -> CliResult<()> {
    let options = session.options();
    let source = endpoint(options.get("source"), session.dsn_opt(), "source")?;
    let target = endpoint(options.get("target"), session.dsn_opt(), "target")?;
    let (source, target) = match (source, target) {
        (None, None) => return Err(CliError::usage("explicit source or target required")),
        (Some(source), Some(target)) => (source, target),
        (Some(source), None) => (source, session.dsn()?.clone()),
        (None, Some(target)) => (session.dsn()?.clone(), target),
    };

    let mut opts = ReplicateOptions::from_options(options.clone())?;
    if !session.doc_ids().is_empty() {
        opts = opts.with_doc_ids(session.doc_ids().iter().cloned());
        opts.validate()?;
    }
    debug!(source = %source, target = %target, "will replicate");

    let replicator = Replicator::new(open(session, &source)?, open(session, &target)?)
        .with_options(opts)
        .with_retry(session.policy().clone());
    let result = replicator.run(session.cancel()).await?;
    session.output(&serde_json::to_value(&result)?)
}

/// Resolves one replication endpoint from its `-O` value.
fn endpoint(value: Option<&Value>, session: Option<&Dsn>, role: &str) -> CliResult<Option<Dsn>> {
    let dsn = match value {
        None => return Ok(None),
        Some(Value::String(s)) if s.is_empty() => return Ok(None),
        Some(Value::String(s)) if s.contains("://") => Dsn::parse(s)?,
        Some(Value::String(s)) => {
            let base = session.ok_or_else(|| {
                CliError::usage(format!("{role} \"{s}\" requires a server URL"))
            })?;
            base.with_db(s.as_str())
        }
        Some(Value::Object(obj)) => {
            let url = obj.get("url").and_then(Value::as_str).ok_or_else(|| {
                CliError::usage(format!("{role} object requires a \"url\" string"))
            })?;
            let field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
            Dsn::parse(url)?.with_credentials(field("user"), field("password"))
        }
        Some(other) => {
            return Err(CliError::usage(format!(
                "{role} must be a URL or an object, got {other}"
            )))
        }
    };
    // Credentials carry over to endpoints on the session's server.
    let dsn = match session {
        Some(s) if dsn.user().is_none() && s.server() == dsn.server() => dsn.with_credentials(
            s.user().map(str::to_string),
            s.password().map(str::to_string),
        ),
        _ => dsn,
    };
    Ok(Some(dsn))
}

fn open(session: &Session<'_>, dsn: &Dsn) -> CliResult<Arc<dyn Database>> {
    let db = dsn
        .db()
        .ok_or_else(|| CliError::usage(format!("no database specified in {dsn}")))?;
    Ok(kouch_client::connect(dsn, session.http())?.db(db)?)
}
