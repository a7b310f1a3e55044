//! CLI command implementations.
//!
//! Every verb runs against a [`Session`]: the resolved DSN, the option bag,
//! the request body, the retry policy and the output sink.

pub mod delete;
pub mod get;
pub mod ping;
pub mod post;
pub mod put;
pub mod replicate;

use crate::config::KouchConfig;
use crate::error::{CliError, CliResult};
use crate::output::Formatter;
use crate::GlobalArgs;
use clap::Args;
use kouch_client::{ClientResult, Database, Dsn, HttpConfig, RawJson};
use kouch_protocol::Options;
use kouch_replicate::{parse_duration, CancellationToken, RetryPolicy};
use serde_json::{json, Value};
use std::future::Future;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// A positional DSN for a verb target.
#[derive(Debug, Clone, Default, Args)]
pub struct DsnArg {
    /// Server, database or document URL, or a path relative to the
    /// configured server.
    pub dsn: Option<String>,
}

/// State shared by every command.
pub struct Session<'a> {
    dsn: Option<Dsn>,
    formatter: Formatter,
    policy: RetryPolicy,
    http: HttpConfig,
    options: Options,
    data: Option<String>,
    doc_ids: Vec<String>,
    cancel: CancellationToken,
    out: &'a mut dyn Write,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dsn", &self.dsn.as_ref().map(ToString::to_string))
            .field("formatter", &self.formatter)
            .field("policy", &self.policy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    /// Builds a session from the global flags and the verb's positional DSN.
    pub fn new(
        global: &GlobalArgs,
        config: &KouchConfig,
        positional: Option<&str>,
        cancel: CancellationToken,
        out: &'a mut dyn Write,
    ) -> CliResult<Self> {
        let dsn = config.resolve(positional, global.url.as_deref())?;
        let formatter = Formatter::new(&global.format, global.template.as_deref())?;

        let mut policy = RetryPolicy::new(global.retry);
        if let Some(delay) = parse_flag(&global.retry_delay)? {
            policy = policy.with_delay(delay);
        }
        if let Some(deadline) = parse_flag(&global.retry_timeout)? {
            policy = policy.with_deadline(deadline);
        }

        let mut http = HttpConfig::new();
        if let Some(timeout) = parse_flag(&global.request_timeout)? {
            http = http.with_request_timeout(timeout);
        }
        if let Some(timeout) = parse_flag(&global.connect_timeout)? {
            http = http.with_connect_timeout(timeout);
        }

        let options = parse_options(&global.options)?;
        debug!(dsn = ?dsn.as_ref().map(ToString::to_string), ?policy, "session");

        Ok(Self {
            dsn,
            formatter,
            policy,
            http,
            options,
            data: global.data.clone(),
            doc_ids: global.doc_ids.clone(),
            cancel,
            out,
        })
    }

    /// The resolved DSN, or a usage error.
    pub fn dsn(&self) -> CliResult<&Dsn> {
        self.dsn
            .as_ref()
            .ok_or_else(|| CliError::usage("server URL required"))
    }

    /// The resolved DSN, if any.
    pub fn dsn_opt(&self) -> Option<&Dsn> {
        self.dsn.as_ref()
    }

    /// HTTP client settings.
    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    /// The retry policy from the `--retry*` flags.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cancellation token for the command.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Connects to the server.
    pub fn client(&self) -> CliResult<Arc<dyn kouch_client::Client>> {
        Ok(kouch_client::connect(self.dsn()?, &self.http)?)
    }

    /// Opens the database named by the DSN.
    pub fn database(&self) -> CliResult<Arc<dyn Database>> {
        let dsn = self.dsn()?;
        let db = dsn
            .db()
            .ok_or_else(|| CliError::usage(format!("no database specified in {dsn}")))?;
        Ok(self.client()?.db(db)?)
    }

    /// The document id named by the DSN.
    pub fn doc_id(&self) -> CliResult<String> {
        let dsn = self.dsn()?;
        dsn.doc_id()
            .map(str::to_string)
            .ok_or_else(|| CliError::usage(format!("no document specified in {dsn}")))
    }

    /// The `-O` option bag.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// `--doc-id` values.
    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    /// The `--data` body, if any.
    ///
    /// `@path` reads a file and `@-` reads stdin.
    pub fn data(&self) -> CliResult<Option<Value>> {
        let Some(data) = self.data.as_deref() else {
            return Ok(None);
        };
        let text = match data.strip_prefix('@') {
            Some("-") => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .map_err(|e| CliError::Io(format!("stdin: {e}")))?;
                buf
            }
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| CliError::Io(format!("{path}: {e}")))?,
            None => data.to_string(),
        };
        let value = serde_json::from_str(&text)
            .map_err(|e| CliError::data(format!("invalid JSON data: {e}")))?;
        Ok(Some(value))
    }

    /// The `--data` body; a usage error when absent.
    pub fn require_data(&self) -> CliResult<Value> {
        self.data()?
            .ok_or_else(|| CliError::usage("no data provided"))
    }

    /// Runs a client call under the retry policy.
    pub async fn retry<T, F, Fut>(&self, op: F) -> CliResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        Ok(kouch_replicate::retry(&self.policy, &self.cancel, op).await?)
    }

    /// Writes a result through the formatter.
    pub fn output(&mut self, value: &Value) -> CliResult<()> {
        self.formatter.output(self.out, value)
    }

    /// Writes a server response body through the formatter.
    pub fn output_body(&mut self, body: &RawJson) -> CliResult<()> {
        self.formatter.output_body(self.out, body)
    }

    /// Writes `{"ok": true}`.
    pub fn ok(&mut self) -> CliResult<()> {
        self.output(&json!({"ok": true}))
    }
}

fn parse_flag(value: &Option<String>) -> CliResult<Option<std::time::Duration>> {
    match value {
        Some(v) => Ok(parse_duration(v)?),
        None => Ok(None),
    }
}

/// Parses `-O key=value` entries. Values that parse as JSON are stored
/// decoded; anything else is kept as a string.
pub fn parse_options(entries: &[String]) -> CliResult<Options> {
    let mut options = Options::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::usage(format!("invalid option \"{entry}\": expected KEY=VALUE")))?;
        if key.is_empty() {
            return Err(CliError::usage(format!("invalid option \"{entry}\": empty key")));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key, value);
    }
    Ok(options)
}
