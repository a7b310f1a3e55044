//! The `kouchctl` configuration file.
//!
//! ```yaml
//! current-context: local
//! contexts:
//!   local:
//!     url: http://localhost:5984/
//!     user: admin
//!     password: abc123
//! ```

use crate::error::{CliError, CliResult};
use kouch_client::Dsn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config location, relative to `$HOME`.
pub const DEFAULT_CONFIG_PATH: &str = ".kouchctl/config";

/// A named server context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Context {
    /// Server URL, optionally naming a database.
    #[serde(default)]
    pub url: Option<String>,
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KouchConfig {
    /// Name of the active context.
    #[serde(default, rename = "current-context")]
    pub current_context: Option<String>,
    /// Contexts by name.
    #[serde(default)]
    pub contexts: BTreeMap<String, Context>,
}

impl KouchConfig {
    /// Loads the configuration.
    ///
    /// With no explicit path the default file is read if it exists. A
    /// missing explicit file is an I/O error.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (expand_home(p), true),
            None => match home_dir() {
                Some(home) => (home.join(DEFAULT_CONFIG_PATH), false),
                None => return Ok(Self::default()),
            },
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file");
                return Ok(Self::default());
            }
            Err(e) => return Err(CliError::Io(format!("{}: {e}", path.display()))),
        };
        debug!(path = %path.display(), "loaded config file");
        Self::parse(&text)
    }

    /// Parses YAML configuration text.
    pub fn parse(text: &str) -> CliResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| CliError::usage(format!("invalid config file: {e}")))?;
        if let Some(name) = &config.current_context {
            if !config.contexts.contains_key(name) {
                return Err(CliError::usage(format!("context \"{name}\" not found")));
            }
        }
        Ok(config)
    }

    /// The active context, if one is selected.
    pub fn context(&self) -> Option<&Context> {
        self.current_context
            .as_ref()
            .and_then(|name| self.contexts.get(name))
    }

    /// Resolves the DSN for a command.
    ///
    /// `env_url` replaces the context URL. A positional argument containing
    /// `://` is used as is; any other positional argument is a path relative
    /// to the configured server. Context credentials apply only to the
    /// context's own server.
    pub fn resolve(&self, positional: Option<&str>, env_url: Option<&str>) -> CliResult<Option<Dsn>> {
        let context = self.context();
        let base = env_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| context.and_then(|c| c.url.as_deref()));

        let url = match (positional, base) {
            (Some(p), _) if p.contains("://") => p.to_string(),
            (Some(p), Some(base)) => {
                format!("{}/{}", base.trim_end_matches('/'), p.trim_start_matches('/'))
            }
            (Some(p), None) => {
                return Err(CliError::usage(format!(
                    "no server configured for relative path \"{p}\""
                )))
            }
            (None, Some(base)) => base.to_string(),
            (None, None) => return Ok(None),
        };
        let mut dsn = Dsn::parse(&url)?;

        if let Some(ctx) = context {
            let same_server = ctx
                .url
                .as_deref()
                .and_then(|u| Dsn::parse(u).ok())
                .is_some_and(|c| c.server() == dsn.server());
            if same_server && dsn.user().is_none() {
                dsn = dsn.with_credentials(ctx.user.clone(), ctx.password.clone());
            }
        }
        Ok(Some(dsn))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kouch_client::exit;
    use std::io::Write;

    const CONFIG: &str = r#"
current-context: local
contexts:
  local:
    url: http://localhost:5984/
    user: admin
    password: abc123
  remote:
    url: https://couch.example.com/
"#;

    #[test]
    fn parse_contexts() {
        let config = KouchConfig::parse(CONFIG).unwrap();
        assert_eq!(config.current_context.as_deref(), Some("local"));
        assert_eq!(config.contexts.len(), 2);
        assert_eq!(config.context().unwrap().user.as_deref(), Some("admin"));
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(KouchConfig::parse("  \n").unwrap(), KouchConfig::default());
    }

    #[test]
    fn unknown_current_context() {
        let err = KouchConfig::parse("current-context: nope\n").unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn invalid_yaml_is_usage() {
        let err = KouchConfig::parse("contexts: [1, 2").unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
    }

    #[test]
    fn load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = KouchConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.current_context.as_deref(), Some("local"));
    }

    #[test]
    fn missing_explicit_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = KouchConfig::load(Some(&dir.path().join("absent"))).unwrap_err();
        assert_eq!(err.exit_code(), exit::IO);
    }

    #[test]
    fn resolve_context_with_credentials() {
        let config = KouchConfig::parse(CONFIG).unwrap();
        let dsn = config.resolve(None, None).unwrap().unwrap();
        assert_eq!(dsn.server_base(), "http://localhost:5984");
        assert_eq!(dsn.user(), Some("admin"));
        assert_eq!(dsn.password(), Some("abc123"));
    }

    #[test]
    fn resolve_relative_path() {
        let config = KouchConfig::parse(CONFIG).unwrap();
        let dsn = config.resolve(Some("foo/bar"), None).unwrap().unwrap();
        assert_eq!(dsn.db(), Some("foo"));
        assert_eq!(dsn.doc_id(), Some("bar"));
        assert_eq!(dsn.user(), Some("admin"));
    }

    #[test]
    fn positional_url_overrides() {
        let config = KouchConfig::parse(CONFIG).unwrap();
        let dsn = config
            .resolve(Some("couchs://other.example.com/db"), None)
            .unwrap()
            .unwrap();
        assert_eq!(dsn.server_base(), "https://other.example.com");
        assert_eq!(dsn.user(), None);
    }

    #[test]
    fn env_url_overrides_context() {
        let config = KouchConfig::parse(CONFIG).unwrap();
        let dsn = config
            .resolve(Some("db"), Some("http://127.0.0.1:1234"))
            .unwrap()
            .unwrap();
        assert_eq!(dsn.server_base(), "http://127.0.0.1:1234");
        assert_eq!(dsn.db(), Some("db"));
        assert_eq!(dsn.user(), None);
    }

    #[test]
    fn nothing_configured() {
        let config = KouchConfig::default();
        assert_eq!(config.resolve(None, None).unwrap(), None);
        let err = config.resolve(Some("db"), None).unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
    }

    #[test]
    fn unsupported_scheme() {
        let err = KouchConfig::default()
            .resolve(Some("ftp://host/db"), None)
            .unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
    }
}
