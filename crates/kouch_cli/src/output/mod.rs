//! Output formatters.

mod template;

pub use template::Template;

use crate::error::{CliError, CliResult};
use kouch_client::RawJson;
use serde_json::Value;
use std::io::Write;

/// Renders command results to the output sink.
#[derive(Debug, Clone, Default)]
pub enum Formatter {
    /// Pretty-printed JSON with a 2-space indent.
    #[default]
    Json,
    /// Response bodies byte for byte; locally built results as compact JSON.
    Raw,
    /// YAML.
    Yaml,
    /// A template with dotted field access.
    GoTemplate(Template),
}

impl Formatter {
    /// Selects a formatter by name.
    ///
    /// `go-template` takes its template either inline
    /// (`go-template={{.field}}`) or from `template`.
    pub fn new(name: &str, template: Option<&str>) -> CliResult<Self> {
        let (name, inline) = match name.split_once('=') {
            Some((name, tpl)) => (name, Some(tpl)),
            None => (name, None),
        };
        match name {
            "json" => Ok(Formatter::Json),
            "raw" => Ok(Formatter::Raw),
            "yaml" => Ok(Formatter::Yaml),
            "go-template" => {
                let source = inline.or(template).ok_or_else(|| {
                    CliError::usage("go-template format requires a template")
                })?;
                Ok(Formatter::GoTemplate(Template::parse(source)?))
            }
            other => Err(CliError::usage(format!(
                "unrecognized output format: {other}"
            ))),
        }
    }

    /// Writes a server response body.
    pub fn output_body(&self, out: &mut dyn Write, body: &RawJson) -> CliResult<()> {
        match self {
            Formatter::Raw => {
                out.write_all(body.bytes())?;
                out.flush()?;
                Ok(())
            }
            _ => self.output(out, body.value()),
        }
    }

    /// Writes one value.
    pub fn output(&self, out: &mut dyn Write, value: &Value) -> CliResult<()> {
        let rendered = match self {
            Formatter::Json => {
                let mut s = serde_json::to_string_pretty(value)?;
                s.push('\n');
                s
            }
            Formatter::Raw => {
                let mut s = serde_json::to_string(value)?;
                s.push('\n');
                s
            }
            Formatter::Yaml => serde_yaml::to_string(value)
                .map_err(|e| CliError::data(format!("yaml encoding failed: {e}")))?,
            Formatter::GoTemplate(tpl) => tpl.render(value),
        };
        out.write_all(rendered.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kouch_client::exit;
    use serde_json::json;

    fn render(f: &Formatter, value: &Value) -> String {
        let mut out = Vec::new();
        f.output(&mut out, value).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn json_is_pretty() {
        let out = render(&Formatter::new("json", None).unwrap(), &json!({"ok": true}));
        assert_eq!(out, "{\n  \"ok\": true\n}\n");
    }

    #[test]
    fn raw_is_compact() {
        let out = render(&Formatter::new("raw", None).unwrap(), &json!({"a": [1, 2]}));
        assert_eq!(out, "{\"a\":[1,2]}\n");
    }

    #[test]
    fn raw_body_is_verbatim() {
        let body = "{\"couchdb\":\"Welcome\",\"version\":\"3.3.3\",\"features\":[\"a\"]}\n";
        let raw = RawJson::from_bytes(body).unwrap();
        let mut out = Vec::new();
        Formatter::Raw.output_body(&mut out, &raw).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), body);
    }

    #[test]
    fn body_through_other_formats() {
        let raw = RawJson::from_bytes("{\"b\": 1, \"a\": 2}").unwrap();
        let mut out = Vec::new();
        Formatter::Json.output_body(&mut out, &raw).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"a\": 2,\n  \"b\": 1\n}\n");
    }

    #[test]
    fn yaml() {
        let out = render(&Formatter::new("yaml", None).unwrap(), &json!({"ok": true}));
        assert_eq!(out, "ok: true\n");
    }

    #[test]
    fn inline_template() {
        let f = Formatter::new("go-template={{.version}}", None).unwrap();
        assert_eq!(render(&f, &json!({"version": "3.3.3"})), "3.3.3");
    }

    #[test]
    fn template_flag() {
        let f = Formatter::new("go-template", Some("id={{._id}}")).unwrap();
        assert_eq!(render(&f, &json!({"_id": "foo"})), "id=foo");
    }

    #[test]
    fn template_required() {
        let err = Formatter::new("go-template", None).unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
    }

    #[test]
    fn unknown_format() {
        let err = Formatter::new("xml", None).unwrap_err();
        assert_eq!(err.exit_code(), exit::USAGE);
        assert_eq!(err.to_string(), "unrecognized output format: xml");
    }
}
