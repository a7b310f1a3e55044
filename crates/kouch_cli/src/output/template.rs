//! A small subset of Go's `text/template`: literal text plus `{{.}}` and
//! `{{.a.b}}` field actions.

use crate::error::{CliError, CliResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    /// Field path; empty for `{{.}}`.
    Field(Vec<String>),
}

/// A parsed output template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Parses a template.
    pub fn parse(source: &str) -> CliResult<Self> {
        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| CliError::usage(format!("template: unclosed action in {source:?}")))?;
            parts.push(Part::Field(parse_action(after[..end].trim())?));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }
        Ok(Self { parts })
    }

    /// Renders the template against a value.
    ///
    /// Strings print without quotes; other values print as compact JSON. A
    /// missing field prints `<no value>`.
    pub fn render(&self, value: &Value) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Field(path) => {
                    match path.iter().try_fold(value, |v, key| v.get(key.as_str())) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(Value::Null) | None => out.push_str("<no value>"),
                        Some(other) => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        out
    }
}

fn parse_action(action: &str) -> CliResult<Vec<String>> {
    if action == "." {
        return Ok(Vec::new());
    }
    let path = action
        .strip_prefix('.')
        .ok_or_else(|| CliError::usage(format!("template: unsupported action {{{{{action}}}}}")))?;
    let fields: Vec<String> = path.split('.').map(str::to_string).collect();
    if fields
        .iter()
        .any(|f| f.is_empty() || f.chars().any(char::is_whitespace))
    {
        return Err(CliError::usage(format!(
            "template: unsupported action {{{{{action}}}}}"
        )));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_fields() {
        let tpl = Template::parse("{{.vendor.name}} {{ .version }}\n").unwrap();
        let value = json!({"version": "3.3.3", "vendor": {"name": "The Apache Software Foundation"}});
        assert_eq!(tpl.render(&value), "The Apache Software Foundation 3.3.3\n");
    }

    #[test]
    fn whole_value() {
        let tpl = Template::parse("{{.}}").unwrap();
        assert_eq!(tpl.render(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(tpl.render(&json!("plain")), "plain");
    }

    #[test]
    fn missing_field() {
        let tpl = Template::parse("[{{.nope}}]").unwrap();
        assert_eq!(tpl.render(&json!({})), "[<no value>]");
    }

    #[test]
    fn non_string_values() {
        let tpl = Template::parse("{{.n}} {{.ok}} {{.list}}").unwrap();
        assert_eq!(
            tpl.render(&json!({"n": 5, "ok": true, "list": [1, "a"]})),
            r#"5 true [1,"a"]"#
        );
    }

    #[test]
    fn rejects_bad_actions() {
        assert!(Template::parse("{{.a").is_err());
        assert!(Template::parse("{{range .}}").is_err());
        assert!(Template::parse("{{.a..b}}").is_err());
    }
}
