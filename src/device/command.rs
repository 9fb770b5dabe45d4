//! Declarative capture command lines
//!
//! A template is a list of commands. One command is spawned directly; several
//! are joined with pipes and run through `sh -c`. Arguments are:
//!
//! - literal strings, with `{key}` placeholders substituted,
//! - `option` + `key` pairs, emitted only when the key has a value,
//! - boolean `flag`s, emitted only when the key is true.

use crate::config::Properties;
use crate::error::{Result, RxError};
use crate::process::{shell_quote, CommandLine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    Literal(String),
    Option { option: String, key: String },
    Flag { flag: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, literal: impl Into<String>) -> Self {
        self.args.push(ArgSpec::Literal(literal.into()));
        self
    }

    pub fn option(mut self, option: impl Into<String>, key: impl Into<String>) -> Self {
        self.args.push(ArgSpec::Option {
            option: option.into(),
            key: key.into(),
        });
        self
    }

    pub fn flag(mut self, flag: impl Into<String>, key: impl Into<String>) -> Self {
        self.args.push(ArgSpec::Flag {
            flag: flag.into(),
            key: key.into(),
        });
        self
    }

    fn render(&self, values: &Properties) -> Result<Vec<String>> {
        let mut words = vec![substitute(&self.program, values)?];
        for arg in &self.args {
            match arg {
                ArgSpec::Literal(text) => words.push(substitute(text, values)?),
                ArgSpec::Option { option, key } => {
                    if let Some(value) = values.get(key).and_then(render_value) {
                        words.push(option.clone());
                        words.push(value);
                    }
                }
                ArgSpec::Flag { flag, key } => {
                    if values.get(key).is_some_and(is_truthy) {
                        words.push(flag.clone());
                    }
                }
            }
        }
        Ok(words)
    }

    fn collect_keys(&self, keys: &mut BTreeSet<String>) {
        placeholders(&self.program, keys);
        for arg in &self.args {
            match arg {
                ArgSpec::Literal(text) => placeholders(text, keys),
                ArgSpec::Option { key, .. } | ArgSpec::Flag { key, .. } => {
                    keys.insert(key.clone());
                }
            }
        }
    }
}

/// Capture command: one or more piped commands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate {
    commands: Vec<CommandSpec>,
}

impl CommandTemplate {
    pub fn single(command: CommandSpec) -> Self {
        Self {
            commands: vec![command],
        }
    }

    /// Append a command fed by the previous one's stdout
    pub fn pipe(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every property key the rendered command line depends on
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for command in &self.commands {
            command.collect_keys(&mut keys);
        }
        keys
    }

    pub fn render(&self, values: &Properties) -> Result<CommandLine> {
        match self.commands.as_slice() {
            [] => Err(RxError::Config("Capture command is empty".to_string())),
            [single] => {
                let mut words = single.render(values)?.into_iter();
                let program = words.next().unwrap_or_default();
                Ok(CommandLine::new(program).args(words))
            }
            many => {
                let mut parts = Vec::with_capacity(many.len());
                for command in many {
                    let words = command.render(values)?;
                    let quoted: Vec<String> = words.iter().map(|w| shell_quote(w).into_owned()).collect();
                    parts.push(quoted.join(" "));
                }
                Ok(CommandLine::shell(parts.join(" | ")))
            }
        }
    }
}

/// Render a property for the command line. Floats with no fractional part print as integers.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn placeholders(text: &str, keys: &mut BTreeSet<String>) {
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        keys.insert(rest[start + 1..start + 1 + len].to_string());
        rest = &rest[start + len + 2..];
    }
}

fn substitute(text: &str, values: &Properties) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let key = &rest[start + 1..start + 1 + len];
        let value = values
            .get(key)
            .and_then(render_value)
            .ok_or_else(|| RxError::Config(format!("No value for placeholder {{{}}}", key)))?;
        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> Properties {
        Properties::from([
            ("tuner_freq".to_string(), json!(145_000_100u64)),
            ("samp_rate".to_string(), json!(2.4e6)),
            ("port".to_string(), json!(4950)),
            ("bias_tee".to_string(), json!(true)),
            ("direct".to_string(), json!(false)),
            ("device".to_string(), json!("serial=0001")),
        ])
    }

    #[test]
    fn test_single_command() {
        let template = CommandTemplate::single(
            CommandSpec::new("rtl_sdr")
                .option("-f", "tuner_freq")
                .option("-s", "samp_rate")
                .option("-g", "rf_gain")
                .flag("-T", "bias_tee")
                .flag("-D", "direct")
                .arg("-"),
        );
        let command = template.render(&values()).unwrap();
        assert_eq!(command.program(), "rtl_sdr");
        assert_eq!(
            command.arguments(),
            ["-f", "145000100", "-s", "2400000", "-T", "-"]
        );
    }

    #[test]
    fn test_piped_command() {
        let template = CommandTemplate::single(CommandSpec::new("soapy_capture").option("-d", "device"))
            .pipe(CommandSpec::new("nmux").arg("--port").arg("{port}"));
        let command = template.render(&values()).unwrap();
        assert_eq!(command.program(), "sh");
        assert_eq!(
            command.arguments(),
            ["-c", "soapy_capture -d serial=0001 | nmux --port 4950"]
        );
    }

    #[test]
    fn test_missing_placeholder() {
        let template = CommandTemplate::single(CommandSpec::new("tool").arg("--x={missing}"));
        assert!(template.render(&values()).is_err());
        assert!(CommandTemplate::default().render(&values()).is_err());
    }

    #[test]
    fn test_keys() {
        let template = CommandTemplate::single(
            CommandSpec::new("tool")
                .option("-f", "tuner_freq")
                .flag("-T", "bias_tee")
                .arg("{port}:{samp_rate}"),
        );
        let keys: Vec<String> = template.keys().into_iter().collect();
        assert_eq!(keys, ["bias_tee", "port", "samp_rate", "tuner_freq"]);
    }

    #[test]
    fn test_deserialize_mixed_args() {
        let spec: CommandSpec = serde_json::from_value(json!({
            "program": "rtl_sdr",
            "args": ["-", { "option": "-f", "key": "tuner_freq" }, { "flag": "-T", "key": "bias_tee" }]
        }))
        .unwrap();
        assert_eq!(spec.args.len(), 3);
        assert!(matches!(spec.args[2], ArgSpec::Flag { .. }));
    }
}
