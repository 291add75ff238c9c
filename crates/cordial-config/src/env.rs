//! Environment variable fallbacks and `${VAR}` reference resolution.
//!
//! Env vars are a fallback, not an override: a mapping is only applied
//! when no config file set the field.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: ValueKind,
}

#[derive(Clone, Copy)]
enum ValueKind {
    Str,
    Bool,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "CORDIAL_TOKEN",
        field_path: "gateway.token",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CORDIAL_API_URL",
        field_path: "gateway.api_url",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CORDIAL_PROXY",
        field_path: "gateway.proxy",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CORDIAL_AUTO_RECONNECT",
        field_path: "gateway.auto_reconnect",
        kind: ValueKind::Bool,
    },
    EnvMapping {
        var_name: "CORDIAL_AUDIO",
        field_path: "gateway.audio",
        kind: ValueKind::Bool,
    },
    EnvMapping {
        var_name: "CORDIAL_LOG_LEVEL",
        field_path: "logging.level",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CORDIAL_LOG_FORMAT",
        field_path: "logging.format",
        kind: ValueKind::Str,
    },
];

/// Apply `CORDIAL_*` fallbacks to fields no config file set.
///
/// Returns the number of variables applied.
pub fn apply_env_fallbacks<S: std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if sources
            .get(mapping.field_path)
            .is_some_and(|layer| layer.is_file())
        {
            continue;
        }
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let Some(value) = coerce(mapping.kind, raw) else {
            debug!(var = mapping.var_name, "ignoring unparseable env var");
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    count
}

fn coerce(kind: ValueKind, raw: &str) -> Option<toml::Value> {
    match kind {
        ValueKind::Str => Some(toml::Value::String(raw.to_owned())),
        ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Some(toml::Value::Boolean(false)),
            _ => None,
        },
    }
}

/// Set a dotted path in the tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments = path.split('.').peekable();
    let mut current = root;

    while let Some(segment) = segments.next() {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}

/// Replace `${VAR}` references in every string value of the tree.
///
/// Unknown variables and malformed references are left untouched.
pub fn resolve_env_references<S: std::hash::BuildHasher>(
    val: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) {
    match val {
        toml::Value::String(s) => *s = resolve_string(s, env_vars),
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        toml::Value::Array(items) => {
            for child in items.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        _ => {},
    }
}

fn resolve_string<S: std::hash::BuildHasher>(
    input: &str,
    env_vars: &HashMap<String, String, S>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start.saturating_add(2)..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match env_vars.get(name) {
            Some(value) if !name.is_empty() => out.push_str(value),
            _ => {
                debug!(var = name, "unresolved env reference in config");
                let _ = write!(out, "${{{name}}}");
            },
        }
        rest = &after[end.saturating_add(1)..];
    }

    out.push_str(rest);
    out
}

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
