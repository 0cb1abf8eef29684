//! `{{name}}` placeholder handling for step task text.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;

use crate::core::recipe::VariableSpec;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

/// A piece of task text: literal text or a variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Variable(String),
}

/// Split `text` into literal and placeholder segments, in order.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(Segment::Text(text[last..whole.start()].to_string()));
        }
        segments.push(Segment::Variable(caps[1].to_string()));
        last = whole.end();
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    segments
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitute every placeholder from `values`. Unknown names are an error.
pub fn interpolate(text: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for segment in parse_segments(text) {
        match segment {
            Segment::Text(t) => out.push_str(&t),
            Segment::Variable(name) => {
                let value = values
                    .get(&name)
                    .ok_or_else(|| anyhow!("no value for variable '{name}'"))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Resolve declared variables: supplied value, then `env`, then the declared default.
///
/// Returns the resolved map, or the sorted list of names that have no value.
pub fn resolve_variables<F>(
    specs: &BTreeMap<String, VariableSpec>,
    supplied: &BTreeMap<String, String>,
    env: F,
) -> std::result::Result<BTreeMap<String, String>, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = BTreeMap::new();
    let mut missing = Vec::new();
    for (name, spec) in specs {
        let value = supplied
            .get(name)
            .cloned()
            .or_else(|| env(name))
            .or_else(|| spec.default_value().map(str::to_string));
        match value {
            Some(v) => {
                resolved.insert(name.clone(), v);
            }
            None => missing.push(name.clone()),
        }
    }
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(missing)
    }
}
