// SPDX-License-Identifier: MIT OR Apache-2.0
//! REST ↔ gRPC translation (§4.8.4): resolves a protobuf `google.api.http`
//! binding's path template and query string into field assignments, and
//! decodes a JSON body into those same field assignments.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::TranslationError;

/// A `google.api.http`-style path template, e.g. `/v1/jobs/{job_id}/status`.
/// Template variables may use dotted names (`{parent.tenant_id}`) to address
/// nested message fields.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable(String),
}

impl PathTemplate {
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let segments = template
            .trim_matches('/')
            .split('/')
            .map(|part| {
                if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Segment::Variable(name.to_string())
                } else {
                    Segment::Literal(part.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Match `path` against the template, returning dotted-field → value
    /// assignments for each captured variable, or `None` if the segment
    /// count or literal segments don't line up.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut assignments = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Variable(name) => {
                    assignments.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(assignments)
    }
}

/// Parse a URL query string into dotted-field → value assignments.
#[must_use]
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((urldecode(key), urldecode(value)))
        })
        .collect()
}

fn urldecode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
                out.push('%');
            }
            other => out.push(other),
        }
    }
    out
}

/// Merge path-derived, query-derived, and JSON-body-derived field
/// assignments into one dotted-field → JSON-value map, ready to drive a
/// message builder. Enum-valued fields are left as strings; callers resolve
/// case-insensitive enum names against the target message's descriptor.
pub fn merge_request(
    path_fields: &BTreeMap<String, String>,
    query_fields: &BTreeMap<String, String>,
    body: Option<&[u8]>,
) -> Result<BTreeMap<String, Json>, TranslationError> {
    let mut merged: BTreeMap<String, Json> = BTreeMap::new();

    for (field, value) in path_fields.iter().chain(query_fields.iter()) {
        merged.insert(field.clone(), Json::String(value.clone()));
    }

    if let Some(bytes) = body {
        if !bytes.is_empty() {
            let parsed: Json = serde_json::from_slice(bytes)?;
            match parsed {
                Json::Object(map) => {
                    for (k, v) in map {
                        merged.insert(k, v);
                    }
                }
                other => {
                    merged.insert("__body".to_string(), other);
                }
            }
        }
    }

    Ok(merged)
}

/// Resolve a case-insensitive enum value name against a set of accepted
/// variant names, per §4.8.4's "Enum values accept case-insensitive name
/// match."
#[must_use]
pub fn resolve_enum_name<'a>(value: &str, accepted: &[&'a str]) -> Option<&'a str> {
    accepted.iter().copied().find(|name| name.eq_ignore_ascii_case(value))
}
