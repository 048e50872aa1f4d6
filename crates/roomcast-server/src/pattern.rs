//! Route pattern compilation and matching.
//!
//! Syntax follows the HTTP router: `/static`, `/:param`, trailing optional
//! `/:param?`, and a trailing `*` wildcard that captures the remainder of the
//! path under the `*` key. Empty segments (double or trailing slashes) are
//! ignored on both sides.

use std::collections::BTreeMap;

use crate::router::RouterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Optional(String),
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

/// Named parameters extracted from a matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn insert(&mut self, name: &str, value: String) {
        self.0.insert(name.to_string(), value);
    }
}

impl RoutePattern {
    pub fn parse(source: &str) -> Result<Self, RouterError> {
        let invalid = |reason: &str| RouterError::InvalidPattern {
            pattern: source.to_string(),
            reason: reason.to_string(),
        };

        let raw: Vec<&str> = source.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut seen_optional = false;

        for (idx, part) in raw.iter().enumerate() {
            let segment = if *part == "*" {
                if idx != raw.len() - 1 {
                    return Err(invalid("wildcard must be the last segment"));
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                let (name, optional) = match name.strip_suffix('?') {
                    Some(n) => (n, true),
                    None => (name, false),
                };
                if name.is_empty() {
                    return Err(invalid("parameter name is empty"));
                }
                if segments.iter().any(|s| matches!(s, Segment::Param(n) | Segment::Optional(n) if n == name)) {
                    return Err(invalid("duplicate parameter name"));
                }
                if optional {
                    seen_optional = true;
                    Segment::Optional(name.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            } else {
                Segment::Static(part.to_string())
            };

            if seen_optional && matches!(segment, Segment::Static(_) | Segment::Param(_)) {
                return Err(invalid("optional parameters must be trailing"));
            }
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a concrete path (no query string). Returns extracted params.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = RouteParams::default();
        let mut idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::Static(expected) => {
                    if parts.get(idx) != Some(&expected.as_str()) {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Param(name) => {
                    let value = parts.get(idx)?;
                    params.insert(name, (*value).to_string());
                    idx += 1;
                }
                Segment::Optional(name) => {
                    if let Some(value) = parts.get(idx) {
                        params.insert(name, (*value).to_string());
                        idx += 1;
                    }
                }
                Segment::Wildcard => {
                    params.insert("*", parts[idx..].join("/"));
                    idx = parts.len();
                }
            }
        }

        (idx == parts.len()).then_some(params)
    }
}

