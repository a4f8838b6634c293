//! Shared types for frugal
//!
//! This crate provides the identifiers exchanged between the optimizer core,
//! the ORM collaborator and the host environment: entity types, call-stack
//! frames, request fingerprints and eager-load requests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Entity (model / table) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        EntityType(name.to_string())
    }
}

/// One frame of the host's call stack, nearest frame first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:in `{}'", self.file, self.line, self.function)
    }
}

/// Shape of an inbound unit of work (one request handler invocation)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub handler: String,
    pub action: String,
    pub method: String,
    pub format: String,
}

impl RequestFingerprint {
    pub fn new(
        handler: impl Into<String>,
        action: impl Into<String>,
        method: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            handler: handler.into(),
            action: action.into(),
            method: method.into(),
            format: format.into(),
        }
    }

    /// Canonical signature, e.g. `posts#show GET html`
    pub fn signature(&self) -> String {
        format!(
            "{}#{} {} {}",
            self.handler,
            self.action,
            self.method.to_uppercase(),
            self.format
        )
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// An eager-load request attached to a query.
///
/// A flat list names direct associations; a nested map encodes
/// association-of-association relations (`{comments: [author]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Includes {
    List(Vec<String>),
    Nested(BTreeMap<String, Includes>),
}

impl Includes {
    /// Flat include list from association names
    pub fn list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Includes::List(names.into_iter().map(Into::into).collect())
    }

    /// Single nested relation `{outer: inner}`
    pub fn nested(outer: impl Into<String>, inner: Includes) -> Self {
        let mut map = BTreeMap::new();
        map.insert(outer.into(), inner);
        Includes::Nested(map)
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Includes::Nested(_))
    }

    /// Top-level association names
    pub fn names(&self) -> Vec<&str> {
        match self {
            Includes::List(names) => names.iter().map(String::as_str).collect(),
            Includes::Nested(map) => map.keys().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Includes::List(names) => names.is_empty(),
            Includes::Nested(map) => map.is_empty(),
        }
    }
}

impl From<&str> for Includes {
    fn from(name: &str) -> Self {
        Includes::List(vec![name.to_string()])
    }
}

impl fmt::Display for Includes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Includes::List(names) => {
                let symbols: Vec<String> = names.iter().map(|n| format!(":{}", n)).collect();
                write!(f, "[{}]", symbols.join(", "))
            }
            Includes::Nested(map) => {
                let pairs: Vec<String> = map
                    .iter()
                    .map(|(outer, inner)| format!(":{} => {}", outer, inner))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
        }
    }
}
