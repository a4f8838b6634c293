//! Request-scoped usage aggregation
//!
//! A `Resource` collects the columns and associations touched per entity
//! while one kind of request runs. Its identity is the request signature:
//! two resources with the same signature describe the same logical
//! resource and are merged.

use frugal_types::{EntityType, RequestFingerprint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

type UsageMap = BTreeMap<EntityType, BTreeSet<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Usage {
    columns: UsageMap,
    associations: UsageMap,
}

/// Flat, serializable form of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub signature: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<RequestFingerprint>,

    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub associations: BTreeMap<String, Vec<String>>,
}

/// Per-entity column and association usage for one request shape
pub struct Resource {
    signature: String,
    fingerprint: Option<RequestFingerprint>,
    usage: RwLock<Usage>,
}

impl Resource {
    pub fn new(fingerprint: RequestFingerprint) -> Self {
        Resource {
            signature: fingerprint.signature(),
            fingerprint: Some(fingerprint),
            usage: RwLock::new(Usage::default()),
        }
    }

    /// A resource identified only by its signature
    pub fn with_signature(signature: impl Into<String>) -> Self {
        Resource {
            signature: signature.into(),
            fingerprint: None,
            usage: RwLock::new(Usage::default()),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn fingerprint(&self) -> Option<&RequestFingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn add_column(&self, entity: &EntityType, column: &str) {
        self.usage
            .write()
            .columns
            .entry(entity.clone())
            .or_default()
            .insert(column.to_string());
    }

    pub fn add_columns<'a, I>(&self, entity: &EntityType, columns: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut usage = self.usage.write();
        let set = usage.columns.entry(entity.clone()).or_default();
        set.extend(columns.into_iter().cloned());
    }

    pub fn add_association(&self, entity: &EntityType, association: &str) {
        self.usage
            .write()
            .associations
            .entry(entity.clone())
            .or_default()
            .insert(association.to_string());
    }

    pub fn columns(&self, entity: &EntityType) -> BTreeSet<String> {
        self.usage
            .read()
            .columns
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn associations(&self, entity: &EntityType) -> BTreeSet<String> {
        self.usage
            .read()
            .associations
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn entities(&self) -> BTreeSet<EntityType> {
        let usage = self.usage.read();
        usage
            .columns
            .keys()
            .chain(usage.associations.keys())
            .cloned()
            .collect()
    }

    /// Whether any usage has been recorded
    pub fn any(&self) -> bool {
        let usage = self.usage.read();
        usage.columns.values().any(|s| !s.is_empty())
            || usage.associations.values().any(|s| !s.is_empty())
    }

    /// Fold another resource's usage into this one
    pub fn merge(&self, other: &Resource) {
        let incoming = other.usage.read().clone();
        self.absorb(incoming);
    }

    pub(crate) fn merge_snapshot(&self, snapshot: &ResourceSnapshot) {
        self.absorb(Usage {
            columns: expand(&snapshot.columns),
            associations: expand(&snapshot.associations),
        });
    }

    fn absorb(&self, incoming: Usage) {
        let mut usage = self.usage.write();
        for (entity, columns) in incoming.columns {
            usage.columns.entry(entity).or_default().extend(columns);
        }
        for (entity, associations) in incoming.associations {
            usage
                .associations
                .entry(entity)
                .or_default()
                .extend(associations);
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let usage = self.usage.read();
        ResourceSnapshot {
            signature: self.signature.clone(),
            fingerprint: self.fingerprint.clone(),
            columns: flatten(&usage.columns),
            associations: flatten(&usage.associations),
        }
    }

    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> Self {
        let resource = Resource {
            signature: snapshot.signature.clone(),
            fingerprint: snapshot.fingerprint.clone(),
            usage: RwLock::new(Usage::default()),
        };
        resource.merge_snapshot(snapshot);
        resource
    }
}

fn flatten(map: &UsageMap) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(entity, names)| (entity.0.clone(), names.iter().cloned().collect()))
        .collect()
}

fn expand(map: &BTreeMap<String, Vec<String>>) -> UsageMap {
    map.iter()
        .map(|(entity, names)| (EntityType::new(entity.clone()), names.iter().cloned().collect()))
        .collect()
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = self.usage.read();
        f.debug_struct("Resource")
            .field("signature", &self.signature)
            .field("columns", &usage.columns)
            .field("associations", &usage.associations)
            .finish()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.signature)?;
        let usage = self.usage.read();
        for (entity, columns) in &usage.columns {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            writeln!(f, "  {} select=[{}]", entity, columns.join(", "))?;
        }
        for (entity, associations) in &usage.associations {
            let associations: Vec<&str> = associations.iter().map(String::as_str).collect();
            writeln!(f, "  {} include=[{}]", entity, associations.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show_post() -> Resource {
        Resource::new(RequestFingerprint::new("posts", "show", "GET", "html"))
    }

    #[test]
    fn test_empty_resource_has_no_usage() {
        assert!(!show_post().any());
    }

    #[test]
    fn test_records_usage_per_entity() {
        let resource = show_post();
        let post = EntityType::new("Post");
        let user = EntityType::new("User");

        resource.add_column(&post, "title");
        resource.add_column(&user, "name");
        resource.add_association(&post, "author");

        assert!(resource.any());
        assert_eq!(resource.columns(&post).len(), 1);
        assert!(resource.associations(&post).contains("author"));
        assert!(resource.associations(&user).is_empty());
        assert_eq!(resource.entities().len(), 2);
    }

    #[test]
    fn test_merge_unions_sets() {
        let a = show_post();
        let b = show_post();
        let post = EntityType::new("Post");

        a.add_column(&post, "title");
        b.add_column(&post, "body");
        b.add_association(&post, "author");

        a.merge(&b);
        let columns: Vec<String> = a.columns(&post).into_iter().collect();
        assert_eq!(columns, vec!["body", "title"]);
        assert!(a.associations(&post).contains("author"));
    }

    #[test]
    fn test_snapshot_layout() {
        let resource = show_post();
        resource.add_column(&EntityType::new("Post"), "title");

        let json = serde_json::to_value(resource.snapshot()).unwrap();
        assert_eq!(json["signature"], "posts#show GET html");
        assert_eq!(json["columns"]["Post"][0], "title");
        assert!(json["associations"].as_object().unwrap().is_empty());
    }
}
