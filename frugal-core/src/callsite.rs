//! Learned state for one call-site
//!
//! A `Callsite` holds the columns and associations observed for a single
//! signature. Both sets only grow. All mutation happens under the
//! callsite's own lock, so unrelated call-sites never contend.

use crate::signature::Signature;
use frugal_types::{EntityType, Includes};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Default)]
struct Learned {
    columns: BTreeSet<String>,
    associations: BTreeSet<String>,
}

/// Container for the columns and associations referenced at a call-site
pub struct Callsite {
    entity: EntityType,
    signature: Signature,

    /// Primary key and, for inheritance roots, the discriminator column
    defaults: BTreeSet<String>,

    /// To-one, non-polymorphic associations of the entity
    preloadable: BTreeSet<String>,

    learned: RwLock<Learned>,
}

impl Callsite {
    /// Create a callsite seeded with its default columns
    pub fn new(
        entity: EntityType,
        signature: Signature,
        defaults: BTreeSet<String>,
        preloadable: BTreeSet<String>,
    ) -> Self {
        let learned = Learned {
            columns: defaults.clone(),
            associations: BTreeSet::new(),
        };

        Callsite {
            entity,
            signature,
            defaults,
            preloadable,
            learned: RwLock::new(learned),
        }
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Flag a column as seen. Returns true if it was not known yet.
    pub fn add_column(&self, column: &str) -> bool {
        if self.learned.read().columns.contains(column) {
            return false;
        }
        self.learned.write().columns.insert(column.to_string())
    }

    /// Flag an association as seen.
    ///
    /// Polymorphic and to-many associations are not preloadable and are
    /// dropped. Returns true only if the association was newly added.
    pub fn add_association(&self, association: &str) -> bool {
        if !self.is_preloadable(association) {
            return false;
        }
        self.learned
            .write()
            .associations
            .insert(association.to_string())
    }

    pub fn is_preloadable(&self, association: &str) -> bool {
        self.preloadable.contains(association)
    }

    /// Current learned columns, used to build the SELECT list
    pub fn select_columns(&self) -> BTreeSet<String> {
        self.learned.read().columns.clone()
    }

    pub fn associations(&self) -> BTreeSet<String> {
        self.learned.read().associations.clone()
    }

    pub fn default_columns(&self) -> &BTreeSet<String> {
        &self.defaults
    }

    /// Learned columns beyond the primary key and discriminator
    pub fn augmented_columns(&self) -> BTreeSet<String> {
        self.learned
            .read()
            .columns
            .difference(&self.defaults)
            .cloned()
            .collect()
    }

    pub fn has_augmented_columns(&self) -> bool {
        self.learned.read().columns.len() > self.defaults.len()
    }

    /// Merge learned associations into a requested eager-load.
    ///
    /// Nested requests are returned unchanged. A flat (or absent) request
    /// yields the requested names followed by any learned association not
    /// already requested.
    pub fn merge_includes(&self, requested: Option<&Includes>) -> Option<Includes> {
        match requested {
            Some(nested @ Includes::Nested(_)) => Some(nested.clone()),
            Some(Includes::List(names)) => {
                let mut merged = names.clone();
                self.append_learned(&mut merged);
                Some(Includes::List(merged))
            }
            None => {
                let mut merged = Vec::new();
                self.append_learned(&mut merged);
                if merged.is_empty() {
                    None
                } else {
                    Some(Includes::List(merged))
                }
            }
        }
    }

    fn append_learned(&self, merged: &mut Vec<String>) {
        let learned = self.learned.read();
        for association in &learned.associations {
            if !merged.contains(association) {
                merged.push(association.clone());
            }
        }
    }
}

impl fmt::Debug for Callsite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let learned = self.learned.read();
        f.debug_struct("Callsite")
            .field("entity", &self.entity)
            .field("signature", &self.signature)
            .field("columns", &learned.columns)
            .field("associations", &learned.associations)
            .finish()
    }
}

impl fmt::Display for Callsite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let learned = self.learned.read();
        let columns: Vec<&str> = learned.columns.iter().map(String::as_str).collect();
        let associations: Vec<String> = learned
            .associations
            .iter()
            .map(|a| format!(":{}", a))
            .collect();
        write!(
            f,
            "<{} select=[{}] include=[{}]>",
            self.entity,
            columns.join(", "),
            associations.join(", ")
        )
    }
}
