//! The catalog tree: category → module group → sub-module → schema.
//!
//! Sub-module names are the dispatch key and the endpoint-map key, so they
//! must be unique across the whole tree, not just within their group.
//!
//! A leaf whose schema does not parse is kept verbatim as
//! [`CatalogEntry::Invalid`]. It still reserves its name and is written back
//! unchanged, but it cannot be dispatched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolboxError};
use crate::schema::ParameterSchema;

type Group = BTreeMap<String, CatalogEntry>;

/// One sub-module leaf as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogEntry {
    Valid(ParameterSchema),
    Invalid(serde_json::Value),
}

impl CatalogEntry {
    pub fn schema(&self) -> Option<&ParameterSchema> {
        match self {
            CatalogEntry::Valid(schema) => Some(schema),
            CatalogEntry::Invalid(_) => None,
        }
    }

    /// Why the raw leaf was rejected, or `None` for a valid entry.
    pub fn problem(&self) -> Option<String> {
        match self {
            CatalogEntry::Valid(_) => None,
            CatalogEntry::Invalid(raw) => Some(
                serde_json::from_value::<ParameterSchema>(raw.clone())
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unreadable schema".to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogTree(BTreeMap<String, BTreeMap<String, Group>>);

/// Location of a sub-module inside the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModulePath {
    pub category: String,
    pub group: String,
    pub sub_module: String,
}

/// What [`CatalogTree::insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// Same path, different schema.
    Replaced,
    /// Same path and schema; the tree is unchanged.
    Unchanged,
}

impl CatalogTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn groups(&self, category: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(category)
            .into_iter()
            .flat_map(|groups| groups.keys().map(String::as_str))
    }

    pub fn sub_modules(&self, category: &str, group: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(category)
            .and_then(|groups| groups.get(group))
            .into_iter()
            .flat_map(|subs| subs.keys().map(String::as_str))
    }

    /// Every leaf, valid or not, in category/group/name order.
    pub fn entries(&self) -> impl Iterator<Item = (ModulePath, &CatalogEntry)> {
        self.0.iter().flat_map(|(category, groups)| {
            groups.iter().flat_map(move |(group, subs)| {
                subs.iter().map(move |(name, entry)| {
                    (
                        ModulePath {
                            category: category.clone(),
                            group: group.clone(),
                            sub_module: name.clone(),
                        },
                        entry,
                    )
                })
            })
        })
    }

    /// Every dispatchable `(path, schema)` leaf.
    pub fn leaves(&self) -> impl Iterator<Item = (ModulePath, &ParameterSchema)> {
        self.entries()
            .filter_map(|(path, entry)| entry.schema().map(|schema| (path, schema)))
    }

    /// Leaves whose schema failed to parse, with the reason.
    pub fn invalid_leaves(&self) -> Vec<(ModulePath, String)> {
        self.entries()
            .filter_map(|(path, entry)| entry.problem().map(|why| (path, why)))
            .collect()
    }

    /// Number of registered sub-modules, including invalid ones.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, sub_module: &str) -> bool {
        self.entries().any(|(path, _)| path.sub_module == sub_module)
    }

    pub fn find(&self, sub_module: &str) -> Option<(ModulePath, &ParameterSchema)> {
        self.leaves().find(|(path, _)| path.sub_module == sub_module)
    }

    pub fn schema(&self, sub_module: &str) -> Option<&ParameterSchema> {
        self.find(sub_module).map(|(_, schema)| schema)
    }

    /// Schema for dispatching `sub_module`.
    ///
    /// `NotFound` when no such leaf exists, `MalformedSchema` when it exists
    /// but its schema did not parse.
    pub fn dispatchable(&self, sub_module: &str) -> Result<&ParameterSchema> {
        let (_, entry) = self
            .entries()
            .find(|(path, _)| path.sub_module == sub_module)
            .ok_or_else(|| ToolboxError::NotFound(format!("module '{}'", sub_module)))?;
        match entry {
            CatalogEntry::Valid(schema) => Ok(schema),
            CatalogEntry::Invalid(_) => Err(ToolboxError::MalformedSchema(format!(
                "schema of '{}' is not valid: {}",
                sub_module,
                entry.problem().unwrap_or_default()
            ))),
        }
    }

    /// Insert a sub-module, creating intermediate levels as needed.
    ///
    /// Fails with `DuplicateModule` when the name already lives under a
    /// different category or group.
    pub fn insert(
        &mut self,
        category: &str,
        group: &str,
        sub_module: &str,
        schema: ParameterSchema,
    ) -> Result<InsertOutcome> {
        let existing = self.entries().find(|(path, _)| path.sub_module == sub_module);
        if let Some((existing, _)) = existing {
            if existing.category != category || existing.group != group {
                return Err(ToolboxError::DuplicateModule {
                    name: sub_module.to_string(),
                    category: existing.category,
                    group: existing.group,
                });
            }
        }

        let subs = self
            .0
            .entry(category.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();

        let entry = CatalogEntry::Valid(schema);
        Ok(match subs.insert(sub_module.to_string(), entry.clone()) {
            None => InsertOutcome::Inserted,
            Some(previous) if previous == entry => InsertOutcome::Unchanged,
            Some(_) => InsertOutcome::Replaced,
        })
    }
}
