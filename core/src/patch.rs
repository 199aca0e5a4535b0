//! Minimal patch computation between two entity snapshots.
//!
//! # Design
//! Only fields the caller names are compared; each one must resolve to a
//! structural path or the whole diff fails. Removals are optional and
//! discovered by scanning the original snapshot, with paths resolved against
//! the original since the field no longer exists in the current one.
//! Operations come out in the order they were found and are never merged.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::custom_field::{CustomFieldCodec, FieldPath};
use crate::entity::Entity;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchVerb {
    Add,
    Replace,
    Remove,
}

impl PatchVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchVerb::Add => "add",
            PatchVerb::Replace => "replace",
            PatchVerb::Remove => "remove",
        }
    }
}

impl fmt::Display for PatchVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON-Patch style instruction. `Remove` carries no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: FieldPath, value: Value },
    Replace { path: FieldPath, value: Value },
    Remove { path: FieldPath },
}

impl PatchOperation {
    pub fn verb(&self) -> PatchVerb {
        match self {
            PatchOperation::Add { .. } => PatchVerb::Add,
            PatchOperation::Replace { .. } => PatchVerb::Replace,
            PatchOperation::Remove { .. } => PatchVerb::Remove,
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                Some(value)
            }
            PatchOperation::Remove { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PatchDiffer<'c> {
    codec: &'c CustomFieldCodec,
}

impl<'c> PatchDiffer<'c> {
    pub fn new(codec: &'c CustomFieldCodec) -> Self {
        Self { codec }
    }

    /// Operations turning `original` into `current` for `field_names`,
    /// plus removals of vanished fields when `autodetect_removals` is set.
    pub fn diff<S: AsRef<str>>(
        &self,
        original: &Entity,
        current: &Entity,
        field_names: &[S],
        autodetect_removals: bool,
    ) -> Result<Vec<PatchOperation>> {
        let mut operations = Vec::new();

        for name in field_names {
            let name = name.as_ref();
            let path = self
                .path_for(original, current, name)
                .ok_or_else(|| Error::UnpatchableField {
                    field: name.to_string(),
                })?;

            let Some(value) = current.get(name) else {
                continue;
            };
            match original.get(name) {
                None => operations.push(PatchOperation::Add {
                    path,
                    value: value.clone(),
                }),
                Some(before) if before != value => operations.push(PatchOperation::Replace {
                    path,
                    value: value.clone(),
                }),
                Some(_) => {}
            }
        }

        if autodetect_removals {
            let mut removed = HashSet::new();
            for name in original.keys().filter(|k| !current.contains(k)) {
                let Some(path) = self.codec.resolve_path(original, name) else {
                    tracing::debug!(field = %name, "vanished field has no path, not removing");
                    continue;
                };
                if removed.insert(path.clone()) {
                    operations.push(PatchOperation::Remove { path });
                }
            }
        }

        tracing::debug!(operations = operations.len(), "computed patch");
        Ok(operations)
    }

    /// A key the original already had keeps the path it had there. A new key
    /// is only flat when no custom field definition claims its name.
    fn path_for(&self, original: &Entity, current: &Entity, name: &str) -> Option<FieldPath> {
        if original.contains(name) {
            return self
                .codec
                .resolve_path(original, name)
                .or_else(|| self.codec.resolve_path(current, name));
        }
        self.codec
            .resolve_defined(current.owner_type(), name)
            .or_else(|| self.codec.resolve_path(current, name))
    }
}
