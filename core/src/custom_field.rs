//! Custom field values: flattening on read, path resolution on write.
//!
//! # Design
//! The service delivers custom fields as a `customFieldValues` list of
//! metadata-plus-value records. `CustomFieldCodec::decode` lifts each active
//! record into flat attributes named after the field (`name`, `id`), with a
//! `_<index>` suffix for repeatable grouped sets so groups never collide.
//! Decoding first drops whatever a previous decode produced, which keeps it
//! idempotent.
//!
//! `resolve_path` goes the other way: it finds where a flat name lives in
//! the entity's structure, consulting the custom field sets available to the
//! entity's owner type. Nothing is cached between calls since the same name
//! can resolve differently for different owner types.

use std::cell::OnceCell;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::entity::{Entity, OwnerType};
use crate::error::{Error, Result};

/// Attribute holding the raw custom field value records.
pub const VALUES_KEY: &str = "customFieldValues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CustomFieldKind {
    #[serde(alias = "SINGLE")]
    Standard,
    Grouped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldState {
    #[default]
    Active,
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: FieldState,
}

impl CustomFieldDefinition {
    pub fn is_active(&self) -> bool {
        self.state == FieldState::Active
    }

    fn answers_to(&self, name: &str) -> bool {
        self.id == name || self.name == name
    }
}

/// A custom field set definition as listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldSet {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CustomFieldKind,
    pub available_for: OwnerType,
    #[serde(rename = "customFields", default)]
    pub fields: Vec<CustomFieldDefinition>,
}

impl CustomFieldSet {
    /// Active field whose id or name is `name`.
    pub fn field(&self, name: &str) -> Option<&CustomFieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.is_active() && f.answers_to(name))
    }
}

/// Structural location of a patchable attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// `/field`
    Flat { field: String },
    /// `/<set>/field`
    Standard { set_id: String, field: String },
    /// `/<set>/<index>/field`
    Grouped {
        set_id: String,
        index: usize,
        field: String,
    },
}

impl FieldPath {
    pub fn flat(field: impl Into<String>) -> Self {
        FieldPath::Flat {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FieldPath::Flat { field }
            | FieldPath::Standard { field, .. }
            | FieldPath::Grouped { field, .. } => field,
        }
    }

    /// Custom field kind, `None` for flat paths.
    pub fn kind(&self) -> Option<CustomFieldKind> {
        match self {
            FieldPath::Flat { .. } => None,
            FieldPath::Standard { .. } => Some(CustomFieldKind::Standard),
            FieldPath::Grouped { .. } => Some(CustomFieldKind::Grouped),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Flat { field } => write!(f, "/{field}"),
            FieldPath::Standard { set_id, field } => write!(f, "/{set_id}/{field}"),
            FieldPath::Grouped {
                set_id,
                index,
                field,
            } => write!(f, "/{set_id}/{index}/{field}"),
        }
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One custom field value of an entity.
///
/// The definition is looked up lazily and at most once per instance.
#[derive(Debug, Clone)]
pub struct CustomFieldValue {
    pub value: Value,
    pub path: FieldPath,
    definition: OnceCell<CustomFieldDefinition>,
}

impl CustomFieldValue {
    pub fn new(value: Value, path: FieldPath) -> Self {
        Self {
            value,
            path,
            definition: OnceCell::new(),
        }
    }

    /// Kind of the owning set, `None` when the value sits at a flat path.
    pub fn kind(&self) -> Option<CustomFieldKind> {
        self.path.kind()
    }

    /// The field's definition, fetched through `load` on first use.
    pub fn definition<F>(&self, load: F) -> Result<&CustomFieldDefinition>
    where
        F: FnOnce(&FieldPath) -> Result<CustomFieldDefinition>,
    {
        if let Some(definition) = self.definition.get() {
            return Ok(definition);
        }
        let loaded = load(&self.path)?;
        Ok(self.definition.get_or_init(|| loaded))
    }

    pub fn cached_definition(&self) -> Option<&CustomFieldDefinition> {
        self.definition.get()
    }
}

impl PartialEq for CustomFieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.path == other.path
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    #[serde(rename = "customFieldID", default)]
    custom_field_id: Option<String>,
    #[serde(default)]
    custom_field_set_id: Option<String>,
    #[serde(default)]
    custom_field_set_group_index: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    linked_entity_key_value: Option<Value>,
    #[serde(default)]
    custom_field: Option<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    state: FieldState,
}

impl RawEntry {
    fn is_active(&self) -> bool {
        self.custom_field
            .as_ref()
            .map_or(true, |f| f.state == FieldState::Active)
    }

    fn field_id(&self) -> Option<&str> {
        self.custom_field
            .as_ref()
            .and_then(|f| f.id.as_deref())
            .or(self.custom_field_id.as_deref())
    }

    fn field_name(&self) -> Option<&str> {
        self.custom_field.as_ref().and_then(|f| f.name.as_deref())
    }

    /// Group index, `None` for the "not grouped" sentinel (absent, null,
    /// negative or unparseable).
    fn group_index(&self) -> Option<usize> {
        match self.custom_field_set_group_index.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
            Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        }
    }

    /// A linked entity reference wins over the scalar value.
    fn effective_value(&self) -> Value {
        match &self.linked_entity_key_value {
            Some(linked) if !linked.is_null() => linked.clone(),
            _ => self.value.clone().unwrap_or(Value::Null),
        }
    }
}

fn flat_name(base: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{base}_{i}"),
        None => base.to_string(),
    }
}

/// Split `field_3` into `("field", 3)`.
fn split_group_suffix(name: &str) -> Option<(&str, usize)> {
    let (base, suffix) = name.rsplit_once('_')?;
    if base.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().map(|index| (base, index))
}

fn raw_entries(entity: &Entity) -> Result<Vec<RawEntry>> {
    match entity.get(VALUES_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(values @ Value::Array(_)) => serde_json::from_value(values.clone())
            .map_err(|e| Error::malformed(format!("bad {VALUES_KEY} entry: {e}"))),
        Some(other) => Err(Error::malformed(format!(
            "{VALUES_KEY} must be an array, got {other}"
        ))),
    }
}

/// Custom field codec for one tenant's set definitions.
#[derive(Debug, Clone, Default)]
pub struct CustomFieldCodec {
    sets: Vec<CustomFieldSet>,
}

impl CustomFieldCodec {
    pub fn new(sets: Vec<CustomFieldSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[CustomFieldSet] {
        &self.sets
    }

    /// Copy of `entity` with its custom field values flattened.
    pub fn decode(&self, entity: &Entity) -> Result<Entity> {
        let mut decoded = entity.clone();
        self.decode_in_place(&mut decoded)?;
        Ok(decoded)
    }

    pub fn decode_in_place(&self, entity: &mut Entity) -> Result<()> {
        let entries = raw_entries(entity)?;
        entity.clear_decoded();

        for entry in &entries {
            if !entry.is_active() {
                tracing::trace!(field = ?entry.field_id(), "skipping deactivated custom field");
                continue;
            }
            let index = entry.group_index();
            let value = entry.effective_value();

            let mut names: Vec<&str> = entry.field_name().into_iter().collect();
            if let Some(id) = entry.field_id() {
                if !names.contains(&id) {
                    names.push(id);
                }
            }
            if names.is_empty() {
                tracing::debug!("custom field value without name or id");
                continue;
            }

            for base in names {
                let key = flat_name(base, index);
                if entity.is_base_attribute(&key) {
                    tracing::debug!(key = %key, "custom field would shadow a base attribute");
                    continue;
                }
                entity.set_custom(key, value.clone());
            }
        }
        Ok(())
    }

    /// Typed view of the entity's active custom field values that name
    /// their set.
    pub fn values(&self, entity: &Entity) -> Result<Vec<CustomFieldValue>> {
        let values = raw_entries(entity)?
            .into_iter()
            .filter(RawEntry::is_active)
            .filter_map(|entry| {
                let set_id = entry.custom_field_set_id.clone()?;
                let field = entry.field_id()?.to_string();
                let path = match entry.group_index() {
                    Some(index) => FieldPath::Grouped {
                        set_id,
                        index,
                        field,
                    },
                    None => FieldPath::Standard { set_id, field },
                };
                Some(CustomFieldValue::new(entry.effective_value(), path))
            })
            .collect();
        Ok(values)
    }

    /// Where `field_name` lives on `entity`, or `None` when it is not
    /// patchable. A `_<index>` suffix selects a group of a grouped set.
    pub fn resolve_path(&self, entity: &Entity, field_name: &str) -> Option<FieldPath> {
        if entity.is_base_attribute(field_name) {
            return Some(FieldPath::flat(field_name));
        }
        self.resolve_custom(entity.owner_type(), field_name, None)
    }

    /// Resolve `field_name` against the custom field definitions only.
    pub(crate) fn resolve_defined(
        &self,
        owner_type: OwnerType,
        field_name: &str,
    ) -> Option<FieldPath> {
        self.resolve_custom(owner_type, field_name, None)
    }

    /// Resolve a field of a grouped set at an explicit group index.
    pub fn resolve_grouped_path(
        &self,
        entity: &Entity,
        field_name: &str,
        index: usize,
    ) -> Option<FieldPath> {
        self.resolve_custom(entity.owner_type(), field_name, Some(index))
    }

    fn resolve_custom(
        &self,
        owner_type: OwnerType,
        field_name: &str,
        index: Option<usize>,
    ) -> Option<FieldPath> {
        let available = || self.sets.iter().filter(move |s| s.available_for == owner_type);

        for set in available() {
            let Some(field) = set.field(field_name) else {
                continue;
            };
            match (set.kind, index) {
                (CustomFieldKind::Standard, None) => {
                    return Some(FieldPath::Standard {
                        set_id: set.id.clone(),
                        field: field.id.clone(),
                    })
                }
                (CustomFieldKind::Grouped, Some(index)) => {
                    return Some(FieldPath::Grouped {
                        set_id: set.id.clone(),
                        index,
                        field: field.id.clone(),
                    })
                }
                _ => {}
            }
        }

        if index.is_some() {
            return None;
        }
        let (base, index) = split_group_suffix(field_name)?;
        available()
            .filter(|s| s.kind == CustomFieldKind::Grouped)
            .find_map(|set| {
                set.field(base).map(|field| FieldPath::Grouped {
                    set_id: set.id.clone(),
                    index,
                    field: field.id.clone(),
                })
            })
    }
}
