//! Typed key-value container for service entities.
//!
//! # Design
//! An `Entity` keeps the attributes exactly as the service sent them, in
//! order, and exposes them through explicit accessors. Attributes produced
//! by custom-field decoding are tracked separately so that re-decoding can
//! drop stale ones and path resolution can tell them from base attributes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result, UnknownVariant};

/// Entity types custom-field sets can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    Client,
    Group,
    LoanAccount,
    DepositAccount,
    Branch,
    Centre,
    User,
}

impl OwnerType {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerType::Client => "CLIENT",
            OwnerType::Group => "GROUP",
            OwnerType::LoanAccount => "LOAN_ACCOUNT",
            OwnerType::DepositAccount => "DEPOSIT_ACCOUNT",
            OwnerType::Branch => "BRANCH",
            OwnerType::Centre => "CENTRE",
            OwnerType::User => "USER",
        }
    }
}

impl FromStr for OwnerType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(OwnerType::Client),
            "GROUP" => Ok(OwnerType::Group),
            "LOAN_ACCOUNT" => Ok(OwnerType::LoanAccount),
            "DEPOSIT_ACCOUNT" => Ok(OwnerType::DepositAccount),
            "BRANCH" => Ok(OwnerType::Branch),
            "CENTRE" => Ok(OwnerType::Centre),
            "USER" => Ok(OwnerType::User),
            _ => Err(UnknownVariant {
                kind: "owner type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A REST collection: its URL prefix and the owner type of its entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub prefix: &'static str,
    pub owner_type: OwnerType,
}

impl Resource {
    pub const CLIENTS: Resource = Resource::new("clients", OwnerType::Client);
    pub const GROUPS: Resource = Resource::new("groups", OwnerType::Group);
    pub const LOANS: Resource = Resource::new("loans", OwnerType::LoanAccount);
    pub const DEPOSITS: Resource = Resource::new("deposits", OwnerType::DepositAccount);
    pub const BRANCHES: Resource = Resource::new("branches", OwnerType::Branch);
    pub const CENTRES: Resource = Resource::new("centres", OwnerType::Centre);
    pub const USERS: Resource = Resource::new("users", OwnerType::User);

    pub const fn new(prefix: &'static str, owner_type: OwnerType) -> Self {
        Self { prefix, owner_type }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    owner_type: OwnerType,
    attrs: Map<String, Value>,
    decoded: BTreeSet<String>,
}

impl Entity {
    pub fn new(owner_type: OwnerType) -> Self {
        Self {
            owner_type,
            attrs: Map::new(),
            decoded: BTreeSet::new(),
        }
    }

    /// Wrap a JSON object. Anything else is a malformed response.
    pub fn from_value(owner_type: OwnerType, value: Value) -> Result<Self> {
        match value {
            Value::Object(attrs) => Ok(Self {
                owner_type,
                attrs,
                decoded: BTreeSet::new(),
            }),
            other => Err(Error::malformed(format!(
                "expected a JSON object for {owner_type}, got {other}"
            ))),
        }
    }

    pub fn owner_type(&self) -> OwnerType {
        self.owner_type
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Set an attribute. A key that already holds a custom field value
    /// stays a custom field.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attrs.insert(key.into(), value.into())
    }

    /// Set a flattened custom field attribute, e.g. `field` or `field_0`.
    pub fn set_custom(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        self.decoded.insert(key.clone());
        self.attrs.insert(key, value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.decoded.remove(key);
        self.attrs.shift_remove(key)
    }

    /// Attribute names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attrs
    }

    /// True for attributes that came from the entity itself rather than
    /// from flattening its custom field values.
    pub fn is_base_attribute(&self, key: &str) -> bool {
        self.attrs.contains_key(key) && !self.decoded.contains(key)
    }

    pub fn is_decoded_attribute(&self, key: &str) -> bool {
        self.decoded.contains(key)
    }

    pub(crate) fn clear_decoded(&mut self) {
        for key in std::mem::take(&mut self.decoded) {
            self.attrs.shift_remove(&key);
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.attrs)
    }
}
