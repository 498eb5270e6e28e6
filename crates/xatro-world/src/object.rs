//! The attribute-map view of a world object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ObjectId;

/// Attribute name holding an object's id.
pub const ID_ATTR: &str = "id";
/// Attribute name holding an object's kind.
pub const KIND_ATTR: &str = "kind";

/// A snapshot of one object's attributes.
///
/// Objects have no behavior of their own. A live object always carries `id`
/// and, once [`World::create`](crate::world::World::create) returns, `kind`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object {
    attrs: BTreeMap<String, Value>,
}

impl Object {
    /// An object holding only its `id` attribute.
    pub fn with_id(id: &ObjectId) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert(ID_ATTR.to_owned(), Value::from(id));
        Self { attrs }
    }

    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.get_str(ID_ATTR).map(ObjectId::from).unwrap_or_default()
    }

    /// The object's kind, if set.
    pub fn kind(&self) -> Option<&str> {
        self.get_str(KIND_ATTR)
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Look up a string attribute.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    /// Look up an integer attribute.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(Value::as_i64)
    }

    /// Items of a list attribute; empty when unset or not a list.
    pub fn items(&self, name: &str) -> &[Value] {
        match self.attrs.get(name) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Items of a list attribute interpreted as object ids.
    pub fn item_ids(&self, name: &str) -> Vec<ObjectId> {
        self.items(name)
            .iter()
            .filter_map(Value::as_str)
            .map(ObjectId::from)
            .collect()
    }

    /// Whether the attribute is present.
    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// All attributes in name order.
    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub(crate) fn attrs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attrs
    }
}

impl std::ops::Index<&str> for Object {
    type Output = Value;

    /// Missing attributes index to `Value::Null`.
    fn index(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attrs.get(name).unwrap_or(&NULL)
    }
}
