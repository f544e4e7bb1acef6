//! Loaded rows with their eager-loaded relationships.

use crate::config::ResourceTypeDescriptor;
use crate::store::Row;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub resource_type: String,
    pub id: String,
    pub row: Row,
    /// Filled by the executor for every requested include hop.
    pub related: BTreeMap<String, Related>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Entity {
    pub fn from_row(resource: &ResourceTypeDescriptor, row: Row) -> Self {
        let id = row.get(resource.id_column()).map(key_string).unwrap_or_default();
        Entity {
            resource_type: resource.name.clone(),
            id,
            row,
            related: BTreeMap::new(),
        }
    }

    pub fn column(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.row.get(name).unwrap_or(&NULL)
    }
}

/// String form of a key value as used in resource identifiers.
pub fn key_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
