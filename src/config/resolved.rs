//! Resolved resource registry: the feed validated and flattened for runtime use.
//!
//! Descriptors live in an arena keyed by resource type name. Relationships refer to their
//! target by name and are looked up at compile time, so forward and self references need
//! no patching.

use crate::config::ValidationRule;
use crate::error::{AppError, ConfigError};
use crate::filter::PredicateBuilder;
use crate::sql::{ColumnInfo, ColumnRef, JoinKind, JoinSpec, SqlValue, TableRef};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Semantic type of an attribute. Drives operator legality and value coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "string" | "text" | "varchar" => FieldType::Text,
            "integer" | "int" | "bigint" | "serial" | "bigserial" => FieldType::Integer,
            "float" | "number" | "double" | "real" | "numeric" => FieldType::Float,
            "boolean" | "bool" => FieldType::Boolean,
            "uuid" => FieldType::Uuid,
            "timestamp" | "datetime" | "timestamptz" => FieldType::Timestamp,
            "date" => FieldType::Date,
            "json" | "jsonb" | "object" => FieldType::Json,
            _ => return None,
        })
    }

    /// PostgreSQL type used for parameter casts when the feed does not name one.
    pub fn default_pg_type(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "bigint",
            FieldType::Float => "double precision",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::Timestamp => "timestamptz",
            FieldType::Date => "date",
            FieldType::Json => "jsonb",
        }
    }

    /// Whether ordering comparisons (lt, ge, between, ...) are meaningful.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Float | FieldType::Timestamp | FieldType::Date
        )
    }

    /// Coerce a JSON value to this type. `None` when the value does not fit; there is no
    /// silent string/number conversion. Null is the caller's concern.
    pub fn coerce(&self, value: &Value) -> Option<SqlValue> {
        match (self, value) {
            (FieldType::Text, Value::String(s)) => Some(SqlValue::Text(s.clone())),
            (FieldType::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Int),
            (FieldType::Float, Value::Number(n)) => n.as_f64().map(SqlValue::Float),
            (FieldType::Boolean, Value::Bool(b)) => Some(SqlValue::Bool(*b)),
            (FieldType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).ok().map(SqlValue::Uuid),
            (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s).map(SqlValue::Timestamp),
            (FieldType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(SqlValue::Date),
            (FieldType::Json, v) => Some(SqlValue::Json(v.clone())),
            _ => None,
        }
    }

    /// Parse a resource id given as a string (path segment, linkage id).
    pub fn parse_id(&self, id: &str) -> Option<SqlValue> {
        match self {
            FieldType::Integer => id.parse::<i64>().ok().map(SqlValue::Int),
            FieldType::Uuid => uuid::Uuid::parse_str(id).ok().map(SqlValue::Uuid),
            FieldType::Text => Some(SqlValue::Text(id.to_string())),
            other => other.coerce(&Value::String(id.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::Timestamp => "timestamp",
            FieldType::Date => "date",
            FieldType::Json => "json",
        };
        f.write_str(name)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Clone, Debug)]
pub struct AttributeDescriptor {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub pg_type: String,
    pub has_default: bool,
    pub validation: Option<ValidationRule>,
    /// Operator name -> builder. Consulted before the default operator table.
    pub custom_filters: BTreeMap<String, Arc<dyn PredicateBuilder>>,
}

impl AttributeDescriptor {
    pub fn column_ref(&self, alias: &str) -> ColumnRef {
        ColumnRef::new(alias, &self.column, &self.pg_type)
    }

    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo {
            name: self.column.clone(),
            pg_type: self.pg_type.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Clone, Debug)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub id_field: String,
    /// Column on the owning table (to-one: foreign key; to-many: usually our id).
    pub local_key: String,
    /// Column on the target table; `None` means the target's id column.
    pub remote_key: Option<String>,
}

impl RelationshipDescriptor {
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// (owner column, target column) joined by equality.
    pub fn join_columns(&self, target: &ResourceTypeDescriptor) -> (String, String) {
        let remote = self
            .remote_key
            .clone()
            .unwrap_or_else(|| target.id_column().to_string());
        (self.local_key.clone(), remote)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceTypeDescriptor {
    pub name: String,
    pub table: TableRef,
    pub id_field: String,
    pub client_can_set_id: bool,
    pub disable_collection_count: bool,
    pub attributes: Vec<AttributeDescriptor>,
    pub relationships: BTreeMap<String, RelationshipDescriptor>,
    pub(crate) id_index: usize,
}

impl ResourceTypeDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.get(name)
    }

    pub fn id_attribute(&self) -> &AttributeDescriptor {
        &self.attributes[self.id_index]
    }

    pub fn id_column(&self) -> &str {
        &self.table.pk
    }

    /// Attributes serialized in resource objects (everything but the id).
    pub fn exposed_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.name != self.id_field)
    }

    /// Parse a string id to the id column's native value.
    pub fn parse_id(&self, id: &str) -> Result<SqlValue, AppError> {
        self.id_attribute()
            .field_type
            .parse_id(id)
            .ok_or_else(|| AppError::InvalidId {
                resource_type: self.name.clone(),
                id: id.to_string(),
            })
    }
}

/// Arena of resource type descriptors, read-only once shared.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    pub(crate) resources: HashMap<String, ResourceTypeDescriptor>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&ResourceTypeDescriptor> {
        self.resources.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ResourceTypeDescriptor, AppError> {
        self.get(name)
            .ok_or_else(|| AppError::UnknownResourceType(name.to_string()))
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Target descriptor of a relationship; fails fast when the target was never registered.
    pub fn related(
        &self,
        owner: &ResourceTypeDescriptor,
        relationship: &RelationshipDescriptor,
    ) -> Result<&ResourceTypeDescriptor, AppError> {
        self.get(&relationship.target)
            .ok_or_else(|| AppError::UnknownRelationshipTarget {
                resource_type: owner.name.clone(),
                relationship: relationship.name.clone(),
                target: relationship.target.clone(),
            })
    }

    /// Aliased join from `parent_alias` along `relationship`. The alias is derived from `path`
    /// so the same relationship chain always yields the same alias.
    pub fn relationship_join(
        &self,
        owner: &ResourceTypeDescriptor,
        relationship: &RelationshipDescriptor,
        parent_alias: &str,
        path: &str,
        kind: JoinKind,
    ) -> Result<(JoinSpec, &ResourceTypeDescriptor), AppError> {
        let target = self.related(owner, relationship)?;
        let (parent_column, column) = relationship.join_columns(target);
        let join = JoinSpec {
            path: path.to_string(),
            alias: JoinSpec::alias_for(path),
            parent_alias: parent_alias.to_string(),
            parent_column,
            table: target.table.clone(),
            column,
            kind,
        };
        Ok((join, target))
    }

    /// Attach a custom predicate builder to `resource_type.field` under operator `op`.
    /// Call at startup, before the registry is shared.
    pub fn register_filter(
        &mut self,
        resource_type: &str,
        field: &str,
        op: &str,
        builder: Arc<dyn PredicateBuilder>,
    ) -> Result<(), ConfigError> {
        let resource = self
            .resources
            .get_mut(resource_type)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource type",
                id: resource_type.to_string(),
            })?;
        let attribute = resource
            .attributes
            .iter_mut()
            .find(|a| a.name == field)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "attribute",
                id: format!("{}.{}", resource_type, field),
            })?;
        attribute.custom_filters.insert(op.to_string(), builder);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_is_strict() {
        assert_eq!(FieldType::Integer.coerce(&json!(18)), Some(SqlValue::Int(18)));
        assert_eq!(FieldType::Integer.coerce(&json!("18")), None);
        assert_eq!(FieldType::Integer.coerce(&json!(1.5)), None);
        assert_eq!(FieldType::Text.coerce(&json!(5)), None);
        assert_eq!(FieldType::Float.coerce(&json!(2)), Some(SqlValue::Float(2.0)));
        assert!(FieldType::Uuid.coerce(&json!("not-a-uuid")).is_none());
        assert!(FieldType::Timestamp.coerce(&json!("2024-01-02T03:04:05Z")).is_some());
        assert!(FieldType::Date.coerce(&json!("2024-13-01")).is_none());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(FieldType::Integer.parse_id("42"), Some(SqlValue::Int(42)));
        assert_eq!(FieldType::Integer.parse_id("abc"), None);
        assert_eq!(FieldType::Text.parse_id("abc"), Some(SqlValue::Text("abc".into())));
    }

    #[test]
    fn test_forward_reference_fails_at_lookup() {
        let registry = crate::fixtures::registry();
        let post = registry.require("post").unwrap();
        let mut dangling = post.relationship("author").unwrap().clone();
        dangling.target = "ghost".into();
        let err = registry.related(post, &dangling).unwrap_err();
        assert!(matches!(err, AppError::UnknownRelationshipTarget { ref target, .. } if target == "ghost"));
    }
}
