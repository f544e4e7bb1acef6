//! Load the resource feed from disk and flatten it into a [`Registry`].

use crate::case::{foreign_key_column, to_snake_case};
use crate::config::resolved::{
    AttributeDescriptor, Cardinality, FieldType, Registry, RelationshipDescriptor, ResourceTypeDescriptor,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use crate::filter::builtin_builder;
use crate::sql::{ColumnInfo, TableRef};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const RESOURCES_FILE: &str = "resources.json";
pub const DEFAULT_SCHEMA: &str = "public";

/// Build the registry from the feed, with `public` as the schema for resources that name none.
pub fn resolve(config: &FullConfig) -> Result<Registry, ConfigError> {
    resolve_with_schema(config, DEFAULT_SCHEMA)
}

pub fn resolve_with_schema(config: &FullConfig, default_schema: &str) -> Result<Registry, ConfigError> {
    validate(config)?;

    let mut resources = HashMap::new();
    for r in &config.resources {
        let descriptor = resolve_resource(r, default_schema)?;
        resources.insert(r.name.clone(), descriptor);
    }

    // Foreign key columns are part of the table but not exposed attributes. A to-one without
    // remote_key keeps its key on the owner, cast like the target id. A remote_key lives on the
    // target, cast like the owner column it points at. Owner-side keys are placed first.
    let mut owner_side: Vec<(String, ColumnInfo)> = Vec::new();
    let mut target_side: Vec<(String, ColumnInfo)> = Vec::new();
    for owner in resources.values() {
        for rel in owner.relationships.values() {
            match &rel.remote_key {
                None => {
                    let pg_type = resources
                        .get(&rel.target)
                        .map(|t| t.id_attribute().pg_type.clone())
                        .unwrap_or_else(|| "text".into());
                    owner_side.push((
                        owner.name.clone(),
                        ColumnInfo {
                            name: rel.local_key.clone(),
                            pg_type,
                        },
                    ));
                }
                Some(remote) => {
                    let pg_type = owner
                        .table
                        .column(&rel.local_key)
                        .map(|c| c.pg_type.clone())
                        .unwrap_or_else(|| owner.table.pk_pg_type.clone());
                    target_side.push((
                        rel.target.clone(),
                        ColumnInfo {
                            name: remote.clone(),
                            pg_type,
                        },
                    ));
                }
            }
        }
    }
    for (resource, column) in owner_side.into_iter().chain(target_side) {
        if let Some(r) = resources.get_mut(&resource) {
            if r.table.column(&column.name).is_none() {
                r.table.columns.push(column);
            }
        }
    }

    Ok(Registry { resources })
}

fn resolve_resource(r: &ResourceConfig, default_schema: &str) -> Result<ResourceTypeDescriptor, ConfigError> {
    let mut attributes = Vec::with_capacity(r.attributes.len());
    for a in &r.attributes {
        let field_type = FieldType::parse(&a.type_).ok_or_else(|| ConfigError::UnknownFieldType {
            resource_type: r.name.clone(),
            field: a.name.clone(),
            type_name: a.type_.clone(),
        })?;
        let mut custom_filters = BTreeMap::new();
        for name in &a.filters {
            let builder = builtin_builder(name).ok_or_else(|| ConfigError::UnknownFilterBuilder {
                resource_type: r.name.clone(),
                field: a.name.clone(),
                name: name.clone(),
            })?;
            custom_filters.insert(name.clone(), builder);
        }
        attributes.push(AttributeDescriptor {
            name: a.name.clone(),
            column: a.column.clone().unwrap_or_else(|| to_snake_case(&a.name)),
            field_type,
            nullable: a.nullable,
            pg_type: a
                .pg_type
                .clone()
                .unwrap_or_else(|| field_type.default_pg_type().to_string()),
            has_default: a.has_default,
            validation: a.validation.clone(),
            custom_filters,
        });
    }

    let id_index = attributes
        .iter()
        .position(|a| a.name == r.id_field)
        .ok_or_else(|| ConfigError::InvalidPrimaryKey {
            resource_type: r.name.clone(),
            field: r.id_field.clone(),
        })?;
    let id_attr = &attributes[id_index];

    let table = TableRef {
        schema: r.schema.clone().unwrap_or_else(|| default_schema.to_string()),
        name: r.table.clone(),
        pk: id_attr.column.clone(),
        pk_pg_type: id_attr.pg_type.clone(),
        columns: attributes.iter().map(AttributeDescriptor::column_info).collect(),
    };

    let mut relationships = BTreeMap::new();
    for rel in &r.relationships {
        let (cardinality, local_key) = if rel.many {
            (
                Cardinality::Many,
                rel.local_key.clone().unwrap_or_else(|| table.pk.clone()),
            )
        } else {
            // With remote_key the target holds the key and points back at our id.
            let default_key = match rel.remote_key {
                Some(_) => table.pk.clone(),
                None => foreign_key_column(&rel.name),
            };
            (Cardinality::One, rel.local_key.clone().unwrap_or(default_key))
        };
        relationships.insert(
            rel.name.clone(),
            RelationshipDescriptor {
                name: rel.name.clone(),
                target: rel.target.clone(),
                cardinality,
                id_field: rel.id_field.clone(),
                local_key,
                remote_key: rel.remote_key.clone(),
            },
        );
    }

    Ok(ResourceTypeDescriptor {
        name: r.name.clone(),
        table,
        id_field: r.id_field.clone(),
        client_can_set_id: r.client_can_set_id,
        disable_collection_count: r.disable_collection_count,
        attributes,
        relationships,
        id_index,
    })
}

/// Read `resources.json` from `dir`.
pub async fn load_from_path(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = dir.as_ref().join(RESOURCES_FILE);
    tracing::debug!(path = %path.display(), "loading resource feed");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
