//! Feed validation: names, id fields, types and builder references.
//!
//! Relationship targets are not checked here. A target may be declared later in the feed or
//! never; the latter surfaces when a query first walks the relationship.

use crate::config::resolved::FieldType;
use crate::config::FullConfig;
use crate::error::ConfigError;
use crate::filter::is_builtin_builder;
use std::collections::HashSet;

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut names: HashSet<&str> = HashSet::new();

    for r in &config.resources {
        if !names.insert(r.name.as_str()) {
            return Err(ConfigError::DuplicateResourceType(r.name.clone()));
        }
        if r.table.is_empty() {
            return Err(ConfigError::Validation(format!(
                "resource type {} has no table",
                r.name
            )));
        }

        let mut fields: HashSet<&str> = HashSet::new();
        for a in &r.attributes {
            if !fields.insert(a.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    resource_type: r.name.clone(),
                    field: a.name.clone(),
                });
            }
            if FieldType::parse(&a.type_).is_none() {
                return Err(ConfigError::UnknownFieldType {
                    resource_type: r.name.clone(),
                    field: a.name.clone(),
                    type_name: a.type_.clone(),
                });
            }
            if let Some(name) = a.filters.iter().find(|f| !is_builtin_builder(f)) {
                return Err(ConfigError::UnknownFilterBuilder {
                    resource_type: r.name.clone(),
                    field: a.name.clone(),
                    name: name.clone(),
                });
            }
        }
        if !r.attributes.iter().any(|a| a.name == r.id_field) {
            return Err(ConfigError::InvalidPrimaryKey {
                resource_type: r.name.clone(),
                field: r.id_field.clone(),
            });
        }

        for rel in &r.relationships {
            if !fields.insert(rel.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    resource_type: r.name.clone(),
                    field: rel.name.clone(),
                });
            }
            if rel.many && rel.remote_key.is_none() {
                return Err(ConfigError::Validation(format!(
                    "to-many relationship {}.{} requires remote_key",
                    r.name, rel.name
                )));
            }
        }
    }
    Ok(())
}
