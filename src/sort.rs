//! Sort parsing and compilation.

use crate::config::{Registry, ResourceTypeDescriptor};
use crate::error::AppError;
use crate::sql::{JoinKind, JoinSet, OrderClause, SortDirection, MAIN_ALIAS};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field_path: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field_path: &str) -> Self {
        SortSpec {
            field_path: field_path.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field_path: &str) -> Self {
        SortSpec {
            field_path: field_path.to_string(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse a `sort` parameter: comma separated, `-` prefix for descending.
    pub fn parse_list(raw: &str) -> Vec<SortSpec> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('-') {
                Some(field) => SortSpec::desc(field),
                None => SortSpec::asc(s),
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledSort {
    pub orders: Vec<OrderClause>,
    pub joins: JoinSet,
}

/// Order clauses for `specs`, followed by the primary key so paging is stable.
pub fn compile(registry: &Registry, resource_type: &str, specs: &[SortSpec]) -> Result<CompiledSort, AppError> {
    let resource = registry.require(resource_type)?;
    let mut orders = Vec::with_capacity(specs.len() + 1);
    let mut joins = JoinSet::new();

    for spec in specs {
        let invalid = |reason: String| AppError::InvalidSort {
            resource_type: resource_type.to_string(),
            path: spec.field_path.clone(),
            reason,
        };
        let segments: Vec<&str> = spec.field_path.split('.').collect();
        let (owner, alias, field): (&ResourceTypeDescriptor, String, &str) = match segments.as_slice() {
            [field] => (resource, MAIN_ALIAS.to_string(), *field),
            [rel_name, field] => {
                let relationship = resource
                    .relationship(rel_name)
                    .ok_or_else(|| invalid(format!("'{}' is not a relationship of {}", rel_name, resource.name)))?;
                if relationship.is_many() {
                    return Err(invalid(format!("cannot sort across to-many relationship '{}'", rel_name)));
                }
                let (join, target) =
                    registry.relationship_join(resource, relationship, MAIN_ALIAS, rel_name, JoinKind::Left)?;
                let alias = join.alias.clone();
                joins.push(join);
                (target, alias, *field)
            }
            _ => return Err(invalid("sorting is limited to one relationship hop".into())),
        };

        let Some(attribute) = owner.attribute(field) else {
            let reason = if owner.relationship(field).is_some() {
                format!("'{}' is a relationship and cannot be a sort key", field)
            } else {
                format!("{} has no attribute '{}'", owner.name, field)
            };
            return Err(invalid(reason));
        };
        orders.push(OrderClause {
            column: attribute.column_ref(&alias),
            direction: spec.direction,
        });
    }

    let pk = resource.id_attribute().column_ref(MAIN_ALIAS);
    if !orders.iter().any(|o| o.column == pk) {
        orders.push(OrderClause {
            column: pk,
            direction: SortDirection::Asc,
        });
    }
    Ok(CompiledSort { orders, joins })
}
