//! Compile a [`FilterNode`] tree into a native predicate plus the joins it needs.

use crate::config::{AttributeDescriptor, Registry, ResourceTypeDescriptor};
use crate::error::AppError;
use crate::filter::node::{FilterNode, LogicOp};
use crate::filter::operators::{escape_like, Operator};
use crate::sql::{CompareOp, JoinKind, JoinSet, Predicate, SqlValue, MAIN_ALIAS};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFilter {
    pub predicate: Predicate,
    pub joins: JoinSet,
}

pub fn compile(registry: &Registry, resource_type: &str, node: &FilterNode) -> Result<CompiledFilter, AppError> {
    let resource = registry.require(resource_type)?;
    let compiler = FilterCompiler {
        registry,
        root_type: resource_type,
        resource,
        alias: MAIN_ALIAS.to_string(),
        path_prefix: String::new(),
    };
    let mut joins = JoinSet::new();
    let predicate = compiler.compile_node(node, &mut joins)?;
    Ok(CompiledFilter { predicate, joins })
}

/// Compiler scoped to one resource type reached through `path_prefix`, aliased as `alias`.
struct FilterCompiler<'r> {
    registry: &'r Registry,
    root_type: &'r str,
    resource: &'r ResourceTypeDescriptor,
    alias: String,
    path_prefix: String,
}

impl<'r> FilterCompiler<'r> {
    fn invalid(&self, path: &str, reason: impl Into<String>) -> AppError {
        AppError::InvalidFilter {
            resource_type: self.root_type.to_string(),
            path: self.full_path(path),
            reason: reason.into(),
        }
    }

    fn full_path(&self, path: &str) -> String {
        if self.path_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}.{}", self.path_prefix, path)
        }
    }

    fn compile_node(&self, node: &FilterNode, joins: &mut JoinSet) -> Result<Predicate, AppError> {
        match node {
            FilterNode::Combinator { kind, children } => {
                let mut compiled = Vec::with_capacity(children.len());
                for child in children {
                    compiled.push(self.compile_node(child, joins)?);
                }
                match kind {
                    LogicOp::And => Ok(flatten(compiled)),
                    LogicOp::Or => Ok(Predicate::Or(compiled)),
                    LogicOp::Not => match <[Predicate; 1]>::try_from(compiled) {
                        Ok([inner]) => Ok(Predicate::Not(Box::new(inner))),
                        Err(_) => Err(self.invalid("", "'not' takes exactly one filter")),
                    },
                }
            }
            FilterNode::Predicate {
                field_path,
                operator,
                value,
            } => self.compile_predicate(field_path, operator, value, joins),
        }
    }

    fn compile_predicate(
        &self,
        field_path: &str,
        operator: &str,
        value: &Value,
        joins: &mut JoinSet,
    ) -> Result<Predicate, AppError> {
        if let Some((head, rest)) = field_path.split_once('.') {
            let relationship = self
                .resource
                .relationship(head)
                .ok_or_else(|| self.invalid(field_path, format!("'{}' is not a relationship of {}", head, self.resource.name)))?;
            let path = self.full_path(head);
            let (join, target) =
                self.registry
                    .relationship_join(self.resource, relationship, &self.alias, &path, JoinKind::Inner)?;
            let child = FilterCompiler {
                registry: self.registry,
                root_type: self.root_type,
                resource: target,
                alias: join.alias.clone(),
                path_prefix: path,
            };
            joins.push(join);
            return child.compile_predicate(rest, operator, value, joins);
        }

        let attribute = match self.resource.attribute(field_path) {
            Some(a) => a,
            None if self.resource.relationship(field_path).is_some() => {
                return Err(self.invalid(field_path, "relationships cannot be filtered directly; filter on one of their fields"))
            }
            None => {
                return Err(self.invalid(
                    field_path,
                    format!("{} has no attribute '{}'", self.resource.name, field_path),
                ))
            }
        };
        self.build_terminal(attribute, operator, value)
    }

    fn build_terminal(&self, attribute: &AttributeDescriptor, operator: &str, value: &Value) -> Result<Predicate, AppError> {
        let column = attribute.column_ref(&self.alias);
        if let Some(builder) = attribute.custom_filters.get(operator) {
            return builder
                .build(&column, attribute, value)
                .map_err(|reason| self.invalid(&attribute.name, reason));
        }

        let op = Operator::parse(operator)
            .ok_or_else(|| self.invalid(&attribute.name, format!("unknown operator '{}'", operator)))?;

        if value.is_null() || op.is_null_check() {
            return self.build_null_check(attribute, op, value);
        }

        if !op.supports(attribute.field_type) {
            return Err(self.invalid(
                &attribute.name,
                format!("operator '{}' is not supported for {} fields", op, attribute.field_type),
            ));
        }

        let predicate = match op {
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                Predicate::Compare {
                    column,
                    op: compare_op(op),
                    value: self.coerce(attribute, value)?,
                }
            }
            Operator::Between => {
                let bounds = match value {
                    Value::Array(items) if items.len() == 2 => items,
                    _ => return Err(self.invalid(&attribute.name, "'between' expects a list of two values")),
                };
                Predicate::Between {
                    column,
                    low: self.coerce(attribute, &bounds[0])?,
                    high: self.coerce(attribute, &bounds[1])?,
                }
            }
            Operator::In | Operator::NotIn => {
                let Value::Array(items) = value else {
                    return Err(self.invalid(&attribute.name, format!("'{}' expects a list", op)));
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if item.is_null() {
                        return Err(self.invalid(&attribute.name, format!("'{}' list cannot contain null", op)));
                    }
                    values.push(self.coerce(attribute, item)?);
                }
                Predicate::In {
                    column,
                    values,
                    negated: op == Operator::NotIn,
                }
            }
            _ => {
                let Value::String(text) = value else {
                    return Err(self.invalid_type(attribute, value));
                };
                let (pattern, case_insensitive, negated) = match op {
                    Operator::Like => (text.clone(), false, false),
                    Operator::ILike => (text.clone(), true, false),
                    Operator::NotLike => (text.clone(), false, true),
                    Operator::NotILike => (text.clone(), true, true),
                    Operator::Contains => (format!("%{}%", escape_like(text)), false, false),
                    Operator::IContains => (format!("%{}%", escape_like(text)), true, false),
                    Operator::StartsWith => (format!("{}%", escape_like(text)), false, false),
                    _ => (format!("%{}", escape_like(text)), false, false),
                };
                Predicate::Like {
                    column,
                    pattern,
                    case_insensitive,
                    negated,
                }
            }
        };
        Ok(predicate)
    }

    fn build_null_check(&self, attribute: &AttributeDescriptor, op: Operator, value: &Value) -> Result<Predicate, AppError> {
        let negated = match op {
            Operator::Eq | Operator::IsNull => false,
            Operator::Ne | Operator::IsNotNull => true,
            other => {
                return Err(self.invalid(&attribute.name, format!("operator '{}' does not accept null", other)));
            }
        };
        if !value.is_null() {
            return Err(self.invalid(&attribute.name, format!("operator '{}' only accepts null", op)));
        }
        if !attribute.nullable {
            return Err(self.invalid(&attribute.name, format!("{} is not nullable", attribute.name)));
        }
        Ok(Predicate::IsNull {
            column: attribute.column_ref(&self.alias),
            negated,
        })
    }

    fn coerce(&self, attribute: &AttributeDescriptor, value: &Value) -> Result<SqlValue, AppError> {
        attribute
            .field_type
            .coerce(value)
            .ok_or_else(|| self.invalid_type(attribute, value))
    }

    fn invalid_type(&self, attribute: &AttributeDescriptor, value: &Value) -> AppError {
        AppError::InvalidType {
            resource_type: self.root_type.to_string(),
            field: self.full_path(&attribute.name),
            expected: attribute.field_type,
            value: value.clone(),
        }
    }
}

fn compare_op(op: Operator) -> CompareOp {
    match op {
        Operator::Ne => CompareOp::Ne,
        Operator::Lt => CompareOp::Lt,
        Operator::Le => CompareOp::Le,
        Operator::Gt => CompareOp::Gt,
        Operator::Ge => CompareOp::Ge,
        _ => CompareOp::Eq,
    }
}

/// A single-child AND is its child.
fn flatten(mut children: Vec<Predicate>) -> Predicate {
    if children.len() == 1 {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    Predicate::And(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use serde_json::json;

    fn compile_json(resource_type: &str, value: serde_json::Value) -> Result<CompiledFilter, AppError> {
        let registry = fixtures::registry();
        let node = FilterNode::from_value(resource_type, &value)?;
        compile(&registry, resource_type, &node)
    }

    #[test]
    fn test_and_with_relationship_hop() {
        let compiled = compile_json(
            "user",
            json!({"and": [
                {"name": "age", "op": "ge", "val": 18},
                {"name": "posts.title", "op": "eq", "val": "Hello"}
            ]}),
        )
        .unwrap();
        assert_eq!(compiled.joins.len(), 1);
        let join = compiled.joins.iter().next().unwrap();
        assert_eq!(join.path, "posts");
        assert_eq!(join.parent_alias, "main");
        assert_eq!(join.column, "author_id");
        assert_eq!(compiled.predicate.to_string(), "main.age >= 18 AND posts.title = 'Hello'");
    }

    #[test]
    fn test_same_relationship_joined_once() {
        let compiled = compile_json(
            "user",
            json!([
                {"name": "posts.title", "op": "eq", "val": "Hello"},
                {"name": "posts.body", "op": "is_", "val": null}
            ]),
        )
        .unwrap();
        assert_eq!(compiled.joins.len(), 1);
    }

    #[test]
    fn test_two_hop_path_aliases() {
        let compiled = compile_json(
            "user",
            json!({"name": "posts.comments.text", "op": "icontains", "val": "nice"}),
        )
        .unwrap();
        let aliases: Vec<&str> = compiled.joins.iter().map(|j| j.alias.as_str()).collect();
        assert_eq!(aliases, vec!["posts", "posts__comments"]);
        assert_eq!(
            compiled.predicate.to_string(),
            "posts__comments.text ILIKE '%nice%'"
        );
    }

    #[test]
    fn test_contains_on_integer_rejected() {
        let err = compile_json("user", json!({"name": "age", "op": "contains", "val": "1"})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { ref path, .. } if path == "age"));
    }

    #[test]
    fn test_string_for_integer_is_invalid_type() {
        let err = compile_json("user", json!({"name": "age", "op": "eq", "val": "18"})).unwrap_err();
        assert!(matches!(err, AppError::InvalidType { ref field, .. } if field == "age"));
    }

    #[test]
    fn test_null_rules() {
        let ok = compile_json("user", json!({"name": "age", "op": "eq", "val": null})).unwrap();
        assert_eq!(ok.predicate.to_string(), "main.age IS NULL");
        let ok = compile_json("user", json!({"name": "email", "op": "isnot", "val": null})).unwrap();
        assert_eq!(ok.predicate.to_string(), "main.email IS NOT NULL");

        let err = compile_json("user", json!({"name": "name", "op": "eq", "val": null})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
        let err = compile_json("user", json!({"name": "age", "op": "gt", "val": null})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
        let err = compile_json("user", json!({"name": "email", "op": "is_", "val": "x"})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
    }

    #[test]
    fn test_unknown_segments() {
        let err = compile_json("user", json!({"name": "nope", "op": "eq", "val": 1})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
        let err = compile_json("user", json!({"name": "name.first", "op": "eq", "val": "x"})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { ref path, .. } if path == "name.first"));
        let err = compile_json("post", json!({"name": "author", "op": "eq", "val": 1})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
    }

    #[test]
    fn test_membership_and_between() {
        let compiled = compile_json(
            "user",
            json!({"or": [
                {"name": "id", "op": "in_", "val": [1, 2]},
                {"name": "age", "op": "between", "val": [20, 40]}
            ]}),
        )
        .unwrap();
        assert_eq!(
            compiled.predicate.to_string(),
            "main.id IN (1, 2) OR main.age BETWEEN 20 AND 40"
        );
        let err = compile_json("user", json!({"name": "id", "op": "in", "val": 1})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
    }

    #[test]
    fn test_custom_builders() {
        let compiled = compile_json("user", json!({"name": "name", "op": "lower_equals", "val": "JOHN"})).unwrap();
        assert_eq!(compiled.predicate.to_string(), "lower(main.name) = lower('JOHN')");
        let compiled = compile_json("user", json!({"name": "tags", "op": "jsonb_contains", "val": ["admin"]})).unwrap();
        assert_eq!(compiled.predicate.to_string(), "main.tags @> '[\"admin\"]'::jsonb");
        let err = compile_json("user", json!({"name": "age", "op": "lower_equals", "val": "x"})).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
    }

    #[test]
    fn test_not_wraps_single_child() {
        let compiled = compile_json("user", json!({"not": {"name": "name", "op": "eq", "val": "sam"}})).unwrap();
        assert_eq!(compiled.predicate.to_string(), "NOT (main.name = 'sam')");
    }
}
