//! Filter tree as parsed from the `filter` query parameter.

use crate::error::AppError;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

impl LogicOp {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "and" => Some(LogicOp::And),
            "or" => Some(LogicOp::Or),
            "not" => Some(LogicOp::Not),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterNode {
    Combinator {
        kind: LogicOp,
        children: Vec<FilterNode>,
    },
    Predicate {
        /// Dotted path; leading segments are relationship names.
        field_path: String,
        operator: String,
        value: Value,
    },
}

impl FilterNode {
    /// `filter[field]=value`: plain equality.
    pub fn simple(field_path: &str, value: Value) -> Self {
        FilterNode::Predicate {
            field_path: field_path.to_string(),
            operator: "eq".into(),
            value,
        }
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        FilterNode::Combinator {
            kind: LogicOp::And,
            children,
        }
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        FilterNode::Combinator {
            kind: LogicOp::Or,
            children,
        }
    }

    pub fn not(child: FilterNode) -> Self {
        FilterNode::Combinator {
            kind: LogicOp::Not,
            children: vec![child],
        }
    }

    /// Parse the wire form, reporting problems as `InvalidFilter` on `resource_type`.
    pub fn from_value(resource_type: &str, value: &Value) -> Result<Self, AppError> {
        parse_node(value).map_err(|(path, reason)| AppError::InvalidFilter {
            resource_type: resource_type.to_string(),
            path,
            reason,
        })
    }

    /// Parse the raw JSON text of a `filter` query parameter.
    pub fn parse(resource_type: &str, raw: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| AppError::InvalidFilter {
            resource_type: resource_type.to_string(),
            path: String::new(),
            reason: format!("filter is not valid JSON: {}", e),
        })?;
        FilterNode::from_value(resource_type, &value)
    }
}

type ParseError = (String, String);

fn parse_node(value: &Value) -> Result<FilterNode, ParseError> {
    match value {
        Value::Array(items) => Ok(FilterNode::and(
            items.iter().map(parse_node).collect::<Result<_, _>>()?,
        )),
        Value::Object(obj) if obj.contains_key("name") => parse_terminal(obj),
        Value::Object(obj) => parse_logic(obj),
        other => Err((String::new(), format!("expected a filter object or list, got {}", other))),
    }
}

fn parse_logic(obj: &Map<String, Value>) -> Result<FilterNode, ParseError> {
    if obj.len() != 1 {
        return Err((
            String::new(),
            "a logic filter must have exactly one of 'and', 'or', 'not'".into(),
        ));
    }
    let Some((key, inner)) = obj.iter().next() else {
        return Err((String::new(), "empty filter object".into()));
    };
    let kind = LogicOp::from_key(key)
        .ok_or_else(|| (String::new(), format!("unknown logic operator '{}'", key)))?;
    match kind {
        LogicOp::Not => Ok(FilterNode::not(parse_node(inner)?)),
        LogicOp::And | LogicOp::Or => {
            let Value::Array(items) = inner else {
                return Err((String::new(), format!("'{}' expects a list of filters", key)));
            };
            let children = items.iter().map(parse_node).collect::<Result<_, _>>()?;
            Ok(FilterNode::Combinator { kind, children })
        }
    }
}

fn parse_terminal(obj: &Map<String, Value>) -> Result<FilterNode, ParseError> {
    let Some(Value::String(name)) = obj.get("name") else {
        return Err((String::new(), "'name' must be a string".into()));
    };
    let operator = match obj.get("op") {
        Some(Value::String(op)) => op.clone(),
        Some(_) => return Err((name.clone(), "'op' must be a string".into())),
        None => return Err((name.clone(), "missing 'op'".into())),
    };
    Ok(FilterNode::Predicate {
        field_path: name.clone(),
        operator,
        value: obj.get("val").cloned().unwrap_or(Value::Null),
    })
}

impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse_node(&value).map_err(|(path, reason)| {
            if path.is_empty() {
                serde::de::Error::custom(reason)
            } else {
                serde::de::Error::custom(format!("{}: {}", path, reason))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wire_form() {
        let node: FilterNode = serde_json::from_value(json!({
            "and": [
                { "name": "age", "op": "ge", "val": 18 },
                { "not": { "name": "name", "op": "eq", "val": "sam" } }
            ]
        }))
        .unwrap();
        let FilterNode::Combinator { kind, children } = node else {
            panic!("expected combinator");
        };
        assert_eq!(kind, LogicOp::And);
        assert_eq!(children.len(), 2);
        assert!(matches!(children[1], FilterNode::Combinator { kind: LogicOp::Not, .. }));
    }

    #[test]
    fn test_list_is_implicit_and() {
        let node = FilterNode::from_value("user", &json!([{ "name": "age", "op": "gt", "val": 1 }])).unwrap();
        assert!(matches!(node, FilterNode::Combinator { kind: LogicOp::And, ref children } if children.len() == 1));
    }

    #[test]
    fn test_logic_object_with_two_keys_rejected() {
        let err = FilterNode::from_value("user", &json!({ "and": [], "or": [] })).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
        let err = FilterNode::parse("user", "{\"xor\": []}").unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter { .. }));
    }
}
