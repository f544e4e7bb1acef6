//! Default operator table and built-in custom predicate builders.

use crate::config::{AttributeDescriptor, FieldType};
use crate::sql::{ColumnRef, Predicate, SqlValue};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    NotILike,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Wire names, including the aliases clients commonly send.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" | "==" => Operator::Eq,
            "ne" | "!=" => Operator::Ne,
            "lt" => Operator::Lt,
            "le" => Operator::Le,
            "gt" => Operator::Gt,
            "ge" => Operator::Ge,
            "between" => Operator::Between,
            "in" | "in_" => Operator::In,
            "notin" | "notin_" | "not_in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "notlike" => Operator::NotLike,
            "notilike" => Operator::NotILike,
            "contains" => Operator::Contains,
            "icontains" => Operator::IContains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "is_" | "is" => Operator::IsNull,
            "isnot" | "is_not" => Operator::IsNotNull,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Between => "between",
            Operator::In => "in",
            Operator::NotIn => "notin",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::NotLike => "notlike",
            Operator::NotILike => "notilike",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::IsNull => "is_",
            Operator::IsNotNull => "isnot",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Between
        )
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::ILike
                | Operator::NotLike
                | Operator::NotILike
                | Operator::Contains
                | Operator::IContains
                | Operator::StartsWith
                | Operator::EndsWith
        )
    }

    pub fn is_null_check(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// Whether the operator is legal for a field of this type. Null checks are gated on
    /// nullability by the compiler, not here.
    pub fn supports(&self, field_type: FieldType) -> bool {
        if self.is_ordering() {
            field_type.is_ordered()
        } else if self.is_pattern() {
            field_type == FieldType::Text
        } else {
            true
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Escape LIKE metacharacters so user text matches literally.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Backend-specific predicate for one field, selected by operator name. Bypasses the default
/// operator table, including coercion.
pub trait PredicateBuilder: Send + Sync + fmt::Debug {
    fn build(&self, column: &ColumnRef, attribute: &AttributeDescriptor, value: &Value) -> Result<Predicate, String>;
}

/// `lower(col) = lower(value)`.
#[derive(Debug)]
pub struct LowerEquals;

impl PredicateBuilder for LowerEquals {
    fn build(&self, column: &ColumnRef, _attribute: &AttributeDescriptor, value: &Value) -> Result<Predicate, String> {
        let Value::String(s) = value else {
            return Err("lower_equals expects a string".into());
        };
        Ok(Predicate::Custom {
            column: column.clone(),
            template: "lower({col}) = lower({})".into(),
            params: vec![SqlValue::Text(s.clone())],
        })
    }
}

/// `col @> value::jsonb`.
#[derive(Debug)]
pub struct JsonbContains;

impl PredicateBuilder for JsonbContains {
    fn build(&self, column: &ColumnRef, attribute: &AttributeDescriptor, value: &Value) -> Result<Predicate, String> {
        if attribute.field_type != FieldType::Json {
            return Err(format!("jsonb_contains needs a json field, {} is {}", attribute.name, attribute.field_type));
        }
        if value.is_null() {
            return Err("jsonb_contains expects a value".into());
        }
        Ok(Predicate::Custom {
            column: column.clone(),
            template: "{col} @> {}::jsonb".into(),
            params: vec![SqlValue::Json(value.clone())],
        })
    }
}

pub fn builtin_builder(name: &str) -> Option<Arc<dyn PredicateBuilder>> {
    match name {
        "lower_equals" => Some(Arc::new(LowerEquals)),
        "jsonb_contains" => Some(Arc::new(JsonbContains)),
        _ => None,
    }
}

pub fn is_builtin_builder(name: &str) -> bool {
    matches!(name, "lower_equals" | "jsonb_contains")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(Operator::parse("=="), Some(Operator::Eq));
        assert_eq!(Operator::parse("not_in"), Some(Operator::NotIn));
        assert_eq!(Operator::parse("is"), Some(Operator::IsNull));
        assert_eq!(Operator::parse("matches"), None);
    }

    #[test]
    fn test_supports() {
        assert!(!Operator::Contains.supports(FieldType::Integer));
        assert!(Operator::Contains.supports(FieldType::Text));
        assert!(Operator::Ge.supports(FieldType::Timestamp));
        assert!(!Operator::Ge.supports(FieldType::Boolean));
        assert!(Operator::In.supports(FieldType::Uuid));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
