//! Attribute validation from feed rules.

use crate::config::{ResourceTypeDescriptor, ValidationRule};
use crate::error::AppError;
use regex::Regex;
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a create body. Required fields must be present and non-null.
    pub fn validate(resource: &ResourceTypeDescriptor, body: &Map<String, Value>) -> Result<(), AppError> {
        for attribute in resource.exposed_attributes() {
            let val = body.get(&attribute.name);
            let missing = val.map_or(true, Value::is_null);
            let rule = attribute.validation.as_ref();
            if missing && rule.and_then(|r| r.required) == Some(true) {
                return Err(invalid(resource, &attribute.name, format!("{} is required", attribute.name)));
            }
            if val.is_none() && !attribute.nullable && !attribute.has_default {
                return Err(invalid(resource, &attribute.name, format!("{} is required", attribute.name)));
            }
            if let (Some(v), Some(rule)) = (val, rule) {
                validate_field(resource, &attribute.name, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for updates). Required is not enforced for
    /// missing fields, but an explicit null still violates it.
    pub fn validate_partial(resource: &ResourceTypeDescriptor, body: &Map<String, Value>) -> Result<(), AppError> {
        for (name, v) in body {
            let Some(rule) = resource.attribute(name).and_then(|a| a.validation.as_ref()) else {
                continue;
            };
            if v.is_null() && rule.required == Some(true) {
                return Err(invalid(resource, name, format!("{} is required", name)));
            }
            validate_field(resource, name, v, rule)?;
        }
        Ok(())
    }
}

fn invalid(resource: &ResourceTypeDescriptor, field: &str, message: String) -> AppError {
    AppError::Validation {
        resource_type: resource.name.clone(),
        pointer: format!("/data/attributes/{}", field),
        message,
    }
}

fn validate_field(resource: &ResourceTypeDescriptor, col: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(resource, col, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(invalid(resource, col, format!("{} must be at most {} characters", col, max)));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(invalid(resource, col, format!("{} must be at least {} characters", col, min)));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern).map_err(|_| invalid(resource, col, format!("invalid pattern for {}", col)))?;
            if !re.is_match(s) {
                return Err(invalid(resource, col, format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(invalid(
                resource,
                col,
                format!("{} must be one of: {:?}", col, allowed.iter().take(5).collect::<Vec<_>>()),
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(invalid(resource, col, format!("{} must be at least {}", col, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(invalid(resource, col, format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(resource: &ResourceTypeDescriptor, col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = s.len() >= 3 && s.split_once('@').is_some_and(|(user, host)| !user.is_empty() && !host.is_empty());
            if !valid {
                return Err(invalid(resource, col, format!("{} must be a valid email", col)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(invalid(resource, col, format!("{} must be a valid UUID", col)));
            }
        }
        _ => {}
    }
    Ok(())
}
