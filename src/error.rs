//! Typed errors and HTTP mapping.

use crate::config::FieldType;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid id field: resource type {resource_type} has no attribute '{field}'")]
    InvalidPrimaryKey { resource_type: String, field: String },
    #[error("duplicate resource type: {0}")]
    DuplicateResourceType(String),
    #[error("duplicate field '{field}' on resource type {resource_type}")]
    DuplicateField { resource_type: String, field: String },
    #[error("unknown type '{type_name}' for {resource_type}.{field}")]
    UnknownFieldType {
        resource_type: String,
        field: String,
        type_name: String,
    },
    #[error("unknown filter builder '{name}' for {resource_type}.{field}")]
    UnknownFilterBuilder {
        resource_type: String,
        field: String,
        name: String,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("unsupported by storage backend: {0}")]
    Unsupported(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("relationship {resource_type}.{relationship} targets unknown resource type '{target}'")]
    UnknownRelationshipTarget {
        resource_type: String,
        relationship: String,
        target: String,
    },
    #[error("invalid filter on {resource_type} at '{path}': {reason}")]
    InvalidFilter {
        resource_type: String,
        path: String,
        reason: String,
    },
    #[error("invalid sort on {resource_type} at '{path}': {reason}")]
    InvalidSort {
        resource_type: String,
        path: String,
        reason: String,
    },
    #[error("invalid include on {resource_type} at '{path}': {reason}")]
    InvalidInclude {
        resource_type: String,
        path: String,
        reason: String,
    },
    #[error("invalid field '{field}' for {resource_type}: {reason}")]
    InvalidField {
        resource_type: String,
        field: String,
        reason: String,
    },
    #[error("can't cast value {value} to {expected} for {resource_type}.{field}")]
    InvalidType {
        resource_type: String,
        field: String,
        expected: FieldType,
        value: Value,
    },
    #[error("invalid {parameter}: {reason}")]
    InvalidPage { parameter: &'static str, reason: String },
    #[error("invalid id '{id}' for {resource_type}")]
    InvalidId { resource_type: String, id: String },
    #[error("operation {operation_index}: local id '{local_id}' is not defined by a previous operation")]
    UnresolvedLocalId {
        operation_index: usize,
        local_id: String,
    },
    #[error("{resource_type} #{id} not found")]
    ObjectNotFound { resource_type: String, id: String },
    #[error("related {resource_type} #{id} for relationship '{relationship}' not found")]
    RelatedObjectNotFound {
        resource_type: String,
        relationship: String,
        id: String,
    },
    #[error("client-generated ids are not allowed for {resource_type}")]
    ClientIdNotAllowed { resource_type: String },
    #[error("validation on {resource_type} at {pointer}: {message}")]
    Validation {
        resource_type: String,
        pointer: String,
        message: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Storage(StorageError::Db(e))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::UnknownRelationshipTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownResourceType(_) => StatusCode::NOT_FOUND,
            AppError::InvalidFilter { .. }
            | AppError::InvalidSort { .. }
            | AppError::InvalidInclude { .. }
            | AppError::InvalidField { .. }
            | AppError::InvalidPage { .. }
            | AppError::InvalidId { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidType { .. } => StatusCode::CONFLICT,
            AppError::UnresolvedLocalId { .. } | AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ObjectNotFound { .. } | AppError::RelatedObjectNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ClientIdNotAllowed { .. } => StatusCode::FORBIDDEN,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::UnknownResourceType(_) => "unknown_resource_type",
            AppError::UnknownRelationshipTarget { .. } => "unknown_relationship_target",
            AppError::InvalidFilter { .. } => "invalid_filter",
            AppError::InvalidSort { .. } => "invalid_sort",
            AppError::InvalidInclude { .. } => "invalid_include",
            AppError::InvalidField { .. } => "invalid_field",
            AppError::InvalidType { .. } => "invalid_type",
            AppError::InvalidPage { .. } => "invalid_page",
            AppError::InvalidId { .. } => "invalid_id",
            AppError::UnresolvedLocalId { .. } => "unresolved_local_id",
            AppError::ObjectNotFound { .. } => "not_found",
            AppError::RelatedObjectNotFound { .. } => "related_not_found",
            AppError::ClientIdNotAllowed { .. } => "client_id_not_allowed",
            AppError::Validation { .. } => "validation_error",
            AppError::Storage(_) => "storage_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AppError::InvalidFilter { .. } => "Invalid filters querystring parameter.",
            AppError::InvalidSort { .. } => "Invalid sort querystring parameter.",
            AppError::InvalidInclude { .. } => "Invalid include querystring parameter.",
            AppError::InvalidField { .. } => "Invalid fields querystring parameter.",
            AppError::InvalidType { .. } => "Invalid type.",
            AppError::InvalidPage { .. } => "Invalid page querystring parameter.",
            AppError::ObjectNotFound { .. } => "Resource not found.",
            AppError::RelatedObjectNotFound { .. } => "Related object not found.",
            AppError::UnresolvedLocalId { .. } => "Unresolved local id.",
            AppError::ClientIdNotAllowed { .. } => "Forbidden",
            AppError::Validation { .. } => "Validation error.",
            _ => "Internal server error.",
        }
    }

    /// Where the problem is located in the request, as a JSON:API `source` member.
    pub fn source_location(&self) -> Option<ErrorSource> {
        match self {
            AppError::InvalidFilter { .. } | AppError::InvalidType { .. } => Some(ErrorSource::parameter("filter")),
            AppError::InvalidSort { .. } => Some(ErrorSource::parameter("sort")),
            AppError::InvalidInclude { .. } => Some(ErrorSource::parameter("include")),
            AppError::InvalidField { resource_type, .. } => {
                Some(ErrorSource::parameter(&format!("fields[{}]", resource_type)))
            }
            AppError::InvalidPage { parameter, .. } => Some(ErrorSource::parameter(parameter)),
            AppError::Validation { pointer, .. } => Some(ErrorSource::pointer(pointer)),
            AppError::RelatedObjectNotFound { relationship, .. } => Some(ErrorSource::pointer(&format!(
                "/data/relationships/{}",
                relationship
            ))),
            AppError::ClientIdNotAllowed { .. } => Some(ErrorSource::pointer("/data/id")),
            _ => None,
        }
    }

    fn to_error_object(&self, operation_index: Option<usize>) -> ErrorObject {
        let detail = match self {
            // Storage details stay in the logs.
            AppError::Storage(_) | AppError::Config(_) => None,
            other => Some(other.to_string()),
        };
        ErrorObject {
            status: self.status().as_u16().to_string(),
            code: self.code().to_string(),
            title: self.title().to_string(),
            detail,
            source: self.source_location(),
            meta: operation_index.map(|i| serde_json::json!({ "operationIndex": i })),
        }
    }
}

/// Atomic batch failure: which operation failed and why. The batch has been rolled back.
#[derive(Error, Debug)]
#[error("{}", describe_batch_error(.operation_index, .source))]
pub struct BatchError {
    pub operation_index: Option<usize>,
    #[source]
    pub source: AppError,
}

fn describe_batch_error(index: &Option<usize>, source: &AppError) -> String {
    match index {
        Some(i) => format!("atomic operation {} failed: {}", i, source),
        None => format!("atomic batch failed: {}", source),
    }
}

impl BatchError {
    pub fn at(operation_index: usize, source: AppError) -> Self {
        BatchError {
            operation_index: Some(operation_index),
            source,
        }
    }

    pub fn batch(source: AppError) -> Self {
        BatchError {
            operation_index: None,
            source,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub errors: Vec<ErrorObject>,
}

#[derive(Serialize, Debug)]
pub struct ErrorObject {
    pub status: String,
    pub code: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl ErrorSource {
    fn pointer(p: &str) -> Self {
        ErrorSource {
            pointer: Some(p.to_string()),
            parameter: None,
        }
    }

    fn parameter(p: &str) -> Self {
        ErrorSource {
            pointer: None,
            parameter: Some(p.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Storage(_) | AppError::Config(_)) {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            errors: vec![self.to_error_object(None)],
        };
        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        if matches!(self.source, AppError::Storage(_) | AppError::Config(_)) {
            tracing::error!(error = %self, "atomic batch failed");
        }
        let body = ErrorBody {
            errors: vec![self.source.to_error_object(self.operation_index)],
        };
        (self.source.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_errors_are_client_errors() {
        let err = AppError::InvalidFilter {
            resource_type: "user".into(),
            path: "age".into(),
            reason: "operator 'contains' is not supported for integer fields".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.source_location(), Some(ErrorSource::parameter("filter")));
    }

    #[test]
    fn test_storage_errors_hide_detail() {
        let err = AppError::Storage(StorageError::Unavailable("connection refused".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let obj = err.to_error_object(None);
        assert!(obj.detail.is_none());
    }

    #[test]
    fn test_batch_error_carries_operation_index() {
        let err = BatchError::at(
            0,
            AppError::UnresolvedLocalId {
                operation_index: 0,
                local_id: "u1".into(),
            },
        );
        let obj = err.source.to_error_object(err.operation_index);
        assert_eq!(obj.status, "422");
        assert_eq!(obj.meta, Some(serde_json::json!({ "operationIndex": 0 })));
        assert!(err.to_string().starts_with("atomic operation 0 failed"));
    }
}
