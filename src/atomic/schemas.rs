//! Wire shapes of the JSON:API Atomic Operations extension.

use crate::document::ResourceObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Deserialize)]
pub struct AtomicOperationRequest {
    #[serde(rename = "atomic:operations")]
    pub operations: Vec<OperationObject>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCode {
    Add,
    Update,
    Remove,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OperationObject {
    pub op: OperationCode,
    #[serde(rename = "ref", default)]
    pub ref_: Option<RefObject>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub data: Option<DataObject>,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RefObject {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lid: Option<String>,
    /// Relationship-level operations name the relationship here; they are rejected.
    #[serde(default)]
    pub relationship: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DataObject {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lid: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipWire>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelationshipWire {
    pub data: WireLinkage,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WireLinkage {
    Many(Vec<IdentifierWire>),
    One(Option<IdentifierWire>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdentifierWire {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lid: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AtomicResults {
    #[serde(rename = "atomic:results")]
    pub results: Vec<OperationResult>,
}

/// `{"data": ...}` for add and update, `{}` for remove.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OperationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResourceObject>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let request: AtomicOperationRequest = serde_json::from_value(json!({
            "atomic:operations": [
                { "op": "add", "data": { "type": "user", "lid": "u1", "attributes": { "name": "kim" } } },
                { "op": "add", "data": { "type": "post", "attributes": { "title": "t" },
                  "relationships": { "author": { "data": { "type": "user", "lid": "u1" } } } } },
                { "op": "remove", "ref": { "type": "post", "id": "1" } }
            ]
        }))
        .unwrap();
        assert_eq!(request.operations.len(), 3);
        assert_eq!(request.operations[0].op, OperationCode::Add);
        let post = request.operations[1].data.as_ref().unwrap();
        assert!(matches!(
            &post.relationships["author"].data,
            WireLinkage::One(Some(IdentifierWire { lid: Some(lid), .. })) if lid == "u1"
        ));
        assert_eq!(request.operations[2].ref_.as_ref().unwrap().id.as_deref(), Some("1"));
    }

    #[test]
    fn test_remove_result_is_empty_object() {
        let results = AtomicResults {
            results: vec![OperationResult::default()],
        };
        assert_eq!(serde_json::to_value(&results).unwrap(), json!({"atomic:results": [{}]}));
    }
}
