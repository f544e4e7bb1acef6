//! Validated atomic operations, converted from the wire request.

use super::schemas::{AtomicOperationRequest, DataObject, IdentifierWire, OperationCode, OperationObject, WireLinkage};
use crate::error::{AppError, BatchError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Add,
    Update,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    Id(String),
    Local(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipRef {
    pub type_: String,
    pub target: RefTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationshipRefs {
    One(Option<RelationshipRef>),
    Many(Vec<RelationshipRef>),
}

/// One step of a batch. For `Add`, `id` is a client-chosen id and `local_id` names the new
/// resource for later operations. For `Update`/`Remove` exactly one of them is the target.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomicOperation {
    pub kind: OperationKind,
    pub resource_type: String,
    pub id: Option<String>,
    pub local_id: Option<String>,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, RelationshipRefs>,
}

impl AtomicOperation {
    pub fn add(resource_type: &str, attributes: Map<String, Value>) -> Self {
        AtomicOperation {
            kind: OperationKind::Add,
            resource_type: resource_type.to_string(),
            id: None,
            local_id: None,
            attributes,
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_local_id(mut self, lid: &str) -> Self {
        self.local_id = Some(lid.to_string());
        self
    }

    pub fn relate(mut self, name: &str, refs: RelationshipRefs) -> Self {
        self.relationships.insert(name.to_string(), refs);
        self
    }
}

fn invalid(index: usize, resource_type: &str, pointer: String, message: &str) -> BatchError {
    BatchError::at(
        index,
        AppError::Validation {
            resource_type: resource_type.to_string(),
            pointer,
            message: message.to_string(),
        },
    )
}

fn exactly_one(id: &Option<String>, lid: &Option<String>) -> Option<RefTarget> {
    match (id, lid) {
        (Some(id), None) => Some(RefTarget::Id(id.clone())),
        (None, Some(lid)) => Some(RefTarget::Local(lid.clone())),
        _ => None,
    }
}

/// `/type` or `/type/id`.
fn parse_href(href: &str) -> Option<(String, Option<String>)> {
    let mut parts = href.trim_matches('/').split('/').filter(|s| !s.is_empty());
    let type_ = parts.next()?.to_string();
    let id = parts.next().map(str::to_string);
    if parts.next().is_some() {
        return None;
    }
    Some((type_, id))
}

fn identifier(index: usize, name: &str, wire: &IdentifierWire) -> Result<RelationshipRef, BatchError> {
    let target = exactly_one(&wire.id, &wire.lid).ok_or_else(|| {
        invalid(
            index,
            &wire.type_,
            format!("/atomic:operations/{}/data/relationships/{}/data", index, name),
            "a resource identifier needs exactly one of id or lid",
        )
    })?;
    Ok(RelationshipRef {
        type_: wire.type_.clone(),
        target,
    })
}

fn relationships(index: usize, data: &DataObject) -> Result<BTreeMap<String, RelationshipRefs>, BatchError> {
    let mut out = BTreeMap::new();
    for (name, rel) in &data.relationships {
        let refs = match &rel.data {
            WireLinkage::One(None) => RelationshipRefs::One(None),
            WireLinkage::One(Some(wire)) => RelationshipRefs::One(Some(identifier(index, name, wire)?)),
            WireLinkage::Many(list) => RelationshipRefs::Many(
                list.iter()
                    .map(|w| identifier(index, name, w))
                    .collect::<Result<_, _>>()?,
            ),
        };
        out.insert(name.clone(), refs);
    }
    Ok(out)
}

fn convert(index: usize, object: OperationObject) -> Result<AtomicOperation, BatchError> {
    let base = format!("/atomic:operations/{}", index);
    let kind = match object.op {
        OperationCode::Add => OperationKind::Add,
        OperationCode::Update => OperationKind::Update,
        OperationCode::Remove => OperationKind::Remove,
    };

    let reference = match (&object.ref_, &object.href) {
        (Some(r), _) => {
            if r.relationship.is_some() {
                return Err(invalid(index, &r.type_, format!("{}/ref", base), "relationship operations are not supported"));
            }
            let target = exactly_one(&r.id, &r.lid)
                .ok_or_else(|| invalid(index, &r.type_, format!("{}/ref", base), "ref needs exactly one of id or lid"))?;
            Some((r.type_.clone(), Some(target)))
        }
        (None, Some(href)) => {
            let (type_, id) = parse_href(href)
                .ok_or_else(|| invalid(index, "", format!("{}/href", base), "href must be /type or /type/id"))?;
            Some((type_, id.map(RefTarget::Id)))
        }
        (None, None) => None,
    };

    if kind == OperationKind::Remove {
        let Some((resource_type, Some(target))) = reference else {
            return Err(invalid(index, "", format!("{}/ref", base), "remove requires a ref with id or lid"));
        };
        let (id, local_id) = split(target);
        return Ok(AtomicOperation {
            kind,
            resource_type,
            id,
            local_id,
            attributes: Map::new(),
            relationships: BTreeMap::new(),
        });
    }

    let Some(data) = object.data else {
        return Err(invalid(index, "", format!("{}/data", base), "data is required"));
    };
    if let Some((ref_type, _)) = &reference {
        if *ref_type != data.type_ {
            return Err(invalid(index, &data.type_, format!("{}/data/type", base), "data type does not match ref"));
        }
    }
    let relationships = relationships(index, &data)?;

    let (id, local_id) = if kind == OperationKind::Add {
        if data.id.is_some() && data.lid.is_some() {
            return Err(invalid(index, &data.type_, format!("{}/data", base), "add takes id or lid, not both"));
        }
        (data.id.clone(), data.lid.clone())
    } else {
        let target = reference
            .and_then(|(_, target)| target)
            .or_else(|| exactly_one(&data.id, &data.lid))
            .ok_or_else(|| invalid(index, &data.type_, format!("{}/data", base), "update needs exactly one of id or lid"))?;
        split(target)
    };

    Ok(AtomicOperation {
        kind,
        resource_type: data.type_,
        id,
        local_id,
        attributes: data.attributes,
        relationships,
    })
}

fn split(target: RefTarget) -> (Option<String>, Option<String>) {
    match target {
        RefTarget::Id(id) => (Some(id), None),
        RefTarget::Local(lid) => (None, Some(lid)),
    }
}

impl AtomicOperationRequest {
    pub fn into_operations(self) -> Result<Vec<AtomicOperation>, BatchError> {
        if self.operations.is_empty() {
            return Err(BatchError::batch(AppError::Validation {
                resource_type: String::new(),
                pointer: "/atomic:operations".into(),
                message: "at least one operation is required".into(),
            }));
        }
        self.operations
            .into_iter()
            .enumerate()
            .map(|(i, object)| convert(i, object))
            .collect()
    }
}
