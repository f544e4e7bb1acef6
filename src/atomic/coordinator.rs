//! Runs a batch of operations in one transaction, resolving local ids in list order.

use super::local_ids::LocalIdTable;
use super::operation::{AtomicOperation, OperationKind, RefTarget, RelationshipRef, RelationshipRefs};
use super::schemas::{AtomicResults, OperationResult};
use crate::config::Registry;
use crate::data_layer::{DataLayer, ResourceInput};
use crate::document::{resource_object, Fieldsets, Linkage, ResourceIdentifier};
use crate::error::{AppError, BatchError};
use crate::store::{Store, StoreTx};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Committed,
    RolledBack,
}

pub struct Coordinator<'a> {
    registry: &'a Registry,
    store: &'a dyn Store,
    state: BatchState,
}

impl<'a> Coordinator<'a> {
    pub fn new(registry: &'a Registry, store: &'a dyn Store) -> Self {
        Coordinator {
            registry,
            store,
            state: BatchState::Pending,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Apply `operations` in order. Either all of them are committed or none are visible.
    pub async fn run(&mut self, operations: &[AtomicOperation]) -> Result<AtomicResults, BatchError> {
        let mut tx = self.store.begin().await.map_err(|e| BatchError::batch(e.into()))?;
        self.state = BatchState::Running;
        let mut local_ids = LocalIdTable::new();
        let mut results = Vec::with_capacity(operations.len());

        for (index, operation) in operations.iter().enumerate() {
            match self.apply(tx.as_mut(), &mut local_ids, index, operation).await {
                Ok(result) => results.push(result),
                Err(source) => {
                    tracing::warn!(operation_index = index, error = %source, "atomic batch rolled back");
                    self.state = BatchState::RolledBack;
                    if let Err(e) = tx.rollback().await {
                        tracing::warn!(error = %e, "rollback failed");
                    }
                    return Err(BatchError::at(index, source));
                }
            }
        }

        if let Err(e) = tx.commit().await {
            tracing::warn!(error = %e, "atomic batch commit failed");
            self.state = BatchState::RolledBack;
            return Err(BatchError::batch(e.into()));
        }
        self.state = BatchState::Committed;
        tracing::info!(operations = operations.len(), local_ids = local_ids.len(), "atomic batch committed");
        Ok(AtomicResults { results })
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        local_ids: &mut LocalIdTable,
        index: usize,
        operation: &AtomicOperation,
    ) -> Result<OperationResult, AppError> {
        let layer = DataLayer::new(self.registry, &operation.resource_type)?;
        let resource = layer.resource();

        match operation.kind {
            OperationKind::Add => {
                let input = ResourceInput {
                    id: operation.id.clone(),
                    attributes: operation.attributes.clone(),
                    relationships: resolve_relationships(local_ids, index, &operation.relationships)?,
                };
                let entity = layer.create(tx, &input).await?;
                if let Some(lid) = &operation.local_id {
                    local_ids.define(lid, &resource.name, &entity.id)?;
                }
                Ok(OperationResult {
                    data: Some(resource_object(resource, &entity, &Fieldsets::new())),
                })
            }
            OperationKind::Update => {
                let id = target_id(local_ids, index, operation)?;
                let input = ResourceInput {
                    id: None,
                    attributes: operation.attributes.clone(),
                    relationships: resolve_relationships(local_ids, index, &operation.relationships)?,
                };
                let entity = layer.update(tx, &id, &input).await?;
                Ok(OperationResult {
                    data: Some(resource_object(resource, &entity, &Fieldsets::new())),
                })
            }
            OperationKind::Remove => {
                let id = target_id(local_ids, index, operation)?;
                layer.delete(tx, &id).await?;
                Ok(OperationResult::default())
            }
        }
    }
}

fn target_id(local_ids: &LocalIdTable, index: usize, operation: &AtomicOperation) -> Result<String, AppError> {
    match (&operation.id, &operation.local_id) {
        (Some(id), _) => Ok(id.clone()),
        (None, Some(lid)) => Ok(local_ids.resolve(index, lid, &operation.resource_type)?.to_string()),
        (None, None) => Err(AppError::Validation {
            resource_type: operation.resource_type.clone(),
            pointer: format!("/atomic:operations/{}/ref", index),
            message: "operation has no target".into(),
        }),
    }
}

fn resolve_ref(local_ids: &LocalIdTable, index: usize, reference: &RelationshipRef) -> Result<ResourceIdentifier, AppError> {
    let id = match &reference.target {
        RefTarget::Id(id) => id.clone(),
        RefTarget::Local(lid) => local_ids.resolve(index, lid, &reference.type_)?.to_string(),
    };
    Ok(ResourceIdentifier::new(&reference.type_, &id))
}

fn resolve_relationships(
    local_ids: &LocalIdTable,
    index: usize,
    relationships: &BTreeMap<String, RelationshipRefs>,
) -> Result<BTreeMap<String, Linkage>, AppError> {
    relationships
        .iter()
        .map(|(name, refs)| {
            let linkage = match refs {
                RelationshipRefs::One(None) => Linkage::One(None),
                RelationshipRefs::One(Some(r)) => Linkage::One(Some(resolve_ref(local_ids, index, r)?)),
                RelationshipRefs::Many(list) => Linkage::Many(
                    list.iter()
                        .map(|r| resolve_ref(local_ids, index, r))
                        .collect::<Result<_, _>>()?,
                ),
            };
            Ok((name.clone(), linkage))
        })
        .collect()
}
