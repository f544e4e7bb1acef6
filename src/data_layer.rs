//! Per-resource-type writes: attribute coercion and validation, client ids, and
//! foreign-key based relationship updates.

use crate::config::{Registry, RelationshipDescriptor, ResourceTypeDescriptor};
use crate::document::{Linkage, ResourceIdentifier};
use crate::entity::Entity;
use crate::error::AppError;
use crate::query::fetch_by_id;
use crate::sql::{ColumnInfo, ColumnRef, CompareOp, Predicate, SqlValue, MAIN_ALIAS};
use crate::store::StoreTx;
use crate::validation::RequestValidator;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Write payload with every relationship target already resolved to a real id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceInput {
    pub id: Option<String>,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, Linkage>,
}

impl ResourceInput {
    pub fn with_attributes(attributes: Map<String, Value>) -> Self {
        ResourceInput {
            attributes,
            ..Default::default()
        }
    }

    pub fn relate(mut self, name: &str, linkage: Linkage) -> Self {
        self.relationships.insert(name.to_string(), linkage);
        self
    }
}

/// Relationship writes that need the owner row to exist first (foreign key on the target table).
struct RemoteWrite<'a> {
    relationship: &'a RelationshipDescriptor,
    target: &'a ResourceTypeDescriptor,
    ids: Vec<SqlValue>,
}

pub struct DataLayer<'a> {
    registry: &'a Registry,
    resource: &'a ResourceTypeDescriptor,
}

impl<'a> DataLayer<'a> {
    pub fn new(registry: &'a Registry, resource_type: &str) -> Result<Self, AppError> {
        Ok(DataLayer {
            registry,
            resource: registry.require(resource_type)?,
        })
    }

    pub fn resource(&self) -> &'a ResourceTypeDescriptor {
        self.resource
    }

    pub async fn get(&self, tx: &mut dyn StoreTx, id: &str) -> Result<Entity, AppError> {
        fetch_by_id(tx, self.resource, id)
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    pub async fn create(&self, tx: &mut dyn StoreTx, input: &ResourceInput) -> Result<Entity, AppError> {
        let resource = self.resource;
        let mut values = self.attribute_values(&input.attributes)?;
        RequestValidator::validate(resource, &input.attributes)?;
        if let Some(id) = &input.id {
            if !resource.client_can_set_id {
                return Err(AppError::ClientIdNotAllowed {
                    resource_type: resource.name.clone(),
                });
            }
            values.push((resource.id_attribute().column_info(), resource.parse_id(id)?));
        }
        let remote = self.relationship_values(tx, &input.relationships, &mut values).await?;

        let row = tx.insert(&resource.table, &values).await?;
        let entity = Entity::from_row(resource, row);
        for write in &remote {
            self.write_remote(tx, &entity, write, false).await?;
        }
        tracing::debug!(resource_type = %resource.name, id = %entity.id, "created");
        Ok(entity)
    }

    /// Partial update. Listed to-many relationships are replaced: rows no longer listed are
    /// detached.
    pub async fn update(&self, tx: &mut dyn StoreTx, id: &str, input: &ResourceInput) -> Result<Entity, AppError> {
        let resource = self.resource;
        let key = resource.parse_id(id)?;
        if input.id.as_deref().is_some_and(|given| given != id) {
            return Err(AppError::Validation {
                resource_type: resource.name.clone(),
                pointer: "/data/id".into(),
                message: format!("id '{}' does not match the target '{}'", input.id.as_deref().unwrap_or_default(), id),
            });
        }
        let mut values = self.attribute_values(&input.attributes)?;
        RequestValidator::validate_partial(resource, &input.attributes)?;
        let remote = self.relationship_values(tx, &input.relationships, &mut values).await?;

        let row = tx
            .update(&resource.table, &key, &values)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        let entity = Entity::from_row(resource, row);
        for write in &remote {
            self.write_remote(tx, &entity, write, true).await?;
        }
        tracing::debug!(resource_type = %resource.name, id = %entity.id, "updated");
        Ok(entity)
    }

    pub async fn delete(&self, tx: &mut dyn StoreTx, id: &str) -> Result<(), AppError> {
        let key = self.resource.parse_id(id)?;
        if !tx.delete(&self.resource.table, &key).await? {
            return Err(self.not_found(id));
        }
        tracing::debug!(resource_type = %self.resource.name, id = %id, "deleted");
        Ok(())
    }

    fn not_found(&self, id: &str) -> AppError {
        AppError::ObjectNotFound {
            resource_type: self.resource.name.clone(),
            id: id.to_string(),
        }
    }

    fn invalid(&self, pointer: String, message: String) -> AppError {
        AppError::Validation {
            resource_type: self.resource.name.clone(),
            pointer,
            message,
        }
    }

    fn attribute_values(&self, attributes: &Map<String, Value>) -> Result<Vec<(ColumnInfo, SqlValue)>, AppError> {
        let mut values = Vec::with_capacity(attributes.len());
        for (name, value) in attributes {
            let pointer = format!("/data/attributes/{}", name);
            let attribute = match self.resource.attribute(name) {
                Some(a) if a.name != self.resource.id_field => a,
                Some(_) => return Err(self.invalid(pointer, "the id is given as data.id".into())),
                None => {
                    return Err(self.invalid(
                        pointer,
                        format!("{} has no attribute '{}'", self.resource.name, name),
                    ))
                }
            };
            let coerced = if value.is_null() {
                if !attribute.nullable {
                    return Err(self.invalid(pointer, format!("{} may not be null", name)));
                }
                SqlValue::Null
            } else {
                attribute
                    .field_type
                    .coerce(value)
                    .ok_or_else(|| self.invalid(pointer, format!("expected a {} value", attribute.field_type)))?
            };
            values.push((attribute.column_info(), coerced));
        }
        Ok(values)
    }

    /// Resolve relationship linkage. Foreign keys on the owner table are appended to `values`;
    /// the rest is returned for [`Self::write_remote`].
    async fn relationship_values(
        &self,
        tx: &mut dyn StoreTx,
        relationships: &BTreeMap<String, Linkage>,
        values: &mut Vec<(ColumnInfo, SqlValue)>,
    ) -> Result<Vec<RemoteWrite<'a>>, AppError> {
        let mut remote = Vec::new();
        for (name, linkage) in relationships {
            let pointer = format!("/data/relationships/{}", name);
            let relationship = self.resource.relationship(name).ok_or_else(|| {
                self.invalid(
                    pointer.clone(),
                    format!("{} has no relationship '{}'", self.resource.name, name),
                )
            })?;
            let target = self.registry.related(self.resource, relationship)?;
            let identifiers: Vec<&ResourceIdentifier> = match (linkage, relationship.is_many()) {
                (Linkage::Many(ids), true) => ids.iter().collect(),
                (Linkage::One(one), false) => one.iter().collect(),
                (Linkage::One(_), true) => {
                    return Err(self.invalid(pointer, format!("{} expects a list of resource identifiers", name)))
                }
                (Linkage::Many(_), false) => {
                    return Err(self.invalid(pointer, format!("{} expects a single resource identifier", name)))
                }
            };

            let mut related = Vec::with_capacity(identifiers.len());
            for identifier in identifiers {
                if identifier.type_ != target.name {
                    return Err(self.invalid(
                        format!("{}/data", pointer),
                        format!("expected type '{}', got '{}'", target.name, identifier.type_),
                    ));
                }
                let entity = fetch_by_id(tx, target, &identifier.id)
                    .await?
                    .ok_or_else(|| AppError::RelatedObjectNotFound {
                        resource_type: target.name.clone(),
                        relationship: name.clone(),
                        id: identifier.id.clone(),
                    })?;
                related.push(entity);
            }

            let (local, remote_column) = relationship.join_columns(target);
            if relationship.remote_key.is_none() {
                let value = related
                    .first()
                    .map(|e| SqlValue::from_json(e.column(&remote_column)))
                    .unwrap_or(SqlValue::Null);
                values.push((column_info(self.resource, &local), value));
            } else {
                let ids = related
                    .iter()
                    .map(|e| target.parse_id(&e.id))
                    .collect::<Result<Vec<_>, _>>()?;
                remote.push(RemoteWrite {
                    relationship,
                    target,
                    ids,
                });
            }
        }
        Ok(remote)
    }

    /// Point the target rows' foreign key at `owner`. With `replace`, rows currently pointing
    /// at `owner` but not listed are detached first.
    async fn write_remote(
        &self,
        tx: &mut dyn StoreTx,
        owner: &Entity,
        write: &RemoteWrite<'a>,
        replace: bool,
    ) -> Result<(), AppError> {
        let target = write.target;
        let (local, remote) = write.relationship.join_columns(target);
        let owner_key = SqlValue::from_json(owner.column(&local));
        let fk = column_info(target, &remote);
        let fk_ref = ColumnRef::new(MAIN_ALIAS, &fk.name, &fk.pg_type);
        let pk_ref = target.id_attribute().column_ref(MAIN_ALIAS);

        if replace {
            let stale = Predicate::And(vec![
                Predicate::Compare {
                    column: fk_ref,
                    op: CompareOp::Eq,
                    value: owner_key.clone(),
                },
                Predicate::In {
                    column: pk_ref.clone(),
                    values: write.ids.clone(),
                    negated: true,
                },
            ]);
            tx.update_where(&target.table, &stale, &[(fk.clone(), SqlValue::Null)]).await?;
        }
        if !write.ids.is_empty() {
            let listed = Predicate::In {
                column: pk_ref,
                values: write.ids.clone(),
                negated: false,
            };
            tx.update_where(&target.table, &listed, &[(fk, owner_key)]).await?;
        }
        Ok(())
    }
}

fn column_info(resource: &ResourceTypeDescriptor, column: &str) -> ColumnInfo {
    resource.table.column(column).cloned().unwrap_or_else(|| ColumnInfo {
        name: column.to_string(),
        pg_type: "text".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::store::{MemoryStore, Store};
    use serde_json::json;

    fn attrs(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn one(type_: &str, id: &str) -> Linkage {
        Linkage::One(Some(ResourceIdentifier::new(type_, id)))
    }

    fn column_of(store: &MemoryStore, registry: &Registry, type_: &str, id: i64, column: &str) -> Value {
        let table = &registry.require(type_).unwrap().table;
        store
            .rows(table)
            .unwrap()
            .into_iter()
            .find(|r| r["id"] == json!(id))
            .map(|r| r[column].clone())
            .unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_sets_to_one_key() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let users = DataLayer::new(&registry, "user").unwrap();
        let user = users
            .create(tx.as_mut(), &ResourceInput::with_attributes(attrs(json!({"name": "kim", "age": 22}))))
            .await
            .unwrap();
        assert_eq!(user.id, "4");

        let posts = DataLayer::new(&registry, "post").unwrap();
        let input = ResourceInput::with_attributes(attrs(json!({"title": "New"}))).relate("author", one("user", &user.id));
        let post = posts.create(tx.as_mut(), &input).await.unwrap();
        assert_eq!(post.column("author_id"), &json!(4));
        tx.commit().await.unwrap();
        assert_eq!(column_of(&store, &registry, "post", 4, "author_id"), json!(4));
    }

    #[tokio::test]
    async fn test_attribute_errors() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let users = DataLayer::new(&registry, "user").unwrap();

        let err = users
            .create(tx.as_mut(), &ResourceInput::with_attributes(attrs(json!({"name": "x", "nick": "y"}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref pointer, .. } if pointer == "/data/attributes/nick"));

        let err = users
            .create(tx.as_mut(), &ResourceInput::with_attributes(attrs(json!({"name": "x", "age": "old"}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref pointer, .. } if pointer == "/data/attributes/age"));

        let err = users
            .update(tx.as_mut(), "1", &ResourceInput::with_attributes(attrs(json!({"name": null}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_client_ids() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let mut input = ResourceInput::with_attributes(attrs(json!({"name": "kim"})));
        input.id = Some("40".into());
        let err = DataLayer::new(&registry, "user")
            .unwrap()
            .create(tx.as_mut(), &input)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientIdNotAllowed { .. }));

        let mut input = ResourceInput::with_attributes(attrs(json!({"serial": "PC-9"})));
        input.id = Some("9".into());
        let computer = DataLayer::new(&registry, "computer")
            .unwrap()
            .create(tx.as_mut(), &input)
            .await
            .unwrap();
        assert_eq!(computer.id, "9");
    }

    #[tokio::test]
    async fn test_related_checks() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let posts = DataLayer::new(&registry, "post").unwrap();

        let input = ResourceInput::with_attributes(attrs(json!({"title": "t"}))).relate("author", one("user", "99"));
        let err = posts.create(tx.as_mut(), &input).await.unwrap_err();
        assert!(matches!(err, AppError::RelatedObjectNotFound { ref id, .. } if id == "99"));

        let input = ResourceInput::with_attributes(attrs(json!({"title": "t"}))).relate("author", one("post", "1"));
        let err = posts.create(tx.as_mut(), &input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let input = ResourceInput::default().relate("comments", one("comment", "1"));
        let err = posts.update(tx.as_mut(), "1", &input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_to_many_update_replaces() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let input = ResourceInput::default().relate(
            "posts",
            Linkage::Many(vec![ResourceIdentifier::new("post", "2"), ResourceIdentifier::new("post", "3")]),
        );
        DataLayer::new(&registry, "user")
            .unwrap()
            .update(tx.as_mut(), "1", &input)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(column_of(&store, &registry, "post", 1, "author_id"), Value::Null);
        assert_eq!(column_of(&store, &registry, "post", 2, "author_id"), json!(1));
        assert_eq!(column_of(&store, &registry, "post", 3, "author_id"), json!(1));
    }

    #[tokio::test]
    async fn test_reverse_to_one_points_target_back() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let users = DataLayer::new(&registry, "user").unwrap();

        let mut tx = store.begin().await.unwrap();
        let input = ResourceInput::default().relate("computer", one("computer", "1"));
        users.update(tx.as_mut(), "2", &input).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(column_of(&store, &registry, "computer", 1, "user_id"), json!(2));

        let mut tx = store.begin().await.unwrap();
        let input = ResourceInput::default().relate("computer", Linkage::One(None));
        users.update(tx.as_mut(), "2", &input).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(column_of(&store, &registry, "computer", 1, "user_id"), Value::Null);
    }

    #[tokio::test]
    async fn test_missing_targets() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let users = DataLayer::new(&registry, "user").unwrap();
        let err = users
            .update(tx.as_mut(), "99", &ResourceInput::with_attributes(attrs(json!({"age": 1}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ObjectNotFound { .. }));
        assert!(matches!(users.delete(tx.as_mut(), "99").await, Err(AppError::ObjectNotFound { .. })));
        users.delete(tx.as_mut(), "3").await.unwrap();
        assert!(matches!(users.get(tx.as_mut(), "3").await, Err(AppError::ObjectNotFound { .. })));
    }
}
