//! JSON:API document assembly: primary resource objects, linkage and the `included` side-band.

use crate::config::{Registry, RelationshipDescriptor, ResourceTypeDescriptor};
use crate::entity::{key_string, Entity, Related};
use crate::error::AppError;
use crate::view::{IncludeNode, ViewDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// `fields[type]=a,b`: resource type -> requested field names.
pub type Fieldsets = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(type_: &str, id: &str) -> Self {
        ResourceIdentifier {
            type_: type_.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourceIdentifier>),
    One(Option<ResourceIdentifier>),
}

impl Linkage {
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match self {
            Linkage::One(one) => one.iter().collect(),
            Linkage::Many(many) => many.iter().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipObject {
    pub data: Linkage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipObject>,
}

impl ResourceObject {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(&self.type_, &self.id)
    }
}

/// Primary data plus the deduplicated, sorted `included` resources. `included` is `None`
/// when no include paths were requested.
#[derive(Clone, Debug, PartialEq)]
pub struct Assembled {
    pub primary: Vec<ResourceObject>,
    pub included: Option<Vec<ResourceObject>>,
}

impl Assembled {
    pub fn included(&self) -> &[ResourceObject] {
        self.included.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(Option<ResourceObject>),
    Many(Vec<ResourceObject>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DocumentMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(rename = "totalPages", skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Document {
    pub data: PrimaryData,
    /// Present, possibly empty, whenever includes were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<ResourceObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DocumentMeta>,
}

impl Document {
    pub fn collection(assembled: Assembled, meta: DocumentMeta) -> Self {
        Document {
            data: PrimaryData::Many(assembled.primary),
            included: assembled.included,
            meta: Some(meta),
        }
    }

    pub fn single(assembled: Assembled) -> Self {
        Document {
            data: PrimaryData::One(assembled.primary.into_iter().next()),
            included: assembled.included,
            meta: None,
        }
    }
}

/// Reject sparse fieldsets naming unknown types or fields.
pub fn validate_fieldsets(registry: &Registry, fields: &Fieldsets) -> Result<(), AppError> {
    for (resource_type, names) in fields {
        let resource = registry.get(resource_type).ok_or_else(|| AppError::InvalidField {
            resource_type: resource_type.clone(),
            field: String::new(),
            reason: format!("unknown resource type '{}'", resource_type),
        })?;
        for name in names {
            if resource.attribute(name).is_none() && resource.relationship(name).is_none() {
                return Err(AppError::InvalidField {
                    resource_type: resource_type.clone(),
                    field: name.clone(),
                    reason: format!("{} has no field '{}'", resource_type, name),
                });
            }
        }
    }
    Ok(())
}

/// Resource object with attributes only; relationships are attached by [`assemble`].
pub fn resource_object(resource: &ResourceTypeDescriptor, entity: &Entity, fields: &Fieldsets) -> ResourceObject {
    let wanted = fields.get(&resource.name);
    let attributes = resource
        .exposed_attributes()
        .filter(|a| wanted.map_or(true, |w| w.contains(&a.name)))
        .map(|a| (a.name.clone(), entity.column(&a.column).clone()))
        .collect();
    ResourceObject {
        type_: resource.name.clone(),
        id: entity.id.clone(),
        attributes,
        relationships: BTreeMap::new(),
    }
}

type Key = (String, String);

struct Assembler<'a> {
    registry: &'a Registry,
    fields: &'a Fieldsets,
    /// IncludedIndex: one object per (type, id).
    index: BTreeMap<Key, ResourceObject>,
    /// Linkage gathered per parent, merged into objects at the end.
    links: BTreeMap<Key, BTreeMap<String, Linkage>>,
    walked: BTreeSet<(Key, String)>,
}

impl<'a> Assembler<'a> {
    fn walk(
        &mut self,
        root: &Key,
        resource: &'a ResourceTypeDescriptor,
        entity: &Entity,
        tree: &BTreeMap<String, IncludeNode>,
        path: &str,
    ) -> Result<(), AppError> {
        let key = (entity.resource_type.clone(), entity.id.clone());
        if !self.walked.insert((key.clone(), path.to_string())) {
            return Ok(());
        }
        for (name, node) in tree {
            let relationship = resource.relationship(name).ok_or_else(|| AppError::InvalidInclude {
                resource_type: resource.name.clone(),
                path: join_path(path, name),
                reason: format!("{} has no relationship '{}'", resource.name, name),
            })?;
            let target = self.registry.related(resource, relationship)?;
            let children: Vec<&Entity> = match entity.related.get(name) {
                Some(Related::One(one)) => one.iter().map(|b| b.as_ref()).collect(),
                Some(Related::Many(many)) => many.iter().collect(),
                None => continue,
            };
            let identifiers: Vec<ResourceIdentifier> =
                children.iter().map(|c| linkage_identifier(target, relationship, c)).collect();
            let linkage = if relationship.is_many() {
                Linkage::Many(identifiers)
            } else {
                Linkage::One(identifiers.into_iter().next())
            };
            self.links.entry(key.clone()).or_default().insert(name.clone(), linkage);

            let child_path = join_path(path, name);
            for child in children {
                let child_key = (child.resource_type.clone(), child.id.clone());
                if &child_key != root && !self.index.contains_key(&child_key) {
                    self.index
                        .insert(child_key, resource_object(target, child, self.fields));
                }
                self.walk(root, target, child, &node.children, &child_path)?;
            }
        }
        Ok(())
    }

    fn attach(&self, object: &mut ResourceObject) {
        if let Some(links) = self.links.get(&(object.type_.clone(), object.id.clone())) {
            for (name, linkage) in links {
                object
                    .relationships
                    .insert(name.clone(), RelationshipObject { data: linkage.clone() });
            }
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn linkage_identifier(target: &ResourceTypeDescriptor, relationship: &RelationshipDescriptor, child: &Entity) -> ResourceIdentifier {
    let id = if relationship.id_field == target.id_field {
        child.id.clone()
    } else {
        target
            .attribute(&relationship.id_field)
            .map(|a| key_string(child.column(&a.column)))
            .unwrap_or_else(|| child.id.clone())
    };
    ResourceIdentifier::new(&target.name, &id)
}

/// Build primary objects for `entities` and the `included` side-band for the view's include
/// paths, from relationships the executor already loaded. Each root is left out of the
/// included resources reached from itself.
pub fn assemble(
    registry: &Registry,
    view: &ViewDescriptor,
    entities: &[Entity],
    fields: &Fieldsets,
) -> Result<Assembled, AppError> {
    let resource = registry.require(&view.resource_type)?;
    let mut assembler = Assembler {
        registry,
        fields,
        index: BTreeMap::new(),
        links: BTreeMap::new(),
        walked: BTreeSet::new(),
    };
    let mut primary = Vec::with_capacity(entities.len());
    for entity in entities {
        let root = (entity.resource_type.clone(), entity.id.clone());
        assembler.walked.clear();
        assembler.walk(&root, resource, entity, &view.tree, "")?;
        primary.push(resource_object(resource, entity, fields));
    }

    for object in primary.iter_mut() {
        assembler.attach(object);
    }
    if view.includes.is_empty() {
        return Ok(Assembled { primary, included: None });
    }
    let mut included: Vec<ResourceObject> = assembler.index.values().cloned().collect();
    for object in included.iter_mut() {
        assembler.attach(object);
    }
    Ok(Assembled {
        primary,
        included: Some(included),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fixtures;
    use crate::query::{execute, QueryParams};
    use crate::store::Store;
    use crate::view::build_view;
    use serde_json::json;

    async fn assemble_users(include: &[&str], fields: Fieldsets) -> Assembled {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let view = build_view(&registry, "user", &include).unwrap();
        let result = execute(tx.as_mut(), &registry, &view, &QueryParams::default(), &EngineConfig::default())
            .await
            .unwrap();
        assemble(&registry, &view, &result.entities, &fields).unwrap()
    }

    fn keys(objects: &[ResourceObject]) -> Vec<(String, String)> {
        objects.iter().map(|o| (o.type_.clone(), o.id.clone())).collect()
    }

    fn key(t: &str, id: &str) -> (String, String) {
        (t.to_string(), id.to_string())
    }

    #[tokio::test]
    async fn test_posts_of_disjoint_users_are_not_duplicated() {
        let assembled = assemble_users(&["posts", "posts.comments"], Fieldsets::new()).await;
        let posts = assembled.included().iter().filter(|o| o.type_ == "post").count();
        assert_eq!(posts, 3);
        assert_eq!(
            keys(assembled.included()),
            vec![
                key("comment", "1"),
                key("comment", "2"),
                key("comment", "3"),
                key("comment", "4"),
                key("post", "1"),
                key("post", "2"),
                key("post", "3"),
            ]
        );
        let john = &assembled.primary[0];
        assert_eq!(
            john.relationships["posts"].data,
            Linkage::Many(vec![ResourceIdentifier::new("post", "1"), ResourceIdentifier::new("post", "2")])
        );
        let post1 = &assembled.included()[4];
        assert_eq!(post1.relationships["comments"].data.identifiers().len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_paths_reach_same_resource_once() {
        // john is reachable as root and as author of comments on his own and others' posts.
        let assembled = assemble_users(&["posts.comments.author", "computers.owner"], Fieldsets::new()).await;
        let mut seen = BTreeSet::new();
        for o in assembled.included() {
            assert!(seen.insert((o.type_.clone(), o.id.clone())), "duplicate {:?}", o.id);
        }
    }

    #[tokio::test]
    async fn test_every_linkage_resolves() {
        let assembled = assemble_users(&["posts.comments.author", "posts.author"], Fieldsets::new()).await;
        let included: BTreeSet<ResourceIdentifier> = assembled.included().iter().map(|o| o.identifier()).collect();
        for root in &assembled.primary {
            let own = root.identifier();
            let mut stack: Vec<&ResourceObject> = vec![root];
            let mut visited = BTreeSet::new();
            while let Some(obj) = stack.pop() {
                if !visited.insert(obj.identifier()) {
                    continue;
                }
                for rel in obj.relationships.values() {
                    for id in rel.data.identifiers() {
                        if *id == own {
                            continue;
                        }
                        assert!(included.contains(id), "dangling {:?}", id);
                        if let Some(next) = assembled.included().iter().find(|o| &o.identifier() == id) {
                            stack.push(next);
                        }
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_root_excluded_from_its_own_walk() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "post", &["author.posts".to_string()]).unwrap();
        let entity = crate::query::execute_one(tx.as_mut(), &registry, &view, "1").await.unwrap();
        let assembled = assemble(&registry, &view, &[entity], &Fieldsets::new()).unwrap();
        assert_eq!(keys(assembled.included()), vec![key("post", "2"), key("user", "1")]);
        let author = &assembled.included()[1];
        assert_eq!(author.relationships["posts"].data.identifiers().len(), 2);
    }

    #[tokio::test]
    async fn test_requested_includes_always_emit_included() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "user", &["posts".to_string()]).unwrap();
        let ann = crate::query::execute_one(tx.as_mut(), &registry, &view, "3").await.unwrap();
        let assembled = assemble(&registry, &view, &[ann.clone()], &Fieldsets::new()).unwrap();
        assert_eq!(assembled.included, Some(vec![]));
        let value = serde_json::to_value(Document::single(assembled)).unwrap();
        assert_eq!(value["included"], json!([]));
        assert_eq!(value["data"]["relationships"]["posts"]["data"], json!([]));

        let bare = build_view(&registry, "user", &[]).unwrap();
        let assembled = assemble(&registry, &bare, &[ann], &Fieldsets::new()).unwrap();
        assert!(assembled.included.is_none());
        let value = serde_json::to_value(Document::single(assembled)).unwrap();
        assert!(value.get("included").is_none());
    }

    #[tokio::test]
    async fn test_sparse_fieldsets() {
        let mut fields = Fieldsets::new();
        fields.insert("user".into(), vec!["name".into()]);
        let assembled = assemble_users(&[], fields.clone()).await;
        let attrs: Vec<&String> = assembled.primary[0].attributes.keys().collect();
        assert_eq!(attrs, vec!["name"]);

        let registry = fixtures::registry();
        assert!(validate_fieldsets(&registry, &fields).is_ok());
        fields.insert("user".into(), vec!["password".into()]);
        assert!(matches!(validate_fieldsets(&registry, &fields), Err(AppError::InvalidField { .. })));
    }

    #[test]
    fn test_document_serialization() {
        let object = ResourceObject {
            type_: "user".into(),
            id: "1".into(),
            attributes: json!({"name": "john"}).as_object().cloned().unwrap(),
            relationships: BTreeMap::new(),
        };
        let doc = Document::collection(
            Assembled {
                primary: vec![object],
                included: None,
            },
            DocumentMeta {
                count: Some(1),
                total_pages: None,
            },
        );
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "data": [{"type": "user", "id": "1", "attributes": {"name": "john"}}],
                "meta": {"count": 1}
            })
        );
    }
}
