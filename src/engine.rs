//! Engine instance: registry, store, settings and view cache behind one handle.

use crate::atomic::{AtomicOperationRequest, AtomicResults, Coordinator};
use crate::config::{EngineConfig, Registry, ResourceTypeDescriptor};
use crate::data_layer::{DataLayer, ResourceInput};
use crate::document::{self, validate_fieldsets, Assembled, Document, DocumentMeta, Fieldsets};
use crate::entity::Entity;
use crate::error::{AppError, BatchError};
use crate::query::{self, QueryParams};
use crate::store::Store;
use crate::view::{ViewCache, ViewDescriptor};
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    config: Arc<EngineConfig>,
    views: Arc<ViewCache>,
}

impl Engine {
    pub fn new(registry: Registry, store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let views = Arc::new(ViewCache::new(config.view_cache_capacity));
        Engine {
            registry: Arc::new(registry),
            store,
            config: Arc::new(config),
            views,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    fn view(&self, resource_type: &str, include: &[String]) -> Result<Arc<ViewDescriptor>, AppError> {
        for path in include {
            let depth = path.split('.').count();
            if depth > self.config.max_include_depth {
                return Err(AppError::InvalidInclude {
                    resource_type: resource_type.to_string(),
                    path: path.clone(),
                    reason: format!(
                        "include depth {} exceeds the maximum of {}",
                        depth, self.config.max_include_depth
                    ),
                });
            }
        }
        self.views.get_or_build(&self.registry, resource_type, include)
    }

    /// Filtered, sorted, paged collection with its `included` resources and count meta.
    pub async fn fetch_collection(&self, resource_type: &str, params: &QueryParams) -> Result<Document, AppError> {
        let view = self.view(resource_type, &params.include)?;
        validate_fieldsets(&self.registry, &params.fields)?;

        let mut tx = self.store.begin().await?;
        let result = query::execute(tx.as_mut(), &self.registry, &view, params, &self.config).await?;
        tx.rollback().await?;

        let assembled = document::assemble(&self.registry, &view, &result.entities, &params.fields)?;
        let meta = DocumentMeta {
            count: result.total,
            total_pages: result.total_pages(),
        };
        Ok(Document::collection(assembled, meta))
    }

    pub async fn fetch_one(
        &self,
        resource_type: &str,
        id: &str,
        include: &[String],
        fields: &Fieldsets,
    ) -> Result<Document, AppError> {
        let view = self.view(resource_type, include)?;
        validate_fieldsets(&self.registry, fields)?;

        let mut tx = self.store.begin().await?;
        let entity = query::execute_one(tx.as_mut(), &self.registry, &view, id).await?;
        tx.rollback().await?;

        let assembled = document::assemble(&self.registry, &view, std::slice::from_ref(&entity), fields)?;
        Ok(Document::single(assembled))
    }

    pub async fn create(&self, resource_type: &str, input: &ResourceInput) -> Result<Document, AppError> {
        let layer = DataLayer::new(&self.registry, resource_type)?;
        let mut tx = self.store.begin().await?;
        let entity = layer.create(tx.as_mut(), input).await?;
        tx.commit().await?;
        Ok(single(layer.resource(), &entity))
    }

    pub async fn update(&self, resource_type: &str, id: &str, input: &ResourceInput) -> Result<Document, AppError> {
        let layer = DataLayer::new(&self.registry, resource_type)?;
        let mut tx = self.store.begin().await?;
        let entity = layer.update(tx.as_mut(), id, input).await?;
        tx.commit().await?;
        Ok(single(layer.resource(), &entity))
    }

    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<(), AppError> {
        let layer = DataLayer::new(&self.registry, resource_type)?;
        let mut tx = self.store.begin().await?;
        layer.delete(tx.as_mut(), id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn run_atomic(&self, request: AtomicOperationRequest) -> Result<AtomicResults, BatchError> {
        let operations = request.into_operations()?;
        Coordinator::new(&self.registry, self.store.as_ref())
            .run(&operations)
            .await
    }
}

fn single(resource: &ResourceTypeDescriptor, entity: &Entity) -> Document {
    Document::single(Assembled {
        primary: vec![document::resource_object(resource, entity, &Fieldsets::new())],
        included: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PrimaryData;
    use crate::filter::FilterNode;
    use crate::fixtures;
    use crate::query::Pagination;
    use serde_json::{json, Value};

    fn engine() -> Engine {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        Engine::new(registry, Arc::new(store), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_fetch_collection_document() {
        let engine = engine();
        let params = QueryParams {
            filter: Some(FilterNode::simple("name", json!("john"))),
            include: vec!["posts".into()],
            page: Pagination::new(10, 1),
            ..Default::default()
        };
        let doc = engine.fetch_collection("user", &params).await.unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["meta"], json!({"count": 1, "totalPages": 1}));
        assert_eq!(value["data"][0]["id"], json!("1"));
        assert_eq!(
            value["data"][0]["relationships"]["posts"]["data"],
            json!([{"type": "post", "id": "1"}, {"type": "post", "id": "2"}])
        );
        assert_eq!(value["included"].as_array().unwrap().len(), 2);
        assert_eq!(engine.views().len(), 1);
    }

    #[tokio::test]
    async fn test_include_depth_guard() {
        let engine = engine();
        let params = QueryParams {
            include: vec!["posts.comments.post.author".into()],
            ..Default::default()
        };
        let err = engine.fetch_collection("user", &params).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInclude { .. }));
        assert!(engine.views().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_one_and_unknown_fieldset() {
        let engine = engine();
        let doc = engine
            .fetch_one("category", "2", &["parent".into()], &Fieldsets::new())
            .await
            .unwrap();
        let PrimaryData::One(Some(left)) = &doc.data else {
            panic!("expected one resource");
        };
        assert_eq!(left.attributes["name"], json!("left"));
        let included = doc.included.as_deref().unwrap();
        assert_eq!(included.len(), 1);
        assert_eq!(included[0].id, "1");

        let mut fields = Fieldsets::new();
        fields.insert("nope".into(), vec!["x".into()]);
        let err = engine.fetch_one("category", "2", &[], &fields).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidField { .. }));
    }

    #[tokio::test]
    async fn test_reverse_to_one_include() {
        let engine = engine();
        let params = QueryParams {
            include: vec!["computer".into()],
            ..Default::default()
        };
        let doc = engine.fetch_collection("user", &params).await.unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value["data"][0]["relationships"]["computer"]["data"],
            json!({"type": "computer", "id": "1"})
        );
        assert_eq!(value["data"][1]["relationships"]["computer"]["data"], Value::Null);
        assert_eq!(value["included"], json!([{"type": "computer", "id": "1", "attributes": {"serial": "PC-1"}}]));
    }

    #[tokio::test]
    async fn test_single_resource_writes() {
        let engine = engine();
        let created = engine
            .create(
                "user",
                &ResourceInput::with_attributes(json!({"name": "kim"}).as_object().cloned().unwrap()),
            )
            .await
            .unwrap();
        let PrimaryData::One(Some(kim)) = created.data else {
            panic!("expected created resource");
        };
        let updated = engine
            .update("user", &kim.id, &ResourceInput::with_attributes(json!({"age": 9}).as_object().cloned().unwrap()))
            .await
            .unwrap();
        let PrimaryData::One(Some(kim)) = updated.data else {
            panic!("expected updated resource");
        };
        assert_eq!(kim.attributes["age"], json!(9));

        engine.delete("user", &kim.id).await.unwrap();
        let err = engine.fetch_one("user", &kim.id, &[], &Fieldsets::new()).await.unwrap_err();
        assert!(matches!(err, AppError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_run_atomic() {
        let engine = engine();
        let request: AtomicOperationRequest = serde_json::from_value(json!({"atomic:operations": [
            { "op": "add", "data": { "type": "user", "lid": "u1", "attributes": { "name": "kim" } } },
            { "op": "add", "data": { "type": "computer", "id": "5", "attributes": { "serial": "PC-5" },
              "relationships": { "owner": { "data": { "type": "user", "lid": "u1" } } } } }
        ]}))
        .unwrap();
        let results = engine.run_atomic(request).await.unwrap();
        assert_eq!(results.results.len(), 2);

        let doc = engine
            .fetch_one("computer", "5", &["owner".into()], &Fieldsets::new())
            .await
            .unwrap();
        assert_eq!(doc.included.unwrap()[0].attributes["name"], json!("kim"));
    }

    #[tokio::test]
    async fn test_engines_do_not_share_view_caches() {
        let a = engine();
        let b = engine();
        a.fetch_collection("post", &QueryParams::default()).await.unwrap();
        assert_eq!(a.views().len(), 1);
        assert!(b.views().is_empty());
    }
}
