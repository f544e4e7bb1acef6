//! Query executor: filter, sort, count, page and eager-load a collection.

use crate::config::{EngineConfig, Registry, ResourceTypeDescriptor};
use crate::document::Fieldsets;
use crate::entity::{key_string, Entity, Related};
use crate::error::AppError;
use crate::filter::{self, FilterNode};
use crate::sort::{self, SortSpec};
use crate::sql::{ColumnRef, CompareOp, OrderClause, Predicate, SelectQuery, SortDirection, SqlValue, MAIN_ALIAS};
use crate::store::StoreTx;
use crate::view::{IncludeNode, ViewDescriptor};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// JSON:API `page[size]` / `page[number]`. Numbers are 1-based; no size means no paging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub size: Option<u64>,
    pub number: Option<u64>,
}

impl Pagination {
    pub fn new(size: u64, number: u64) -> Self {
        Pagination {
            size: Some(size),
            number: Some(number),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    pub filter: Option<FilterNode>,
    pub sort: Vec<SortSpec>,
    pub include: Vec<String>,
    pub fields: Fieldsets,
    pub page: Pagination,
}

#[derive(Clone, Debug)]
pub struct QueryResult {
    /// Matches before paging; `None` when the resource type opts out of counting.
    pub total: Option<u64>,
    pub entities: Vec<Entity>,
    /// Effective page size after clamping; `None` when unpaged.
    pub page_size: Option<u64>,
}

impl QueryResult {
    pub fn total_pages(&self) -> Option<u64> {
        match (self.total, self.page_size) {
            (Some(total), Some(size)) if size > 0 => Some(total.div_ceil(size)),
            _ => None,
        }
    }
}

/// Resolve the page window to (limit, offset).
fn page_window(page: &Pagination, config: &EngineConfig) -> Result<Option<(u64, u64)>, AppError> {
    let Some(size) = page.size else {
        return Ok(None);
    };
    if size == 0 {
        if config.allow_disable_pagination {
            return Ok(None);
        }
        return Err(AppError::InvalidPage {
            parameter: "page[size]",
            reason: "pagination cannot be disabled".into(),
        });
    }
    let size = size.min(config.max_page_size);
    let number = page.number.unwrap_or(1);
    if number == 0 {
        return Err(AppError::InvalidPage {
            parameter: "page[number]",
            reason: "page numbers start at 1".into(),
        });
    }
    Ok(Some((size, (number - 1).saturating_mul(size))))
}

pub async fn execute(
    tx: &mut dyn StoreTx,
    registry: &Registry,
    view: &ViewDescriptor,
    params: &QueryParams,
    config: &EngineConfig,
) -> Result<QueryResult, AppError> {
    let resource = registry.require(&view.resource_type)?;
    let mut query = SelectQuery::new(resource.table.clone());

    if let Some(node) = &params.filter {
        let compiled = filter::compile(registry, &resource.name, node)?;
        query.filter = Some(compiled.predicate);
        query.filter_joins = compiled.joins;
    }
    let compiled_sort = sort::compile(registry, &resource.name, &params.sort)?;
    query.order = compiled_sort.orders;
    query.sort_joins = compiled_sort.joins;
    let window = page_window(&params.page, config)?;

    let total = if resource.disable_collection_count {
        None
    } else {
        Some(tx.count(&query).await?)
    };

    if let Some((limit, offset)) = window {
        query.limit = Some(limit);
        query.offset = Some(offset);
    }
    let rows = tx.select(&query).await?;
    let mut entities: Vec<Entity> = rows.into_iter().map(|r| Entity::from_row(resource, r)).collect();
    load_includes(tx, registry, resource, &view.tree, &mut entities).await?;

    Ok(QueryResult {
        total,
        entities,
        page_size: window.map(|(limit, _)| limit),
    })
}

/// Fetch one resource by id with the view's includes loaded.
pub async fn execute_one(
    tx: &mut dyn StoreTx,
    registry: &Registry,
    view: &ViewDescriptor,
    id: &str,
) -> Result<Entity, AppError> {
    let resource = registry.require(&view.resource_type)?;
    let Some(mut entity) = fetch_by_id(tx, resource, id).await? else {
        return Err(AppError::ObjectNotFound {
            resource_type: resource.name.clone(),
            id: id.to_string(),
        });
    };
    load_includes(tx, registry, resource, &view.tree, std::slice::from_mut(&mut entity)).await?;
    Ok(entity)
}

pub(crate) async fn fetch_by_id(
    tx: &mut dyn StoreTx,
    resource: &ResourceTypeDescriptor,
    id: &str,
) -> Result<Option<Entity>, AppError> {
    let key = resource.parse_id(id)?;
    let mut query = SelectQuery::new(resource.table.clone());
    query.filter = Some(Predicate::Compare {
        column: resource.id_attribute().column_ref(MAIN_ALIAS),
        op: CompareOp::Eq,
        value: key,
    });
    query.limit = Some(1);
    let row = tx.select(&query).await?.into_iter().next();
    Ok(row.map(|r| Entity::from_row(resource, r)))
}

type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Load every hop of `tree` for all `entities` at once: one query per hop, however many
/// include paths share it.
fn load_includes<'a>(
    tx: &'a mut dyn StoreTx,
    registry: &'a Registry,
    owner: &'a ResourceTypeDescriptor,
    tree: &'a BTreeMap<String, IncludeNode>,
    entities: &'a mut [Entity],
) -> LoadFuture<'a> {
    Box::pin(async move {
        if entities.is_empty() {
            return Ok(());
        }
        for (name, node) in tree {
            let relationship = owner.relationship(name).ok_or_else(|| AppError::InvalidInclude {
                resource_type: owner.name.clone(),
                path: name.clone(),
                reason: format!("{} has no relationship '{}'", owner.name, name),
            })?;
            let target = registry.related(owner, relationship)?;
            let (local, remote) = relationship.join_columns(target);

            let values: Vec<SqlValue> = entities
                .iter()
                .map(|e| e.column(&local))
                .filter(|v| !v.is_null())
                .map(SqlValue::from_json)
                .fold(Vec::new(), |mut acc, v| {
                    if !acc.contains(&v) {
                        acc.push(v);
                    }
                    acc
                });
            let mut children: Vec<Entity> = if values.is_empty() {
                Vec::new()
            } else {
                let pg_type = target
                    .table
                    .column(&remote)
                    .map(|c| c.pg_type.clone())
                    .unwrap_or_else(|| "text".into());
                let mut query = SelectQuery::new(target.table.clone());
                query.filter = Some(Predicate::In {
                    column: ColumnRef::new(MAIN_ALIAS, &remote, &pg_type),
                    values,
                    negated: false,
                });
                query.order.push(OrderClause {
                    column: target.id_attribute().column_ref(MAIN_ALIAS),
                    direction: SortDirection::Asc,
                });
                tx.select(&query)
                    .await?
                    .into_iter()
                    .map(|r| Entity::from_row(target, r))
                    .collect()
            };
            load_includes(&mut *tx, registry, target, &node.children, &mut children).await?;

            let mut by_key: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
            for child in &children {
                by_key.entry(key_string(child.column(&remote))).or_default().push(child);
            }
            for entity in entities.iter_mut() {
                let parent_key = entity.column(&local);
                let matched: Vec<&Entity> = if parent_key.is_null() {
                    Vec::new()
                } else {
                    by_key.get(&key_string(parent_key)).cloned().unwrap_or_default()
                };
                let related = if relationship.is_many() {
                    Related::Many(matched.into_iter().cloned().collect())
                } else {
                    Related::One(matched.first().map(|e| Box::new((*e).clone())))
                };
                entity.related.insert(name.clone(), related);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::store::Store;
    use crate::view::build_view;
    use serde_json::json;

    fn ids(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_filter_sort_and_count() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "user", &[]).unwrap();
        let params = QueryParams {
            filter: Some(FilterNode::from_value("user", &json!([{"name": "age", "op": "ge", "val": 18}])).unwrap()),
            sort: SortSpec::parse_list("-age"),
            ..Default::default()
        };
        let result = execute(tx.as_mut(), &registry, &view, &params, &EngineConfig::default()).await.unwrap();
        assert_eq!(result.total, Some(2));
        assert_eq!(ids(&result.entities), vec!["3", "1"]);
    }

    #[tokio::test]
    async fn test_filter_through_to_many_does_not_duplicate() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "user", &[]).unwrap();
        let params = QueryParams {
            filter: Some(FilterNode::simple("posts.comments.text", json!("nice"))),
            ..Default::default()
        };
        let result = execute(tx.as_mut(), &registry, &view, &params, &EngineConfig::default()).await.unwrap();
        assert_eq!(ids(&result.entities), vec!["1"]);

        let params = QueryParams {
            filter: Some(FilterNode::from_value("user", &json!({"name": "posts.title", "op": "ne", "val": "x"})).unwrap()),
            ..Default::default()
        };
        let result = execute(tx.as_mut(), &registry, &view, &params, &EngineConfig::default()).await.unwrap();
        assert_eq!(result.total, Some(2));
        assert_eq!(ids(&result.entities), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_pagination() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "user", &[]).unwrap();
        let params = QueryParams {
            page: Pagination::new(2, 2),
            ..Default::default()
        };
        let result = execute(tx.as_mut(), &registry, &view, &params, &EngineConfig::default()).await.unwrap();
        assert_eq!(ids(&result.entities), vec!["3"]);
        assert_eq!(result.total_pages(), Some(2));

        let strict = EngineConfig {
            allow_disable_pagination: false,
            ..EngineConfig::default()
        };
        let params = QueryParams {
            page: Pagination::new(0, 1),
            ..Default::default()
        };
        let err = execute(tx.as_mut(), &registry, &view, &params, &strict).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPage { parameter: "page[size]", .. }));

        let tiny = EngineConfig {
            max_page_size: 1,
            ..EngineConfig::default()
        };
        let params = QueryParams {
            page: Pagination::new(50, 1),
            ..Default::default()
        };
        let result = execute(tx.as_mut(), &registry, &view, &params, &tiny).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.page_size, Some(1));
    }

    #[tokio::test]
    async fn test_count_opt_out() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "computer", &[]).unwrap();
        let result = execute(tx.as_mut(), &registry, &view, &QueryParams::default(), &EngineConfig::default())
            .await
            .unwrap();
        assert_eq!(result.total, None);
        assert_eq!(result.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_eager_loads_nested_includes() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let include = vec!["posts".to_string(), "posts.comments".to_string()];
        let view = build_view(&registry, "user", &include).unwrap();
        let result = execute(tx.as_mut(), &registry, &view, &QueryParams::default(), &EngineConfig::default())
            .await
            .unwrap();
        let john = &result.entities[0];
        let Some(Related::Many(posts)) = john.related.get("posts") else {
            panic!("posts not loaded");
        };
        assert_eq!(ids(posts), vec!["1", "2"]);
        let Some(Related::Many(comments)) = posts[0].related.get("comments") else {
            panic!("comments not loaded");
        };
        assert_eq!(ids(comments), vec!["1", "2"]);
        let Some(Related::Many(none)) = result.entities[2].related.get("posts") else {
            panic!("ann's posts not loaded");
        };
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_execute_one() {
        let registry = fixtures::registry();
        let store = fixtures::seeded_store(&registry);
        let mut tx = store.begin().await.unwrap();
        let view = build_view(&registry, "post", &["author".to_string()]).unwrap();
        let post = execute_one(tx.as_mut(), &registry, &view, "3").await.unwrap();
        let Some(Related::One(Some(author))) = post.related.get("author") else {
            panic!("author not loaded");
        };
        assert_eq!(author.id, "2");

        let err = execute_one(tx.as_mut(), &registry, &view, "99").await.unwrap_err();
        assert!(matches!(err, AppError::ObjectNotFound { .. }));
        let err = execute_one(tx.as_mut(), &registry, &view, "abc").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidId { .. }));
    }
}
