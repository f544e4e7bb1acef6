//! Catalog demo: load a resource feed, then list users with their posts and run a batch.
//!
//! Expects the tables named in `demos/resources.json` to exist in `DATABASE_URL`.
//! Run: `cargo run --example catalog`

use jsonapi_engine::{
    load_from_path, resolve_with_schema, AtomicOperationRequest, Engine, EngineConfig, FilterNode, Pagination,
    PgStore, QueryParams, SortSpec,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jsonapi_engine=debug")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/catalog".into());
    let feed_dir = std::env::var("RESOURCES_DIR").unwrap_or_else(|_| "demos".into());

    let config = EngineConfig::from_env()?;
    let feed = load_from_path(&feed_dir).await?;
    let registry = resolve_with_schema(&feed, &config.default_schema)?;
    let store = PgStore::connect(&database_url, 5).await?;
    let engine = Engine::new(registry, Arc::new(store), config);

    let request: AtomicOperationRequest = serde_json::from_value(serde_json::json!({
        "atomic:operations": [
            { "op": "add", "data": { "type": "user", "lid": "u1", "attributes": { "name": "Ada", "age": 36 } } },
            { "op": "add", "data": { "type": "post", "attributes": { "title": "Notes" },
              "relationships": { "author": { "data": { "type": "user", "lid": "u1" } } } } }
        ]
    }))?;
    match engine.run_atomic(request).await {
        Ok(results) => println!("{}", serde_json::to_string_pretty(&results)?),
        Err(e) => tracing::warn!(operation_index = ?e.operation_index, error = %e.source, "batch failed"),
    }

    let params = QueryParams {
        filter: Some(FilterNode::parse("user", r#"[{"name": "age", "op": "ge", "val": 18}]"#)?),
        sort: SortSpec::parse_list("-age,name"),
        include: vec!["posts".into(), "posts.comments".into()],
        page: Pagination::new(20, 1),
        ..Default::default()
    };
    let document = engine.fetch_collection("user", &params).await?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
