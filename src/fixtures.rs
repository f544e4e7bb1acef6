//! Shared test registry and seeded store.

use crate::config::{resolve, FullConfig, Registry};
use crate::store::MemoryStore;
use serde_json::json;

pub fn feed() -> FullConfig {
    serde_json::from_value(json!({ "resources": [
        {
            "name": "user", "table": "users",
            "attributes": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "name", "type": "string", "nullable": false, "filters": ["lower_equals"],
                  "validation": { "required": true, "min_length": 1, "max_length": 50 } },
                { "name": "age", "type": "integer", "validation": { "minimum": 0, "maximum": 150 } },
                { "name": "email", "type": "string", "validation": { "format": "email" } },
                { "name": "tags", "type": "json", "filters": ["jsonb_contains"] }
            ],
            "relationships": [
                { "name": "posts", "target": "post", "many": true, "remote_key": "author_id" },
                { "name": "computers", "target": "computer", "many": true, "remote_key": "user_id" },
                { "name": "computer", "target": "computer", "remote_key": "user_id" }
            ]
        },
        {
            "name": "post", "table": "posts",
            "attributes": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "title", "type": "string", "nullable": false },
                { "name": "body", "type": "string" }
            ],
            "relationships": [
                { "name": "author", "target": "user", "local_key": "author_id" },
                { "name": "comments", "target": "comment", "many": true, "remote_key": "post_id" }
            ]
        },
        {
            "name": "comment", "table": "comments",
            "attributes": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "text", "type": "string", "nullable": false }
            ],
            "relationships": [
                { "name": "post", "target": "post" },
                { "name": "author", "target": "user" }
            ]
        },
        {
            "name": "computer", "table": "computers", "client_can_set_id": true,
            "disable_collection_count": true,
            "attributes": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "serial", "type": "string", "nullable": false }
            ],
            "relationships": [
                { "name": "owner", "target": "user", "local_key": "user_id" }
            ]
        },
        {
            "name": "category", "table": "categories",
            "attributes": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "name", "type": "string", "nullable": false }
            ],
            "relationships": [
                { "name": "parent", "target": "category" },
                { "name": "children", "target": "category", "many": true, "remote_key": "parent_id" }
            ]
        }
    ]}))
    .unwrap()
}

pub fn registry() -> Registry {
    resolve(&feed()).unwrap()
}

/// users 1 john (30), 2 sam (17), 3 ann (45, no email); posts 1,2 by john, 3 by sam;
/// comments 1,2 on post 1, 3 on post 3, 4 on post 2; computer 1 owned by john;
/// category 1 with children 2 and 3.
pub fn seeded_store(registry: &Registry) -> MemoryStore {
    let store = MemoryStore::new();
    let table = |name: &str| registry.require(name).unwrap().table.clone();
    store
        .seed(
            &table("user"),
            [
                json!({ "id": 1, "name": "john", "age": 30, "email": "john@example.com", "tags": ["admin"] }),
                json!({ "id": 2, "name": "sam", "age": 17, "email": "sam@example.com", "tags": [] }),
                json!({ "id": 3, "name": "ann", "age": 45 }),
            ],
        )
        .unwrap();
    store
        .seed(
            &table("post"),
            [
                json!({ "id": 1, "title": "Hello", "body": "first", "author_id": 1 }),
                json!({ "id": 2, "title": "World", "author_id": 1 }),
                json!({ "id": 3, "title": "Other", "body": "third", "author_id": 2 }),
            ],
        )
        .unwrap();
    store
        .seed(
            &table("comment"),
            [
                json!({ "id": 1, "text": "nice", "post_id": 1, "author_id": 2 }),
                json!({ "id": 2, "text": "agreed", "post_id": 1, "author_id": 3 }),
                json!({ "id": 3, "text": "hmm", "post_id": 3, "author_id": 1 }),
                json!({ "id": 4, "text": "self reply", "post_id": 2, "author_id": 1 }),
            ],
        )
        .unwrap();
    store
        .seed(&table("computer"), [json!({ "id": 1, "serial": "PC-1", "user_id": 1 })])
        .unwrap();
    store
        .seed(
            &table("category"),
            [
                json!({ "id": 1, "name": "root" }),
                json!({ "id": 2, "name": "left", "parent_id": 1 }),
                json!({ "id": 3, "name": "right", "parent_id": 1 }),
            ],
        )
        .unwrap();
    store
}
