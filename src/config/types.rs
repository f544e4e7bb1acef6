//! Raw registry feed types, deserialized from the resource declaration JSON.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_id_field() -> String {
    "id".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    /// Backing column; defaults to the snake_case form of `name`.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// PostgreSQL type used for parameter casts; defaults from `type`.
    #[serde(default)]
    pub pg_type: Option<String>,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    #[serde(default)]
    pub has_default: bool,
    /// Names of custom predicate builders attached to this field (e.g. "lower_equals").
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    /// Target resource type name. Resolved lazily, so it may be declared later in the feed.
    pub target: String,
    #[serde(default)]
    pub many: bool,
    /// Target field used as the linkage id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Column on this resource's table. To-one: the foreign key (default `<name>_id`). To-many: defaults to our id column.
    #[serde(default)]
    pub local_key: Option<String>,
    /// Column on the target's table. To-one: defaults to the target id column. To-many: the foreign key (required).
    #[serde(default)]
    pub remote_key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub client_can_set_id: bool,
    #[serde(default)]
    pub disable_collection_count: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

/// All resource declarations in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub resources: Vec<ResourceConfig>,
}
