//! Engine-wide limits and defaults.

use crate::error::ConfigError;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub max_page_size: u64,
    pub max_include_depth: usize,
    /// Whether `page[size]=0` may return the whole collection.
    pub allow_disable_pagination: bool,
    pub view_cache_capacity: usize,
    pub default_schema: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_page_size: 10_000,
            max_include_depth: 3,
            allow_disable_pagination: true,
            view_cache_capacity: 1024,
            default_schema: "public".into(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `JSONAPI_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();
        if let Some(v) = env_parse("JSONAPI_MAX_PAGE_SIZE")? {
            config.max_page_size = v;
        }
        if let Some(v) = env_parse("JSONAPI_MAX_INCLUDE_DEPTH")? {
            config.max_include_depth = v;
        }
        if let Some(v) = env_parse("JSONAPI_ALLOW_DISABLE_PAGINATION")? {
            config.allow_disable_pagination = v;
        }
        if let Some(v) = env_parse("JSONAPI_VIEW_CACHE_CAPACITY")? {
            config.view_cache_capacity = v;
        }
        if let Ok(schema) = std::env::var("JSONAPI_DEFAULT_SCHEMA") {
            if !schema.is_empty() {
                config.default_schema = schema;
            }
        }
        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
