//! Per-(resource type, include set) view descriptors and their bounded cache.

use crate::config::{Cardinality, Registry};
use crate::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeStep {
    pub relationship: String,
    pub source_type: String,
    pub target_type: String,
    pub cardinality: Cardinality,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludePathView {
    pub path: String,
    pub steps: Vec<IncludeStep>,
}

/// One relationship hop shared by every include path that passes through it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeNode {
    pub step: IncludeStep,
    pub children: BTreeMap<String, IncludeNode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewDescriptor {
    pub resource_type: String,
    /// Exposed attribute names of the root type, in declaration order.
    pub attributes: Vec<String>,
    pub includes: Vec<IncludePathView>,
    /// Include paths merged by prefix, keyed by relationship name.
    pub tree: BTreeMap<String, IncludeNode>,
}

impl ViewDescriptor {
    pub fn max_depth(&self) -> usize {
        self.includes.iter().map(|p| p.steps.len()).max().unwrap_or(0)
    }
}

fn normalize(include_set: &[String]) -> Vec<String> {
    let mut paths: Vec<String> = include_set
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

pub fn build_view(registry: &Registry, resource_type: &str, include_set: &[String]) -> Result<ViewDescriptor, AppError> {
    let root = registry.require(resource_type)?;
    let mut includes = Vec::new();
    let mut tree: BTreeMap<String, IncludeNode> = BTreeMap::new();

    for path in normalize(include_set) {
        let invalid = |reason: String| AppError::InvalidInclude {
            resource_type: resource_type.to_string(),
            path: path.clone(),
            reason,
        };
        let mut current = root;
        let mut steps = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty relationship name".into()));
            }
            let relationship = current
                .relationship(segment)
                .ok_or_else(|| invalid(format!("{} has no relationship '{}'", current.name, segment)))?;
            let target = registry.related(current, relationship)?;
            steps.push(IncludeStep {
                relationship: relationship.name.clone(),
                source_type: current.name.clone(),
                target_type: target.name.clone(),
                cardinality: relationship.cardinality,
            });
            current = target;
        }

        let mut level = &mut tree;
        for step in &steps {
            let node = level.entry(step.relationship.clone()).or_insert_with(|| IncludeNode {
                step: step.clone(),
                children: BTreeMap::new(),
            });
            level = &mut node.children;
        }
        includes.push(IncludePathView { path, steps });
    }

    Ok(ViewDescriptor {
        resource_type: root.name.clone(),
        attributes: root.exposed_attributes().map(|a| a.name.clone()).collect(),
        includes,
        tree,
    })
}

type ViewKey = (String, Vec<String>);

/// Views keyed by `(resource type, sorted include set)`. Holds at most `capacity` entries;
/// past that, views are built per call.
pub struct ViewCache {
    capacity: usize,
    views: RwLock<HashMap<ViewKey, Arc<ViewDescriptor>>>,
    saturation_logged: AtomicBool,
}

impl ViewCache {
    pub fn new(capacity: usize) -> Self {
        ViewCache {
            capacity,
            views: RwLock::new(HashMap::new()),
            saturation_logged: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.views.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_build(
        &self,
        registry: &Registry,
        resource_type: &str,
        include_set: &[String],
    ) -> Result<Arc<ViewDescriptor>, AppError> {
        let key = (resource_type.to_string(), normalize(include_set));
        if let Ok(views) = self.views.read() {
            if let Some(view) = views.get(&key) {
                return Ok(Arc::clone(view));
            }
        }

        let view = Arc::new(build_view(registry, resource_type, &key.1)?);
        if let Ok(mut views) = self.views.write() {
            if let Some(existing) = views.get(&key) {
                return Ok(Arc::clone(existing));
            }
            if views.len() < self.capacity {
                views.insert(key, Arc::clone(&view));
            } else if !self.saturation_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!(capacity = self.capacity, "view cache full; further views are not cached");
            }
        }
        Ok(view)
    }
}
