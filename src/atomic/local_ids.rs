//! Batch-scoped local id table: `lid -> (resource type, real id)`.

use crate::error::AppError;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct LocalIdTable {
    entries: HashMap<String, (String, String)>,
}

impl LocalIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the id assigned to `lid`. A lid may be defined once per batch.
    pub fn define(&mut self, lid: &str, resource_type: &str, id: &str) -> Result<(), AppError> {
        if self.entries.contains_key(lid) {
            return Err(AppError::Validation {
                resource_type: resource_type.to_string(),
                pointer: "/data/lid".into(),
                message: format!("local id '{}' is already defined in this batch", lid),
            });
        }
        self.entries
            .insert(lid.to_string(), (resource_type.to_string(), id.to_string()));
        Ok(())
    }

    pub fn contains(&self, lid: &str) -> bool {
        self.entries.contains_key(lid)
    }

    /// Real id for `lid`, which must have been defined by an earlier operation for `resource_type`.
    pub fn resolve(&self, operation_index: usize, lid: &str, resource_type: &str) -> Result<&str, AppError> {
        let (defined_type, id) = self.entries.get(lid).ok_or_else(|| AppError::UnresolvedLocalId {
            operation_index,
            local_id: lid.to_string(),
        })?;
        if defined_type != resource_type {
            return Err(AppError::Validation {
                resource_type: resource_type.to_string(),
                pointer: "/data/lid".into(),
                message: format!("local id '{}' refers to a {}, not a {}", lid, defined_type, resource_type),
            });
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_resolve() {
        let mut table = LocalIdTable::new();
        assert!(matches!(
            table.resolve(0, "u1", "user"),
            Err(AppError::UnresolvedLocalId { operation_index: 0, ref local_id }) if local_id == "u1"
        ));
        table.define("u1", "user", "7").unwrap();
        assert_eq!(table.resolve(1, "u1", "user").unwrap(), "7");
        assert!(matches!(table.resolve(1, "u1", "post"), Err(AppError::Validation { .. })));
        assert!(matches!(table.define("u1", "user", "8"), Err(AppError::Validation { .. })));
        assert_eq!(table.len(), 1);
    }
}
