//! Per-backend registry of migrated table models

use crate::schema::TableModel;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Table models registered through `migrate`, keyed by table name
///
/// Holds schema metadata only. Backends consult it for primary keys when
/// resolving conflicts, ordering key columns and building document ids.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    models: RwLock<HashMap<String, Arc<TableModel>>>,
}

impl Catalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, model: &TableModel) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.insert(model.table.clone(), Arc::new(model.clone()));
    }

    pub(crate) fn get(&self, table: &str) -> Option<Arc<TableModel>> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(table).cloned()
    }

    pub(crate) fn remove(&self, table: &str) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.remove(table);
    }

    /// Primary key of `table`, when its model is registered with one
    pub(crate) fn primary_key(&self, table: &str) -> Option<Vec<String>> {
        self.get(table)
            .filter(|model| model.has_primary_key())
            .map(|model| model.primary_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, SemanticType};

    #[test]
    fn test_register_and_remove() {
        let catalog = Catalog::new();
        let model = TableModel::builder("orders")
            .field(FieldDefinition::new("id", SemanticType::String))
            .primary_key(["id"])
            .build()
            .unwrap();

        catalog.register(&model);
        assert_eq!(catalog.primary_key("orders"), Some(vec!["id".to_string()]));

        catalog.remove("orders");
        assert!(catalog.get("orders").is_none());
        assert!(catalog.primary_key("orders").is_none());
    }
}
