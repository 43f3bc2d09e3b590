//! Table Model
//!
//! Schema descriptor shared by every backend: table name, ordered field
//! definitions, primary key and secondary indexes. Built once per entity type
//! from its [`Entity::FIELDS`] declaration and cached for the process lifetime,
//! or assembled by hand with [`TableModel::builder`].

mod entity;
mod error;
mod tag;

pub use entity::{Entity, FieldKind, FieldSpec};
pub use error::SchemaError;

use crate::query::validate_field;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use tag::{parse_tag, Group};

/// Storage-level type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Int,
    Float,
    Bool,
    Date,
    Json,
}

impl SemanticType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "string" | "text" => Some(SemanticType::String),
            "int" | "integer" => Some(SemanticType::Int),
            "float" | "real" | "double" => Some(SemanticType::Float),
            "bool" | "boolean" => Some(SemanticType::Bool),
            "date" | "datetime" | "timestamp" => Some(SemanticType::Date),
            "json" => Some(SemanticType::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Bool => "bool",
            SemanticType::Date => "date",
            SemanticType::Json => "json",
        }
    }

    /// Kind assumed for hand-built fields
    fn default_kind(self) -> FieldKind {
        match self {
            SemanticType::String => FieldKind::String,
            SemanticType::Int => FieldKind::Int,
            SemanticType::Float => FieldKind::Float,
            SemanticType::Bool => FieldKind::Bool,
            SemanticType::Date => FieldKind::Date,
            SemanticType::Json => FieldKind::Json,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column/document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column name in storage
    pub name: String,
    /// Serialized field name on the entity (differs from `name` when the tag renames it)
    pub attribute: String,
    pub kind: FieldKind,
    pub semantic_type: SemanticType,
    pub size: Option<u32>,
    pub required: bool,
    pub default: Option<Value>,
    pub indexed: bool,
    pub unique_group: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        let name = name.into();
        Self {
            attribute: name.clone(),
            name,
            kind: semantic_type.default_kind(),
            semantic_type,
            size: None,
            required: false,
            default: None,
            indexed: false,
            unique_group: None,
        }
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Secondary index over one or more fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, fields: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        }
    }
}

/// Schema descriptor for one table/collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableModel {
    pub table: String,
    pub fields: Vec<FieldDefinition>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDefinition>,
}

static MODELS: OnceLock<RwLock<HashMap<TypeId, Arc<TableModel>>>> = OnceLock::new();

impl TableModel {
    /// Model for `T`, built on first use and cached afterwards
    pub fn of<T: Entity>() -> Result<Arc<TableModel>, SchemaError> {
        let registry = MODELS.get_or_init(Default::default);
        let key = TypeId::of::<T>();

        if let Some(model) = registry.read().ok().and_then(|m| m.get(&key).cloned()) {
            return Ok(model);
        }

        let model = Arc::new(Self::from_entity(&T::default())?);
        tracing::debug!(
            "Built table model '{}' ({} fields, {} indexes)",
            model.table,
            model.fields.len(),
            model.indexes.len()
        );

        match registry.write() {
            Ok(mut models) => Ok(models.entry(key).or_insert(model).clone()),
            Err(_) => Ok(model),
        }
    }

    /// Build a model by inspecting `value`'s serialized form against `T::FIELDS`
    pub fn from_entity<T: Entity>(value: &T) -> Result<TableModel, SchemaError> {
        let type_name = std::any::type_name::<T>();
        let sample = serde_json::to_value(value).map_err(|_| SchemaError::NotAStruct {
            type_name: type_name.to_string(),
        })?;
        Self::from_specs(type_name, T::table_name(), T::FIELDS, &sample)
    }

    fn from_specs(
        type_name: &str,
        table: String,
        specs: &[FieldSpec],
        sample: &Value,
    ) -> Result<TableModel, SchemaError> {
        let Value::Object(sample) = sample else {
            return Err(SchemaError::NotAStruct {
                type_name: type_name.to_string(),
            });
        };

        let mut fields = Vec::new();
        let mut primary_key = Vec::new();
        let mut indexes: Vec<IndexDefinition> = Vec::new();

        let mut add_to_index = |name: String, column: &str, unique: bool| {
            match indexes
                .iter_mut()
                .find(|idx| idx.name == name && idx.unique == unique)
            {
                Some(index) => index.fields.push(column.to_string()),
                None => indexes.push(IndexDefinition {
                    name,
                    fields: vec![column.to_string()],
                    unique,
                }),
            }
        };

        for spec in specs {
            let tag = parse_tag(spec.name, spec.tag)?;
            if tag.excluded {
                continue;
            }
            if !sample.contains_key(spec.name) {
                return Err(SchemaError::UndeclaredField {
                    type_name: type_name.to_string(),
                    field: spec.name.to_string(),
                });
            }

            let column = tag.name.clone().unwrap_or_else(|| spec.name.to_string());
            if tag.primary {
                primary_key.push(column.clone());
            }

            let unique_group = tag.unique.as_ref().map(|group| match group {
                Group::Auto => format!("uniq_{table}_{column}"),
                Group::Named(name) => format!("uniq_{table}_{name}"),
            });
            if let Some(name) = &unique_group {
                add_to_index(name.clone(), &column, true);
            }
            if let Some(group) = &tag.index {
                let name = match group {
                    Group::Auto => format!("idx_{table}_{column}"),
                    Group::Named(name) => name.clone(),
                };
                add_to_index(name, &column, false);
            }

            fields.push(FieldDefinition {
                name: column,
                attribute: spec.name.to_string(),
                kind: spec.kind,
                semantic_type: tag
                    .semantic_type
                    .unwrap_or_else(|| spec.kind.semantic_type()),
                size: tag.size,
                required: tag.required || tag.primary,
                default: tag.default,
                indexed: tag.index.is_some(),
                unique_group,
            });
        }

        let model = TableModel {
            table,
            fields,
            primary_key,
            indexes,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn builder(table: impl Into<String>) -> TableModelBuilder {
        TableModelBuilder {
            model: TableModel {
                table: table.into(),
                fields: Vec::new(),
                primary_key: Vec::new(),
                indexes: Vec::new(),
            },
        }
    }

    /// Check that names are identifiers and every key/index field exists
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.table.contains('.') || validate_field(&self.table).is_err() {
            return Err(SchemaError::InvalidTableName {
                table: self.table.clone(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.contains('.') || validate_field(&field.name).is_err() {
                return Err(SchemaError::invalid_tag(
                    &field.attribute,
                    &field.name,
                    "column name must be an identifier",
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: self.table.clone(),
                    field: field.name.clone(),
                });
            }
        }

        for key in &self.primary_key {
            if !seen.contains(key.as_str()) {
                return Err(SchemaError::unknown_field(&self.table, key, "Primary key"));
            }
        }
        for index in &self.indexes {
            for field in &index.fields {
                if !seen.contains(field.as_str()) {
                    return Err(SchemaError::unknown_field(
                        &self.table,
                        field,
                        format!("Index '{}'", index.name),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Primary key, or an error for models that have none
    pub fn require_primary_key(&self) -> Result<&[String], SchemaError> {
        if self.primary_key.is_empty() {
            Err(SchemaError::MissingPrimaryKey {
                table: self.table.clone(),
            })
        } else {
            Ok(&self.primary_key)
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields outside the primary key, in declaration order
    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .iter()
            .filter(|f| !self.primary_key.contains(&f.name))
    }
}

/// Hand-written model construction
#[derive(Debug, Clone)]
pub struct TableModelBuilder {
    model: TableModel,
}

impl TableModelBuilder {
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.model.fields.push(field);
        self
    }

    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model.primary_key = fields.into_iter().map(Into::into).collect();
        for field in &mut self.model.fields {
            if self.model.primary_key.contains(&field.name) {
                field.required = true;
            }
        }
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        for field in &mut self.model.fields {
            if index.fields.contains(&field.name) {
                if index.unique {
                    field.unique_group = Some(index.name.clone());
                } else {
                    field.indexed = true;
                }
            }
        }
        self.model.indexes.push(index);
        self
    }

    pub fn build(self) -> Result<TableModel, SchemaError> {
        self.model.validate()?;
        Ok(self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Membership {
        tenant: String,
        user: String,
        role: String,
        email: Option<String>,
        score: f64,
        joined_at: String,
        labels: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scratch: Option<String>,
    }

    impl Entity for Membership {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::new("tenant", FieldKind::String, "tenant,primary,index=by_tenant_role,size=64"),
            FieldSpec::new("user", FieldKind::String, "user_id,primary"),
            FieldSpec::new("role", FieldKind::String, "role,index=by_tenant_role,default=member"),
            FieldSpec::new("email", FieldKind::String, "email,unique"),
            FieldSpec::new("score", FieldKind::Float, "score,index"),
            FieldSpec::new("joined_at", FieldKind::Date, "joined_at,required"),
            FieldSpec::new("labels", FieldKind::Json, "labels"),
            FieldSpec::new("scratch", FieldKind::String, "-"),
        ];
    }

    #[test]
    fn test_model_from_entity() {
        let model = TableModel::of::<Membership>().unwrap();
        assert_eq!(model.table, "membership");
        assert_eq!(model.primary_key, vec!["tenant", "user_id"]);
        assert_eq!(
            model.column_names().collect::<Vec<_>>(),
            vec!["tenant", "user_id", "role", "email", "score", "joined_at", "labels"]
        );

        let user = model.field("user_id").unwrap();
        assert_eq!(user.attribute, "user");
        assert!(user.required);

        assert_eq!(model.field("tenant").unwrap().size, Some(64));
        assert_eq!(model.field("role").unwrap().default, Some(json!("member")));
        assert_eq!(model.field("labels").unwrap().semantic_type, SemanticType::Json);
        assert_eq!(model.field("joined_at").unwrap().semantic_type, SemanticType::Date);
        assert!(model.field("scratch").is_none());

        assert!(model.indexes.contains(&IndexDefinition::new(
            "by_tenant_role",
            &["tenant", "role"],
            false
        )));
        assert!(model.indexes.contains(&IndexDefinition::new(
            "uniq_membership_email",
            &["email"],
            true
        )));
        assert!(model.indexes.contains(&IndexDefinition::new(
            "idx_membership_score",
            &["score"],
            false
        )));
        assert_eq!(
            model.field("email").unwrap().unique_group.as_deref(),
            Some("uniq_membership_email")
        );
    }

    #[test]
    fn test_model_is_cached() {
        let a = TableModel::of::<Membership>().unwrap();
        let b = TableModel::of::<Membership>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Maybe(Option<Membership>);

    impl Entity for Maybe {
        const FIELDS: &'static [FieldSpec] = &[];
    }

    #[test]
    fn test_non_struct_is_rejected() {
        assert!(matches!(
            TableModel::of::<Maybe>(),
            Err(SchemaError::NotAStruct { .. })
        ));
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Ghost {
        id: i64,
    }

    impl Entity for Ghost {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::new("id", FieldKind::Int, "id,primary"),
            FieldSpec::new("missing", FieldKind::String, "missing"),
        ];
    }

    #[test]
    fn test_declared_field_must_serialize() {
        assert!(matches!(
            TableModel::of::<Ghost>(),
            Err(SchemaError::UndeclaredField { .. })
        ));
    }

    #[test]
    fn test_builder_validates_references() {
        let model = TableModel::builder("orders")
            .field(FieldDefinition::new("id", SemanticType::String))
            .field(FieldDefinition::new("status", SemanticType::String).size(16))
            .primary_key(["id"])
            .index(IndexDefinition::new("idx_orders_status", &["status"], false))
            .build()
            .unwrap();
        assert!(model.field("id").unwrap().required);
        assert!(model.field("status").unwrap().indexed);

        let bad = TableModel::builder("orders")
            .field(FieldDefinition::new("id", SemanticType::String))
            .primary_key(["uuid"])
            .build();
        assert!(matches!(bad, Err(SchemaError::UnknownField { .. })));

        let dup = TableModel::builder("orders")
            .field(FieldDefinition::new("id", SemanticType::String))
            .field(FieldDefinition::new("id", SemanticType::Int))
            .build();
        assert!(matches!(dup, Err(SchemaError::DuplicateField { .. })));
    }
}
