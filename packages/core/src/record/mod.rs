//! Records
//!
//! A [`Record`] is the field bag a backend produces for one row/document, keyed
//! by column name. [`RecordBuilder`] produces records from typed entities or raw
//! maps; [`Record::scan`] decodes one back into an entity, coercing values the
//! storage engine could not keep in their original shape.

mod coerce;
mod error;

pub use error::RecordError;

use crate::schema::{Entity, TableModel};
use coerce::{decode_value, encode_value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable name -> value bag for one row or document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode into `T`, coercing each declared field by its kind
    ///
    /// Columns absent from the record keep `T::default()`'s value; columns the
    /// model does not declare are ignored.
    pub fn scan<T: Entity>(&self) -> Result<T, RecordError> {
        let model = TableModel::of::<T>()?;

        let mut target = match serde_json::to_value(T::default())? {
            Value::Object(map) => map,
            other => {
                return Err(RecordError::NotAnObject {
                    found: type_label(&other).to_string(),
                })
            }
        };

        for field in &model.fields {
            if let Some(raw) = self.fields.get(&field.name) {
                let value = decode_value(&field.name, field.kind, raw)?;
                target.insert(field.attribute.clone(), value);
            }
        }

        serde_json::from_value(Value::Object(target)).map_err(|err| RecordError::Decode {
            type_name: std::any::type_name::<T>().to_string(),
            reason: err.to_string(),
        })
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Produces records in the shape backends expect
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBuilder;

impl RecordBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Record holding every declared, non-excluded field of `entity`, keyed by
    /// column name
    pub fn from_entity<T: Entity>(&self, entity: &T) -> Result<Record, RecordError> {
        let model = TableModel::of::<T>()?;
        let mut source = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            other => {
                return Err(RecordError::NotAnObject {
                    found: type_label(&other).to_string(),
                })
            }
        };

        let mut fields = Map::new();
        for field in &model.fields {
            let value = source.remove(&field.attribute).unwrap_or(Value::Null);
            fields.insert(field.name.clone(), encode_value(&field.name, field.kind, value)?);
        }
        Ok(Record { fields })
    }

    pub fn from_map(&self, fields: Map<String, Value>) -> Record {
        Record { fields }
    }

    /// Record from a JSON value, which must be an object
    pub fn from_value(&self, value: Value) -> Result<Record, RecordError> {
        match value {
            Value::Object(fields) => Ok(Record { fields }),
            other => Err(RecordError::NotAnObject {
                found: type_label(&other).to_string(),
            }),
        }
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
