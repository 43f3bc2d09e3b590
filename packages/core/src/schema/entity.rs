//! Entity declaration
//!
//! An entity is a serde struct plus a static field list. Each [`FieldSpec`]
//! names a serialized field, its Rust-side kind, and its tag.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use unistore_core::{Entity, FieldKind, FieldSpec};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//!     status: String,
//!     amount: i64,
//! }
//!
//! impl Entity for Order {
//!     const FIELDS: &'static [FieldSpec] = &[
//!         FieldSpec::new("id", FieldKind::String, "id,primary"),
//!         FieldSpec::new("status", FieldKind::String, "status,index,size=32"),
//!         FieldSpec::new("amount", FieldKind::Int, "amount"),
//!     ];
//! }
//!
//! assert_eq!(Order::table_name(), "order");
//! ```

use super::SemanticType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Rust-side kind of a field, used for type inference and decode coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// `chrono::DateTime` and friends, serialized as RFC 3339 text
    Date,
    /// `std::time::Duration`, stored as integer nanoseconds
    Duration,
    /// Vectors, maps, nested structs
    Json,
}

impl FieldKind {
    pub fn semantic_type(self) -> SemanticType {
        match self {
            FieldKind::String => SemanticType::String,
            FieldKind::Int | FieldKind::Duration => SemanticType::Int,
            FieldKind::Float => SemanticType::Float,
            FieldKind::Bool => SemanticType::Bool,
            FieldKind::Date => SemanticType::Date,
            FieldKind::Json => SemanticType::Json,
        }
    }
}

/// One declared field: serialized name, kind and tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub tag: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, tag: &'static str) -> Self {
        Self { name, kind, tag }
    }
}

/// A type stored through a [`Repository`](crate::Repository)
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Declared fields in column order
    const FIELDS: &'static [FieldSpec];

    /// Table (or collection) name; defaults to the type name in snake case
    fn table_name() -> String {
        default_table_name(std::any::type_name::<Self>())
    }
}

/// `my_app::models::OrderItem<T>` -> `order_item`
pub(crate) fn default_table_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let base = base.rsplit("::").next().unwrap_or(base);

    let mut out = String::with_capacity(base.len() + 4);
    let mut prev_lower = false;
    for c in base.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}
