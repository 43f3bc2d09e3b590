//! Field tag parsing
//!
//! Grammar: `name[,primary][,required][,unique[=group]][,index[=name]][,size=N][,type=T][,default=V]`,
//! or `-` to exclude the field. An empty name keeps the field's own name.
//! Values may not contain commas.

use super::{SchemaError, SemanticType};
use serde_json::Value;

/// Grouping attribute (`unique`/`index`), optionally naming its group
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Group {
    Auto,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct FieldTag {
    pub name: Option<String>,
    pub excluded: bool,
    pub primary: bool,
    pub required: bool,
    pub unique: Option<Group>,
    pub index: Option<Group>,
    pub size: Option<u32>,
    pub semantic_type: Option<SemanticType>,
    pub default: Option<Value>,
}

pub(crate) fn parse_tag(field: &str, tag: &str) -> Result<FieldTag, SchemaError> {
    let tag = tag.trim();
    if tag == "-" {
        return Ok(FieldTag {
            excluded: true,
            ..Default::default()
        });
    }

    let mut parts = tag.split(',').map(str::trim);
    let mut parsed = FieldTag {
        name: parts
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        ..Default::default()
    };

    for part in parts {
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (part, None),
        };
        let invalid = |reason: &str| SchemaError::invalid_tag(field, tag, reason);

        match (key, value) {
            ("primary", None) => parsed.primary = true,
            ("required", None) => parsed.required = true,
            ("unique", group) => parsed.unique = Some(group_of(group)),
            ("index", group) => parsed.index = Some(group_of(group)),
            ("size", Some(n)) => {
                parsed.size = Some(
                    n.parse()
                        .map_err(|_| invalid("size must be a non-negative integer"))?,
                )
            }
            ("type", Some(t)) => {
                parsed.semantic_type = Some(
                    SemanticType::parse(t).ok_or_else(|| invalid("unknown type"))?,
                )
            }
            ("default", Some(v)) => {
                parsed.default =
                    Some(serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.to_string())))
            }
            ("", None) => {}
            _ => return Err(invalid(&format!("unrecognised attribute '{part}'"))),
        }
    }

    Ok(parsed)
}

fn group_of(value: Option<&str>) -> Group {
    match value {
        Some(name) if !name.is_empty() => Group::Named(name.to_string()),
        _ => Group::Auto,
    }
}
