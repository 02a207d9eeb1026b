//! Schema profile — the immutable description shared by a file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GicsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemIdType {
    Number,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecStrategy {
    Value,
    Structural,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub codec_strategy: Option<CodecStrategy>,
    /// Categorical fields only: string -> small non-negative integer.
    #[serde(default)]
    pub enum_map: HashMap<String, u32>,
}

impl FieldSpec {
    pub fn numeric(name: impl Into<String>, strategy: CodecStrategy) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Numeric,
            codec_strategy: Some(strategy),
            enum_map: HashMap::new(),
        }
    }

    pub fn categorical(name: impl Into<String>, enum_map: HashMap<String, u32>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Categorical,
            codec_strategy: None,
            enum_map,
        }
    }

    /// Reverse lookup used by the reader to turn a wire integer back into a
    /// category string. An unrecognised integer passes through unchanged —
    /// see the categorical-passthrough design note.
    pub fn enum_reverse_lookup(&self, value: u32) -> Option<&str> {
        self.enum_map.iter().find(|(_, &v)| v == value).map(|(k, _)| k.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaProfile {
    pub id: String,
    pub version: u32,
    pub item_id_type: ItemIdType,
    pub fields: Vec<FieldSpec>,
}

pub const LEGACY_SCHEMA_ID: &str = "legacy";

impl SchemaProfile {
    /// Build and validate a schema: field names must be unique, and within
    /// each categorical field's enum map no two strings may map to the same
    /// integer (both would make the wire format ambiguous in a way the
    /// source system's construction-time checks would have caught).
    pub fn new(id: impl Into<String>, version: u32, item_id_type: ItemIdType, fields: Vec<FieldSpec>) -> Result<Self, GicsError> {
        let mut seen_names = std::collections::HashSet::new();
        for f in &fields {
            if !seen_names.insert(f.name.clone()) {
                return Err(GicsError::SchemaViolation(format!("duplicate field name {:?}", f.name)));
            }
            if f.field_type == FieldType::Categorical {
                let mut seen_values = std::collections::HashSet::new();
                for &v in f.enum_map.values() {
                    if !seen_values.insert(v) {
                        return Err(GicsError::SchemaViolation(format!(
                            "field {:?} has two enum strings mapped to the same value {v}",
                            f.name
                        )));
                    }
                }
            }
        }
        Ok(Self {
            id: id.into(),
            version,
            item_id_type,
            fields,
        })
    }

    /// The implicit schema used by files with no embedded schema payload:
    /// `{price: numeric/value, quantity: numeric/structural}`, integer keys.
    pub fn legacy() -> Self {
        Self {
            id: LEGACY_SCHEMA_ID.to_string(),
            version: 1,
            item_id_type: ItemIdType::Number,
            fields: vec![
                FieldSpec::numeric("price", CodecStrategy::Value),
                FieldSpec::numeric("quantity", CodecStrategy::Structural),
            ],
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.id == LEGACY_SCHEMA_ID
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("SchemaProfile serialization cannot fail")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, GicsError> {
        serde_json::from_slice(bytes).map_err(|e| GicsError::Integrity(format!("malformed schema payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_schema_shape() {
        let s = SchemaProfile::legacy();
        assert!(s.is_legacy());
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.fields[0].name, "price");
        assert_eq!(s.fields[1].name, "quantity");
        assert_eq!(s.item_id_type, ItemIdType::Number);
    }

    #[test]
    fn duplicate_field_name_rejected() {
        let fields = vec![
            FieldSpec::numeric("x", CodecStrategy::Value),
            FieldSpec::numeric("x", CodecStrategy::Structural),
        ];
        assert!(SchemaProfile::new("s", 1, ItemIdType::Number, fields).is_err());
    }

    #[test]
    fn duplicate_enum_value_rejected() {
        let mut enum_map = HashMap::new();
        enum_map.insert("a".to_string(), 0);
        enum_map.insert("b".to_string(), 0);
        let fields = vec![FieldSpec::categorical("cat", enum_map)];
        assert!(SchemaProfile::new("s", 1, ItemIdType::Number, fields).is_err());
    }

    #[test]
    fn schema_json_roundtrip() {
        let mut enum_map = HashMap::new();
        enum_map.insert("buy".to_string(), 0);
        enum_map.insert("sell".to_string(), 1);
        let fields = vec![
            FieldSpec::numeric("price", CodecStrategy::Value),
            FieldSpec::categorical("side", enum_map),
        ];
        let schema = SchemaProfile::new("trades", 3, ItemIdType::String, fields).unwrap();
        let bytes = schema.to_json_bytes();
        let back = SchemaProfile::from_json_bytes(&bytes).unwrap();
        assert_eq!(back.id, "trades");
        assert_eq!(back.fields.len(), 2);
    }
}
