use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentScope {
    Vector,
    Metadata,
    Record,
}

impl SegmentScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentScope::Vector => "VECTOR",
            SegmentScope::Metadata => "METADATA",
            SegmentScope::Record => "RECORD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VECTOR" => Some(SegmentScope::Vector),
            "METADATA" => Some(SegmentScope::Metadata),
            "RECORD" => Some(SegmentScope::Record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MetadataValue, SegmentScope};

    #[test]
    fn segment_scope_parses_its_own_names() {
        for scope in [SegmentScope::Vector, SegmentScope::Metadata, SegmentScope::Record] {
            assert_eq!(SegmentScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(SegmentScope::parse("vector"), None);
    }

    #[test]
    fn metadata_values_deserialize_untagged() {
        let values: Vec<MetadataValue> =
            serde_json::from_str(r#"["a", 3, 1.5, true]"#).expect("decode");
        assert_eq!(
            values,
            vec![
                MetadataValue::Str("a".to_string()),
                MetadataValue::Int(3),
                MetadataValue::Float(1.5),
                MetadataValue::Bool(true),
            ]
        );
    }
}
