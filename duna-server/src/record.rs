//! The DUNA record and its payload types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transform::SourceTransform;

/// Membership status given to records created without one.
pub const DEFAULT_MEMBERSHIP_STATUS: &str = "pending";

/// A value in a record's free-form parameters map.
///
/// Serialized as plain JSON. Maps are key-ordered so the prompt rendering of
/// a record never depends on insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    /// Integers stay exact; anything with a fraction or exponent is a float.
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(n) => write!(f, "{n}"),
            ParamValue::Float(n) => write!(f, "{n}"),
            ParamValue::Text(s) => write!(f, "{s:?}"),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ParamValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A persisted DUNA record.
///
/// `contract_generated`, `contract_source`, `contract_address` and
/// `source_transform` are the pipeline-state fields. They are only ever
/// written together, by the contract pipeline, and `contract_generated`
/// never goes back to false. `source_transform` is the policy
/// `contract_source` was stored with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DunaRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub membership_status: String,
    pub compliance_level: i64,
    pub parameters: BTreeMap<String, ParamValue>,
    pub contract_generated: bool,
    pub contract_source: String,
    pub contract_address: String,
    #[serde(default)]
    pub source_transform: SourceTransform,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_membership_status")]
    pub membership_status: String,
    #[serde(default)]
    pub compliance_level: i64,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

impl NewRecord {
    /// A record with only a name; everything else takes its default.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            membership_status: default_membership_status(),
            compliance_level: 0,
            parameters: BTreeMap::new(),
        }
    }
}

fn default_membership_status() -> String {
    DEFAULT_MEMBERSHIP_STATUS.to_string()
}

/// Partial update of a record's descriptive fields.
///
/// The pipeline-state fields are deliberately absent: only the contract
/// pipeline writes them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub membership_status: Option<String>,
    pub compliance_level: Option<i64>,
    pub parameters: Option<BTreeMap<String, ParamValue>>,
}

impl RecordPatch {
    /// Apply this patch to `record` in place.
    pub fn apply(self, record: &mut DunaRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(status) = self.membership_status {
            record.membership_status = status;
        }
        if let Some(level) = self.compliance_level {
            record.compliance_level = level;
        }
        if let Some(parameters) = self.parameters {
            record.parameters = parameters;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_defaults() {
        let rec: NewRecord = serde_json::from_str(r#"{"name":"Alpha Co"}"#).unwrap();
        assert_eq!(rec.name, "Alpha Co");
        assert_eq!(rec.description, "");
        assert_eq!(rec.membership_status, "pending");
        assert_eq!(rec.compliance_level, 0);
        assert!(rec.parameters.is_empty());
    }

    #[test]
    fn params_parse_as_tagged_values() {
        let rec: NewRecord = serde_json::from_str(
            r#"{
                "name": "Alpha Co",
                "membershipStatus": "active",
                "complianceLevel": 3,
                "parameters": {
                    "quorum": 51,
                    "jurisdiction": "Wyoming",
                    "openMembership": true,
                    "treasury": {"multisig": ["0xabc", "0xdef"], "threshold": 2},
                    "notes": null
                }
            }"#,
        )
        .unwrap();
        assert_eq!(rec.parameters["quorum"], ParamValue::Int(51));
        assert_eq!(rec.parameters["jurisdiction"], ParamValue::Text("Wyoming".into()));
        assert_eq!(rec.parameters["openMembership"], ParamValue::Bool(true));
        assert_eq!(rec.parameters["notes"], ParamValue::Null);
        match &rec.parameters["treasury"] {
            ParamValue::Map(m) => {
                assert_eq!(m["threshold"], ParamValue::Int(2));
                assert!(matches!(&m["multisig"], ParamValue::List(l) if l.len() == 2));
            }
            other => panic!("Expected map, got {other:?}"),
        }
    }

    #[test]
    fn large_integers_survive_a_round_trip() {
        let json = r#"{"supply":9007199254740993,"min":-9223372036854775808,"ratio":0.25,"whole":2.0}"#;
        let params: BTreeMap<String, ParamValue> = serde_json::from_str(json).unwrap();
        assert_eq!(params["supply"], ParamValue::Int(9_007_199_254_740_993));
        assert_eq!(params["min"], ParamValue::Int(i64::MIN));
        assert_eq!(params["ratio"], ParamValue::Float(0.25));
        assert_eq!(params["whole"], ParamValue::Float(2.0));

        let back = serde_json::to_string(&params).unwrap();
        assert!(back.contains("9007199254740993"), "{back}");
        assert_eq!(params["supply"].to_string(), "9007199254740993");
    }

    #[test]
    fn param_display_is_stable() {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), ParamValue::Float(1.5));
        inner.insert("a".to_string(), ParamValue::Text("x".into()));
        let value = ParamValue::List(vec![
            ParamValue::Int(3),
            ParamValue::Bool(false),
            ParamValue::Map(inner),
            ParamValue::Null,
        ]);
        assert_eq!(value.to_string(), r#"[3, false, {a: "x", b: 1.5}, null]"#);
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let now = Utc::now();
        let mut rec = DunaRecord {
            id: "01TEST".into(),
            name: "Alpha Co".into(),
            description: "desc".into(),
            membership_status: "active".into(),
            compliance_level: 3,
            parameters: BTreeMap::new(),
            contract_generated: false,
            contract_source: String::new(),
            contract_address: String::new(),
            source_transform: SourceTransform::Identity,
            created_at: now,
            updated_at: now,
        };
        RecordPatch {
            compliance_level: Some(5),
            ..Default::default()
        }
        .apply(&mut rec);
        assert_eq!(rec.compliance_level, 5);
        assert_eq!(rec.name, "Alpha Co");
        assert_eq!(rec.membership_status, "active");
    }
}
