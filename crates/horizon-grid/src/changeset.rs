//! Wire formats.
//!
//! Everything the engine consumes from or produces for a store: the rowset
//! snapshot, the changeset submitted on save, the per-row save result and the
//! serialized row states used by static rowsets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field::FieldAttrs;
use crate::value::Value;

/// Column name to value.
pub type RowVals = BTreeMap<String, Value>;

/// Suffix of the primary-key columns carrying a row's pre-edit key.
pub const OLD_SUFFIX: &str = ":old";

/// A row as delivered by a snapshot or an insert: positional or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowData {
    Values(Vec<Value>),
    Named(RowVals),
}

impl From<Vec<Value>> for RowData {
    fn from(vals: Vec<Value>) -> Self {
        RowData::Values(vals)
    }
}

impl From<RowVals> for RowData {
    fn from(vals: RowVals) -> Self {
        RowData::Named(vals)
    }
}

/// Schema plus data payload a rowset is (re)populated from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rowset {
    pub fields: Vec<FieldAttrs>,
    pub rows: Vec<RowData>,
    /// Space-separated primary-key columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_add_rows: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_remove_rows: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_change_rows: Option<bool>,
}

impl Rowset {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Kind of one changeset entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Update,
    Remove,
}

/// One changed row. Key columns are repeated as `"<col>:old"` for updates
/// and removals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub values: RowVals,
}

/// The packed dirty set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub rows: Vec<ChangeRow>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Body of a save request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub exec: String,
    pub changes: Changeset,
    pub update_id: String,
}

impl SaveRequest {
    pub fn new(changes: Changeset, update_id: impl Into<String>) -> Self {
        Self {
            exec: "save".to_string(),
            changes,
            update_id: update_id.into(),
        }
    }
}

/// Store verdict on one changeset entry, in changeset order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRow {
    /// The store deleted the row.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, String>,
    /// Canonical values to write back, positional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl ResultRow {
    pub fn failed(&self) -> bool {
        self.error.is_some() || !self.field_errors.is_empty()
    }
}

/// Response to a save request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveResult {
    pub rows: Vec<ResultRow>,
}

/// Saved state of one row of a static rowset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowState {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_new: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
    pub vals: RowVals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_wire_format() {
        let mut values = RowVals::new();
        values.insert("name".into(), "b".into());
        values.insert("id:old".into(), 1.into());
        let changes = Changeset {
            rows: vec![ChangeRow {
                change_type: ChangeType::Update,
                values,
            }],
        };
        let json = serde_json::to_string(&SaveRequest::new(changes, "abc")).unwrap();
        assert_eq!(
            json,
            r#"{"exec":"save","changes":{"rows":[{"type":"update","values":{"id:old":1,"name":"b"}}]},"update_id":"abc"}"#
        );
    }

    #[test]
    fn test_save_result_parsing() {
        let result: SaveResult = serde_json::from_str(
            r#"{"rows": [{"remove": true}, {"error": "nope"}, {"field_errors": {"a": "bad"}}, {"values": [1, "x"]}]}"#,
        )
        .unwrap();
        assert!(result.rows[0].remove);
        assert!(result.rows[1].failed());
        assert!(result.rows[2].failed());
        assert!(!result.rows[3].failed());
        assert_eq!(result.rows[3].values.as_deref(), Some(&[Value::Int(1), Value::from("x")][..]));
    }

    #[test]
    fn test_rowset_snapshot() {
        let rs = Rowset::from_json(
            r#"{"fields": [{"name": "id", "type": "number"}, {"name": "v"}], "pk": "id",
                "rows": [[1, "a"], {"id": 2, "v": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(rs.fields.len(), 2);
        assert_eq!(rs.pk.as_deref(), Some("id"));
        assert!(matches!(rs.rows[0], RowData::Values(_)));
        assert!(matches!(rs.rows[1], RowData::Named(_)));
    }

    #[test]
    fn test_row_state_omits_false_flags() {
        let state = RowState {
            is_new: true,
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&state).unwrap(), r#"{"is_new":true,"vals":{}}"#);
    }
}
