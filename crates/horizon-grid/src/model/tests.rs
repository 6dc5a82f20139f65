use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::changeset::{ChangeType, RowData};
use crate::index::GroupOptions;
use crate::shared::SharedLimits;
use crate::store::{CellChange, RowChange};

fn tree_rowset() -> Rowset {
    let row = |id: i64, parent: Option<i64>, name: &str, pos: i64| {
        RowData::Values(vec![id.into(), parent.into(), name.into(), pos.into()])
    };
    Rowset {
        fields: vec![
            FieldAttrs::named("id"),
            FieldAttrs::named("parent_id"),
            FieldAttrs::named("name"),
            FieldAttrs::named("pos"),
        ],
        rows: vec![
            row(1, None, "root", 1),
            row(2, Some(1), "b", 2),
            row(3, Some(1), "a", 1),
            row(4, Some(3), "leaf", 1),
            row(5, None, "root2", 2),
        ],
        pk: Some("id".into()),
        parent_col: Some("parent_id".into()),
        pos_col: Some("pos".into()),
        ..Default::default()
    }
}

/// A rowset with no save target: removals are physical.
fn local(rowset: Rowset) -> RowsetModel {
    let mut m = RowsetModel::new(RowsetConfig::default());
    m.set_rowset(rowset);
    m
}

fn names(m: &RowsetModel) -> Vec<String> {
    m.rows()
        .iter()
        .map(|&r| m.cell_input_val(r, "name").unwrap().to_string())
        .collect()
}

fn row_by_id(m: &RowsetModel, id: i64) -> RowId {
    m.lookup("id", &[id.into()]).unwrap()[0]
}

#[test]
fn test_tree_display_order() {
    let m = local(tree_rowset());
    assert!(m.is_tree());
    assert_eq!(m.tree_build(), Some(TreeBuild::Built));
    assert_eq!(m.id_col(), Some("id"));
    assert_eq!(names(&m), ["root", "a", "leaf", "b", "root2"]);
    let leaf = row_by_id(&m, 4);
    assert_eq!(m.row(leaf).unwrap().depth(), 2);
}

#[test]
fn test_cycle_presents_rows_flat() {
    let rowset = Rowset {
        fields: vec![FieldAttrs::named("id"), FieldAttrs::named("parent_id"), FieldAttrs::named("name")],
        rows: vec![
            RowData::Values(vec![1.into(), 2.into(), "x".into()]),
            RowData::Values(vec![2.into(), 1.into(), "y".into()]),
            RowData::Values(vec![3.into(), Value::Null, "z".into()]),
        ],
        pk: Some("id".into()),
        parent_col: Some("parent_id".into()),
        ..Default::default()
    };
    let m = local(rowset);
    assert_eq!(m.tree_build(), Some(TreeBuild::Cycle));
    assert!(!m.is_tree());
    assert_eq!(names(&m), ["x", "y", "z"]);
    for &row in m.rows() {
        assert_eq!(m.row(row).unwrap().depth(), 0);
    }
}

#[test]
fn test_collapse_hides_descendants() {
    let mut m = local(tree_rowset());
    let root = row_by_id(&m, 1);
    m.set_collapsed(Some(root), true, false);
    assert_eq!(names(&m), ["root", "root2"]);
    assert!(!m.is_row_visible(row_by_id(&m, 4)));

    m.toggle_collapsed(root, false);
    assert_eq!(names(&m), ["root", "a", "leaf", "b", "root2"]);

    m.set_collapsed_all(true);
    assert_eq!(names(&m), ["root", "root2"]);
    m.toggle_collapsed(root, false);
    // The inner row stayed collapsed.
    assert_eq!(names(&m), ["root", "a", "b", "root2"]);
}

#[test]
fn test_change_row_parent() {
    let mut m = local(tree_rowset());
    let (root, a, leaf, root2) = (row_by_id(&m, 1), row_by_id(&m, 3), row_by_id(&m, 4), row_by_id(&m, 5));

    assert!(m.change_row_parent(leaf, Some(root2)).unwrap());
    assert_eq!(names(&m), ["root", "a", "b", "root2", "leaf"]);
    assert_eq!(m.cell_input_val(leaf, "parent_id"), Some(&Value::Int(5)));
    assert_eq!(m.row(leaf).unwrap().parent_rows(), [root2]);

    // A row cannot move below its own descendant.
    assert!(!m.change_row_parent(root, Some(a)).unwrap());
    assert!(!m.change_row_parent(root, Some(root)).unwrap());
    assert_eq!(m.row(a).unwrap().parent_row(), Some(root));
}

#[test]
fn test_insert_child_at_position() {
    let mut m = local(tree_rowset());
    let root = row_by_id(&m, 1);
    let n = m.insert_rows(
        vec![RowData::Named([("id".to_string(), Value::Int(6)), ("name".to_string(), Value::from("first"))].into())],
        &InsertOptions {
            input: true,
            parent: Some(root),
            at: Some(0),
            ..Default::default()
        },
    );
    assert_eq!(n, 1);
    assert_eq!(names(&m), ["root", "first", "a", "leaf", "b", "root2"]);
    let first = m.rows()[1];
    assert_eq!(m.cell_input_val(first, "parent_id"), Some(&Value::Int(1)));
    let positions: Vec<Value> = m
        .row(root)
        .unwrap()
        .child_rows()
        .iter()
        .map(|&r| m.cell_input_val(r, "pos").unwrap().clone())
        .collect();
    assert_eq!(positions, [Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(m.row(first).unwrap().is_new);
}

#[test]
fn test_remove_drops_subtree() {
    let mut m = local(tree_rowset());
    let removed = Arc::new(Mutex::new(Vec::new()));
    let r = removed.clone();
    m.signals().rows_removed.connect(move |rows: &Vec<RowId>| r.lock().extend(rows.iter().copied()));

    let root = row_by_id(&m, 1);
    assert!(m.remove_rows(&[root], &RemoveOptions { input: true, ..Default::default() }));
    assert_eq!(m.row_count(), 1);
    assert_eq!(names(&m), ["root2"]);
    assert_eq!(removed.lock().len(), 4);
    assert!(m.lookup("id", &[3.into()]).unwrap().is_empty());
    // The remaining root is renumbered.
    let root2 = row_by_id(&m, 5);
    assert_eq!(m.cell_input_val(root2, "pos"), Some(&Value::Int(1)));
}

#[test]
fn test_server_insert_after_value_change_is_indexed_once() {
    let mut rowset = tree_rowset();
    rowset.pk = None;
    rowset.id_col = Some("id".into());
    let mut m = local(rowset);
    let b = row_by_id(&m, 2);
    m.reset_cell_val(b, "name", "cc").unwrap();

    let n = m.insert_rows(
        vec![RowData::Named(
            [
                ("id".to_string(), Value::Int(9)),
                ("parent_id".to_string(), Value::Int(1)),
                ("name".to_string(), Value::from("n")),
            ]
            .into(),
        )],
        &InsertOptions {
            from_server: true,
            ..Default::default()
        },
    );
    assert_eq!(n, 1);
    let found = m.lookup("id", &[9.into()]).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(m.row(found[0]).unwrap().parent_row(), Some(row_by_id(&m, 1)));
    let groups = m.row_groups(&GroupOptions::new("parent_id")).unwrap();
    let under_root: usize = groups
        .iter()
        .filter(|g| g.key_vals[0] == Value::Int(1))
        .map(|g| g.rows().len())
        .sum();
    assert_eq!(under_root, 3);
}

#[test]
fn test_marking_a_parent_marks_its_subtree() {
    let mut m = RowsetModel::new(RowsetConfig {
        save_on_remove_row: false,
        ..RowsetConfig::with_url("https://example.com/rowsets/tree")
    });
    m.set_rowset(tree_rowset());
    let (root, b, a, leaf, root2) = (
        row_by_id(&m, 1),
        row_by_id(&m, 2),
        row_by_id(&m, 3),
        row_by_id(&m, 4),
        row_by_id(&m, 5),
    );

    assert!(m.remove_rows(&[root], &RemoveOptions { input: true, ..Default::default() }));
    for row in [root, b, a, leaf] {
        assert!(m.row(row).unwrap().removed);
    }
    assert!(!m.row(root2).unwrap().removed);
    // root2 moved up to position 1 as well.
    let (changes, _) = m.pack_changes();
    let removes = changes.rows.iter().filter(|c| c.change_type == ChangeType::Remove).count();
    assert_eq!(removes, 4);
    assert_eq!(m.cell_input_val(root2, "pos"), Some(&Value::Int(1)));

    assert!(m.toggle_remove_rows(&[root]));
    for row in [root, b, a, leaf] {
        assert!(!m.row(row).unwrap().removed);
    }
    assert!(!m.has_changes());
}

#[test]
fn test_one_notification_per_edit() {
    let mut m = local(tree_rowset());
    let cells = Arc::new(Mutex::new(Vec::new()));
    let flags = Arc::new(Mutex::new(Vec::new()));
    let (c, f) = (cells.clone(), flags.clone());
    m.signals()
        .cell_state_changed
        .connect(move |(_, change): &(RowId, CellChange)| c.lock().push(change.key.clone()));
    m.signals()
        .row_state_changed
        .connect(move |(_, change): &(RowId, RowChange)| f.lock().push(change.clone()));

    let row = row_by_id(&m, 2);
    m.set_cell_val(row, "name", "bb", true).unwrap();
    assert_eq!(*cells.lock(), ["input_val", "errors"]);
    assert_eq!(
        *flags.lock(),
        [RowChange::Flag {
            flag: crate::row::RowFlag::Modified,
            value: true,
            old: false
        }]
    );
}

#[test]
fn test_add_and_remove_field() {
    let mut m = local(tree_rowset());
    let fields_changed = Arc::new(Mutex::new(0));
    let fc = fields_changed.clone();
    m.signals().fields_changed.connect(move |_| *fc.lock() += 1);

    let row = row_by_id(&m, 2);
    m.set_cell_val(row, "name", "bb", true).unwrap();
    let fi = m.add_field(FieldAttrs {
        default: Some("n/a".into()),
        ..FieldAttrs::named("note")
    });
    assert_eq!(fi, 4);
    assert_eq!(m.cell_val(row, "note"), Some(&Value::Null));
    assert_eq!(m.rowset().unwrap().fields.len(), 5);

    let removed = m.remove_field("parent_id").unwrap();
    assert_eq!(removed.name, "parent_id");
    assert_eq!(m.field("note").unwrap().val_index, 3);
    assert_eq!(m.cell_input_val(row, "name"), Some(&Value::from("bb")));
    assert_eq!(m.cell_val(row, "name"), Some(&Value::from("b")));
    assert!(m.parent_col().is_none());
    assert!(m.remove_field("parent_id").is_err());
    assert_eq!(*fields_changed.lock(), 2);
}

#[test]
fn test_unknown_reference_disables_feature() {
    let mut rowset = tree_rowset();
    rowset.pos_col = Some("position".into());
    let m = local(rowset);
    assert!(m.pos_field().is_none());
    // Without a position fallback the tree keeps load order.
    assert_eq!(names(&m), ["root", "b", "a", "leaf", "root2"]);
}

#[test]
fn test_lookup_validation() {
    let shared = SharedRowsets::new(SharedLimits::default(), |_| {
        RowsetModel::new(RowsetConfig::with_rowset(Rowset {
            fields: vec![FieldAttrs::named("code"), FieldAttrs::named("label")],
            rows: vec![
                RowData::Values(vec!["eu".into(), "Europe".into()]),
                RowData::Values(vec!["us".into(), "America".into()]),
            ],
            pk: Some("code".into()),
            ..Default::default()
        }))
    });
    let mut m = local(Rowset {
        fields: vec![
            FieldAttrs::named("id"),
            FieldAttrs {
                lookup_rowset_name: Some("regions".into()),
                ..FieldAttrs::named("region")
            },
        ],
        rows: vec![RowData::Values(vec![1.into(), "eu".into()])],
        pk: Some("id".into()),
        ..Default::default()
    });
    let unbound = m.field("region").unwrap().validator_count();
    m.bind_lookups(&shared);
    assert_eq!(shared.ref_count("regions"), 1);
    assert_eq!(m.field("region").unwrap().validator_count(), unbound + 1);

    let row = m.rows()[0];
    m.set_cell_val(row, "region", "xx", true).unwrap();
    assert!(!m.cell_errors(row, "region").unwrap().passed);
    m.set_cell_val(row, "region", "us", true).unwrap();
    assert!(m.cell_errors(row, "region").unwrap().passed);

    m.release_lookups(&shared);
    assert_eq!(shared.ref_count("regions"), 0);
    assert_eq!(m.field("region").unwrap().validator_count(), unbound);
}

#[test]
fn test_row_label() {
    let mut rowset = tree_rowset();
    rowset.name_col = Some("name".into());
    let m = local(rowset);
    let row = row_by_id(&m, 3);
    assert_eq!(m.row_label(row), "a");

    let m = local(tree_rowset());
    assert_eq!(m.row_label(row_by_id(&m, 3)), "3");
}

#[test]
fn test_custom_converter_and_default() {
    let mut m = local(tree_rowset());
    m.set_converter(
        "name",
        Arc::new(|v: Value, _: &Field| match v {
            Value::Text(s) => Value::Text(s.trim().to_string()),
            v => v,
        }),
    );
    m.set_client_default("pos", ClientDefault::Value(Value::Int(99)));
    let row = row_by_id(&m, 2);
    m.set_cell_val(row, "name", "  padded ", true).unwrap();
    assert_eq!(m.cell_input_val(row, "name"), Some(&Value::from("padded")));

    let added = m.insert_rows(vec![RowData::Values(vec![7.into()])], &InsertOptions::default());
    assert_eq!(added, 1);
    let row = row_by_id(&m, 7);
    assert_eq!(m.cell_val(row, "pos"), Some(&Value::Int(99)));
    assert_eq!(m.row(row).unwrap().parent_row(), None);
}
