//! Builds a small task outline, edits it and saves it back into the
//! in-memory rowset.
//!
//! Run with: RUST_LOG=horizon_grid=debug cargo run -p horizon-grid --example outline

use horizon_grid::{FieldAttrs, GroupOptions, RowData, Rowset, RowsetConfig, RowsetModel, SaveEffect, Value};
use tracing_subscriber::EnvFilter;

fn outline() -> Rowset {
    let task = |id: i64, parent: Option<i64>, title: &str, hours: i64| {
        RowData::Values(vec![id.into(), parent.into(), title.into(), hours.into()])
    };
    Rowset {
        fields: vec![
            FieldAttrs::named("id"),
            FieldAttrs::named("parent_id"),
            FieldAttrs {
                not_null: Some(true),
                ..FieldAttrs::named("title")
            },
            FieldAttrs::named("hours"),
        ],
        rows: vec![
            task(1, None, "Release", 0),
            task(2, Some(1), "Changelog", 2),
            task(3, Some(1), "Packaging", 6),
            task(4, Some(3), "Signing", 3),
            task(5, None, "Docs", 12),
        ],
        pk: Some("id".into()),
        parent_col: Some("parent_id".into()),
        name_col: Some("title".into()),
        ..Default::default()
    }
}

fn print(model: &RowsetModel) {
    for &row in model.rows() {
        let depth = model.row(row).map_or(0, |r| r.depth());
        let hours = model.cell_input_val(row, "hours").cloned().unwrap_or(Value::Null);
        println!("{}{} ({}h)", "  ".repeat(depth), model.row_label(row), hours);
    }
    println!();
}

fn main() -> horizon_grid::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut model = RowsetModel::new(RowsetConfig::with_rowset(outline()));
    print(&model);

    let packaging = model.lookup("id", &[3.into()])?[0];
    model.toggle_collapsed(packaging, false);
    model.set_cell_val(packaging, "hours", 8, true)?;
    print(&model);

    for group in model.row_groups(&GroupOptions::new("hours/5"))? {
        println!("hours from {}: {} row(s)", group.key_vals[0], group.rows().len());
    }

    if let SaveEffect::Saved = model.save() {
        println!("saved {} row(s)", model.serialize_all_row_vals().len());
    }
    Ok(())
}
