//! Index manager.
//!
//! An [`Index`] is a nested lookup tree over a column tuple: one level per
//! column, keyed by the (optionally bucketed) cell value, ending in a list of
//! rows. Levels keep their keys in first-seen order so that grouping output
//! follows load order.
//!
//! Indices built over the whole rowset live in an [`IndexCache`] keyed by
//! column list and range definition. The cache is told about row inserts (which
//! append in place) and about removals and value changes (which invalidate);
//! an invalid index is rebuilt on the next lookup.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate};
use horizon_grid_core::logging::{span_names, targets};
use horizon_grid_core::{GridError, PerfSpan, Result};
use serde::{Deserialize, Serialize};

use crate::row::RowId;
use crate::store::RowStore;
use crate::value::{Value, ValueKey};

/// Calendar unit of a date bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeUnit {
    Month,
    Year,
}

/// Bucketing rule for one column.
///
/// Without a unit, numbers fall into `freq`-wide buckets starting at
/// `offset`. With a unit, values are Unix timestamps (seconds) grouped by
/// calendar month or year; a unit without `freq` means one unit per bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<RangeUnit>,
}

/// Range definitions keyed by column name.
pub type RangeDefs = BTreeMap<String, RangeDef>;

impl RangeDef {
    pub fn numeric(freq: f64) -> Self {
        Self {
            freq: Some(freq),
            ..Default::default()
        }
    }

    pub fn calendar(unit: RangeUnit) -> Self {
        Self {
            unit: Some(unit),
            ..Default::default()
        }
    }

    fn effective_freq(&self) -> Option<f64> {
        match (self.freq, self.unit) {
            (None, Some(_)) => Some(1.0),
            (Some(f), _) if f > 0.0 => Some(f),
            _ => None,
        }
    }

    /// Map a cell value onto its bucket. Null and non-numeric values are
    /// their own bucket.
    pub fn bucket(&self, val: &Value) -> Value {
        let (Some(freq), Some(v)) = (self.effective_freq(), val.to_num()) else {
            return val.clone();
        };
        if val.as_str().is_some() {
            return val.clone();
        }
        let offset = self.offset.unwrap_or(0.0);
        match self.unit {
            None => Value::from_num(((v - offset) / freq).floor() * freq),
            Some(RangeUnit::Month) => month_start(v, offset as i32).map_or(Value::Null, Value::Int),
            Some(RangeUnit::Year) => year_start(v, offset as i32).map_or(Value::Null, Value::Int),
        }
    }

    /// Human-readable label of a bucket produced by [`bucket`](Self::bucket).
    pub fn label(&self, bucket: &Value) -> String {
        let (Some(freq), Some(v)) = (self.effective_freq(), bucket.to_num()) else {
            return bucket.to_string();
        };
        let span = freq.floor() as i32;
        match self.unit {
            None if freq == 1.0 => bucket.to_string(),
            None => format!("{} .. {}", bucket, Value::from_num(v + freq - 1.0)),
            Some(RangeUnit::Month) => {
                let first = month_label(v);
                if span > 1 {
                    let last = month_start(v, span - 1).map(|t| month_label(t as f64));
                    format!("{} .. {}", first, last.unwrap_or_default())
                } else {
                    first
                }
            }
            Some(RangeUnit::Year) => {
                let first = year_label(v);
                if span > 1 {
                    let last = year_start(v, span - 1).map(|t| year_label(t as f64));
                    format!("{} .. {}", first, last.unwrap_or_default())
                } else {
                    first
                }
            }
        }
    }
}

fn month_start(ts: f64, offset: i32) -> Option<i64> {
    let date = DateTime::from_timestamp(ts.floor() as i64, 0)?.date_naive();
    let months = date.year() * 12 + date.month0() as i32 + offset;
    let first = NaiveDate::from_ymd_opt(months.div_euclid(12), months.rem_euclid(12) as u32 + 1, 1)?;
    Some(first.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

fn year_start(ts: f64, offset: i32) -> Option<i64> {
    let date = DateTime::from_timestamp(ts.floor() as i64, 0)?.date_naive();
    let first = NaiveDate::from_ymd_opt(date.year() + offset, 1, 1)?;
    Some(first.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

fn month_label(ts: f64) -> String {
    DateTime::from_timestamp(ts as i64, 0)
        .map(|d| d.format("%Y-%m").to_string())
        .unwrap_or_default()
}

fn year_label(ts: f64) -> String {
    DateTime::from_timestamp(ts as i64, 0)
        .map(|d| d.format("%Y").to_string())
        .unwrap_or_default()
}

/// Split `col[/offset][/unit][/freq]` into the column name and its range.
///
/// Trailing segments are taken from the right: frequency first, then unit,
/// then offset. So `"ts/month"` is a month bucket on `ts` and `"age/10"` a
/// ten-wide numeric bucket on `age`.
pub fn parse_range_def(text: &str) -> Result<(String, Option<RangeDef>)> {
    let mut parts: Vec<&str> = text.split('/').collect();
    let col = parts.remove(0).trim().to_string();
    if col.is_empty() || parts.len() > 3 {
        return Err(GridError::InvalidRangeDef(text.to_string()));
    }
    if parts.is_empty() {
        return Ok((col, None));
    }
    let num = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| GridError::InvalidRangeDef(text.to_string()))
    };
    let unit = |s: &str| match s.trim() {
        "month" => Ok(RangeUnit::Month),
        "year" => Ok(RangeUnit::Year),
        _ => Err(GridError::InvalidRangeDef(text.to_string())),
    };
    let mut def = RangeDef::default();
    // A lone trailing unit reads naturally ("ts/year"); anything else is
    // positional from the right.
    match parts.as_slice() {
        [one] => match unit(one) {
            Ok(u) => def.unit = Some(u),
            Err(_) => def.freq = Some(num(one)?),
        },
        [u, freq] => {
            def.unit = Some(unit(u)?);
            def.freq = Some(num(freq)?);
        }
        [offset, u, freq] => {
            def.offset = Some(num(offset)?);
            def.unit = Some(unit(u)?);
            def.freq = Some(num(freq)?);
        }
        _ => {}
    }
    Ok((col, Some(def)))
}

/// One node of an index tree.
#[derive(Debug, Clone)]
pub enum IndexNode {
    Branch(IndexLevel),
    Leaf(Vec<RowId>),
}

/// One key of an index level.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The (bucketed) value this entry is keyed by.
    pub key: Value,
    /// Display label, computed when the entry was first created.
    pub label: String,
    pub node: IndexNode,
}

/// A level of an index tree, in first-seen key order.
#[derive(Debug, Clone, Default)]
pub struct IndexLevel {
    entries: Vec<IndexEntry>,
    positions: HashMap<ValueKey, usize>,
}

impl IndexLevel {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&IndexEntry> {
        self.positions.get(&key.key()).map(|&i| &self.entries[i])
    }

    fn get_or_insert(&mut self, key: Value, leaf: bool, label: String) -> &mut IndexNode {
        let pos = match self.positions.get(&key.key()) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.positions.insert(key.key(), i);
                self.entries.push(IndexEntry {
                    label,
                    key,
                    node: if leaf {
                        IndexNode::Leaf(Vec::new())
                    } else {
                        IndexNode::Branch(IndexLevel::default())
                    },
                });
                i
            }
        };
        &mut self.entries[pos].node
    }
}

/// Nested lookup tree over a column tuple.
#[derive(Debug, Clone)]
pub struct Index {
    cols: Vec<String>,
    ranges: Vec<Option<RangeDef>>,
    fis: Vec<usize>,
    tree: Option<IndexLevel>,
}

impl Index {
    /// Create an (unbuilt) index over `cols`, a space-separated column list.
    pub fn new(store: &RowStore, cols: &str, range_defs: &RangeDefs) -> Result<Self> {
        let cols: Vec<String> = cols.split_whitespace().map(str::to_string).collect();
        let fis = resolve_cols(store, &cols)?;
        let ranges = cols.iter().map(|c| range_defs.get(c).cloned()).collect();
        Ok(Self {
            cols,
            ranges,
            fis,
            tree: None,
        })
    }

    /// Build an index over an explicit row list.
    pub fn build(store: &RowStore, cols: &str, range_defs: &RangeDefs, rows: &[RowId]) -> Result<Self> {
        let mut index = Self::new(store, cols, range_defs)?;
        index.rebuild_from(store, rows);
        Ok(index)
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn is_valid(&self) -> bool {
        self.tree.is_some()
    }

    pub fn invalidate(&mut self) {
        self.tree = None;
    }

    /// Rebuild from every row of the store.
    pub fn rebuild(&mut self, store: &RowStore) {
        self.rebuild_from(store, store.all_rows());
    }

    fn rebuild_from(&mut self, store: &RowStore, rows: &[RowId]) {
        let _span = PerfSpan::new(span_names::INDEX_REBUILD);
        match resolve_cols(store, &self.cols) {
            Ok(fis) => self.fis = fis,
            Err(err) => {
                tracing::warn!(target: targets::INDEX, %err, "index columns no longer exist");
                self.tree = Some(IndexLevel::default());
                return;
            }
        }
        self.tree = Some(IndexLevel::default());
        for &row in rows {
            self.add_row(store, row);
        }
        tracing::trace!(target: targets::INDEX, cols = ?self.cols, rows = rows.len(), "index rebuilt");
    }

    fn add_row(&mut self, store: &RowStore, row: RowId) {
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let last = self.fis.len() - 1;
        let mut level = tree;
        for (i, &fi) in self.fis.iter().enumerate() {
            let raw = store.cell_val(row, fi).cloned().unwrap_or_default();
            let range = self.ranges[i].as_ref();
            let key = bucket(range, &raw);
            let label = match range {
                _ if level.get(&key).is_some() => String::new(),
                Some(r) => r.label(&key),
                None => store.field_at(fi).map(|f| f.to_text(&raw)).unwrap_or_default(),
            };
            match level.get_or_insert(key, i == last, label) {
                IndexNode::Branch(next) => level = next,
                IndexNode::Leaf(rows) => {
                    rows.push(row);
                    return;
                }
            }
        }
    }

    /// Append one row in place. An invalid index stays unbuilt until the
    /// next lookup.
    pub fn row_added(&mut self, store: &RowStore, row: RowId) {
        if self.tree.is_some() {
            self.add_row(store, row);
        }
    }

    /// Rows whose (bucketed) values equal `vals`. Empty when nothing matches
    /// or the index has not been built.
    pub fn lookup(&self, vals: &[Value]) -> &[RowId] {
        let Some(mut level) = self.tree.as_ref() else {
            return &[];
        };
        for (i, val) in vals.iter().enumerate().take(self.fis.len()) {
            let key = bucket(self.ranges[i].as_ref(), val);
            match level.get(&key).map(|e| &e.node) {
                Some(IndexNode::Branch(next)) => level = next,
                Some(IndexNode::Leaf(rows)) if i + 1 == self.fis.len() => return rows,
                _ => return &[],
            }
        }
        &[]
    }

    /// The root level of the tree, if built.
    pub fn tree(&self) -> Option<&IndexLevel> {
        self.tree.as_ref()
    }
}

fn bucket(range: Option<&RangeDef>, val: &Value) -> Value {
    match range {
        Some(r) if !val.is_null() => r.bucket(val),
        _ => val.clone(),
    }
}

fn resolve_cols(store: &RowStore, cols: &[String]) -> Result<Vec<usize>> {
    if cols.is_empty() {
        return Err(GridError::UnknownColumn(String::new()));
    }
    cols.iter()
        .map(|c| store.field_index(c).ok_or_else(|| GridError::UnknownColumn(c.clone())))
        .collect()
}

/// Whole-rowset indices keyed by column list and range definition.
#[derive(Debug, Default)]
pub struct IndexCache {
    indices: HashMap<String, Index>,
}

impl IndexCache {
    fn cache_key(cols: &str, range_defs: &RangeDefs) -> String {
        let cols = cols.split_whitespace().collect::<Vec<_>>().join(" ");
        if range_defs.is_empty() {
            cols
        } else {
            let ranges = serde_json::to_string(range_defs).unwrap_or_default();
            format!("{cols} {ranges}")
        }
    }

    /// The index over `cols`, built or rebuilt as needed.
    pub fn index(&mut self, store: &RowStore, cols: &str, range_defs: &RangeDefs) -> Result<&Index> {
        let key = Self::cache_key(cols, range_defs);
        let index = match self.indices.entry(key) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(Index::new(store, cols, range_defs)?)
            }
        };
        if !index.is_valid() {
            index.rebuild(store);
        }
        Ok(index)
    }

    pub fn lookup(&mut self, store: &RowStore, cols: &str, vals: &[Value]) -> Result<Vec<RowId>> {
        Ok(self.index(store, cols, &RangeDefs::new())?.lookup(vals).to_vec())
    }

    pub fn row_added(&mut self, store: &RowStore, row: RowId) {
        for index in self.indices.values_mut() {
            index.row_added(store, row);
        }
    }

    pub fn row_removed(&mut self) {
        self.invalidate_all();
    }

    pub fn val_changed(&mut self) {
        self.invalidate_all();
    }

    pub fn invalidate_all(&mut self) {
        for index in self.indices.values_mut() {
            index.invalidate();
        }
    }

    /// Drop every index. Needed when the schema changes.
    pub fn clear(&mut self) {
        self.indices.clear();
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Options for [`row_groups`].
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// `"c1[/range] c2 > c3 ..."`: levels separated by `>`.
    pub col_groups: String,
    pub range_defs: RangeDefs,
    /// Restrict grouping to these rows instead of the whole rowset.
    pub rows: Option<Vec<RowId>>,
    pub label_sep: String,
}

impl GroupOptions {
    pub fn new(col_groups: impl Into<String>) -> Self {
        Self {
            col_groups: col_groups.into(),
            range_defs: RangeDefs::new(),
            rows: None,
            label_sep: " / ".to_string(),
        }
    }
}

/// A group of rows sharing the key values of one grouping level.
#[derive(Debug, Clone, PartialEq)]
pub struct RowGroup {
    pub key_cols: String,
    pub key_vals: Vec<Value>,
    pub label: String,
    pub content: GroupContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupContent {
    Groups(Vec<RowGroup>),
    Rows(Vec<RowId>),
}

impl RowGroup {
    /// Rows of this group and of all its subgroups.
    pub fn rows(&self) -> Vec<RowId> {
        match &self.content {
            GroupContent::Rows(rows) => rows.clone(),
            GroupContent::Groups(groups) => groups.iter().flat_map(RowGroup::rows).collect(),
        }
    }
}

/// Group rows by one or more levels of columns.
pub fn row_groups(cache: &mut IndexCache, store: &RowStore, opts: &GroupOptions) -> Result<Vec<RowGroup>> {
    let mut range_defs = opts.range_defs.clone();
    let mut levels: Vec<Vec<String>> = Vec::new();
    for level in opts.col_groups.split('>') {
        let mut cols = Vec::new();
        for text in level.split_whitespace() {
            let (col, def) = parse_range_def(text)?;
            if let Some(def) = def {
                range_defs.insert(col.clone(), def);
            }
            cols.push(col);
        }
        if cols.is_empty() {
            return Err(GridError::InvalidRangeDef(opts.col_groups.clone()));
        }
        levels.push(cols);
    }
    let all_cols = levels.iter().flatten().cloned().collect::<Vec<_>>().join(" ");

    let owned;
    let index = match &opts.rows {
        Some(rows) => {
            owned = Index::build(store, &all_cols, &range_defs, rows)?;
            &owned
        }
        None => cache.index(store, &all_cols, &range_defs)?,
    };
    let mut groups = Vec::new();
    if let Some(tree) = index.tree() {
        let walk = GroupWalk {
            levels: &levels,
            sep: &opts.label_sep,
        };
        walk.collect(tree, 0, levels[0].len() - 1, &mut Vec::new(), &mut Vec::new(), &mut groups);
    }
    Ok(groups)
}

struct GroupWalk<'a> {
    levels: &'a [Vec<String>],
    sep: &'a str,
}

impl GroupWalk<'_> {
    fn collect(
        &self,
        level: &IndexLevel,
        gi: usize,
        depth: usize,
        path: &mut Vec<Value>,
        labels: &mut Vec<String>,
        out: &mut Vec<RowGroup>,
    ) {
        for entry in level.entries() {
            path.push(entry.key.clone());
            labels.push(entry.label.clone());
            match (&entry.node, depth) {
                (IndexNode::Branch(sub), d) if d > 0 => {
                    self.collect(sub, gi, d - 1, path, labels, out);
                }
                (node, _) => {
                    let content = match node {
                        IndexNode::Leaf(rows) => GroupContent::Rows(rows.clone()),
                        IndexNode::Branch(sub) => {
                            let mut subgroups = Vec::new();
                            if let Some(next) = self.levels.get(gi + 1) {
                                let depth = next.len() - 1;
                                self.collect(sub, gi + 1, depth, &mut Vec::new(), &mut Vec::new(), &mut subgroups);
                            }
                            GroupContent::Groups(subgroups)
                        }
                    };
                    out.push(RowGroup {
                        key_cols: self.levels[gi].join(" "),
                        key_vals: path.clone(),
                        label: labels.join(self.sep),
                        content,
                    });
                }
            }
            path.pop();
            labels.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn store(names: &[&str], rows: Vec<Vec<Value>>) -> (RowStore, Vec<RowId>) {
        let fields = names.iter().enumerate().map(|(i, n)| Field::new(*n, i)).collect();
        let mut store = RowStore::new(fields);
        let ids = rows.into_iter().map(|r| store.insert_row(r)).collect();
        (store, ids)
    }

    #[test]
    fn test_lookup_single_column() {
        let (store, ids) = store(
            &["a", "b"],
            vec![
                vec![1.into(), "x".into()],
                vec![1.into(), "y".into()],
                vec![2.into(), "z".into()],
            ],
        );
        let mut cache = IndexCache::default();
        assert_eq!(cache.lookup(&store, "a", &[1.into()]).unwrap(), [ids[0], ids[1]]);
        assert_eq!(cache.lookup(&store, "a", &[2.into()]).unwrap(), [ids[2]]);
        assert!(cache.lookup(&store, "a", &[3.into()]).unwrap().is_empty());
        assert!(cache.lookup(&store, "nope", &[1.into()]).is_err());
    }

    #[test]
    fn test_insert_into_invalid_index_waits_for_lookup() {
        let (mut store, ids) = store(&["a"], vec![vec![1.into()], vec![2.into()]]);
        let mut cache = IndexCache::default();
        assert_eq!(cache.lookup(&store, "a", &[1.into()]).unwrap(), [ids[0]]);

        cache.val_changed();
        let added = store.insert_row(vec![1.into()]);
        cache.row_added(&store, added);
        assert!(!cache.indices["a"].is_valid());

        assert_eq!(cache.lookup(&store, "a", &[1.into()]).unwrap(), [ids[0], added]);
        let again = store.insert_row(vec![2.into()]);
        cache.row_added(&store, again);
        assert_eq!(cache.lookup(&store, "a", &[2.into()]).unwrap(), [ids[1], again]);
    }

    #[test]
    fn test_multi_column_lookup() {
        let (store, ids) = store(
            &["a", "b"],
            vec![vec![1.into(), "x".into()], vec![1.into(), "y".into()]],
        );
        let mut cache = IndexCache::default();
        assert_eq!(cache.lookup(&store, "a b", &[1.into(), "y".into()]).unwrap(), [ids[1]]);
        assert!(cache.lookup(&store, "a b", &[1.into()]).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_bucketing() {
        let def = RangeDef::numeric(10.0);
        let buckets: Vec<Value> = [18, 25, 31, 40].iter().map(|&v| def.bucket(&Value::Int(v))).collect();
        assert_eq!(buckets, [Value::Int(10), Value::Int(20), Value::Int(30), Value::Int(40)]);
        assert_eq!(def.label(&Value::Int(20)), "20 .. 29");
        assert_eq!(RangeDef::numeric(1.0).label(&Value::Int(7)), "7");
        assert_eq!(def.bucket(&Value::Null), Value::Null);
    }

    #[test]
    fn test_calendar_bucketing() {
        // 2024-03-17 12:00:00 UTC
        let ts = Value::Int(1_710_676_800);
        let month = RangeDef::calendar(RangeUnit::Month);
        let bucket = month.bucket(&ts);
        assert_eq!(bucket, Value::Int(1_709_251_200)); // 2024-03-01
        assert_eq!(month.label(&bucket), "2024-03");

        let year = RangeDef::calendar(RangeUnit::Year);
        let bucket = year.bucket(&ts);
        assert_eq!(bucket, Value::Int(1_704_067_200)); // 2024-01-01
        assert_eq!(year.label(&bucket), "2024");

        let quarter = RangeDef {
            freq: Some(3.0),
            ..RangeDef::calendar(RangeUnit::Month)
        };
        assert_eq!(quarter.label(&Value::Int(1_709_251_200)), "2024-03 .. 2024-05");
    }

    #[test]
    fn test_parse_range_def() {
        assert_eq!(parse_range_def("age").unwrap(), ("age".to_string(), None));
        let (col, def) = parse_range_def("age/10").unwrap();
        assert_eq!(col, "age");
        assert_eq!(def, Some(RangeDef::numeric(10.0)));
        let (_, def) = parse_range_def("ts/year").unwrap();
        assert_eq!(def.unwrap().unit, Some(RangeUnit::Year));
        let (_, def) = parse_range_def("ts/2/month/3").unwrap();
        let def = def.unwrap();
        assert_eq!((def.offset, def.unit, def.freq), (Some(2.0), Some(RangeUnit::Month), Some(3.0)));
        assert!(parse_range_def("ts/week/2").is_err());
    }

    #[test]
    fn test_invalidate_and_incremental_add() {
        let (mut store, ids) = store(&["a"], vec![vec![1.into()]]);
        let mut cache = IndexCache::default();
        cache.lookup(&store, "a", &[1.into()]).unwrap();

        let added = store.insert_row(vec![1.into()]);
        cache.row_added(&store, added);
        assert_eq!(cache.lookup(&store, "a", &[1.into()]).unwrap(), [ids[0], added]);

        let gone = std::iter::once(ids[0]).collect();
        store.remove_rows(&gone);
        cache.row_removed();
        assert_eq!(cache.lookup(&store, "a", &[1.into()]).unwrap(), [added]);
    }

    #[test]
    fn test_row_groups_two_levels() {
        let (store, ids) = store(
            &["age", "city"],
            vec![
                vec![18.into(), "Oslo".into()],
                vec![25.into(), "Rome".into()],
                vec![19.into(), "Oslo".into()],
                vec![27.into(), "Oslo".into()],
            ],
        );
        let mut cache = IndexCache::default();
        let groups = row_groups(&mut cache, &store, &GroupOptions::new("age/10 > city")).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "10 .. 19");
        assert_eq!(groups[0].key_vals, [Value::Int(10)]);
        assert_eq!(groups[0].rows(), [ids[0], ids[2]]);

        let GroupContent::Groups(sub) = &groups[1].content else {
            panic!("expected subgroups");
        };
        let labels: Vec<_> = sub.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, ["Rome", "Oslo"]);
        assert_eq!(sub[1].content, GroupContent::Rows(vec![ids[3]]));
        assert_eq!(sub[1].key_cols, "city");
    }

    #[test]
    fn test_row_groups_multi_column_level() {
        let (store, _) = store(
            &["a", "b"],
            vec![vec!["x".into(), 1.into()], vec!["x".into(), 2.into()]],
        );
        let mut cache = IndexCache::default();
        let groups = row_groups(&mut cache, &store, &GroupOptions::new("a b")).unwrap();
        let labels: Vec<_> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, ["x / 1", "x / 2"]);
        assert_eq!(groups[1].key_vals, [Value::from("x"), Value::Int(2)]);
    }
}
