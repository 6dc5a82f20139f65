//! Filter engine.
//!
//! Row predicates are written as a small expression tree ([`Expr`]) and
//! compiled into a closure tree over resolved field positions. The visible
//! row filter of a rowset is the conjunction of the master/detail parameter
//! filter and the per-field exclude lists.

use std::sync::Arc;

use horizon_grid_core::logging::targets;
use horizon_grid_core::{GridError, Result};

use crate::row::RowId;
use crate::store::RowStore;
use crate::value::{Value, compare_vals};

/// Comparison operator of a leaf expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "===" | "==" => CmpOp::Eq,
            "!==" | "!=" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            _ => return None,
        })
    }

    fn eval(self, a: &Value, b: &Value) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => !a.is_null() && !b.is_null() && compare_vals(a, b).is_lt(),
            CmpOp::Le => !a.is_null() && !b.is_null() && compare_vals(a, b).is_le(),
            CmpOp::Gt => !a.is_null() && !b.is_null() && compare_vals(a, b).is_gt(),
            CmpOp::Ge => !a.is_null() && !b.is_null() && compare_vals(a, b).is_ge(),
        }
    }
}

/// A boolean row expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Cmp { op: CmpOp, col: String, val: Value },
}

/// A compiled row predicate.
pub type RowPredicate = Arc<dyn Fn(&RowStore, RowId) -> bool + Send + Sync>;

impl Expr {
    pub fn eq(col: impl Into<String>, val: impl Into<Value>) -> Self {
        Expr::Cmp {
            op: CmpOp::Eq,
            col: col.into(),
            val: val.into(),
        }
    }

    pub fn ne(col: impl Into<String>, val: impl Into<Value>) -> Self {
        Expr::Cmp {
            op: CmpOp::Ne,
            col: col.into(),
            val: val.into(),
        }
    }

    /// `col1 == vals[0] && col2 == vals[1] ...` over a space-separated list.
    pub fn and_eq(cols: &str, vals: &[Value]) -> Self {
        Expr::And(
            cols.split_whitespace()
                .zip(vals)
                .map(|(c, v)| Expr::eq(c, v.clone()))
                .collect(),
        )
    }

    /// Parse the JSON array form: `["&&", e1, e2, ...]`, `["||", ...]`,
    /// `["!", e]` or `[op, col, literal]`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let invalid = || GridError::Config(format!("invalid filter expression: {json}"));
        let items = json.as_array().ok_or_else(invalid)?;
        let op = items.first().and_then(|v| v.as_str()).ok_or_else(invalid)?;
        match op {
            "&&" | "||" => {
                let args = items[1..].iter().map(Expr::from_json).collect::<Result<Vec<_>>>()?;
                if args.is_empty() {
                    return Err(invalid());
                }
                Ok(if op == "&&" { Expr::And(args) } else { Expr::Or(args) })
            }
            "!" => match items.get(1) {
                Some(e) if items.len() == 2 => Ok(Expr::Not(Box::new(Expr::from_json(e)?))),
                _ => Err(invalid()),
            },
            _ => {
                let op = CmpOp::parse(op).ok_or_else(invalid)?;
                let col = items.get(1).and_then(|v| v.as_str()).ok_or_else(invalid)?;
                let val = items.get(2).cloned().unwrap_or(serde_json::Value::Null);
                let val = serde_json::from_value(val).map_err(|_| invalid())?;
                Ok(Expr::Cmp {
                    op,
                    col: col.to_string(),
                    val,
                })
            }
        }
    }

    /// Compile into a predicate over pending cell values. Column references
    /// resolve now; an unknown column is an error.
    pub fn compile(&self, store: &RowStore) -> Result<RowPredicate> {
        Ok(match self {
            Expr::And(args) => {
                let preds = compile_all(args, store)?;
                Arc::new(move |s, r| preds.iter().all(|p| p(s, r)))
            }
            Expr::Or(args) => {
                let preds = compile_all(args, store)?;
                Arc::new(move |s, r| preds.iter().any(|p| p(s, r)))
            }
            Expr::Not(inner) => {
                let pred = inner.compile(store)?;
                Arc::new(move |s, r| !pred(s, r))
            }
            Expr::Cmp { op, col, val } => {
                let fi = store
                    .field_index(col)
                    .ok_or_else(|| GridError::UnknownColumn(col.clone()))?;
                let (op, val) = (*op, val.clone());
                Arc::new(move |s, r| s.cell_input_val(r, fi).is_some_and(|v| op.eval(v, &val)))
            }
        })
    }
}

fn compile_all(args: &[Expr], store: &RowStore) -> Result<Vec<RowPredicate>> {
    args.iter().map(|e| e.compile(store)).collect()
}

/// Keep the rows of `rows` that satisfy `expr`.
pub fn filter_rows(store: &RowStore, rows: &[RowId], expr: &Expr) -> Result<Vec<RowId>> {
    let pred = expr.compile(store)?;
    Ok(rows.iter().copied().filter(|&r| pred(store, r)).collect())
}

/// Mapping from master columns to parameter names, parsed from
/// `"param[=master_col] ..."`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
}

/// One master row's parameter values, in parameter order.
pub type ParamRow = Vec<(String, Value)>;

/// Parameter values a detail rowset is filtered by.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ParamVals {
    /// The rowset has no parameters.
    #[default]
    Unbound,
    /// Parameters are declared but no master row is selected.
    Unavailable,
    /// One entry per selected master row.
    Rows(Vec<ParamRow>),
}

impl ParamMap {
    pub fn parse(params: &str) -> Self {
        let entries = params
            .split_whitespace()
            .map(|s| match s.split_once('=') {
                Some((param, col)) if !col.is_empty() => (col.to_string(), param.to_string()),
                Some((param, _)) => (param.to_string(), param.to_string()),
                None => (s.to_string(), s.to_string()),
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(master_col, param)` pairs.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn param_for(&self, master_col: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == master_col)
            .map(|(_, p)| p.as_str())
    }

    /// Read parameter values off the selected rows of a master rowset.
    ///
    /// No params means [`ParamVals::Unbound`]; no usable selection means
    /// [`ParamVals::Unavailable`].
    pub fn param_vals(&self, master: &RowStore, selected: &[RowId]) -> ParamVals {
        if self.entries.is_empty() {
            return ParamVals::Unbound;
        }
        let usable = |r: &RowId| master.row(*r).is_some_and(|row| !row.is_new);
        if selected.is_empty() || !selected.iter().any(usable) {
            return ParamVals::Unavailable;
        }
        let rows = selected
            .iter()
            .filter(|r| usable(r))
            .map(|&row| {
                self.entries
                    .iter()
                    .map(|(col, param)| {
                        let val = match master.field_index(col) {
                            Some(fi) => master.cell_val(row, fi).cloned().unwrap_or_default(),
                            None => {
                                tracing::warn!(target: targets::FILTER, col, "master rowset is missing param column");
                                Value::Null
                            }
                        };
                        (param.clone(), val)
                    })
                    .collect()
            })
            .collect();
        ParamVals::Rows(rows)
    }

    /// The opaque filter token sent to the server and echoed by push
    /// notifications: a JSON array of values for a single parameter,
    /// otherwise a JSON array of `{param: val}` objects.
    pub fn filter_token(&self, vals: &ParamVals) -> Option<String> {
        let ParamVals::Rows(rows) = vals else {
            return None;
        };
        let json = if self.entries.len() == 1 {
            serde_json::Value::Array(
                rows.iter()
                    .map(|r| r.first().map_or(serde_json::Value::Null, |(_, v)| to_json(v)))
                    .collect(),
            )
        } else {
            serde_json::Value::Array(
                rows.iter()
                    .map(|r| {
                        serde_json::Value::Object(
                            r.iter().map(|(p, v)| (p.clone(), to_json(v))).collect(),
                        )
                    })
                    .collect(),
            )
        };
        Some(json.to_string())
    }
}

fn to_json(v: &Value) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
}

/// Expression for the master/detail filter: equality on every parameter
/// column, OR-ed across master rows.
pub fn param_filter(vals: &ParamVals) -> Option<Expr> {
    let ParamVals::Rows(rows) = vals else {
        return None;
    };
    let mut ors: Vec<Expr> = rows
        .iter()
        .map(|r| {
            let mut ands: Vec<Expr> = r.iter().map(|(p, v)| Expr::eq(p.clone(), v.clone())).collect();
            if ands.len() == 1 {
                ands.remove(0)
            } else {
                Expr::And(ands)
            }
        })
        .collect();
    match ors.len() {
        0 => None,
        1 => Some(ors.remove(0)),
        _ => Some(Expr::Or(ors)),
    }
}

/// Expressions hiding every field's excluded values.
pub fn exclude_filter(store: &RowStore) -> Vec<Expr> {
    store
        .fields()
        .iter()
        .flat_map(|f| f.exclude_vals.iter().map(|v| Expr::ne(f.name.clone(), v.clone())))
        .collect()
}

/// The compiled visibility filter of a rowset.
#[derive(Clone, Default)]
pub struct RowFilter {
    pred: Option<RowPredicate>,
    reject_all: bool,
    filtered: bool,
}

impl RowFilter {
    /// Combine the parameter filter (only applied when the rowset filters
    /// itself locally) with the exclude lists.
    pub fn build(store: &RowStore, vals: &ParamVals, local_params: bool) -> Self {
        if *vals == ParamVals::Unavailable {
            return Self {
                pred: None,
                reject_all: true,
                filtered: false,
            };
        }
        let mut preds = Vec::new();
        if local_params && store.field_count() > 0 {
            if let Some(expr) = param_filter(vals) {
                match expr.compile(store) {
                    Ok(pred) => preds.push(pred),
                    Err(err) => tracing::warn!(target: targets::FILTER, %err, "parameter filter disabled"),
                }
            }
        }
        let excludes = exclude_filter(store);
        let filtered = !excludes.is_empty();
        for expr in excludes {
            match expr.compile(store) {
                Ok(pred) => preds.push(pred),
                Err(err) => tracing::warn!(target: targets::FILTER, %err, "exclude filter disabled"),
            }
        }
        let pred: Option<RowPredicate> = match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Arc::new(move |s: &RowStore, r: RowId| preds.iter().all(|p| p(s, r)))),
        };
        Self {
            pred,
            reject_all: false,
            filtered,
        }
    }

    pub fn accepts(&self, store: &RowStore, row: RowId) -> bool {
        if self.reject_all {
            return false;
        }
        self.pred.as_ref().is_none_or(|p| p(store, row))
    }

    /// Whether exclude lists are hiding rows.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }
}

impl std::fmt::Debug for RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowFilter")
            .field("active", &self.pred.is_some())
            .field("reject_all", &self.reject_all)
            .field("filtered", &self.filtered)
            .finish()
    }
}
