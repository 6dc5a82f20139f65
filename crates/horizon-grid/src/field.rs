//! Field registry.
//!
//! Column metadata arrives from several places: built-in defaults, named
//! type presets, the schema itself, and host overrides at rowset, instance
//! and live-property level. [`FieldLayers`] holds the override layers and
//! [`FieldLayers::resolve`] folds them, lowest precedence first, into one
//! [`Field`] per column.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::validate::CellValidator;
use crate::value::Value;

/// Horizontal alignment of a column's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// A partial set of field attributes.
///
/// Every attribute is optional; `None` means "not specified at this layer".
/// This is both the schema's per-field format and the shape of every
/// override layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttrs {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub label: Option<String>,
    pub w: Option<f64>,
    pub min_w: Option<f64>,
    pub max_w: Option<f64>,
    pub align: Option<Align>,
    pub readonly: Option<bool>,
    pub nosave: Option<bool>,
    pub not_null: Option<bool>,
    pub sortable: Option<bool>,
    pub hidden: Option<bool>,
    pub default: Option<Value>,
    pub client_default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimals: Option<u32>,
    pub maxlen: Option<usize>,
    /// Space-separated list of allowed values.
    pub enum_values: Option<String>,
    pub exclude_vals: Option<Vec<Value>>,
    pub lookup_rowset_name: Option<String>,
    pub lookup_cols: Option<String>,
    pub display_col: Option<String>,
}

macro_rules! overlay_attrs {
    ($dst:expr, $src:expr, $($attr:ident),+ $(,)?) => {
        $(
            if $src.$attr.is_some() {
                $dst.$attr = $src.$attr.clone();
            }
        )+
    };
}

impl FieldAttrs {
    /// Attributes every field starts from.
    pub fn global_defaults() -> Self {
        Self {
            w: Some(100.0),
            min_w: Some(22.0),
            max_w: Some(2000.0),
            align: Some(Align::Left),
            not_null: Some(false),
            sortable: Some(true),
            maxlen: Some(256),
            ..Default::default()
        }
    }

    /// Shallow-merge `other` over `self`: attributes set in `other` win.
    pub fn overlay(&mut self, other: &FieldAttrs) {
        overlay_attrs!(
            self,
            other,
            name,
            field_type,
            label,
            w,
            min_w,
            max_w,
            align,
            readonly,
            nosave,
            not_null,
            sortable,
            hidden,
            default,
            client_default,
            min,
            max,
            decimals,
            maxlen,
            enum_values,
            exclude_vals,
            lookup_rowset_name,
            lookup_cols,
            display_col,
        );
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }
}

/// Built-in named type presets.
pub fn builtin_field_types() -> HashMap<String, FieldAttrs> {
    let number = FieldAttrs {
        align: Some(Align::Right),
        min: Some(0.0),
        max: Some(f64::INFINITY),
        decimals: Some(0),
        ..Default::default()
    };
    let right = FieldAttrs {
        align: Some(Align::Right),
        ..Default::default()
    };
    let center = FieldAttrs {
        align: Some(Align::Center),
        ..Default::default()
    };

    let mut types = HashMap::new();
    types.insert("number".to_string(), number.clone());
    types.insert("count".to_string(), number.clone());
    types.insert("filesize".to_string(), number);
    for name in ["date", "time", "duration", "percent"] {
        types.insert(name.to_string(), right.clone());
    }
    for name in ["timeofday", "timeofday_in_seconds"] {
        types.insert(name.to_string(), center.clone());
    }
    types.insert(
        "bool".to_string(),
        FieldAttrs {
            align: Some(Align::Center),
            min_w: Some(28.0),
            ..Default::default()
        },
    );
    types.insert(
        "button".to_string(),
        FieldAttrs {
            align: Some(Align::Center),
            readonly: Some(true),
            ..Default::default()
        },
    );
    for name in [
        "password", "enum", "tags", "color", "icon", "place", "url", "phone", "email", "col",
    ] {
        types.insert(name.to_string(), FieldAttrs::default());
    }
    types
}

/// The ordered override layers a field is resolved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldLayers {
    /// Applies to every field, on top of the global defaults.
    pub all_field_types: FieldAttrs,
    /// Named type presets, keyed by type name.
    pub field_types: HashMap<String, FieldAttrs>,
    /// Global overrides keyed by `"<rowset_name>.<col>"`.
    pub rowset_col_attrs: HashMap<String, FieldAttrs>,
    /// Per-instance overrides keyed by column name.
    pub col_attrs: HashMap<String, FieldAttrs>,
    /// Live per-column property overrides keyed by column name.
    pub prop_col_attrs: HashMap<String, FieldAttrs>,
}

impl Default for FieldLayers {
    fn default() -> Self {
        Self {
            all_field_types: FieldAttrs::default(),
            field_types: builtin_field_types(),
            rowset_col_attrs: HashMap::new(),
            col_attrs: HashMap::new(),
            prop_col_attrs: HashMap::new(),
        }
    }
}

impl FieldLayers {
    /// Resolve a whole schema into fields.
    ///
    /// Names are disambiguated in order: a missing name becomes `f<index>`,
    /// a repeated one gets a numeric suffix starting at 2.
    pub fn resolve(&self, specs: &[FieldAttrs], rowset_name: Option<&str>) -> Vec<Field> {
        let mut taken = HashSet::new();
        specs
            .iter()
            .enumerate()
            .map(|(fi, spec)| self.resolve_one(spec, fi, rowset_name, &mut taken))
            .collect()
    }

    /// Resolve one schema field at value position `fi`, avoiding `taken` names.
    pub fn resolve_one(
        &self,
        spec: &FieldAttrs,
        fi: usize,
        rowset_name: Option<&str>,
        taken: &mut HashSet<String>,
    ) -> Field {
        let name = disambiguate(spec.name.clone().unwrap_or_else(|| format!("f{fi}")), taken);
        if spec.name.as_deref().is_some_and(|n| n != name) {
            tracing::warn!(target: targets::FIELD, renamed = %name, "duplicate field name");
        }

        let prop = self.prop_col_attrs.get(&name);
        let inst = self.col_attrs.get(&name);
        let rowset = rowset_name.and_then(|rs| self.rowset_col_attrs.get(&format!("{rs}.{name}")));
        let field_type = [rowset, inst]
            .into_iter()
            .flatten()
            .find_map(|attrs| attrs.field_type.clone())
            .or_else(|| spec.field_type.clone());

        let mut attrs = FieldAttrs::global_defaults();
        attrs.overlay(&self.all_field_types);
        if let Some(preset) = field_type.as_ref().and_then(|t| self.field_types.get(t)) {
            attrs.overlay(preset);
        }
        attrs.overlay(spec);
        for layer in [rowset, inst, prop].into_iter().flatten() {
            attrs.overlay(layer);
        }
        attrs.field_type = field_type;

        Field::from_attrs(name, fi, attrs)
    }
}

fn disambiguate(name: String, taken: &mut HashSet<String>) -> String {
    let mut resolved = name.clone();
    let mut suffix = 2;
    while taken.contains(&resolved) {
        resolved = format!("{name}{suffix}");
        suffix += 1;
    }
    taken.insert(resolved.clone());
    resolved
}

/// Turn a column name into a human label: `unit_price` → `Unit price`.
pub fn display_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reference to rows of another rowset that a field's values must exist in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupDef {
    pub rowset_name: String,
    pub cols: String,
    pub display_col: Option<String>,
}

/// Value transform applied to every value written into a field.
pub type ConvertFn = Arc<dyn Fn(Value, &Field) -> Value + Send + Sync>;

/// Generator for default values of new rows.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Default value of a new, user-inserted row.
#[derive(Clone)]
pub enum ClientDefault {
    Value(Value),
    Generator(DefaultFn),
}

impl ClientDefault {
    pub fn produce(&self) -> Value {
        match self {
            ClientDefault::Value(v) => v.clone(),
            ClientDefault::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for ClientDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ClientDefault::Generator(_) => f.write_str("Generator"),
        }
    }
}

/// A resolved column descriptor.
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub field_type: Option<String>,
    /// Position of this field's value slot in every row.
    pub val_index: usize,
    pub label: String,
    pub w: f64,
    pub min_w: f64,
    pub max_w: f64,
    pub align: Align,
    pub readonly: bool,
    pub nosave: bool,
    pub not_null: bool,
    pub sortable: bool,
    pub hidden: bool,
    pub default: Value,
    pub client_default: Option<ClientDefault>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimals: Option<u32>,
    pub maxlen: usize,
    pub enum_values: Option<Vec<String>>,
    pub exclude_vals: Vec<Value>,
    pub lookup: Option<LookupDef>,
    pub(crate) validators: Vec<Arc<dyn CellValidator>>,
    pub(crate) convert: Option<ConvertFn>,
}

impl Field {
    fn from_attrs(name: String, val_index: usize, attrs: FieldAttrs) -> Self {
        let min_w = attrs.min_w.unwrap_or(22.0);
        let max_w = attrs.max_w.unwrap_or(2000.0).max(min_w);
        let label = attrs.label.unwrap_or_else(|| display_name(&name));
        let lookup = attrs.lookup_rowset_name.map(|rowset_name| LookupDef {
            rowset_name,
            cols: attrs.lookup_cols.unwrap_or_default(),
            display_col: attrs.display_col,
        });
        Self {
            label,
            w: attrs.w.unwrap_or(100.0).clamp(min_w, max_w),
            min_w,
            max_w,
            align: attrs.align.unwrap_or_default(),
            readonly: attrs.readonly.unwrap_or(false),
            nosave: attrs.nosave.unwrap_or(false),
            not_null: attrs.not_null.unwrap_or(false),
            sortable: attrs.sortable.unwrap_or(true),
            hidden: attrs.hidden.unwrap_or(false),
            default: attrs.default.unwrap_or_default(),
            client_default: attrs.client_default.map(ClientDefault::Value),
            min: attrs.min,
            max: attrs.max,
            decimals: attrs.decimals,
            maxlen: attrs.maxlen.unwrap_or(256),
            enum_values: attrs
                .enum_values
                .map(|s| s.split_whitespace().map(str::to_string).collect()),
            exclude_vals: attrs.exclude_vals.unwrap_or_default(),
            lookup,
            field_type: attrs.field_type,
            name,
            val_index,
            validators: Vec::new(),
            convert: None,
        }
    }

    /// Shorthand for a plain untyped field, mostly for tests and ad hoc columns.
    pub fn new(name: impl Into<String>, val_index: usize) -> Self {
        let name = name.into();
        Self::from_attrs(name, val_index, FieldAttrs::global_defaults())
    }

    pub fn is_type(&self, field_type: &str) -> bool {
        self.field_type.as_deref() == Some(field_type)
    }

    /// Number of validators attached to this field.
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub(crate) fn convert_val(&self, val: Value) -> Value {
        match &self.convert {
            Some(convert) => convert(val, self),
            None => val,
        }
    }

    /// Render a value as text for display.
    pub fn to_text(&self, val: &Value) -> String {
        match val {
            Value::Null => String::new(),
            v if self.is_type("percent") => match v.to_num() {
                Some(p) => format!("{:.*}%", self.decimals.unwrap_or(0) as usize, p * 100.0),
                None => v.to_string(),
            },
            v if self.is_type("number") => match (v.to_num(), self.decimals) {
                (Some(x), Some(dec)) => format!("{:.*}", dec as usize, x),
                _ => v.to_string(),
            },
            v => v.to_string(),
        }
    }

    /// Parse display text back into a value. Blank text is null.
    pub fn from_text(&self, text: &str) -> Value {
        let s = text.trim();
        if s.is_empty() {
            return Value::Null;
        }
        if self.is_type("number") || self.is_type("count") || self.is_type("filesize") {
            if let Ok(n) = s.parse::<f64>() {
                return Value::from_num(n);
            }
        }
        if self.is_type("bool") {
            match s {
                "true" => return Value::Bool(true),
                "false" => return Value::Bool(false),
                _ => {}
            }
        }
        Value::Text(s.to_string())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("type", &self.field_type)
            .field("val_index", &self.val_index)
            .field("label", &self.label)
            .field("readonly", &self.readonly)
            .field("default", &self.default)
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}
