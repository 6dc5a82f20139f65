//! Cell and row validation.
//!
//! A field carries a list of [`CellValidator`]s chosen from its attributes
//! and type when the schema is bound. Running them over a value yields an
//! [`Errors`] record: one entry per rule plus an overall pass flag. Row
//! level rules implement [`RowValidator`] and run after the cells.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::model::RowsetModel;
use crate::row::RowId;
use crate::value::Value;

/// The outcome of one validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub passed: bool,
    pub message: String,
}

/// Aggregated validation state of a cell or a row.
///
/// `client_side` marks results computed locally; results written back from
/// a save response are server-side and are dropped as soon as the cell is
/// edited again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Errors {
    pub items: Vec<ValidationError>,
    pub passed: bool,
    pub client_side: bool,
}

impl Default for Errors {
    fn default() -> Self {
        Self::client()
    }
}

impl Errors {
    /// An empty, passing, client-side result.
    pub fn client() -> Self {
        Self {
            items: Vec::new(),
            passed: true,
            client_side: true,
        }
    }

    /// A failing server-side result with one message.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            items: vec![ValidationError {
                passed: false,
                message: message.into(),
            }],
            passed: false,
            client_side: false,
        }
    }

    /// Record the outcome of one rule.
    pub fn add(&mut self, passed: bool, message: impl Into<String>) {
        self.items.push(ValidationError {
            passed,
            message: message.into(),
        });
        if !passed {
            self.passed = false;
        }
    }

    /// Messages of the failed rules.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|e| !e.passed && !e.message.is_empty())
            .map(|e| e.message.as_str())
    }
}

/// A rule applied to a single cell value.
pub trait CellValidator: Send + Sync {
    /// Returns `true` when the value is acceptable.
    fn validate(&self, val: &Value, field: &Field) -> bool;

    /// Message shown when [`validate`](Self::validate) fails.
    fn message(&self, field: &Field) -> String;
}

impl<V: CellValidator + ?Sized> CellValidator for Arc<V> {
    fn validate(&self, val: &Value, field: &Field) -> bool {
        (**self).validate(val, field)
    }

    fn message(&self, field: &Field) -> String {
        (**self).message(field)
    }
}

/// A rule applied to a whole row.
pub trait RowValidator: Send + Sync {
    fn validate(&self, model: &RowsetModel, row: RowId) -> bool;

    fn message(&self, model: &RowsetModel) -> String;
}

/// Rejects null unless the field has a default.
#[derive(Debug, Clone, Copy)]
pub struct NotNullValidator;

impl CellValidator for NotNullValidator {
    fn validate(&self, val: &Value, field: &Field) -> bool {
        !val.is_null() || !field.default.is_null()
    }

    fn message(&self, _field: &Field) -> String {
        "Value cannot be empty".to_string()
    }
}

/// Lower numeric bound.
#[derive(Debug, Clone, Copy)]
pub struct MinValidator(pub f64);

impl CellValidator for MinValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        val.is_null() || val.to_num().is_some_and(|n| n >= self.0)
    }

    fn message(&self, _field: &Field) -> String {
        format!("Value must be at least {}", Value::from_num(self.0))
    }
}

/// Upper numeric bound.
#[derive(Debug, Clone, Copy)]
pub struct MaxValidator(pub f64);

impl CellValidator for MaxValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        val.is_null() || val.to_num().is_some_and(|n| n <= self.0)
    }

    fn message(&self, _field: &Field) -> String {
        format!("Value must be at most {}", Value::from_num(self.0))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NumberValidator;

impl CellValidator for NumberValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        match val {
            Value::Null | Value::Int(_) => true,
            Value::Float(f) => !f.is_nan(),
            _ => false,
        }
    }

    fn message(&self, _field: &Field) -> String {
        "Value must be a number".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntegerValidator;

impl CellValidator for IntegerValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        match val {
            Value::Float(f) => f.fract() == 0.0,
            _ => true,
        }
    }

    fn message(&self, _field: &Field) -> String {
        "Value must be an integer".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoolValidator;

impl CellValidator for BoolValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        matches!(val, Value::Null | Value::Bool(_))
    }

    fn message(&self, _field: &Field) -> String {
        "Value must be true or false".to_string()
    }
}

/// Membership in the field's `enum_values`.
#[derive(Debug, Clone, Copy)]
pub struct EnumValidator;

impl CellValidator for EnumValidator {
    fn validate(&self, val: &Value, field: &Field) -> bool {
        let Some(allowed) = &field.enum_values else {
            return true;
        };
        val.is_null() || allowed.iter().any(|s| *s == val.to_string())
    }

    fn message(&self, _field: &Field) -> String {
        "Value must be in the list of allowed values.".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmailValidator;

impl CellValidator for EmailValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        match val {
            Value::Null => true,
            Value::Text(s) => s.contains('@'),
            _ => false,
        }
    }

    fn message(&self, _field: &Field) -> String {
        "This does not appear to be a valid email.".to_string()
    }
}

/// SQL-style date text (`YYYY-MM-DD[ hh:mm:ss]`) or a Unix timestamp.
#[derive(Debug, Clone, Copy)]
pub struct DateValidator;

impl DateValidator {
    fn parses(s: &str) -> bool {
        let s = s.trim();
        NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
            || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").is_ok()
    }
}

impl CellValidator for DateValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        match val {
            Value::Null | Value::Int(_) => true,
            Value::Float(f) => f.is_finite(),
            Value::Text(s) => Self::parses(s),
            Value::Bool(_) => false,
        }
    }

    fn message(&self, _field: &Field) -> String {
        "Date must be valid".to_string()
    }
}

/// Source of rows a lookup validator checks values against.
pub type LookupSource = Arc<Mutex<RowsetModel>>;

/// Foreign-key existence in another rowset, matched on `cols` (the lookup
/// rowset's primary key when empty).
///
/// Passes for null. Fails while the lookup rowset has not been loaded yet.
pub struct LookupValidator {
    source: LookupSource,
    cols: String,
}

impl LookupValidator {
    pub fn new(source: LookupSource, cols: impl Into<String>) -> Self {
        Self {
            source,
            cols: cols.into(),
        }
    }
}

impl CellValidator for LookupValidator {
    fn validate(&self, val: &Value, _field: &Field) -> bool {
        if val.is_null() {
            return true;
        }
        let source = self.source.lock();
        let cols = match self.cols.trim() {
            "" => source.pk().unwrap_or_default(),
            cols => cols,
        };
        source.is_ready()
            && source
                .lookup(cols, std::slice::from_ref(val))
                .is_ok_and(|rows| !rows.is_empty())
    }

    fn message(&self, _field: &Field) -> String {
        "Value must be in the list of allowed values.".to_string()
    }
}

/// Primary-key uniqueness among the current rows, excluding the row itself.
#[derive(Debug, Clone, Copy)]
pub struct UniqueKeyValidator;

impl RowValidator for UniqueKeyValidator {
    fn validate(&self, model: &RowsetModel, row: RowId) -> bool {
        let Some(pk) = model.pk() else {
            return true;
        };
        let Some(vals) = model.cell_input_vals(row, pk) else {
            return true;
        };
        model
            .lookup(pk, &vals)
            .map(|rows| rows.iter().all(|&r| r == row))
            .unwrap_or(true)
    }

    fn message(&self, model: &RowsetModel) -> String {
        let labels: Vec<&str> = model.pk_fields().map(|f| f.label.as_str()).collect();
        format!("{} must be unique", labels.join(" + "))
    }
}

/// Attach the built-in validators implied by a field's attributes and type.
///
/// Readonly fields get none.
pub fn init_field_validators(field: &mut Field) {
    field.validators.clear();
    if field.readonly {
        return;
    }
    let mut validators: Vec<Arc<dyn CellValidator>> = Vec::new();
    if field.not_null {
        validators.push(Arc::new(NotNullValidator));
    }
    if let Some(min) = field.min {
        validators.push(Arc::new(MinValidator(min)));
    }
    if let Some(max) = field.max.filter(|m| m.is_finite()) {
        validators.push(Arc::new(MaxValidator(max)));
    }
    match field.field_type.as_deref() {
        Some("number" | "count" | "filesize") => {
            validators.push(Arc::new(NumberValidator));
            if field.decimals == Some(0) {
                validators.push(Arc::new(IntegerValidator));
            }
        }
        Some("bool") => validators.push(Arc::new(BoolValidator)),
        Some("enum") => validators.push(Arc::new(EnumValidator)),
        Some("email") => validators.push(Arc::new(EmailValidator)),
        Some("date" | "time") => validators.push(Arc::new(DateValidator)),
        _ => {}
    }
    field.validators = validators;
}

/// Run a field's validators over a value.
pub fn validate_cell(field: &Field, val: &Value) -> Errors {
    let mut errors = Errors::client();
    for validator in &field.validators {
        let passed = validator.validate(val, field);
        errors.add(passed, validator.message(field));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldAttrs, FieldLayers};

    fn field(spec: FieldAttrs) -> Field {
        let mut field = FieldLayers::default().resolve(&[spec], None).remove(0);
        init_field_validators(&mut field);
        field
    }

    #[test]
    fn test_not_null() {
        let f = field(FieldAttrs {
            not_null: Some(true),
            ..FieldAttrs::named("name")
        });
        let errors = validate_cell(&f, &Value::Null);
        assert!(!errors.passed);
        assert!(errors.client_side);
        assert_eq!(errors.messages().collect::<Vec<_>>(), ["Value cannot be empty"]);
        assert!(validate_cell(&f, &"x".into()).passed);
    }

    #[test]
    fn test_number_range_and_integer() {
        let f = field(FieldAttrs {
            max: Some(10.0),
            ..FieldAttrs::named("qty").with_type("number")
        });
        assert!(validate_cell(&f, &Value::Int(5)).passed);
        assert!(validate_cell(&f, &Value::Null).passed);

        let below = validate_cell(&f, &Value::Int(-1));
        assert_eq!(below.messages().collect::<Vec<_>>(), ["Value must be at least 0"]);

        let above = validate_cell(&f, &Value::Int(11));
        assert_eq!(above.messages().collect::<Vec<_>>(), ["Value must be at most 10"]);

        let fractional = validate_cell(&f, &Value::Float(2.5));
        assert_eq!(fractional.messages().collect::<Vec<_>>(), ["Value must be an integer"]);

        let text = validate_cell(&f, &"abc".into());
        assert!(text.messages().any(|m| m == "Value must be a number"));
    }

    #[test]
    fn test_readonly_has_no_validators() {
        let f = field(FieldAttrs {
            not_null: Some(true),
            readonly: Some(true),
            ..FieldAttrs::named("id")
        });
        assert_eq!(f.validator_count(), 0);
        assert!(validate_cell(&f, &Value::Null).passed);
    }

    #[test]
    fn test_enum_email_date() {
        let e = field(FieldAttrs {
            enum_values: Some("a b".into()),
            ..FieldAttrs::named("e").with_type("enum")
        });
        assert!(validate_cell(&e, &"a".into()).passed);
        assert!(!validate_cell(&e, &"c".into()).passed);

        let m = field(FieldAttrs::named("m").with_type("email"));
        assert!(validate_cell(&m, &"a@b.c".into()).passed);
        assert!(!validate_cell(&m, &"nope".into()).passed);

        let d = field(FieldAttrs::named("d").with_type("date"));
        assert!(validate_cell(&d, &"2024-02-29".into()).passed);
        assert!(!validate_cell(&d, &"2023-02-29".into()).passed);
    }

    #[test]
    fn test_server_errors() {
        let errors = Errors::server("rejected");
        assert!(!errors.passed);
        assert!(!errors.client_side);
        assert_eq!(errors.messages().collect::<Vec<_>>(), ["rejected"]);
    }
}
