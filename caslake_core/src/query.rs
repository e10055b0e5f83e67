//! Catalog queries.
//!
//! A [`Query`] is a predicate tree plus ordering and limit. Catalogs evaluate
//! it with SQL semantics: comparing against a missing or null value is
//! unknown, and unknown rows never match.

use crate::error::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;

/// A queryable attribute of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    ContentHash,
    FileExtension,
    /// A caller-defined field, addressed by its top-level JSON key.
    Named(String),
}

impl Field {
    pub fn named(name: impl Into<String>) -> Self {
        Field::Named(name.into())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Field::Named(name) => validate_identifier(name),
            _ => Ok(()),
        }
    }

    /// Extract this field from a stored row.
    pub(crate) fn value_of(&self, row: &RowRef<'_>) -> Value {
        match self {
            Field::ContentHash => Value::String(row.content_hash.to_string()),
            Field::FileExtension => Value::String(row.file_extension.to_string()),
            Field::Named(name) => row.fields.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        match name {
            "content_hash" => Field::ContentHash,
            "file_extension" => Field::FileExtension,
            other => Field::Named(other.to_string()),
        }
    }
}

/// Identifiers are `[A-Za-z_][A-Za-z0-9_]*`; they end up inside SQL text.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::invalid_query(format!(
            "Invalid field name: {:?} (must match [A-Za-z_][A-Za-z0-9_]*)",
            name
        )))
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A predicate over entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: Field,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

macro_rules! compare_ctor {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(field: impl Into<Field>, value: impl Into<Value>) -> Self {
                Filter::Compare {
                    field: field.into(),
                    op: CompareOp::$op,
                    value: value.into(),
                }
            }
        )*
    };
}

impl Filter {
    compare_ctor!(eq => Eq, ne => Ne, lt => Lt, le => Le, gt => Gt, ge => Ge);

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Filter::Compare { field, .. } => field.validate(),
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not(inner) => inner.validate(),
        }
    }

    /// Three-valued evaluation: `None` means unknown.
    pub(crate) fn eval(&self, row: &RowRef<'_>) -> Option<bool> {
        match self {
            Filter::Compare { field, op, value } => {
                sql_compare(&field.value_of(row), value).map(|ord| op.accepts(ord))
            }
            Filter::And(filters) => {
                let mut result = Some(true);
                for filter in filters {
                    match filter.eval(row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Filter::Or(filters) => {
                let mut result = Some(false);
                for filter in filters {
                    match filter.eval(row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Filter::Not(inner) => inner.eval(row).map(|b| !b),
        }
    }

    pub(crate) fn matches(&self, row: &RowRef<'_>) -> bool {
        self.eval(row) == Some(true)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Filter, ordering and limit applied to a catalog.
///
/// Without an explicit ordering, results come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filter: Option<Filter>,
    order: Vec<(Field, Order)>,
    limit: Option<usize>,
}

impl Query {
    /// Match every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a predicate. Repeated calls are combined with AND.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Shorthand for `filter(Filter::eq(field, value))`.
    pub fn where_eq(self, field: impl Into<Field>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    pub fn order_by(mut self, field: impl Into<Field>, order: Order) -> Self {
        self.order.push((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter_ref(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn ordering(&self) -> &[(Field, Order)] {
        &self.order
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        self.order.iter().try_for_each(|(field, _)| field.validate())
    }
}

/// Borrowed view of one stored row, as catalogs keep it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RowRef<'a> {
    pub content_hash: &'a str,
    pub file_extension: &'a str,
    pub fields: &'a Value,
}

/// SQLite storage class ordering: numbers before text. Booleans are integers,
/// arrays and objects compare as their JSON text.
fn storage_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
        Value::String(_) | Value::Array(_) | Value::Object(_) => 2,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare like SQL: unknown if either side is null.
pub(crate) fn sql_compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    Some(sort_compare(a, b))
}

/// Total order used for ORDER BY (nulls first).
pub(crate) fn sort_compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (storage_rank(a), storage_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match ra {
        0 => Ordering::Equal,
        1 => {
            let (x, y) = (as_number(a).unwrap_or(0.0), as_number(b).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => as_text(a).cmp(&as_text(b)),
    }
}
