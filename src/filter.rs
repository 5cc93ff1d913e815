use std::collections::HashMap;

use polars::prelude::{col, lit, Expr, NamedFrom, Series};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};
use crate::schema::{is_repeated_path_part, FieldKind, Path, Schema};

/// Comparison operators accepted by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Equals,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// A filter comparand, compared in the column's native dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::String(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::String(v)
    }
}

impl From<Vec<u8>> for FilterValue {
    fn from(v: Vec<u8>) -> Self {
        FilterValue::Bytes(v)
    }
}

/// A single comparison over a schema path or projected column alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub path: Path,
    pub op: BinaryOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(path: impl Into<Path>, op: BinaryOp, value: impl Into<FilterValue>) -> Filter {
        Filter {
            path: path.into(),
            op,
            value: value.into(),
        }
    }
}

/// `(path, op, value)` tuples normalize into [`Filter`].
impl<P: Into<Path>, V: Into<FilterValue>> From<(P, BinaryOp, V)> for Filter {
    fn from((path, op, value): (P, BinaryOp, V)) -> Filter {
        Filter::new(path, op, value)
    }
}

/// Validates filters against the schema. Filters whose first segment names
/// a projected column alias are always allowed; the rest must walk struct
/// fields to a concrete column, without wildcards or element indexes.
pub fn validate_filters(
    schema: &Schema,
    filters: &[Filter],
    col_aliases: &HashMap<String, bool>,
) -> Result<()> {
    for filter in filters {
        let first = match filter.path.parts().first() {
            Some(first) => first,
            None => return Err(DatasetError::PathNotInSchema(filter.path.clone())),
        };
        if col_aliases.contains_key(first) {
            continue;
        }
        let mut fields = Some(&schema.fields);
        for part in filter.path.parts() {
            if is_repeated_path_part(part) {
                return Err(DatasetError::FilterOnRepeatedPath(filter.path.clone()));
            }
            if part.chars().all(|c| c.is_ascii_digit()) {
                return Err(DatasetError::IndexIntoRepeated(filter.path.clone()));
            }
            let current = fields
                .and_then(|f| f.get(part))
                .ok_or_else(|| DatasetError::PathNotInSchema(filter.path.clone()))?;
            fields = match &current.kind {
                FieldKind::Struct(children) => Some(children),
                _ => None,
            };
        }
    }
    Ok(())
}

fn value_literal(value: &FilterValue) -> Expr {
    match value {
        FilterValue::Bool(v) => lit(*v),
        FilterValue::Int(v) => lit(*v),
        FilterValue::Float(v) => lit(*v),
        FilterValue::String(v) => lit(v.clone()),
        FilterValue::Bytes(v) => lit(Series::new("".into(), &[v.as_slice()])),
    }
}

/// Translates a validated filter into an engine predicate.
pub fn filter_expr(filter: &Filter) -> Expr {
    let parts = filter.path.parts();
    let mut expr = col(parts[0].as_str());
    for part in &parts[1..] {
        expr = expr.struct_().field_by_name(part);
    }
    let value = value_literal(&filter.value);
    match filter.op {
        BinaryOp::Equals => expr.eq(value),
        BinaryOp::NotEqual => expr.neq(value),
        BinaryOp::Less => expr.lt(value),
        BinaryOp::LessEqual => expr.lt_eq(value),
        BinaryOp::Greater => expr.gt(value),
        BinaryOp::GreaterEqual => expr.gt_eq(value),
    }
}

/// AND-combines filters into one predicate, if any.
pub fn combined_filter_expr(filters: &[Filter]) -> Option<Expr> {
    filters
        .iter()
        .map(filter_expr)
        .reduce(|acc, e| acc.and(e))
}
