use polars::prelude::{
    col, int_ranges, lit, when, DataFrame, DataType as PlDataType, Expr, IntoLazy, LazyFrame, NULL,
};

use crate::error::{DatasetError, Result};
use crate::schema::{DataType, Path, Schema, PATH_WILDCARD, SPAN_END_FEATURE, SPAN_START_FEATURE,
    UUID_COLUMN};

/// Column names of the selector's output frame.
pub(crate) const VALUE_COLUMN: &str = "value";
pub(crate) const REPEATED_INDICES_COLUMN: &str = "repeated_indices";

/// Internal name for the span-referenced text while slicing.
const SPAN_TEXT_COLUMN: &str = "leaf_data";

/// Splits a leaf path into contiguous non-wildcard runs separated by `*`.
/// `(a, b, c, *, d, *, *)` becomes `[[a, b, c], [d], [], []]`.
pub(crate) fn split_subpaths(path: &Path) -> Vec<Vec<String>> {
    let mut subs = vec![Vec::new()];
    for part in path.parts() {
        if part == PATH_WILDCARD {
            subs.push(Vec::new());
        } else {
            subs.last_mut().expect("non-empty").push(part.clone());
        }
    }
    subs
}

fn deref_struct(mut expr: Expr, parts: &[String]) -> Expr {
    for part in parts {
        expr = expr.struct_().field_by_name(part);
    }
    expr
}

fn level_expr(subs: &[Vec<String>], level: usize, empty: bool) -> Expr {
    let base = if level == 0 {
        let sub = &subs[0];
        deref_struct(col(sub[0].as_str()), &sub[1..])
    } else {
        deref_struct(col(""), &subs[level])
    };
    if level + 1 < subs.len() {
        base.list().eval(level_expr(subs, level + 1, empty))
    } else if empty {
        // Null placeholder keyed to the terminal run so the element count
        // survives; the values themselves are never materialized upstream.
        when(base.is_null()).then(lit(NULL)).otherwise(lit(NULL))
    } else {
        base
    }
}

/// Projection expression for a leaf path, preserving the nested list shape.
/// Each `*` segment becomes a transform over list elements; the terminal
/// run yields the leaf value, or typed nulls when `empty` is set.
pub(crate) fn leaf_value_expr(path: &Path, empty: bool) -> Expr {
    let subs = split_subpaths(path);
    level_expr(&subs, 0, empty)
}

/// Result of a leaf selection: one row per leaf occurrence.
#[derive(Debug)]
pub(crate) struct LeafSelection {
    pub df: DataFrame,
    pub value_column: Option<&'static str>,
    pub repeated_indices_column: Option<&'static str>,
}

/// Extracts leaf occurrences for `path` from the joined view.
///
/// Scalar leaves yield `{uuid, value}`; leaves behind a single `*` yield
/// `{uuid, repeated_indices, value}` with one row per element, indices
/// produced by unnesting a range over the intermediate list length. Rows
/// whose repeated group is null or empty contribute no occurrences. With
/// `only_keys` the value projection is dropped. Two or more `*` segments
/// are an intentional restriction and fail with a structured error.
pub(crate) fn select_leafs(
    view: &LazyFrame,
    schema: &Schema,
    path: &Path,
    only_keys: bool,
    row_uuid: Option<&str>,
) -> Result<LeafSelection> {
    let leaf = schema.leaf(path)?;
    let is_span = leaf.dtype() == Some(DataType::StringSpan);

    if path.wildcard_count() > 1 {
        return Err(DatasetError::UnsupportedSpanShape {
            path: path.clone(),
            reason: "more than one repeated segment is not supported by the leaf selector"
                .to_string(),
        });
    }

    let refers_to = if is_span {
        let refers_to = leaf.refers_to.as_ref().ok_or_else(|| {
            DatasetError::internal(format!("span leaf {} has no refers_to", path))
        })?;
        Some(refers_to)
    } else {
        None
    };

    let mut lf = view.clone();
    if let Some(uuid) = row_uuid {
        lf = lf.filter(col(UUID_COLUMN).eq(lit(uuid)));
    }

    let subs = split_subpaths(path);
    if subs.len() == 1 {
        // Scalar leaf: a single projection, sliced in place for spans.
        let mut selection = vec![col(UUID_COLUMN)];
        if !only_keys {
            let value = match refers_to {
                Some(refers_to) => {
                    let span = leaf_value_expr(path, false);
                    span_slice_expr(leaf_value_expr(refers_to, false), span)
                }
                None => leaf_value_expr(path, false),
            };
            selection.push(value.alias(VALUE_COLUMN));
        }
        let df = lf.select(selection).collect()?;
        return Ok(LeafSelection {
            df,
            value_column: (!only_keys).then_some(VALUE_COLUMN),
            repeated_indices_column: None,
        });
    }

    // One repeated segment: project the intermediate list, unnest a range
    // over its length alongside the values, then drop rows with no
    // elements (null ranges explode to a single null-index row).
    let prefix = &subs[0];
    let suffix = &subs[1];
    let list_expr = deref_struct(col(prefix[0].as_str()), &prefix[1..]);
    let indices = int_ranges(
        lit(0i64),
        list_expr.clone().list().len().cast(PlDataType::Int64),
        lit(1i64),
        PlDataType::Int64,
    )
    .alias(REPEATED_INDICES_COLUMN);

    let mut selection = vec![col(UUID_COLUMN), indices];
    let mut explode_columns = vec![REPEATED_INDICES_COLUMN];
    if !only_keys {
        let value_list = if suffix.is_empty() {
            list_expr
        } else {
            list_expr.list().eval(deref_struct(col(""), suffix))
        };
        selection.push(value_list.alias(VALUE_COLUMN));
        explode_columns.push(VALUE_COLUMN);
        if let Some(refers_to) = refers_to {
            selection.push(leaf_value_expr(refers_to, false).alias(SPAN_TEXT_COLUMN));
        }
    }

    let df = lf.select(selection).collect()?;
    let df = df.explode(explode_columns)?;
    let mut lf = df.lazy().filter(col(REPEATED_INDICES_COLUMN).is_not_null());

    if !only_keys && is_span {
        lf = lf
            .with_columns([
                span_slice_expr(col(SPAN_TEXT_COLUMN), col(VALUE_COLUMN)).alias(VALUE_COLUMN)
            ])
            .select([
                col(UUID_COLUMN),
                col(REPEATED_INDICES_COLUMN),
                col(VALUE_COLUMN),
            ]);
    }

    Ok(LeafSelection {
        df: lf.collect()?,
        value_column: (!only_keys).then_some(VALUE_COLUMN),
        repeated_indices_column: Some(REPEATED_INDICES_COLUMN),
    })
}

/// Slices the referenced text with a span's zero-based `[start, end)`.
fn span_slice_expr(text: Expr, span: Expr) -> Expr {
    let start = span.clone().struct_().field_by_name(SPAN_START_FEATURE);
    let end = span.struct_().field_by_name(SPAN_END_FEATURE);
    text.str().slice(start.clone(), end - start)
}
