use std::io::Cursor;
use std::sync::Arc;

use polars::prelude::{
    DataFrame, DataType as PlDataType, JsonFormat, JsonReader, Schema as PlSchema, SerReader,
    Series, TimeUnit,
};
use serde_json::Value;

use crate::error::{DatasetError, Result};

/// A nested row value: the language-neutral JSON rendition of a record.
/// Missing values and the engine's null/NaN sentinels all surface as null.
pub type Item = Value;

/// A materialized row, keyed by column alias in projection order.
pub type RowMap = serde_json::Map<String, Item>;

/// Everything that is not a repeated group counts as primitive for the
/// flatten/unflatten protocol; structs pass through whole.
pub fn is_primitive(item: &Item) -> bool {
    !item.is_array()
}

/// Depth-first flattening of repeated groups into a flat leaf sequence.
pub fn flatten(item: &Item, out: &mut Vec<Item>) {
    match item {
        Value::Array(elements) => {
            for element in elements {
                flatten(element, out);
            }
        }
        other => out.push(other.clone()),
    }
}

pub fn flatten_iter<'a>(items: impl IntoIterator<Item = &'a Item>) -> Vec<Item> {
    let mut out = Vec::new();
    for item in items {
        flatten(item, &mut out);
    }
    out
}

/// Rebuilds the nesting of `original` from a flat output sequence. The
/// original value is the single source of truth for shape; the flat
/// sequence must hold exactly one element per primitive position.
pub fn unflatten(flat: &mut impl Iterator<Item = Item>, original: &Item) -> Result<Item> {
    match original {
        Value::Array(elements) => {
            let mut out = Vec::with_capacity(elements.len());
            for element in elements {
                out.push(unflatten(flat, element)?);
            }
            Ok(Value::Array(out))
        }
        _ => flat
            .next()
            .ok_or_else(|| DatasetError::internal("flat output shorter than original shape")),
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn float_item(v: f64) -> Item {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn datetime_item(v: i64, time_unit: TimeUnit) -> Item {
    let micros = match time_unit {
        TimeUnit::Milliseconds => v * 1_000,
        TimeUnit::Microseconds => v,
        TimeUnit::Nanoseconds => v / 1_000,
    };
    match chrono::DateTime::from_timestamp_micros(micros) {
        Some(dt) => Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
        None => Value::Null,
    }
}

/// Converts a column to one [`Item`] per row, recursing through lists and
/// structs. Nulls and NaN floats become JSON null.
pub fn series_to_items(series: &Series) -> Result<Vec<Item>> {
    let items = match series.dtype() {
        PlDataType::Null => vec![Value::Null; series.len()],
        PlDataType::Boolean => series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Bool))
            .collect(),
        PlDataType::String => series
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
            .collect(),
        PlDataType::Binary => series
            .binary()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |b| Value::String(bytes_to_hex(b))))
            .collect(),
        dt if dt.is_unsigned_integer() => series
            .cast(&PlDataType::UInt64)?
            .u64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |x| Value::Number(x.into())))
            .collect(),
        dt if dt.is_integer() => series
            .cast(&PlDataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |x| Value::Number(x.into())))
            .collect(),
        dt if dt.is_float() => series
            .cast(&PlDataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, float_item))
            .collect(),
        PlDataType::Datetime(time_unit, _) => {
            let time_unit = *time_unit;
            let physical = series.to_physical_repr();
            physical
                .i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, |x| datetime_item(x, time_unit)))
                .collect()
        }
        PlDataType::List(_) => {
            let mut out = Vec::with_capacity(series.len());
            for sub in series.list()?.into_iter() {
                match sub {
                    Some(sub) => out.push(Value::Array(series_to_items(&sub)?)),
                    None => out.push(Value::Null),
                }
            }
            out
        }
        PlDataType::Struct(_) => {
            let nulls = series.is_null();
            let fields = series.struct_()?.fields_as_series();
            let mut columns = Vec::with_capacity(fields.len());
            for field in &fields {
                columns.push((field.name().to_string(), series_to_items(field)?));
            }
            (0..series.len())
                .map(|row| {
                    if nulls.get(row).unwrap_or(false) {
                        Value::Null
                    } else {
                        let mut map = RowMap::new();
                        for (name, items) in &columns {
                            map.insert(name.clone(), items[row].clone());
                        }
                        Value::Object(map)
                    }
                })
                .collect()
        }
        other => {
            return Err(DatasetError::internal(format!(
                "unsupported column dtype {:?}",
                other
            )))
        }
    };
    Ok(items)
}

/// Extracts one column of a frame as items.
pub fn column_items(df: &DataFrame, name: &str) -> Result<Vec<Item>> {
    let column = df.column(name)?;
    series_to_items(column.as_materialized_series())
}

/// Converts a frame to row maps, preserving column order.
pub fn frame_to_rows(df: &DataFrame) -> Result<Vec<RowMap>> {
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        columns.push((
            column.name().to_string(),
            series_to_items(column.as_materialized_series())?,
        ));
    }
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut row = RowMap::new();
        for (name, items) in &columns {
            row.insert(name.clone(), items[i].clone());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Builds a frame from items via the engine's line-JSON reader, pinned to
/// the supplied schema so absent keys land as typed nulls.
pub fn items_to_dataframe(items: &[Item], schema: PlSchema) -> Result<DataFrame> {
    if items.is_empty() {
        return Ok(DataFrame::empty_with_schema(&schema));
    }
    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, item)?;
        buf.push(b'\n');
    }
    let df = JsonReader::new(Cursor::new(buf))
        .with_json_format(JsonFormat::JsonLines)
        .with_schema(Arc::new(schema))
        .finish()?;
    Ok(df)
}
