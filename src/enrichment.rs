use std::path::Path as FsPath;

use serde_json::json;

use crate::error::{DatasetError, Result};
use crate::manifest::parquet_shard_filename;
use crate::schema::{is_repeated_path_part, DataType, Field, Path, Schema, UUID_COLUMN};
use crate::utils::write_parquet_atomic;
use crate::value::{is_primitive, items_to_dataframe, Item, RowMap};

/// Key of one leaf occurrence: the row uuid, suffixed with the comma-joined
/// zero-based indices along each `*` segment when the leaf is repeated.
pub fn repeated_key(row_id: &str, repeated_idxs: &[i64]) -> String {
    if repeated_idxs.is_empty() {
        return row_id.to_string();
    }
    let joined = repeated_idxs
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}_{}", row_id, joined)
}

fn flatten_keys_inner(uuid: &str, item: &Item, idxs: &mut Vec<i64>, out: &mut Vec<String>) {
    if is_primitive(item) {
        out.push(repeated_key(uuid, idxs));
        return;
    }
    for (i, element) in item.as_array().expect("non-primitive is an array").iter().enumerate() {
        idxs.push(i as i64);
        flatten_keys_inner(uuid, element, idxs, out);
        idxs.pop();
    }
}

/// Emits the key of every leaf occurrence of a nested column, in
/// lexicographic index order, one row at a time.
pub fn flatten_keys<'a>(
    uuids: impl IntoIterator<Item = &'a str>,
    nested: impl IntoIterator<Item = &'a Item>,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut idxs = Vec::new();
    for (uuid, item) in uuids.into_iter().zip(nested) {
        flatten_keys_inner(uuid, item, &mut idxs, &mut out);
    }
    out
}

fn mirror_field(source: &Field, path_rest: &[String], enrich_field: &Field) -> Result<Field> {
    let Some(part) = path_rest.first() else {
        return Ok(enrich_field.clone());
    };
    if is_repeated_path_part(part) {
        let inner = source.repeated_field().ok_or_else(|| {
            DatasetError::internal("enriched path does not match the source schema")
        })?;
        Ok(Field::repeated(mirror_field(
            inner,
            &path_rest[1..],
            enrich_field,
        )?))
    } else {
        let child = source
            .fields()
            .and_then(|fields| fields.get(part))
            .ok_or_else(|| {
                DatasetError::internal("enriched path does not match the source schema")
            })?;
        Ok(Field::structure([(
            part.clone(),
            mirror_field(child, &path_rest[1..], enrich_field)?,
        )]))
    }
}

/// Schema of a signal shard: structurally identical to the source up to the
/// enriched leaf, which is replaced by the signal's declared output shape.
pub fn create_enriched_schema(
    source_schema: &Schema,
    enrich_path: &Path,
    enrich_field: &Field,
) -> Result<Schema> {
    let parts = enrich_path.parts();
    let first = parts
        .first()
        .ok_or_else(|| DatasetError::internal("enriched path is empty"))?;
    let top = source_schema
        .fields
        .get(first)
        .ok_or_else(|| DatasetError::PathNotInSchema(enrich_path.clone()))?;
    Ok(Schema::new([
        (UUID_COLUMN.to_string(), Field::leaf(DataType::String)),
        (
            first.clone(),
            mirror_field(top, &parts[1..], enrich_field)?,
        ),
    ]))
}

fn wrap_structs(segments: &[String], value: Item) -> Item {
    let mut out = value;
    for segment in segments.iter().rev() {
        let mut map = RowMap::new();
        map.insert(segment.clone(), out);
        out = Item::Object(map);
    }
    out
}

/// Rebuilds one enriched row value from the flat signal outputs of a single
/// uuid, using the recorded repeated indices as the only source of shape.
fn build_row_value(path_rest: &[String], group: Vec<(Option<i64>, Item)>) -> Result<Item> {
    match path_rest.iter().position(|p| is_repeated_path_part(p)) {
        None => {
            let mut group = group;
            if group.len() != 1 {
                return Err(DatasetError::internal(
                    "scalar leaf produced more than one output per row",
                ));
            }
            let (_, value) = group.pop().expect("single element");
            Ok(wrap_structs(path_rest, value))
        }
        Some(wildcard) => {
            let before = &path_rest[..wildcard];
            let after = &path_rest[wildcard + 1..];
            let mut group = group;
            group.sort_by_key(|(idx, _)| idx.unwrap_or(0));
            let elements = group
                .into_iter()
                .map(|(_, value)| wrap_structs(after, value))
                .collect();
            Ok(wrap_structs(before, Item::Array(elements)))
        }
    }
}

/// Re-structures flat signal outputs into enriched rows matching the nested
/// shape of the source leaf. Inputs arrive in selector order: grouped by
/// row, indices ascending within a row.
pub fn make_enriched_items(
    source_path: &Path,
    row_ids: &[String],
    outputs: impl Iterator<Item = Result<Item>>,
    repeated_idxs: Option<&[i64]>,
) -> Result<Vec<Item>> {
    let parts = source_path.parts();
    let first = parts
        .first()
        .ok_or_else(|| DatasetError::internal("enriched path is empty"))?;
    let path_rest = &parts[1..];

    let mut items = Vec::new();
    let mut current: Option<(String, Vec<(Option<i64>, Item)>)> = None;
    let mut flush = |current: &mut Option<(String, Vec<(Option<i64>, Item)>)>,
                     items: &mut Vec<Item>|
     -> Result<()> {
        if let Some((uuid, group)) = current.take() {
            let value = build_row_value(path_rest, group)?;
            let mut row = RowMap::new();
            row.insert(UUID_COLUMN.to_string(), json!(uuid));
            row.insert(first.clone(), value);
            items.push(Item::Object(row));
        }
        Ok(())
    };

    for (i, output) in outputs.enumerate() {
        let output = output?;
        let uuid = row_ids.get(i).ok_or_else(|| {
            DatasetError::internal("signal produced more outputs than leaf occurrences")
        })?;
        let idx = repeated_idxs.map(|idxs| idxs[i]);
        match &mut current {
            Some((current_uuid, group)) if current_uuid == uuid => group.push((idx, output)),
            _ => {
                flush(&mut current, &mut items)?;
                current = Some((uuid.clone(), vec![(idx, output)]));
            }
        }
    }
    flush(&mut current, &mut items)?;
    Ok(items)
}

/// Writes enriched items as a parquet shard and returns its filename.
pub fn write_items_to_parquet(
    items: &[Item],
    output_dir: &FsPath,
    schema: &Schema,
    filename_prefix: &str,
    shard_index: usize,
    num_shards: usize,
) -> Result<String> {
    let filename = parquet_shard_filename(filename_prefix, shard_index, num_shards);
    let mut df = items_to_dataframe(items, schema.to_polars())?;
    write_parquet_atomic(&mut df, output_dir, &filename)?;
    Ok(filename)
}
