use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path as FsPath, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};
use crate::schema::{Field, Path, Schema};

/// Filename of the source manifest inside a dataset directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Suffix identifying signal manifests inside a dataset directory.
pub const SIGNAL_MANIFEST_SUFFIX: &str = "signal_manifest.json";

/// Manifest describing the source shards of a dataset. Immutable after
/// creation; produced by an external loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    /// Parquet shard filenames, relative to the dataset directory.
    pub files: Vec<String>,
    pub data_schema: Schema,
}

/// The identity of the signal that produced a column: its registered name
/// plus configuration. Resolution back to an implementation is external.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Manifest describing one signal computation: shards, schema, signal
/// identity, and the leaf path it enriched. Writing this file commits the
/// enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalManifest {
    /// Parquet shard filenames, relative to the dataset directory.
    pub files: Vec<String>,
    /// The column name the signal values take in the merged table.
    pub top_level_column_name: String,
    pub data_schema: Schema,
    pub signal: SignalInfo,
    /// The source leaf path this signal was computed over.
    pub enriched_path: Path,
}

/// A derived column group, assembled from a signal manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedColumn {
    pub files: Vec<String>,
    pub top_level_column_name: String,
    /// Name of the field inside the shard that holds the values.
    pub value_field_name: String,
    pub value_field_schema: Field,
    pub enriched_path: Path,
}

impl ComputedColumn {
    pub fn from_signal_manifest(manifest: &SignalManifest) -> Result<ComputedColumn> {
        let value_field_name = manifest
            .enriched_path
            .parts()
            .first()
            .cloned()
            .ok_or_else(|| DatasetError::internal("signal manifest has an empty enriched path"))?;
        let value_field_schema = manifest
            .data_schema
            .fields
            .get(&value_field_name)
            .cloned()
            .ok_or_else(|| {
                DatasetError::internal(format!(
                    "signal manifest schema is missing its value field \"{}\"",
                    value_field_name
                ))
            })?;
        Ok(ComputedColumn {
            files: manifest.files.clone(),
            top_level_column_name: manifest.top_level_column_name.clone(),
            value_field_name,
            value_field_schema,
            enriched_path: manifest.enriched_path.clone(),
        })
    }
}

/// The merged view over the source and every computed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub namespace: String,
    pub dataset_name: String,
    pub data_schema: Schema,
    pub num_items: u64,
}

/// Union of the source schema and the computed columns' top-level fields.
/// Column names must not collide.
pub fn merged_schema(source: &Schema, computed_columns: &[ComputedColumn]) -> Result<Schema> {
    let mut fields = source.fields.clone();
    for column in computed_columns {
        let replaced = fields.insert(
            column.top_level_column_name.clone(),
            column.value_field_schema.clone(),
        );
        if replaced.is_some() {
            return Err(DatasetError::internal(format!(
                "computed column \"{}\" collides with an existing column",
                column.top_level_column_name
            )));
        }
    }
    Ok(Schema::new(fields))
}

pub fn read_source_manifest(dataset_path: &FsPath) -> Result<SourceManifest> {
    let file = File::open(dataset_path.join(MANIFEST_FILENAME))?;
    let manifest: SourceManifest = serde_json::from_reader(BufReader::new(file))?;
    manifest.data_schema.validate()?;
    Ok(manifest)
}

pub fn read_signal_manifest(path: &FsPath) -> Result<SignalManifest> {
    let file = File::open(path)?;
    let manifest: SignalManifest = serde_json::from_reader(BufReader::new(file))?;
    Ok(manifest)
}

pub fn write_json_manifest<T: Serialize>(path: &FsPath, manifest: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
    Ok(())
}

/// All signal manifest filepaths under the dataset directory, sorted so the
/// result doubles as the joined-view cache key.
pub fn discover_signal_manifests(dataset_path: &FsPath) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dataset_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SIGNAL_MANIFEST_SUFFIX))
            {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Filename prefix for a signal's parquet shards.
pub fn signal_parquet_prefix(column_name: &str, signal_name: &str) -> String {
    format!("{}.{}", column_name, signal_name)
}

/// Filename of a signal's manifest.
pub fn signal_manifest_filename(column_name: &str, signal_name: &str) -> String {
    format!("{}.{}.{}", column_name, signal_name, SIGNAL_MANIFEST_SUFFIX)
}

/// Shard filename for the given prefix and shard position.
pub fn parquet_shard_filename(prefix: &str, shard_index: usize, num_shards: usize) -> String {
    format!("{}-{:05}-of-{:05}.parquet", prefix, shard_index, num_shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, UUID_COLUMN};
    use serde_json::json;

    fn source_manifest() -> SourceManifest {
        SourceManifest {
            files: vec!["data-00000-of-00001.parquet".to_string()],
            data_schema: Schema::new([
                (UUID_COLUMN.to_string(), Field::leaf(DataType::String)),
                ("text".to_string(), Field::leaf(DataType::String)),
            ]),
        }
    }

    #[test]
    fn source_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = source_manifest();
        write_json_manifest(&dir.path().join(MANIFEST_FILENAME), &manifest).unwrap();
        let back = read_source_manifest(dir.path()).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn signal_manifest_discovery_is_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let names = [
            "text.b_signal.signal_manifest.json",
            "text.a_signal.signal_manifest.json",
        ];
        for name in names {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::write(
            dir.path().join("sub").join("text.c.signal_manifest.json"),
            "{}",
        )
        .unwrap();
        std::fs::write(dir.path().join("data.parquet"), "").unwrap();

        let found = discover_signal_manifests(dir.path()).unwrap();
        assert_eq!(found.len(), 3);
        assert!(found[0].ends_with("text.a_signal.signal_manifest.json"));
    }

    #[test]
    fn computed_column_pulls_value_field() {
        let manifest = SignalManifest {
            files: vec!["text.length.00000-of-00001.parquet".to_string()],
            top_level_column_name: "text.length".to_string(),
            data_schema: Schema::new([
                (UUID_COLUMN.to_string(), Field::leaf(DataType::String)),
                ("text".to_string(), Field::leaf(DataType::Int64)),
            ]),
            signal: SignalInfo {
                name: "length".to_string(),
                config: json!({}),
            },
            enriched_path: Path::from("text"),
        };
        let column = ComputedColumn::from_signal_manifest(&manifest).unwrap();
        assert_eq!(column.value_field_name, "text");
        assert_eq!(column.value_field_schema.dtype(), Some(DataType::Int64));
    }

    #[test]
    fn merged_schema_rejects_collisions() {
        let source = source_manifest().data_schema;
        let column = ComputedColumn {
            files: vec![],
            top_level_column_name: "text".to_string(),
            value_field_name: "text".to_string(),
            value_field_schema: Field::leaf(DataType::Int64),
            enriched_path: Path::from("text"),
        };
        assert!(merged_schema(&source, std::slice::from_ref(&column)).is_err());

        let ok_column = ComputedColumn {
            top_level_column_name: "text.length".to_string(),
            ..column
        };
        let merged = merged_schema(&source, &[ok_column]).unwrap();
        assert!(merged.fields.contains_key("text.length"));
    }
}
