#![allow(dead_code)]

use std::sync::Mutex;

use serde_json::json;
use tempfile::TempDir;

use shardset::enrichment::write_items_to_parquet;
use shardset::manifest::{write_json_manifest, MANIFEST_FILENAME};
use shardset::schema::{DataType, Field};
use shardset::{
    Dataset, Embedding, EngineConfig, EnrichmentType, Item, Path, Result, Schema, Signal,
    SignalInput, SignalOutput, SourceManifest, VectorStore, UUID_COLUMN,
};

/// Writes `items` as a single-shard dataset under a temp root and opens it.
/// Rows without a uuid get sequential ones ("1", "2", ...).
pub fn make_test_data(items: &[Item], schema: Schema, config: EngineConfig) -> (TempDir, Dataset) {
    let root = TempDir::new().expect("temp dir");
    let dataset_path = root.path().join("test").join("ds");
    std::fs::create_dir_all(&dataset_path).expect("dataset dir");

    let mut schema_fields = vec![(UUID_COLUMN.to_string(), Field::leaf(DataType::String))];
    schema_fields.extend(
        schema
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() != UUID_COLUMN)
            .map(|(name, field)| (name.clone(), field.clone())),
    );
    let schema = Schema::new(schema_fields);

    let items: Vec<Item> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut row = item.as_object().cloned().unwrap_or_default();
            row.entry(UUID_COLUMN.to_string())
                .or_insert_with(|| json!((i + 1).to_string()));
            Item::Object(row)
        })
        .collect();

    let filename =
        write_items_to_parquet(&items, &dataset_path, &schema, "data", 0, 1).expect("write shard");
    let manifest = SourceManifest {
        files: vec![filename],
        data_schema: schema,
    };
    write_json_manifest(&dataset_path.join(MANIFEST_FILENAME), &manifest).expect("write manifest");

    let config = config.with_data_path(root.path());
    let dataset = Dataset::open("test", "ds", config).expect("open dataset");
    (root, dataset)
}

pub fn make_default_test_data(items: &[Item], schema: Schema) -> (TempDir, Dataset) {
    make_test_data(items, schema, EngineConfig::default())
}

/// Text-length signal: maps strings to their character count.
pub struct LengthSignal;

impl Signal for LengthSignal {
    fn name(&self) -> &str {
        "test_len"
    }

    fn enrichment_type(&self) -> EnrichmentType {
        EnrichmentType::Text
    }

    fn fields(&self, _input_path: &Path) -> Field {
        Field::leaf(DataType::Int64)
    }

    fn compute(&self, input: SignalInput) -> Result<SignalOutput> {
        let SignalInput::Data(data) = input else {
            panic!("length signal takes data input");
        };
        Ok(Box::new(data.into_iter().map(|item| {
            Ok(match item.as_str() {
                Some(s) => json!(s.chars().count() as i64),
                None => Item::Null,
            })
        })))
    }
}

/// Embedding that maps a string to `[char_count, 1.0]`.
pub struct LengthEmbedding;

impl Embedding for LengthEmbedding {
    fn name(&self) -> &str {
        "test_embedding"
    }

    fn compute(&self, data: &[Item]) -> Result<Vec<Vec<f32>>> {
        Ok(data
            .iter()
            .map(|item| {
                let len = item.as_str().map(|s| s.chars().count()).unwrap_or(0);
                vec![len as f32, 1.0]
            })
            .collect())
    }
}

/// Embedding-based signal returning the first component of each stored
/// vector, recording every key it was asked about.
#[derive(Default)]
pub struct FirstComponentSignal {
    pub seen_keys: Mutex<Vec<String>>,
}

impl Signal for FirstComponentSignal {
    fn name(&self) -> &str {
        "test_first_component"
    }

    fn enrichment_type(&self) -> EnrichmentType {
        EnrichmentType::TextEmbedding
    }

    fn embedding(&self) -> Option<&str> {
        Some("test_embedding")
    }

    fn fields(&self, _input_path: &Path) -> Field {
        Field::leaf(DataType::Float32)
    }

    fn compute(&self, input: SignalInput) -> Result<SignalOutput> {
        let SignalInput::Keys { keys, vector_store } = input else {
            panic!("embedding signal takes keys input");
        };
        self.seen_keys
            .lock()
            .expect("seen keys lock")
            .extend(keys.iter().cloned());
        let vectors = vector_store.get(&keys)?;
        Ok(Box::new(
            vectors.into_iter().map(|v| Ok(json!(v[0] as f64))),
        ))
    }
}

/// Helper to attach a signal transform to a column in tests.
pub fn transform_column(
    feature: &str,
    alias: &str,
    signal: std::sync::Arc<dyn Signal>,
) -> shardset::Column {
    shardset::Column::new(feature)
        .with_alias(alias)
        .with_signal(signal)
}
