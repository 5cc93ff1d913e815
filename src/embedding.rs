use std::path::{Path as FsPath, PathBuf};

use indexmap::IndexMap;
use polars::prelude::{
    DataType as PlDataType, Field as PlField, LazyFrame, PlPath, PlPathRef, Schema as PlSchema,
};
use serde_json::json;

use crate::error::{DatasetError, Result};
use crate::schema::Path;
use crate::utils::write_parquet_atomic;
use crate::value::{items_to_dataframe, Item};

/// An embedding space identity plus compute shape. The registry that
/// resolves names to models lives outside the engine.
pub trait Embedding: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> serde_json::Value {
        json!({})
    }

    /// Maps leaf values to dense vectors, one per input.
    fn compute(&self, data: &[Item]) -> Result<Vec<Vec<f32>>>;
}

/// A materialized embedding index for one (leaf path, embedding) pair.
#[derive(Debug)]
pub struct EmbeddingIndex {
    pub keys: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Storage of embedding indexes, addressed by leaf path and embedding name.
pub trait EmbeddingIndexer: Send + Sync {
    fn get_embedding_index(&self, path: &Path, embedding_name: &str) -> Result<EmbeddingIndex>;

    fn compute_embedding_index(
        &self,
        path: &Path,
        embedding: &dyn Embedding,
        keys: &[String],
        data: &[Item],
    ) -> Result<()>;
}

const INDEX_FILENAME: &str = "index.parquet";
const KEY_COLUMN: &str = "key";
const EMBEDDING_COLUMN: &str = "embedding";

/// On-disk indexer storing each index as a parquet file of
/// `{key, embedding}` rows under `embeddings/<path>/<embedding>/`.
pub struct DiskEmbeddingIndexer {
    dataset_path: PathBuf,
}

impl DiskEmbeddingIndexer {
    pub fn new(dataset_path: impl Into<PathBuf>) -> DiskEmbeddingIndexer {
        DiskEmbeddingIndexer {
            dataset_path: dataset_path.into(),
        }
    }

    fn index_dir(&self, path: &Path, embedding_name: &str) -> PathBuf {
        self.dataset_path
            .join("embeddings")
            .join(path.dotted())
            .join(embedding_name)
    }

    fn index_schema() -> PlSchema {
        PlSchema::from_iter([
            PlField::new(KEY_COLUMN.into(), PlDataType::String),
            PlField::new(
                EMBEDDING_COLUMN.into(),
                PlDataType::List(Box::new(PlDataType::Float32)),
            ),
        ])
    }
}

impl EmbeddingIndexer for DiskEmbeddingIndexer {
    fn get_embedding_index(&self, path: &Path, embedding_name: &str) -> Result<EmbeddingIndex> {
        let file = self.index_dir(path, embedding_name).join(INDEX_FILENAME);
        if !file.exists() {
            return Err(DatasetError::MissingEmbedding {
                path: path.clone(),
                reason: format!("embedding index \"{}\" has not been computed", embedding_name),
            });
        }
        let df = LazyFrame::scan_parquet(parquet_path(&file)?, Default::default())?.collect()?;

        let keys = df
            .column(KEY_COLUMN)?
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|k| k.unwrap_or_default().to_string())
            .collect();
        let mut embeddings = Vec::with_capacity(df.height());
        let vectors_column = df.column(EMBEDDING_COLUMN)?.as_materialized_series();
        for row in vectors_column.list()?.into_iter() {
            let vector = match row {
                Some(series) => series.f32()?.into_iter().flatten().collect(),
                None => Vec::new(),
            };
            embeddings.push(vector);
        }
        Ok(EmbeddingIndex { keys, embeddings })
    }

    fn compute_embedding_index(
        &self,
        path: &Path,
        embedding: &dyn Embedding,
        keys: &[String],
        data: &[Item],
    ) -> Result<()> {
        if keys.len() != data.len() {
            return Err(DatasetError::internal(
                "embedding keys and data are not the same length",
            ));
        }
        let vectors = embedding.compute(data)?;
        if vectors.len() != keys.len() {
            return Err(DatasetError::internal(
                "embedding returned a different number of vectors than inputs",
            ));
        }

        let items: Vec<Item> = keys
            .iter()
            .zip(&vectors)
            .map(|(key, vector)| json!({ KEY_COLUMN: key, EMBEDDING_COLUMN: vector }))
            .collect();
        let mut df = items_to_dataframe(&items, Self::index_schema())?;

        let dir = self.index_dir(path, embedding.name());
        std::fs::create_dir_all(&dir)?;
        write_parquet_atomic(&mut df, &dir, INDEX_FILENAME)?;
        tracing::info!(path = %path, embedding = embedding.name(), "wrote embedding index");
        Ok(())
    }
}

pub(crate) fn parquet_path(path: &FsPath) -> Result<PlPath> {
    Ok(PlPathRef::from_local_path(path).into_owned())
}

/// A pluggable store of dense vectors addressed by enrichment keys.
pub trait VectorStore: Send + Sync {
    fn add(&mut self, keys: &[String], vectors: &[Vec<f32>]) -> Result<()>;

    /// Looks up vectors for the given keys, in order.
    fn get(&self, keys: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The `k` stored keys most similar to the query, best first.
    fn topk(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>>;
}

/// In-memory vector store scoring by dot product.
#[derive(Default)]
pub struct InMemoryVectorStore {
    offsets: IndexMap<String, usize>,
    vectors: Vec<Vec<f32>>,
}

impl VectorStore for InMemoryVectorStore {
    fn add(&mut self, keys: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if keys.len() != vectors.len() {
            return Err(DatasetError::internal(
                "vector store add: keys and vectors are not the same length",
            ));
        }
        for (key, vector) in keys.iter().zip(vectors) {
            self.offsets.insert(key.clone(), self.vectors.len());
            self.vectors.push(vector.clone());
        }
        Ok(())
    }

    fn get(&self, keys: &[String]) -> Result<Vec<Vec<f32>>> {
        keys.iter()
            .map(|key| {
                self.offsets
                    .get(key)
                    .map(|&i| self.vectors[i].clone())
                    .ok_or_else(|| {
                        DatasetError::internal(format!("vector store has no key \"{}\"", key))
                    })
            })
            .collect()
    }

    fn topk(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let mut scored: Vec<(String, f32)> = self
            .offsets
            .iter()
            .map(|(key, &i)| {
                let score = self.vectors[i]
                    .iter()
                    .zip(query)
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (key.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
