//! Dataset engine for semi-structured, nested records stored as parquet
//! shards. Supports derived signal columns over schema leaves, per-column
//! embedding indexes with vector stores, and analytic queries: row
//! selection with filters and per-row transforms, grouped histograms with
//! binning, and per-leaf statistics.

pub mod config;
pub mod dataset;
pub mod embedding;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod groups;
pub mod manifest;
pub mod schema;
mod select;
pub mod signal;
pub mod stats;
pub mod tasks;
mod utils;
pub mod value;

pub use config::EngineConfig;
pub use dataset::{
    Dataset, GroupsSortBy, SelectGroupsOptions, SelectRowsOptions, SelectRowsResult, SortOrder,
};
pub use embedding::{
    DiskEmbeddingIndexer, Embedding, EmbeddingIndex, EmbeddingIndexer, InMemoryVectorStore,
    VectorStore,
};
pub use error::{DatasetError, Result};
pub use filter::{BinaryOp, Filter, FilterValue};
pub use groups::{Bins, NamedBins, SelectGroupsResult};
pub use manifest::{DatasetManifest, SignalManifest, SourceManifest};
pub use schema::{normalize_path, DataType, Field, Path, Schema, UUID_COLUMN};
pub use signal::{Column, ColumnId, EnrichmentType, Signal, SignalInput, SignalOutput};
pub use stats::StatsResult;
pub use tasks::{ProgressReporter, TaskId};
pub use value::{Item, RowMap};
