use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::embedding::VectorStore;
use crate::error::Result;
use crate::manifest::SignalInfo;
use crate::schema::{DataType, Field, Path};
use crate::value::Item;

/// The kind of input a signal enriches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentType {
    /// Operates on text leaf values.
    Text,
    /// Operates on embeddings of text leaves via a vector store.
    TextEmbedding,
}

/// Whether an enrichment type accepts a leaf dtype.
pub fn enrichment_supports_dtype(enrichment_type: EnrichmentType, dtype: DataType) -> bool {
    match enrichment_type {
        EnrichmentType::Text | EnrichmentType::TextEmbedding => {
            matches!(dtype, DataType::String | DataType::StringSpan)
        }
    }
}

/// Input handed to [`Signal::compute`]: either the flattened leaf values,
/// or (for embedding-based signals) the flat key sequence plus the vector
/// store holding the column's embeddings.
pub enum SignalInput {
    Data(Vec<Item>),
    Keys {
        keys: Vec<String>,
        vector_store: Arc<dyn VectorStore>,
    },
}

/// Signal outputs are produced lazily, one element per input leaf, so the
/// engine can report progress and observe cancellation between elements.
pub type SignalOutput = Box<dyn Iterator<Item = Result<Item>> + Send>;

/// An external computation mapping leaf values (or vector-store lookups)
/// to a new field aligned one-for-one with the source leaf.
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    fn enrichment_type(&self) -> EnrichmentType;

    /// The embedding identity this signal reads, for embedding-based
    /// signals. Keys the vector-store cache together with the leaf path.
    fn embedding(&self) -> Option<&str> {
        None
    }

    fn embedding_based(&self) -> bool {
        self.enrichment_type() == EnrichmentType::TextEmbedding
    }

    /// The declared output shape for an enrichment of `input_path`.
    fn fields(&self, input_path: &Path) -> Field;

    /// Configuration recorded in the signal manifest.
    fn config(&self) -> serde_json::Value {
        json!({})
    }

    fn compute(&self, input: SignalInput) -> Result<SignalOutput>;
}

/// The manifest identity of a signal.
pub fn signal_info(signal: &dyn Signal) -> SignalInfo {
    SignalInfo {
        name: signal.name().to_string(),
        config: signal.config(),
    }
}

/// A per-row user-defined transform: the signal runs over the projected
/// column after the base query executes.
#[derive(Clone)]
pub struct SignalTransform {
    pub signal: Arc<dyn Signal>,
}

impl fmt::Debug for SignalTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalTransform")
            .field("signal", &self.signal.name())
            .finish()
    }
}

/// A requested output column: a feature path, a result alias, and an
/// optional transform.
#[derive(Debug, Clone)]
pub struct Column {
    pub feature: Path,
    pub alias: String,
    pub transform: Option<SignalTransform>,
}

impl Column {
    pub fn new(feature: impl Into<Path>) -> Column {
        let feature = feature.into();
        let alias = feature.dotted();
        Column {
            feature,
            alias,
            transform: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Column {
        self.alias = alias.into();
        self
    }

    pub fn with_signal(mut self, signal: Arc<dyn Signal>) -> Column {
        self.transform = Some(SignalTransform { signal });
        self
    }
}

/// A column identifier: a bare path or a full [`Column`].
#[derive(Debug, Clone)]
pub enum ColumnId {
    Path(Path),
    Column(Column),
}

impl From<&str> for ColumnId {
    fn from(path: &str) -> Self {
        ColumnId::Path(Path::from(path))
    }
}

impl From<Path> for ColumnId {
    fn from(path: Path) -> Self {
        ColumnId::Path(path)
    }
}

impl From<Column> for ColumnId {
    fn from(column: Column) -> Self {
        ColumnId::Column(column)
    }
}

/// Normalizes a column identifier into a [`Column`].
pub fn column_from_identifier(id: ColumnId) -> Column {
    match id {
        ColumnId::Path(path) => Column::new(path),
        ColumnId::Column(column) => column,
    }
}

/// Default name for a signal column when the caller does not supply one.
pub fn default_top_level_signal_col_name(signal: &dyn Signal, column: &Column) -> String {
    format!("{}.{}", column.alias, signal.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_dtype_support() {
        assert!(enrichment_supports_dtype(EnrichmentType::Text, DataType::String));
        assert!(enrichment_supports_dtype(EnrichmentType::Text, DataType::StringSpan));
        assert!(!enrichment_supports_dtype(EnrichmentType::Text, DataType::Int64));
        assert!(!enrichment_supports_dtype(
            EnrichmentType::TextEmbedding,
            DataType::Float32
        ));
    }

    #[test]
    fn column_defaults_alias_to_dotted_path() {
        let column = Column::new("list_of_structs.*.name");
        assert_eq!(column.alias, "list_of_structs.*.name");
        let column = column.with_alias("names");
        assert_eq!(column.alias, "names");
    }
}
