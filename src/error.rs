use polars::prelude::PolarsError;

use crate::schema::Path;

/// Errors surfaced by dataset operators.
///
/// Validation variants are raised before any I/O. Failures bubbling out of
/// the columnar engine, the filesystem, or an external signal are folded
/// into the `Internal` channel with the underlying message attached.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The path does not resolve against the schema at all.
    #[error("path {0} not found in schema")]
    PathNotInSchema(Path),

    /// The path resolves, but its terminus is not a leaf with a dtype.
    #[error("leaf {0} not found in dataset")]
    PathNotLeaf(Path),

    /// Filters cannot reference a repeated (`*`) path segment.
    #[error("unable to filter on path {0}: filtering on a repeated field is not supported")]
    FilterOnRepeatedPath(Path),

    /// The selector's repeated-path restrictions were violated.
    #[error("unsupported path shape for {path}: {reason}")]
    UnsupportedSpanShape { path: Path, reason: String },

    /// The signal's enrichment type does not accept the leaf's dtype.
    #[error("leaf {path} has dtype {dtype} which is not supported by signal \"{signal}\"")]
    EnrichmentTypeMismatch {
        path: Path,
        dtype: String,
        signal: String,
    },

    /// An embedding-based signal has no embedding identity, or the
    /// embedding index for a column has not been computed.
    #[error("missing embedding for {path}: {reason}")]
    MissingEmbedding { path: Path, reason: String },

    /// A sort key does not name a projected column alias.
    #[error("column {alias} is not defined as an alias in the given columns")]
    SortAliasUnknown { alias: String },

    /// Selecting a specific index of a repeated field is not supported.
    #[error("unable to select path {0}: indexing into a repeated field is not supported")]
    IndexIntoRepeated(Path),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub type Result<T, E = DatasetError> = std::result::Result<T, E>;

impl DatasetError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        DatasetError::Internal(msg.into())
    }
}
