use std::path::PathBuf;

/// Default ceiling on distinct group values before `select_groups` reports
/// `too_many_distinct` instead of materializing the histogram.
pub const TOO_MANY_DISTINCT: u64 = 250;

/// Bucket count for automatic equal-width binning of numeric leaves.
pub const NUM_AUTO_BINS: usize = 15;

/// Sample size for approximating the distinct count of a column.
pub const SAMPLE_SIZE_DISTINCT_COUNT: u64 = 100_000;

/// Engine configuration.
///
/// Recognized environment options: `DATA_PATH` (dataset root) and `DEBUG`
/// (timing logs on query execution). The remaining fields are tunables,
/// overridable per engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory holding `<namespace>/<dataset>` directories.
    pub data_path: PathBuf,
    /// Emit timing logs around query execution.
    pub debug: bool,
    pub too_many_distinct: u64,
    pub num_auto_bins: usize,
    pub distinct_sample_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_path: PathBuf::from("./data"),
            debug: false,
            too_many_distinct: TOO_MANY_DISTINCT,
            num_auto_bins: NUM_AUTO_BINS,
            distinct_sample_size: SAMPLE_SIZE_DISTINCT_COUNT,
        }
    }
}

impl EngineConfig {
    /// Reads `DATA_PATH` and `DEBUG` from the environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Ok(path) = std::env::var("DATA_PATH") {
            if !path.is_empty() {
                config.data_path = PathBuf::from(path);
            }
        }
        if let Ok(debug) = std::env::var("DEBUG") {
            config.debug = debug == "true" || debug == "1";
        }
        config
    }

    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = data_path.into();
        self
    }

    pub fn with_too_many_distinct(mut self, limit: u64) -> Self {
        self.too_many_distinct = limit;
        self
    }
}
