use crate::value::Item;

/// Per-leaf statistics.
///
/// The distinct count is approximated over a bounded sample and scaled by
/// `total_count / sample_size` when the leaf has more occurrences than the
/// sample; `total_count`, `min_val`, and `max_val` are exact over the full
/// projection. `avg_text_length` is present for string leaves, `min_val`/
/// `max_val` for ordinal (integer, float, datetime) leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsResult {
    pub total_count: u64,
    pub approx_count_distinct: u64,
    pub avg_text_length: Option<f64>,
    pub min_val: Option<Item>,
    pub max_val: Option<Item>,
}
