use polars::prelude::{lit, when, DataType as PlDataType, Expr, NULL};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};
use crate::value::Item;

/// Normalized binning: `k` strictly increasing boundaries expand to `k + 1`
/// half-open intervals `(-inf, b1), [b1, b2), ..., [bk, +inf)`. Labels, when
/// present, carry one entry per interval; otherwise the bucket index
/// stringified is the label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedBins {
    pub bins: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl NamedBins {
    pub fn new(bins: Vec<f64>) -> Result<NamedBins> {
        if bins.is_empty() {
            return Err(DatasetError::internal("bins require at least one boundary"));
        }
        if bins.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DatasetError::internal(
                "bin boundaries must be strictly increasing",
            ));
        }
        Ok(NamedBins { bins, labels: None })
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Result<NamedBins> {
        if labels.len() != self.bins.len() + 1 {
            return Err(DatasetError::internal(
                "bins require one label per interval (boundaries + 1)",
            ));
        }
        self.labels = Some(labels);
        Ok(self)
    }

    /// Builds named bins from contiguous `(label, min, max)` ranges: the
    /// first min and last max are open-ended, and every range's max must
    /// equal the next range's min.
    pub fn from_ranges<S: AsRef<str>>(
        ranges: &[(S, Option<f64>, Option<f64>)],
    ) -> Result<NamedBins> {
        if ranges.len() < 2 {
            return Err(DatasetError::internal("named ranges require at least two entries"));
        }
        let mut bins = Vec::with_capacity(ranges.len() - 1);
        let mut labels = Vec::with_capacity(ranges.len());
        for (i, (label, range_min, range_max)) in ranges.iter().enumerate() {
            labels.push(label.as_ref().to_string());
            if i == 0 {
                if range_min.is_some() {
                    return Err(DatasetError::internal("first range must be open below"));
                }
            } else if *range_min != Some(bins[i - 1]) {
                return Err(DatasetError::internal("ranges must be contiguous"));
            }
            if i + 1 < ranges.len() {
                let max = range_max
                    .ok_or_else(|| DatasetError::internal("interior ranges must be bounded"))?;
                bins.push(max);
            } else if range_max.is_some() {
                return Err(DatasetError::internal("last range must be open above"));
            }
        }
        NamedBins::new(bins)?.with_labels(labels)
    }

    fn label(&self, interval: usize) -> String {
        match &self.labels {
            Some(labels) => labels[interval].clone(),
            None => interval.to_string(),
        }
    }
}

/// Binning input for `select_groups`: plain boundaries or named ranges.
#[derive(Debug, Clone, PartialEq)]
pub enum Bins {
    Boundaries(Vec<f64>),
    Named(NamedBins),
}

impl Bins {
    pub fn into_named(self) -> Result<NamedBins> {
        match self {
            Bins::Boundaries(bins) => NamedBins::new(bins),
            Bins::Named(named) => Ok(named),
        }
    }
}

impl From<Vec<f64>> for Bins {
    fn from(bins: Vec<f64>) -> Self {
        Bins::Boundaries(bins)
    }
}

impl From<NamedBins> for Bins {
    fn from(named: NamedBins) -> Self {
        Bins::Named(named)
    }
}

/// Equal-width buckets over `[min, max]`, labeled by bucket index.
pub(crate) fn auto_bins(min: f64, max: f64, num_bins: usize) -> NamedBins {
    let width = (max - min) / num_bins as f64;
    let bins = (1..num_bins)
        .map(|i| min + width * i as f64)
        .collect::<Vec<_>>();
    let labels = (0..num_bins).map(|i| i.to_string()).collect();
    NamedBins { bins, labels: Some(labels) }
}

/// Maps a numeric value to its bucket label. Each non-null, non-NaN value
/// lands in the unique interval with `bin_min <= value < bin_max`; NaN and
/// null map to null and form their own group.
pub(crate) fn bucket_expr(named: &NamedBins, value: Expr) -> Expr {
    let v = value.cast(PlDataType::Float64);
    let bins = &named.bins;
    let last = bins.len() - 1;

    let mut chain = when(v.clone().is_nan())
        .then(lit(NULL))
        .when(v.clone().lt(lit(bins[0])))
        .then(lit(named.label(0)));
    for i in 1..bins.len() {
        chain = chain
            .when(
                v.clone()
                    .gt_eq(lit(bins[i - 1]))
                    .and(v.clone().lt(lit(bins[i]))),
            )
            .then(lit(named.label(i)));
    }
    chain
        .when(v.gt_eq(lit(bins[last])))
        .then(lit(named.label(bins.len())))
        .otherwise(lit(NULL))
}

/// Result of a `select_groups` query: ordered `(value, count)` pairs plus
/// the too-many-distinct flag and the bins used, when binning applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectGroupsResult {
    pub counts: Vec<(Item, u64)>,
    pub too_many_distinct: bool,
    pub bins: Option<NamedBins>,
}

impl SelectGroupsResult {
    pub(crate) fn too_many_distinct() -> SelectGroupsResult {
        SelectGroupsResult {
            counts: Vec::new(),
            too_many_distinct: true,
            bins: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::column_items;
    use polars::prelude::*;
    use serde_json::json;

    #[test]
    fn ranges_normalize_to_boundaries_and_labels() {
        let named = NamedBins::from_ranges(&[
            ("young", None, Some(20.0)),
            ("adult", Some(20.0), Some(50.0)),
            ("middle-aged", Some(50.0), Some(65.0)),
            ("senior", Some(65.0), None),
        ])
        .unwrap();
        assert_eq!(named.bins, vec![20.0, 50.0, 65.0]);
        assert_eq!(named.labels.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn non_contiguous_ranges_rejected() {
        let err = NamedBins::from_ranges(&[
            ("a", None, Some(10.0)),
            ("b", Some(20.0), None),
        ])
        .unwrap_err();
        assert!(matches!(err, DatasetError::Internal(_)));
        assert!(NamedBins::new(vec![5.0, 5.0]).is_err());
    }

    #[test]
    fn bucket_assignment_covers_each_value_once() {
        let named = NamedBins::new(vec![20.0, 50.0, 60.0]).unwrap();
        let frame = df!("value" => [34.0f64, 45.0, 17.0, f64::NAN, 55.0])
            .unwrap()
            .lazy()
            .select([bucket_expr(&named, col("value")).alias("bucket")])
            .collect()
            .unwrap();
        let buckets = column_items(&frame, "bucket").unwrap();
        assert_eq!(
            buckets,
            vec![json!("1"), json!("1"), json!("0"), json!(null), json!("2")]
        );
    }

    #[test]
    fn auto_bins_split_the_range_evenly() {
        let named = auto_bins(0.0, 4.0, 15);
        assert_eq!(named.bins.len(), 14);
        assert_eq!(named.labels.as_ref().unwrap()[14], "14");

        // Values on the closed max land in the final bucket.
        let frame = df!("value" => [0.0f64, 1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .lazy()
            .select([bucket_expr(&named, col("value")).alias("bucket")])
            .collect()
            .unwrap();
        let buckets = column_items(&frame, "bucket").unwrap();
        assert_eq!(
            buckets,
            vec![json!("0"), json!("3"), json!("7"), json!("11"), json!("14")]
        );
    }
}
