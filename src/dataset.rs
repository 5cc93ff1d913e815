use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use polars::prelude::{
    col, concat, len, DataFrame, DataType as PlDataType, IdxSize, IntoLazy, JoinArgs, JoinType,
    LazyFrame, SortMultipleOptions,
};

use crate::config::EngineConfig;
use crate::embedding::{
    parquet_path, DiskEmbeddingIndexer, Embedding, EmbeddingIndexer, InMemoryVectorStore,
    VectorStore,
};
use crate::enrichment::{
    create_enriched_schema, flatten_keys, make_enriched_items, repeated_key, write_items_to_parquet,
};
use crate::error::{DatasetError, Result};
use crate::filter::{combined_filter_expr, validate_filters, Filter};
use crate::groups::{auto_bins, bucket_expr, Bins, SelectGroupsResult};
use crate::manifest::{
    discover_signal_manifests, merged_schema, read_signal_manifest, read_source_manifest,
    signal_manifest_filename, signal_parquet_prefix, write_json_manifest, ComputedColumn,
    DatasetManifest, SignalManifest, SourceManifest,
};
use crate::schema::{
    is_repeated_path_part, normalize_path, DataType, FieldKind, Path, Schema, UUID_COLUMN,
};
use crate::select::{leaf_value_expr, select_leafs, VALUE_COLUMN};
use crate::signal::{
    column_from_identifier, default_top_level_signal_col_name, enrichment_supports_dtype,
    signal_info, Column, ColumnId, Signal, SignalInput,
};
use crate::stats::StatsResult;
use crate::tasks::{progress, ProgressReporter};
use crate::utils::DebugTimer;
use crate::value::{column_items, flatten_iter, frame_to_rows, items_to_dataframe, unflatten, Item,
    RowMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Sort key for `select_groups`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupsSortBy {
    Value,
    /// Ties under the count sort keep first-occurrence order: grouping and
    /// sorting are both order-stable.
    #[default]
    Count,
}

#[derive(Default)]
pub struct SelectGroupsOptions {
    pub filters: Vec<Filter>,
    pub sort_by: GroupsSortBy,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub bins: Option<Bins>,
}

#[derive(Default)]
pub struct SelectRowsOptions {
    /// Columns to project; defaults to every top-level field.
    pub columns: Option<Vec<ColumnId>>,
    pub filters: Vec<Filter>,
    /// Aliases of projected columns to sort by.
    pub sort_by: Vec<String>,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Materialized rows of a `select_rows` query, consumed in order.
#[derive(Debug)]
pub struct SelectRowsResult {
    rows: Vec<RowMap>,
}

impl SelectRowsResult {
    pub fn rows(&self) -> &[RowMap] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for SelectRowsResult {
    type Item = RowMap;
    type IntoIter = std::vec::IntoIter<RowMap>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[derive(Clone)]
struct TableInfo {
    manifest: DatasetManifest,
    view: LazyFrame,
}

struct TableCache {
    /// Signal-manifest filepaths the cached view was built from.
    manifest_files: Vec<PathBuf>,
    info: TableInfo,
}

type VectorStoreFactory = Box<dyn Fn() -> Box<dyn VectorStore> + Send + Sync>;

/// A dataset of nested records stored as parquet shards under
/// `<data_path>/<namespace>/<dataset>`, queried through a lazily rebuilt
/// view joining the source with every registered signal column.
///
/// Queries run against clones of the cached lazy view, so the engine is
/// safe to invoke concurrently; the view and vector-store caches are the
/// only shared mutable state.
pub struct Dataset {
    namespace: String,
    dataset_name: String,
    dataset_path: PathBuf,
    config: EngineConfig,
    source_manifest: SourceManifest,
    embedding_indexer: Box<dyn EmbeddingIndexer>,
    vector_store_factory: VectorStoreFactory,
    vector_stores: Mutex<HashMap<(Path, String), Arc<dyn VectorStore>>>,
    table_cache: Mutex<Option<TableCache>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Dataset {
    pub fn open(namespace: &str, dataset_name: &str, config: EngineConfig) -> Result<Dataset> {
        let dataset_path = config.data_path.join(namespace).join(dataset_name);
        let source_manifest = read_source_manifest(&dataset_path)?;
        Ok(Dataset {
            namespace: namespace.to_string(),
            dataset_name: dataset_name.to_string(),
            embedding_indexer: Box::new(DiskEmbeddingIndexer::new(&dataset_path)),
            dataset_path,
            config,
            source_manifest,
            vector_store_factory: Box::new(|| Box::<InMemoryVectorStore>::default()),
            vector_stores: Mutex::new(HashMap::new()),
            table_cache: Mutex::new(None),
            progress_reporter: None,
        })
    }

    pub fn with_embedding_indexer(mut self, indexer: Box<dyn EmbeddingIndexer>) -> Dataset {
        self.embedding_indexer = indexer;
        self
    }

    pub fn with_vector_store_factory(mut self, factory: VectorStoreFactory) -> Dataset {
        self.vector_store_factory = factory;
        self
    }

    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Dataset {
        self.progress_reporter = Some(reporter);
        self
    }

    pub fn dataset_path(&self) -> &std::path::Path {
        &self.dataset_path
    }

    /// The merged manifest over the source and all computed columns.
    pub fn manifest(&self) -> Result<DatasetManifest> {
        Ok(self.table_info()?.manifest)
    }

    fn scan_shards(&self, files: &[String]) -> Result<LazyFrame> {
        let mut frames = Vec::with_capacity(files.len());
        for file in files {
            let path = self.dataset_path.join(file);
            frames.push(LazyFrame::scan_parquet(
                parquet_path(&path)?,
                Default::default(),
            )?);
        }
        match frames.len() {
            0 => Err(DatasetError::internal("manifest lists no shard files")),
            1 => Ok(frames.pop().expect("one frame")),
            _ => Ok(concat(frames.as_slice(), Default::default())?),
        }
    }

    /// Returns the cached joined view, rebuilding it whenever the set of
    /// signal manifest filepaths differs from the cached one.
    fn table_info(&self) -> Result<TableInfo> {
        let manifest_files = discover_signal_manifests(&self.dataset_path)?;
        let mut cache = lock(&self.table_cache)?;
        if let Some(cached) = cache.as_ref() {
            if cached.manifest_files == manifest_files {
                return Ok(cached.info.clone());
            }
        }
        let info = self.build_table_info(&manifest_files)?;
        *cache = Some(TableCache {
            manifest_files,
            info: info.clone(),
        });
        Ok(info)
    }

    fn invalidate_table_cache(&self) -> Result<()> {
        *lock(&self.table_cache)? = None;
        Ok(())
    }

    fn build_table_info(&self, manifest_files: &[PathBuf]) -> Result<TableInfo> {
        let mut computed_columns = Vec::with_capacity(manifest_files.len());
        for path in manifest_files {
            let manifest = read_signal_manifest(path)?;
            computed_columns.push(ComputedColumn::from_signal_manifest(&manifest)?);
        }

        let mut view = self.scan_shards(&self.source_manifest.files)?;
        for column in &computed_columns {
            let shard = self.scan_shards(&column.files)?.select([
                col(UUID_COLUMN),
                col(column.value_field_name.as_str()).alias(column.top_level_column_name.as_str()),
            ]);
            view = view.join(
                shard,
                [col(UUID_COLUMN)],
                [col(UUID_COLUMN)],
                JoinArgs::new(JoinType::Left),
            );
        }

        let count_df = view.clone().select([len()]).collect()?;
        let num_items = scalar_u64(&count_df, "len")?;

        let data_schema = merged_schema(&self.source_manifest.data_schema, &computed_columns)?;
        Ok(TableInfo {
            manifest: DatasetManifest {
                namespace: self.namespace.clone(),
                dataset_name: self.dataset_name.clone(),
                data_schema,
                num_items,
            },
            view,
        })
    }

    /// Projects the leaf values of `path`, one row per occurrence: each
    /// `*` segment is unnested in turn.
    fn leaf_projection(&self, view: &LazyFrame, path: &Path) -> LazyFrame {
        let mut lf = view
            .clone()
            .select([leaf_value_expr(path, false).alias(VALUE_COLUMN)]);
        for _ in 0..path.wildcard_count() {
            lf = lf.select([col(VALUE_COLUMN).explode()]);
        }
        lf
    }

    /// Per-leaf statistics: approximate distinct count over a bounded
    /// sample scaled to the total, exact total count, min/max for ordinal
    /// leaves, and average length for strings.
    pub fn stats(&self, leaf_path: impl Into<Path>) -> Result<StatsResult> {
        let path = normalize_path(leaf_path);
        let info = self.table_info()?;
        let leaf = info.manifest.data_schema.leaf(&path)?.clone();
        let dtype = leaf.dtype().expect("leaf has a dtype");
        let _timer = DebugTimer::new(self.config.debug, format!("stats over {}", path));

        let projection = self.leaf_projection(&info.view, &path);

        let total_df = projection
            .clone()
            .select([col(VALUE_COLUMN).count().alias("count")])
            .collect()?;
        let total_count = scalar_u64(&total_df, "count")?;

        // Approximate the distinct count over a sample to bound memory;
        // struct-shaped span leaves are skipped.
        let mut approx_count_distinct = 0;
        let mut avg_text_length = None;
        if dtype != DataType::StringSpan {
            let mut aggs = vec![col(VALUE_COLUMN)
                .drop_nulls()
                .approx_n_unique()
                .alias("approx")];
            if dtype == DataType::String {
                aggs.push(
                    col(VALUE_COLUMN)
                        .str()
                        .len_chars()
                        .mean()
                        .alias("avg_text_length"),
                );
            }
            let sample_df = projection
                .clone()
                .limit(self.config.distinct_sample_size as IdxSize)
                .select(aggs)
                .collect()?;
            let sampled = scalar_u64(&sample_df, "approx")?;
            let factor = (total_count as f64 / self.config.distinct_sample_size as f64).max(1.0);
            approx_count_distinct = (sampled as f64 * factor).round() as u64;
            if dtype == DataType::String {
                avg_text_length = scalar_f64(&sample_df, "avg_text_length")?;
            }
        }

        let mut min_val = None;
        let mut max_val = None;
        if dtype.is_ordinal() {
            let min_max_df = projection
                .select([
                    col(VALUE_COLUMN).min().alias("min_val"),
                    col(VALUE_COLUMN).max().alias("max_val"),
                ])
                .collect()?;
            min_val = scalar_item(&min_max_df, "min_val")?;
            max_val = scalar_item(&min_max_df, "max_val")?;
        }

        Ok(StatsResult {
            total_count,
            approx_count_distinct,
            avg_text_length,
            min_val,
            max_val,
        })
    }

    /// Histogram over a leaf: group raw values, or bucket numeric leaves by
    /// explicit or automatic equal-width bins. Null and NaN occurrences
    /// form their own null group. String-family leaves over the distinct
    /// threshold report `too_many_distinct` instead of grouping.
    pub fn select_groups(
        &self,
        leaf_path: impl Into<Path>,
        options: SelectGroupsOptions,
    ) -> Result<SelectGroupsResult> {
        let path = normalize_path(leaf_path);
        let info = self.table_info()?;
        let schema = &info.manifest.data_schema;
        let leaf = schema.leaf(&path)?.clone();
        let dtype = leaf.dtype().expect("leaf has a dtype");
        validate_filters(schema, &options.filters, &HashMap::new())?;
        let _timer = DebugTimer::new(self.config.debug, format!("select_groups over {}", path));

        let stats = self.stats(path.clone())?;
        let named_bins = match options.bins {
            Some(bins) => Some(bins.into_named()?),
            None if dtype.is_numeric() => {
                let min = stats.min_val.as_ref().and_then(Item::as_f64).unwrap_or(0.0);
                let max = stats.max_val.as_ref().and_then(Item::as_f64).unwrap_or(0.0);
                Some(auto_bins(min, max, self.config.num_auto_bins))
            }
            None => {
                if stats.approx_count_distinct >= self.config.too_many_distinct {
                    return Ok(SelectGroupsResult::too_many_distinct());
                }
                None
            }
        };

        let mut lf = info.view.clone();
        if let Some(predicate) = combined_filter_expr(&options.filters) {
            lf = lf.filter(predicate);
        }
        lf = self.leaf_projection(&lf, &path);
        if let Some(named) = &named_bins {
            lf = lf.select([bucket_expr(named, col(VALUE_COLUMN)).alias(VALUE_COLUMN)]);
        }

        let descending = options.sort_order == SortOrder::Desc;
        let sort_expr = match options.sort_by {
            GroupsSortBy::Count => col("count"),
            GroupsSortBy::Value => col(VALUE_COLUMN),
        };
        let mut lf = lf
            .group_by_stable([col(VALUE_COLUMN)])
            .agg([len().alias("count")])
            .sort_by_exprs(
                [sort_expr],
                SortMultipleOptions {
                    descending: vec![descending],
                    nulls_last: vec![true],
                    maintain_order: true,
                    ..Default::default()
                },
            );
        if let Some(limit) = options.limit {
            lf = lf.limit(limit as IdxSize);
        }
        let df = lf.collect()?;

        let values = column_items(&df, VALUE_COLUMN)?;
        let counts = df
            .column("count")?
            .as_materialized_series()
            .cast(&PlDataType::UInt64)?
            .u64()?
            .into_iter()
            .map(|c| c.unwrap_or(0))
            .collect::<Vec<_>>();

        Ok(SelectGroupsResult {
            counts: values.into_iter().zip(counts).collect(),
            too_many_distinct: false,
            bins: named_bins,
        })
    }

    fn validate_columns(&self, columns: &[Column], schema: &Schema) -> Result<()> {
        for column in columns {
            if let Some(transform) = &column.transform {
                let leaf = schema.leaf(&column.feature)?;
                let dtype = leaf.dtype().expect("leaf has a dtype");
                let signal = transform.signal.as_ref();
                if !enrichment_supports_dtype(signal.enrichment_type(), dtype) {
                    return Err(DatasetError::EnrichmentTypeMismatch {
                        path: column.feature.clone(),
                        dtype: dtype.to_string(),
                        signal: signal.name().to_string(),
                    });
                }
            }

            let mut current: Option<&FieldKind> = None;
            for part in column.feature.parts() {
                if part.chars().all(|c| c.is_ascii_digit()) {
                    return Err(DatasetError::IndexIntoRepeated(column.feature.clone()));
                }
                let next = match current {
                    None => schema.fields.get(part).map(|f| &f.kind),
                    Some(FieldKind::Struct(fields)) => fields.get(part).map(|f| &f.kind),
                    Some(FieldKind::Repeated(inner)) if is_repeated_path_part(part) => {
                        Some(&inner.kind)
                    }
                    _ => None,
                };
                current = Some(
                    next.ok_or_else(|| DatasetError::PathNotInSchema(column.feature.clone()))?,
                );
            }
        }
        Ok(())
    }

    /// Row selection: projection with aliases, base filters pushed into
    /// the engine, post-projection signal transforms, then transform
    /// filters re-applied over the enriched frame.
    pub fn select_rows(&self, options: SelectRowsOptions) -> Result<SelectRowsResult> {
        let info = self.table_info()?;
        let schema = &info.manifest.data_schema;
        let _timer = DebugTimer::new(self.config.debug, "select_rows");

        let mut columns: Vec<Column> = match options.columns {
            Some(ids) => ids.into_iter().map(column_from_identifier).collect(),
            // Top-level names are single path segments even when they
            // contain dots (signal columns like "text.length").
            None => schema
                .fields
                .keys()
                .map(|name| Column::new(Path(vec![name.clone()])))
                .collect(),
        };
        if !columns.iter().any(|c| c.feature.parts() == [UUID_COLUMN]) {
            columns.push(Column::new(UUID_COLUMN));
        }
        self.validate_columns(&columns, schema)?;

        let col_aliases: HashMap<String, bool> = columns
            .iter()
            .map(|c| (c.alias.clone(), c.transform.is_some()))
            .collect();

        // Split filters: transform filters wait for signal outputs, bare
        // alias filters run over the projection, the rest over the base
        // view with full path validation.
        let mut base_filters = Vec::new();
        let mut alias_filters = Vec::new();
        let mut transform_filters = Vec::new();
        for filter in options.filters {
            let first = filter.path.parts().first().map(String::as_str).unwrap_or("");
            match col_aliases.get(first) {
                Some(true) => transform_filters.push(filter),
                Some(false) if filter.path.parts().len() == 1 => alias_filters.push(filter),
                _ => base_filters.push(filter),
            }
        }
        validate_filters(schema, &base_filters, &HashMap::new())?;

        for alias in &options.sort_by {
            if !col_aliases.contains_key(alias) {
                return Err(DatasetError::SortAliasUnknown {
                    alias: alias.clone(),
                });
            }
        }

        let selection: Vec<_> = columns
            .iter()
            .map(|c| {
                // Embedding-based transforms never read the base values:
                // project shape-preserving null placeholders instead.
                let empty = c
                    .transform
                    .as_ref()
                    .is_some_and(|t| t.signal.embedding_based());
                leaf_value_expr(&c.feature, empty).alias(c.alias.as_str())
            })
            .collect();

        let mut lf = info.view.clone();
        if let Some(predicate) = combined_filter_expr(&base_filters) {
            lf = lf.filter(predicate);
        }
        lf = lf.select(selection);
        if let Some(predicate) = combined_filter_expr(&alias_filters) {
            lf = lf.filter(predicate);
        }
        if !options.sort_by.is_empty() {
            let descending = options.sort_order == SortOrder::Desc;
            lf = lf.sort_by_exprs(
                options
                    .sort_by
                    .iter()
                    .map(|alias| col(alias.as_str()))
                    .collect::<Vec<_>>(),
                SortMultipleOptions {
                    descending: vec![descending; options.sort_by.len()],
                    nulls_last: vec![true; options.sort_by.len()],
                    maintain_order: true,
                    ..Default::default()
                },
            );
        }
        if let Some(limit) = options.limit {
            lf = lf.slice(options.offset as i64, limit as IdxSize);
        } else if options.offset > 0 {
            lf = lf.slice(options.offset as i64, IdxSize::MAX);
        }

        let mut df = lf.collect()?;

        for column in columns.iter().filter(|c| c.transform.is_some()) {
            df = self.apply_transform(df, column)?;
        }

        if let Some(predicate) = combined_filter_expr(&transform_filters) {
            df = df.lazy().filter(predicate).collect()?;
        }

        Ok(SelectRowsResult {
            rows: frame_to_rows(&df)?,
        })
    }

    /// Runs a transform column's signal over the projected frame and
    /// replaces the column with the re-nested outputs.
    fn apply_transform(&self, df: DataFrame, column: &Column) -> Result<DataFrame> {
        let transform = column.transform.as_ref().expect("transform column");
        let signal = transform.signal.as_ref();
        let _timer = DebugTimer::new(
            self.config.debug,
            format!("transform \"{}\" over {}", signal.name(), column.feature),
        );

        let input_items = column_items(&df, &column.alias)?;
        let output_iter = if signal.embedding_based() {
            let embedding = signal.embedding().ok_or_else(|| {
                DatasetError::MissingEmbedding {
                    path: column.feature.clone(),
                    reason: "embedding-based signal has no embedding identity".to_string(),
                }
            })?;
            let uuids = column_items(&df, UUID_COLUMN)?;
            let uuids: Vec<&str> = uuids.iter().map(|u| u.as_str().unwrap_or("")).collect();
            let keys = flatten_keys(uuids.iter().copied(), input_items.iter());
            let vector_store = self.vector_store(&column.feature, embedding)?;
            signal.compute(SignalInput::Keys { keys, vector_store })?
        } else {
            signal.compute(SignalInput::Data(flatten_iter(input_items.iter())))?
        };
        let outputs: Vec<Item> = output_iter.collect::<Result<_>>()?;

        let mut flat = outputs.into_iter();
        let nested: Vec<Item> = input_items
            .iter()
            .map(|original| unflatten(&mut flat, original))
            .collect::<Result<_>>()?;

        let output_field = signal.fields(&column.feature);
        let mut output_dtype = crate::schema::field_to_polars(&output_field);
        for _ in 0..column.feature.wildcard_count() {
            output_dtype = PlDataType::List(Box::new(output_dtype));
        }
        let items: Vec<Item> = nested
            .into_iter()
            .map(|value| {
                let mut row = RowMap::new();
                row.insert(column.alias.clone(), value);
                Item::Object(row)
            })
            .collect();
        let output_df = items_to_dataframe(
            &items,
            polars::prelude::Schema::from_iter([polars::prelude::Field::new(
                column.alias.as_str().into(),
                output_dtype,
            )]),
        )?;

        let mut df = df;
        df.replace(
            &column.alias,
            output_df
                .column(&column.alias)?
                .as_materialized_series()
                .clone(),
        )?;
        Ok(df)
    }

    fn vector_store(&self, path: &Path, embedding_name: &str) -> Result<Arc<dyn VectorStore>> {
        let key = (path.clone(), embedding_name.to_string());
        let mut stores = lock(&self.vector_stores)?;
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let index = self
            .embedding_indexer
            .get_embedding_index(path, embedding_name)?;
        let mut store = (self.vector_store_factory)();
        store.add(&index.keys, &index.embeddings)?;
        let store: Arc<dyn VectorStore> = Arc::from(store);
        stores.insert(key, store.clone());
        Ok(store)
    }

    /// Keys of the selected leaf occurrences, `uuid` or `uuid_i,j`.
    fn selection_keys(
        row_ids: &[String],
        repeated_idxs: Option<&[i64]>,
    ) -> Vec<String> {
        match repeated_idxs {
            Some(idxs) => row_ids
                .iter()
                .zip(idxs)
                .map(|(uuid, idx)| repeated_key(uuid, &[*idx]))
                .collect(),
            None => row_ids.to_vec(),
        }
    }

    fn selection_columns(
        &self,
        df: &DataFrame,
        value_column: Option<&str>,
        repeated_indices_column: Option<&str>,
    ) -> Result<(Vec<String>, Option<Vec<i64>>, Option<Vec<Item>>)> {
        let row_ids = df
            .column(UUID_COLUMN)?
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|u| u.unwrap_or_default().to_string())
            .collect();
        let repeated_idxs = match repeated_indices_column {
            Some(name) => Some(
                df.column(name)?
                    .as_materialized_series()
                    .i64()?
                    .into_iter()
                    .map(|i| i.unwrap_or(0))
                    .collect(),
            ),
            None => None,
        };
        let values = match value_column {
            Some(name) => Some(column_items(df, name)?),
            None => None,
        };
        Ok((row_ids, repeated_idxs, values))
    }

    /// Computes a signal over a leaf column and registers the result as a
    /// new top-level column. Returns the column name. Re-invoking with the
    /// same name replaces the previous shard set.
    pub fn compute_signal_column(
        &self,
        signal: &dyn Signal,
        column: impl Into<ColumnId>,
        signal_column_name: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<String> {
        let column = column_from_identifier(column.into());
        let signal_column_name = match signal_column_name {
            Some(name) => name.to_string(),
            None => default_top_level_signal_col_name(signal, &column),
        };

        let info = self.table_info()?;
        let schema = &info.manifest.data_schema;
        let source_path = column.feature.clone();
        let leaf = schema.leaf(&source_path)?;
        let dtype = leaf.dtype().expect("leaf has a dtype");
        if !enrichment_supports_dtype(signal.enrichment_type(), dtype) {
            return Err(DatasetError::EnrichmentTypeMismatch {
                path: source_path,
                dtype: dtype.to_string(),
                signal: signal.name().to_string(),
            });
        }

        let signal_field = signal.fields(&source_path);
        let signal_schema = create_enriched_schema(schema, &source_path, &signal_field)?;

        let selection = {
            let _timer = DebugTimer::new(
                self.config.debug,
                format!("select_leafs over {}", source_path),
            );
            select_leafs(
                &info.view,
                schema,
                &source_path,
                signal.embedding_based(),
                None,
            )?
        };
        let (row_ids, repeated_idxs, values) = self.selection_columns(
            &selection.df,
            selection.value_column,
            selection.repeated_indices_column,
        )?;

        let output_iter = {
            let _timer = DebugTimer::new(
                self.config.debug,
                format!("compute \"{}\" over {}", signal.name(), source_path),
            );
            if signal.embedding_based() {
                let embedding =
                    signal
                        .embedding()
                        .ok_or_else(|| DatasetError::MissingEmbedding {
                            path: source_path.clone(),
                            reason: "embedding-based signal has no embedding identity".to_string(),
                        })?;
                let keys = Self::selection_keys(&row_ids, repeated_idxs.as_deref());
                let vector_store = self.vector_store(&source_path, embedding)?;
                signal.compute(SignalInput::Keys { keys, vector_store })?
            } else {
                let data = values.ok_or_else(|| {
                    DatasetError::internal("leaf selection produced no value column")
                })?;
                signal.compute(SignalInput::Data(data))?
            }
        };

        let estimated = row_ids.len();
        let wrapped = progress(
            output_iter,
            self.progress_reporter.as_deref(),
            task_id,
            Some(estimated),
        );
        let enriched_items =
            make_enriched_items(&source_path, &row_ids, wrapped, repeated_idxs.as_deref())?;

        let prefix = signal_parquet_prefix(&column.alias, signal.name());
        let filename = write_items_to_parquet(
            &enriched_items,
            &self.dataset_path,
            &signal_schema,
            &prefix,
            0,
            1,
        )?;

        let manifest = SignalManifest {
            files: vec![filename],
            top_level_column_name: signal_column_name.clone(),
            data_schema: signal_schema,
            signal: signal_info(signal),
            enriched_path: source_path,
        };
        let manifest_path = self
            .dataset_path
            .join(signal_manifest_filename(&column.alias, signal.name()));
        write_json_manifest(&manifest_path, &manifest)?;
        tracing::info!(path = %manifest_path.display(), "wrote signal manifest");

        self.invalidate_table_cache()?;
        Ok(signal_column_name)
    }

    /// Computes and stores the embedding index for a leaf column, keyed by
    /// the same `uuid`/`uuid_i,j` protocol used by signal enrichment.
    pub fn compute_embedding_index(
        &self,
        embedding: &dyn Embedding,
        column: impl Into<ColumnId>,
        _task_id: Option<&str>,
    ) -> Result<()> {
        let column = column_from_identifier(column.into());
        let info = self.table_info()?;
        let schema = &info.manifest.data_schema;
        let path = column.feature.clone();
        schema.leaf(&path)?;

        let selection = {
            let _timer =
                DebugTimer::new(self.config.debug, format!("select_leafs over {}", path));
            select_leafs(&info.view, schema, &path, false, None)?
        };
        let (row_ids, repeated_idxs, values) = self.selection_columns(
            &selection.df,
            selection.value_column,
            selection.repeated_indices_column,
        )?;
        let keys = Self::selection_keys(&row_ids, repeated_idxs.as_deref());
        let data = values
            .ok_or_else(|| DatasetError::internal("leaf selection produced no value column"))?;

        self.embedding_indexer
            .compute_embedding_index(&path, embedding, &keys, &data)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| DatasetError::internal("engine cache lock poisoned"))
}

fn scalar_u64(df: &DataFrame, name: &str) -> Result<u64> {
    Ok(df
        .column(name)?
        .as_materialized_series()
        .cast(&PlDataType::UInt64)?
        .u64()?
        .get(0)
        .unwrap_or(0))
}

fn scalar_f64(df: &DataFrame, name: &str) -> Result<Option<f64>> {
    Ok(df
        .column(name)?
        .as_materialized_series()
        .cast(&PlDataType::Float64)?
        .f64()?
        .get(0))
}

fn scalar_item(df: &DataFrame, name: &str) -> Result<Option<Item>> {
    let mut items = column_items(df, name)?;
    Ok(match items.pop() {
        Some(Item::Null) | None => None,
        Some(item) => Some(item),
    })
}
