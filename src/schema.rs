use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use polars::prelude::{
    DataType as PlDataType, Field as PlField, Schema as PlSchema, TimeUnit,
};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// Name of the row-identifier column present in every shard.
pub const UUID_COLUMN: &str = "uuid";

/// Path segment denoting "each element of the repeated parent".
pub const PATH_WILDCARD: &str = "*";

/// Names of the start/end attributes of a `string_span` value.
pub const SPAN_START_FEATURE: &str = "start";
pub const SPAN_END_FEATURE: &str = "end";

/// Primitive dtypes a leaf may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[serde(rename = "boolean")]
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    StringSpan,
    Datetime,
    Binary,
}

impl DataType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Uint8
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Ordinal dtypes support exact min/max statistics.
    pub fn is_ordinal(self) -> bool {
        self.is_numeric() || self == DataType::Datetime
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "boolean",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::StringSpan => "string_span",
            DataType::Datetime => "datetime",
            DataType::Binary => "binary",
        };
        write!(f, "{}", name)
    }
}

/// A path through the schema. Segments are field names or the `*` wildcard.
///
/// Converts from dotted strings (`"a.b.*.c"`), single names, and segment
/// vectors; a single name never splits on anything but dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<String>);

impl Path {
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|p| is_repeated_path_part(p))
    }

    pub fn wildcard_count(&self) -> usize {
        self.0.iter().filter(|p| is_repeated_path_part(p)).count()
    }

    /// Dotted rendition, used for aliases and directory names.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path(s.split('.').map(str::to_string).collect())
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Path::from(s.as_str())
    }
}

impl From<Vec<String>> for Path {
    fn from(parts: Vec<String>) -> Self {
        Path(parts)
    }
}

impl From<&[&str]> for Path {
    fn from(parts: &[&str]) -> Self {
        Path(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(parts: [&str; N]) -> Self {
        Path(parts.iter().map(|p| p.to_string()).collect())
    }
}

/// Normalizes a dotted string, single name, or segment sequence to a [`Path`].
pub fn normalize_path(path: impl Into<Path>) -> Path {
    path.into()
}

pub fn is_repeated_path_part(part: &str) -> bool {
    part == PATH_WILDCARD
}

/// A node in the schema tree: exactly one of a struct, a repeated group, or
/// a dtype-carrying leaf. Ambiguous nodes are rejected at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Struct(IndexMap<String, Field>),
    Repeated(Box<Field>),
    Leaf(DataType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct Field {
    pub kind: FieldKind,
    /// For `string_span` leaves: the sibling text path the span indexes into.
    /// A weak reference, validated against the schema at manifest load.
    pub refers_to: Option<Path>,
}

impl Field {
    pub fn structure(fields: impl IntoIterator<Item = (String, Field)>) -> Field {
        Field {
            kind: FieldKind::Struct(fields.into_iter().collect()),
            refers_to: None,
        }
    }

    pub fn repeated(inner: Field) -> Field {
        Field {
            kind: FieldKind::Repeated(Box::new(inner)),
            refers_to: None,
        }
    }

    pub fn leaf(dtype: DataType) -> Field {
        Field {
            kind: FieldKind::Leaf(dtype),
            refers_to: None,
        }
    }

    pub fn span(refers_to: impl Into<Path>) -> Field {
        Field {
            kind: FieldKind::Leaf(DataType::StringSpan),
            refers_to: Some(refers_to.into()),
        }
    }

    pub fn dtype(&self) -> Option<DataType> {
        match self.kind {
            FieldKind::Leaf(dtype) => Some(dtype),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&IndexMap<String, Field>> {
        match &self.kind {
            FieldKind::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn repeated_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::Repeated(inner) => Some(inner),
            _ => None,
        }
    }

    fn collect_leafs(&self, prefix: &mut Vec<String>, out: &mut IndexMap<Path, Field>) {
        match &self.kind {
            FieldKind::Leaf(_) => {
                out.insert(Path(prefix.clone()), self.clone());
            }
            FieldKind::Struct(fields) => {
                for (name, child) in fields {
                    prefix.push(name.clone());
                    child.collect_leafs(prefix, out);
                    prefix.pop();
                }
            }
            FieldKind::Repeated(inner) => {
                prefix.push(PATH_WILDCARD.to_string());
                inner.collect_leafs(prefix, out);
                prefix.pop();
            }
        }
    }
}

/// Permissive wire form of [`Field`]; converted with exactly-one-of checks.
#[derive(Serialize, Deserialize)]
struct RawField {
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<IndexMap<String, RawField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeated_field: Option<Box<RawField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dtype: Option<DataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refers_to: Option<Path>,
}

impl TryFrom<RawField> for Field {
    type Error = String;

    fn try_from(raw: RawField) -> Result<Field, String> {
        let kind = match (raw.fields, raw.repeated_field, raw.dtype) {
            (Some(fields), None, None) => {
                let mut out = IndexMap::with_capacity(fields.len());
                for (name, child) in fields {
                    out.insert(name, Field::try_from(child)?);
                }
                FieldKind::Struct(out)
            }
            (None, Some(inner), None) => FieldKind::Repeated(Box::new(Field::try_from(*inner)?)),
            (None, None, Some(dtype)) => FieldKind::Leaf(dtype),
            _ => {
                return Err(
                    "field must have exactly one of `fields`, `repeated_field`, `dtype`"
                        .to_string(),
                )
            }
        };
        if raw.refers_to.is_some() && kind != FieldKind::Leaf(DataType::StringSpan) {
            return Err("`refers_to` is only valid on string_span leaves".to_string());
        }
        Ok(Field {
            kind,
            refers_to: raw.refers_to,
        })
    }
}

impl From<Field> for RawField {
    fn from(field: Field) -> RawField {
        let mut raw = RawField {
            fields: None,
            repeated_field: None,
            dtype: None,
            refers_to: field.refers_to,
        };
        match field.kind {
            FieldKind::Struct(fields) => {
                raw.fields = Some(
                    fields
                        .into_iter()
                        .map(|(name, child)| (name, RawField::from(child)))
                        .collect(),
                );
            }
            FieldKind::Repeated(inner) => {
                raw.repeated_field = Some(Box::new(RawField::from(*inner)));
            }
            FieldKind::Leaf(dtype) => raw.dtype = Some(dtype),
        }
        raw
    }
}

/// An ordered mapping of top-level names to fields, with the derived leaf
/// map computed once on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub fields: IndexMap<String, Field>,
    #[serde(skip)]
    leafs: OnceLock<IndexMap<Path, Field>>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = (String, Field)>) -> Schema {
        Schema {
            fields: fields.into_iter().collect(),
            leafs: OnceLock::new(),
        }
    }

    /// All leaf paths and their fields, in schema order. Repeated groups
    /// contribute a `*` segment to every descendant leaf path.
    pub fn leafs(&self) -> &IndexMap<Path, Field> {
        self.leafs.get_or_init(|| {
            let mut out = IndexMap::new();
            let mut prefix = Vec::new();
            for (name, field) in &self.fields {
                prefix.push(name.clone());
                field.collect_leafs(&mut prefix, &mut out);
                prefix.pop();
            }
            out
        })
    }

    /// Resolves a path against the tree, or `None` when any segment is
    /// missing or mismatched (e.g. a name where a wildcard is required).
    pub fn resolve(&self, path: &Path) -> Option<&Field> {
        let mut parts = path.parts().iter();
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = match &current.kind {
                FieldKind::Struct(fields) => fields.get(part)?,
                FieldKind::Repeated(inner) if is_repeated_path_part(part) => inner,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Looks up a leaf field, distinguishing unresolvable paths from paths
    /// that resolve to a non-leaf node.
    pub fn leaf(&self, path: &Path) -> Result<&Field> {
        match self.resolve(path) {
            Some(field) if field.dtype().is_some() => Ok(field),
            Some(_) => Err(DatasetError::PathNotLeaf(path.clone())),
            None => Err(DatasetError::PathNotInSchema(path.clone())),
        }
    }

    /// Checks every `string_span` leaf's `refers_to`: it must name an
    /// existing wildcard-free string leaf.
    pub fn validate(&self) -> Result<()> {
        for (path, field) in self.leafs() {
            if field.dtype() != Some(DataType::StringSpan) {
                continue;
            }
            let refers_to = field.refers_to.as_ref().ok_or_else(|| {
                DatasetError::internal(format!("span leaf {} has no refers_to", path))
            })?;
            if refers_to.has_wildcard() {
                return Err(DatasetError::UnsupportedSpanShape {
                    path: path.clone(),
                    reason: format!("refers_to {} contains a repeated segment", refers_to),
                });
            }
            match self.resolve(refers_to) {
                Some(target) if target.dtype() == Some(DataType::String) => {}
                Some(_) => {
                    return Err(DatasetError::UnsupportedSpanShape {
                        path: path.clone(),
                        reason: format!("refers_to {} is not a string leaf", refers_to),
                    })
                }
                None => return Err(DatasetError::PathNotInSchema(refers_to.clone())),
            }
        }
        Ok(())
    }

    /// The columnar engine's rendition of this schema.
    pub fn to_polars(&self) -> PlSchema {
        PlSchema::from_iter(
            self.fields
                .iter()
                .map(|(name, field)| PlField::new(name.as_str().into(), field_to_polars(field))),
        )
    }
}

/// Maps a schema field to the engine dtype. Spans become `{start, end}`
/// structs; datetimes use microsecond precision.
pub fn field_to_polars(field: &Field) -> PlDataType {
    match &field.kind {
        FieldKind::Struct(fields) => PlDataType::Struct(
            fields
                .iter()
                .map(|(name, child)| PlField::new(name.as_str().into(), field_to_polars(child)))
                .collect(),
        ),
        FieldKind::Repeated(inner) => PlDataType::List(Box::new(field_to_polars(inner))),
        FieldKind::Leaf(dtype) => dtype_to_polars(*dtype),
    }
}

pub fn dtype_to_polars(dtype: DataType) -> PlDataType {
    match dtype {
        DataType::Bool => PlDataType::Boolean,
        DataType::Int8 => PlDataType::Int8,
        DataType::Int16 => PlDataType::Int16,
        DataType::Int32 => PlDataType::Int32,
        DataType::Int64 => PlDataType::Int64,
        DataType::Uint8 => PlDataType::UInt8,
        DataType::Uint16 => PlDataType::UInt16,
        DataType::Uint32 => PlDataType::UInt32,
        DataType::Uint64 => PlDataType::UInt64,
        DataType::Float32 => PlDataType::Float32,
        DataType::Float64 => PlDataType::Float64,
        DataType::String => PlDataType::String,
        DataType::StringSpan => PlDataType::Struct(vec![
            PlField::new(SPAN_START_FEATURE.into(), PlDataType::Int64),
            PlField::new(SPAN_END_FEATURE.into(), PlDataType::Int64),
        ]),
        DataType::Datetime => PlDataType::Datetime(TimeUnit::Microseconds, None),
        DataType::Binary => PlDataType::Binary,
    }
}
