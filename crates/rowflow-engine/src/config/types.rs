//! Pipeline YAML model.

use std::path::PathBuf;

use rowflow_types::{RowErrorPolicy, ValueType};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationKind;
use crate::convert::ConversionFormat;
use crate::dimension::CacheMode;
use crate::rowset::DEFAULT_QUEUE_CAPACITY;
use crate::spill::DEFAULT_SPILL_THRESHOLD;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Rows each queue holds before the producer blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Directory for group-by spill files. Defaults to the system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_dir: Option<PathBuf>,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            spill_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(default = "default_copies")]
    pub copies: usize,
    /// Round-robin rows over the copies of each target step instead of
    /// copying them to every copy.
    #[serde(default = "default_true")]
    pub distribute: bool,
    #[serde(default)]
    pub on_row_error: RowErrorPolicy,
    #[serde(flatten)]
    pub kind: StepKind,
}

fn default_copies() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    DataGrid(DataGridConfig),
    GroupBy(GroupByConfig),
    Denormaliser(DenormaliserConfig),
    DimensionLookup(DimensionLookupConfig),
    SortRows(SortRowsConfig),
    Dummy,
    JsonOutput(JsonOutputConfig),
}

impl StepKind {
    /// The `type` tag as written in YAML.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DataGrid(_) => "data_grid",
            Self::GroupBy(_) => "group_by",
            Self::Denormaliser(_) => "denormaliser",
            Self::DimensionLookup(_) => "dimension_lookup",
            Self::SortRows(_) => "sort_rows",
            Self::Dummy => "dummy",
            Self::JsonOutput(_) => "json_output",
        }
    }
}

/// A typed field, optionally with a text format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(flatten)]
    pub format: ConversionFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGridConfig {
    pub fields: Vec<FieldConfig>,
    /// Cells are YAML scalars converted to the field types.
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupByConfig {
    #[serde(default)]
    pub group: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<AggregateConfig>,
    /// Re-emit every input row with the group's aggregates appended.
    #[serde(default)]
    pub pass_all_rows: bool,
    /// Rows per group held in memory before spilling to disk.
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold: usize,
    /// Emit one row for empty input when there are no group fields.
    #[serde(default)]
    pub always_emit: bool,
}

fn default_spill_threshold() -> usize {
    DEFAULT_SPILL_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub kind: AggregationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenormaliserConfig {
    pub key_field: String,
    #[serde(default)]
    pub group: Vec<String>,
    pub targets: Vec<DenormaliserTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenormaliserTarget {
    pub value_field: String,
    /// Key field content selecting this target.
    pub key_value: String,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(flatten)]
    pub format: ConversionFormat,
    #[serde(default = "default_target_aggregation")]
    pub aggregation: AggregationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

fn default_target_aggregation() -> AggregationKind {
    AggregationKind::Overwrite
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionLookupConfig {
    /// Stream fields, in the order of the store's key columns.
    pub key_fields: Vec<String>,
    /// Date field selecting the version; the run start time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of_field: Option<String>,
    /// Output field receiving the surrogate id.
    pub id_field: String,
    #[serde(default)]
    pub not_found_id: i64,
    #[serde(default)]
    pub cache: CacheMode,
    /// Most natural keys a lazy cache keeps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,
    pub store: DimensionStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionStoreConfig {
    Sqlite {
        path: PathBuf,
        table: String,
        key_columns: Vec<String>,
        key_types: Vec<ValueType>,
        id_column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_column: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_column: Option<String>,
    },
    Inline {
        key_types: Vec<ValueType>,
        #[serde(default)]
        rows: Vec<InlineDimensionRow>,
    },
}

impl DimensionStoreConfig {
    #[must_use]
    pub fn key_types(&self) -> &[ValueType] {
        match self {
            Self::Sqlite { key_types, .. } | Self::Inline { key_types, .. } => key_types,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineDimensionRow {
    pub key: Vec<serde_json::Value>,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortRowsConfig {
    pub fields: Vec<SortField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonOutputConfig {
    /// Output file; standard output when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub append: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub from: String,
    pub to: String,
    /// Carries rejected rows of `from` instead of its normal output.
    #[serde(default)]
    pub error: bool,
}
