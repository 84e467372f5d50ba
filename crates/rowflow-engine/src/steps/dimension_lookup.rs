//! Surrogate key lookup against a slowly changing dimension.
//!
//! Appends the surrogate id of the dimension version valid at the row's
//! as-of date (or the run start time) to every row.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;
use rowflow_state::{
    DimensionStore, InMemoryDimensionStore, SqliteDimensionStore, SqliteTableLayout, StateError,
};
use rowflow_types::{DimensionEntry, FieldMeta, Row, SchemaRef, StepError, Value, ValueType};

use crate::config::types::{DimensionLookupConfig, DimensionStoreConfig, InlineDimensionRow};
use crate::convert::{convert_value, json_to_value, ConversionFormat};
use crate::dimension::{CacheMode, DimensionCache, PreloadedIndex};
use crate::step::{StepContext, StepUnit};

fn store_error(err: &StateError) -> StepError {
    StepError::lookup("DIMENSION_STORE", err.to_string())
}

fn inline_entry(row: &InlineDimensionRow, key_types: &[ValueType]) -> Result<DimensionEntry, StepError> {
    let format = ConversionFormat::default();
    let key = row
        .key
        .iter()
        .zip(key_types)
        .map(|(cell, ty)| {
            json_to_value(cell)
                .and_then(|v| convert_value(&v, *ty, &format).ok())
                .ok_or_else(|| {
                    StepError::config(
                        "INVALID_DIMENSION_ROW",
                        format!("dimension row {}: key {cell} is not a valid {ty}", row.id),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let date = |text: &Option<String>| -> Result<Option<NaiveDateTime>, StepError> {
        let Some(text) = text else {
            return Ok(None);
        };
        convert_value(&Value::from(text.as_str()), ValueType::Date, &format)
            .ok()
            .and_then(|v| v.as_date())
            .map(Some)
            .ok_or_else(|| {
                StepError::config(
                    "INVALID_DIMENSION_ROW",
                    format!("dimension row {}: '{text}' is not a date", row.id),
                )
            })
    };
    Ok(DimensionEntry::new(key, row.id, date(&row.from)?, date(&row.to)?))
}

/// Open the store described by `config`.
///
/// # Errors
///
/// Returns a lookup error if the database cannot be opened, or a config
/// error for malformed inline rows.
pub fn open_store(config: &DimensionStoreConfig) -> Result<Arc<dyn DimensionStore>, StepError> {
    match config {
        DimensionStoreConfig::Sqlite {
            path,
            table,
            key_columns,
            key_types,
            id_column,
            from_column,
            to_column,
        } => {
            let layout = SqliteTableLayout {
                table: table.clone(),
                key_columns: key_columns.clone(),
                key_types: key_types.clone(),
                id_column: id_column.clone(),
                from_column: from_column.clone(),
                to_column: to_column.clone(),
            };
            let store = SqliteDimensionStore::open(path, layout).map_err(|e| store_error(&e))?;
            Ok(Arc::new(store))
        }
        DimensionStoreConfig::Inline { key_types, rows } => {
            let entries = rows
                .iter()
                .map(|row| inline_entry(row, key_types))
                .collect::<Result<Vec<_>, _>>()?;
            let store =
                InMemoryDimensionStore::new(key_types.len(), entries).map_err(|e| store_error(&e))?;
            Ok(Arc::new(store))
        }
    }
}

/// Store and preloaded index shared by every copy of one lookup step.
///
/// Both are created on first use, so checking a pipeline never touches the
/// dimension table.
pub struct DimensionResources {
    config: Arc<DimensionLookupConfig>,
    store: Mutex<Option<Arc<dyn DimensionStore>>>,
    index: Mutex<Option<Arc<PreloadedIndex>>>,
}

impl DimensionResources {
    #[must_use]
    pub fn new(config: DimensionLookupConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Mutex::new(None),
            index: Mutex::new(None),
        }
    }

    /// Use an already open store instead of the configured one.
    #[must_use]
    pub fn with_store(config: DimensionLookupConfig, store: Arc<dyn DimensionStore>) -> Self {
        Self {
            config: Arc::new(config),
            store: Mutex::new(Some(store)),
            index: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DimensionLookupConfig {
        &self.config
    }

    fn store(&self) -> Result<Arc<dyn DimensionStore>, StepError> {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = guard.as_ref() {
            return Ok(store.clone());
        }
        let store = open_store(&self.config.store)?;
        if store.key_arity() != self.config.key_fields.len() {
            return Err(StepError::config(
                "KEY_ARITY",
                format!(
                    "{} key field(s) for a dimension with {} key column(s)",
                    self.config.key_fields.len(),
                    store.key_arity()
                ),
            ));
        }
        *guard = Some(store.clone());
        Ok(store)
    }

    /// The preloaded index, loading it on the first call.
    fn index(&self) -> Result<Arc<PreloadedIndex>, StepError> {
        let mut guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = guard.as_ref() {
            return Ok(index.clone());
        }
        let store = self.store()?;
        let index = Arc::new(PreloadedIndex::load(store.as_ref()).map_err(|e| store_error(&e))?);
        tracing::info!(
            versions = index.len(),
            keys = index.key_count(),
            "Preloaded dimension cache"
        );
        *guard = Some(index.clone());
        Ok(index)
    }

    fn cache(&self) -> Result<DimensionCache, StepError> {
        Ok(match self.config.cache {
            CacheMode::Lazy => {
                DimensionCache::lazy(self.store()?, self.config.not_found_id, self.config.cache_size)
            }
            CacheMode::Preloaded => DimensionCache::preloaded(self.index()?, self.config.not_found_id),
        })
    }
}

struct Layout {
    keys: Vec<usize>,
    as_of: Option<usize>,
    output: SchemaRef,
}

pub struct DimensionLookupStep {
    resources: Arc<DimensionResources>,
    cache: Option<DimensionCache>,
    layout: Option<Layout>,
    key_format: ConversionFormat,
}

impl DimensionLookupStep {
    #[must_use]
    pub fn new(resources: Arc<DimensionResources>) -> Self {
        Self {
            resources,
            cache: None,
            layout: None,
            key_format: ConversionFormat::default(),
        }
    }

    fn resolve(&self, row: &Row, step: &str) -> Result<Layout, StepError> {
        let config = self.resources.config();
        let schema = row.schema();
        let position = |name: &str| {
            schema
                .index_of(name)
                .ok_or_else(|| StepError::field_not_found(name, step))
        };
        let keys = config
            .key_fields
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<_>, _>>()?;
        let as_of = config.as_of_field.as_deref().map(position).transpose()?;
        let output = schema
            .extended([FieldMeta::new(config.id_field.clone(), ValueType::Integer)])
            .into_ref();
        Ok(Layout { keys, as_of, output })
    }

    /// Natural key coerced to the store's key types.
    fn natural_key(&self, row: &Row, layout: &Layout) -> Result<Vec<Value>, StepError> {
        let key_types = self.resources.config().store.key_types();
        layout
            .keys
            .iter()
            .zip(key_types)
            .zip(&self.resources.config().key_fields)
            .map(|((p, ty), name)| {
                convert_value(row.value(*p), *ty, &self.key_format).map_err(|e| {
                    StepError::data("KEY_CONVERSION", e.to_string()).with_field(name.clone())
                })
            })
            .collect()
    }

    fn as_of(&self, row: &Row, layout: &Layout, run_started: NaiveDateTime) -> Result<NaiveDateTime, StepError> {
        let Some(p) = layout.as_of else {
            return Ok(run_started);
        };
        match convert_value(row.value(p), ValueType::Date, &self.key_format) {
            Ok(Value::Date(d)) => Ok(d),
            Ok(_) => Ok(run_started),
            Err(e) => {
                let field = self.resources.config().as_of_field.clone().unwrap_or_default();
                Err(StepError::data("AS_OF_CONVERSION", e.to_string()).with_field(field))
            }
        }
    }
}

impl StepUnit for DimensionLookupStep {
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        self.cache = Some(self.resources.cache()?);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row() else {
            return Ok(false);
        };
        if self.layout.is_none() {
            self.layout = Some(self.resolve(&row, ctx.step_name())?);
        }
        let Some(layout) = self.layout.as_ref() else {
            return Ok(true);
        };

        let lookup = self
            .natural_key(&row, layout)
            .and_then(|key| Ok((key, self.as_of(&row, layout, ctx.run_started())?)));
        let (key, as_of) = match lookup {
            Ok(found) => found,
            Err(err) => {
                ctx.put_error(row, err)?;
                return Ok(true);
            }
        };

        let output = layout.output.clone();
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| StepError::internal("NOT_INITIALIZED", "dimension cache missing"))?;
        let id = cache.lookup(&key, as_of).map_err(|e| store_error(&e))?;

        let mut values = row.into_values();
        values.push(Value::Integer(id));
        ctx.put_row(Row::new(output, values))?;
        Ok(true)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if let Some(cache) = &self.cache {
            let (found, not_found) = cache.stats();
            tracing::debug!(
                step = ctx.step_name(),
                copy = ctx.copy(),
                mode = %cache.mode(),
                found,
                not_found,
                store_calls = cache.store_calls(),
                "Dimension lookup finished"
            );
        }
    }
}
