//! Semantic validation for parsed pipeline configuration values.
//!
//! Topology rules (hop endpoints, cycles, error hops) are checked by
//! [`Pipeline::validate`](crate::orchestrator::Pipeline::validate) once the
//! steps are built; this module covers the per-step settings.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::aggregate::AggregationKind;
use crate::config::types::{
    DataGridConfig, DenormaliserConfig, DimensionLookupConfig, DimensionStoreConfig,
    GroupByConfig, PipelineConfig, SortRowsConfig, StepKind,
};

fn check_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
    what: &str,
    context: &str,
    errors: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            errors.push(format!("{context}: {what} names must not be empty"));
        } else if !seen.insert(name) {
            errors.push(format!("{context}: duplicate {what} '{name}'"));
        }
    }
}

fn validate_data_grid(grid: &DataGridConfig, context: &str, errors: &mut Vec<String>) {
    if grid.fields.is_empty() {
        errors.push(format!("{context}: data_grid must define at least one field"));
    }
    check_names(grid.fields.iter().map(|f| f.name.as_str()), "field", context, errors);
    for (i, row) in grid.rows.iter().enumerate() {
        if row.len() != grid.fields.len() {
            errors.push(format!(
                "{context}: row {i} has {} value(s), expected {}",
                row.len(),
                grid.fields.len()
            ));
        }
    }
}

fn validate_group_by(group_by: &GroupByConfig, context: &str, errors: &mut Vec<String>) {
    check_names(group_by.group.iter().map(String::as_str), "group field", context, errors);
    check_names(
        group_by.aggregates.iter().map(|a| a.name.as_str()),
        "aggregate",
        context,
        errors,
    );
    for agg in &group_by.aggregates {
        if agg.subject.is_none() && !agg.kind.subject_optional() {
            errors.push(format!(
                "{context}: aggregate '{}' ({}) requires a subject field",
                agg.name, agg.kind
            ));
        }
        if agg.separator.is_some() && agg.kind != AggregationKind::Concat {
            errors.push(format!(
                "{context}: aggregate '{}' sets a separator but is not a concat",
                agg.name
            ));
        }
    }
    if group_by.pass_all_rows && group_by.spill_threshold == 0 {
        errors.push(format!("{context}: spill_threshold must be at least 1"));
    }
    if group_by.always_emit && !group_by.group.is_empty() {
        errors.push(format!(
            "{context}: always_emit only applies without group fields"
        ));
    }
}

fn validate_denormaliser(denorm: &DenormaliserConfig, context: &str, errors: &mut Vec<String>) {
    if denorm.key_field.trim().is_empty() {
        errors.push(format!("{context}: key_field must not be empty"));
    }
    if denorm.targets.is_empty() {
        errors.push(format!("{context}: denormaliser must define at least one target"));
    }
    check_names(denorm.group.iter().map(String::as_str), "group field", context, errors);
    check_names(denorm.targets.iter().map(|t| t.name.as_str()), "target", context, errors);
    for target in &denorm.targets {
        if target.value_field.trim().is_empty() {
            errors.push(format!(
                "{context}: target '{}' has an empty value_field",
                target.name
            ));
        }
        if (target.aggregation.needs_numeric() && !target.value_type.is_numeric())
            || !target.aggregation.fits_target(target.value_type)
        {
            errors.push(format!(
                "{context}: target '{}' uses {} but has type {}",
                target.name, target.aggregation, target.value_type
            ));
        }
        if denorm.group.contains(&target.name) {
            errors.push(format!(
                "{context}: target '{}' clashes with a group field",
                target.name
            ));
        }
    }
}

fn validate_dimension_lookup(
    lookup: &DimensionLookupConfig,
    context: &str,
    errors: &mut Vec<String>,
) {
    if lookup.key_fields.is_empty() {
        errors.push(format!("{context}: key_fields must not be empty"));
    }
    if lookup.id_field.trim().is_empty() {
        errors.push(format!("{context}: id_field must not be empty"));
    }
    let key_types = lookup.store.key_types().len();
    if key_types != lookup.key_fields.len() {
        errors.push(format!(
            "{context}: {} key field(s) but the store declares {key_types} key type(s)",
            lookup.key_fields.len()
        ));
    }
    if lookup.cache_size == Some(0) {
        errors.push(format!("{context}: cache_size must be at least 1"));
    }
    match &lookup.store {
        DimensionStoreConfig::Sqlite {
            table,
            key_columns,
            id_column,
            ..
        } => {
            if table.trim().is_empty() || id_column.trim().is_empty() {
                errors.push(format!("{context}: sqlite store needs a table and an id_column"));
            }
            if key_columns.len() != key_types {
                errors.push(format!(
                    "{context}: {} key column(s) but {key_types} key type(s)",
                    key_columns.len()
                ));
            }
        }
        DimensionStoreConfig::Inline { rows, .. } => {
            for (i, row) in rows.iter().enumerate() {
                if row.key.len() != key_types {
                    errors.push(format!(
                        "{context}: dimension row {i} has {} key value(s), expected {key_types}",
                        row.key.len()
                    ));
                }
            }
        }
    }
}

fn validate_sort_rows(sort: &SortRowsConfig, context: &str, errors: &mut Vec<String>) {
    if sort.fields.is_empty() {
        errors.push(format!("{context}: sort_rows must define at least one field"));
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.resources.queue_capacity == 0 {
        errors.push("queue_capacity must be at least 1".to_string());
    }

    for step in &config.steps {
        let context = format!("step '{}'", step.name);
        match &step.kind {
            StepKind::DataGrid(grid) => validate_data_grid(grid, &context, &mut errors),
            StepKind::GroupBy(group_by) => validate_group_by(group_by, &context, &mut errors),
            StepKind::Denormaliser(denorm) => {
                validate_denormaliser(denorm, &context, &mut errors);
            }
            StepKind::DimensionLookup(lookup) => {
                validate_dimension_lookup(lookup, &context, &mut errors);
            }
            StepKind::SortRows(sort) => validate_sort_rows(sort, &context, &mut errors),
            StepKind::JsonOutput(output) => {
                if output.path.is_some() && step.copies > 1 {
                    errors.push(format!(
                        "{context}: json_output with a path cannot run {} copies",
                        step.copies
                    ));
                }
            }
            StepKind::Dummy => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
