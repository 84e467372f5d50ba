//! Built-in operators and their construction from pipeline configuration.

pub mod collector;
pub mod data_grid;
pub mod denormaliser;
pub mod dimension_lookup;
pub mod dummy;
pub mod group_by;
pub mod json_output;
pub mod sort_rows;

use std::sync::Arc;

use rowflow_types::StepError;

use crate::config::types::{PipelineConfig, StepConfig, StepKind};
use crate::orchestrator::{Pipeline, StepDefinition};
use crate::step::StepUnit;

pub use collector::RowCollector;
pub use data_grid::DataGridStep;
pub use denormaliser::DenormaliserStep;
pub use dimension_lookup::{DimensionLookupStep, DimensionResources};
pub use dummy::DummyStep;
pub use group_by::GroupByStep;
pub use json_output::JsonOutputStep;
pub use sort_rows::SortRowsStep;

/// Every step type known to the configuration loader, with a one-line summary.
pub const STEP_TYPES: [(&str, &str); 7] = [
    ("data_grid", "Emit rows written inline in the pipeline file"),
    ("group_by", "Aggregate consecutive rows with an equal group key"),
    ("denormaliser", "Pivot key/value rows of a group into one wide row"),
    ("dimension_lookup", "Append the surrogate id of a dimension version"),
    ("sort_rows", "Sort all rows in memory"),
    ("dummy", "Pass rows through unchanged"),
    ("json_output", "Write rows as JSON lines and pass them on"),
];

fn definition<F>(config: &StepConfig, make: F) -> StepDefinition
where
    F: Fn() -> Box<dyn StepUnit> + Send + Sync + 'static,
{
    StepDefinition::new(
        config.name.clone(),
        config.kind.type_name(),
        move |_copy: usize| -> Result<Box<dyn StepUnit>, StepError> { Ok(make()) },
    )
    .with_copies(config.copies)
    .with_distribute(config.distribute)
    .with_row_error_policy(config.on_row_error)
}

/// Build the step definition for one configured step.
#[must_use]
pub fn step_definition(config: &StepConfig) -> StepDefinition {
    match &config.kind {
        StepKind::DataGrid(grid) => {
            let grid = Arc::new(grid.clone());
            definition(config, move || Box::new(DataGridStep::new(grid.clone()))).without_input()
        }
        StepKind::GroupBy(group_by) => {
            let group_by = Arc::new(group_by.clone());
            definition(config, move || Box::new(GroupByStep::new(group_by.clone())))
        }
        StepKind::Denormaliser(denorm) => {
            let denorm = Arc::new(denorm.clone());
            definition(config, move || Box::new(DenormaliserStep::new(denorm.clone())))
        }
        StepKind::DimensionLookup(lookup) => {
            let resources = Arc::new(DimensionResources::new(lookup.clone()));
            definition(config, move || {
                Box::new(DimensionLookupStep::new(resources.clone()))
            })
        }
        StepKind::SortRows(sort) => {
            let sort = Arc::new(sort.clone());
            definition(config, move || Box::new(SortRowsStep::new(sort.clone())))
        }
        StepKind::Dummy => definition(config, || Box::new(DummyStep)),
        StepKind::JsonOutput(output) => {
            let output = Arc::new(output.clone());
            definition(config, move || Box::new(JsonOutputStep::new(output.clone())))
        }
    }
}

/// Assemble the pipeline graph described by `config`. Nothing is validated
/// or opened yet.
#[must_use]
pub fn build_pipeline(config: &PipelineConfig) -> Pipeline {
    let mut pipeline = Pipeline::new(config.pipeline.clone())
        .with_queue_capacity(config.resources.queue_capacity)
        .with_spill_dir(config.resources.spill_dir.clone());
    for step in &config.steps {
        pipeline.add_step(step_definition(step));
    }
    for hop in &config.hops {
        if hop.error {
            pipeline.add_error_hop(hop.from.clone(), hop.to.clone());
        } else {
            pipeline.add_hop(hop.from.clone(), hop.to.clone());
        }
    }
    pipeline
}
