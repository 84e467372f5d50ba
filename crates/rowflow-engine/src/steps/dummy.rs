//! Pass-through step: forwards every input row unchanged.

use rowflow_types::StepError;

use crate::step::{StepContext, StepUnit};

#[derive(Debug, Default)]
pub struct DummyStep;

impl StepUnit for DummyStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        match ctx.get_row() {
            Some(row) => {
                ctx.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
