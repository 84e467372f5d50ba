//! In-memory stable sort of the whole input.

use std::cmp::Ordering;
use std::sync::Arc;

use rowflow_types::{Row, StepError};

use crate::config::types::SortRowsConfig;
use crate::step::{StepContext, StepUnit};

pub struct SortRowsStep {
    config: Arc<SortRowsConfig>,
    rows: Vec<Row>,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl SortRowsStep {
    #[must_use]
    pub fn new(config: Arc<SortRowsConfig>) -> Self {
        Self {
            config,
            rows: Vec::new(),
            sorted: None,
        }
    }

    fn sort(&mut self, step: &str) -> Result<(), StepError> {
        let Some(first) = self.rows.first() else {
            return Ok(());
        };
        let keys = self
            .config
            .fields
            .iter()
            .map(|f| {
                first
                    .schema()
                    .index_of(&f.name)
                    .map(|p| (p, f.descending))
                    .ok_or_else(|| StepError::field_not_found(&f.name, step))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.sort_by(|a, b| {
            keys.iter().fold(Ordering::Equal, |ord, (p, descending)| {
                ord.then_with(|| {
                    let cmp = a.value(*p).compare(b.value(*p));
                    if *descending {
                        cmp.reverse()
                    } else {
                        cmp
                    }
                })
            })
        });
        Ok(())
    }
}

impl StepUnit for SortRowsStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if let Some(sorted) = self.sorted.as_mut() {
            return match sorted.next() {
                Some(row) => {
                    ctx.put_row(row)?;
                    Ok(true)
                }
                None => Ok(false),
            };
        }
        if let Some(row) = ctx.get_row() {
            self.rows.push(row);
            return Ok(true);
        }
        self.sort(ctx.step_name())?;
        tracing::debug!(step = ctx.step_name(), rows = self.rows.len(), "Sorted rows");
        self.sorted = Some(std::mem::take(&mut self.rows).into_iter());
        Ok(true)
    }
}
