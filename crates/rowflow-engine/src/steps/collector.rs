//! Sink that keeps every row in memory, for embedding and tests.

use std::sync::{Arc, Mutex, PoisonError};

use rowflow_types::{Row, StepError};

use crate::step::{StepContext, StepFactory, StepUnit};

/// Shared handle to the rows gathered by all copies of a collector step.
#[derive(Debug, Clone, Default)]
pub struct RowCollector {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl RowCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose units append to this collector.
    #[must_use]
    pub fn factory(&self) -> Arc<dyn StepFactory> {
        let rows = self.rows.clone();
        Arc::new(move |_copy: usize| -> Result<Box<dyn StepUnit>, StepError> {
            Ok(Box::new(CollectorStep { rows: rows.clone() }))
        })
    }

    /// Snapshot of the rows collected so far, in arrival order.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CollectorStep {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl StepUnit for CollectorStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row() else {
            return Ok(false);
        };
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row.clone());
        ctx.put_row(row)?;
        Ok(true)
    }
}
