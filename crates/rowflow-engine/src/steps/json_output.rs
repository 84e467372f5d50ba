//! Sink writing one JSON object per row, then passing the row on.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use rowflow_types::{Row, StepError};

use crate::config::types::JsonOutputConfig;
use crate::step::{StepContext, StepUnit};

pub struct JsonOutputStep {
    config: Arc<JsonOutputConfig>,
    writer: Option<BufWriter<Box<dyn Write + Send>>>,
}

fn write_error(err: &std::io::Error) -> StepError {
    StepError::io("WRITE_FAILED", err.to_string())
}

impl JsonOutputStep {
    #[must_use]
    pub fn new(config: Arc<JsonOutputConfig>) -> Self {
        Self {
            config,
            writer: None,
        }
    }

    fn write_row(&mut self, row: &Row) -> Result<(), StepError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(StepError::internal("NOT_INITIALIZED", "output not opened"));
        };
        let object: serde_json::Map<String, serde_json::Value> = row
            .schema()
            .fields()
            .iter()
            .zip(row.values())
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect();
        serde_json::to_writer(&mut *writer, &object)
            .map_err(|e| StepError::io("WRITE_FAILED", e.to_string()))?;
        writer.write_all(b"\n").map_err(|e| write_error(&e))
    }
}

impl StepUnit for JsonOutputStep {
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        let sink: Box<dyn Write + Send> = match &self.config.path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(self.config.append)
                    .truncate(!self.config.append)
                    .open(path)
                    .map_err(|e| {
                        StepError::io(
                            "OPEN_FAILED",
                            format!("cannot open {}: {e}", path.display()),
                        )
                    })?;
                Box::new(file)
            }
            None => Box::new(std::io::stdout()),
        };
        self.writer = Some(BufWriter::new(sink));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row() else {
            if let Some(writer) = self.writer.as_mut() {
                writer.flush().map_err(|e| write_error(&e))?;
            }
            return Ok(false);
        };
        self.write_row(&row)?;
        ctx.put_row(row)?;
        Ok(true)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                tracing::warn!(step = ctx.step_name(), "Failed to flush JSON output: {}", err);
            }
        }
    }
}
