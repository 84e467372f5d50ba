//! Bounded in-memory row buffer with an overflow temp file.
//!
//! [`GroupBuffer`] keeps up to `threshold` rows in memory. When the memory
//! buffer fills, its rows are appended to a temp file as JSON lines and the
//! buffer is cleared. [`GroupBuffer::drain`] replays the file, then the
//! memory rows, so the original order is kept.
//!
//! One temp file serves the buffer for its whole lifetime. It is created at
//! the first spill, truncated after every drain and deleted when the buffer
//! is dropped.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};

use std::path::{Path, PathBuf};

use bigdecimal::BigDecimal;
use chrono::DateTime;
use rowflow_types::{Row, SchemaRef, StepError, Value};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Rows kept in memory before the first spill, per group.
pub const DEFAULT_SPILL_THRESHOLD: usize = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum SpillError {
    #[error("spill file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("spill record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("spill record holds an unreadable value: {0}")]
    Corrupt(String),
}

impl From<SpillError> for StepError {
    fn from(err: SpillError) -> Self {
        StepError::io("SPILL_FAILED", err.to_string())
    }
}

/// On-disk form of a [`Value`]. Floats keep their bit pattern so NaN and
/// infinities survive the JSON round trip.
#[derive(Debug, Serialize, Deserialize)]
enum SpillValue {
    Null,
    String(String),
    Integer(i64),
    Number(u64),
    BigNumber(String),
    Date { secs: i64, nanos: u32 },
    Boolean(bool),
}

impl From<&Value> for SpillValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::String(s) => Self::String(s.clone()),
            Value::Integer(i) => Self::Integer(*i),
            Value::Number(f) => Self::Number(f.to_bits()),
            Value::BigNumber(d) => Self::BigNumber(d.to_string()),
            Value::Date(d) => {
                let utc = d.and_utc();
                Self::Date {
                    secs: utc.timestamp(),
                    nanos: utc.timestamp_subsec_nanos(),
                }
            }
            Value::Boolean(b) => Self::Boolean(*b),
        }
    }
}

impl TryFrom<SpillValue> for Value {
    type Error = SpillError;

    fn try_from(value: SpillValue) -> Result<Self, Self::Error> {
        Ok(match value {
            SpillValue::Null => Value::Null,
            SpillValue::String(s) => Value::String(s),
            SpillValue::Integer(i) => Value::Integer(i),
            SpillValue::Number(bits) => Value::Number(f64::from_bits(bits)),
            SpillValue::BigNumber(s) => s
                .parse::<BigDecimal>()
                .map(Value::BigNumber)
                .map_err(|_| SpillError::Corrupt(s))?,
            SpillValue::Date { secs, nanos } => DateTime::from_timestamp(secs, nanos)
                .map(|dt| Value::Date(dt.naive_utc()))
                .ok_or_else(|| SpillError::Corrupt(format!("date {secs}.{nanos}")))?,
            SpillValue::Boolean(b) => Value::Boolean(b),
        })
    }
}

struct SpillFile {
    file: NamedTempFile,
    writer: BufWriter<File>,
}

/// Ordered row buffer for one group, overflowing to disk.
pub struct GroupBuffer {
    threshold: usize,
    dir: Option<PathBuf>,
    memory: Vec<Row>,
    spill: Option<SpillFile>,
    spilled_rows: usize,
    spilled_schema: Option<SchemaRef>,
    spill_count: u64,
}

impl GroupBuffer {
    /// `threshold` is clamped to at least one row.
    #[must_use]
    pub fn new(threshold: usize, dir: Option<&Path>) -> Self {
        Self {
            threshold: threshold.max(1),
            dir: dir.map(Path::to_path_buf),
            memory: Vec::new(),
            spill: None,
            spilled_rows: 0,
            spilled_schema: None,
            spill_count: 0,
        }
    }

    /// Rows held, in memory and on disk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len() + self.spilled_rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows of the current group written to disk.
    #[must_use]
    pub fn spilled_rows(&self) -> usize {
        self.spilled_rows
    }

    /// Number of times the memory buffer was flushed to disk, over all groups.
    #[must_use]
    pub fn spill_count(&self) -> u64 {
        self.spill_count
    }

    /// Path of the temp file, once one exists.
    #[must_use]
    pub fn spill_path(&self) -> Option<&Path> {
        self.spill.as_ref().map(|s| s.file.path())
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// Returns [`SpillError`] if flushing to disk fails.
    pub fn push(&mut self, row: Row) -> Result<(), SpillError> {
        self.memory.push(row);
        if self.memory.len() >= self.threshold {
            self.flush_memory()?;
        }
        Ok(())
    }

    fn flush_memory(&mut self) -> Result<(), SpillError> {
        if self.spill.is_none() {
            let file = match &self.dir {
                Some(dir) => tempfile::Builder::new()
                    .prefix("rowflow-group-")
                    .tempfile_in(dir)?,
                None => tempfile::Builder::new().prefix("rowflow-group-").tempfile()?,
            };
            let writer = BufWriter::new(file.reopen()?);
            tracing::debug!(path = %file.path().display(), "Created group spill file");
            self.spill = Some(SpillFile { file, writer });
        }
        let Some(spill) = self.spill.as_mut() else {
            return Ok(());
        };
        for row in self.memory.drain(..) {
            let record: Vec<SpillValue> = row.values().iter().map(SpillValue::from).collect();
            serde_json::to_writer(&mut spill.writer, &record)?;
            spill.writer.write_all(b"\n")?;
            if self.spilled_schema.is_none() {
                self.spilled_schema = Some(row.schema().clone());
            }
            self.spilled_rows += 1;
        }
        self.spill_count += 1;
        Ok(())
    }

    /// Hand every buffered row to `emit` in insertion order, then reset the
    /// buffer for the next group.
    ///
    /// # Errors
    ///
    /// Returns the first error from reading the spill file or from `emit`.
    pub fn drain<E, F>(&mut self, mut emit: F) -> Result<(), E>
    where
        E: From<SpillError>,
        F: FnMut(Row) -> Result<(), E>,
    {
        if self.spilled_rows > 0 {
            let schema = self
                .spilled_schema
                .take()
                .ok_or_else(|| SpillError::Corrupt("missing spill schema".into()))?;
            let spill = self
                .spill
                .as_mut()
                .ok_or_else(|| SpillError::Corrupt("missing spill file".into()))?;
            spill.writer.flush().map_err(SpillError::from)?;
            let reader = BufReader::new(spill.file.reopen().map_err(SpillError::from)?);
            let mut records =
                serde_json::Deserializer::from_reader(reader).into_iter::<Vec<SpillValue>>();
            for _ in 0..self.spilled_rows {
                let record = records
                    .next()
                    .ok_or_else(|| SpillError::Corrupt("spill file ended early".into()))?
                    .map_err(SpillError::from)?;
                let values = record
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                emit(Row::new(schema.clone(), values))?;
            }
            self.spilled_rows = 0;
            spill.file.as_file().set_len(0).map_err(SpillError::from)?;
            spill
                .writer
                .seek(SeekFrom::Start(0))
                .map_err(SpillError::from)?;
        }
        for row in std::mem::take(&mut self.memory) {
            emit(row)?;
        }
        Ok(())
    }

    /// Drop buffered rows and delete the temp file.
    pub fn discard(&mut self) {
        self.memory.clear();
        self.spilled_rows = 0;
        self.spilled_schema = None;
        if let Some(spill) = self.spill.take() {
            let path = spill.file.path().to_path_buf();
            drop(spill.writer);
            if let Err(err) = spill.file.close() {
                tracing::warn!(path = %path.display(), "Failed to delete spill file: {}", err);
            }
        }
    }
}

impl Drop for GroupBuffer {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rowflow_types::{FieldMeta, RowSchema, ValueType};

    fn schema() -> SchemaRef {
        RowSchema::new(vec![
            FieldMeta::new("n", ValueType::Integer),
            FieldMeta::new("label", ValueType::String),
            FieldMeta::new("at", ValueType::Date),
            FieldMeta::new("amount", ValueType::BigNumber),
        ])
        .into_ref()
    }

    fn row(schema: &SchemaRef, n: i64) -> Row {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_nano_opt(0, 0, 0, 123_456_789)
            .unwrap();
        Row::new(
            schema.clone(),
            vec![
                Value::Integer(n),
                if n % 3 == 0 { Value::Null } else { Value::from(format!("r{n}")) },
                Value::Date(at),
                Value::big_number("12345678901234567890.123").unwrap(),
            ],
        )
    }

    fn drain_all(buffer: &mut GroupBuffer) -> Vec<Row> {
        let mut out = Vec::new();
        buffer
            .drain(|r| -> Result<(), SpillError> {
                out.push(r);
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn below_threshold_stays_in_memory() {
        let s = schema();
        let mut buffer = GroupBuffer::new(10, None);
        for n in 0..5 {
            buffer.push(row(&s, n)).unwrap();
        }
        assert!(buffer.spill_path().is_none());
        let rows = drain_all(&mut buffer);
        assert_eq!(rows.len(), 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn spilled_rows_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema();
        let mut buffer = GroupBuffer::new(4, Some(dir.path()));
        let input: Vec<Row> = (0..11).map(|n| row(&s, n)).collect();
        for r in input.clone() {
            buffer.push(r).unwrap();
        }
        assert_eq!(buffer.spilled_rows(), 8);
        assert_eq!(buffer.len(), 11);
        assert!(buffer.spill_path().unwrap().starts_with(dir.path()));
        let output = drain_all(&mut buffer);
        assert_eq!(output, input);
    }

    #[test]
    fn file_is_reused_across_groups_and_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let s = schema();
        let mut buffer = GroupBuffer::new(2, Some(dir.path()));
        for n in 0..5 {
            buffer.push(row(&s, n)).unwrap();
        }
        let path = buffer.spill_path().unwrap().to_path_buf();
        assert_eq!(drain_all(&mut buffer).len(), 5);

        for n in 10..13 {
            buffer.push(row(&s, n)).unwrap();
        }
        assert_eq!(buffer.spill_path().unwrap(), path.as_path());
        let second: Vec<i64> = drain_all(&mut buffer)
            .iter()
            .map(|r| r.value(0).as_i64().unwrap())
            .collect();
        assert_eq!(second, vec![10, 11, 12]);

        drop(buffer);
        assert!(!path.exists());
    }

    #[test]
    fn non_finite_numbers_survive_spill() {
        let s = RowSchema::new(vec![FieldMeta::new("x", ValueType::Number)]).into_ref();
        let mut buffer = GroupBuffer::new(1, None);
        for x in [f64::NAN, f64::INFINITY, -0.5] {
            buffer.push(Row::new(s.clone(), vec![Value::Number(x)])).unwrap();
        }
        let values: Vec<f64> = drain_all(&mut buffer)
            .iter()
            .map(|r| r.value(0).as_f64().unwrap())
            .collect();
        assert!(values[0].is_nan());
        assert_eq!(values[1], f64::INFINITY);
        assert_eq!(values[2], -0.5);
    }

    #[test]
    fn discard_deletes_spill_file() {
        let s = schema();
        let mut buffer = GroupBuffer::new(1, None);
        buffer.push(row(&s, 1)).unwrap();
        let path = buffer.spill_path().unwrap().to_path_buf();
        assert!(path.exists());
        buffer.discard();
        assert!(!path.exists());
        assert!(buffer.is_empty());
    }

    #[test]
    fn missing_spill_dir_is_an_io_error() {
        let s = schema();
        let mut buffer = GroupBuffer::new(1, Some(Path::new("/nonexistent/rowflow-spill")));
        let err = buffer.push(row(&s, 1)).unwrap_err();
        assert!(matches!(err, SpillError::Io(_)));
    }
}
