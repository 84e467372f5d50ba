//! `SQLite`-backed implementation of [`DimensionStore`].
//!
//! Reads an existing dimension table. Uses a single `Mutex<Connection>` for
//! thread safety, so one store can serve every copy of a lookup step.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rowflow_types::{DimensionEntry, Value, ValueType};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use crate::backend::DimensionStore;
use crate::error::{self, StateError};

/// Accepted textual date forms, tried in order. `%.f` also matches no fraction.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Column layout of a dimension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteTableLayout {
    pub table: String,
    pub key_columns: Vec<String>,
    /// Declared type of each key column, used to type the values read back.
    pub key_types: Vec<ValueType>,
    pub id_column: String,
    /// Column holding the version start. `None` means unbounded.
    pub from_column: Option<String>,
    /// Column holding the version end. `None` means unbounded.
    pub to_column: Option<String>,
}

impl SqliteTableLayout {
    fn validate(&self) -> error::Result<()> {
        if self.key_columns.is_empty() {
            return Err(StateError::InvalidTable(format!(
                "table '{}' declares no key columns",
                self.table
            )));
        }
        if self.key_columns.len() != self.key_types.len() {
            return Err(StateError::InvalidTable(format!(
                "table '{}' declares {} key column(s) but {} key type(s)",
                self.table,
                self.key_columns.len(),
                self.key_types.len()
            )));
        }
        Ok(())
    }

    /// `SELECT id, from, to, keys... FROM table`, with `NULL` for absent bounds.
    fn select_sql(&self) -> String {
        let bound = |c: &Option<String>| c.as_deref().map_or_else(|| "NULL".to_string(), quote_ident);
        let keys: Vec<String> = self.key_columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "SELECT {}, {}, {}, {} FROM {}",
            quote_ident(&self.id_column),
            bound(&self.from_column),
            bound(&self.to_column),
            keys.join(", "),
            quote_ident(&self.table),
        )
    }

    /// Narrowing query for one natural key, plus its parameters.
    ///
    /// A predicate only excludes cells whose storage class reads back as the
    /// key's own variant, so no row that [`read_typed`] would match is lost.
    /// Keys without an exact storage form (numbers, decimals, dates,
    /// booleans) are left to the typed comparison in Rust.
    fn lookup_query(&self, natural_key: &[Value]) -> (String, Vec<SqlValue>) {
        let mut predicate = Vec::new();
        let mut params = Vec::new();
        for (column, value) in self.key_columns.iter().zip(natural_key) {
            let col = quote_ident(column);
            let storage = match value {
                Value::Null => {
                    predicate.push(format!("{col} IS NULL"));
                    continue;
                }
                Value::String(s) => {
                    params.push(SqlValue::Text(s.clone()));
                    "text"
                }
                Value::Integer(i) => {
                    params.push(SqlValue::Integer(*i));
                    "integer"
                }
                _ => continue,
            };
            // Unary plus drops column affinity so the comparison is exact.
            predicate.push(format!(
                "(typeof({col}) <> '{storage}' OR +{col} = ?{})",
                params.len()
            ));
        }
        let sql = if predicate.is_empty() {
            self.select_sql()
        } else {
            format!("{} WHERE {}", self.select_sql(), predicate.join(" AND "))
        };
        (sql, params)
    }
}

/// `SQLite`-backed dimension table reader.
///
/// Open with [`SqliteDimensionStore::open`] for an existing database file, or
/// wrap a prepared connection with [`SqliteDimensionStore::from_connection`].
pub struct SqliteDimensionStore {
    conn: Mutex<Connection>,
    layout: SqliteTableLayout,
    select_sql: String,
}

impl SqliteDimensionStore {
    /// Open the database at `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file does not exist,
    /// [`StateError::InvalidTable`] if the table description is inconsistent,
    /// or [`StateError::Sqlite`] if the table or its columns can't be read.
    pub fn open(path: &Path, layout: SqliteTableLayout) -> error::Result<Self> {
        if !path.exists() {
            return Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("dimension database not found: {}", path.display()),
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn, layout)
    }

    /// Wrap an already open connection.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteDimensionStore::open`], minus the file check.
    pub fn from_connection(conn: Connection, layout: SqliteTableLayout) -> error::Result<Self> {
        layout.validate()?;
        let select_sql = layout.select_sql();
        // Prepare once up front so a bad table or column name fails at open.
        conn.prepare(&select_sql)?;
        tracing::debug!(table = %layout.table, "Opened SQLite dimension table");
        Ok(Self {
            conn: Mutex::new(conn),
            layout,
            select_sql,
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn read_entry(&self, row: &rusqlite::Row<'_>) -> error::Result<DimensionEntry> {
        let id_ref = row.get_ref(0)?;
        let surrogate_id = match id_ref {
            ValueRef::Integer(i) => i,
            other => {
                return Err(StateError::InvalidValue {
                    column: self.layout.id_column.clone(),
                    value: describe(other),
                })
            }
        };
        let valid_from = read_date(row.get_ref(1)?, self.layout.from_column.as_deref())?;
        let valid_to = read_date(row.get_ref(2)?, self.layout.to_column.as_deref())?;
        let mut natural_key = Vec::with_capacity(self.layout.key_columns.len());
        for (i, (column, ty)) in self
            .layout
            .key_columns
            .iter()
            .zip(&self.layout.key_types)
            .enumerate()
        {
            natural_key.push(read_typed(row.get_ref(3 + i)?, *ty, column)?);
        }
        Ok(DimensionEntry::new(
            natural_key,
            surrogate_id,
            valid_from,
            valid_to,
        ))
    }

    fn query(&self, sql: &str, params: Vec<SqlValue>) -> error::Result<Vec<DimensionEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(self.read_entry(row)?);
        }
        Ok(out)
    }
}

impl DimensionStore for SqliteDimensionStore {
    fn key_arity(&self) -> usize {
        self.layout.key_columns.len()
    }

    fn lookup(&self, natural_key: &[Value]) -> error::Result<Vec<DimensionEntry>> {
        if natural_key.len() != self.key_arity() {
            return Err(StateError::KeyArity {
                expected: self.key_arity(),
                actual: natural_key.len(),
            });
        }
        // Matching goes through the same typed read-back as `load_all`, so a
        // preloaded index and per-key lookups agree on every stored form.
        let (sql, params) = self.layout.lookup_query(natural_key);
        let mut entries = self.query(&sql, params)?;
        entries.retain(|e| e.natural_key == natural_key);
        Ok(entries)
    }

    fn load_all(&self) -> error::Result<Vec<DimensionEntry>> {
        let entries = self.query(&self.select_sql, Vec::new())?;
        tracing::debug!(table = %self.layout.table, rows = entries.len(), "Loaded dimension table");
        Ok(entries)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn describe(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_date(value: ValueRef<'_>, column: Option<&str>) -> error::Result<Option<NaiveDateTime>> {
    let invalid = |value: ValueRef<'_>| StateError::InvalidValue {
        column: column.unwrap_or_default().to_string(),
        value: describe(value),
    };
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(parse_date)
            .map(Some)
            .ok_or_else(|| invalid(value)),
        // Integer dates are unix seconds.
        ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0)
            .map(|dt| Some(dt.naive_utc()))
            .ok_or_else(|| invalid(value)),
        other => Err(invalid(other)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn read_typed(value: ValueRef<'_>, ty: ValueType, column: &str) -> error::Result<Value> {
    let invalid = || StateError::InvalidValue {
        column: column.to_string(),
        value: describe(value),
    };
    let text = |t: &[u8]| std::str::from_utf8(t).map(str::to_string).map_err(|_| invalid());
    let out = match (value, ty) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), ValueType::Integer) => Value::Integer(i),
        (ValueRef::Integer(i), ValueType::Number) => Value::Number(i as f64),
        (ValueRef::Integer(i), ValueType::BigNumber) => Value::BigNumber(BigDecimal::from(i)),
        (ValueRef::Integer(i), ValueType::String) => Value::String(i.to_string()),
        (ValueRef::Integer(i), ValueType::Boolean) => Value::Boolean(i != 0),
        (ValueRef::Real(f), ValueType::Number) => Value::Number(f),
        (ValueRef::Real(f), ValueType::String) => Value::String(f.to_string()),
        (ValueRef::Real(f), ValueType::BigNumber) => {
            Value::BigNumber(BigDecimal::from_str(&f.to_string()).map_err(|_| invalid())?)
        }
        (ValueRef::Text(t), ValueType::String) => Value::String(text(t)?),
        (ValueRef::Text(t), ValueType::Integer) => {
            Value::Integer(text(t)?.trim().parse().map_err(|_| invalid())?)
        }
        (ValueRef::Text(t), ValueType::Number) => {
            Value::Number(text(t)?.trim().parse().map_err(|_| invalid())?)
        }
        (ValueRef::Text(t), ValueType::BigNumber) => {
            Value::BigNumber(BigDecimal::from_str(text(t)?.trim()).map_err(|_| invalid())?)
        }
        (ValueRef::Text(t), ValueType::Boolean) => match text(t)?.trim() {
            "true" | "TRUE" | "Y" | "1" => Value::Boolean(true),
            "false" | "FALSE" | "N" | "0" => Value::Boolean(false),
            _ => return Err(invalid()),
        },
        (ValueRef::Text(_) | ValueRef::Integer(_), ValueType::Date) => {
            read_date(value, Some(column))?.map_or(Value::Null, Value::Date)
        }
        _ => return Err(invalid()),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn layout() -> SqliteTableLayout {
        SqliteTableLayout {
            table: "dim_customer".into(),
            key_columns: vec!["customer_code".into(), "region".into()],
            key_types: vec![ValueType::String, ValueType::Integer],
            id_column: "customer_tk".into(),
            from_column: Some("date_from".into()),
            to_column: Some("date_to".into()),
        }
    }

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r"
            CREATE TABLE dim_customer (
                customer_tk INTEGER PRIMARY KEY,
                customer_code TEXT,
                region INTEGER,
                date_from TEXT,
                date_to TEXT
            );
            INSERT INTO dim_customer VALUES (1, 'c1', 10, NULL, '2024-03-10 00:00:00');
            INSERT INTO dim_customer VALUES (2, 'c1', 10, '2024-03-10 00:00:00', NULL);
            INSERT INTO dim_customer VALUES (3, 'c2', 20, '2024-01-01T00:00:00', '2025-01-01');
            INSERT INTO dim_customer VALUES (4, NULL, 30, NULL, NULL);
            ",
        )
        .unwrap();
        conn
    }

    fn store() -> SqliteDimensionStore {
        SqliteDimensionStore::from_connection(seeded_connection(), layout()).unwrap()
    }

    #[test]
    fn lookup_returns_every_version_of_key() {
        let s = store();
        let mut found = s
            .lookup(&[Value::from("c1"), Value::Integer(10)])
            .unwrap();
        found.sort_by_key(|e| e.surrogate_id);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].valid_from, None);
        assert_eq!(found[0].valid_to, Some(day(2024, 3, 10)));
        assert_eq!(found[1].valid_from, Some(day(2024, 3, 10)));
        assert_eq!(found[1].valid_to, None);
        assert_eq!(
            found[0].natural_key,
            vec![Value::from("c1"), Value::Integer(10)]
        );
    }

    #[test]
    fn accepts_iso_and_date_only_forms() {
        let s = store();
        let found = s
            .lookup(&[Value::from("c2"), Value::Integer(20)])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].valid_from, Some(day(2024, 1, 1)));
        assert_eq!(found[0].valid_to, Some(day(2025, 1, 1)));
    }

    #[test]
    fn null_key_matches_null_column() {
        let s = store();
        let found = s.lookup(&[Value::Null, Value::Integer(30)]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].surrogate_id, 4);
    }

    #[test]
    fn unknown_key_is_empty() {
        let s = store();
        assert!(s
            .lookup(&[Value::from("nope"), Value::Integer(1)])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn integer_key_matches_text_stored_number() {
        let conn = seeded_connection();
        conn.execute(
            "INSERT INTO dim_customer VALUES (6, 'c6', ' 60 ', NULL, NULL)",
            [],
        )
        .unwrap();
        let s = SqliteDimensionStore::from_connection(conn, layout()).unwrap();
        let found = s.lookup(&[Value::from("c6"), Value::Integer(60)]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].surrogate_id, 6);
    }

    #[test]
    fn decimal_key_ignores_stored_scale() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE rates (sk INTEGER, rate TEXT);
             INSERT INTO rates VALUES (1, '1.50');
             INSERT INTO rates VALUES (2, '2.5');",
        )
        .unwrap();
        let layout = SqliteTableLayout {
            table: "rates".into(),
            key_columns: vec!["rate".into()],
            key_types: vec![ValueType::BigNumber],
            id_column: "sk".into(),
            from_column: None,
            to_column: None,
        };
        let s = SqliteDimensionStore::from_connection(conn, layout).unwrap();
        let found = s.lookup(&[Value::big_number("1.5").unwrap()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].surrogate_id, 1);
    }

    #[test]
    fn load_all_reads_whole_table() {
        assert_eq!(store().load_all().unwrap().len(), 4);
    }

    #[test]
    fn absent_date_columns_are_unbounded() {
        let mut layout = layout();
        layout.from_column = None;
        layout.to_column = None;
        let s = SqliteDimensionStore::from_connection(seeded_connection(), layout).unwrap();
        let all = s.load_all().unwrap();
        assert!(all
            .iter()
            .all(|e| e.valid_from.is_none() && e.valid_to.is_none()));
    }

    #[test]
    fn bad_column_fails_at_open() {
        let mut layout = layout();
        layout.id_column = "missing_tk".into();
        let err = SqliteDimensionStore::from_connection(seeded_connection(), layout)
            .err()
            .unwrap();
        assert!(matches!(err, StateError::Sqlite(_)));
    }

    #[test]
    fn mismatched_key_types_rejected() {
        let mut layout = layout();
        layout.key_types.pop();
        let err = SqliteDimensionStore::from_connection(seeded_connection(), layout)
            .err()
            .unwrap();
        assert!(matches!(err, StateError::InvalidTable(_)));
    }

    #[test]
    fn unreadable_date_is_reported() {
        let conn = seeded_connection();
        conn.execute(
            "INSERT INTO dim_customer VALUES (5, 'c5', 50, 'yesterday', NULL)",
            [],
        )
        .unwrap();
        let s = SqliteDimensionStore::from_connection(conn, layout()).unwrap();
        let err = s
            .lookup(&[Value::from("c5"), Value::Integer(50)])
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidValue { .. }));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteDimensionStore::open(&dir.path().join("absent.db"), layout())
            .err()
            .unwrap();
        assert!(matches!(err, StateError::Io(_)));
    }

    #[test]
    fn open_reads_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dim.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE dim_customer (customer_tk INTEGER, customer_code TEXT, region INTEGER, date_from TEXT, date_to TEXT);
                 INSERT INTO dim_customer VALUES (9, 'c9', 1, NULL, NULL);",
            )
            .unwrap();
        }
        let s = SqliteDimensionStore::open(&path, layout()).unwrap();
        let found = s.lookup(&[Value::from("c9"), Value::Integer(1)]).unwrap();
        assert_eq!(found[0].surrogate_id, 9);
    }
}
