//! Statement execution helpers
//!
//! These helpers own the prepare / bind / execute / release cycle of a single
//! statement. Parameters are supplied through a prepare callback that fills a
//! [`Binder`]; results are handed to a processing callback. Statements and
//! cursors are released when the helper returns, on every exit path.
//!
//! The helpers are available on any raw [`rusqlite::Connection`] through
//! [`StatementExt`], so upgrade and transaction callbacks can use them on the
//! connection they receive.

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{Connection, Rows, Statement, ToSql};
use tracing::debug;

use crate::database::core::transaction::run_in_transaction;
use crate::error::{DbError, Result};

/// Prepare callback that binds nothing, running the statement as written
pub fn no_params(_: &mut Binder) -> Result<()> {
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Index(i) => write!(f, "#{}", i),
            Slot::Name(n) => write!(f, "{}", n),
        }
    }
}

/// Parameter values collected by a prepare callback
///
/// Positional indexes are 1-based. Values are captured when set, so the
/// binder holds no borrow of the caller's data. For batch updates, each call
/// to [`Binder::add_batch`] snapshots the current values as one parameter
/// set; values stay in place afterwards until overwritten or cleared.
#[derive(Debug, Default, Clone)]
pub struct Binder {
    current: Vec<(Slot, Value)>,
    batch: Vec<Vec<(Slot, Value)>>,
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to the 1-based positional parameter `index`
    pub fn set<T: ToSql>(&mut self, index: usize, value: T) -> Result<()> {
        if index == 0 {
            return Err(DbError::InvalidParameter(
                "parameter indexes start at 1".to_string(),
            ));
        }
        let value = to_value(&value)?;
        self.put(Slot::Index(index), value);
        Ok(())
    }

    /// Bind `value` to a named parameter
    ///
    /// The name may include its prefix (`:id`, `@id`, `$id`); without one,
    /// `:` is assumed.
    pub fn set_named<T: ToSql>(&mut self, name: &str, value: T) -> Result<()> {
        if name.is_empty() {
            return Err(DbError::InvalidParameter(
                "parameter name is empty".to_string(),
            ));
        }
        let name = if name.starts_with([':', '@', '$']) {
            name.to_string()
        } else {
            format!(":{}", name)
        };
        let value = to_value(&value)?;
        self.put(Slot::Name(name), value);
        Ok(())
    }

    pub fn set_null(&mut self, index: usize) -> Result<()> {
        self.set(index, Value::Null)
    }

    /// Bind a whole row of positional parameters, starting at index 1
    pub fn set_all(&mut self, values: &[&dyn ToSql]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.set(i + 1, value)?;
        }
        Ok(())
    }

    /// Drop all current values (queued batch sets are kept)
    pub fn clear(&mut self) {
        self.current.clear();
    }

    /// Queue the current values as one parameter set of a batch
    pub fn add_batch(&mut self) {
        self.batch.push(self.current.clone());
    }

    /// Number of queued batch parameter sets
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    fn put(&mut self, slot: Slot, value: Value) {
        match self.current.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = value,
            None => self.current.push((slot, value)),
        }
    }

    fn apply(&self, stmt: &mut Statement<'_>) -> Result<()> {
        bind_slots(stmt, &self.current)
    }
}

fn to_value<T: ToSql>(value: &T) -> Result<Value> {
    let output = value
        .to_sql()
        .map_err(|e| DbError::InvalidParameter(e.to_string()))?;
    match output {
        ToSqlOutput::Borrowed(v) => Ok(v.into()),
        ToSqlOutput::Owned(v) => Ok(v),
        #[allow(unreachable_patterns)]
        _ => Err(DbError::InvalidParameter(
            "unsupported parameter value kind".to_string(),
        )),
    }
}

fn bind_slots(stmt: &mut Statement<'_>, slots: &[(Slot, Value)]) -> Result<()> {
    for (slot, value) in slots {
        let index = match slot {
            Slot::Index(i) => *i,
            Slot::Name(name) => stmt
                .parameter_index(name)
                .map_err(|e| DbError::sqlite("Failed to look up parameter", e))?
                .ok_or_else(|| {
                    DbError::InvalidParameter(format!("unknown parameter name '{}'", name))
                })?,
        };
        stmt.raw_bind_parameter(index, value)
            .map_err(|e| DbError::sqlite(format!("Failed to bind parameter {}", slot), e))?;
    }
    Ok(())
}

fn reset_bindings(stmt: &mut Statement<'_>) -> Result<()> {
    for index in 1..=stmt.parameter_count() {
        stmt.raw_bind_parameter(index, Value::Null)
            .map_err(|e| DbError::sqlite("Failed to reset parameters", e))?;
    }
    Ok(())
}

fn prepare<'c>(conn: &'c Connection, sql: &str) -> Result<Statement<'c>> {
    conn.prepare(sql)
        .map_err(|e| DbError::sqlite(format!("Failed to prepare '{}'", sql), e))
}

/// Whether `sql` starts with an `INSERT` or `REPLACE` keyword
fn is_insert(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}

/// Keys produced by an insert
///
/// When the statement carries a `RETURNING` clause, these are the values of
/// its first column, one per affected row. Otherwise, for an `INSERT` or
/// `REPLACE` that wrote rows, the engine-assigned rowid of the last inserted
/// row is reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedKeys {
    values: Vec<Value>,
}

impl GeneratedKeys {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First key, if it is an integer
    pub fn first_id(&self) -> Option<i64> {
        match self.values.first() {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        }
    }

    /// All integer keys, in order
    pub fn ids(&self) -> Vec<i64> {
        self.values
            .iter()
            .filter_map(|v| match v {
                Value::Integer(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// Statement helpers on a caller-supplied connection
pub trait StatementExt {
    /// Run a query and hand the cursor to `process`
    ///
    /// No transaction is started; the statement runs in whatever commit mode
    /// the connection is in.
    fn query_with<T, P, R>(&self, sql: &str, prepare: P, process: R) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        R: FnOnce(&mut Rows<'_>) -> Result<T>;

    /// Run an update and return the affected-row count
    fn update_with<P>(&self, sql: &str, prepare: P) -> Result<usize>
    where
        P: FnOnce(&mut Binder) -> Result<()>;

    /// Run an insert or update in its own transaction and hand the row count
    /// and generated keys to `process`
    fn update_with_keys<T, P, K>(&self, sql: &str, prepare: P, process: K) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        K: FnOnce(usize, &GeneratedKeys) -> Result<T>;

    /// Run one statement for each parameter set queued with
    /// [`Binder::add_batch`], all in one transaction
    fn batch_update<P>(&self, sql: &str, prepare: P) -> Result<Vec<usize>>
    where
        P: FnOnce(&mut Binder) -> Result<()>;

    /// Run `work` inside a transaction, committing on success
    fn transaction_with<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>;
}

impl StatementExt for Connection {
    fn query_with<T, P, R>(&self, sql: &str, prepare_fn: P, process: R) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        R: FnOnce(&mut Rows<'_>) -> Result<T>,
    {
        let mut stmt = prepare(self, sql)?;
        let mut binder = Binder::new();
        prepare_fn(&mut binder)?;
        binder.apply(&mut stmt)?;

        let mut rows = stmt.raw_query();
        process(&mut rows)
    }

    fn update_with<P>(&self, sql: &str, prepare_fn: P) -> Result<usize>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        let mut stmt = prepare(self, sql)?;
        let mut binder = Binder::new();
        prepare_fn(&mut binder)?;
        binder.apply(&mut stmt)?;

        stmt.raw_execute()
            .map_err(|e| DbError::sqlite("Failed to execute update", e))
    }

    fn update_with_keys<T, P, K>(&self, sql: &str, prepare_fn: P, process: K) -> Result<T>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
        K: FnOnce(usize, &GeneratedKeys) -> Result<T>,
    {
        run_in_transaction(self, |conn| {
            let mut stmt = prepare(conn, sql)?;
            let mut binder = Binder::new();
            prepare_fn(&mut binder)?;
            binder.apply(&mut stmt)?;

            let (count, values) = if stmt.column_count() > 0 {
                let mut rows = stmt.raw_query();
                let mut values = Vec::new();
                while let Some(row) = rows
                    .next()
                    .map_err(|e| DbError::sqlite("Failed to execute update", e))?
                {
                    values.push(row.get::<_, Value>(0)?);
                }
                (values.len(), values)
            } else {
                let count = stmt
                    .raw_execute()
                    .map_err(|e| DbError::sqlite("Failed to execute update", e))?;
                // the engine's last rowid is connection-wide, so only trust it
                // right after an insert that wrote something
                let values = if count > 0 && is_insert(sql) {
                    vec![Value::Integer(conn.last_insert_rowid())]
                } else {
                    Vec::new()
                };
                (count, values)
            };

            process(count, &GeneratedKeys { values })
        })
    }

    fn batch_update<P>(&self, sql: &str, prepare_fn: P) -> Result<Vec<usize>>
    where
        P: FnOnce(&mut Binder) -> Result<()>,
    {
        run_in_transaction(self, |conn| {
            let mut stmt = prepare(conn, sql)?;
            let mut binder = Binder::new();
            prepare_fn(&mut binder)?;
            debug!("Executing batch of {} parameter sets", binder.batch_len());

            let mut counts = Vec::with_capacity(binder.batch_len());
            for (i, set) in binder.batch.iter().enumerate() {
                reset_bindings(&mut stmt)?;
                bind_slots(&mut stmt, set)?;
                let count = stmt.raw_execute().map_err(|e| {
                    DbError::sqlite(format!("Batch parameter set {} failed", i + 1), e)
                })?;
                counts.push(count);
            }
            Ok(counts)
        })
    }

    fn transaction_with<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        run_in_transaction(self, work)
    }
}
