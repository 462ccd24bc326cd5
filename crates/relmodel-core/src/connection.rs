//! The storage collaborator.
//!
//! relmodel does not talk to a database itself. Everything it needs from the
//! relational store goes through [`Connection`]: a thin synchronous interface
//! that executes parameterized SQL and controls one transaction at a time.
//!
//! Statements use `?` placeholders, bound positionally from `params`.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A synchronous connection to a transactional relational store.
///
/// Implementations are used from a single thread; concurrent use of one
/// connection must be serialized by the caller.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query("SELECT * FROM \"books\" WHERE \"id\" = ?", &[Value::BigInt(1)])?;
///
/// conn.begin_transaction()?;
/// conn.execute("DELETE FROM \"books\" WHERE \"id\" = ?", &[Value::BigInt(1)])?;
/// conn.commit_transaction()?;
/// ```
pub trait Connection {
    /// Execute a statement and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    ///
    /// The default implementation runs the statement through [`query`](Connection::query)
    /// and reports the number of returned rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.query(sql, params).map(|rows| rows.len() as u64)
    }

    /// Open a transaction.
    fn begin_transaction(&self) -> Result<()>;

    /// Commit the open transaction.
    fn commit_transaction(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback_transaction(&self) -> Result<()>;

    /// Identity generated by the last INSERT, optionally read from a sequence.
    fn last_inserted_id(&self, sequence: Option<&str>) -> Result<Value>;
}

impl<C: Connection + ?Sized> Connection for std::rc::Rc<C> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn begin_transaction(&self) -> Result<()> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&self) -> Result<()> {
        (**self).commit_transaction()
    }

    fn rollback_transaction(&self) -> Result<()> {
        (**self).rollback_transaction()
    }

    fn last_inserted_id(&self, sequence: Option<&str>) -> Result<Value> {
        (**self).last_inserted_id(sequence)
    }
}
