//! The shared transaction scope of one connection.
//!
//! Every mapper writing through the same connection holds the same
//! [`TransactionContext`]; the [`TransactionRegistry`] hands them out keyed by
//! connection identity. The first write opens the transaction, later writes
//! join it, and `flush`/`rollback` close it.

use relmodel_core::{Connection, Result};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Lifecycle of a connection's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction is open.
    Idle,
    /// A transaction is open and shared by every writer.
    Open,
}

/// One logical transaction per connection.
pub struct TransactionContext {
    connection: Rc<dyn Connection>,
    state: Cell<TransactionState>,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("connection", &connection_identity(&self.connection))
            .field("state", &self.state.get())
            .finish()
    }
}

impl TransactionContext {
    /// Create an idle context for `connection`.
    pub fn new(connection: Rc<dyn Connection>) -> Self {
        Self {
            connection,
            state: Cell::new(TransactionState::Idle),
        }
    }

    /// The connection this context controls.
    pub fn connection(&self) -> &Rc<dyn Connection> {
        &self.connection
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Is a transaction open?
    pub fn is_open(&self) -> bool {
        self.state.get() == TransactionState::Open
    }

    /// Open the transaction unless it is already open.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&self) -> Result<()> {
        if self.is_open() {
            tracing::trace!("Joining open transaction");
            return Ok(());
        }
        self.connection.begin_transaction()?;
        self.state.set(TransactionState::Open);
        tracing::debug!("Transaction opened");
        Ok(())
    }

    /// Commit the transaction if one is open.
    ///
    /// Returns whether a commit was issued.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        self.connection.commit_transaction()?;
        self.state.set(TransactionState::Idle);
        tracing::debug!("Transaction committed");
        Ok(true)
    }

    /// Roll the transaction back if one is open.
    ///
    /// Returns whether a rollback was issued.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&self) -> Result<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        // Idle even if the rollback itself fails.
        self.state.set(TransactionState::Idle);
        self.connection.rollback_transaction()?;
        tracing::debug!("Transaction rolled back");
        Ok(true)
    }
}

fn connection_identity(connection: &Rc<dyn Connection>) -> usize {
    Rc::as_ptr(connection).cast::<()>() as usize
}

/// Hands out one [`TransactionContext`] per connection identity.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    contexts: HashMap<usize, Rc<TransactionContext>>,
}

impl TransactionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The context of `connection`, created on first use.
    pub fn context_for(&mut self, connection: &Rc<dyn Connection>) -> Rc<TransactionContext> {
        Rc::clone(
            self.contexts
                .entry(connection_identity(connection))
                .or_insert_with(|| Rc::new(TransactionContext::new(Rc::clone(connection)))),
        )
    }

    /// All contexts, in no particular order.
    pub fn contexts(&self) -> impl Iterator<Item = &Rc<TransactionContext>> {
        self.contexts.values()
    }

    /// Number of distinct connections.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True if no connection was registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{Row, Value};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<&'static str>>,
    }

    impl Connection for Recorder {
        fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn begin_transaction(&self) -> Result<()> {
            self.calls.borrow_mut().push("begin");
            Ok(())
        }

        fn commit_transaction(&self) -> Result<()> {
            self.calls.borrow_mut().push("commit");
            Ok(())
        }

        fn rollback_transaction(&self) -> Result<()> {
            self.calls.borrow_mut().push("rollback");
            Ok(())
        }

        fn last_inserted_id(&self, _sequence: Option<&str>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_begin_is_idempotent() {
        let recorder = Rc::new(Recorder::default());
        let ctx = TransactionContext::new(recorder.clone());
        ctx.begin().unwrap();
        ctx.begin().unwrap();
        assert!(ctx.is_open());
        assert_eq!(*recorder.calls.borrow(), vec!["begin"]);
    }

    #[test]
    fn test_commit_and_rollback_only_when_open() {
        let recorder = Rc::new(Recorder::default());
        let ctx = TransactionContext::new(recorder.clone());
        assert!(!ctx.commit().unwrap());
        assert!(!ctx.rollback().unwrap());

        ctx.begin().unwrap();
        assert!(ctx.commit().unwrap());
        assert_eq!(ctx.state(), TransactionState::Idle);

        ctx.begin().unwrap();
        assert!(ctx.rollback().unwrap());
        assert_eq!(
            *recorder.calls.borrow(),
            vec!["begin", "commit", "begin", "rollback"]
        );
    }

    #[test]
    fn test_registry_shares_context_per_connection() {
        let a: Rc<dyn Connection> = Rc::new(Recorder::default());
        let b: Rc<dyn Connection> = Rc::new(Recorder::default());
        let mut registry = TransactionRegistry::new();

        let first = registry.context_for(&a);
        let again = registry.context_for(&Rc::clone(&a));
        let other = registry.context_for(&b);

        assert!(Rc::ptr_eq(&first, &again));
        assert!(!Rc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);

        first.begin().unwrap();
        assert!(again.is_open());
        assert!(!other.is_open());
    }
}
