//! Error types for relmodel operations.
//!
//! Storage failures raised by a [`Connection`](crate::Connection) pass
//! through unchanged as [`Error::Connection`] or [`Error::Query`]; everything
//! else is detected by relmodel itself.

use std::fmt;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all relmodel operations.
#[derive(Debug)]
pub enum Error {
    /// The storage could not be reached
    Connection(ConnectionError),
    /// The storage rejected a statement
    Query(QueryError),
    /// A value did not have the expected type
    Type(TypeError),
    /// The storage refused a transaction command
    Transaction(TransactionError),
    /// Entity or relationship metadata is inconsistent
    Schema(SchemaError),
    /// A relationship expected a row the storage did not return
    Integrity(IntegrityError),
    /// Unsupported input handed to an API (wrong source type, unknown property)
    InvalidInput(String),
    /// Anything else a collaborator wants to report
    Custom(String),
}

/// Failure to reach the storage.
#[derive(Debug)]
pub struct ConnectionError {
    pub message: String,
    pub source: Option<BoxedSource>,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the driver error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A statement the storage rejected.
#[derive(Debug)]
pub struct QueryError {
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<BoxedSource>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Record the offending statement.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach the driver error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxedSource>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub message: String,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity kind referenced but never registered
    UnknownEntity,
    /// Property referenced but not declared on the entity
    UnknownProperty,
    /// Reverse side does not match the declared relationship
    ReverseMismatch,
    /// Invalid entity or relationship definition
    Invalid,
}

/// A relationship expected a row that the storage no longer returned.
#[derive(Debug, Clone)]
pub struct IntegrityError {
    /// Table the missing row was expected in
    pub table: String,
    /// Internal key of the missing row
    pub key: String,
    /// Relationship property being resolved
    pub relationship: String,
}

impl Error {
    /// Build a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// The statement that failed, if the storage reported one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Did the error come from the storage collaborator?
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Query(_) | Error::Transaction(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {e}"),
            Error::Query(e) => write!(f, "Query error: {e}"),
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Integrity(e) => write!(f, "Integrity error: {e}"),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            _ => None,
        };
        source.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} [{}]", self.message, sql),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.actual)?;
        if let Some(column) = &self.column {
            write!(f, " in column '{column}'")?;
        }
        Ok(())
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row '{}' of table '{}' vanished while resolving '{}'",
            self.key, self.table, self.relationship
        )
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<IntegrityError> for Error {
    fn from(err: IntegrityError) -> Self {
        Error::Integrity(err)
    }
}

/// Result type alias for relmodel operations.
pub type Result<T> = std::result::Result<T, Error>;
