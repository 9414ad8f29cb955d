use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic, ReadExecutor};

/// Error kinds for monazite operations.
///
/// Each kind describes a specific category of failure so callers can
/// match on the outcome of a query or persistence operation.
///
/// # Examples
///
/// ```rust,ignore
/// use monazite::errors::{MonaziteError, ErrorKind, MonaziteResult};
///
/// fn example() -> MonaziteResult<()> {
///     Err(MonaziteError::new("no criteria to load with", ErrorKind::MissingCriteria))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Query building errors
    /// A shorthand query string could not be parsed
    InvalidQuery,
    /// A query or cursor option was mutated after execution started
    CursorAlreadyStarted,

    // Entity lifecycle errors
    /// A load was attempted with no resolvable criteria
    MissingCriteria,
    /// An insert was attempted with no changed fields
    EmptyInsert,
    /// The server reported a failed insert
    InsertFailed,
    /// The server reported a failed update
    UpdateFailed,
    /// The server reported a failed remove
    RemoveFailed,
    /// The server reported a failed upsert
    UpsertFailed,

    /// The provided identifier is invalid
    InvalidId,

    // Field and reference errors
    /// A non-entity value was assigned to a declared reference field
    ReferenceTypeError,
    /// The requested operation has no matching underlying capability
    UnsupportedOperation,
    /// The operation is not valid in the current context
    InvalidOperation,
    /// The requested resource was not found
    NotFound,

    // Collaborator errors
    /// Error reported by the backing driver
    DriverError,

    // Generic/Internal errors - used as fallback
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidQuery => write!(f, "Invalid query"),
            ErrorKind::CursorAlreadyStarted => write!(f, "Cursor already started"),
            ErrorKind::MissingCriteria => write!(f, "Missing criteria"),
            ErrorKind::EmptyInsert => write!(f, "Empty insert"),
            ErrorKind::InsertFailed => write!(f, "Insert failed"),
            ErrorKind::UpdateFailed => write!(f, "Update failed"),
            ErrorKind::RemoveFailed => write!(f, "Remove failed"),
            ErrorKind::UpsertFailed => write!(f, "Upsert failed"),
            ErrorKind::InvalidId => write!(f, "Invalid ID"),
            ErrorKind::ReferenceTypeError => write!(f, "Reference type error"),
            ErrorKind::UnsupportedOperation => write!(f, "Unsupported operation"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::DriverError => write!(f, "Driver error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom monazite error type.
///
/// `MonaziteError` encapsulates the error message, kind, and optional cause.
/// It supports error chaining and backtraces for debugging.
///
/// # Examples
///
/// ```rust,ignore
/// use monazite::errors::{MonaziteError, ErrorKind};
///
/// // Create a simple error
/// let err = MonaziteError::new("no document matched", ErrorKind::NotFound);
///
/// // Create an error with a cause
/// let cause = MonaziteError::new("connection dropped", ErrorKind::DriverError);
/// let err = MonaziteError::new_with_cause("update failed", ErrorKind::UpdateFailed, cause);
/// ```
#[derive(Clone)]
pub struct MonaziteError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<MonaziteError>>,
    backtrace: Atomic<Backtrace>,
}

impl MonaziteError {
    /// Creates a new `MonaziteError` with the specified message and error kind.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    ///
    /// # Returns
    ///
    /// A new `MonaziteError` instance.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        MonaziteError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `MonaziteError` with a cause error.
    ///
    /// This creates an error chain where the cause error is preserved for debugging.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    /// * `cause` - The underlying error that caused this error
    ///
    /// # Returns
    ///
    /// A new `MonaziteError` instance with the cause error attached.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: MonaziteError) -> Self {
        MonaziteError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&Box<MonaziteError>> {
        self.cause.as_ref()
    }

    /// Returns a copy of this error with additional context appended to
    /// the message, preserving kind and cause chain.
    ///
    /// Used on the query path to attach the rendered query text to
    /// failures raised during cursor instantiation.
    pub fn with_context(self, context: &str) -> Self {
        MonaziteError {
            message: format!("{} [{}]", self.message, context),
            error_kind: self.error_kind.clone(),
            cause: Some(Box::new(self)),
            backtrace: atomic(Backtrace::new()),
        }
    }
}

impl Display for MonaziteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for MonaziteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => self.backtrace.read_with(|bt| write!(f, "{}\n{:?}", self.message, bt)),
        }
    }
}

impl Error for MonaziteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for monazite operations.
///
/// `MonaziteResult<T>` is shorthand for `Result<T, MonaziteError>`.
/// All fallible monazite operations return this type.
pub type MonaziteResult<T> = Result<T, MonaziteError>;
