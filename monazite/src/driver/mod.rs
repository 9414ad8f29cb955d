//! The external collaborator contract.
//!
//! The mapper core never talks to a wire protocol itself: every command
//! goes through a [Driver], an enumerated trait exposing exactly the
//! operations the core needs (one primary command per operation, one
//! feedback round-trip per mutation). Connection pooling, authentication,
//! and cancellation live behind this boundary.

mod memory;

pub use memory::*;

use crate::collection::Document;
use crate::common::Value;
use crate::errors::MonaziteResult;

/// Outcome of an insert command.
#[derive(Clone, Debug, Default)]
pub struct InsertReply {
    pub ok: bool,
    /// The identifier assigned by the server, when it assigned one.
    pub identifier: Option<Value>,
    pub error_message: Option<String>,
}

/// Outcome of an update command.
#[derive(Clone, Debug, Default)]
pub struct UpdateReply {
    pub ok: bool,
    /// Whether the update matched an existing record.
    pub matched_existing: bool,
    /// The identifier of a record created by an upsert.
    pub upserted_id: Option<Value>,
    pub error_message: Option<String>,
}

/// Outcome of a remove command.
#[derive(Clone, Debug, Default)]
pub struct RemoveReply {
    pub ok: bool,
    pub removed_count: u64,
    pub error_message: Option<String>,
}

/// Outcome of a generic database command.
#[derive(Clone, Debug, Default)]
pub struct CommandReply {
    pub ok: bool,
    pub result: Document,
    pub error_message: Option<String>,
}

/// Options for an update command.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateCommandOptions {
    pub multi: bool,
    pub upsert: bool,
}

/// Options for a remove command.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoveCommandOptions {
    pub just_one: bool,
}

/// A lazily-consumed result set returned by [Driver::find].
///
/// Cursor options (sort specification, skip, limit, batch size, cursor
/// timeout flags) are applied by name before the first read. The cursor
/// is single-pass: `rewind` positions it at the start once, and the
/// underlying protocol does not support restarting an iterating cursor.
pub trait DriverCursor {
    /// Applies a named cursor option. Unknown option names are accepted
    /// and ignored so callers can pass through driver-specific flags.
    fn apply_option(&mut self, name: &str, value: &Value) -> MonaziteResult<()>;

    /// Positions the cursor before the first record.
    fn rewind(&mut self) -> MonaziteResult<()>;

    /// Advances the cursor, returning the next record or `None` when the
    /// result set is exhausted.
    fn next_record(&mut self) -> MonaziteResult<Option<Document>>;

    /// Counts the records matched by the cursor's query, honoring skip
    /// and limit when `apply_limits` is set.
    fn count(&self, apply_limits: bool) -> MonaziteResult<u64>;
}

/// Command execution contract implemented by a database collaborator.
///
/// Implementations must be `Send + Sync`; a single driver instance is
/// shared by every collection and entity created from one registry.
pub trait Driver: Send + Sync {
    /// Issues a query and returns a cursor over the matching records.
    fn find(
        &self,
        collection: &str,
        criteria: &Document,
        projection: &Document,
    ) -> MonaziteResult<Box<dyn DriverCursor>>;

    /// Issues a single-record query.
    fn find_one(
        &self,
        collection: &str,
        criteria: &Document,
        projection: &Document,
    ) -> MonaziteResult<Option<Document>>;

    /// Inserts one record.
    fn insert(&self, collection: &str, document: &Document) -> MonaziteResult<InsertReply>;

    /// Applies an operator document (or full replacement) to the records
    /// matching the criteria.
    fn update(
        &self,
        collection: &str,
        criteria: &Document,
        update: &Document,
        options: UpdateCommandOptions,
    ) -> MonaziteResult<UpdateReply>;

    /// Removes the records matching the criteria.
    fn remove(
        &self,
        collection: &str,
        criteria: &Document,
        options: RemoveCommandOptions,
    ) -> MonaziteResult<RemoveReply>;

    /// Runs a named database command (findAndModify-style helpers, group
    /// aggregation).
    fn run_command(&self, name: &str, args: &Document) -> MonaziteResult<CommandReply>;
}
