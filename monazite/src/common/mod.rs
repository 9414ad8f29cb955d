//! Common types and utilities shared across the crate.
//!
//! This module provides the dynamic [Value] model, the native [ObjectId]
//! identifier type, and small locking helpers used by the error type and
//! the registry caches.

mod object_id;
mod util;
mod value;

pub use object_id::*;
pub use util::*;
pub use value::*;
