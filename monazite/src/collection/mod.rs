//! Records and lazy queries: the [Document] value mapping, the `doc!`
//! constructor macro, and the [Collection] query builder/cursor.

mod collection;
mod document;

pub use collection::*;
pub use document::*;
