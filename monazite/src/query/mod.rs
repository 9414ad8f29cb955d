//! Query-building utilities: field alias translation, recursive
//! criteria merging, and the lenient shorthand parser.

mod alias;
mod merge;
mod shorthand;

pub use alias::*;
pub use merge::*;
pub use shorthand::*;
