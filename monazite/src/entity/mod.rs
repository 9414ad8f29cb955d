//! The mapped-entity layer: models and their registry, mutation
//! tracking with operator accumulation, the save/load/delete lifecycle,
//! reference resolution, and subdocument proxies with in-memory
//! operator emulation.

mod apply;
mod entity;
mod model;
mod operations;
mod subdocument;

pub use apply::*;
pub use entity::*;
pub use model::*;
pub use operations::*;
pub use subdocument::*;
