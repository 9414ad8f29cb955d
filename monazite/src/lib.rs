//! Monazite is an object-document mapper for document stores.
//!
//! It wraps a minimal driver contract with three layers:
//!
//! - [collection]: lazy query builders over named collections, with
//!   field alias translation, recursive criteria merging, and a
//!   single-pass cursor contract
//! - [entity]: mapped records that track direct field changes and
//!   pending atomic operators separately, reconcile client state with
//!   server state after partial updates, and resolve declared
//!   references between models lazily
//! - [driver]: the enumerated trait a backing store implements, plus an
//!   in-memory implementation used by the test suite and as an
//!   embeddable fake
//!
//! # Quick start
//!
//! ```ignore
//! use monazite::doc;
//! use monazite::driver::MemoryDriver;
//! use monazite::entity::{Entity, Model, Registry};
//! use std::sync::Arc;
//!
//! let registry = Registry::builder()
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .database("app")
//!     .register(Model::builder("book").collection("books").alias("title", "t").build())
//!     .build()?;
//!
//! let mut book = Entity::new(registry.clone(), "book")?;
//! book.set("title", "Dune")?;
//! book.set("counter", 10)?;
//! book.save()?;
//!
//! book.inc("counter", 1)?;
//! book.save()?;
//! assert_eq!(book.get("counter")?, 11.into());
//!
//! let mut books = registry.model_collection("book")?;
//! books.find(doc! { "title": "Dune" })?.sort_asc("title")?;
//! for record in &mut books {
//!     println!("{}", record?);
//! }
//! ```
//!
//! Entities and collections are single-flow objects; share the registry
//! and the driver across threads, not the instances built from them.

pub mod collection;
pub mod common;
pub mod driver;
pub mod entity;
pub mod errors;
pub mod query;

#[cfg(test)]
mod tests {
    use ctor::ctor;
    use log::LevelFilter;

    #[ctor]
    fn init_test_logger() {
        colog::default_builder()
            .filter_level(LevelFilter::Debug)
            .init();
    }
}
