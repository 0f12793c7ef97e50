//! `db` crate — domain model types and the persistence layer.
//!
//! Provides the domain records (consignments, workflow nodes, templates),
//! the `Store`/`StoreTx`/`TemplateProvider` contracts, an in-memory store
//! used throughout the test suites, and the Postgres implementation.
//! No business logic lives here.

pub mod error;
pub mod memory;
pub mod model;
pub mod pg;
pub mod pool;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use pool::DbPool;
pub use store::{Store, StoreTx, TemplateProvider};
