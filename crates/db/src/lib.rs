//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! every table in the rusty-automation schema, and the store traits the engine
//! and API depend on. Two stores implement them: [`PgStore`] (Postgres) and
//! [`MemoryStore`] (in-process, for tests and local runs). No business logic
//! lives here.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;
pub mod store;
pub mod memory;

pub use pool::DbPool;
pub use error::DbError;
pub use models::{
    ExecutionLogRow, ExecutionRow, LogCompletion, LogTarget, NewExecutionLog, RunStatus,
    WorkflowRow,
};
pub use store::{ExecutionStore, PgStore, WorkflowStore};
pub use memory::MemoryStore;
