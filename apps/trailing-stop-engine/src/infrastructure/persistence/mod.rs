//! Order Store Adapters
//!
//! - `SqliteOrderStore`: durable store used by the engine binary
//! - `InMemoryOrderStore`: tests and dry runs

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryOrderStore;
pub use sqlite::SqliteOrderStore;
