pub use self::error::DatabaseError;
pub use self::manager::{DatabaseManager, SCHEMA_VERSION};
pub use self::models::{MessageMapping, ThreadMapping};
pub use self::stores::{MessageStore, ThreadStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema_sqlite;
pub mod sqlite;
pub mod stores;
