pub mod database;
pub mod error;
pub mod schema;
pub mod sessions;
pub mod sweep;

pub use database::Database;
pub use error::StoreError;
pub use sessions::{SessionStats, SessionStore};
