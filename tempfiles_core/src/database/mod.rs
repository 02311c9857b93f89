pub mod connection;

pub use connection::{DatabaseManager, get_database_pool};
