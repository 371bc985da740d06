// Utility modules
// Database connection management and schema migrations

pub mod database;
pub mod schema;

pub use database::Database;
