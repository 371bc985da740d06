// SQLite Database Connection Management
// Provides thread-safe database access shared by the orchestrator and repositories

use rusqlite::{Connection, Result as SqliteResult};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::schema;

/// Application identifier used for the data directory
pub const APP_IDENTIFIER: &str = "com.colloquy.desktop";

/// Database file name
#[cfg(debug_assertions)]
pub const DATABASE_FILE: &str = "colloquy-dev.db";

#[cfg(not(debug_assertions))]
pub const DATABASE_FILE: &str = "colloquy.db";

/// Thread-safe database wrapper
/// Uses Arc<Mutex<Connection>> for concurrent access from multiple tasks
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database file, enable WAL mode, and run migrations
    pub fn new(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create database directory: {}", e))?;
        }

        let conn = Connection::open(&path)
            .map_err(|e| format!("Failed to open database: {}", e))?;

        // Configure SQLite for concurrent access from the orchestrator and
        // detached background tasks
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )
        .map_err(|e| format!("Failed to configure database: {}", e))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database with migrations applied (used by tests)
    pub fn new_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {}", e))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| format!("Failed to configure database: {}", e))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Get database file path (None for in-memory databases)
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Get a lock on the connection for executing queries
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|e| format!("Failed to acquire database lock: {}", e))
    }

    fn run_migrations(&self) -> Result<(), String> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    /// Execute a function with the database connection
    /// The closure should return Result<T, String> with errors already converted
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, String>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Execute a function with the database connection (raw SQLite result)
    pub fn with_connection_raw<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.lock()?;
        f(&conn).map_err(|e| format!("Database error: {}", e))
    }

    /// Execute a function within a transaction
    /// Commits on success, rolls back when the closure errors
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, String>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| format!("Failed to start transaction: {}", e))?;

        match f(&tx) {
            Ok(result) => {
                tx.commit()
                    .map_err(|e| format!("Failed to commit transaction: {}", e))?;
                Ok(result)
            }
            Err(e) => {
                // Transaction rolls back when dropped
                Err(e)
            }
        }
    }

    /// Get the current schema version
    pub fn schema_version(&self) -> Result<i32, String> {
        self.with_connection_raw(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
        })
        .or_else(|_| Ok(0))
    }
}

/// Get the default database path
pub fn get_database_path() -> Result<PathBuf, String> {
    dirs::data_dir()
        .map(|p| p.join(APP_IDENTIFIER).join(DATABASE_FILE))
        .ok_or_else(|| "Could not determine application data directory".to_string())
}

/// Open the default database
pub fn open_default_database() -> Result<Database, String> {
    let path = get_database_path()?;
    Database::new(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.clone()).unwrap();

        assert!(path.exists());
        assert!(db.schema_version().unwrap() >= 1);
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.path().is_none());
        assert_eq!(db.schema_version().unwrap(), schema::CURRENT_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path).unwrap();

        let mode: String = db
            .with_connection_raw(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .unwrap();

        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_transaction_commits() {
        let db = Database::new_in_memory().unwrap();

        let result = db.with_transaction(|conn| {
            conn.execute("CREATE TABLE scratch (id INTEGER PRIMARY KEY)", [])
                .map_err(|e| e.to_string())?;
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);

        let exists: i32 = db
            .with_connection_raw(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='scratch'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::new_in_memory().unwrap();

        let result: Result<(), String> = db.with_transaction(|conn| {
            conn.execute("CREATE TABLE scratch (id INTEGER PRIMARY KEY)", [])
                .map_err(|e| e.to_string())?;
            Err("boom".to_string())
        });
        assert!(result.is_err());

        let exists: i32 = db
            .with_connection_raw(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='scratch'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(exists, 0);
    }
}
