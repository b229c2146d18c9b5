use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tokio::task;
use crate::error::{Result, GraphRecError};

pub mod schema;

/// Relational source connection manager
pub struct Db {
    path: std::path::PathBuf,
    read_only: bool,
}

impl Db {
    /// Create a read-write connection manager (tests, seeding)
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            read_only: false,
        }
    }

    /// Create a connection manager that refuses writes.
    ///
    /// The pipeline opens the source this way: it must never mutate relational data.
    pub fn read_only<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            read_only: true,
        }
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let read_only = self.read_only;
        task::spawn_blocking(move || {
            let mut conn = open(&path, read_only)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            GraphRecError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("database task failed: {}", e),
            ))
        })?
    }
}

fn open(path: &Path, read_only: bool) -> Result<Connection> {
    if read_only {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only = ON; PRAGMA foreign_keys = ON;")?;
        return Ok(conn);
    }

    let conn = Connection::open(path)?;
    // Rollback journal, not WAL: read-only openers cannot create the -shm file
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_db_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);

        let result = db.with_connection(|conn| {
            conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])?;
            Ok(())
        }).await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "DELETE");

            let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(foreign_keys, 1);

            Ok::<(), GraphRecError>(())
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        Db::new(&db_path)
            .with_connection(|conn| {
                conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let db = Db::read_only(&db_path);
        let result = db
            .with_connection(|conn| {
                conn.execute("INSERT INTO test (id) VALUES (1)", [])?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GraphRecError::Database(_))));
    }
}
