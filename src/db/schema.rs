use rusqlite::Connection;
use crate::error::Result;

const COMMERCE_SCHEMA: &str = include_str!("../../schema/commerce.sql");

/// Create the relational source tables if they do not exist yet.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(COMMERCE_SCHEMA)?;
    log::debug!("Commerce schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        // second run is a no-op
        ensure_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap();

        assert_eq!(tables, vec!["customers", "order_items", "orders", "products"]);
    }
}
