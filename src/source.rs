//! Relational source: bulk reads of the four commerce tables.
//!
//! Every fetch returns the full table ordered by primary key. There is no
//! filtering, paging, or "changed since" variant; a run always reads everything.

use rusqlite::{params, Connection};

use crate::db::Db;
use crate::entities::{Customer, Dataset, Order, OrderItem, Product};
use crate::error::{Result, GraphRecError};

pub fn fetch_customers(conn: &Connection) -> Result<Vec<Customer>> {
    let mut stmt = conn.prepare("SELECT id, first_name, last_name FROM customers ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Customer {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn fetch_products(conn: &Connection) -> Result<Vec<Product>> {
    let mut stmt = conn.prepare("SELECT id, name, category, price FROM products ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            price: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Orders; `order_date` must be `YYYY-MM-DD HH:MM:SS` (or with a `T` separator).
pub fn fetch_orders(conn: &Connection) -> Result<Vec<Order>> {
    let mut stmt = conn.prepare("SELECT id, customer_id, order_date FROM orders ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Order {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            date: row.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn fetch_order_items(conn: &Connection) -> Result<Vec<OrderItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, order_id, product_id, quantity, unit_price FROM order_items ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            quantity: row.get(3)?,
            unit_price: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Load all four collections in one blocking task.
pub async fn load_dataset(db: &Db) -> Result<Dataset> {
    let dataset = db
        .with_connection(|conn| {
            Ok::<Dataset, GraphRecError>(Dataset {
                customers: fetch_customers(conn)?,
                products: fetch_products(conn)?,
                orders: fetch_orders(conn)?,
                order_items: fetch_order_items(conn)?,
            })
        })
        .await?;

    log::info!(
        "Loaded source: {} customers, {} products, {} orders, {} order items",
        dataset.customers.len(),
        dataset.products.len(),
        dataset.orders.len(),
        dataset.order_items.len()
    );
    Ok(dataset)
}

/// Write a dataset into the commerce tables in one transaction.
///
/// Seeding helper for tests and demos; the pipeline itself never writes to the source.
pub fn insert_dataset(conn: &mut Connection, dataset: &Dataset) -> Result<()> {
    let tx = conn.transaction()?;
    for c in &dataset.customers {
        tx.execute(
            "INSERT INTO customers (id, first_name, last_name) VALUES (?1, ?2, ?3)",
            params![c.id, c.first_name, c.last_name],
        )?;
    }
    for p in &dataset.products {
        tx.execute(
            "INSERT INTO products (id, name, category, price) VALUES (?1, ?2, ?3, ?4)",
            params![p.id, p.name, p.category, p.price],
        )?;
    }
    for o in &dataset.orders {
        tx.execute(
            "INSERT INTO orders (id, customer_id, order_date) VALUES (?1, ?2, ?3)",
            params![o.id, o.customer_id, o.date.format("%Y-%m-%d %H:%M:%S").to_string()],
        )?;
    }
    for i in &dataset.order_items {
        tx.execute(
            "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![i.id, i.order_id, i.product_id, i.quantity, i.unit_price],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn sample() -> Dataset {
        let date = NaiveDateTime::parse_from_str("2024-03-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        Dataset {
            customers: vec![
                Customer { id: 2, first_name: "Grace".into(), last_name: "Hopper".into() },
                Customer { id: 1, first_name: "Ada".into(), last_name: "Lovelace".into() },
            ],
            products: vec![
                Product { id: 1, name: "Laptop".into(), category: "Electronics".into(), price: 999.0 },
                Product { id: 2, name: "Mouse".into(), category: "Electronics".into(), price: 19.5 },
            ],
            orders: vec![
                Order { id: 100, customer_id: 1, date },
                Order { id: 101, customer_id: 2, date },
            ],
            order_items: vec![
                OrderItem { id: 1000, order_id: 100, product_id: 1, quantity: 1, unit_price: 999.0 },
                OrderItem { id: 1001, order_id: 100, product_id: 2, quantity: 2, unit_price: 19.5 },
                OrderItem { id: 1002, order_id: 101, product_id: 2, quantity: 1, unit_price: 19.5 },
                OrderItem { id: 1003, order_id: 101, product_id: 2, quantity: 1, unit_price: 18.0 },
            ],
        }
    }

    async fn setup_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("shop.db");
        let db = Db::new(&db_path);
        db.with_connection(|conn| {
            ensure_schema(conn)?;
            insert_dataset(conn, &sample())
        })
        .await
        .unwrap();
        (Db::read_only(&db_path), temp_dir)
    }

    #[tokio::test]
    async fn test_load_dataset_ordered_by_id() {
        let (db, _temp) = setup_test_db().await;
        let dataset = load_dataset(&db).await.unwrap();

        assert_eq!(dataset.customers.len(), 2);
        assert_eq!(dataset.customers[0].id, 1);
        assert_eq!(dataset.customers[0].first_name, "Ada");
        assert_eq!(dataset.products[1].price, 19.5);
        assert_eq!(dataset.orders[0].date.format("%Y-%m-%d").to_string(), "2024-03-01");
        assert_eq!(dataset.order_items.len(), 4);
        assert_eq!(dataset.order_items[1].quantity, 2);
    }

    #[tokio::test]
    async fn test_empty_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("empty.db"));
        db.with_connection(|conn| ensure_schema(conn)).await.unwrap();

        let dataset = load_dataset(&db).await.unwrap();
        assert!(dataset.customers.is_empty());
        assert!(dataset.order_items.is_empty());
    }
}
