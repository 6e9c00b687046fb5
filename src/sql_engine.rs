//! SQL Engine
//!
//! Read-only query execution against the Northwind SQLite file. Every
//! outcome, including failure, comes back as text so the pipeline can feed
//! it to the model or to the repair loop unchanged.

use crate::error::{CopilotError, Result};
use itertools::Itertools;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const REJECTED_MESSAGE: &str = "Error: Only SELECT queries are allowed.";
pub const NO_RESULTS_MESSAGE: &str = "Query executed successfully but returned no results.";
pub const SQL_ERROR_PREFIX: &str = "SQL error occurred: ";

/// Lowercase names the prompts use, mapped to the raw Northwind objects.
const VIEWS: &[(&str, &str)] = &[
    ("orders", "SELECT * FROM Orders"),
    ("order_items", "SELECT * FROM \"Order Details\""),
    ("products", "SELECT * FROM Products"),
    ("customers", "SELECT * FROM Customers"),
];

const SCHEMA_TABLES: &[&str] = &["orders", "order_items", "products", "customers", "Categories"];

const ORDER_ITEMS_COLUMNS: &str = "OrderID, ProductID, UnitPrice, Quantity, Discount";

/// Query-execution capability: one read-only statement in, text out.
pub trait QueryExecutor: Send + Sync {
    fn query(&self, sql: &str) -> String;
}

pub struct SqliteEngine {
    db_path: PathBuf,
    max_rows: usize,
}

impl SqliteEngine {
    /// Open the database file and make sure the lowercase views exist.
    pub fn open(db_path: impl AsRef<Path>, max_rows: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.exists() {
            return Err(CopilotError::Database(format!(
                "Database not found at {}",
                db_path.display()
            )));
        }

        let engine = Self { db_path, max_rows };
        engine.ensure_views()?;
        Ok(engine)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create missing compatibility views. Existing objects are left alone.
    fn ensure_views(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        for (view_name, definition) in VIEWS {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE lower(name) = ?1",
                    [view_name],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                continue;
            }

            match conn.execute_batch(&format!("CREATE VIEW {} AS {}", view_name, definition)) {
                Ok(()) => info!("Created view {}", view_name),
                Err(e) => debug!("Skipping view {}: {}", view_name, e),
            }
        }

        Ok(())
    }

    fn read_only_connection(&self) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    /// Order date range stored in the database, e.g. `2016-07-04 to 2018-05-06`.
    pub fn date_range(&self) -> Option<String> {
        let conn = self.read_only_connection().ok()?;
        let (min, max): (Option<String>, Option<String>) = conn
            .query_row("SELECT MIN(OrderDate), MAX(OrderDate) FROM Orders", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .ok()?;
        match (min, max) {
            (Some(min), Some(max)) => Some(format!("{} to {}", min, max)),
            _ => None,
        }
    }

    /// Schema context handed to the SQL generation stage.
    pub fn describe_schema(&self) -> Result<String> {
        let conn = self.read_only_connection()?;
        let mut lines = Vec::new();

        let date_range = self.date_range().unwrap_or_else(|| "Unknown".to_string());
        lines.push(format!("--- DATABASE TIMEFRAME: {} ---", date_range));
        lines.push(
            "NOTE: The database contains data shifted +20 years from the original 1997 dataset."
                .to_string(),
        );
        lines.push("(e.g., 1997-06-01 in docs = 2017-06-01 in DB)\n".to_string());

        for table in SCHEMA_TABLES {
            let columns = match table_columns(&conn, table) {
                Ok(cols) if !cols.is_empty() => cols.join(", "),
                Ok(_) if *table == "order_items" => ORDER_ITEMS_COLUMNS.to_string(),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Could not introspect {}: {}", table, e);
                    continue;
                }
            };
            lines.push(format!("Table {} has columns: {}", table, columns));
        }

        Ok(lines.join("\n"))
    }

    fn run(&self, sql: &str) -> rusqlite::Result<String> {
        let conn = self.read_only_connection()?;
        let statement = sql.trim().trim_end_matches(';').trim();
        let mut stmt = conn.prepare(statement)?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut total_rows = 0usize;
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            total_rows += 1;
            if rows.len() >= self.max_rows {
                continue;
            }
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: Value = row.get(i)?;
                cells.push(render_value(&value));
            }
            rows.push(cells);
        }

        if total_rows == 0 {
            return Ok(NO_RESULTS_MESSAGE.to_string());
        }

        let mut table = render_table(&columns, &rows);
        if total_rows > rows.len() {
            table.push_str(&format!("\n... ({} more rows)", total_rows - rows.len()));
        }
        Ok(table)
    }
}

impl QueryExecutor for SqliteEngine {
    fn query(&self, sql: &str) -> String {
        if !is_read_only(sql) {
            warn!("Rejected non-SELECT statement");
            return REJECTED_MESSAGE.to_string();
        }

        match self.run(sql) {
            Ok(text) => text,
            Err(e) => format!("{}{}", SQL_ERROR_PREFIX, e),
        }
    }
}

/// Statement begins with a read-only query keyword.
pub fn is_read_only(sql: &str) -> bool {
    let clean = sql.trim().to_lowercase();
    clean.starts_with("select") || clean.starts_with("with")
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info('{}')", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

/// Fixed-width text table, right-aligned, no index column.
pub fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let format_line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, w)| format!("{:>width$}", cell, width = *w))
            .join(" ")
    };

    std::iter::once(format_line(columns))
        .chain(rows.iter().map(|r| format_line(r)))
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn northwind_fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("northwind.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustomerID TEXT, OrderDate TEXT, Freight REAL);
            CREATE TABLE "Order Details" (OrderID INTEGER, ProductID INTEGER, UnitPrice REAL, Quantity INTEGER, Discount REAL);
            CREATE TABLE Products (ProductID INTEGER PRIMARY KEY, ProductName TEXT, CategoryID INTEGER);
            CREATE TABLE Categories (CategoryID INTEGER PRIMARY KEY, CategoryName TEXT);
            CREATE TABLE Customers (CustomerID TEXT PRIMARY KEY, CompanyName TEXT);
            INSERT INTO Categories VALUES (1, 'Beverages'), (2, 'Condiments');
            INSERT INTO Products VALUES (1, 'Chai', 1), (2, 'Aniseed Syrup', 2);
            INSERT INTO Customers VALUES ('ALFKI', 'Alfreds Futterkiste');
            INSERT INTO Orders VALUES (10248, 'ALFKI', '2017-03-01', 32.38), (10249, 'ALFKI', '2018-01-15', 11.61);
            INSERT INTO "Order Details" VALUES (10248, 1, 18.0, 10, 0.0), (10249, 2, 10.0, 5, 0.1);
            "#,
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn test_views_created_and_queryable() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 200).unwrap();
        let result = engine.query("SELECT COUNT(*) AS n FROM order_items");
        assert!(result.contains('n'));
        assert!(result.contains('2'));
    }

    #[test]
    fn test_open_twice_keeps_existing_views() {
        let (_dir, path) = northwind_fixture();
        SqliteEngine::open(&path, 200).unwrap();
        let engine = SqliteEngine::open(&path, 200).unwrap();
        assert!(!engine.query("SELECT * FROM orders").starts_with(SQL_ERROR_PREFIX));
    }

    #[test]
    fn test_missing_database() {
        let err = SqliteEngine::open("/no/such/northwind.sqlite", 10).err().unwrap();
        assert!(matches!(err, CopilotError::Database(_)));
    }

    #[test]
    fn test_rejects_writes() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 200).unwrap();
        assert_eq!(engine.query("DELETE FROM Orders"), REJECTED_MESSAGE);
        assert_eq!(engine.query("  drop table Orders"), REJECTED_MESSAGE);
    }

    #[test]
    fn test_error_and_empty_results() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 200).unwrap();

        let err = engine.query("SELECT * FROM foo");
        assert!(err.starts_with("SQL error occurred: "));
        assert!(err.contains("no such table"));

        let empty = engine.query("SELECT * FROM orders WHERE OrderDate >= '2030-01-01';");
        assert_eq!(empty, NO_RESULTS_MESSAGE);
    }

    #[test]
    fn test_revenue_query_with_cte() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 200).unwrap();
        let sql = "WITH rev AS (SELECT SUM(oi.UnitPrice * oi.Quantity) AS revenue FROM order_items oi \
                   JOIN orders o ON oi.OrderID = o.OrderID JOIN products p ON oi.ProductID = p.ProductID \
                   JOIN categories c ON p.CategoryID = c.CategoryID \
                   WHERE c.CategoryName = 'Beverages' AND o.OrderDate >= '2017-01-01' AND o.OrderDate <= '2017-12-31') \
                   SELECT revenue FROM rev";
        let result = engine.query(sql);
        assert_eq!(result, "revenue\n    180");
    }

    #[test]
    fn test_row_cap() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 1).unwrap();
        let result = engine.query("SELECT OrderID FROM orders ORDER BY OrderID");
        assert!(result.ends_with("... (1 more rows)"));
    }

    #[test]
    fn test_describe_schema() {
        let (_dir, path) = northwind_fixture();
        let engine = SqliteEngine::open(&path, 200).unwrap();
        let schema = engine.describe_schema().unwrap();
        assert!(schema.contains("DATABASE TIMEFRAME: 2017-03-01 to 2018-01-15"));
        assert!(schema.contains("Table order_items has columns: OrderID, ProductID, UnitPrice, Quantity, Discount"));
        assert!(schema.contains("Table Categories has columns: CategoryID, CategoryName"));
    }

    #[test]
    fn test_render_table_alignment() {
        let columns = vec!["name".to_string(), "n".to_string()];
        let rows = vec![vec!["a".to_string(), "10".to_string()]];
        assert_eq!(render_table(&columns, &rows), "name  n\n   a 10");
    }
}
