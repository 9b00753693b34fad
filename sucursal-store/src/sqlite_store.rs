use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use sucursal_base::{store, Error, ErrorKind, RowId, Result};
use sucursal_proto::Op;

use crate::local_store::LocalStore;
use crate::model::{Article, ArticleStock, Customer, CustomerStatus, ShippingGuide};

/// SQLite-backed `LocalStore`. Each call opens its own connection against
/// the same file (spec §5 concurrency note: "each write opens its own
/// connection/cursor — the engine's internal row-level locking is the
/// serialization mechanism"), matching `original_source/consensus.py`'s own
/// per-call `sqlite3.connect(db_path)` pattern rather than holding one
/// shared handle across threads.
pub struct SqliteStore {
    path: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customer (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT    NOT NULL UNIQUE,
    name     TEXT    NOT NULL,
    address  TEXT    NOT NULL,
    card     INTEGER NOT NULL UNIQUE,
    status   TEXT    NOT NULL CHECK (status IN ('Active', 'Inactive'))
);

CREATE TABLE IF NOT EXISTS article (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    branch_id INTEGER NOT NULL,
    code      INTEGER NOT NULL UNIQUE,
    name      TEXT    NOT NULL,
    price     REAL    NOT NULL,
    stock     TEXT    NOT NULL CHECK (stock IN ('Available', 'OutOfStock'))
);

CREATE TABLE IF NOT EXISTS shipping_guide (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customer(id),
    article_id  INTEGER NOT NULL REFERENCES article(id),
    branch_id   INTEGER NOT NULL,
    serial      INTEGER NOT NULL UNIQUE,
    amount      REAL    NOT NULL,
    purchase_ts TEXT    NOT NULL
);
";

/// rusqlite's errors can't get a `From<rusqlite::Error> for sucursal_base::Error`
/// impl here (orphan rule: neither type is local to this crate), so every
/// call site converts explicitly through this extension instead.
trait SqlExt<T> {
    fn sql(self) -> Result<T>;
}

impl<T> SqlExt<T> for rusqlite::Result<T> {
    fn sql(self) -> Result<T> {
        self.map_err(|e| Error::new(ErrorKind::Store, e))
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteStore> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).sql()?;
        conn.execute_batch(SCHEMA).sql()?;
        Ok(SqliteStore { path })
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.path).sql()
    }

    /// `true` if a `SELECT 1 ... LIMIT 1`-style existence probe found a row.
    fn exists(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<bool> {
        match conn.query_row(sql, params, |_| Ok(())) {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(Error::new(ErrorKind::Store, e)),
        }
    }
}

impl LocalStore for SqliteStore {
    fn apply(&self, op: &Op) -> Result<()> {
        let mut conn = self.conn()?;
        match op {
            Op::CreateCliente { username, name, address, card } => {
                conn.execute(
                    "INSERT INTO customer (username, name, address, card, status) VALUES (?1, ?2, ?3, ?4, 'Active')",
                    params![username, name, address, card],
                )
                .sql()?;
            }
            Op::UpdateCliente { username, name, address, card } => {
                conn.execute(
                    "UPDATE customer SET name = ?2, address = ?3, card = ?4 WHERE username = ?1",
                    params![username, name, address, card],
                )
                .sql()?;
            }
            Op::ActivateCliente { username } => {
                conn.execute(
                    "UPDATE customer SET status = 'Active' WHERE username = ?1",
                    params![username],
                )
                .sql()?;
            }
            Op::DeactivateCliente { username } => {
                conn.execute(
                    "UPDATE customer SET status = 'Inactive' WHERE username = ?1",
                    params![username],
                )
                .sql()?;
            }
            Op::CreateArticulo { code, name, price, branch_id } => {
                conn.execute(
                    "INSERT INTO article (branch_id, code, name, price, stock) VALUES (?1, ?2, ?3, ?4, 'Available')",
                    params![branch_id.0, code, name, price.0],
                )
                .sql()?;
            }
            Op::UpdateArticulo { code, name, price } => {
                conn.execute(
                    "UPDATE article SET name = ?2, price = ?3 WHERE code = ?1",
                    params![code, name, price.0],
                )
                .sql()?;
            }
            Op::RestockArticulo { code } => {
                conn.execute(
                    "UPDATE article SET stock = 'Available' WHERE code = ?1 AND stock = 'OutOfStock'",
                    params![code],
                )
                .sql()?;
            }
            Op::DeactivateArticulo { code } => {
                conn.execute(
                    "UPDATE article SET stock = 'OutOfStock' WHERE code = ?1 AND stock = 'Available'",
                    params![code],
                )
                .sql()?;
            }
            Op::CreateGuiaEnvio { customer_id, article_id, branch_id, serial, amount, purchase_ts } => {
                let tx = conn.transaction().sql()?;
                tx.execute(
                    "INSERT INTO shipping_guide (customer_id, article_id, branch_id, serial, amount, purchase_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![customer_id.0, article_id.0, branch_id.0, serial, amount.0, purchase_ts],
                )
                .sql()?;
                let flipped = tx
                    .execute(
                        "UPDATE article SET stock = 'OutOfStock' WHERE id = ?1 AND stock = 'Available'",
                        params![article_id.0],
                    )
                    .sql()?;
                if flipped == 0 {
                    return Err(store(format!(
                        "create_guia_envio: article {article_id} was not Available at apply time"
                    )));
                }
                tx.commit().sql()?;
            }
        }
        Ok(())
    }

    fn username_exists(&self, username: &str) -> Result<bool> {
        let conn = self.conn()?;
        Self::exists(&conn, "SELECT 1 FROM customer WHERE username = ?1", &[&username])
    }

    fn card_in_use(&self, card: i64) -> Result<bool> {
        let conn = self.conn()?;
        Self::exists(&conn, "SELECT 1 FROM customer WHERE card = ?1", &[&card])
    }

    fn code_exists(&self, code: i64) -> Result<bool> {
        let conn = self.conn()?;
        Self::exists(&conn, "SELECT 1 FROM article WHERE code = ?1", &[&code])
    }

    fn serial_in_use(&self, serial: i64) -> Result<bool> {
        let conn = self.conn()?;
        Self::exists(&conn, "SELECT 1 FROM shipping_guide WHERE serial = ?1", &[&serial])
    }

    fn customer_id(&self, username: &str) -> Result<RowId> {
        let conn = self.conn()?;
        let id: i64 = conn
            .query_row("SELECT id FROM customer WHERE username = ?1", params![username], |r| r.get(0))
            .sql()?;
        Ok(RowId(id))
    }

    fn customer_active(&self, username: &str) -> Result<bool> {
        let conn = self.conn()?;
        let status: String = conn
            .query_row("SELECT status FROM customer WHERE username = ?1", params![username], |r| r.get(0))
            .sql()?;
        Ok(CustomerStatus::parse(&status) == Some(CustomerStatus::Active))
    }

    fn article_id(&self, code: i64) -> Result<RowId> {
        let conn = self.conn()?;
        let id: i64 = conn
            .query_row("SELECT id FROM article WHERE code = ?1", params![code], |r| r.get(0))
            .sql()?;
        Ok(RowId(id))
    }

    fn article_price(&self, code: i64) -> Result<f64> {
        let conn = self.conn()?;
        conn.query_row("SELECT price FROM article WHERE code = ?1", params![code], |r| r.get(0))
            .sql()
    }

    fn article_available(&self, code: i64) -> Result<bool> {
        let conn = self.conn()?;
        let stock: String = conn
            .query_row("SELECT stock FROM article WHERE code = ?1", params![code], |r| r.get(0))
            .sql()?;
        Ok(ArticleStock::parse(&stock) == Some(ArticleStock::Available))
    }

    fn list_customers(&self) -> Result<Vec<Customer>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, username, name, address, card, status FROM customer ORDER BY id")
            .sql()?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })
            .sql()?;
        let mut out = Vec::new();
        for row in rows {
            let (id, username, name, address, card, status) = row.sql()?;
            out.push(Customer {
                id: RowId(id),
                username,
                name,
                address,
                card,
                status: CustomerStatus::parse(&status).unwrap_or(CustomerStatus::Inactive),
            });
        }
        Ok(out)
    }

    fn list_articles(&self) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, branch_id, code, name, price, stock FROM article ORDER BY id")
            .sql()?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })
            .sql()?;
        let mut out = Vec::new();
        for row in rows {
            let (id, branch_id, code, name, price, stock) = row.sql()?;
            out.push(Article {
                id: RowId(id),
                branch_id: sucursal_base::BranchId(branch_id),
                code,
                name,
                price,
                stock: ArticleStock::parse(&stock).unwrap_or(ArticleStock::OutOfStock),
            });
        }
        Ok(out)
    }

    fn list_guides(&self) -> Result<Vec<ShippingGuide>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, customer_id, article_id, branch_id, serial, amount, purchase_ts FROM shipping_guide ORDER BY id",
            )
            .sql()?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, f64>(5)?,
                    r.get::<_, String>(6)?,
                ))
            })
            .sql()?;
        let mut out = Vec::new();
        for row in rows {
            let (id, customer_id, article_id, branch_id, serial, amount, purchase_ts) = row.sql()?;
            out.push(ShippingGuide {
                id: RowId(id),
                customer_id: RowId(customer_id),
                article_id: RowId(article_id),
                branch_id: sucursal_base::BranchId(branch_id),
                serial,
                amount,
                purchase_ts,
            });
        }
        Ok(out)
    }
}
