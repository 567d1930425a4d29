//! SQLite-backed ledger implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::{
    ArtifactUpdate, CreateOrderRequest, CreateProductRequest, DeletionSummary, Download,
    LedgerError, LedgerStage, LedgerStore, Order, OrderStatus, Product, ProductMetadata,
    ProductStatus, RecordDownloadRequest,
};

const PRODUCT_COLUMNS: &str = "id, topic, status, version, created_at, updated_at, package_path, checksum, content_hash, metadata";

const ORDER_COLUMNS: &str = "id, product_id, customer_email, amount, currency, status, payment_details, download_token, token_expiry, token_used, created_at, updated_at";

const ORDER_BY_CREATED: &str = "ORDER BY created_at ASC, id ASC";

const DOWNLOAD_COLUMNS: &str =
    "id, order_id, product_id, download_time, ip_address, user_agent, token_used";

/// Default lifetime of a download token.
const DEFAULT_TOKEN_TTL_HOURS: i64 = 72;

/// Fixed-width timestamps so that lexical order matches time order in SQL.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn storage<E>(stage: LedgerStage, entity_id: Option<&str>) -> impl FnOnce(E) -> LedgerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let entity_id = entity_id.map(str::to_string);
    move |e| LedgerError::storage(stage, entity_id, e)
}

/// SQLite-backed ledger.
///
/// Holds only the database path: each operation opens its own connection and
/// closes it before returning.
pub struct SqliteLedger {
    path: PathBuf,
    token_ttl: chrono::Duration,
}

impl SqliteLedger {
    /// Open a ledger at `path`, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let ledger = Self {
            path: path.to_path_buf(),
            token_ttl: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        };
        let conn = ledger.connect(LedgerStage::Open)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(storage(LedgerStage::Open, None))?;
        Self::initialize_schema(&conn)?;
        Ok(ledger)
    }

    /// Set how long issued download tokens stay valid.
    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self, stage: LedgerStage) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path).map_err(storage(stage, None))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage(stage, None))?;
        Ok(conn)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                package_path TEXT,
                checksum TEXT,
                content_hash TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_products_status ON products(status);
            CREATE INDEX IF NOT EXISTS idx_products_content_hash ON products(content_hash);
            CREATE INDEX IF NOT EXISTS idx_products_created_at ON products(created_at);

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                customer_email TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_details TEXT,
                download_token TEXT UNIQUE,
                token_expiry TEXT,
                token_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_product_id ON orders(product_id);

            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                download_time TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                token_used INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_product_id ON downloads(product_id);
            CREATE INDEX IF NOT EXISTS idx_downloads_order_id ON downloads(order_id);
            "#,
        )
        .map_err(storage(LedgerStage::Schema, None))
    }

    fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
        let status: String = row.get(2)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;
        let metadata_json: String = row.get(9)?;

        // Metadata is written by several actors over time.
        let metadata = ProductMetadata::from_stored(&metadata_json);

        Ok(Product {
            id: row.get(0)?,
            topic: row.get(1)?,
            status: ProductStatus::from(status),
            version: row.get(3)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            package_path: row.get(6)?,
            checksum: row.get(7)?,
            content_hash: row.get(8)?,
            metadata,
        })
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
        let status: String = row.get(5)?;
        let payment_details: Option<String> = row.get(6)?;
        let token_expiry: Option<String> = row.get(8)?;
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;

        Ok(Order {
            id: row.get(0)?,
            product_id: row.get(1)?,
            customer_email: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Pending),
            payment_details: payment_details.and_then(|json| serde_json::from_str(&json).ok()),
            download_token: row.get(7)?,
            token_expiry: token_expiry.as_deref().map(parse_ts),
            token_used: row.get(9)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    fn row_to_download(row: &rusqlite::Row) -> rusqlite::Result<Download> {
        let download_time: String = row.get(3)?;
        Ok(Download {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            download_time: parse_ts(&download_time),
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            token_used: row.get(6)?,
        })
    }

    fn query_product(
        conn: &Connection,
        id: &str,
        stage: LedgerStage,
    ) -> Result<Option<Product>, LedgerError> {
        conn.query_row(
            &format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS),
            params![id],
            Self::row_to_product,
        )
        .optional()
        .map_err(storage(stage, Some(id)))
    }

    /// Run `SELECT <product columns> FROM products <tail>`.
    fn query_products(
        &self,
        tail: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Product>, LedgerError> {
        let stage = LedgerStage::ReadProduct;
        let conn = self.connect(stage)?;
        let sql = format!("SELECT {} FROM products {}", PRODUCT_COLUMNS, tail);
        let mut stmt = conn.prepare(&sql).map_err(storage(stage, None))?;
        let rows = stmt
            .query_map(params, Self::row_to_product)
            .map_err(storage(stage, None))?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row.map_err(storage(stage, None))?);
        }
        Ok(products)
    }

    fn query_order(
        conn: &Connection,
        column: &str,
        value: &str,
        stage: LedgerStage,
    ) -> Result<Option<Order>, LedgerError> {
        conn.query_row(
            &format!("SELECT {} FROM orders WHERE {} = ?", ORDER_COLUMNS, column),
            params![value],
            Self::row_to_order,
        )
        .optional()
        .map_err(storage(stage, Some(value)))
    }

    fn write_product(conn: &Connection, product: &Product, stage: LedgerStage) -> Result<(), LedgerError> {
        let metadata_json = serde_json::to_string(&product.metadata)
            .map_err(storage(stage, Some(&product.id)))?;

        conn.execute(
            "UPDATE products SET topic = ?, status = ?, version = ?, updated_at = ?, package_path = ?, checksum = ?, content_hash = ?, metadata = ? WHERE id = ?",
            params![
                product.topic,
                product.status.as_str(),
                product.version,
                ts(product.updated_at),
                product.package_path,
                product.checksum,
                product.content_hash,
                metadata_json,
                product.id,
            ],
        )
        .map_err(storage(stage, Some(&product.id)))?;
        Ok(())
    }

    /// Load, modify and write back one product inside a single transaction.
    fn modify_product<F>(&self, id: &str, modify: F) -> Result<Product, LedgerError>
    where
        F: FnOnce(&mut Product) -> Result<(), LedgerError>,
    {
        let stage = LedgerStage::UpdateProduct;
        let mut conn = self.connect(stage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage(stage, Some(id)))?;

        let mut product = Self::query_product(&tx, id, stage)?
            .ok_or_else(|| LedgerError::not_found(stage, "product", id))?;

        modify(&mut product)?;
        product.updated_at = Utc::now();
        Self::write_product(&tx, &product, stage)?;

        tx.commit().map_err(storage(stage, Some(id)))?;
        Ok(product)
    }
}

impl LedgerStore for SqliteLedger {
    fn create_product(&self, request: CreateProductRequest) -> Result<Product, LedgerError> {
        let stage = LedgerStage::CreateProduct;
        let id = request.id.clone();
        let mut conn = self.connect(stage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage(stage, Some(&id)))?;

        let now = Utc::now();
        let product = match Self::query_product(&tx, &id, stage)? {
            Some(mut existing) => {
                existing.topic = request.topic;
                existing.metadata.merge(request.metadata);
                if request.content_hash.is_some() {
                    existing.content_hash = request.content_hash;
                }
                if let Some(status) = request.status {
                    if !existing.status.can_transition_to(&status) {
                        return Err(LedgerError::invalid_transition(&id, &existing.status, &status));
                    }
                    existing.status = status;
                }
                existing.updated_at = now;
                Self::write_product(&tx, &existing, stage)?;
                existing
            }
            None => {
                let product = Product {
                    id: id.clone(),
                    topic: request.topic,
                    status: request.status.unwrap_or(ProductStatus::Draft),
                    version: 1,
                    created_at: now,
                    updated_at: now,
                    package_path: None,
                    checksum: None,
                    content_hash: request.content_hash,
                    metadata: request.metadata,
                };
                let metadata_json = serde_json::to_string(&product.metadata)
                    .map_err(storage(stage, Some(&id)))?;
                tx.execute(
                    &format!(
                        "INSERT INTO products ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        PRODUCT_COLUMNS
                    ),
                    params![
                        product.id,
                        product.topic,
                        product.status.as_str(),
                        product.version,
                        ts(product.created_at),
                        ts(product.updated_at),
                        product.package_path,
                        product.checksum,
                        product.content_hash,
                        metadata_json,
                    ],
                )
                .map_err(storage(stage, Some(&id)))?;
                product
            }
        };

        tx.commit().map_err(storage(stage, Some(&id)))?;
        Ok(product)
    }

    fn update_product_status(
        &self,
        id: &str,
        status: ProductStatus,
        metadata: Option<ProductMetadata>,
    ) -> Result<Product, LedgerError> {
        self.modify_product(id, |product| {
            if !product.status.can_transition_to(&status) {
                return Err(LedgerError::invalid_transition(id, &product.status, &status));
            }
            product.status = status;
            if let Some(delta) = metadata {
                product.metadata.merge(delta);
            }
            Ok(())
        })
    }

    fn merge_product_metadata(
        &self,
        id: &str,
        metadata: ProductMetadata,
    ) -> Result<Product, LedgerError> {
        self.modify_product(id, |product| {
            product.metadata.merge(metadata);
            Ok(())
        })
    }

    fn update_product_artifact(
        &self,
        id: &str,
        update: ArtifactUpdate,
    ) -> Result<Product, LedgerError> {
        self.modify_product(id, |product| {
            if let Some(version) = update.version {
                product.version = version;
            }
            if update.package_path.is_some() {
                product.package_path = update.package_path;
            }
            if update.checksum.is_some() {
                product.checksum = update.checksum;
            }
            Ok(())
        })
    }

    fn get_product(&self, id: &str) -> Result<Option<Product>, LedgerError> {
        let conn = self.connect(LedgerStage::ReadProduct)?;
        Self::query_product(&conn, id, LedgerStage::ReadProduct)
    }

    fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>, LedgerError> {
        self.query_products(
            &format!("{} LIMIT ? OFFSET ?", ORDER_BY_CREATED),
            &[&limit, &offset],
        )
    }

    fn get_products_by_status(
        &self,
        status: &ProductStatus,
    ) -> Result<Vec<Product>, LedgerError> {
        self.query_products(
            &format!("WHERE status = ? {}", ORDER_BY_CREATED),
            &[&status.as_str()],
        )
    }

    fn get_failed_products(&self) -> Result<Vec<Product>, LedgerError> {
        self.query_products(
            &format!("WHERE status LIKE '%FAILED%' {}", ORDER_BY_CREATED),
            &[],
        )
    }

    fn get_all_products(&self) -> Result<Vec<Product>, LedgerError> {
        self.query_products(ORDER_BY_CREATED, &[])
    }

    fn get_products_created_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Product>, LedgerError> {
        self.query_products(
            &format!("WHERE created_at >= ? {}", ORDER_BY_CREATED),
            &[&ts(since)],
        )
    }

    fn find_product_by_content_hash(&self, hash: &str) -> Result<Option<Product>, LedgerError> {
        Ok(self
            .query_products(
                &format!("WHERE content_hash = ? {} LIMIT 1", ORDER_BY_CREATED),
                &[&hash],
            )?
            .into_iter()
            .next())
    }

    fn count_by_status(&self) -> Result<BTreeMap<String, i64>, LedgerError> {
        let stage = LedgerStage::ReadProduct;
        let conn = self.connect(stage)?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM products GROUP BY status")
            .map_err(storage(stage, None))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(storage(stage, None))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row.map_err(storage(stage, None))?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    fn delete_product_record(&self, id: &str) -> Result<DeletionSummary, LedgerError> {
        let stage = LedgerStage::DeleteProduct;
        let mut conn = self.connect(stage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage(stage, Some(id)))?;

        if Self::query_product(&tx, id, stage)?.is_none() {
            return Err(LedgerError::not_found(stage, "product", id));
        }

        let downloads_deleted = tx
            .execute(
                "DELETE FROM downloads WHERE product_id = ?1 OR order_id IN (SELECT id FROM orders WHERE product_id = ?1)",
                params![id],
            )
            .map_err(storage(stage, Some(id)))?;
        let orders_deleted = tx
            .execute("DELETE FROM orders WHERE product_id = ?", params![id])
            .map_err(storage(stage, Some(id)))?;
        tx.execute("DELETE FROM products WHERE id = ?", params![id])
            .map_err(storage(stage, Some(id)))?;

        tx.commit().map_err(storage(stage, Some(id)))?;

        Ok(DeletionSummary {
            product_id: id.to_string(),
            orders_deleted,
            downloads_deleted,
        })
    }

    fn create_order(&self, request: CreateOrderRequest) -> Result<Order, LedgerError> {
        let stage = LedgerStage::CreateOrder;
        let conn = self.connect(stage)?;

        let now = Utc::now();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: request.product_id,
            customer_email: request.customer_email,
            amount: request.amount,
            currency: request.currency,
            status: OrderStatus::Pending,
            payment_details: request.payment_details,
            download_token: None,
            token_expiry: None,
            token_used: false,
            created_at: now,
            updated_at: now,
        };

        let payment_json = order
            .payment_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage(stage, Some(&order.id)))?;

        conn.execute(
            &format!(
                "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, 0, ?, ?)",
                ORDER_COLUMNS
            ),
            params![
                order.id,
                order.product_id,
                order.customer_email,
                order.amount,
                order.currency,
                order.status.as_str(),
                payment_json,
                ts(order.created_at),
                ts(order.updated_at),
            ],
        )
        .map_err(storage(stage, Some(&order.id)))?;

        Ok(order)
    }

    fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        payment_details: Option<Value>,
    ) -> Result<Order, LedgerError> {
        let stage = LedgerStage::UpdateOrder;
        let mut conn = self.connect(stage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage(stage, Some(id)))?;

        let mut order = Self::query_order(&tx, "id", id, stage)?
            .ok_or_else(|| LedgerError::not_found(stage, "order", id))?;

        let now = Utc::now();
        order.status = status;
        order.updated_at = now;
        if payment_details.is_some() {
            order.payment_details = payment_details;
        }
        if status == OrderStatus::Paid && order.download_token.is_none() {
            order.download_token = Some(uuid::Uuid::new_v4().simple().to_string());
            order.token_expiry = Some(now + self.token_ttl);
        }

        let payment_json = order
            .payment_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage(stage, Some(id)))?;

        tx.execute(
            "UPDATE orders SET status = ?, payment_details = ?, download_token = ?, token_expiry = ?, updated_at = ? WHERE id = ?",
            params![
                order.status.as_str(),
                payment_json,
                order.download_token,
                order.token_expiry.map(ts),
                ts(order.updated_at),
                id,
            ],
        )
        .map_err(storage(stage, Some(id)))?;

        tx.commit().map_err(storage(stage, Some(id)))?;
        Ok(order)
    }

    fn get_order(&self, id: &str) -> Result<Option<Order>, LedgerError> {
        let conn = self.connect(LedgerStage::ReadOrder)?;
        Self::query_order(&conn, "id", id, LedgerStage::ReadOrder)
    }

    fn get_orders_for_product(&self, product_id: &str) -> Result<Vec<Order>, LedgerError> {
        let stage = LedgerStage::ReadOrder;
        let conn = self.connect(stage)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM orders WHERE product_id = ? ORDER BY created_at ASC",
                ORDER_COLUMNS
            ))
            .map_err(storage(stage, Some(product_id)))?;
        let rows = stmt
            .query_map(params![product_id], Self::row_to_order)
            .map_err(storage(stage, Some(product_id)))?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row.map_err(storage(stage, Some(product_id)))?);
        }
        Ok(orders)
    }

    fn validate_token(&self, token: &str) -> Result<Order, LedgerError> {
        let conn = self.connect(LedgerStage::ReadOrder)?;
        let order = Self::query_order(&conn, "download_token", token, LedgerStage::ReadOrder)?
            .ok_or_else(|| LedgerError::token_rejected("unknown download token", None))?;
        check_redeemable(&order)?;
        Ok(order)
    }

    fn record_download(&self, request: RecordDownloadRequest) -> Result<Download, LedgerError> {
        let stage = LedgerStage::RecordDownload;
        let mut conn = self.connect(stage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage(stage, None))?;

        let order = Self::query_order(&tx, "download_token", &request.token, stage)?
            .ok_or_else(|| LedgerError::token_rejected("unknown download token", None))?;
        check_redeemable(&order)?;

        // Guarded flip: only one redemption can observe token_used = 0.
        let flipped = tx
            .execute(
                "UPDATE orders SET token_used = 1, updated_at = ? WHERE id = ? AND token_used = 0",
                params![ts(Utc::now()), order.id],
            )
            .map_err(storage(stage, Some(&order.id)))?;
        if flipped != 1 {
            return Err(LedgerError::token_rejected(
                "download token already used",
                Some(&order.id),
            ));
        }

        let download_time = Utc::now();
        tx.execute(
            "INSERT INTO downloads (order_id, product_id, download_time, ip_address, user_agent, token_used) VALUES (?, ?, ?, ?, ?, 1)",
            params![
                order.id,
                order.product_id,
                ts(download_time),
                request.ip_address,
                request.user_agent,
            ],
        )
        .map_err(storage(stage, Some(&order.id)))?;
        let id = tx.last_insert_rowid();

        tx.commit().map_err(storage(stage, Some(&order.id)))?;

        Ok(Download {
            id,
            order_id: order.id,
            product_id: order.product_id,
            download_time,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
            token_used: true,
        })
    }

    fn get_downloads_for_product(&self, product_id: &str) -> Result<Vec<Download>, LedgerError> {
        let stage = LedgerStage::ReadOrder;
        let conn = self.connect(stage)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM downloads WHERE product_id = ? ORDER BY id ASC",
                DOWNLOAD_COLUMNS
            ))
            .map_err(storage(stage, Some(product_id)))?;
        let rows = stmt
            .query_map(params![product_id], Self::row_to_download)
            .map_err(storage(stage, Some(product_id)))?;

        let mut downloads = Vec::new();
        for row in rows {
            downloads.push(row.map_err(storage(stage, Some(product_id)))?);
        }
        Ok(downloads)
    }
}

fn check_redeemable(order: &Order) -> Result<(), LedgerError> {
    let now = Utc::now();
    if order.token_used {
        return Err(LedgerError::token_rejected(
            "download token already used",
            Some(&order.id),
        ));
    }
    if order.status != OrderStatus::Paid {
        return Err(LedgerError::token_rejected(
            format!("order is {}, not PAID", order.status),
            Some(&order.id),
        ));
    }
    if !order.token_redeemable(now) {
        return Err(LedgerError::token_rejected(
            "download token expired",
            Some(&order.id),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_ledger() -> (SqliteLedger, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::new(&temp_dir.path().join("ledger.db")).unwrap();
        (ledger, temp_dir)
    }

    fn paid_order(ledger: &SqliteLedger, product_id: &str) -> Order {
        let order = ledger
            .create_order(CreateOrderRequest {
                product_id: product_id.to_string(),
                customer_email: "buyer@example.com".to_string(),
                amount: 19.0,
                currency: "USD".to_string(),
                payment_details: None,
            })
            .unwrap();
        ledger
            .update_order_status(&order.id, OrderStatus::Paid, Some(json!({"tx": "abc"})))
            .unwrap()
    }

    fn download_request(token: &str) -> RecordDownloadRequest {
        RecordDownloadRequest {
            token: token.to_string(),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8".to_string()),
        }
    }

    #[test]
    fn test_create_product() {
        let (ledger, _dir) = create_test_ledger();

        let product = ledger
            .create_product(CreateProductRequest::new("p1", "rust tips").with_content_hash("h1"))
            .unwrap();

        assert_eq!(product.id, "p1");
        assert_eq!(product.status, ProductStatus::Draft);
        assert_eq!(product.version, 1);

        let fetched = ledger.get_product("p1").unwrap().unwrap();
        assert_eq!(fetched.topic, "rust tips");
        assert_eq!(fetched.content_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_create_product_upserts() {
        let (ledger, _dir) = create_test_ledger();

        ledger
            .create_product(
                CreateProductRequest::new("p1", "old topic")
                    .with_metadata(ProductMetadata::new().with_extra("a", json!(1)))
                    .with_status(ProductStatus::Generated),
            )
            .unwrap();

        let product = ledger
            .create_product(
                CreateProductRequest::new("p1", "new topic")
                    .with_metadata(ProductMetadata::new().with_extra("b", json!(2)))
                    .with_content_hash("h2"),
            )
            .unwrap();

        assert_eq!(product.topic, "new topic");
        assert_eq!(product.status, ProductStatus::Generated);
        assert_eq!(product.content_hash.as_deref(), Some("h2"));
        assert_eq!(product.metadata.extra.get("a"), Some(&json!(1)));
        assert_eq!(product.metadata.extra.get("b"), Some(&json!(2)));
        assert_eq!(ledger.get_all_products().unwrap().len(), 1);
    }

    #[test]
    fn test_update_status_merges_metadata() {
        let (ledger, _dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("p1", "t"))
            .unwrap();

        ledger
            .update_product_status(
                "p1",
                ProductStatus::WaitingForDeployment,
                Some(ProductMetadata::new().with_extra("d1", json!("x"))),
            )
            .unwrap();
        let product = ledger
            .update_product_status(
                "p1",
                ProductStatus::Published,
                Some(ProductMetadata::new().with_deployment_url("https://x")),
            )
            .unwrap();

        assert_eq!(product.status, ProductStatus::Published);
        assert_eq!(product.metadata.extra.get("d1"), Some(&json!("x")));
        assert_eq!(product.metadata.deployment_url.as_deref(), Some("https://x"));
        assert!(product.updated_at >= product.created_at);
    }

    #[test]
    fn test_update_keeps_keys_written_in_another_shape() {
        let (ledger, dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("p1", "t"))
            .unwrap();

        let conn = Connection::open(dir.path().join("ledger.db")).unwrap();
        conn.execute(
            "UPDATE products SET metadata = ? WHERE id = ?",
            params![r#"{"niche":"dev","price":"9.99"}"#, "p1"],
        )
        .unwrap();

        let product = ledger
            .update_product_status(
                "p1",
                ProductStatus::WaitingForDeployment,
                Some(ProductMetadata::new().with_extra("d2", json!(1))),
            )
            .unwrap();
        assert_eq!(product.metadata.extra.get("niche"), Some(&json!("dev")));

        let raw: String = conn
            .query_row("SELECT metadata FROM products WHERE id = ?", params!["p1"], |row| {
                row.get(0)
            })
            .unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, json!({"niche": "dev", "price": "9.99", "d2": 1}));
    }

    #[test]
    fn test_update_status_nonexistent_product() {
        let (ledger, _dir) = create_test_ledger();

        let result = ledger.update_product_status("missing", ProductStatus::Published, None);

        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.stage, LedgerStage::UpdateProduct);
        assert_eq!(err.entity_id.as_deref(), Some("missing"));
    }

    #[test]
    fn test_update_status_rejects_regression() {
        let (ledger, _dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("p1", "t").with_status(ProductStatus::Promoted))
            .unwrap();

        let err = ledger
            .update_product_status("p1", ProductStatus::WaitingForDeployment, None)
            .unwrap_err();
        assert_eq!(err.kind, LedgerErrorKind::InvalidTransition);

        let product = ledger.get_product("p1").unwrap().unwrap();
        assert_eq!(product.status, ProductStatus::Promoted);
    }

    #[test]
    fn test_unknown_status_round_trips() {
        let (ledger, _dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("p1", "t"))
            .unwrap();
        ledger
            .update_product_status("p1", ProductStatus::from("UPLOAD_FAILED"), None)
            .unwrap();

        let failed = ledger.get_failed_products().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status.as_str(), "UPLOAD_FAILED");
    }

    #[test]
    fn test_list_and_filter_products() {
        let (ledger, _dir) = create_test_ledger();
        for i in 0..5 {
            ledger
                .create_product(CreateProductRequest::new(format!("p{}", i), "t"))
                .unwrap();
        }
        ledger
            .update_product_status("p3", ProductStatus::WaitingForDeployment, None)
            .unwrap();

        assert_eq!(ledger.list_products(2, 0).unwrap().len(), 2);
        assert_eq!(ledger.list_products(2, 4).unwrap().len(), 1);

        let waiting = ledger
            .get_products_by_status(&ProductStatus::WaitingForDeployment)
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, "p3");

        let counts = ledger.count_by_status().unwrap();
        assert_eq!(counts.get("DRAFT"), Some(&4));
        assert_eq!(counts.get("WAITING_FOR_DEPLOYMENT"), Some(&1));
    }

    #[test]
    fn test_created_since_and_content_hash() {
        let (ledger, _dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("old", "t"))
            .unwrap();
        let cutoff = Utc::now();
        std::thread::sleep(Duration::from_millis(5));
        ledger
            .create_product(CreateProductRequest::new("new", "t").with_content_hash("dup"))
            .unwrap();

        let recent = ledger.get_products_created_since(cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");

        let found = ledger.find_product_by_content_hash("dup").unwrap().unwrap();
        assert_eq!(found.id, "new");
        assert!(ledger.find_product_by_content_hash("none").unwrap().is_none());
    }

    #[test]
    fn test_update_artifact() {
        let (ledger, _dir) = create_test_ledger();
        ledger
            .create_product(CreateProductRequest::new("p1", "t"))
            .unwrap();

        let product = ledger
            .update_product_artifact(
                "p1",
                ArtifactUpdate {
                    version: Some(2),
                    package_path: Some("/out/p1.zip".to_string()),
                    checksum: Some("sha256:ab".to_string()),
                },
            )
            .unwrap();

        assert_eq!(product.version, 2);
        assert_eq!(product.package_path.as_deref(), Some("/out/p1.zip"));
        assert_eq!(product.checksum.as_deref(), Some("sha256:ab"));
    }

    #[test]
    fn test_paid_order_issues_token() {
        let (ledger, _dir) = create_test_ledger();
        let order = paid_order(&ledger, "p1");

        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.download_token.is_some());
        assert!(order.token_expiry.unwrap() > Utc::now());
        assert!(!order.token_used);
        assert_eq!(order.payment_details, Some(json!({"tx": "abc"})));

        let validated = ledger
            .validate_token(order.download_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(validated.id, order.id);
    }

    #[test]
    fn test_token_consumed_exactly_once() {
        let (ledger, _dir) = create_test_ledger();
        let order = paid_order(&ledger, "p1");
        let token = order.download_token.clone().unwrap();

        let download = ledger.record_download(download_request(&token)).unwrap();
        assert_eq!(download.order_id, order.id);
        assert_eq!(download.product_id, "p1");
        assert!(download.token_used);

        let second = ledger.record_download(download_request(&token)).unwrap_err();
        assert_eq!(second.kind, LedgerErrorKind::TokenRejected);

        let stored = ledger.get_order(&order.id).unwrap().unwrap();
        assert!(stored.token_used);
        assert_eq!(ledger.get_downloads_for_product("p1").unwrap().len(), 1);
    }

    #[test]
    fn test_expired_token_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::new(&temp_dir.path().join("ledger.db"))
            .unwrap()
            .with_token_ttl(chrono::Duration::seconds(-1));
        let order = paid_order(&ledger, "p1");

        let err = ledger
            .record_download(download_request(order.download_token.as_deref().unwrap()))
            .unwrap_err();
        assert_eq!(err.kind, LedgerErrorKind::TokenRejected);
        assert!(ledger.get_downloads_for_product("p1").unwrap().is_empty());
        assert!(!ledger.get_order(&order.id).unwrap().unwrap().token_used);
    }

    #[test]
    fn test_unpaid_order_has_no_token() {
        let (ledger, _dir) = create_test_ledger();
        let order = ledger
            .create_order(CreateOrderRequest {
                product_id: "p1".to_string(),
                customer_email: "a@b.c".to_string(),
                amount: 5.0,
                currency: "EUR".to_string(),
                payment_details: None,
            })
            .unwrap();
        let failed = ledger
            .update_order_status(&order.id, OrderStatus::Failed, None)
            .unwrap();
        assert!(failed.download_token.is_none());

        let err = ledger.validate_token("nope").unwrap_err();
        assert_eq!(err.kind, LedgerErrorKind::TokenRejected);
    }

    #[test]
    fn test_delete_cascades_only_to_owned_rows() {
        let (ledger, _dir) = create_test_ledger();
        for id in ["keep", "drop"] {
            ledger
                .create_product(CreateProductRequest::new(id, "t"))
                .unwrap();
            let order = paid_order(&ledger, id);
            ledger
                .record_download(download_request(order.download_token.as_deref().unwrap()))
                .unwrap();
        }
        paid_order(&ledger, "drop");

        let summary = ledger.delete_product_record("drop").unwrap();
        assert_eq!(summary.orders_deleted, 2);
        assert_eq!(summary.downloads_deleted, 1);

        assert!(ledger.get_product("drop").unwrap().is_none());
        assert!(ledger.get_orders_for_product("drop").unwrap().is_empty());
        assert!(ledger.get_downloads_for_product("drop").unwrap().is_empty());

        assert!(ledger.get_product("keep").unwrap().is_some());
        assert_eq!(ledger.get_orders_for_product("keep").unwrap().len(), 1);
        assert_eq!(ledger.get_downloads_for_product("keep").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_missing_product_deletes_nothing() {
        let (ledger, _dir) = create_test_ledger();
        let order = paid_order(&ledger, "ghost");

        let err = ledger.delete_product_record("ghost").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.stage, LedgerStage::DeleteProduct);

        // Orphaned order referencing the missing id is untouched.
        assert!(ledger.get_order(&order.id).unwrap().is_some());
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        {
            let ledger = SqliteLedger::new(&db_path).unwrap();
            ledger
                .create_product(CreateProductRequest::new("p1", "t"))
                .unwrap();
        }

        assert!(db_path.exists());
        let reopened = SqliteLedger::new(&db_path).unwrap();
        assert!(reopened.get_product("p1").unwrap().is_some());
    }
}
