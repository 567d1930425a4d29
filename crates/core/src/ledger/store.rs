//! Ledger storage trait, request types and the ledger error.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::{Download, Order, OrderStatus, Product, ProductMetadata, ProductStatus};

/// Which ledger operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStage {
    Open,
    Schema,
    CreateProduct,
    UpdateProduct,
    ReadProduct,
    DeleteProduct,
    CreateOrder,
    UpdateOrder,
    ReadOrder,
    RecordDownload,
}

impl fmt::Display for LedgerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Schema => "schema",
            Self::CreateProduct => "create_product",
            Self::UpdateProduct => "update_product",
            Self::ReadProduct => "read_product",
            Self::DeleteProduct => "delete_product",
            Self::CreateOrder => "create_order",
            Self::UpdateOrder => "update_order",
            Self::ReadOrder => "read_order",
            Self::RecordDownload => "record_download",
        };
        f.write_str(s)
    }
}

/// Classification of a ledger failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorKind {
    /// The referenced entity does not exist. Never retried.
    NotFound,
    /// The requested status change would move a product backwards.
    InvalidTransition,
    /// A download token is unknown, used, expired or not yet issued.
    TokenRejected,
    /// The underlying storage failed.
    Storage,
}

/// Error returned by every ledger operation.
#[derive(Debug, Error)]
#[error("ledger {stage} failed: {message}")]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub stage: LedgerStage,
    pub message: String,
    pub entity_id: Option<String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LedgerError {
    pub fn not_found(stage: LedgerStage, entity: &str, id: &str) -> Self {
        Self {
            kind: LedgerErrorKind::NotFound,
            stage,
            message: format!("{} not found: {}", entity, id),
            entity_id: Some(id.to_string()),
            cause: None,
        }
    }

    pub fn invalid_transition(id: &str, from: &ProductStatus, to: &ProductStatus) -> Self {
        Self {
            kind: LedgerErrorKind::InvalidTransition,
            stage: LedgerStage::UpdateProduct,
            message: format!("cannot move product {} from {} back to {}", id, from, to),
            entity_id: Some(id.to_string()),
            cause: None,
        }
    }

    pub fn token_rejected(reason: impl Into<String>, order_id: Option<&str>) -> Self {
        Self {
            kind: LedgerErrorKind::TokenRejected,
            stage: LedgerStage::RecordDownload,
            message: reason.into(),
            entity_id: order_id.map(str::to_string),
            cause: None,
        }
    }

    pub fn storage<E>(stage: LedgerStage, entity_id: Option<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind: LedgerErrorKind::Storage,
            stage,
            message: cause.to_string(),
            entity_id,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == LedgerErrorKind::NotFound
    }
}

/// Request to create (or upsert) a product.
#[derive(Debug, Clone)]
pub struct CreateProductRequest {
    pub id: String,
    pub topic: String,
    pub metadata: ProductMetadata,
    pub content_hash: Option<String>,
    /// Only applied when set; an upsert otherwise keeps the stored status.
    pub status: Option<ProductStatus>,
}

impl CreateProductRequest {
    pub fn new(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            metadata: ProductMetadata::default(),
            content_hash: None,
            status: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ProductMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Packaged artifact fields recorded after generation.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUpdate {
    pub version: Option<u32>,
    pub package_path: Option<String>,
    pub checksum: Option<String>,
}

/// Request to create an order.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub product_id: String,
    pub customer_email: String,
    pub amount: f64,
    pub currency: String,
    pub payment_details: Option<Value>,
}

/// Request to redeem a download token.
#[derive(Debug, Clone)]
pub struct RecordDownloadRequest {
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Rows removed by a product deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionSummary {
    pub product_id: String,
    pub orders_deleted: usize,
    pub downloads_deleted: usize,
}

/// Trait for ledger storage backends.
///
/// Every call is an independent short transaction, so the ledger can be shared
/// between the control loop and background workers.
pub trait LedgerStore: Send + Sync {
    /// Create a product, or merge into the existing one with the same id.
    fn create_product(&self, request: CreateProductRequest) -> Result<Product, LedgerError>;

    /// Set a product's status and merge metadata. Fails if the product is absent.
    fn update_product_status(
        &self,
        id: &str,
        status: ProductStatus,
        metadata: Option<ProductMetadata>,
    ) -> Result<Product, LedgerError>;

    /// Merge metadata without touching the status.
    fn merge_product_metadata(
        &self,
        id: &str,
        metadata: ProductMetadata,
    ) -> Result<Product, LedgerError>;

    /// Record packaged artifact fields.
    fn update_product_artifact(
        &self,
        id: &str,
        update: ArtifactUpdate,
    ) -> Result<Product, LedgerError>;

    fn get_product(&self, id: &str) -> Result<Option<Product>, LedgerError>;

    fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>, LedgerError>;

    fn get_products_by_status(&self, status: &ProductStatus)
        -> Result<Vec<Product>, LedgerError>;

    /// Products whose status contains `FAILED`.
    fn get_failed_products(&self) -> Result<Vec<Product>, LedgerError>;

    fn get_all_products(&self) -> Result<Vec<Product>, LedgerError>;

    fn get_products_created_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Product>, LedgerError>;

    fn find_product_by_content_hash(&self, hash: &str) -> Result<Option<Product>, LedgerError>;

    /// Number of products per status string.
    fn count_by_status(&self) -> Result<BTreeMap<String, i64>, LedgerError>;

    /// Delete a product with its orders and downloads in one transaction.
    fn delete_product_record(&self, id: &str) -> Result<DeletionSummary, LedgerError>;

    fn create_order(&self, request: CreateOrderRequest) -> Result<Order, LedgerError>;

    /// Update an order's status. Marking an order paid issues its download token.
    fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        payment_details: Option<Value>,
    ) -> Result<Order, LedgerError>;

    fn get_order(&self, id: &str) -> Result<Option<Order>, LedgerError>;

    fn get_orders_for_product(&self, product_id: &str) -> Result<Vec<Order>, LedgerError>;

    /// Check a token without consuming it.
    fn validate_token(&self, token: &str) -> Result<Order, LedgerError>;

    /// Consume a download token and append a download record.
    fn record_download(&self, request: RecordDownloadRequest) -> Result<Download, LedgerError>;

    fn get_downloads_for_product(&self, product_id: &str) -> Result<Vec<Download>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LedgerError::not_found(LedgerStage::UpdateProduct, "product", "p1");
        assert_eq!(
            err.to_string(),
            "ledger update_product failed: product not found: p1"
        );
        assert!(err.is_not_found());
        assert_eq!(err.entity_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_storage_error_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = LedgerError::storage(LedgerStage::Open, None, io);
        assert_eq!(err.kind, LedgerErrorKind::Storage);
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_create_request_builder() {
        let req = CreateProductRequest::new("p1", "topic")
            .with_content_hash("abc")
            .with_status(ProductStatus::Generated);
        assert_eq!(req.content_hash.as_deref(), Some("abc"));
        assert_eq!(req.status, Some(ProductStatus::Generated));
    }
}
