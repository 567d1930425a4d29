//! Persistent ledger of products, orders and downloads.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteLedger;
pub use store::{
    ArtifactUpdate, CreateOrderRequest, CreateProductRequest, DeletionSummary, LedgerError,
    LedgerErrorKind, LedgerStage, LedgerStore, RecordDownloadRequest,
};
pub use types::{
    product_id, Download, Order, OrderStatus, Product, ProductMetadata, ProductStatus,
};
