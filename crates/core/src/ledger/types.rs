//! Ledger domain types: products, orders and downloads.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Derive the stable product id for a topic.
///
/// The id is the first 16 hex chars of SHA-256 over `"{salt}:{topic}"`, with the
/// topic trimmed and lowercased so cosmetic differences map to the same product.
pub fn product_id(topic: &str, salt: &str) -> String {
    let normalized = topic.trim().to_lowercase();
    let digest = Sha256::digest(format!("{}:{}", salt, normalized).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Status of a product in the pipeline.
///
/// The known variants cover the conventional vocabulary. Anything else read from
/// storage is preserved verbatim in `Other` so older rows still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProductStatus {
    Draft,
    Generating,
    Generated,
    QaPassed,
    Packaged,
    WaitingForDeployment,
    Deploying,
    Published,
    Promoted,
    Archived,
    QaFailed,
    GenerationFailed,
    DeploymentFailed,
    PromotionFailed,
    PipelineFailed,
    Other(String),
}

impl ProductStatus {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "DRAFT",
            Self::Generating => "GENERATING",
            Self::Generated => "GENERATED",
            Self::QaPassed => "QA_PASSED",
            Self::Packaged => "PACKAGED",
            Self::WaitingForDeployment => "WAITING_FOR_DEPLOYMENT",
            Self::Deploying => "DEPLOYING",
            Self::Published => "PUBLISHED",
            Self::Promoted => "PROMOTED",
            Self::Archived => "ARCHIVED",
            Self::QaFailed => "QA_FAILED",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::DeploymentFailed => "DEPLOYMENT_FAILED",
            Self::PromotionFailed => "PROMOTION_FAILED",
            Self::PipelineFailed => "PIPELINE_FAILED",
            Self::Other(s) => s,
        }
    }

    /// The `<STAGE>_FAILED` status for a pipeline stage name.
    pub fn failed_at_stage(stage: &str) -> Self {
        Self::from(format!("{}_FAILED", stage.trim().to_uppercase()))
    }

    /// Whether this is a failure status (any status containing `FAILED`).
    pub fn is_failed(&self) -> bool {
        self.as_str().contains("FAILED")
    }

    /// Position along the happy path. `None` for statuses that sit off it.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Draft => Some(0),
            Self::Generating => Some(1),
            Self::Generated => Some(2),
            Self::QaPassed => Some(3),
            Self::Packaged => Some(4),
            Self::WaitingForDeployment => Some(5),
            Self::Deploying => Some(6),
            Self::Published => Some(7),
            Self::Promoted => Some(8),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Only a move backwards along the happy path is refused; failure statuses,
    /// `ARCHIVED` and unknown statuses may go anywhere.
    pub fn can_transition_to(&self, next: &ProductStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to >= from,
            _ => true,
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ProductStatus {
    fn from(s: &str) -> Self {
        match s {
            "DRAFT" => Self::Draft,
            "GENERATING" => Self::Generating,
            "GENERATED" => Self::Generated,
            "QA_PASSED" => Self::QaPassed,
            "PACKAGED" => Self::Packaged,
            "WAITING_FOR_DEPLOYMENT" => Self::WaitingForDeployment,
            "DEPLOYING" => Self::Deploying,
            "PUBLISHED" => Self::Published,
            "PROMOTED" => Self::Promoted,
            "ARCHIVED" => Self::Archived,
            "QA_FAILED" => Self::QaFailed,
            "GENERATION_FAILED" => Self::GenerationFailed,
            "DEPLOYMENT_FAILED" => Self::DeploymentFailed,
            "PROMOTION_FAILED" => Self::PromotionFailed,
            "PIPELINE_FAILED" => Self::PipelineFailed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ProductStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ProductStatus> for String {
    fn from(status: ProductStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Product metadata: a few well-known fields plus an open `extra` bag.
///
/// Merging is a shallow union. Fields set in the delta win, fields left `None`
/// keep their current value, and `extra` keys are unioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_channels: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_boosted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heal_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProductMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure at the given stage.
    pub fn failure(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            error: Some(error.into()),
            failed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_deployment_url(mut self, url: impl Into<String>) -> Self {
        self.deployment_url = Some(url.into());
        self
    }

    pub fn with_posted_channels(mut self, channels: BTreeSet<String>) -> Self {
        self.posted_channels = Some(channels);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Whether a promotion channel is already marked as posted.
    pub fn is_posted(&self, channel: &str) -> bool {
        self.posted_channels
            .as_ref()
            .is_some_and(|posted| posted.contains(channel))
    }

    /// Parse a stored metadata blob without losing any of its keys.
    ///
    /// Another writer may store a known key in a different shape. Such keys
    /// are kept verbatim in `extra` so a later write puts them back unchanged.
    /// A blob that is not a JSON object is kept under `raw_metadata`.
    pub fn from_stored(raw: &str) -> Self {
        if let Ok(metadata) = serde_json::from_str(raw) {
            return metadata;
        }

        let map = match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(map) => map,
            Err(_) => {
                return Self::new().with_extra("raw_metadata", Value::String(raw.to_string()))
            }
        };

        let mut metadata = Self::default();
        for (key, value) in map {
            let mut single = Map::new();
            single.insert(key.clone(), value.clone());
            match serde_json::from_value::<ProductMetadata>(Value::Object(single)) {
                Ok(parsed) => metadata.merge(parsed),
                Err(_) => {
                    metadata.extra.insert(key, value);
                }
            }
        }
        metadata
    }

    /// Known keys paired with whether their typed field is set.
    fn typed_keys(&self) -> [(&'static str, bool); 10] {
        [
            ("deployment_url", self.deployment_url.is_some()),
            ("error", self.error.is_some()),
            ("stage", self.stage.is_some()),
            ("failed_at", self.failed_at.is_some()),
            ("posted_channels", self.posted_channels.is_some()),
            ("promoted_at", self.promoted_at.is_some()),
            ("boost_count", self.boost_count.is_some()),
            ("last_boosted_at", self.last_boosted_at.is_some()),
            ("heal_attempts", self.heal_attempts.is_some()),
            ("price", self.price.is_some()),
        ]
    }

    /// Shallow-merge `delta` into `self`.
    pub fn merge(&mut self, delta: ProductMetadata) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.deployment_url, delta.deployment_url);
        take(&mut self.error, delta.error);
        take(&mut self.stage, delta.stage);
        take(&mut self.failed_at, delta.failed_at);
        take(&mut self.posted_channels, delta.posted_channels);
        take(&mut self.promoted_at, delta.promoted_at);
        take(&mut self.boost_count, delta.boost_count);
        take(&mut self.last_boosted_at, delta.last_boosted_at);
        take(&mut self.heal_attempts, delta.heal_attempts);
        take(&mut self.price, delta.price);
        self.extra.extend(delta.extra);

        // A typed value replaces a raw one kept under the same key.
        for (key, set) in self.typed_keys() {
            if set {
                self.extra.remove(key);
            }
        }
    }
}

/// A generated artifact tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub topic: String,
    pub status: ProductStatus,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub package_path: Option<String>,
    pub checksum: Option<String>,
    /// Dedup key for generated content.
    pub content_hash: Option<String>,
    pub metadata: ProductMetadata,
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Soft reference; the product may have been deleted.
    pub product_id: String,
    pub customer_email: String,
    pub amount: f64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_details: Option<Value>,
    pub download_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub token_used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the download token can still be redeemed at `now`.
    pub fn token_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Paid
            && self.download_token.is_some()
            && !self.token_used
            && self.token_expiry.is_some_and(|expiry| now < expiry)
    }
}

/// One redeemed download. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: i64,
    pub order_id: String,
    pub product_id: String,
    pub download_time: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub token_used: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_id_is_deterministic() {
        let a = product_id("Rust Async Patterns", "salt");
        let b = product_id("  rust async patterns ", "salt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, product_id("Rust Async Patterns", "other-salt"));
    }

    #[test]
    fn test_status_roundtrip_and_unknown() {
        assert_eq!(
            ProductStatus::from("WAITING_FOR_DEPLOYMENT"),
            ProductStatus::WaitingForDeployment
        );
        let legacy = ProductStatus::from("QA_RETRY");
        assert_eq!(legacy, ProductStatus::Other("QA_RETRY".to_string()));
        assert_eq!(legacy.as_str(), "QA_RETRY");

        let json = serde_json::to_string(&ProductStatus::Published).unwrap();
        assert_eq!(json, "\"PUBLISHED\"");
    }

    #[test]
    fn test_failed_statuses() {
        assert!(ProductStatus::DeploymentFailed.is_failed());
        assert!(ProductStatus::from("UPLOAD_FAILED").is_failed());
        assert!(!ProductStatus::Published.is_failed());
        assert_eq!(
            ProductStatus::failed_at_stage("deployment"),
            ProductStatus::DeploymentFailed
        );
    }

    #[test]
    fn test_transitions() {
        use ProductStatus::*;
        assert!(WaitingForDeployment.can_transition_to(&Published));
        assert!(Published.can_transition_to(&Published));
        assert!(!Promoted.can_transition_to(&WaitingForDeployment));
        assert!(Published.can_transition_to(&PromotionFailed));
        assert!(DeploymentFailed.can_transition_to(&WaitingForDeployment));
        assert!(Promoted.can_transition_to(&Archived));
        assert!(Other("LEGACY".into()).can_transition_to(&Draft));
    }

    #[test]
    fn test_metadata_merge_is_shallow_union() {
        let mut meta = ProductMetadata::new()
            .with_deployment_url("https://a")
            .with_extra("niche", json!("dev"));

        meta.merge(ProductMetadata::failure("deployment", "rate limited"));
        meta.merge(ProductMetadata::new().with_extra("score", json!(9)));

        assert_eq!(meta.deployment_url.as_deref(), Some("https://a"));
        assert_eq!(meta.error.as_deref(), Some("rate limited"));
        assert_eq!(meta.extra.get("niche"), Some(&json!("dev")));
        assert_eq!(meta.extra.get("score"), Some(&json!(9)));
    }

    #[test]
    fn test_metadata_extra_flattens() {
        let meta: ProductMetadata =
            serde_json::from_str(r#"{"deployment_url":"https://x","custom":{"a":1}}"#).unwrap();
        assert_eq!(meta.deployment_url.as_deref(), Some("https://x"));
        assert_eq!(meta.extra.get("custom"), Some(&json!({"a": 1})));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back, json!({"deployment_url": "https://x", "custom": {"a": 1}}));
    }

    #[test]
    fn test_stored_metadata_keeps_mistyped_known_keys() {
        let meta = ProductMetadata::from_stored(
            r#"{"niche":"dev","price":"9.99","boost_count":-1,"deployment_url":"https://x"}"#,
        );
        assert_eq!(meta.deployment_url.as_deref(), Some("https://x"));
        assert_eq!(meta.price, None);
        assert_eq!(meta.extra.get("price"), Some(&json!("9.99")));
        assert_eq!(meta.extra.get("boost_count"), Some(&json!(-1)));
        assert_eq!(meta.extra.get("niche"), Some(&json!("dev")));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            back,
            json!({"niche": "dev", "price": "9.99", "boost_count": -1, "deployment_url": "https://x"})
        );
    }

    #[test]
    fn test_typed_value_replaces_raw_key() {
        let mut meta = ProductMetadata::from_stored(r#"{"price":"9.99"}"#);
        meta.merge(ProductMetadata {
            price: Some(12.5),
            ..Default::default()
        });
        assert_eq!(meta.price, Some(12.5));
        assert!(meta.extra.get("price").is_none());
        assert_eq!(serde_json::to_value(&meta).unwrap(), json!({"price": 12.5}));
    }

    #[test]
    fn test_stored_metadata_that_is_not_an_object() {
        let meta = ProductMetadata::from_stored("not json");
        assert_eq!(meta.extra.get("raw_metadata"), Some(&json!("not json")));
    }

    #[test]
    fn test_token_redeemable() {
        let now = Utc::now();
        let mut order = Order {
            id: "o1".into(),
            product_id: "p1".into(),
            customer_email: "a@b.c".into(),
            amount: 9.0,
            currency: "USD".into(),
            status: OrderStatus::Paid,
            payment_details: None,
            download_token: Some("tok".into()),
            token_expiry: Some(now + chrono::Duration::hours(1)),
            token_used: false,
            created_at: now,
            updated_at: now,
        };
        assert!(order.token_redeemable(now));

        order.token_used = true;
        assert!(!order.token_redeemable(now));

        order.token_used = false;
        assert!(!order.token_redeemable(now + chrono::Duration::hours(2)));
    }
}
