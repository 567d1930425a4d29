//! Promotion routine shared by the control loop and the retry worker.
//!
//! Only channels missing from `posted_channels` are dispatched, so running
//! it twice for the same product does not post twice.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clock::Clock;
use super::types::OrchestratorError;
use crate::collaborators::{DispatchResults, Dispatcher};
use crate::ledger::{LedgerError, LedgerStore, Product, ProductMetadata, ProductStatus};

/// What a promotion attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Every configured channel is posted; the product is now PROMOTED.
    Promoted { posted: Vec<String> },
    /// Some channels were posted, others still pending.
    Partial {
        posted: Vec<String>,
        pending: Vec<String>,
    },
    /// The dispatcher failed; the product is now PROMOTION_FAILED.
    Failed { error: String },
}

/// Dispatches pending promotion channels and records the result in the ledger.
#[derive(Clone)]
pub struct Promoter {
    ledger: Arc<dyn LedgerStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    channels: Vec<String>,
}

impl Promoter {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        channels: Vec<String>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            clock,
            channels,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Configured channels the product has not been posted to.
    pub fn pending_channels(&self, product: &Product) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| !product.metadata.is_posted(c))
            .cloned()
            .collect()
    }

    /// Dispatch the product's pending channels.
    pub async fn promote(&self, product: &Product) -> Result<PromotionOutcome, LedgerError> {
        let pending = self.pending_channels(product);
        if pending.is_empty() {
            debug!(product_id = %product.id, "All channels already posted");
            self.mark_promoted(&product.id, BTreeSet::new())?;
            return Ok(PromotionOutcome::Promoted { posted: Vec::new() });
        }

        let results = match self.dispatcher.dispatch(&product.id, Some(&pending)).await {
            Ok(results) => results,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "Promotion dispatch failed");
                self.ledger.update_product_status(
                    &product.id,
                    ProductStatus::PromotionFailed,
                    Some(ProductMetadata::failure("promotion", e.to_string())),
                )?;
                return Ok(PromotionOutcome::Failed {
                    error: e.to_string(),
                });
            }
        };

        let posted = successful(&pending, &results);
        let still_pending: Vec<String> = pending
            .iter()
            .filter(|c| !posted.contains(*c))
            .cloned()
            .collect();

        for channel in &still_pending {
            let reason = results
                .get(channel)
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "no result".to_string());
            warn!(product_id = %product.id, channel = %channel, reason = %reason, "Channel not posted");
        }

        if still_pending.is_empty() {
            self.mark_promoted(&product.id, posted.iter().cloned().collect())?;
            info!(product_id = %product.id, channels = ?posted, "Product promoted");
            Ok(PromotionOutcome::Promoted { posted })
        } else {
            if !posted.is_empty() {
                self.record_posted(&product.id, posted.iter().cloned().collect())?;
            }
            Ok(PromotionOutcome::Partial {
                posted,
                pending: still_pending,
            })
        }
    }

    /// Re-dispatch every configured channel regardless of what was posted.
    pub async fn boost(&self, product: &Product) -> Result<Vec<String>, OrchestratorError> {
        let results = self
            .dispatcher
            .dispatch(&product.id, Some(&self.channels))
            .await?;
        let posted = successful(&self.channels, &results);

        if !posted.is_empty() {
            let meta = ProductMetadata {
                boost_count: Some(product.metadata.boost_count.unwrap_or(0) + 1),
                last_boosted_at: Some(self.clock.now()),
                ..Default::default()
            };
            self.ledger.merge_product_metadata(&product.id, meta)?;
        }
        info!(product_id = %product.id, channels = ?posted, "Boosted product");
        Ok(posted)
    }

    /// Union `posted` into the stored set, re-reading to narrow the race with
    /// other promoters.
    fn merged_posted(
        &self,
        id: &str,
        posted: BTreeSet<String>,
    ) -> Result<BTreeSet<String>, LedgerError> {
        let mut current = self
            .ledger
            .get_product(id)?
            .and_then(|p| p.metadata.posted_channels)
            .unwrap_or_default();
        current.extend(posted);
        Ok(current)
    }

    fn record_posted(&self, id: &str, posted: BTreeSet<String>) -> Result<(), LedgerError> {
        let merged = self.merged_posted(id, posted)?;
        self.ledger.merge_product_metadata(
            id,
            ProductMetadata::new().with_posted_channels(merged),
        )?;
        Ok(())
    }

    fn mark_promoted(&self, id: &str, posted: BTreeSet<String>) -> Result<(), LedgerError> {
        let merged = self.merged_posted(id, posted)?;
        let meta = ProductMetadata {
            promoted_at: Some(self.clock.now()),
            ..ProductMetadata::new().with_posted_channels(merged)
        };
        self.ledger
            .update_product_status(id, ProductStatus::Promoted, Some(meta))?;
        Ok(())
    }
}

fn successful(requested: &[String], results: &DispatchResults) -> Vec<String> {
    requested
        .iter()
        .filter(|c| results.get(*c).is_some_and(|r| r.ok))
        .cloned()
        .collect()
}
