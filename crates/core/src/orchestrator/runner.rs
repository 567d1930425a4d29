//! Orchestrator control loop.
//!
//! Each tick runs a fixed sequence of steps:
//! 1. Verify companion services
//! 2. Ingest external triggers
//! 3. Retry deployments waiting for the publisher
//! 4. Audit and re-optimize (every N ticks)
//! 5. Emit a health report
//! 6. Promote published products
//! 7. Run the generator
//! 8. Promote products created during this tick
//! 9. Boost one promoted product (every M ticks)
//! 10. Auto-heal failed products
//!
//! Steps catch their own errors. A tick with a failed step counts toward the
//! circuit breaker; once it opens the next tick only sleeps the cool-down.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    Auditor, ConsistencyAuditor, Dispatcher, ErrorAnalysisHook, GenerateRequest, Generator,
    NoopErrorAnalysis, Publisher, PublishResults, TriggerKind, TriggerSource,
};
use crate::ledger::{
    product_id, CreateProductRequest, LedgerStore, Product, ProductMetadata, ProductStatus,
};
use crate::status::{RunState, StatusDocument, StatusReporter};
use crate::supervisor::{ServiceSupervisor, SupervisorReport};

use super::breaker::{BreakerState, CircuitBreaker};
use super::clock::{Clock, SystemClock};
use super::config::OrchestratorConfig;
use super::promotion::{Promoter, PromotionOutcome};
use super::types::{
    HealthReport, OrchestratorError, RunSummary, Step, StepOutcome, StepRecord, TickReport,
};

/// State shared by the steps of one tick.
struct TickContext {
    tick: u64,
    /// Wall-clock start, compared against ledger timestamps.
    discovered_since: DateTime<Utc>,
    /// Products already dispatched this tick.
    dispatched: HashSet<String>,
}

struct LoopState {
    tick: u64,
    started_at: DateTime<Utc>,
    last_log: Option<String>,
    last_report: Option<HealthReport>,
    last_services: Option<SupervisorReport>,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    ledger: Arc<dyn LedgerStore>,
    generator: Arc<dyn Generator>,
    status: StatusReporter,
    services: Option<Arc<ServiceSupervisor>>,
    publisher: Option<Arc<dyn Publisher>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    analysis: Arc<dyn ErrorAnalysisHook>,
    triggers: Option<Arc<dyn TriggerSource>>,
    auditor: Arc<dyn Auditor>,
    clock: Arc<dyn Clock>,
}

impl OrchestratorBuilder {
    pub fn services(mut self, services: Arc<ServiceSupervisor>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn error_analysis(mut self, analysis: Arc<dyn ErrorAnalysisHook>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn triggers(mut self, triggers: Arc<dyn TriggerSource>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub fn auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Orchestrator {
        let (shutdown_tx, _) = broadcast::channel(1);
        let promoter = self.dispatcher.map(|dispatcher| {
            Promoter::new(
                Arc::clone(&self.ledger),
                dispatcher,
                Arc::clone(&self.clock),
                self.config.promotion_channels.clone(),
            )
        });
        let breaker = CircuitBreaker::new(self.config.failure_threshold, self.config.cooldown());
        let started_at = self.clock.now();

        Orchestrator {
            config: self.config,
            ledger: self.ledger,
            generator: self.generator,
            status: self.status,
            services: self.services,
            publisher: self.publisher,
            promoter,
            analysis: self.analysis,
            triggers: self.triggers,
            auditor: self.auditor,
            clock: self.clock,
            breaker: Mutex::new(breaker),
            state: RwLock::new(LoopState {
                tick: 0,
                started_at,
                last_log: None,
                last_report: None,
                last_services: None,
            }),
            stopping: AtomicBool::new(false),
            shutdown_tx,
        }
    }
}

/// The control loop driving products through the pipeline.
pub struct Orchestrator {
    config: OrchestratorConfig,
    ledger: Arc<dyn LedgerStore>,
    generator: Arc<dyn Generator>,
    status: StatusReporter,
    services: Option<Arc<ServiceSupervisor>>,
    publisher: Option<Arc<dyn Publisher>>,
    promoter: Option<Promoter>,
    analysis: Arc<dyn ErrorAnalysisHook>,
    triggers: Option<Arc<dyn TriggerSource>>,
    auditor: Arc<dyn Auditor>,
    clock: Arc<dyn Clock>,

    // Runtime state
    breaker: Mutex<CircuitBreaker>,
    state: RwLock<LoopState>,
    stopping: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Start building an orchestrator with its required parts.
    pub fn builder(
        config: OrchestratorConfig,
        ledger: Arc<dyn LedgerStore>,
        generator: Arc<dyn Generator>,
        status: StatusReporter,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            ledger,
            generator,
            status,
            services: None,
            publisher: None,
            dispatcher: None,
            analysis: Arc::new(NoopErrorAnalysis),
            triggers: None,
            auditor: Arc::new(ConsistencyAuditor),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Ask the loop to stop. Observed between steps and during waits.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Orchestrator shutdown requested");
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver notified when [`Orchestrator::shutdown`] is called.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub async fn tick_count(&self) -> u64 {
        self.state.read().await.tick
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.breaker.lock().await.consecutive_failures()
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().await.state()
    }

    pub async fn last_report(&self) -> Option<HealthReport> {
        self.state.read().await.last_report.clone()
    }

    /// Run ticks until shutdown or until `max_runs` ticks have run.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        self.note("Orchestrator started").await;
        self.publish_status(RunState::Running, "starting").await;

        while !self.is_stopping() {
            let report = self.tick().await;
            summary.ticks += 1;
            if report.cooled_down {
                summary.cooldowns += 1;
            } else if report.failed() {
                summary.failed_ticks += 1;
            }

            if self.config.max_runs > 0 && summary.ticks >= self.config.max_runs {
                info!(ticks = summary.ticks, "Reached max runs");
                break;
            }
            if self.is_stopping() {
                break;
            }
            if report.cooled_down {
                continue;
            }

            let elapsed = (self.clock.now() - report.started_at)
                .to_std()
                .unwrap_or_default();
            let wait = self
                .config
                .interval()
                .saturating_sub(elapsed)
                .max(self.config.min_wait());
            debug!(wait_secs = wait.as_secs(), "Waiting for next tick");
            self.publish_status(RunState::Running, "idle").await;
            if !self.idle(wait).await {
                break;
            }
        }

        self.note(format!(
            "Orchestrator stopped after {} ticks ({} failed)",
            summary.ticks, summary.failed_ticks
        ))
        .await;
        self.publish_status(RunState::Stopped, "stopped").await;
        summary
    }

    /// Record an unrecoverable error in the status document.
    pub async fn mark_crashed(&self, error: &str) {
        error!(error, "Orchestrator crashed");
        self.state.write().await.last_log = Some(format!("crashed: {}", error));
        self.publish_status(RunState::Crashed, "crashed").await;
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickReport {
        let tick = {
            let mut state = self.state.write().await;
            state.tick += 1;
            state.tick
        };
        let started_at = self.clock.now();

        let cooldown = {
            let breaker = self.breaker.lock().await;
            breaker.is_open().then(|| breaker.cooldown())
        };
        if let Some(cooldown) = cooldown {
            self.note(format!(
                "Circuit breaker open, cooling down for {}s",
                cooldown.as_secs()
            ))
            .await;
            self.publish_status(RunState::CoolingDown, "cooldown").await;
            let completed = self.pause(cooldown).await;
            if completed {
                self.breaker.lock().await.cooled_down();
            }
            return TickReport {
                tick,
                started_at,
                finished_at: self.clock.now(),
                cooled_down: true,
                interrupted: !completed,
                steps: Vec::new(),
            };
        }

        info!(tick, "Tick started");
        let mut ctx = TickContext {
            tick,
            discovered_since: Utc::now(),
            dispatched: HashSet::new(),
        };
        let mut steps = Vec::with_capacity(Step::ALL.len());
        let mut interrupted = false;

        for step in Step::ALL {
            if self.is_stopping() {
                interrupted = true;
                break;
            }
            self.publish_status(RunState::Running, step.as_str()).await;
            let outcome = match self.run_step(step, &mut ctx).await {
                Ok(true) => StepOutcome::Completed,
                Ok(false) => StepOutcome::Skipped,
                Err(e) => {
                    error!(tick, step = %step, error = %e, "Step failed");
                    StepOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            steps.push(StepRecord { step, outcome });
        }

        let report = TickReport {
            tick,
            started_at,
            finished_at: self.clock.now(),
            cooled_down: false,
            interrupted,
            steps,
        };

        let failed = report.failed();
        if failed || !interrupted {
            let tripped = self.breaker.lock().await.record(failed, report.finished_at);
            if tripped {
                self.note(format!(
                    "Circuit breaker tripped after tick {}; next tick cools down",
                    tick
                ))
                .await;
            }
        }

        let failures = report
            .steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .count();
        self.note(format!(
            "Tick {} finished with {} failed step(s)",
            tick, failures
        ))
        .await;
        report
    }

    /// Returns `Ok(false)` when the step was skipped.
    async fn run_step(&self, step: Step, ctx: &mut TickContext) -> Result<bool, OrchestratorError> {
        match step {
            Step::VerifyServices => self.verify_services().await,
            Step::IngestTriggers => self.ingest_triggers().await,
            Step::RetryDeployments => self.retry_deployments().await,
            Step::Audit => self.audit(ctx.tick).await,
            Step::Report => self.report(ctx.tick).await.map(|_| true),
            Step::Promote => self.promote_published(ctx).await,
            Step::Generate => {
                let request = GenerateRequest::new(self.config.batch, &self.config.topic);
                self.generate(&request).await.map(|_| true)
            }
            Step::PromoteNew => self.promote_new(ctx).await,
            Step::Boost => self.boost(ctx.tick).await,
            Step::AutoHeal => self.auto_heal().await,
        }
    }

    /// Step 1: make sure every companion service is reachable.
    ///
    /// Fails only when restarts were needed and none of them succeeded.
    pub async fn verify_services(&self) -> Result<bool, OrchestratorError> {
        let Some(services) = &self.services else {
            return Ok(false);
        };
        if services.services().is_empty() {
            return Ok(false);
        }

        let report = services.ensure_all().await;
        let restarted = report.restarted();
        if !restarted.is_empty() {
            self.note(format!("Restarted services: {}", restarted.join(", ")))
                .await;
        }
        let outcome = if report.all_restarts_failed() {
            Err(OrchestratorError::ServicesDown(
                report.failed().into_iter().map(str::to_string).collect(),
            ))
        } else {
            Ok(true)
        };
        self.state.write().await.last_services = Some(report);
        outcome
    }

    /// Step 2: act on externally requested redeliveries and recreations.
    async fn ingest_triggers(&self) -> Result<bool, OrchestratorError> {
        let Some(source) = &self.triggers else {
            return Ok(false);
        };

        for trigger in source.poll().await? {
            let result = match trigger.kind {
                TriggerKind::Redeliver => self.redeliver(&trigger.product_id).await,
                TriggerKind::Recreate => {
                    self.recreate(&trigger.product_id, trigger.topic.as_deref())
                        .await
                }
            };
            if let Err(e) = result {
                warn!(product_id = %trigger.product_id, kind = ?trigger.kind, error = %e, "Trigger failed");
            }
        }
        Ok(true)
    }

    async fn redeliver(&self, id: &str) -> Result<(), OrchestratorError> {
        if self.ledger.get_product(id)?.is_none() {
            warn!(product_id = %id, "Redeliver requested for unknown product");
            return Ok(());
        }
        self.republish(&[id.to_string()]).await?;
        Ok(())
    }

    async fn recreate(&self, id: &str, topic: Option<&str>) -> Result<(), OrchestratorError> {
        let (id, topic) = match self.ledger.get_product(id)? {
            Some(product) => (product.id, product.topic),
            None => match topic {
                Some(topic) => {
                    let id = product_id(topic, &self.config.id_salt);
                    self.ledger
                        .create_product(CreateProductRequest::new(&id, topic))?;
                    (id, topic.to_string())
                }
                None => {
                    warn!(product_id = %id, "Recreate requested for unknown product without topic");
                    return Ok(());
                }
            },
        };

        self.generate(&GenerateRequest::new(1, &topic)).await?;
        self.requeue(&id).await
    }

    /// Step 3: deploy every product waiting for deployment.
    async fn retry_deployments(&self) -> Result<bool, OrchestratorError> {
        let Some(publisher) = self.publisher.as_ref().filter(|_| self.config.deploy) else {
            return Ok(false);
        };

        let waiting = self
            .ledger
            .get_products_by_status(&ProductStatus::WaitingForDeployment)?;
        if waiting.is_empty() {
            return Ok(true);
        }

        let ids: Vec<String> = waiting.into_iter().map(|p| p.id).collect();
        info!(count = ids.len(), "Retrying deployments");
        let results = publisher.publish_batch(&ids).await?;
        let published = self.apply_publish_results(&ids, &results);
        self.note(format!("Deployed {}/{} waiting products", published, ids.len()))
            .await;
        Ok(true)
    }

    /// Deploy `ids` right away. Returns false when deployment is unavailable.
    async fn republish(&self, ids: &[String]) -> Result<bool, OrchestratorError> {
        let Some(publisher) = self.publisher.as_ref().filter(|_| self.config.deploy) else {
            debug!(?ids, "Deployment disabled, not republishing");
            return Ok(false);
        };
        let results = publisher.publish_batch(ids).await?;
        self.apply_publish_results(ids, &results);
        Ok(true)
    }

    /// Record per-id deployment results. Returns how many were published.
    fn apply_publish_results(&self, ids: &[String], results: &PublishResults) -> usize {
        let mut published = 0;
        for id in ids {
            let update = match results.get(id) {
                Some(result) if result.is_published() => {
                    let mut meta = ProductMetadata::new();
                    meta.deployment_url = result.url.clone();
                    self.ledger
                        .update_product_status(id, ProductStatus::Published, Some(meta))
                        .map(|_| published += 1)
                }
                Some(result) => {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("publisher returned {}", result.status));
                    warn!(product_id = %id, error = %error, "Deployment failed");
                    self.ledger
                        .update_product_status(
                            id,
                            ProductStatus::DeploymentFailed,
                            Some(ProductMetadata::failure("deployment", error)),
                        )
                        .map(|_| ())
                }
                None => {
                    warn!(product_id = %id, "Publisher returned no result");
                    Ok(())
                }
            };
            if let Err(e) = update {
                warn!(product_id = %id, error = %e, "Failed to record deployment result");
            }
        }
        published
    }

    /// Step 4: audit every product and re-optimize prices.
    async fn audit(&self, tick: u64) -> Result<bool, OrchestratorError> {
        if !OrchestratorConfig::fires_on(self.config.audit_every, tick) {
            return Ok(false);
        }
        let products = self.ledger.get_all_products()?;
        let summary = self.auditor.audit_and_optimize(&products).await?;
        for issue in &summary.issues {
            warn!(issue = %issue, "Audit issue");
        }
        self.note(format!(
            "Audit checked {} products, repriced {}, found {} issue(s)",
            summary.checked,
            summary.repriced,
            summary.issues.len()
        ))
        .await;
        Ok(true)
    }

    /// Step 5: snapshot ledger counts and loop health.
    async fn report(&self, tick: u64) -> Result<HealthReport, OrchestratorError> {
        let counts_by_status = self.ledger.count_by_status()?;
        let (consecutive_failures, breaker) = {
            let breaker = self.breaker.lock().await;
            (breaker.consecutive_failures(), breaker.label().to_string())
        };

        let mut state = self.state.write().await;
        let report = HealthReport {
            tick,
            total_products: counts_by_status.values().sum(),
            counts_by_status,
            consecutive_failures,
            breaker,
            services: state.last_services.clone(),
            generated_at: self.clock.now(),
        };
        info!(
            tick,
            total = report.total_products,
            counts = ?report.counts_by_status,
            consecutive_failures,
            "Health report"
        );
        state.last_report = Some(report.clone());
        Ok(report)
    }

    fn promoter(&self) -> Option<&Promoter> {
        self.promoter.as_ref().filter(|_| self.config.publish)
    }

    /// Step 6: promote every published product.
    async fn promote_published(&self, ctx: &mut TickContext) -> Result<bool, OrchestratorError> {
        let Some(promoter) = self.promoter() else {
            return Ok(false);
        };
        let published = self
            .ledger
            .get_products_by_status(&ProductStatus::Published)?;
        self.promote_each(promoter, published, ctx).await;
        Ok(true)
    }

    /// Step 8: promote products created since this tick started.
    async fn promote_new(&self, ctx: &mut TickContext) -> Result<bool, OrchestratorError> {
        let Some(promoter) = self.promoter() else {
            return Ok(false);
        };
        let fresh: Vec<Product> = self
            .ledger
            .get_products_created_since(ctx.discovered_since)?
            .into_iter()
            .filter(|p| p.status == ProductStatus::Published && !ctx.dispatched.contains(&p.id))
            .collect();
        if !fresh.is_empty() {
            info!(count = fresh.len(), "Promoting newly published products");
        }
        self.promote_each(promoter, fresh, ctx).await;
        Ok(true)
    }

    async fn promote_each(&self, promoter: &Promoter, products: Vec<Product>, ctx: &mut TickContext) {
        for product in products {
            ctx.dispatched.insert(product.id.clone());
            match promoter.promote(&product).await {
                Ok(PromotionOutcome::Promoted { .. }) => {
                    self.note(format!("Promoted {}", product.id)).await;
                }
                Ok(outcome) => debug!(product_id = %product.id, ?outcome, "Promotion incomplete"),
                Err(e) => warn!(product_id = %product.id, error = %e, "Promotion failed"),
            }
        }
    }

    /// Step 7 and regeneration: run the generator, with one fix-and-retry.
    async fn generate(&self, request: &GenerateRequest) -> Result<(), OrchestratorError> {
        let outcome = self.generator.generate(request).await?;
        if outcome.succeeded() {
            return Ok(());
        }

        let error = outcome.describe();
        warn!(error = %error, "Generation failed, asking for a fix");
        let context = outcome.tail.join("\n");
        let proposal = match self.analysis.analyze_and_fix(&error, &context).await {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(error = %e, "Error analysis failed");
                return Err(self.pipeline_failure(error).await);
            }
        };

        if proposal.confidence < self.config.min_fix_confidence {
            info!(
                confidence = proposal.confidence,
                threshold = self.config.min_fix_confidence,
                "Fix confidence too low, not retrying"
            );
            return Err(self.pipeline_failure(error).await);
        }

        match self.analysis.apply_fix(&proposal).await {
            Ok(true) => info!(summary = %proposal.summary, "Applied fix, retrying generation"),
            Ok(false) => return Err(self.pipeline_failure(error).await),
            Err(e) => {
                warn!(error = %e, "Applying fix failed");
                return Err(self.pipeline_failure(error).await);
            }
        }

        let retry = self.generator.generate(request).await?;
        if retry.succeeded() {
            self.note("Generation recovered after automatic fix").await;
            Ok(())
        } else {
            Err(self.pipeline_failure(retry.describe()).await)
        }
    }

    async fn pipeline_failure(&self, error: String) -> OrchestratorError {
        self.note(format!("Pipeline failure: {}", error)).await;
        OrchestratorError::PipelineFailure(error)
    }

    /// Step 9: re-promote one random promoted product.
    async fn boost(&self, tick: u64) -> Result<bool, OrchestratorError> {
        if !OrchestratorConfig::fires_on(self.config.boost_every, tick) {
            return Ok(false);
        }
        let Some(promoter) = self.promoter() else {
            return Ok(false);
        };

        let promoted = self
            .ledger
            .get_products_by_status(&ProductStatus::Promoted)?;
        let picked = {
            let mut rng = rand::thread_rng();
            promoted.choose(&mut rng).cloned()
        };
        let Some(product) = picked else {
            debug!("No promoted products to boost");
            return Ok(true);
        };

        promoter.boost(&product).await?;
        self.note(format!("Boosted {}", product.id)).await;
        Ok(true)
    }

    /// Step 10: send failed products back through deployment or generation.
    async fn auto_heal(&self) -> Result<bool, OrchestratorError> {
        let failed = self.ledger.get_failed_products()?;
        for product in failed {
            let attempts = product.metadata.heal_attempts.unwrap_or(0);
            if attempts >= self.config.max_heal_attempts {
                debug!(product_id = %product.id, attempts, "Heal attempts exhausted");
                continue;
            }
            if let Err(e) = self.heal(&product, attempts).await {
                warn!(product_id = %product.id, error = %e, "Auto-heal failed");
            }
        }
        Ok(true)
    }

    fn needs_republish(&self, product: &Product) -> bool {
        let error = product
            .metadata
            .error
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        self.config
            .republish_markers
            .iter()
            .any(|marker| error.contains(&marker.to_lowercase()))
    }

    async fn heal(&self, product: &Product, attempts: u32) -> Result<(), OrchestratorError> {
        let republish = self.needs_republish(product);
        if republish && (self.publisher.is_none() || !self.config.deploy) {
            debug!(product_id = %product.id, "Republish needed but deployment disabled");
            return Ok(());
        }

        self.ledger.merge_product_metadata(
            &product.id,
            ProductMetadata {
                heal_attempts: Some(attempts + 1),
                ..Default::default()
            },
        )?;

        if republish {
            info!(product_id = %product.id, status = %product.status, "Healing by republish");
            self.republish(&[product.id.clone()]).await?;
        } else {
            info!(product_id = %product.id, status = %product.status, "Healing by regeneration");
            self.generate(&GenerateRequest::new(1, &product.topic)).await?;
            self.requeue(&product.id).await?;
        }
        Ok(())
    }

    /// Queue a regenerated product for deployment.
    ///
    /// Products already past deployment cannot move back, so they are
    /// republished directly.
    async fn requeue(&self, id: &str) -> Result<(), OrchestratorError> {
        let Some(product) = self.ledger.get_product(id)? else {
            return Ok(());
        };
        if product
            .status
            .can_transition_to(&ProductStatus::WaitingForDeployment)
        {
            self.ledger
                .update_product_status(id, ProductStatus::WaitingForDeployment, None)?;
        } else {
            self.republish(&[id.to_string()]).await?;
        }
        Ok(())
    }

    /// Wait `total`, re-verifying services at least every `idle_check`.
    ///
    /// Returns false if shutdown was requested.
    async fn idle(&self, total: Duration) -> bool {
        let deadline = self.clock.now() + chrono::Duration::from_std(total).unwrap_or_default();
        loop {
            let remaining = (deadline - self.clock.now()).to_std().unwrap_or_default();
            if remaining.is_zero() {
                return true;
            }
            if !self.pause(remaining.min(self.config.idle_check())).await {
                return false;
            }
            if self.clock.now() < deadline {
                if let Err(e) = self.verify_services().await {
                    warn!(error = %e, "Service check during idle wait failed");
                }
            }
        }
    }

    /// Sleep through the clock. Returns false if interrupted by shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_stopping() {
            return false;
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => !self.is_stopping(),
            _ = shutdown_rx.recv() => false,
        }
    }

    async fn note(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.state.write().await.last_log = Some(message);
    }

    async fn publish_status(&self, status: RunState, phase: &str) {
        let (consecutive_failures, breaker) = {
            let breaker = self.breaker.lock().await;
            (breaker.consecutive_failures(), breaker.label().to_string())
        };
        let doc = {
            let state = self.state.read().await;
            StatusDocument {
                status: Some(status),
                phase: Some(phase.to_string()),
                pid: Some(std::process::id()),
                last_log: state.last_log.clone(),
                last_updated: Some(self.clock.now()),
                started_at: Some(state.started_at),
                tick: Some(state.tick),
                consecutive_failures: Some(consecutive_failures),
                breaker: Some(breaker),
                report: state
                    .last_report
                    .as_ref()
                    .and_then(|r| serde_json::to_value(r).ok()),
            }
        };
        self.status.publish(&doc).await;
    }
}
