//! End-to-end synchronization of SailPoint identities into the graph sink.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::batch::{BatchOutcome, BatchProcessor, RecordFailure};
use crate::client::RateLimitedHttpClient;
use crate::graph::{ApplicationGraph, GraphBuilder, PropertyType};
use crate::pagination::{PageQuery, PaginatedFetcher, RecordPager};
use crate::sink::{GraphSink, Provider, APPLICATION_TEMPLATE};
use crate::transform::{RawRecord, RecordTransformer};
use crate::{SailPointConfig, SailPointError, SailPointResult};

/// Step a run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Authenticating,
    ResolvingProvider,
    Fetching,
    Transforming,
    Pushing,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::ResolvingProvider => "resolving_provider",
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Pushing => "pushing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records that reached the graph as identities.
    pub processed_count: usize,
    /// Record-level failures across all batches.
    pub error_count: usize,
    /// Warnings returned by the graph sink, in order.
    pub warnings: Vec<String>,
    pub fetched_count: usize,
    pub batches: usize,
    pub identities: usize,
    pub groups: usize,
    pub grants: usize,
    pub failures: Vec<RecordFailure>,
    /// Whether the graph was pushed to the sink.
    pub pushed: bool,
}

impl SyncReport {
    fn add_batch(&mut self, outcome: BatchOutcome) {
        self.batches += 1;
        self.processed_count += outcome.processed;
        self.error_count += outcome.errors;
        self.failures.extend(outcome.failures);
    }
}

/// Drives one synchronization run: authenticate, resolve the provider,
/// fetch every record, fold them into a graph, push it.
///
/// A run either pushes a graph built from the complete record set or
/// pushes nothing. Record-level failures are counted, not fatal.
pub struct SyncOrchestrator {
    config: SailPointConfig,
    client: RateLimitedHttpClient,
    sink: Arc<dyn GraphSink>,
    processor: BatchProcessor,
    icon_base64: Option<String>,
    phase: SyncPhase,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("tenant", &self.config.tenant)
            .field("provider_name", &self.config.provider_name)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator for the configured tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: SailPointConfig, sink: Arc<dyn GraphSink>) -> SailPointResult<Self> {
        config.validate()?;
        let processor = BatchProcessor::new(
            RecordTransformer::new(config.transform.clone()),
            config.permissions.clone(),
        );
        let client = RateLimitedHttpClient::new(config.clone())?;
        Ok(Self {
            config,
            client,
            sink,
            processor,
            icon_base64: None,
            phase: SyncPhase::Idle,
        })
    }

    /// Sets the icon attached to a newly created provider.
    #[must_use]
    pub fn with_icon(mut self, icon_base64: impl Into<String>) -> Self {
        self.icon_base64 = Some(icon_base64.into());
        self
    }

    /// Phase of the current or last run.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[must_use]
    pub fn config(&self) -> &SailPointConfig {
        &self.config
    }

    /// Runs a full synchronization. With `force`, the provider is deleted and
    /// recreated first.
    ///
    /// # Errors
    ///
    /// Fails on authentication, provider lifecycle, fetch or push errors.
    /// Record-level failures are reported in the returned [`SyncReport`].
    #[instrument(skip(self), fields(tenant = %self.config.tenant))]
    pub async fn sync(&mut self, force: bool) -> SailPointResult<SyncReport> {
        let result = self.run(force, true).await;
        self.finish(result)
    }

    /// Authenticates, fetches and transforms without touching the sink.
    #[instrument(skip(self), fields(tenant = %self.config.tenant))]
    pub async fn dry_run(&mut self) -> SailPointResult<SyncReport> {
        let result = self.run(false, false).await;
        self.finish(result)
    }

    /// Fetches every record of `endpoint`, authenticating first if needed.
    pub async fn fetch(
        &self,
        endpoint: &str,
        query: PageQuery,
    ) -> SailPointResult<Vec<RawRecord>> {
        self.pager(endpoint, query).await?.collect_all().await
    }

    /// Starts a lazy pass over `endpoint`, authenticating first if needed.
    pub async fn pager(&self, endpoint: &str, query: PageQuery) -> SailPointResult<RecordPager<'_>> {
        if !self.client.session().is_authenticated().await {
            self.client.authenticate().await?;
        }
        Ok(PaginatedFetcher::new(&self.client).fetch(endpoint, query))
    }

    async fn run(&mut self, force: bool, push: bool) -> SailPointResult<SyncReport> {
        self.phase = SyncPhase::Authenticating;
        self.client.authenticate().await?;

        if push {
            self.phase = SyncPhase::ResolvingProvider;
            self.resolve_provider(force).await?;
        }

        self.phase = SyncPhase::Fetching;
        let endpoint = self.config.identities_endpoint.clone();
        let records = PaginatedFetcher::new(&self.client)
            .fetch(&endpoint, PageQuery::default())
            .collect_all()
            .await?;
        info!(endpoint = %endpoint, records = records.len(), "Fetched all records");

        self.phase = SyncPhase::Transforming;
        let (graph, mut report) = self.build_graph(&records);

        if push {
            self.phase = SyncPhase::Pushing;
            self.push(&graph, &mut report).await?;
        }

        Ok(report)
    }

    fn finish(&mut self, result: SailPointResult<SyncReport>) -> SailPointResult<SyncReport> {
        match &result {
            Ok(report) => {
                self.phase = SyncPhase::Done;
                info!(
                    processed = report.processed_count,
                    errors = report.error_count,
                    warnings = report.warnings.len(),
                    identities = report.identities,
                    groups = report.groups,
                    pushed = report.pushed,
                    "Sync completed"
                );
                if report.error_count > 0 {
                    warn!(
                        errors = report.error_count,
                        "Sync completed with record errors"
                    );
                }
            }
            Err(err) => {
                error!(phase = %self.phase, error = %err, "Sync failed");
                self.phase = SyncPhase::Failed;
            }
        }
        result
    }

    async fn resolve_provider(&self, force: bool) -> SailPointResult<Provider> {
        let name = self.config.provider_name.as_str();

        if force {
            if let Some(existing) = self
                .sink
                .get_provider(name)
                .await
                .map_err(SailPointError::Sink)?
            {
                info!(provider = name, provider_id = %existing.id, "Deleting provider");
                self.sink
                    .delete_provider(&existing.id)
                    .await
                    .map_err(SailPointError::Sink)?;
            }
        }

        if let Some(provider) = self
            .sink
            .get_provider(name)
            .await
            .map_err(SailPointError::Sink)?
        {
            info!(provider = name, provider_id = %provider.id, "Found existing provider");
            return Ok(provider);
        }

        let provider = self
            .sink
            .create_provider(name, APPLICATION_TEMPLATE)
            .await
            .map_err(SailPointError::Sink)?;
        info!(provider = name, provider_id = %provider.id, "Created provider");

        if let Some(icon) = &self.icon_base64 {
            if let Err(err) = self.sink.update_icon(&provider.id, icon).await {
                warn!(provider_id = %provider.id, error = %err, "Failed to attach provider icon");
            }
        }
        Ok(provider)
    }

    fn new_graph(&self) -> GraphBuilder {
        let mut graph = GraphBuilder::new(self.config.provider_name.clone())
            .with_description(format!(
                "Identities of SailPoint IdentityNow tenant {}",
                self.config.tenant
            ))
            .with_property("sailpoint_id", PropertyType::String)
            .with_property("email", PropertyType::String)
            .with_property("status", PropertyType::String);
        self.processor.policy().define_permissions(&mut graph);
        graph
    }

    fn build_graph(&self, records: &[RawRecord]) -> (ApplicationGraph, SyncReport) {
        let mut graph = self.new_graph();
        let mut report = SyncReport {
            fetched_count: records.len(),
            ..SyncReport::default()
        };

        for (number, batch) in records.chunks(self.config.batch_size.max(1)).enumerate() {
            let outcome = self.processor.process(batch, &mut graph);
            info!(
                batch = number + 1,
                size = batch.len(),
                processed = outcome.processed,
                errors = outcome.errors,
                "Batch done"
            );
            report.add_batch(outcome);
        }

        report.identities = graph.identity_count();
        report.groups = graph.group_count();
        report.grants = graph.grant_count();
        (graph.finish(), report)
    }

    async fn push(&self, graph: &ApplicationGraph, report: &mut SyncReport) -> SailPointResult<()> {
        let data_source = self.config.data_source_name();
        info!(
            provider = %self.config.provider_name,
            data_source = %data_source,
            identities = graph.identities.len(),
            "Pushing graph"
        );

        match self
            .sink
            .push(&self.config.provider_name, &data_source, graph)
            .await
        {
            Ok(response) => {
                for warning in &response.warnings {
                    warn!(warning = %warning, "Graph sink warning");
                }
                report.warnings.extend(response.warnings);
                report.pushed = true;
                Ok(())
            }
            Err(err) => {
                error!(status = ?err.status_code, message = %err.message, "Push rejected");
                for detail in &err.details {
                    error!(detail = %detail, "Push error detail");
                }
                Err(SailPointError::SinkPush(err))
            }
        }
    }
}
