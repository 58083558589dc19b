//! SailPoint IdentityNow connector for xavyo
//!
//! This crate synchronizes SailPoint IdentityNow identities into an
//! authorization graph exposed through the Veza Open Authorization API.
//!
//! # Features
//!
//! - `OAuth2` client credentials authentication
//! - Request spacing and exponential backoff on transient failures
//! - Offset pagination with total-count and empty-page termination
//! - Per-record failure isolation while building the graph
//! - Provider find-or-create, forced recreation and data source push
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xavyo_connector_sailpoint::{OaaClient, OaaConfig, SailPointConfig, SyncOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SailPointConfig::from_env()?;
//! let sink = OaaClient::new(OaaConfig::from_env()?)?;
//!
//! let mut orchestrator = SyncOrchestrator::new(config, Arc::new(sink))?;
//! let report = orchestrator.sync(false).await?;
//! println!("{} identities, {} errors", report.processed_count, report.error_count);
//! # Ok(())
//! # }
//! ```

mod auth;
mod batch;
mod client;
mod config;
mod error;
mod graph;
mod oaa;
mod pagination;
mod rate_limit;
mod retry;
mod sink;
mod sync;
mod transform;

// Re-exports
pub use auth::{AuthSession, Token};
pub use batch::{
    BatchOutcome, BatchProcessor, PermissionPolicy, RecordError, RecordFailure, ACCESS_PERMISSION,
    ADMIN_PERMISSION,
};
pub use client::{ApiResponse, RateLimitedHttpClient, TOTAL_COUNT_HEADER};
pub use config::{
    ConfigError, OaaConfig, SailPointConfig, SailPointCredentials, DEFAULT_BATCH_SIZE,
    DEFAULT_PROVIDER_NAME, IDENTITIES_ENDPOINT, MAX_PAGE_SIZE,
};
pub use error::{SailPointError, SailPointResult};
pub use graph::{
    ApplicationGraph, GrantScope, GraphBuilder, GraphError, Group, GroupRef, Identity, Membership,
    PermissionDefinition, PermissionGrant, PermissionKind, PropertyType, APPLICATION_TYPE,
};
pub use oaa::{application_payload, OaaClient};
pub use pagination::{PageQuery, PaginatedFetcher, RecordPager};
pub use rate_limit::RequestSpacer;
pub use retry::RetryPolicy;
pub use sink::{DiscardSink, GraphSink, Provider, PushResponse, SinkError, APPLICATION_TEMPLATE};
pub use sync::{SyncOrchestrator, SyncPhase, SyncReport};
pub use transform::{
    custom_property_name, EpochUnit, RawRecord, RecordTransformer, TransformOptions,
    ValidationError,
};
