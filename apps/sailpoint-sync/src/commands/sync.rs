//! Synchronize identities into the graph sink.

use clap::Args;
use std::sync::Arc;
use tracing::{info, warn};

use xavyo_connector_sailpoint::{
    DiscardSink, GraphSink, OaaClient, OaaConfig, PermissionPolicy, SailPointConfig,
    SyncOrchestrator, SyncReport,
};

use crate::error::AppResult;

/// Synchronize SailPoint identities into the graph sink
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Delete and recreate the provider before pushing
    #[arg(long)]
    pub force: bool,

    /// Verify TLS certificates even if VERIFY_SSL=false
    #[arg(long)]
    pub verify_ssl: bool,

    /// Fetch and transform without contacting the graph sink
    #[arg(long)]
    pub dry_run: bool,

    /// Grant the admin permission to identities whose title contains this keyword
    #[arg(long)]
    pub admin_keyword: Option<String>,

    /// Base64 encoded icon attached to a newly created provider
    #[arg(long, env = "SAILPOINT_ICON_BASE64", hide_env_values = true)]
    pub icon_base64: Option<String>,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs) -> AppResult<()> {
    let mut config = SailPointConfig::from_env()?;
    if args.verify_ssl {
        config.verify_ssl = true;
    }
    if let Some(keyword) = args.admin_keyword {
        config.permissions = PermissionPolicy::default().with_admin_keyword(keyword);
    }
    if !config.verify_ssl {
        warn!("SSL certificate verification is disabled");
    }

    let sink: Arc<dyn GraphSink> = if args.dry_run {
        Arc::new(DiscardSink)
    } else {
        let mut oaa = OaaConfig::from_env()?;
        oaa.verify_ssl = config.verify_ssl;
        Arc::new(OaaClient::new(oaa)?)
    };

    let mut orchestrator = SyncOrchestrator::new(config, sink)?;
    if let Some(icon) = args.icon_base64 {
        orchestrator = orchestrator.with_icon(icon);
    }

    let report = if args.dry_run {
        orchestrator.dry_run().await?
    } else {
        orchestrator.sync(args.force).await?
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    info!(
        fetched = report.fetched_count,
        batches = report.batches,
        grants = report.grants,
        "Run summary"
    );
    println!(
        "Processed {} identities with {} errors ({} groups, {} warnings){}",
        report.processed_count,
        report.error_count,
        report.groups,
        report.warnings.len(),
        if report.pushed { "" } else { " [not pushed]" }
    );
}
