//! okup - OKE cluster and node pool upgrade cascade.
//!
//! Reads an inventory report, resolves a target version per cluster and
//! node pool, and drives the upgrades against the Container Engine control
//! plane: clusters concurrently under a bounded pool, each cluster's node
//! pools strictly after its own upgrade completes.

pub mod config;
pub mod error;
pub mod oke;
pub mod output;
pub mod report;
pub mod selector;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::OkupError;
use crate::oke::cascade;
use crate::oke::client::RestControlPlane;
use crate::oke::outcome::RunSummary;

/// Run the full pipeline: load, select, resolve, cascade.
///
/// Run-level errors (unreadable report, bad filters, invalid override)
/// abort before any upgrade request goes out; per-target failures are
/// folded into the returned summary instead.
pub async fn run(config: &Config) -> Result<RunSummary, OkupError> {
    let report = report::load_report(&config.report_path)?;
    info!(
        "Loaded report: {} cluster(s), {} node pool(s)",
        report.clusters.len(),
        report.node_pools.len()
    );

    let selection = selector::select(&report, &config.filters)?;
    if selection.is_empty() {
        return Ok(RunSummary::default());
    }

    let plan = oke::resolver::resolve(&selection, config.target_version.as_deref())?;

    let auth_token = config.auth_token.clone().unwrap_or_default();
    if !config.dry_run && auth_token.is_empty() {
        return Err(OkupError::Validation(
            "a live run needs --auth-token (or OKUP_AUTH_TOKEN)".to_string(),
        ));
    }

    let client = Arc::new(RestControlPlane::for_selection(
        auth_token,
        config.endpoint_template.clone(),
        &selection,
    ));

    cascade::run_cascade(client, plan, &config.cascade_config()).await
}
