//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::oke::cascade::CascadeConfig;
use crate::oke::poller::PollConfig;
use crate::selector::Filters;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// OKE cluster and node pool upgrade cascade CLI tool.
///
/// Reads a previously generated version report and drives the selected
/// clusters and their node pools through upgrades, control plane first.
#[derive(Parser, Debug, Clone)]
#[command(name = "okup")]
#[command(about = "OKE cluster and node pool upgrade cascade CLI tool")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Path to the version report (JSON)
    pub report_path: PathBuf,

    /// Explicit Kubernetes version to upgrade to; defaults to the highest
    /// available version per cluster
    #[arg(short, long)]
    pub target_version: Option<String>,

    /// Only upgrade clusters for this project
    #[arg(long)]
    pub project: Option<String>,

    /// Only upgrade clusters for this stage
    #[arg(long)]
    pub stage: Option<String>,

    /// Only upgrade clusters in this region
    #[arg(long)]
    pub region: Option<String>,

    /// Only upgrade the cluster matching this name or OCID
    #[arg(short, long)]
    pub cluster: Option<String>,

    /// Only upgrade node pools matching this name or OCID (repeatable)
    #[arg(long = "node-pool", value_name = "NODE_POOL")]
    pub node_pools: Vec<String>,

    /// Show planned upgrades without calling the control plane
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,

    /// Maximum concurrent upgrade+poll sequences
    #[arg(long, default_value = "4")]
    pub max_parallel: usize,

    /// Seconds between status polls
    #[arg(long, default_value = "10")]
    pub poll_interval: u64,

    /// Minutes each target may take to reach a terminal state
    #[arg(long, default_value = "45")]
    pub poll_timeout: u64,

    /// Minutes for the whole run; unfinished targets time out on expiry
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Bearer token for the control plane (session setup happens outside
    /// this tool)
    #[arg(long, env = "OKUP_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Container Engine endpoint template; {region} is substituted per
    /// cluster
    #[arg(
        long,
        default_value = "https://containerengine.{region}.oraclecloud.com"
    )]
    pub endpoint_template: String,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub report_path: PathBuf,
    pub target_version: Option<String>,
    pub filters: Filters,
    pub dry_run: bool,
    pub verbose: bool,
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub auth_token: Option<String>,
    pub endpoint_template: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            report_path: args.report_path,
            target_version: args.target_version,
            filters: Filters {
                project: args.project,
                stage: args.stage,
                region: args.region,
                cluster: args.cluster,
                node_pools: args.node_pools,
            },
            dry_run: args.dry_run,
            verbose: args.verbose,
            max_parallel: args.max_parallel,
            poll_interval: Duration::from_secs(args.poll_interval),
            poll_timeout: Duration::from_secs(args.poll_timeout * 60),
            run_timeout: args.run_timeout.map(|m| Duration::from_secs(m * 60)),
            auth_token: args.auth_token,
            endpoint_template: args.endpoint_template,
        }
    }

    /// Default log level for the tracing filter.
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Scheduler configuration for this run.
    pub fn cascade_config(&self) -> CascadeConfig {
        CascadeConfig {
            max_parallel: self.max_parallel,
            poll: PollConfig {
                interval: self.poll_interval,
                deadline: self.poll_timeout,
                ..PollConfig::default()
            },
            run_deadline: self.run_timeout,
            dry_run: self.dry_run,
        }
    }
}
