//! Run summary rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::oke::outcome::{OutcomeKind, RunSummary, TargetKey, UpgradeOutcome};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "WORK REQUEST")]
    work_request: String,
}

impl SummaryRow {
    fn from_outcome(outcome: &UpgradeOutcome) -> Self {
        let kind = match outcome.key {
            TargetKey::Cluster(_) => "cluster",
            TargetKey::NodePool { .. } => "node pool",
        };
        let version = match &outcome.target_version {
            Some(target) => format!("{} -> {}", outcome.current_version, target),
            None => outcome.current_version.clone(),
        };
        let outcome_text = match &outcome.kind {
            OutcomeKind::Failed(reason) => format!("failed: {}", reason),
            other => other.label().to_string(),
        };

        Self {
            kind,
            target: outcome.display_name.clone(),
            version,
            outcome: outcome_text,
            work_request: outcome.work_request_id.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Print the per-target table and the closing status line.
pub fn print_summary(summary: &RunSummary) {
    if summary.outcomes.is_empty() {
        println!(
            "{}",
            "No clusters matched the filters. Nothing to do.".yellow()
        );
        return;
    }

    let rows: Vec<SummaryRow> = summary.outcomes.iter().map(SummaryRow::from_outcome).collect();
    let table = Table::new(&rows).with(Style::sharp()).to_string();
    println!("{}", table);

    let skipped = summary.skipped_up_to_date + summary.skipped_dependency + summary.skipped_dry_run;
    let line = format!(
        "Summary: {} upgraded, {} failed, {} timed out, {} skipped (up-to-date {}, dependency {}, dry-run {}).",
        summary.succeeded,
        summary.failed,
        summary.timed_out,
        skipped,
        summary.skipped_up_to_date,
        summary.skipped_dependency,
        summary.skipped_dry_run,
    );

    println!();
    if summary.is_success() {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind, work_request: Option<&str>) -> UpgradeOutcome {
        UpgradeOutcome {
            key: TargetKey::cluster("c-1"),
            display_name: "payments-prod".to_string(),
            current_version: "v1.28.2".to_string(),
            target_version: Some("v1.30.1".to_string()),
            kind,
            work_request_id: work_request.map(|s| s.to_string()),
            issued_at: None,
            completed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_summary_row_succeeded() {
        let row = SummaryRow::from_outcome(&outcome(OutcomeKind::Succeeded, Some("wr-1")));
        assert_eq!(row.kind, "cluster");
        assert_eq!(row.target, "payments-prod");
        assert_eq!(row.version, "v1.28.2 -> v1.30.1");
        assert_eq!(row.outcome, "succeeded");
        assert_eq!(row.work_request, "wr-1");
    }

    #[test]
    fn test_summary_row_failed_includes_reason() {
        let row = SummaryRow::from_outcome(&outcome(
            OutcomeKind::Failed("work request wr-9 failed".to_string()),
            Some("wr-9"),
        ));
        assert_eq!(row.outcome, "failed: work request wr-9 failed");
    }

    #[test]
    fn test_summary_row_without_work_request() {
        let row = SummaryRow::from_outcome(&outcome(OutcomeKind::SkippedUpToDate, None));
        assert_eq!(row.work_request, "-");
        assert_eq!(row.outcome, "skipped (up to date)");
    }

    #[test]
    fn test_summary_row_node_pool_kind() {
        let mut o = outcome(OutcomeKind::SkippedDependencyNotReady, None);
        o.key = TargetKey::node_pool("c-1", "np-1");
        let row = SummaryRow::from_outcome(&o);
        assert_eq!(row.kind, "node pool");
    }
}
