// Run report rendering

use crate::run::RunSummary;
use chrono::DateTime;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn render_run_report(summary: &RunSummary, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_run_report(summary)),
        ReportFormat::Json => serde_json::to_string_pretty(summary),
    }
}

pub fn generate_run_report(summary: &RunSummary) -> String {
    let mut report = String::new();
    report.push_str(RULE);
    report.push_str(&format!(
        "# Run: {} ({})\n",
        summary.scraper_name, summary.scraper_id
    ));
    report.push_str(&format!("  Started: {}\n", format_time(summary.started_at)));
    report.push_str(&format!(
        "  Duration: {}s\n",
        summary.finished_at - summary.started_at
    ));
    if summary.cancelled {
        report.push_str("  Cancelled before completion\n");
    }
    report.push('\n');

    report.push_str("# Discovered:\n");
    report.push_str(&format!("  Total items: {}\n", summary.total_discovered()));
    for (config_type, count) in &summary.discovered {
        report.push_str(&format!("  {:<50} {}\n", config_type, count));
    }
    if summary.analyses > 0 {
        report.push_str(&format!("  Analyses: {}\n", summary.analyses));
    }
    report.push('\n');

    let merge = &summary.merge;
    report.push_str("# Merge:\n");
    report.push_str(&format!("  Created: {}\n", merge.created));
    report.push_str(&format!("  Updated: {}\n", merge.updated));
    report.push_str(&format!("  Relationships: {}\n", merge.relationships));
    if merge.unresolved > 0 {
        report.push_str(&format!("  Unresolved references: {}\n", merge.unresolved));
    }
    if merge.analyses > 0 || merge.resolved_analyses > 0 {
        report.push_str(&format!(
            "  Analyses: {} open, {} resolved\n",
            merge.analyses, merge.resolved_analyses
        ));
    }
    if merge.pruned {
        report.push_str(&format!("  Detached: {}\n", merge.detached));
        report.push_str(&format!("  Deleted: {}\n", merge.deleted));
        if merge.unverified_scopes > 0 {
            report.push_str(&format!(
                "  Stale items kept for {} failed categories\n",
                merge.unverified_scopes
            ));
        }
    } else {
        report.push_str("  Stale items kept (run had errors)\n");
    }

    if !summary.errors.is_empty() {
        report.push('\n');
        report.push_str(&format!("# Errors ({}):\n", summary.errors.len()));
        for err in &summary.errors {
            report.push_str(&format!("  {}\n", err));
        }
    }

    report.push('\n');
    report.push_str(RULE);
    report
}

pub fn format_time(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MergeSummary;
    use estate_scanner::error::{ErrorKind, ResultError};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn summary() -> RunSummary {
        RunSummary {
            scraper_id: Uuid::nil(),
            scraper_name: "azure-0a1b2c3d".into(),
            started_at: 1_700_000_000,
            finished_at: 1_700_000_004,
            discovered: BTreeMap::from([
                ("Azure::Microsoft.Compute/virtualMachines".to_string(), 2),
                ("Azure::Microsoft.Resources/resourceGroups".to_string(), 1),
            ]),
            analyses: 0,
            errors: vec![ResultError {
                kind: ErrorKind::CategoryFetch,
                category: Some("loadBalancers".into()),
                message: "failed to read loadBalancers page: throttled".into(),
                scope: None,
            }],
            merge: MergeSummary {
                created: 3,
                relationships: 4,
                ..Default::default()
            },
            cancelled: false,
        }
    }

    #[test]
    fn test_text_report_sections() {
        let report = generate_run_report(&summary());
        assert!(report.contains("# Run: azure-0a1b2c3d"));
        assert!(report.contains("Started: 2023-11-14 22:13:20 UTC"));
        assert!(report.contains("Duration: 4s"));
        assert!(report.contains("Total items: 3"));
        assert!(report.contains("Created: 3"));
        assert!(report.contains("Stale items kept"));
        assert!(report.contains("# Errors (1):"));
        assert!(report.contains("[category_fetch] failed to read loadBalancers page"));
    }

    #[test]
    fn test_text_report_scoped_pruning() {
        let mut summary = summary();
        summary.analyses = 2;
        summary.merge = MergeSummary {
            analyses: 2,
            pruned: true,
            deleted: 1,
            unverified_scopes: 1,
            ..Default::default()
        };
        let report = generate_run_report(&summary);
        assert!(report.contains("Total items: 3"));
        assert!(report.contains("Analyses: 2 open, 0 resolved"));
        assert!(report.contains("Deleted: 1"));
        assert!(report.contains("Stale items kept for 1 failed categories"));
        assert!(!report.contains("run had errors"));
    }

    #[test]
    fn test_json_report() {
        let raw = render_run_report(&summary(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["merge"]["created"], 3);
        assert_eq!(value["errors"][0]["kind"], "category_fetch");
        assert_eq!(value["discovered"]["Azure::Microsoft.Compute/virtualMachines"], 2);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ReportFormat::parse("JSON"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("csv"), None);
    }
}
