//! Single-service sync

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthReport, SyncRequest, SyncResponse};
use crate::output::{
    color_status, format_timestamp, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "Type")]
    issue_type: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn sync_service(client: &ApiClient, request: &SyncRequest, format: OutputFormat) -> Result<()> {
    print_info(&format!(
        "Syncing {}/{} to {} ({} replicas)",
        request.namespace, request.service_name, request.desired_version, request.desired_pod_count
    ));

    let response: SyncResponse = client.post("api/sync", request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            match (&response.changes.image, &response.changes.replicas) {
                (None, None) => print_info("Deployment already matched; nothing patched"),
                (image, replicas) => {
                    if let Some(change) = image {
                        print_success(&format!("Image {} -> {}", change.from, change.to));
                    }
                    if let Some(change) = replicas {
                        print_success(&format!("Replicas {} -> {}", change.from, change.to));
                    }
                }
            }
            print_health(&response.health);
        }
    }

    Ok(())
}

/// Render a health report with its issues and suggested actions
pub fn print_health(report: &HealthReport) {
    println!(
        "\nHealth: {} ({})",
        color_status(&report.severity),
        format_timestamp(&report.detected_at)
    );
    if report.severity == "ok" {
        print_success(&report.summary);
        return;
    }
    print_warning(&report.summary);

    if !report.issues.is_empty() {
        let rows: Vec<IssueRow> = report
            .issues
            .iter()
            .map(|i| IssueRow {
                issue_type: i.issue_type.clone(),
                pod: i.pod_name.clone().unwrap_or_default(),
                container: i.container_name.clone().unwrap_or_default(),
                message: i.message.clone(),
            })
            .collect();
        print_table(rows);
    }

    if !report.suggested_actions.is_empty() {
        println!("\n{}", "Suggested actions:".bold());
        for action in &report.suggested_actions {
            println!("  {} {}", "•".blue(), action.title);
            println!("    {}", action.description);
            println!("    $ {}", action.remediation_hint.dimmed());
        }
    }
}
