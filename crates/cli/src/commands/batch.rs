//! Batch start, control and status commands

use std::path::Path;

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::{ApiClient, BatchAccepted, BatchRequest, BatchService, BatchState, ClusterTarget};
use crate::output::{color_status, print_info, print_json, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Batch")]
    batch_id: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Paused At")]
    paused_at: String,
}

impl From<&BatchState> for BatchRow {
    fn from(s: &BatchState) -> Self {
        Self {
            batch_id: s.batch_id.clone(),
            namespace: s.namespace.clone(),
            status: color_status(&s.status),
            progress: format!("{}/{}", s.processed, s.total),
            paused_at: s.paused_at_service.clone().unwrap_or_default(),
        }
    }
}

/// Read a batch file: a JSON array of `{name, desiredVersion, desiredPodCount}`
pub fn read_batch_file(path: &Path) -> Result<Vec<BatchService>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    let services: Vec<BatchService> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch file {}", path.display()))?;
    anyhow::ensure!(!services.is_empty(), "Batch file {} lists no services", path.display());
    Ok(services)
}

pub async fn start_batch(
    client: &ApiClient,
    namespace: &str,
    file: &Path,
    target: ClusterTarget,
    format: OutputFormat,
) -> Result<()> {
    let request = BatchRequest {
        namespace: namespace.to_string(),
        services: read_batch_file(file)?,
        target,
    };

    let accepted: BatchAccepted = client.post("api/batches", &request).await?;

    match format {
        OutputFormat::Json => print_json(&accepted)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Batch {} started with {} services",
                accepted.batch_id, accepted.total
            ));
            print_info(&format!("Follow it with: rgctl batch status {}", accepted.batch_id));
        }
    }

    Ok(())
}

pub async fn resume_batch(client: &ApiClient, batch_id: &str, format: OutputFormat) -> Result<()> {
    let state: BatchState = client
        .post_empty(&format!("api/batches/{}/resume", batch_id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&state)?,
        OutputFormat::Table => print_success(&format!("Batch {} resumed", batch_id)),
    }

    Ok(())
}

pub async fn cancel_batch(client: &ApiClient, batch_id: &str, format: OutputFormat) -> Result<()> {
    let state: BatchState = client
        .post_empty(&format!("api/batches/{}/cancel", batch_id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&state)?,
        OutputFormat::Table => print_warning(&format!(
            "Batch {} cancelled after {}/{} services",
            batch_id, state.processed, state.total
        )),
    }

    Ok(())
}

/// Show one batch, or every active batch when no id is given
pub async fn show_status(client: &ApiClient, batch_id: Option<&str>, format: OutputFormat) -> Result<()> {
    let states: Vec<BatchState> = match batch_id {
        Some(id) => vec![client.get(&format!("api/batches/{}", id)).await?],
        None => client.get("api/batches").await?,
    };

    match format {
        OutputFormat::Json => match batch_id {
            Some(_) => print_json(&states[0])?,
            None => print_json(&states)?,
        },
        OutputFormat::Table => {
            if states.is_empty() {
                print_info("No active batches");
                return Ok(());
            }
            print_table(states.iter().map(BatchRow::from).collect::<Vec<_>>());
        }
    }

    Ok(())
}
