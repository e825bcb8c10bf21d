//! Live versions of the deployments in a namespace

use std::collections::BTreeMap;

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ServiceVersion};
use crate::output::{print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Pods")]
    pod_count: i32,
}

pub async fn show_versions(client: &ApiClient, namespace: &str, format: OutputFormat) -> Result<()> {
    let versions: BTreeMap<String, ServiceVersion> =
        client.get(&format!("api/services/{}", namespace)).await?;

    match format {
        OutputFormat::Json => print_json(&versions)?,
        OutputFormat::Table => {
            if versions.is_empty() {
                print_warning(&format!("No deployments found in {}", namespace));
                return Ok(());
            }

            let rows: Vec<VersionRow> = versions
                .into_values()
                .map(|v| VersionRow {
                    name: v.name,
                    version: v.version,
                    pod_count: v.pod_count,
                })
                .collect();
            let count = rows.len();
            print_table(rows);
            println!("\nTotal: {} deployments", count);
        }
    }

    Ok(())
}
