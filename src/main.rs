use std::time::Duration;

use anyhow::{bail, Context, Result};

use broken_link_analyzer::config::Config;
use broken_link_analyzer::lifecycle;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    lifecycle::init_logging();

    let project_ids = std::env::args()
        .skip(1)
        .map(|arg| {
            arg.parse::<i64>()
                .with_context(|| format!("Invalid project id: {}", arg))
        })
        .collect::<Result<Vec<_>>>()?;
    if project_ids.is_empty() {
        bail!("usage: broken-link-analyzer <project_id>...");
    }

    let config = Config::from_env()?;
    let service = lifecycle::setup(&config).await?;

    for &project_id in &project_ids {
        let started = service.start_analysis(project_id).await?;
        tracing::info!(
            "Project {}: {:?} (task {})",
            project_id,
            started.status,
            started.task_id.as_deref().unwrap_or("-")
        );
    }

    for &project_id in &project_ids {
        loop {
            let status = service.get_status(project_id).await?;
            if !status.is_analyzing {
                if let Some(error) = &status.error_message {
                    tracing::error!("Project {} failed: {}", project_id, error);
                }
                break;
            }
            tracing::info!(
                "Project {}: {}/{} links checked",
                project_id,
                status.progress,
                status.total_links
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let report = service.get_results(project_id).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
