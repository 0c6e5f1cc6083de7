//! Status command: observed vs. desired, read-only.

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::orchestrate;
use crate::infra::eksctl::EksctlCluster;
use crate::output::json;

/// Run the status command.
///
/// # Errors
///
/// Returns an error if the desired-state file cannot be loaded.
pub async fn run(app: &AppContext) -> Result<()> {
    let cluster = EksctlCluster::default_runner();
    let status = orchestrate::status(&app.config, &cluster).await?;

    if app.is_json() {
        println!("{}", json::format_status(&status.cluster_name, &status.pair)?);
        return Ok(());
    }

    let ctx = &app.output;
    ctx.header(&format!("{} ({})", status.cluster_name, status.region));
    ctx.state_pair("status", &status.pair);
    if status.pair.converged() {
        ctx.success("converged");
    } else {
        ctx.warn("not converged; run 'cluster-gitops apply'");
    }
    Ok(())
}
