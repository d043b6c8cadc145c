//! Cloud command implementation.

use super::types::CloudCommand;
use anyhow::{bail, Result};
use colored::Colorize;
use sitetune_core::cloud::{verify_setup, CheckOutcome, Endpoints, GcloudTokenProvider, GcpSettings};
use sitetune_core::SitetuneConfig;

pub async fn execute(command: CloudCommand, config: &SitetuneConfig) -> Result<()> {
    match command {
        CloudCommand::Verify { project, location, bucket } => {
            let Some(project) = project.or_else(|| config.gcp.project_id.clone()) else {
                bail!("GCP_PROJECT_ID must be set (or pass --project)");
            };
            let location = location.unwrap_or_else(|| config.location());
            let mut settings = GcpSettings::new(project, bucket.or_else(|| config.gcp.bucket_name.clone()).unwrap_or_default());
            settings.endpoints = Endpoints::for_location(&location);
            settings.location = location;

            let report = verify_setup(&settings, &GcloudTokenProvider::from_env()).await;

            println!();
            for step in &report.steps {
                match step.outcome {
                    CheckOutcome::Ok => println!("  {} {}", "✓".green(), step.message),
                    CheckOutcome::Warn => println!("  {} {}", "!".yellow(), step.message.yellow()),
                    CheckOutcome::Fail => println!("  {} {}", "✗".red(), step.message.red()),
                }
            }
            println!();

            if !report.is_ok() {
                bail!("Setup verification failed for project {}", report.project_id);
            }
            Ok(())
        }
    }
}
