use anyhow::Result;
use clap::{Parser, Subcommand};
use orgsync_sync::SyncConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "orgsync", version)]
#[command(about = "Reconcile directory profiles against the HR system of record")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass (default).
    Sync,
    /// Load configuration and policy tables without contacting any service.
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = orgsync_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} reconciled={} succeeded={} failed={} notified={}",
                summary.run_id, summary.reconciled, summary.succeeded, summary.failed, summary.notified
            );
        }
        Commands::Check => {
            let config = SyncConfig::from_env()?;
            tracing::info!(
                domain = %config.tables.org_domain,
                deny_listed = config.tables.deny_list.len(),
                aliases = config.tables.manager_email_aliases.len(),
                recipients = config.tables.notification.recipients.len(),
                batch_count = config.batch_count,
                "configuration loaded"
            );
            println!("configuration ok: graph={} report_dir={}", config.graph_base_url, config.report_dir.display());
        }
    }

    Ok(())
}
