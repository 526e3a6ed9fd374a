//! End-to-end reconciliation run: read both sources, join, write back, report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use orgsync_adapters::{
    DirectoryApi, DirectoryFilters, DirectoryReader, GraphClient, RecordQuery,
    SalesforceClient, SorSchema, SystemOfRecordReader,
};
use orgsync_storage::{
    ClientCredentialsProvider, HttpClientConfig, HttpFetcher, ReportStore, Throttle, TokenProvider,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod notify;
pub mod reconcile;

pub use audit::{render_csv, AuditError, AuditReporter, ReportOutcome, ReportSettings};
pub use config::{PolicyTables, SyncConfig};
pub use dispatch::{split_batches, UpdateDispatcher, UpdateError, DEFAULT_BATCH_COUNT, MAX_BATCH_COUNT};
pub use notify::{Notice, NoticeAttachment, NotificationError, Notifier, SmtpNotifier, SmtpSettings};
pub use reconcile::{cloud_only, outer_join, EmailAlias, JoinProvenance, JoinedRow, Reconciler};

pub const CRATE_NAME: &str = "orgsync-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub roster_records: usize,
    pub cloud_records: usize,
    pub hr_profiles: usize,
    pub reconciled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub report_sha256: String,
    pub notified: bool,
}

/// External collaborators of a run.
pub struct PipelineParts {
    pub directory: Box<dyn DirectoryApi>,
    pub directory_tokens: Box<dyn TokenProvider>,
    pub records: Box<dyn RecordQuery>,
    pub notifier: Box<dyn Notifier>,
    pub throttle: Box<dyn Throttle>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub filters: DirectoryFilters,
    pub sor_schema: SorSchema,
    pub aliases: Vec<EmailAlias>,
    pub batch_count: usize,
    pub report_dir: PathBuf,
    pub report: ReportSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            filters: config.tables.directory_filters(),
            sor_schema: config.tables.sor_schema.clone(),
            aliases: config.tables.manager_email_aliases.clone(),
            batch_count: config.batch_count,
            report_dir: config.report_dir.clone(),
            report: config.tables.report_settings(),
        }
    }
}

pub struct SyncPipeline {
    settings: PipelineSettings,
    parts: PipelineParts,
    store: ReportStore,
}

impl SyncPipeline {
    /// Wire the live Graph, Salesforce and SMTP clients from `config`.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;

        let directory = GraphClient::new(http.clone(), &config.graph_base_url)?;
        let tokens = ClientCredentialsProvider::new(http.clone(), config.graph.clone());
        let records = SalesforceClient::new(
            http,
            config.salesforce.clone(),
            config.salesforce_api_version.clone(),
        );

        let parts = PipelineParts {
            directory: Box::new(directory),
            directory_tokens: Box::new(tokens),
            records: Box::new(records),
            notifier: Box::new(SmtpNotifier::new(config.smtp.clone())),
            throttle: Box::new(config.delays),
        };
        Ok(Self::from_parts(PipelineSettings::from_config(&config), parts))
    }

    pub fn from_parts(settings: PipelineSettings, parts: PipelineParts) -> Self {
        let store = ReportStore::new(settings.report_dir.clone());
        Self {
            settings,
            parts,
            store,
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.run_stages(run_id, started_at)
            .instrument(tracing::info_span!("sync_run", %run_id))
            .await
    }

    async fn run_stages(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<SyncRunSummary> {
        info!(report_dir = %self.store.dir().display(), "sync run started");

        let roster = DirectoryReader::new(
            self.parts.directory.as_ref(),
            self.parts.directory_tokens.as_ref(),
            &self.settings.filters,
        )
        .fetch_roster()
        .await
        .context("reading directory roster")?;
        let roster_records = roster.len();
        let cloud = reconcile::cloud_only(roster);
        let cloud_records = cloud.len();

        let profiles = SystemOfRecordReader::new(
            self.parts.records.as_ref(),
            &self.settings.sor_schema,
            &self.settings.filters.deny_list,
        )
        .fetch_active_profiles()
        .await
        .context("reading hr profiles")?;
        let hr_profiles = profiles.len();

        let reconciled = Reconciler::new(self.settings.aliases.clone()).reconcile(cloud, profiles);
        info!(reconciled = reconciled.len(), "records ready for update");

        let token = self
            .parts
            .directory_tokens
            .acquire()
            .await
            .context("acquiring directory token for updates")?;
        let entries = UpdateDispatcher::new(
            self.parts.directory.as_ref(),
            self.parts.throttle.as_ref(),
            self.settings.batch_count,
        )
        .with_token_refresh(self.parts.directory_tokens.as_ref())
        .apply_updates(&token, &reconciled)
        .await;
        let succeeded = entries.iter().filter(|e| e.is_success()).count();

        let outcome = AuditReporter::new(&self.store, self.parts.notifier.as_ref(), &self.settings.report)
            .publish(started_at, &entries)
            .await
            .context("publishing audit report")?;

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            roster_records,
            cloud_records,
            hr_profiles,
            reconciled: reconciled.len(),
            succeeded,
            failed: entries.len() - succeeded,
            report_sha256: outcome.sha256,
            notified: outcome.notified,
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            notified = summary.notified,
            "sync run finished"
        );
        Ok(summary)
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    SyncPipeline::new(config)?.run_once().await
}

