use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use orgsync_adapters::{DenyList, DirectoryFilters, SalesforceCredentials, SorSchema};
use orgsync_storage::{ClientCredentials, FixedDelayThrottle};
use serde::Deserialize;

use crate::audit::ReportSettings;
use crate::dispatch::{DEFAULT_BATCH_COUNT, MAX_BATCH_COUNT};
use crate::notify::SmtpSettings;
use crate::reconcile::EmailAlias;

/// Organization policy loaded from YAML: which accounts are in scope, how
/// legacy addresses map, and who receives the report.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyTables {
    pub org_domain: String,
    #[serde(default)]
    pub deny_list: Vec<String>,
    #[serde(default)]
    pub manager_email_aliases: Vec<EmailAlias>,
    pub notification: NotificationTable,
    #[serde(default)]
    pub sor_schema: SorSchema,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationTable {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_report_stem")]
    pub report_file_stem: String,
}

fn default_report_stem() -> String {
    "directory_profile_updates".to_string()
}

impl PolicyTables {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let tables: Self = serde_yaml::from_str(text).context("parsing policy tables")?;
        if tables.org_domain.trim().is_empty() {
            return Err(anyhow!("policy tables: org_domain is empty"));
        }
        Ok(tables)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading policy tables {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn directory_filters(&self) -> DirectoryFilters {
        DirectoryFilters {
            org_domain: self.org_domain.clone(),
            deny_list: DenyList::new(&self.deny_list),
        }
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            file_stem: self.notification.report_file_stem.clone(),
            recipients: self.notification.recipients.clone(),
            subject: self.notification.subject.clone(),
            body: self.notification.body.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub graph: ClientCredentials,
    pub graph_base_url: String,
    pub salesforce: SalesforceCredentials,
    pub salesforce_api_version: String,
    pub smtp: SmtpSettings,
    pub batch_count: usize,
    pub delays: FixedDelayThrottle,
    pub report_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub tables: PolicyTables,
}

/// Reads configuration values by name.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| anyhow!("missing required environment variable {name}"))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|err| anyhow!("invalid {name}={raw:?}: {err}")),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };

        let graph = ClientCredentials {
            authority_host: env.or("GRAPH_AUTHORITY_HOST", "https://login.microsoftonline.com"),
            tenant_id: env.required("GRAPH_TENANT_ID")?,
            client_id: env.required("GRAPH_CLIENT_ID")?,
            client_secret: env.required("GRAPH_CLIENT_SECRET")?,
            scope: env.or("GRAPH_SCOPE", "https://graph.microsoft.com/.default"),
        };

        let salesforce = SalesforceCredentials {
            login_url: env.or("SF_LOGIN_URL", "https://login.salesforce.com"),
            client_id: env.required("SF_CLIENT_ID")?,
            client_secret: env.required("SF_CLIENT_SECRET")?,
            username: env.required("SF_USERNAME")?,
            password: env.required("SF_PASSWORD")?,
            security_token: env.optional("SF_SECURITY_TOKEN").unwrap_or_default(),
        };

        let smtp_user = env.required("SMTP_USER")?;
        let smtp = SmtpSettings {
            host: env.required("SMTP_HOST")?,
            port: env.parsed("SMTP_PORT", 587)?,
            from: env.optional("SMTP_FROM").unwrap_or_else(|| smtp_user.clone()),
            username: smtp_user,
            password: env.required("SMTP_PASSWORD")?,
        };

        let batch_count: usize = env.parsed("ORGSYNC_BATCH_COUNT", DEFAULT_BATCH_COUNT)?;
        if !(1..=MAX_BATCH_COUNT).contains(&batch_count) {
            return Err(anyhow!(
                "ORGSYNC_BATCH_COUNT must be between 1 and {MAX_BATCH_COUNT}, got {batch_count}"
            ));
        }

        let tables_path = PathBuf::from(env.or("ORGSYNC_TABLES", "./config/orgsync.yaml"));
        let tables = PolicyTables::load(&tables_path)?;

        Ok(Self {
            graph,
            graph_base_url: env.or("GRAPH_BASE_URL", "https://graph.microsoft.com/v1.0"),
            salesforce,
            salesforce_api_version: env.or("SF_API_VERSION", "v59.0"),
            smtp,
            batch_count,
            delays: FixedDelayThrottle {
                after_patch: Duration::from_secs(env.parsed("ORGSYNC_PATCH_DELAY_SECS", 3)?),
                after_record: Duration::from_secs(env.parsed("ORGSYNC_RECORD_DELAY_SECS", 5)?),
            },
            report_dir: PathBuf::from(env.or("ORGSYNC_REPORT_DIR", "./reports")),
            user_agent: env.or("ORGSYNC_USER_AGENT", "orgsync/0.1"),
            http_timeout_secs: env.parsed("ORGSYNC_HTTP_TIMEOUT_SECS", 30)?,
            tables,
        })
    }
}
