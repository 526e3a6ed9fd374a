//! Batched write-back of reconciled profiles to the directory.

use std::ops::Range;

use orgsync_adapters::{AdapterError, DirectoryApi, UserPatch};
use orgsync_core::{ReconciledRecord, UpdateLogEntry, UpdateStatus};
use orgsync_storage::{BearerToken, PausePoint, Throttle, TokenProvider};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_BATCH_COUNT: usize = 10;
pub const MAX_BATCH_COUNT: usize = 1_000;

/// A token this close to expiry is replaced before the next record.
const TOKEN_REFRESH_GRACE_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("record is missing {0}")]
    Incomplete(&'static str),
    #[error(transparent)]
    Api(#[from] AdapterError),
    #[error("manager {0} has no directory id")]
    ManagerWithoutId(String),
    #[error("profile update returned http {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Split `len` items into contiguous ranges whose sizes differ by at most
/// one, larger ranges first. At most `count` ranges and never more ranges
/// than items, so no range is empty unless `len == 0`.
pub fn split_batches(len: usize, count: usize) -> Vec<Range<usize>> {
    let count = count.clamp(1, len.max(1));
    let base = len / count;
    let extra = len % count;

    let mut start = 0;
    (0..count)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// The four values every update needs, borrowed from a reconciled record.
struct UpdateTarget<'r> {
    user: &'r str,
    manager_email: &'r str,
    department: &'r str,
    job_title: &'r str,
}

impl<'r> UpdateTarget<'r> {
    fn from_record(record: &'r ReconciledRecord) -> Result<Self, UpdateError> {
        fn present<'v>(value: Option<&'v str>, what: &'static str) -> Result<&'v str, UpdateError> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or(UpdateError::Incomplete(what))
        }

        present(Some(record.email.as_str()), "directory email")?;
        Ok(Self {
            user: present(record.employee_email.as_deref(), "employee email")?,
            manager_email: present(record.manager_email.as_deref(), "manager email")?,
            department: present(record.team.as_deref(), "team")?,
            job_title: present(record.title.as_deref(), "title")?,
        })
    }
}

pub struct UpdateDispatcher<'a> {
    api: &'a dyn DirectoryApi,
    throttle: &'a dyn Throttle,
    tokens: Option<&'a dyn TokenProvider>,
    batch_count: usize,
}

impl<'a> UpdateDispatcher<'a> {
    pub fn new(api: &'a dyn DirectoryApi, throttle: &'a dyn Throttle, batch_count: usize) -> Self {
        Self {
            api,
            throttle,
            tokens: None,
            batch_count,
        }
    }

    /// Re-acquire the bearer token whenever it is about to expire; long runs
    /// pace every record and can outlive a single token.
    pub fn with_token_refresh(mut self, tokens: &'a dyn TokenProvider) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Apply every record in input order. A failing record is logged and
    /// recorded as FAILED; it never stops the records after it.
    pub async fn apply_updates(
        &self,
        token: &BearerToken,
        records: &[ReconciledRecord],
    ) -> Vec<UpdateLogEntry> {
        let mut token = token.clone();
        let mut entries = Vec::with_capacity(records.len());

        for (round, range) in split_batches(records.len(), self.batch_count)
            .into_iter()
            .enumerate()
        {
            for record in &records[range] {
                let outcome = self.update_one(&mut token, record).await;
                match &outcome {
                    Ok(()) => info!(email = %record.email, "directory profile updated"),
                    Err(err) => warn!(email = %record.email, error = %err, "directory profile update failed"),
                }
                entries.push(UpdateLogEntry::for_record(record, UpdateStatus::from(&outcome)));
                self.throttle.pause(PausePoint::AfterRecord).await;
            }
            info!(round = round + 1, "round completed");
        }

        let failed = entries.iter().filter(|e| !e.is_success()).count();
        info!(attempted = entries.len(), failed, "update dispatch finished");
        entries
    }

    async fn refresh_if_expiring(&self, token: &mut BearerToken) -> Result<(), UpdateError> {
        let Some(tokens) = self.tokens else {
            return Ok(());
        };
        if token.is_expired(chrono::Duration::minutes(TOKEN_REFRESH_GRACE_MINUTES)) {
            info!(expires_at = ?token.expires_at(), "directory token near expiry; re-acquiring");
            *token = tokens.acquire().await.map_err(AdapterError::from)?;
        }
        Ok(())
    }

    async fn update_one(&self, token: &mut BearerToken, record: &ReconciledRecord) -> Result<(), UpdateError> {
        let target = UpdateTarget::from_record(record)?;
        self.refresh_if_expiring(token).await?;
        let token = &*token;
        info!(
            employee = target.user,
            manager = target.manager_email,
            team = target.department,
            title = target.job_title,
            "updating directory profile"
        );

        self.api.get_user(token, target.user).await?;
        let manager = self.api.get_user(token, target.manager_email).await?;
        let manager_id = manager
            .get("id")
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| UpdateError::ManagerWithoutId(target.manager_email.to_string()))?;

        let patch = UserPatch {
            manager_reference: self.api.manager_reference(manager_id),
            department: target.department.to_string(),
            job_title: target.job_title.to_string(),
        };
        let resp = self.api.patch_user(token, target.user, &patch).await?;
        self.throttle.pause(PausePoint::AfterPatch).await;

        match resp.status.as_u16() {
            204 => Ok(()),
            status => Err(UpdateError::Rejected {
                status,
                body: resp.body,
            }),
        }
    }
}
