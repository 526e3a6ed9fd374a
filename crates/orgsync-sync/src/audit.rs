//! Audit report: render, store, mail, delete.

use chrono::{DateTime, Utc};
use orgsync_core::UpdateLogEntry;
use orgsync_storage::{ReportStore, StoreError, StoredReport};
use thiserror::Error;
use tracing::{info, warn};

use crate::notify::{Notice, NoticeAttachment, NotificationError, Notifier};

pub const REPORT_HEADER: [&str; 7] = [
    "Name",
    "Email",
    "Title",
    "Department",
    "Manager",
    "ManagerEmail",
    "Status",
];
const REPORT_CONTENT_TYPE: &str = "text/csv";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("rendering audit report: {0}")]
    Render(#[from] csv::Error),
    #[error("storing audit report: {0}")]
    Store(#[source] StoreError),
    #[error("removing audit report: {0}")]
    Cleanup(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub file_stem: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl ReportSettings {
    pub fn file_name_for(&self, started_at: DateTime<Utc>) -> String {
        format!("{}_{}.csv", self.file_stem, started_at.format("%Y%m%d_%H%M%S"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub rows: usize,
    pub sha256: String,
    pub notified: bool,
}

/// Header row first, then one row per entry in dispatch order.
pub fn render_csv(entries: &[UpdateLogEntry]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(REPORT_HEADER)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

pub struct AuditReporter<'a> {
    store: &'a ReportStore,
    notifier: &'a dyn Notifier,
    settings: &'a ReportSettings,
}

impl<'a> AuditReporter<'a> {
    pub fn new(store: &'a ReportStore, notifier: &'a dyn Notifier, settings: &'a ReportSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    /// A failed delivery is logged and reported as `notified == false`; the
    /// stored file is removed either way.
    pub async fn publish(
        &self,
        started_at: DateTime<Utc>,
        entries: &[UpdateLogEntry],
    ) -> Result<ReportOutcome, AuditError> {
        let bytes = render_csv(entries)?;
        let stored = self
            .store
            .write(&self.settings.file_name_for(started_at), &bytes)
            .await
            .map_err(AuditError::Store)?;
        info!(
            path = %stored.path.display(),
            sha256 = %stored.sha256,
            rows = entries.len(),
            "audit report written"
        );

        let notified = match self.deliver(&stored).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "audit notice not delivered");
                false
            }
        };

        self.store
            .remove(&stored.path)
            .await
            .map_err(AuditError::Cleanup)?;

        Ok(ReportOutcome {
            rows: entries.len(),
            sha256: stored.sha256,
            notified,
        })
    }

    async fn deliver(&self, stored: &StoredReport) -> Result<(), NotificationError> {
        let bytes = self
            .store
            .read(&stored.path)
            .await
            .map_err(|err| NotificationError::Attachment(err.to_string()))?;
        let file_name = stored
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.csv", self.settings.file_stem));

        let notice = Notice {
            subject: self.settings.subject.clone(),
            body: self.settings.body.clone(),
            recipients: self.settings.recipients.clone(),
            attachment: NoticeAttachment {
                file_name,
                content_type: REPORT_CONTENT_TYPE.to_string(),
                bytes,
            },
        };
        self.notifier.send(&notice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use orgsync_core::UpdateStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: Mutex<Vec<Notice>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notice: &Notice) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(notice.clone());
            if self.fail {
                return Err(NotificationError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }

    fn settings() -> ReportSettings {
        ReportSettings {
            file_stem: "profile_updates".into(),
            recipients: vec!["admin1@example.com".into(), "admin2@example.com".into()],
            subject: "Directory Profile Update".into(),
            body: "Attached are the profile updates.".into(),
        }
    }

    fn entry(email: &str, status: UpdateStatus) -> UpdateLogEntry {
        UpdateLogEntry {
            name: Some("Ada Lovelace".into()),
            email: email.into(),
            title: Some("Engineer".into()),
            department: Some("Platform".into()),
            manager: None,
            manager_email: Some("grace@example.com".into()),
            status,
        }
    }

    fn started_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap()
    }

    #[test]
    fn empty_log_renders_only_the_header() {
        let bytes = render_csv(&[]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "Name,Email,Title,Department,Manager,ManagerEmail,Status\n"
        );
    }

    #[test]
    fn rows_follow_the_header_in_order() {
        let bytes = render_csv(&[
            entry("a@example.com", UpdateStatus::Success),
            entry("b@example.com", UpdateStatus::Failed),
        ])
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "Ada Lovelace,a@example.com,Engineer,Platform,,grace@example.com,SUCCESS"
        );
        assert!(lines[2].ends_with(",FAILED"));
    }

    #[test]
    fn file_name_carries_the_run_stamp() {
        assert_eq!(
            settings().file_name_for(started_at()),
            "profile_updates_20261018_060000.csv"
        );
    }

    #[tokio::test]
    async fn publish_mails_the_report_once_and_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let notifier = RecordingNotifier::default();
        let settings = settings();

        let outcome = AuditReporter::new(&store, &notifier, &settings)
            .publish(started_at(), &[entry("a@example.com", UpdateStatus::Success)])
            .await
            .expect("publish");

        assert!(outcome.notified);
        assert_eq!(outcome.rows, 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients.len(), 2);
        assert_eq!(sent[0].attachment.file_name, "profile_updates_20261018_060000.csv");
        assert_eq!(
            ReportStore::sha256_hex(&sent[0].attachment.bytes),
            outcome.sha256
        );
        assert!(!dir.path().join("profile_updates_20261018_060000.csv").exists());
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed_and_cleanup_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let settings = settings();

        let outcome = AuditReporter::new(&store, &notifier, &settings)
            .publish(started_at(), &[])
            .await
            .expect("publish");

        assert!(!outcome.notified);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn storage_failure_skips_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ReportStore::new(&blocker);
        let notifier = RecordingNotifier::default();
        let settings = settings();

        let err = AuditReporter::new(&store, &notifier, &settings)
            .publish(started_at(), &[])
            .await
            .expect_err("store");

        assert!(matches!(err, AuditError::Store(_)));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
