//! Email join between the directory roster and the HR profiles.

use std::collections::HashMap;

use orgsync_core::{DirectoryRecord, ReconciledRecord, SystemOfRecordProfile};
use serde::Deserialize;
use tracing::{debug, info};

/// Legacy manager address rewritten to its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailAlias {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinProvenance {
    LeftOnly,
    RightOnly,
    Both,
}

#[derive(Debug, Clone)]
pub struct JoinedRow {
    pub provenance: JoinProvenance,
    pub directory: Option<DirectoryRecord>,
    pub profile: Option<SystemOfRecordProfile>,
}

/// Hybrid accounts are excluded before the join.
pub fn cloud_only(records: Vec<DirectoryRecord>) -> Vec<DirectoryRecord> {
    let total = records.len();
    let cloud: Vec<_> = records.into_iter().filter(|r| r.is_cloud_managed()).collect();
    info!(total, cloud = cloud.len(), "hybrid accounts excluded");
    cloud
}

fn join_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Full outer join on directory email == profile employee email. Duplicate
/// keys pair every directory row with every matching profile.
pub fn outer_join(
    directory: Vec<DirectoryRecord>,
    profiles: Vec<SystemOfRecordProfile>,
) -> Vec<JoinedRow> {
    let mut by_email: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, profile) in profiles.iter().enumerate() {
        if let Some(email) = profile.employee_email.as_deref() {
            by_email.entry(join_key(email)).or_default().push(index);
        }
    }

    let mut matched = vec![false; profiles.len()];
    let mut rows = Vec::with_capacity(directory.len().max(profiles.len()));

    for record in directory {
        match by_email.get(&join_key(&record.email)) {
            Some(indexes) => {
                for &index in indexes {
                    matched[index] = true;
                    rows.push(JoinedRow {
                        provenance: JoinProvenance::Both,
                        directory: Some(record.clone()),
                        profile: Some(profiles[index].clone()),
                    });
                }
            }
            None => rows.push(JoinedRow {
                provenance: JoinProvenance::LeftOnly,
                directory: Some(record),
                profile: None,
            }),
        }
    }

    for (profile, was_matched) in profiles.into_iter().zip(matched) {
        if !was_matched {
            rows.push(JoinedRow {
                provenance: JoinProvenance::RightOnly,
                directory: None,
                profile: Some(profile),
            });
        }
    }
    rows
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    aliases: Vec<EmailAlias>,
}

impl Reconciler {
    pub fn new(aliases: Vec<EmailAlias>) -> Self {
        Self { aliases }
    }

    pub fn reconcile(
        &self,
        directory: Vec<DirectoryRecord>,
        profiles: Vec<SystemOfRecordProfile>,
    ) -> Vec<ReconciledRecord> {
        let rows = outer_join(directory, profiles);
        let count = |p: JoinProvenance| rows.iter().filter(|r| r.provenance == p).count();
        info!(
            both = count(JoinProvenance::Both),
            directory_only = count(JoinProvenance::LeftOnly),
            hr_only = count(JoinProvenance::RightOnly),
            "roster and profiles joined"
        );

        rows.into_iter()
            .filter_map(|row| match (row.provenance, row.directory, row.profile) {
                (JoinProvenance::Both, Some(directory), Some(profile)) => {
                    Some(ReconciledRecord::from_pair(directory, profile))
                }
                _ => None,
            })
            .map(|mut record| {
                record.manager_email = record
                    .manager_email
                    .map(|email| self.rewrite_alias(&record.email, email));
                record
            })
            .collect()
    }

    /// Substring replacement, applied in table order.
    fn rewrite_alias(&self, employee: &str, mut manager_email: String) -> String {
        for alias in &self.aliases {
            if alias.from.is_empty() || !manager_email.contains(&alias.from) {
                continue;
            }
            let rewritten = manager_email.replace(&alias.from, &alias.to);
            debug!(employee, from = %manager_email, to = %rewritten, "manager alias rewritten");
            manager_email = rewritten;
        }
        manager_email
    }
}
