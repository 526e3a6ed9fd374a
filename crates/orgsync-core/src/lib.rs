//! Core record types shared by the readers, the reconciler and the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "orgsync-core";

/// One user from the cloud directory, projected from the roster query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub manager_name: Option<String>,
    pub manager_email: Option<String>,
    pub is_hybrid: bool,
    pub is_enabled: bool,
}

impl DirectoryRecord {
    /// Hybrid accounts are mastered on-premises and are never update targets.
    pub fn is_cloud_managed(&self) -> bool {
        !self.is_hybrid
    }
}

/// Active employee profile from the HR system of record, with the manager
/// reference already resolved against the same result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemOfRecordProfile {
    pub id: String,
    pub employee_email: Option<String>,
    pub employee_name: Option<String>,
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub team: Option<String>,
    pub manager_email: Option<String>,
    pub manager_name: Option<String>,
}

/// Row present in both sources after the email join.
///
/// Directory-side first/last names are not carried; the HR profile is the
/// source for every field written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub name: Option<String>,
    pub email: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub directory_manager_name: Option<String>,
    pub directory_manager_email: Option<String>,
    pub is_hybrid: bool,
    pub is_enabled: bool,
    pub profile_id: String,
    pub employee_email: Option<String>,
    pub employee_name: Option<String>,
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub team: Option<String>,
    pub manager_email: Option<String>,
    pub manager_name: Option<String>,
}

impl ReconciledRecord {
    pub fn from_pair(directory: DirectoryRecord, profile: SystemOfRecordProfile) -> Self {
        Self {
            name: directory.name,
            email: directory.email,
            job_title: directory.job_title,
            department: directory.department,
            directory_manager_name: directory.manager_name,
            directory_manager_email: directory.manager_email,
            is_hybrid: directory.is_hybrid,
            is_enabled: directory.is_enabled,
            profile_id: profile.id,
            employee_email: profile.employee_email,
            employee_name: profile.employee_name,
            title: profile.title,
            start_date: profile.start_date,
            team: profile.team,
            manager_email: profile.manager_email,
            manager_name: profile.manager_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<E> From<&Result<(), E>> for UpdateStatus {
    fn from(outcome: &Result<(), E>) -> Self {
        match outcome {
            Ok(()) => Self::Success,
            Err(_) => Self::Failed,
        }
    }
}

/// One audit row per dispatch attempt. Field order is the report column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Department")]
    pub department: Option<String>,
    #[serde(rename = "Manager")]
    pub manager: Option<String>,
    #[serde(rename = "ManagerEmail")]
    pub manager_email: Option<String>,
    #[serde(rename = "Status")]
    pub status: UpdateStatus,
}

impl UpdateLogEntry {
    pub fn for_record(record: &ReconciledRecord, status: UpdateStatus) -> Self {
        Self {
            name: record.employee_name.clone(),
            email: record.email.clone(),
            title: record.title.clone(),
            department: record.team.clone(),
            manager: record.manager_name.clone(),
            manager_email: record.manager_email.clone(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UpdateStatus::Success
    }
}
