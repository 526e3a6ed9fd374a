//! HR system-of-record reader with manager self-join.

use std::collections::HashMap;

use orgsync_core::SystemOfRecordProfile;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::{require, text, AdapterError, DenyList, RecordQuery};

/// Object and field names of the employee profile object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SorSchema {
    pub object: String,
    pub id_field: String,
    pub email_field: String,
    pub name_field: String,
    pub title_field: String,
    pub start_date_field: String,
    pub team_field: String,
    pub manager_field: String,
    pub status_field: String,
    pub active_status: String,
    pub employee_id_field: String,
}

impl Default for SorSchema {
    fn default() -> Self {
        Self {
            object: "Employee_Profile__c".to_string(),
            id_field: "Id".to_string(),
            email_field: "Employee_Email".to_string(),
            name_field: "Name".to_string(),
            title_field: "Title".to_string(),
            start_date_field: "Start_Date".to_string(),
            team_field: "Team".to_string(),
            manager_field: "Managers".to_string(),
            status_field: "Employee_Status".to_string(),
            active_status: "Active".to_string(),
            employee_id_field: "EmployeeId".to_string(),
        }
    }
}

impl SorSchema {
    pub fn selected_fields(&self) -> [&str; 7] {
        [
            self.id_field.as_str(),
            self.email_field.as_str(),
            self.name_field.as_str(),
            self.title_field.as_str(),
            self.start_date_field.as_str(),
            self.team_field.as_str(),
            self.manager_field.as_str(),
        ]
    }

    /// Active profiles that carry an employee identifier.
    pub fn active_profiles_soql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = '{}' AND {} != ''",
            self.selected_fields().join(","),
            self.object,
            self.status_field,
            self.active_status.replace('\\', "\\\\").replace('\'', "\\'"),
            self.employee_id_field
        )
    }
}

struct RawProfile {
    id: String,
    email: Option<String>,
    name: Option<String>,
    title: Option<String>,
    start_date: Option<String>,
    team: Option<String>,
    manager_ref: Option<String>,
}

fn project_profile(raw: &JsonValue, schema: &SorSchema) -> Result<RawProfile, AdapterError> {
    const CONTEXT: &str = "hr profile";

    let id = text(require(raw, &schema.id_field, CONTEXT)?)
        .ok_or_else(|| AdapterError::schema(schema.id_field.clone(), "hr profile without id"))?;
    Ok(RawProfile {
        id,
        email: text(require(raw, &schema.email_field, CONTEXT)?),
        name: text(require(raw, &schema.name_field, CONTEXT)?),
        title: text(require(raw, &schema.title_field, CONTEXT)?),
        start_date: text(require(raw, &schema.start_date_field, CONTEXT)?),
        team: text(require(raw, &schema.team_field, CONTEXT)?),
        manager_ref: text(require(raw, &schema.manager_field, CONTEXT)?),
    })
}

/// Resolve each profile's manager reference against the ids of the same set.
/// A reference to the profile's own id is not a manager. When an id repeats,
/// the last row wins.
fn resolve_managers(rows: Vec<RawProfile>) -> Vec<SystemOfRecordProfile> {
    let mut managers: HashMap<String, (Option<String>, Option<String>)> =
        HashMap::with_capacity(rows.len());
    for row in &rows {
        let previous = managers.insert(row.id.clone(), (row.name.clone(), row.email.clone()));
        if previous.is_some() {
            warn!(id = %row.id, "duplicate hr profile id; manager resolution uses the last row");
        }
    }

    rows.into_iter()
        .map(|row| {
            let manager = row
                .manager_ref
                .as_deref()
                .filter(|m| *m != row.id)
                .and_then(|m| managers.get(m));
            SystemOfRecordProfile {
                manager_name: manager.and_then(|(name, _)| name.clone()),
                manager_email: manager.and_then(|(_, email)| email.clone()),
                id: row.id,
                employee_email: row.email,
                employee_name: row.name,
                title: row.title,
                start_date: row.start_date,
                team: row.team,
            }
        })
        .collect()
}

pub struct SystemOfRecordReader<'a> {
    query: &'a dyn RecordQuery,
    schema: &'a SorSchema,
    deny_list: &'a DenyList,
}

impl<'a> SystemOfRecordReader<'a> {
    pub fn new(query: &'a dyn RecordQuery, schema: &'a SorSchema, deny_list: &'a DenyList) -> Self {
        Self {
            query,
            schema,
            deny_list,
        }
    }

    pub async fn fetch_active_profiles(&self) -> Result<Vec<SystemOfRecordProfile>, AdapterError> {
        let raw = self.query.query_all(&self.schema.active_profiles_soql()).await?;
        let rows = raw
            .iter()
            .map(|r| project_profile(r, self.schema))
            .collect::<Result<Vec<_>, _>>()?;

        let profiles = resolve_managers(rows);
        let with_manager = profiles.iter().filter(|p| p.manager_email.is_some()).count();
        let profiles = self
            .deny_list
            .remove_from(profiles, |p| p.employee_email.as_deref(), "system of record");

        info!(profiles = profiles.len(), with_manager, "active hr profiles loaded");
        Ok(profiles)
    }
}
