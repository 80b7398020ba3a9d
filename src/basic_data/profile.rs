//! Per-interface job profiles.
//!
//! One row per environment + interface name in `CUX.CUX_BASIC_DATA_PROFILE`
//! holds the push URL, the auth blob, and the worker settings JSON mutated
//! by the administrative start call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::{ConnectionManager, DbOutcome};
use crate::esb::EsbAuth;
use crate::error::Result;
use crate::ora::{ColumnDef, ColumnMapper, Entity, EntityMetadata, PrimaryKey, Repository, SequenceRef, SqlType};

/// Default number of rows one batch transport claims.
pub const DEFAULT_TRANSPORT_ROW_LIMIT: u32 = 10;

/// Upper bound the administrative start accepts.
pub const MAX_TRANSPORT_ROW_LIMIT: u32 = 100;

/// Lower bound on the polling sleep.
pub const MIN_SLEEP_SECONDS: u64 = 30;

const PROFILE_COLUMNS: &[(&str, ColumnDef)] = &[
    ("id", ColumnDef::new("ID", SqlType::Number)),
    ("env", ColumnDef::new("ENV", SqlType::Varchar2)),
    ("interfaceName", ColumnDef::new("INTERFACE_NAME", SqlType::Varchar2)),
    ("auth", ColumnDef::new("AUTH", SqlType::Varchar2)),
    ("url", ColumnDef::new("URL", SqlType::Varchar2)),
    ("profileJson", ColumnDef::new("PROFILE_JSON", SqlType::Varchar2)),
];

pub static PROFILE_METADATA: EntityMetadata = EntityMetadata {
    pool_alias: "ERP",
    schema: "CUX",
    table_name: Some("CUX_BASIC_DATA_PROFILE"),
    base_query: None,
    primary_key: Some(PrimaryKey {
        field: "id",
        column: "ID",
        sql_type: SqlType::Number,
        sequence: Some(SequenceRef {
            schema: "CUX",
            name: "CUX_BASIC_DATA_PROFILE_S",
        }),
    }),
    mapper: ColumnMapper::new(PROFILE_COLUMNS),
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobProfile {
    pub id: Option<i64>,
    pub env: Option<String>,
    pub interface_name: Option<String>,
    pub auth: Option<String>,
    pub url: Option<String>,
    pub profile_json: Option<String>,
}

impl Entity for JobProfile {
    fn metadata() -> &'static EntityMetadata {
        &PROFILE_METADATA
    }
}

impl JobProfile {
    /// Worker settings stored in the profile JSON; malformed or absent
    /// settings fall back to defaults.
    pub fn settings(&self) -> WorkerSettings {
        self.profile_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Basic-auth blob for the interface's push endpoint.
    pub fn esb_auth(&self) -> EsbAuth {
        self.auth
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

/// Settings the update/transport workers run with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    pub sleep_seconds: u64,
    pub lookback_days: i64,
    pub enable_date_range: bool,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub max_row_number: i64,
    pub transport_row_limit: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sleep_seconds: 30,
            lookback_days: 30,
            enable_date_range: false,
            date_from: None,
            date_to: None,
            max_row_number: 1000,
            transport_row_limit: DEFAULT_TRANSPORT_ROW_LIMIT,
        }
    }
}

/// Profile access shared by every interface.
#[derive(Clone)]
pub struct ProfileStore {
    repository: Repository<JobProfile>,
    env: String,
}

impl ProfileStore {
    pub fn new(manager: Arc<ConnectionManager>, env: impl Into<String>) -> Result<Self> {
        Ok(Self {
            repository: Repository::new(manager)?,
            env: env.into().to_uppercase(),
        })
    }

    pub async fn get(&self, interface_name: &str) -> DbOutcome<JobProfile> {
        let mut criteria = Map::new();
        criteria.insert("env".to_string(), Value::String(self.env.clone()));
        criteria.insert(
            "interfaceName".to_string(),
            Value::String(interface_name.to_string()),
        );
        match self.repository.find_one_by(criteria).await {
            Ok(outcome) if !outcome.success => outcome.cast_failure(),
            Ok(outcome) => match outcome.data.flatten() {
                Some(profile) => DbOutcome::ok(profile),
                None => DbOutcome::fail(
                    "NO_PROFILE",
                    format!("no job profile for interface {interface_name}"),
                ),
            },
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }

    pub async fn update_settings(
        &self,
        interface_name: &str,
        settings: &WorkerSettings,
    ) -> DbOutcome<u64> {
        let mut criteria = Map::new();
        criteria.insert("env".to_string(), Value::String(self.env.clone()));
        criteria.insert(
            "interfaceName".to_string(),
            Value::String(interface_name.to_string()),
        );
        let mut patch = Map::new();
        let json = serde_json::to_string(settings).unwrap_or_else(|_| "{}".to_string());
        patch.insert("profileJson".to_string(), Value::String(json));

        match self.repository.update_criteria(criteria, patch).await {
            Ok(outcome) => outcome,
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_fall_back_to_defaults() {
        let profile = JobProfile {
            profile_json: Some("not json".to_string()),
            ..JobProfile::default()
        };
        let settings = profile.settings();
        assert_eq!(settings.sleep_seconds, 30);
        assert_eq!(settings.transport_row_limit, DEFAULT_TRANSPORT_ROW_LIMIT);
    }

    #[test]
    fn test_settings_parse_from_profile_json() {
        let profile = JobProfile {
            profile_json: Some(
                r#"{"sleepSeconds": 60, "transportRowLimit": 50, "enableDateRange": true}"#
                    .to_string(),
            ),
            ..JobProfile::default()
        };
        let settings = profile.settings();
        assert_eq!(settings.sleep_seconds, 60);
        assert_eq!(settings.transport_row_limit, 50);
        assert!(settings.enable_date_range);
        // untouched fields keep their defaults
        assert_eq!(settings.max_row_number, 1000);
    }

    #[test]
    fn test_esb_auth_parses_basic_credentials() {
        let profile = JobProfile {
            auth: Some(r#"{"username": "esb", "password": "secret"}"#.to_string()),
            ..JobProfile::default()
        };
        let auth = profile.esb_auth();
        assert_eq!(auth.username.as_deref(), Some("esb"));
        assert_eq!(auth.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_profile_metadata_is_valid() {
        PROFILE_METADATA.validate().unwrap();
    }
}
