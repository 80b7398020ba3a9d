//! Registered API definitions.
//!
//! `CUX.CUX_PLSQL_REST_API_TOP_T` holds one row per wrapped stored
//! procedure: original and wrapper names, the wrapper's in/out type names,
//! and the registration status driving the gateway's pre-checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ora::mapper::{date_to_domain, date_to_physical};
use crate::ora::{ColumnDef, ColumnMapper, Entity, EntityMetadata, PrimaryKey, SequenceRef, SqlType};

/// Registration status of a wrapped procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiStatus {
    Registing,
    Valid,
    Invalid,
}

impl ApiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registing => "REGISTING",
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const API_COLUMNS: &[(&str, ColumnDef)] = &[
    ("id", ColumnDef::new("ID", SqlType::Number)),
    ("status", ColumnDef::new("STATUS", SqlType::Varchar2)),
    ("origName", ColumnDef::new("ORIG_NAME", SqlType::Varchar2)),
    ("wrapName", ColumnDef::new("WRAP_NAME", SqlType::Varchar2)),
    ("pIn", ColumnDef::new("P_IN", SqlType::Varchar2)),
    ("pOut", ColumnDef::new("P_OUT", SqlType::Varchar2)),
    ("origPackageName", ColumnDef::new("ORIG_PACKAGE_NAME", SqlType::Varchar2)),
    ("origObjectName", ColumnDef::new("ORIG_OBJECT_NAME", SqlType::Varchar2)),
    ("wrapPackageName", ColumnDef::new("WRAP_PACKAGE_NAME", SqlType::Varchar2)),
    ("bizName", ColumnDef::new("BIZ_NAME", SqlType::Varchar2)),
    ("remark", ColumnDef::new("REMARK", SqlType::Varchar2)),
    ("createdBy", ColumnDef::new("CREATED_BY", SqlType::Varchar2)),
    ("creationDate", ColumnDef::new("CREATION_DATE", SqlType::Date)),
    ("lastUpdatedBy", ColumnDef::new("LAST_UPDATED_BY", SqlType::Varchar2)),
    ("lastUpdateDate", ColumnDef::new("LAST_UPDATE_DATE", SqlType::Date)),
];

pub static API_METADATA: EntityMetadata = EntityMetadata {
    pool_alias: "ERP_PLSQL",
    schema: "CUX",
    table_name: Some("CUX_PLSQL_REST_API_TOP_T"),
    base_query: None,
    primary_key: Some(PrimaryKey {
        field: "id",
        column: "ID",
        sql_type: SqlType::Number,
        sequence: Some(SequenceRef {
            schema: "CUX",
            name: "CUX_PLSQL_REST_API_TOP_S",
        }),
    }),
    mapper: ColumnMapper::new(API_COLUMNS),
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiDefinition {
    pub id: Option<i64>,
    pub status: Option<String>,
    pub orig_name: Option<String>,
    pub wrap_name: Option<String>,
    pub p_in: Option<String>,
    pub p_out: Option<String>,
    pub orig_package_name: Option<String>,
    pub orig_object_name: Option<String>,
    pub wrap_package_name: Option<String>,
    pub biz_name: Option<String>,
    pub remark: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<String>,
    pub last_updated_by: Option<String>,
    pub last_update_date: Option<String>,
}

impl Entity for ApiDefinition {
    fn metadata() -> &'static EntityMetadata {
        &API_METADATA
    }
}

impl ApiDefinition {
    pub fn has_status(&self, status: ApiStatus) -> bool {
        self.status.as_deref() == Some(status.as_str())
    }
}

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistParams {
    pub package_name: String,
    pub procedure_name: String,
    pub biz_name: String,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub last_updated_by: Option<String>,
}

impl RegistParams {
    /// Job name and definition lookup key.
    pub fn orig_name(&self) -> String {
        format!("{}.{}", self.package_name, self.procedure_name)
    }
}

/// Request-history view: audit rows joined to their request/response CLOB
/// bodies. Read-only; paginated from the admin surface.
const HISTORY_BASE_QUERY: &str = "\
SELECT r.MESSAGE_ID,
       r.REQUEST_TIMESTAMP,
       r.INTERFACE_NAME,
       r.PROCEDURE_NAME,
       r.PACKAGE_NAME,
       r.REQUEST_STATUS,
       r.RESPONSE_STATUS,
       r.REQUEST_RESPONDED,
       t.BIZ_NAME,
       REQUEST_BODY.BODY  AS REQUEST_BODY,
       RESPONSE_BODY.BODY AS RESPONSE_BODY
  FROM CUX.CUX_PLSQL_REST_API_REQUESTS r,
       CUX.CUX_PLSQL_REST_API_TOP_T    t,
       CUX.CUX_PLSQL_REST_API_BODY     REQUEST_BODY,
       CUX.CUX_PLSQL_REST_API_BODY     RESPONSE_BODY
 WHERE r.INTERFACE_NAME = t.ORIG_NAME
   AND r.MESSAGE_ID = REQUEST_BODY.MESSAGE_ID(+)
   AND 'REQUEST' = REQUEST_BODY.BELONGS_TO(+)
   AND r.MESSAGE_ID = RESPONSE_BODY.MESSAGE_ID(+)
   AND 'RESPONSE' = RESPONSE_BODY.BELONGS_TO(+)";

const HISTORY_COLUMNS: &[(&str, ColumnDef)] = &[
    ("messageId", ColumnDef::new("MESSAGE_ID", SqlType::Number)),
    (
        "requestTimestamp",
        ColumnDef::new("REQUEST_TIMESTAMP", SqlType::Date)
            .with_transforms(date_to_domain, date_to_physical),
    ),
    ("interfaceName", ColumnDef::new("INTERFACE_NAME", SqlType::Varchar2)),
    ("procedureName", ColumnDef::new("PROCEDURE_NAME", SqlType::Varchar2)),
    ("packageName", ColumnDef::new("PACKAGE_NAME", SqlType::Varchar2)),
    ("requestStatus", ColumnDef::new("REQUEST_STATUS", SqlType::Varchar2)),
    ("responseStatus", ColumnDef::new("RESPONSE_STATUS", SqlType::Varchar2)),
    (
        "requestResponded",
        ColumnDef::new("REQUEST_RESPONDED", SqlType::Date)
            .with_transforms(date_to_domain, date_to_physical),
    ),
    ("bizName", ColumnDef::new("BIZ_NAME", SqlType::Varchar2).read_only()),
    ("requestBody", ColumnDef::new("REQUEST_BODY", SqlType::Clob).read_only()),
    ("responseBody", ColumnDef::new("RESPONSE_BODY", SqlType::Clob).read_only()),
];

pub static HISTORY_METADATA: EntityMetadata = EntityMetadata {
    pool_alias: "ERP_PLSQL",
    schema: "CUX",
    table_name: Some("CUX_PLSQL_REST_API_REQUESTS"),
    base_query: Some(HISTORY_BASE_QUERY),
    primary_key: Some(PrimaryKey {
        field: "messageId",
        column: "MESSAGE_ID",
        sql_type: SqlType::Number,
        sequence: Some(SequenceRef {
            schema: "APPS",
            name: "CUX_PLSQL_REST_API_REQUESTS_S",
        }),
    }),
    mapper: ColumnMapper::new(HISTORY_COLUMNS),
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiRequestHistory {
    pub id: Option<Value>,
    pub message_id: Option<i64>,
    pub request_timestamp: Option<String>,
    pub interface_name: Option<String>,
    pub procedure_name: Option<String>,
    pub package_name: Option<String>,
    pub request_status: Option<String>,
    pub response_status: Option<String>,
    pub request_responded: Option<String>,
    pub biz_name: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
}

impl Entity for ApiRequestHistory {
    fn metadata() -> &'static EntityMetadata {
        &HISTORY_METADATA
    }
}
