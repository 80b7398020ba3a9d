//! Gateway storage and wrapper invocation.
//!
//! Everything the registration workflow and the invocation path need from
//! the database, behind the [`GatewayStore`] seam: wrapper-package calls,
//! status flips, request/response/callback audits, and the anonymous-block
//! execution of a registered wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::database::{exec, ConnectionManager, DbOutcome};
use crate::ora::binds::{BindMap, BoundParam};
use crate::ora::mapper::SqlType;
use crate::ora::{CompiledStatement, StatementOptions};
use crate::plsql::api_def::{ApiDefinition, ApiStatus, RegistParams};

const POOL: &str = "ERP_PLSQL";

/// Dropping a nonexistent object is not a failure on 11g (no `DROP IF
/// EXISTS`); the wrapper's drop script tolerates ORA-04043.
const DROP_MISSING_OBJECT: &str = "ORA-04043";

const MESSAGE_SEQUENCE: &str =
    "SELECT APPS.CUX_PLSQL_REST_API_REQUESTS_S.NEXTVAL AS SEQ FROM DUAL";

const CALLBACK_SEQUENCE: &str =
    "SELECT CUX.CUX_PLSQL_REST_CALLBACK_S.NEXTVAL AS SEQ FROM DUAL";

const REGIST_BLOCK: &str = "\
BEGIN
  CUX.CUX_API_WRAPPER_PKG.REGIST(P_PACKAGE_NAME    => :packageName,
                                 P_OBJECT_NAME     => :procedureName,
                                 P_BIZ_NAME        => :bizName,
                                 P_REMARK          => :remark,
                                 P_LAST_UPDATED_BY => :lastUpdatedBy,
                                 X_WRAPED_NAME     => :wrapedName,
                                 X_RETURN_CODE     => :returnCode,
                                 X_RETURN_MSG      => :returnMsg);
END;";

const GEN_DDL_BLOCK: &str = "\
BEGIN
  CUX.CUX_API_WRAPPER_PKG.GEN_WRAP_PACKAGE(P_PACKAGE_NAME => :packageName,
                                           P_OBJECT_NAME  => :procedureName,
                                           X_RETURN_CODE  => :returnCode,
                                           X_RETURN_MSG   => :returnMsg,
                                           P_DROP_SCRIPT  => :dropScript,
                                           P_OBJ_DDL      => :objDdl,
                                           P_SPC_DDL      => :spcDdl,
                                           P_BDY_DDL      => :bdyDdl);
END;";

/// Result of executing a registered wrapper.
#[derive(Debug, Clone, Default)]
pub struct InvokeResult {
    pub success: bool,
    /// Parsed P_OUT payload.
    pub result: Option<Value>,
    /// SQLERRM plus backtrace on failure.
    pub message: Option<String>,
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// The procedure must actually exist before registration starts.
    async fn check_procedure(&self, package: &str, procedure: &str) -> DbOutcome<bool>;

    async fn regist(&self, params: &RegistParams) -> DbOutcome<String>;

    async fn update_status(&self, orig_name: &str, status: ApiStatus) -> DbOutcome<u64>;

    /// Generate the wrapper DDL and execute it: drop script, object DDL,
    /// package spec, package body - in that order.
    async fn generate_and_execute_ddl(&self, package: &str, procedure: &str) -> DbOutcome<()>;

    async fn find_api(&self, orig_name: &str) -> DbOutcome<Option<ApiDefinition>>;

    async fn next_message_id(&self) -> DbOutcome<i64>;

    async fn next_callback_id(&self) -> DbOutcome<i64>;

    async fn insert_request_audit(&self, message_id: i64, orig_name: &str, body: &Value)
        -> DbOutcome<u64>;

    async fn update_response_audit(
        &self,
        message_id: i64,
        status: &str,
        body: &Value,
    ) -> DbOutcome<u64>;

    async fn insert_callback_audit(
        &self,
        callback_id: i64,
        message_id: i64,
        queue_name: &str,
        callback_url: &str,
    ) -> DbOutcome<u64>;

    async fn update_callback_audit(
        &self,
        callback_id: i64,
        status: &str,
        return_code: &str,
        return_msg: &str,
    ) -> DbOutcome<u64>;

    /// Execute the wrapper block with the upper-cased JSON payload.
    async fn invoke_wrapper(&self, api: &ApiDefinition, payload: &Value) -> InvokeResult;
}

pub struct SqlGatewayStore {
    manager: Arc<ConnectionManager>,
}

impl SqlGatewayStore {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    fn statement(sql: impl Into<String>, binds: BindMap) -> CompiledStatement {
        CompiledStatement {
            sql: sql.into(),
            binds,
            options: StatementOptions::default(),
        }
    }

    async fn sequence(&self, sql: &str) -> DbOutcome<i64> {
        let outcome = exec::query(
            &self.manager,
            POOL,
            Self::statement(sql, BindMap::new()),
        )
        .await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let value = outcome
            .data
            .unwrap_or_default()
            .first()
            .and_then(|row| row.values().next().and_then(Value::as_i64));
        match value {
            Some(id) => DbOutcome::ok(id),
            None => DbOutcome::fail("NO_SEQUENCE", "sequence query returned no value"),
        }
    }

    /// Run each `/`-separated script of a DDL bundle sequentially,
    /// collecting failures (optionally tolerating missing-object drops).
    async fn run_scripts(&self, bundle: &str, tolerate_missing: bool) -> Vec<String> {
        let mut errors = Vec::new();
        for script in bundle.split('/') {
            let script = script.trim();
            if script.is_empty() {
                continue;
            }
            let outcome = exec::execute(
                &self.manager,
                POOL,
                Self::statement(script, BindMap::new()),
            )
            .await;
            if !outcome.success {
                let code = outcome.error_code.as_deref().unwrap_or("");
                if tolerate_missing && code == DROP_MISSING_OBJECT {
                    continue;
                }
                errors.push(outcome.message.unwrap_or_else(|| code.to_string()));
            }
        }
        errors
    }
}

fn in_text(value: Option<&str>) -> BoundParam {
    BoundParam::input(
        value.map_or(Value::Null, |v| Value::String(v.to_string())),
        Some(SqlType::Varchar2),
    )
}

fn binds(pairs: Vec<(&str, BoundParam)>) -> BindMap {
    let mut map = BindMap::new();
    for (name, param) in pairs {
        // fixed bind names, duplicates cannot happen
        let _ = map.insert(name, param);
    }
    map
}

fn out_text(outs: &Map<String, Value>, name: &str) -> String {
    outs.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Recursively upper-case object keys, the shape the wrapper types expect.
pub fn upper_cased(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut upper = Map::new();
            for (key, value) in map {
                upper.insert(key.to_uppercase(), upper_cased(value));
            }
            Value::Object(upper)
        }
        Value::Array(items) => Value::Array(items.iter().map(upper_cased).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl GatewayStore for SqlGatewayStore {
    async fn check_procedure(&self, package: &str, procedure: &str) -> DbOutcome<bool> {
        let statement = Self::statement(
            "SELECT COUNT(*) AS HITS FROM ALL_PROCEDURES \
             WHERE OBJECT_NAME = UPPER(:packageName) \
               AND PROCEDURE_NAME = UPPER(:procedureName)",
            binds(vec![
                ("packageName", in_text(Some(package))),
                ("procedureName", in_text(Some(procedure))),
            ]),
        );
        let outcome = exec::query(&self.manager, POOL, statement).await;
        outcome.map(|rows| {
            rows.first()
                .and_then(|row| row.get("HITS"))
                .and_then(Value::as_i64)
                .unwrap_or(0)
                > 0
        })
    }

    async fn regist(&self, params: &RegistParams) -> DbOutcome<String> {
        let bind_map = binds(vec![
            ("packageName", in_text(Some(&params.package_name))),
            ("procedureName", in_text(Some(&params.procedure_name))),
            ("bizName", in_text(Some(&params.biz_name))),
            ("remark", in_text(params.remark.as_deref())),
            (
                "lastUpdatedBy",
                in_text(Some(params.last_updated_by.as_deref().unwrap_or("SYSADMIN"))),
            ),
            ("wrapedName", BoundParam::output(SqlType::Varchar2)),
            ("returnCode", BoundParam::output(SqlType::Varchar2)),
            ("returnMsg", BoundParam::output(SqlType::Varchar2)),
        ]);
        let outcome =
            exec::execute_procedure(&self.manager, POOL, REGIST_BLOCK.to_string(), bind_map).await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let outs = outcome.data.unwrap_or_default();
        if out_text(&outs, "returnCode") != "S" {
            return DbOutcome::fail("REGIST_ERROR", out_text(&outs, "returnMsg"));
        }
        DbOutcome::ok(out_text(&outs, "wrapedName"))
    }

    async fn update_status(&self, orig_name: &str, status: ApiStatus) -> DbOutcome<u64> {
        let statement = Self::statement(
            "UPDATE CUX.CUX_PLSQL_REST_API_TOP_T t \
             SET t.STATUS = :status \
             WHERE t.ORIG_NAME = :origName",
            binds(vec![
                ("status", in_text(Some(status.as_str()))),
                ("origName", in_text(Some(orig_name))),
            ]),
        );
        exec::execute(&self.manager, POOL, statement)
            .await
            .map(|r| r.rows_affected)
    }

    async fn generate_and_execute_ddl(&self, package: &str, procedure: &str) -> DbOutcome<()> {
        let bind_map = binds(vec![
            ("packageName", in_text(Some(package))),
            ("procedureName", in_text(Some(procedure))),
            ("returnCode", BoundParam::output(SqlType::Varchar2)),
            ("returnMsg", BoundParam::output(SqlType::Clob)),
            ("dropScript", BoundParam::output(SqlType::Clob)),
            ("objDdl", BoundParam::output(SqlType::Clob)),
            ("spcDdl", BoundParam::output(SqlType::Clob)),
            ("bdyDdl", BoundParam::output(SqlType::Clob)),
        ]);
        let outcome =
            exec::execute_procedure(&self.manager, POOL, GEN_DDL_BLOCK.to_string(), bind_map)
                .await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let outs = outcome.data.unwrap_or_default();
        if out_text(&outs, "returnCode") != "S" {
            return DbOutcome::fail("GEN_DDL_ERROR", out_text(&outs, "returnMsg"));
        }

        let drop_errors = self.run_scripts(&out_text(&outs, "dropScript"), true).await;
        if !drop_errors.is_empty() {
            return DbOutcome::fail("DROP OBJECT ERROR", drop_errors.join("\n"));
        }

        let obj_errors = self.run_scripts(&out_text(&outs, "objDdl"), false).await;
        if !obj_errors.is_empty() {
            return DbOutcome::fail("COMPILE DB TYPES", obj_errors.join("\n"));
        }

        let spc_errors = self.run_scripts(&out_text(&outs, "spcDdl"), false).await;
        if !spc_errors.is_empty() {
            return DbOutcome::fail("COMPILE PACKAGE SPEC", spc_errors.join("\n"));
        }

        let bdy_errors = self.run_scripts(&out_text(&outs, "bdyDdl"), false).await;
        if !bdy_errors.is_empty() {
            return DbOutcome::fail("COMPILE PACKAGE BODY", bdy_errors.join("\n"));
        }

        DbOutcome::ok(())
    }

    async fn find_api(&self, orig_name: &str) -> DbOutcome<Option<ApiDefinition>> {
        use crate::ora::repository::map_row;
        use crate::plsql::api_def::API_METADATA;

        let criteria = crate::ora::Criteria::of(&[(
            "origName",
            Value::String(orig_name.to_string()),
        )]);
        let statement = match API_METADATA.build_select(
            Some(&criteria),
            None,
            Some(crate::ora::RowLimit { top: 1 }),
            None,
        ) {
            Ok(statement) => statement,
            Err(e) => return DbOutcome::fail("STATEMENT", e.to_string()),
        };
        let outcome = exec::query(&self.manager, POOL, statement).await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let api = outcome
            .data
            .unwrap_or_default()
            .first()
            .map(|row| map_row(&API_METADATA, row, None))
            .and_then(|domain| serde_json::from_value(Value::Object(domain)).ok());
        DbOutcome::ok(api)
    }

    async fn next_message_id(&self) -> DbOutcome<i64> {
        self.sequence(MESSAGE_SEQUENCE).await
    }

    async fn next_callback_id(&self) -> DbOutcome<i64> {
        self.sequence(CALLBACK_SEQUENCE).await
    }

    async fn insert_request_audit(
        &self,
        message_id: i64,
        orig_name: &str,
        body: &Value,
    ) -> DbOutcome<u64> {
        let (package, procedure) = orig_name.split_once('.').unwrap_or((orig_name, ""));
        let header = Self::statement(
            "INSERT INTO CUX.CUX_PLSQL_REST_API_REQUESTS \
             (MESSAGE_ID, INTERFACE_NAME, PACKAGE_NAME, PROCEDURE_NAME, \
              REQUEST_TIMESTAMP, REQUEST_STATUS) \
             VALUES (:messageId, :interfaceName, :packageName, :procedureName, SYSDATE, 'NEW')",
            binds(vec![
                (
                    "messageId",
                    BoundParam::input(Value::from(message_id), Some(SqlType::Number)),
                ),
                ("interfaceName", in_text(Some(orig_name))),
                ("packageName", in_text(Some(package))),
                ("procedureName", in_text(Some(procedure))),
            ]),
        );
        let outcome = exec::execute(&self.manager, POOL, header).await;
        if !outcome.success {
            return outcome.cast_failure();
        }

        let body_row = Self::statement(
            "INSERT INTO CUX.CUX_PLSQL_REST_API_BODY \
             (MESSAGE_ID, CREATION_DATE, BELONGS_TO, BODY) \
             VALUES (:messageId, SYSDATE, 'REQUEST', :body)",
            binds(vec![
                (
                    "messageId",
                    BoundParam::input(Value::from(message_id), Some(SqlType::Number)),
                ),
                (
                    "body",
                    BoundParam::input(Value::String(body.to_string()), Some(SqlType::Clob)),
                ),
            ]),
        );
        exec::execute(&self.manager, POOL, body_row)
            .await
            .map(|r| r.rows_affected)
    }

    async fn update_response_audit(
        &self,
        message_id: i64,
        status: &str,
        body: &Value,
    ) -> DbOutcome<u64> {
        let header = Self::statement(
            "UPDATE CUX.CUX_PLSQL_REST_API_REQUESTS \
             SET RESPONSE_STATUS = :status, REQUEST_RESPONDED = SYSDATE \
             WHERE MESSAGE_ID = :messageId",
            binds(vec![
                ("status", in_text(Some(status))),
                (
                    "messageId",
                    BoundParam::input(Value::from(message_id), Some(SqlType::Number)),
                ),
            ]),
        );
        let outcome = exec::execute(&self.manager, POOL, header).await;
        if !outcome.success {
            return outcome.cast_failure();
        }

        let body_row = Self::statement(
            "INSERT INTO CUX.CUX_PLSQL_REST_API_BODY \
             (MESSAGE_ID, CREATION_DATE, BELONGS_TO, BODY) \
             VALUES (:messageId, SYSDATE, 'RESPONSE', :body)",
            binds(vec![
                (
                    "messageId",
                    BoundParam::input(Value::from(message_id), Some(SqlType::Number)),
                ),
                (
                    "body",
                    BoundParam::input(Value::String(body.to_string()), Some(SqlType::Clob)),
                ),
            ]),
        );
        exec::execute(&self.manager, POOL, body_row)
            .await
            .map(|r| r.rows_affected)
    }

    async fn insert_callback_audit(
        &self,
        callback_id: i64,
        message_id: i64,
        queue_name: &str,
        callback_url: &str,
    ) -> DbOutcome<u64> {
        let statement = Self::statement(
            "INSERT INTO CUX.CUX_PLSQL_REST_CALLBACKS \
             (CALLBACK_ID, MESSAGE_ID, QUEUE_NAME, CALLBACK_URL, CREATION_DATE, STATUS) \
             VALUES (:callbackId, :messageId, :queueName, :callbackUrl, SYSDATE, 'NEW')",
            binds(vec![
                (
                    "callbackId",
                    BoundParam::input(Value::from(callback_id), Some(SqlType::Number)),
                ),
                (
                    "messageId",
                    BoundParam::input(Value::from(message_id), Some(SqlType::Number)),
                ),
                ("queueName", in_text(Some(queue_name))),
                ("callbackUrl", in_text(Some(callback_url))),
            ]),
        );
        exec::execute(&self.manager, POOL, statement)
            .await
            .map(|r| r.rows_affected)
    }

    async fn update_callback_audit(
        &self,
        callback_id: i64,
        status: &str,
        return_code: &str,
        return_msg: &str,
    ) -> DbOutcome<u64> {
        let statement = Self::statement(
            "UPDATE CUX.CUX_PLSQL_REST_CALLBACKS \
             SET STATUS = :status, RETURN_CODE = :returnCode, \
                 RETURN_MSG = :returnMsg, RESPONDED_DATE = SYSDATE \
             WHERE CALLBACK_ID = :callbackId",
            binds(vec![
                ("status", in_text(Some(status))),
                ("returnCode", in_text(Some(return_code))),
                ("returnMsg", in_text(Some(return_msg))),
                (
                    "callbackId",
                    BoundParam::input(Value::from(callback_id), Some(SqlType::Number)),
                ),
            ]),
        );
        exec::execute(&self.manager, POOL, statement)
            .await
            .map(|r| r.rows_affected)
    }

    async fn invoke_wrapper(&self, api: &ApiDefinition, payload: &Value) -> InvokeResult {
        let Some(wrap_name) = api.wrap_name.as_deref() else {
            return InvokeResult {
                success: false,
                result: None,
                message: Some("api definition has no wrapper name".to_string()),
            };
        };

        let block = format!(
            "BEGIN\n  {wrap_name}(P_IN => :pIn, P_OUT => :pOut);\n  COMMIT;\nEXCEPTION\n  WHEN OTHERS THEN\n    COMMIT;\n    :sqlErrm := SQLERRM;\n    :errTrace := DBMS_UTILITY.FORMAT_ERROR_BACKTRACE();\nEND;"
        );

        let mutated = upper_cased(payload);
        let bind_map = binds(vec![
            (
                "pIn",
                BoundParam::input(Value::String(mutated.to_string()), Some(SqlType::Clob)),
            ),
            (
                "pOut",
                BoundParam::in_out(Value::String(String::new()), Some(SqlType::Clob)),
            ),
            ("sqlErrm", BoundParam::output(SqlType::Varchar2)),
            ("errTrace", BoundParam::output(SqlType::Varchar2)),
        ]);

        let outcome = exec::execute_procedure(&self.manager, POOL, block, bind_map).await;
        if !outcome.success {
            warn!(wrap_name, "wrapper execution failed");
            return InvokeResult {
                success: false,
                result: None,
                message: outcome.message,
            };
        }

        let outs = outcome.data.unwrap_or_default();
        let sql_errm = out_text(&outs, "sqlErrm");
        let result = outs
            .get("pOut")
            .and_then(Value::as_str)
            .and_then(|text| serde_json::from_str(text).ok());

        if sql_errm.is_empty() {
            InvokeResult {
                success: true,
                result,
                message: None,
            }
        } else {
            InvokeResult {
                success: false,
                result,
                message: Some(format!("{sql_errm}\n{}", out_text(&outs, "errTrace"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upper_cased_recurses_objects_and_arrays() {
        let payload = json!({
            "requestInfo": {
                "header": {"sourceCode": "SRM"},
                "lines": [{"itemNo": 1}, {"itemNo": 2}]
            }
        });
        let upper = upper_cased(&payload);
        assert_eq!(upper["REQUESTINFO"]["HEADER"]["SOURCECODE"], json!("SRM"));
        assert_eq!(upper["REQUESTINFO"]["LINES"][1]["ITEMNO"], json!(2));
    }

    #[test]
    fn test_upper_cased_leaves_scalars_alone() {
        assert_eq!(upper_cased(&json!("text")), json!("text"));
        assert_eq!(upper_cased(&json!(42)), json!(42));
    }
}
