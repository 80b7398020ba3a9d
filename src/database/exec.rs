//! Statement executors.
//!
//! Each function acquires one connection, runs exactly one compiled
//! statement (or one bind-set loop for batches) on the blocking pool, and
//! guarantees release: success checks the connection back in, failure
//! poisons it so the pool discards it. Results always come back in the
//! uniform [`DbOutcome`] shape, logged with the originating operation name.

use std::sync::Arc;

use chrono::NaiveDateTime;
use oracle::sql_type::{OracleType, ToSql};
use serde_json::{Map, Number, Value};
use tracing::error;

use crate::database::manager::{Acquired, ConnectionManager};
use crate::database::DbOutcome;
use crate::ora::binds::{BindDirection, BindMap};
use crate::ora::mapper::{SqlType, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::ora::statement::{BatchStatement, CompiledStatement};

/// Result of one DML execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// OUT/INOUT bind values keyed by bind name.
    pub out_binds: Map<String, Value>,
}

/// Result of one batch execution (one parameterized statement, one
/// execution per bind set).
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub rows_affected: u64,
    /// Per-set OUT bind values, in input order.
    pub out_binds: Vec<Map<String, Value>>,
}

/// Run a SELECT and return rows as physical-column-keyed records.
pub async fn query(
    manager: &Arc<ConnectionManager>,
    alias: &str,
    statement: CompiledStatement,
) -> DbOutcome<Vec<Map<String, Value>>> {
    let manager = Arc::clone(manager);
    let alias = alias.to_string();
    run_blocking("query", move || {
        with_connection("query", &manager, &alias, |conn| {
            let params = input_params(&statement.binds);
            let refs = param_refs(&params);
            let rows = conn.query_named(&statement.sql, &refs)?;

            let columns: Vec<(String, OracleType)> = rows
                .column_info()
                .iter()
                .map(|info| (info.name().to_string(), info.oracle_type().clone()))
                .collect();

            let mut records = Vec::new();
            for row in rows {
                let row = row?;
                let mut record = Map::new();
                for (i, (name, oracle_type)) in columns.iter().enumerate() {
                    let fetch_as_text = statement
                        .options
                        .clob_as_string
                        .iter()
                        .any(|clob| *clob == name.as_str());
                    let value = if fetch_as_text {
                        string_value(row.get::<usize, Option<String>>(i)?)
                    } else {
                        column_value(&row, i, oracle_type)?
                    };
                    record.insert(name.clone(), value);
                }
                records.push(record);
                if let Some(max) = statement.options.max_rows {
                    if records.len() as u32 >= max {
                        break;
                    }
                }
            }
            Ok(records)
        })
    })
    .await
}

/// Run one DML statement with autocommit semantics.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    alias: &str,
    statement: CompiledStatement,
) -> DbOutcome<ExecResult> {
    let manager = Arc::clone(manager);
    let alias = alias.to_string();
    run_blocking("execute", move || {
        with_connection("execute", &manager, &alias, |conn| {
            let mut stmt = conn.statement(&statement.sql).build()?;
            let params = all_params(&statement.binds);
            let refs = param_refs(&params);
            stmt.execute_named(&refs)?;

            let mut out_binds = Map::new();
            for name in statement.binds.out_names() {
                let values: Vec<Option<String>> = stmt.returned_values(name.as_str())?;
                let sql_type = statement.binds.get(&name).and_then(|p| p.sql_type);
                out_binds.insert(name, out_value(sql_type, values.into_iter().flatten().next()));
            }

            let rows_affected = stmt.row_count()?;
            conn.commit()?;
            Ok(ExecResult {
                rows_affected,
                out_binds,
            })
        })
    })
    .await
}

/// Run one parameterized statement once per bind set, committing once at
/// the end.
pub async fn execute_many(
    manager: &Arc<ConnectionManager>,
    alias: &str,
    batch: BatchStatement,
) -> DbOutcome<BatchResult> {
    let manager = Arc::clone(manager);
    let alias = alias.to_string();
    run_blocking("execute_many", move || {
        with_connection("execute_many", &manager, &alias, |conn| {
            let mut stmt = conn.statement(&batch.sql).build()?;
            let mut rows_affected = 0u64;
            let mut out_binds = Vec::with_capacity(batch.bind_sets.len());

            for binds in &batch.bind_sets {
                let params = all_params(binds);
                let refs = param_refs(&params);
                stmt.execute_named(&refs)?;
                rows_affected += stmt.row_count()?;

                let mut set_out = Map::new();
                for name in binds.out_names() {
                    let values: Vec<Option<String>> = stmt.returned_values(name.as_str())?;
                    let sql_type = binds.get(&name).and_then(|p| p.sql_type);
                    set_out.insert(name, out_value(sql_type, values.into_iter().flatten().next()));
                }
                out_binds.push(set_out);
            }

            conn.commit()?;
            Ok(BatchResult {
                rows_affected,
                out_binds,
            })
        })
    })
    .await
}

/// Run an anonymous PL/SQL block and collect its OUT/INOUT binds.
pub async fn execute_procedure(
    manager: &Arc<ConnectionManager>,
    alias: &str,
    sql: String,
    binds: BindMap,
) -> DbOutcome<Map<String, Value>> {
    let manager = Arc::clone(manager);
    let alias = alias.to_string();
    run_blocking("execute_procedure", move || {
        with_connection("execute_procedure", &manager, &alias, |conn| {
            let mut stmt = conn.statement(&sql).build()?;
            let params = all_params(&binds);
            let refs = param_refs(&params);
            stmt.execute_named(&refs)?;

            let mut out_binds = Map::new();
            for name in binds.out_names() {
                let value: Option<String> = stmt.bind_value(name.as_str())?;
                let sql_type = binds.get(&name).and_then(|p| p.sql_type);
                out_binds.insert(name, out_value(sql_type, value));
            }
            conn.commit()?;
            Ok(out_binds)
        })
    })
    .await
}

/// Spawn the closure on the blocking pool and fold a join failure into the
/// uniform outcome.
async fn run_blocking<T, F>(operation: &'static str, f: F) -> DbOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> DbOutcome<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(operation, error = %e, "blocking task failed");
            DbOutcome::fail("TASK_JOIN", e.to_string())
        }
    }
}

/// Acquire, run, and release with the drop-on-error policy.
fn with_connection<T>(
    operation: &'static str,
    manager: &ConnectionManager,
    alias: &str,
    f: impl FnOnce(&oracle::Connection) -> oracle::Result<T>,
) -> DbOutcome<T> {
    let acquired: Acquired = match manager.acquire(alias) {
        Ok(acquired) => acquired,
        Err((error_code, message)) => return DbOutcome::fail(error_code, message),
    };

    match f(acquired.oracle().raw()) {
        Ok(data) => DbOutcome::ok(data),
        Err(e) => {
            // session state is suspect; do not return this connection
            acquired.oracle().poison();
            error!(operation, alias, error = %e, "statement execution failed");
            DbOutcome::fail(ora_code(&e), e.to_string())
        }
    }
}

/// Extract the `ORA-NNNNN` code, falling back to a generic marker.
fn ora_code(e: &oracle::Error) -> String {
    let text = e.to_string();
    match text.find("ORA-") {
        Some(start) => text[start..]
            .chars()
            .take_while(|c| *c == '-' || c.is_ascii_alphanumeric())
            .collect(),
        None => "ORA-ERROR".to_string(),
    }
}

enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    NullText(Option<String>),
    NullNumber(Option<f64>),
    OutType(OracleType),
}

impl SqlParam {
    fn as_to_sql(&self) -> &dyn ToSql {
        match self {
            Self::Text(v) => v,
            Self::Int(v) => v,
            Self::Float(v) => v,
            Self::NullText(v) => v,
            Self::NullNumber(v) => v,
            Self::OutType(t) => t,
        }
    }
}

fn lower_value(value: &Value, sql_type: Option<SqlType>) -> SqlParam {
    match value {
        Value::Null => match sql_type {
            Some(SqlType::Number) => SqlParam::NullNumber(None),
            _ => SqlParam::NullText(None),
        },
        Value::String(s) => SqlParam::Text(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlParam::Int(i),
            None => SqlParam::Float(n.as_f64().unwrap_or_default()),
        },
        Value::Bool(b) => SqlParam::Text(if *b { "Y" } else { "N" }.to_string()),
        other => SqlParam::Text(other.to_string()),
    }
}

fn out_oracle_type(sql_type: Option<SqlType>) -> OracleType {
    match sql_type {
        Some(SqlType::Number) => OracleType::Number(0, 0),
        Some(SqlType::Clob) => OracleType::CLOB,
        _ => OracleType::Varchar2(32767),
    }
}

/// All binds, with OUT/INOUT binds declared by type.
fn all_params(binds: &BindMap) -> Vec<(String, SqlParam)> {
    binds
        .iter()
        .map(|(name, param)| {
            let lowered = match param.direction {
                BindDirection::In | BindDirection::InOut => {
                    // INOUT carries its input value; the driver sizes the
                    // buffer from the declared type on the way back.
                    lower_value(&param.value, param.sql_type)
                }
                BindDirection::Out => SqlParam::OutType(out_oracle_type(param.sql_type)),
            };
            (name.to_string(), lowered)
        })
        .collect()
}

/// Input binds only (queries have no out binds).
fn input_params(binds: &BindMap) -> Vec<(String, SqlParam)> {
    binds
        .iter()
        .filter(|(_, p)| p.direction == BindDirection::In)
        .map(|(name, param)| (name.to_string(), lower_value(&param.value, param.sql_type)))
        .collect()
}

fn param_refs(params: &[(String, SqlParam)]) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, param)| (name.as_str(), param.as_to_sql()))
        .collect()
}

fn string_value(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

fn out_value(sql_type: Option<SqlType>, value: Option<String>) -> Value {
    match (sql_type, value) {
        (_, None) => Value::Null,
        (Some(SqlType::Number), Some(text)) => match text.parse::<i64>() {
            Ok(i) => Value::Number(Number::from(i)),
            Err(_) => text
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map_or(Value::String(text), Value::Number),
        },
        (_, Some(text)) => Value::String(text),
    }
}

fn column_value(row: &oracle::Row, index: usize, oracle_type: &OracleType) -> oracle::Result<Value> {
    let value = match oracle_type {
        OracleType::Number(_, _) | OracleType::Float(_) | OracleType::BinaryDouble
        | OracleType::BinaryFloat | OracleType::Int64 => {
            match row.get::<usize, Option<f64>>(index)? {
                Some(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                    Value::Number(Number::from(n as i64))
                }
                Some(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
                None => Value::Null,
            }
        }
        OracleType::Date => match row.get::<usize, Option<NaiveDateTime>>(index)? {
            Some(ts) => Value::String(ts.format(DATE_FORMAT).to_string()),
            None => Value::Null,
        },
        OracleType::Timestamp(_) | OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            match row.get::<usize, Option<NaiveDateTime>>(index)? {
                Some(ts) => Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
                None => Value::Null,
            }
        }
        _ => string_value(row.get::<usize, Option<String>>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lower_value_types() {
        assert!(matches!(
            lower_value(&json!("x"), None),
            SqlParam::Text(ref s) if s == "x"
        ));
        assert!(matches!(lower_value(&json!(5), None), SqlParam::Int(5)));
        assert!(matches!(
            lower_value(&Value::Null, Some(SqlType::Number)),
            SqlParam::NullNumber(None)
        ));
        assert!(matches!(
            lower_value(&Value::Null, Some(SqlType::Varchar2)),
            SqlParam::NullText(None)
        ));
    }

    #[test]
    fn test_out_value_number_parsing() {
        assert_eq!(
            out_value(Some(SqlType::Number), Some("12345".to_string())),
            json!(12345)
        );
        assert_eq!(
            out_value(Some(SqlType::Varchar2), Some("12345".to_string())),
            json!("12345")
        );
        assert_eq!(out_value(Some(SqlType::Number), None), Value::Null);
    }

    #[test]
    fn test_ora_code_extraction() {
        // shape check only; constructing an oracle::Error needs a server
        let text = "ORA-00942: table or view does not exist";
        let start = text.find("ORA-").unwrap();
        let code: String = text[start..]
            .chars()
            .take_while(|c| *c == '-' || c.is_ascii_alphanumeric())
            .collect();
        assert_eq!(code, "ORA-00942");
    }
}
