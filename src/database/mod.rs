//! # Legacy Database Access
//!
//! Connection lifecycle and statement execution against the legacy Oracle
//! schema.
//!
//! ## Key Components
//!
//! - [`manager`] - the [`manager::ConnectionManager`] value owned by the
//!   application root: `init(configs)` → `acquire`/release → `shutdown()`.
//!   No process-global connection state.
//! - [`exec`] - uniform executors (`query`, `execute`, `execute_many`,
//!   `execute_procedure`). Execution failures never panic or propagate as
//!   errors; they are reported in the [`DbOutcome`] shape below so callers
//!   decide what to do.
//!
//! A connection that saw an execution error is poisoned and discarded on
//! check-in instead of returning to the pool; its session state is suspect.

pub mod exec;
pub mod manager;

use serde::Serialize;

pub use exec::{execute, execute_many, execute_procedure, query, BatchResult, ExecResult};
pub use manager::{ConnectionManager, OracleConnectConfig};

/// Uniform result shape of every database operation.
///
/// `success` is the only field callers may rely on unconditionally;
/// `error_code`/`message` are populated on failure, `data` on success.
#[derive(Debug, Clone, Serialize)]
pub struct DbOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> DbOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            message: None,
        }
    }

    pub fn fail(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(error_code.into()),
            message: Some(message.into()),
        }
    }

    /// Carry a failure across a data-type boundary.
    pub fn cast_failure<U>(self) -> DbOutcome<U> {
        DbOutcome {
            success: false,
            data: None,
            error_code: self.error_code,
            message: self.message,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DbOutcome<U> {
        DbOutcome {
            success: self.success,
            data: self.data.map(f),
            error_code: self.error_code,
            message: self.message,
        }
    }
}
