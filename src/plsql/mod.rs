//! # PL/SQL-as-REST Gateway
//!
//! Wraps registered stored procedures as HTTP endpoints:
//!
//! - [`api_def`] - definition and request-history metadata
//! - [`store`] - the [`store::GatewayStore`] seam: wrapper-package calls,
//!   status flips, audits, wrapper execution
//! - [`service`] - invocation paths (synchronous and callback) and the
//!   admin surface
//! - [`worker`] - registration (with the INVALID compensation) and
//!   callback consumers
//!
//! Every invocation is durably audited before and after the wrapper call
//! so calls can be replayed and troubleshot.

pub mod api_def;
pub mod service;
pub mod store;
pub mod worker;

pub use api_def::{ApiDefinition, ApiRequestHistory, ApiStatus, RegistParams};
pub use service::{CallbackRuntime, GatewayService, Invoker, CALLBACK_QUEUE_LIMIT, REGIST_QUEUE};
pub use store::{GatewayStore, InvokeResult, SqlGatewayStore};
pub use worker::{run_registration, CallbackWorker, RegistWorker};
