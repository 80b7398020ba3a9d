#![allow(clippy::doc_markdown)] // Allow technical terms like PL/SQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ESB Bridge
//!
//! Rust core of the ERP/ESB integration bridge: a typed query/command
//! builder over the legacy relational schema, queue-driven ETL transport
//! workers with per-row status tracking and retry, and a generic
//! "PL/SQL as REST" gateway with durable request/response audits.
//!
//! ## Architecture
//!
//! Statement compilation is pure and synchronous; everything that touches
//! the network - the Oracle pools, the job broker, the ESB client - sits
//! behind explicit values owned by the application root. Workers are
//! scheduled cooperatively by the broker, one logical worker per
//! interface-queue pair.
//!
//! ## Module Organization
//!
//! - [`ora`] - column mapping, criteria compiler, statement builders and
//!   the generic repository
//! - [`database`] - connection manager and statement executors
//! - [`broker`] - the opaque FIFO/delayed job queue and its runners
//! - [`esb`] - envelope types and the outbound HTTP client
//! - [`basic_data`] - ETL transport workers and their admin surface
//! - [`plsql`] - the PL/SQL-as-REST gateway
//! - [`web`] - axum routes
//! - [`config`] - startup configuration
//! - [`error`] - structured error handling
//!
//! ## Failure Model
//!
//! Statement-compilation misuse fails fast with a [`BridgeError`] before
//! any I/O. Runtime database and transport failures are never thrown: they
//! come back in the uniform outcome shape (`success`, `errorCode`,
//! `message`) and the caller decides whether to retry. Business failure of
//! an ESB call is signaled solely by a `returnCode` not starting with
//! `'A'`, and drives exactly one per-row retry.

pub mod basic_data;
pub mod broker;
pub mod config;
pub mod database;
pub mod error;
pub mod esb;
pub mod logging;
pub mod ora;
pub mod plsql;
pub mod web;

pub use config::BridgeConfig;
pub use database::{ConnectionManager, DbOutcome};
pub use error::{BridgeError, Result};
