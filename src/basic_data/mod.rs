//! # Basic-Data ETL
//!
//! Scheduled/triggered ETL feeds pushing legacy rows to the purchasing
//! system through the ESB:
//!
//! - [`status`] - the PENDING/RUNNING/SUCCESS/ERROR row lifecycle
//! - [`profile`] - per-interface job profiles and worker settings
//! - [`store`] - the [`store::TransportStore`] seam over the status table
//! - [`worker`] - update/transport/retry workers (the state machine)
//! - [`service`] - administrative start/stop/status per interface
//! - [`receipts`] - grouped purchase-receipt feed
//! - [`branches`] - cursor-paged bank-branch feed
//!
//! Invariants the workers maintain per interface: at most one update job
//! and at most one transport job in flight (best-effort queue-count
//! guards), and exactly one automatic retry per failed row.

pub mod branches;
pub mod profile;
pub mod receipts;
pub mod service;
pub mod status;
pub mod store;
pub mod worker;

pub use profile::{JobProfile, ProfileStore, WorkerSettings, DEFAULT_TRANSPORT_ROW_LIMIT};
pub use service::InterfaceService;
pub use status::ProcessStatus;
pub use store::{MarkOutcome, MarkUpdateParams, SqlTransportStore, StatusAssign, TransportStore};
pub use worker::{InterfaceSpec, TransportWorker, UpdateWorker, JOB_TYPE_BATCH, JOB_TYPE_RETRY};
