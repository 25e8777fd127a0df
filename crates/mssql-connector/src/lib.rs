//! # mssql-connector
//!
//! Embeddable-engine facade over the SQL Server connector.
//!
//! Where [`mssql_client`] and [`mssql_driver_pool`] expose a general-purpose
//! async SQL Server client and pool, this crate narrows that surface to what
//! a columnar analytics engine needs to treat SQL Server as an attachable
//! data source: catalog discovery, pushdown-aware query planning, batched
//! DML, and BCP bulk ingest, all behind one connection-string-keyed
//! attachment.
//!
//! ## Layout
//!
//! - [`secret`] — connection identity and the engine's connection-string grammar
//! - [`settings`] — the attachment's extension settings table
//! - [`context`] — per-attachment state and the process-wide attachment registry
//! - [`catalog`] — `sys.*` discovery queries and the SQL-type/logical-type mapping
//! - [`planner`] — predicate pushdown into parameterized `sp_executesql` calls
//! - [`dml`] — batched INSERT/UPDATE/DELETE and CTAS statement building
//! - [`result_stream`] — row-major to column-chunked result reshaping
//! - [`bcp`] — bulk ingest orchestration over [`mssql_client::Client::bulk_insert`]
//! - [`error`] — the unified error taxonomy every lower-layer error collapses into

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bcp;
pub mod catalog;
pub mod context;
pub mod dml;
pub mod error;
pub mod planner;
pub mod result_stream;
pub mod secret;
pub mod settings;

pub use context::{AttachmentContext, Registry};
pub use error::{ConnectorError, Result};
pub use secret::{RedactedSecret, Secret};
pub use settings::Settings;
