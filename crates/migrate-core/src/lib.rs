//! Resumable, version-adaptive bulk COPY engine for migrating partitioned
//! historical tables between PostgreSQL databases of different major
//! versions.
//!
//! The crate is organized around the components of the migration pipeline:
//! version detection and session tuning ([`version`], [`connection`]), the
//! static table-type registry ([`table_types`]), partition discovery
//! ([`discovery`]), destination schema materialization ([`table_creator`]),
//! the chunked streaming transfer itself ([`copy_engine`]), the checkpoint
//! and history store ([`store`]), input validation ([`validate`]), and the
//! [`orchestrator`] that ties them together into one resumable job.

pub mod config;
pub mod connection;
pub mod copy_engine;
pub mod discovery;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod table_creator;
pub mod table_types;
pub mod validate;
pub mod version;

pub use config::{ConnectionConfig, ErrorStrategy, MigrationJobConfig, TransferMode, TruncateMode};
pub use error::{MigrateError, MigrateResult};
pub use events::Event;
pub use orchestrator::{JobControl, Orchestrator};
pub use store::Store;
