//! # procgraph-store - Snapshot persistence for the procgraph runtime
//!
//! This crate defines the **storage contract** consumed by the procgraph
//! orchestrator: the snapshot record types, the [`ProcessStore`] trait that
//! storage backends implement, and an in-memory reference backend used in
//! tests and single-node deployments.
//!
//! The runtime persists three kinds of records, each keyed by
//! `(step_id, run_id)`:
//!
//! - **Process snapshots** ([`ProcessSnapshot`]) - the state of a process and
//!   all of its steps, taken once per superstep.
//! - **Step state** ([`StepStateRecord`]) - the user state of a single step,
//!   taken after every successful invocation.
//! - **Edge-group partials** ([`EdgeDataRecord`]) - accumulated inputs of an
//!   open AllOf join, taken after every partial accumulation and cleared on
//!   release.
//!
//! Backends are expected to be durable and concurrency-safe; beyond that the
//! contract is deliberately small so that any key/value system (SQLite,
//! Postgres, Redis, object storage) can sit behind it.
//!
//! ## Example: custom backend
//!
//! ```rust,ignore
//! use procgraph_store::{ProcessStore, RecordKey, StepStateRecord, Result};
//! use async_trait::async_trait;
//!
//! struct PostgresStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl ProcessStore for PostgresStore {
//!     async fn save_step_state(&self, key: &RecordKey, record: StepStateRecord) -> Result<()> {
//!         // INSERT ... ON CONFLICT (step_id, run_id) DO UPDATE ...
//!         Ok(())
//!     }
//!     // ... remaining methods ...
//! }
//! ```

pub mod error;
pub mod memory;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryProcessStore;
pub use records::{EdgeDataRecord, ProcessSnapshot, RecordKey, StepSnapshot, StepStateRecord};
pub use store::ProcessStore;
