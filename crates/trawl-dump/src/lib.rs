//! # trawl-dump
//!
//! Parallel, consistent, chunked logical dumper for MySQL-compatible
//! servers.
//!
//! A dump job extracts the contents of a server into a directory of files
//! suitable for later bulk reload: DDL scripts, delimited (or JSON) data
//! files split into roughly equally sized chunks, optional `.idx` sidecars
//! enabling parallel reload, and JSON descriptors tying everything together.
//!
//! ## How a job runs
//!
//! The coordinator opens a primary session, takes a global read lock
//! (falling back to per-table locks when the privilege is missing), and
//! starts a pool of workers that each open a `REPEATABLE READ` transaction
//! with a consistent snapshot while the lock is held, so every worker
//! observes the same logical point in time. Metadata is cached once, DDL
//! and chunk-discovery tasks are fanned out over a prioritized queue, and
//! chunk discovery itself emits the data tasks, so discovery and extraction
//! overlap. `@.done.json` is written only when every task finished; its
//! absence marks a torn dump.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trawl_dump::{run, Compression, Dialect, DumpOptions};
//!
//! let options = DumpOptions::builder("mysql://root@localhost:3306", "/backups/shop")
//!     .threads(8)
//!     .compression(Compression::Zstd)
//!     .dialect(Dialect::Tsv)
//!     .include_schemas(["shop"])
//!     .build();
//!
//! let summary = run(options).await?;
//! println!("dumped {} rows", summary.rows_written);
//! ```
//!
//! Cancellation: [`Dumper::interrupt`] returns a handle that can be
//! triggered from a signal handler; the job then drains to a clean stop and
//! [`run`] surfaces [`DumpError::Cancelled`].

pub mod cache;
pub mod chunker;
pub mod compression;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dialect;
pub mod error;
pub mod filenames;
pub mod interrupt;
pub mod manifest;
pub mod privileges;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod schema_dumper;
pub mod task;
pub mod worker;
pub mod writer;

use std::sync::Arc;

use trawl_sql::MySqlSessionFactory;

pub use compression::Compression;
pub use config::{CompatibilityOption, DumpOptions, DumpOptionsBuilder};
pub use coordinator::{DumpSummary, Dumper};
pub use dialect::Dialect;
pub use error::{DumpError, Result};
pub use interrupt::Interrupt;

/// Run a dump job against the server named in the options.
///
/// On success the job's summary is returned; on operator interrupt
/// [`DumpError::Cancelled`] is surfaced; on any other failure the first
/// worker or coordinator error is.
pub async fn run(options: DumpOptions) -> Result<DumpSummary> {
    let factory = Arc::new(MySqlSessionFactory::new(options.url.clone()));
    Dumper::new(options, factory)?.run().await
}
