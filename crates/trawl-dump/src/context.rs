//! Shared job state
//!
//! One [`DumpContext`] lives for a dump job, shared between the coordinator
//! and every worker. The instance cache and naming map are set exactly once
//! at the end of the CACHED phase and read-only afterwards; byte accounting
//! uses atomics and small mutex-guarded maps.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Notify;
use tracing::error;

use crate::cache::{InstanceCache, SchemaId, TableId, ViewId};
use crate::config::DumpOptions;
use crate::error::{DumpError, Result};
use crate::filenames::{encode_schema_basename, encode_table_basename, BasenameRegistry};
use crate::interrupt::Interrupt;
use crate::progress::Progress;
use crate::queue::TaskQueue;
use crate::task::WriterHandle;
use crate::writer::{DumpWriter, WriteResult};

/// Final basenames and the data file extension for every dumped object.
#[derive(Debug, Default)]
pub struct NamingMap {
    schema_basenames: Vec<String>,
    table_basenames: Vec<Vec<String>>,
    view_basenames: Vec<Vec<String>>,
    /// Data file extension including the compression suffix
    pub data_extension: String,
}

impl NamingMap {
    /// Assign basenames for everything in the cache.
    pub fn build(cache: &InstanceCache, options: &DumpOptions) -> Self {
        let mut registry = BasenameRegistry::new();
        let mut naming = NamingMap {
            data_extension: format!(
                "{}{}",
                options.dialect.extension(),
                options.compression.extension_suffix()
            ),
            ..Default::default()
        };

        for schema in &cache.schemas {
            naming
                .schema_basenames
                .push(registry.assign(&encode_schema_basename(&schema.name)));
            naming.table_basenames.push(
                schema
                    .tables
                    .iter()
                    .map(|t| registry.assign(&encode_table_basename(&schema.name, &t.name)))
                    .collect(),
            );
            naming.view_basenames.push(
                schema
                    .views
                    .iter()
                    .map(|v| registry.assign(&encode_table_basename(&schema.name, &v.name)))
                    .collect(),
            );
        }

        naming
    }

    /// Basename of a schema.
    pub fn schema_basename(&self, id: SchemaId) -> &str {
        &self.schema_basenames[id.0]
    }

    /// Basename of a table.
    pub fn table_basename(&self, id: TableId) -> &str {
        &self.table_basenames[id.schema][id.table]
    }

    /// Basename of a view.
    pub fn view_basename(&self, id: ViewId) -> &str {
        &self.view_basenames[id.schema][id.view]
    }
}

/// Counts worker readiness signals; the coordinator waits for all of them
/// while holding the read locks so every snapshot opens under the lock.
#[derive(Default)]
pub struct ReadySignal {
    count: parking_lot::Mutex<usize>,
    notify: Notify,
}

impl ReadySignal {
    /// Signal one ready worker. Never blocks.
    pub fn notify_one(&self) {
        *self.count.lock() += 1;
        self.notify.notify_waiters();
    }

    /// Wait until `expected` workers have signalled.
    pub async fn wait_for(&self, expected: usize) {
        loop {
            let notified = self.notify.notified();
            if *self.count.lock() >= expected {
                return;
            }
            notified.await;
        }
    }
}

/// State shared by the coordinator and the worker pool for one job.
pub struct DumpContext {
    /// Immutable job configuration
    pub options: DumpOptions,
    /// Job interrupt flag
    pub interrupt: Arc<Interrupt>,
    /// Work queue
    pub queue: TaskQueue,
    /// Progress counters and reporter
    pub progress: Progress,
    /// Worker readiness accounting
    pub ready: ReadySignal,
    /// Number of workers
    pub worker_count: usize,
    /// Output directory (parent directory in single-file mode)
    pub output_dir: PathBuf,

    cache: OnceCell<InstanceCache>,
    naming: OnceCell<NamingMap>,
    single_writer: tokio::sync::Mutex<Option<Arc<tokio::sync::Mutex<DumpWriter>>>>,
    table_data_bytes: parking_lot::Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
    chunk_file_bytes: parking_lot::Mutex<BTreeMap<String, u64>>,
    chunking_tasks: AtomicUsize,
    finished_producing: AtomicBool,
    shutdown_issued: AtomicBool,
    worker_errors: parking_lot::Mutex<Vec<Option<DumpError>>>,
}

impl DumpContext {
    /// Create the context for a job.
    pub fn new(options: DumpOptions, interrupt: Arc<Interrupt>) -> Arc<Self> {
        let worker_count = options.threads;
        let output_dir = if options.single_file {
            options
                .output
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            options.output.clone()
        };
        let show_progress = options.show_progress;
        let mut worker_errors = Vec::with_capacity(worker_count);
        worker_errors.resize_with(worker_count, || None);

        Arc::new(Self {
            options,
            interrupt,
            queue: TaskQueue::new(),
            progress: Progress::new(show_progress),
            ready: ReadySignal::default(),
            worker_count,
            output_dir,
            cache: OnceCell::new(),
            naming: OnceCell::new(),
            single_writer: tokio::sync::Mutex::new(None),
            table_data_bytes: parking_lot::Mutex::new(BTreeMap::new()),
            chunk_file_bytes: parking_lot::Mutex::new(BTreeMap::new()),
            chunking_tasks: AtomicUsize::new(0),
            finished_producing: AtomicBool::new(false),
            shutdown_issued: AtomicBool::new(false),
            worker_errors: parking_lot::Mutex::new(worker_errors),
        })
    }

    /// Install the instance cache; may only happen once.
    pub fn set_cache(&self, cache: InstanceCache) -> Result<()> {
        self.cache
            .set(cache)
            .map_err(|_| DumpError::invalid_state("instance cache installed twice"))
    }

    /// Install the naming map; may only happen once.
    pub fn set_naming(&self, naming: NamingMap) -> Result<()> {
        self.naming
            .set(naming)
            .map_err(|_| DumpError::invalid_state("naming map installed twice"))
    }

    /// The instance cache; an error before the CACHED phase completed.
    pub fn cache(&self) -> Result<&InstanceCache> {
        self.cache
            .get()
            .ok_or_else(|| DumpError::invalid_state("instance cache not yet built"))
    }

    /// The naming map; an error before the CACHED phase completed.
    pub fn naming(&self) -> Result<&NamingMap> {
        self.naming
            .get()
            .ok_or_else(|| DumpError::invalid_state("naming map not yet built"))
    }

    /// Record written rows and bytes against a table.
    pub fn update_progress(&self, schema: &str, table: &str, rows: u64, bytes: WriteResult) {
        if bytes.data_bytes > 0 {
            let mut map = self.table_data_bytes.lock();
            *map.entry(schema.to_string())
                .or_default()
                .entry(table.to_string())
                .or_default() += bytes.data_bytes;
        }
        self.progress.update(rows, bytes);
    }

    /// Record the final on-disk size of a finished data file.
    pub fn record_chunk_file(&self, filename: String, bytes_written: u64) {
        self.chunk_file_bytes.lock().insert(filename, bytes_written);
    }

    /// Snapshot of the per-table data byte map.
    pub fn table_data_bytes(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.table_data_bytes.lock().clone()
    }

    /// Snapshot of the per-file byte map.
    pub fn chunk_file_bytes(&self) -> BTreeMap<String, u64> {
        self.chunk_file_bytes.lock().clone()
    }

    /// A chunk-discovery task was scheduled.
    pub fn chunking_task_created(&self) {
        self.chunking_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// A chunk-discovery task finished; the last one triggers shutdown.
    pub async fn chunking_task_finished(&self) {
        self.chunking_tasks.fetch_sub(1, Ordering::SeqCst);
        self.maybe_push_shutdown().await;
    }

    /// The coordinator finished producing tasks.
    pub async fn producer_finished(&self) {
        self.finished_producing.store(true, Ordering::SeqCst);
        self.maybe_push_shutdown().await;
    }

    async fn maybe_push_shutdown(&self) {
        if self.finished_producing.load(Ordering::SeqCst)
            && self.chunking_tasks.load(Ordering::SeqCst) == 0
            && !self.shutdown_issued.swap(true, Ordering::SeqCst)
        {
            self.queue.shutdown(self.worker_count).await;
        }
    }

    /// Interrupt the job and wake every worker.
    pub async fn emergency_shutdown(&self) {
        self.interrupt.trigger();
        if !self.shutdown_issued.swap(true, Ordering::SeqCst) {
            self.queue.shutdown(self.worker_count).await;
        }
    }

    /// Store a worker's error in its slot; the first one wins.
    pub fn record_worker_error(&self, worker: usize, error: DumpError) {
        error!("[worker {:03}] {}", worker, error);
        let mut slots = self.worker_errors.lock();
        if let Some(slot) = slots.get_mut(worker) {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
    }

    /// Drain the worker error slots.
    pub fn take_worker_errors(&self) -> Vec<Option<DumpError>> {
        let mut slots = self.worker_errors.lock();
        let len = slots.len();
        std::mem::replace(&mut *slots, {
            let mut fresh = Vec::with_capacity(len);
            fresh.resize_with(len, || None);
            fresh
        })
    }

    /// Create the writer for a data file, honoring single-file mode.
    pub async fn data_writer(&self, filename: &str) -> Result<WriterHandle> {
        if self.options.single_file {
            let mut shared = self.single_writer.lock().await;
            if shared.is_none() {
                let writer = DumpWriter::create(
                    self.options.output.clone(),
                    &self.options.dialect,
                    self.options.compression,
                    false,
                    None,
                )?;
                *shared = Some(Arc::new(tokio::sync::Mutex::new(writer)));
            }
            let writer = shared
                .as_ref()
                .cloned()
                .ok_or_else(|| DumpError::invalid_state("single-file writer vanished"))?;
            return Ok(WriterHandle::Shared(writer));
        }

        let path = self.output_dir.join(filename);
        let index_path = self
            .options
            .index_files
            .then(|| self.output_dir.join(format!("{}.idx", filename)));
        let writer = DumpWriter::create(
            path,
            &self.options.dialect,
            self.options.compression,
            true,
            index_path,
        )?;
        Ok(WriterHandle::Owned(Box::new(writer)))
    }

    /// Close the shared single-file writer, if one was opened. Returns its
    /// final path and on-disk size.
    pub async fn close_single_writer(&self) -> Result<Option<(PathBuf, u64)>> {
        let shared = self.single_writer.lock().await.take();
        let Some(shared) = shared else {
            return Ok(None);
        };
        let mut writer = shared.lock().await;
        writer.close()?;
        Ok(Some((
            writer.output_path().to_path_buf(),
            writer.bytes_written(),
        )))
    }
}
