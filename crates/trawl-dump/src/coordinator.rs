//! Job coordination
//!
//! [`Dumper`] drives a dump job through its phases: open the primary
//! session, take the global read lock (falling back to table locks), start
//! the worker pool so every snapshot opens under the lock, build the
//! instance cache, validate privileges and compatibility, emit tasks, and
//! finalize the manifests. Any worker error or an operator interrupt aborts
//! the job; `@.done.json` is only written for a complete dump.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trawl_sql::{kill_query, quote_ident, Session, SessionFactory};

use crate::cache::{InstanceCache, InstanceCacheBuilder, SchemaId, TableId, ViewId};
use crate::config::DumpOptions;
use crate::context::{DumpContext, NamingMap};
use crate::error::{DumpError, Result};
use crate::filenames::schema_filename;
use crate::interrupt::Interrupt;
use crate::manifest::{
    timestamp_now, write_json, DoneManifest, DumpManifest, SchemaManifest,
};
use crate::privileges::{validate_required, UserPrivileges};
use crate::progress::{format_bytes, format_duration, format_throughput};
use crate::schema_dumper::{Issue, IssueStatus, SchemaDumper};
use crate::task::{Priority, Task};
use crate::worker::Worker;

/// Tables in the `mysql` schema whose data is never dumped.
const SKIPPED_SYSTEM_TABLES: &[&str] = &["apply_status", "general_log", "schema", "slow_log"];

/// Grant and routine tables locked on the table-lock fallback path so users,
/// views and routines stay consistent too.
const SYSTEM_LOCK_TABLES: &str = "'columns_priv', 'db', 'default_roles', 'func', \
     'global_grants', 'proc', 'procs_priv', 'proxies_priv', 'role_edges', 'tables_priv', 'user'";

/// Aggregate results of a finished dump.
#[derive(Debug, Clone)]
pub struct DumpSummary {
    /// Schemas dumped
    pub schemas: usize,
    /// Tables dumped
    pub tables: usize,
    /// Views dumped
    pub views: usize,
    /// Rows written
    pub rows_written: u64,
    /// Pre-compression bytes written
    pub data_bytes: u64,
    /// On-disk bytes written
    pub bytes_written: u64,
    /// Wall-clock duration
    pub duration: Duration,
}

impl DumpSummary {
    /// Uncompressed-to-compressed ratio.
    pub fn compression_ratio(&self) -> f64 {
        self.data_bytes as f64 / (self.bytes_written.max(1)) as f64
    }
}

/// Coordinates one dump job.
pub struct Dumper {
    context: Arc<DumpContext>,
    factory: Arc<dyn SessionFactory>,
    session: Option<Box<dyn Session>>,
    primary_connection_id: Option<u32>,
    watcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    minimal_cache: Option<InstanceCache>,
    ftwrl_failed: bool,
    instance_locked: bool,
    started: Instant,
    begin_timestamp: String,
}

impl std::fmt::Debug for Dumper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dumper").finish_non_exhaustive()
    }
}

impl Dumper {
    /// Validate options, verify the output location and prepare a job.
    pub fn new(options: DumpOptions, factory: Arc<dyn SessionFactory>) -> Result<Self> {
        options.validate()?;
        Self::verify_output(&options)?;

        let context = DumpContext::new(options, Interrupt::new());

        Ok(Self {
            context,
            factory,
            session: None,
            primary_connection_id: None,
            watcher: None,
            workers: Vec::new(),
            minimal_cache: None,
            ftwrl_failed: false,
            instance_locked: false,
            started: Instant::now(),
            begin_timestamp: String::new(),
        })
    }

    fn verify_output(options: &DumpOptions) -> Result<()> {
        if options.single_file {
            let parent = match options.output.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            if !parent.exists() {
                return Err(DumpError::invalid_config(format!(
                    "cannot proceed with the dump, the directory containing '{}' does not exist",
                    options.output.display()
                )));
            }
            return Ok(());
        }

        if options.output.exists() {
            if !options.output.is_dir() {
                return Err(DumpError::invalid_config(format!(
                    "output location '{}' exists and is not a directory",
                    options.output.display()
                )));
            }
            let occupied = std::fs::read_dir(&options.output)?.next().is_some();
            if occupied {
                return Err(DumpError::invalid_config(format!(
                    "cannot proceed with the dump, the specified directory '{}' already exists \
                     and is not empty",
                    options.output.display()
                )));
            }
        }

        Ok(())
    }

    /// Handle for cancelling the job from another task or a signal handler.
    pub fn interrupt(&self) -> Arc<Interrupt> {
        Arc::clone(&self.context.interrupt)
    }

    /// Run the job to completion (or cancellation).
    pub async fn run(mut self) -> Result<DumpSummary> {
        let result = self.do_run().await;

        if result.is_err() {
            self.kill_workers().await;
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!("primary session close failed: {}", e);
            }
        }

        result
    }

    async fn do_run(&mut self) -> Result<DumpSummary> {
        self.started = Instant::now();
        self.begin_timestamp = timestamp_now();

        // INIT
        self.open_primary_session().await?;
        self.spawn_interrupt_watcher();

        // LOCKED
        self.acquire_read_locks().await?;
        if self.context.interrupt.is_set() {
            return Err(DumpError::Cancelled);
        }

        // SNAPSHOTTED: workers open their snapshots while the lock is held;
        // the cache is built on the primary session in the meantime
        self.spawn_workers();
        let cache = self.build_cache().await?;
        self.context.ready.wait_for(self.context.worker_count).await;

        if self.context.options.consistent && !self.context.interrupt.is_set() {
            info!("All transactions have been started");
            self.lock_instance().await?;
        }
        self.release_read_locks().await?;

        if !self.context.options.single_file && self.gtid_inconsistent() {
            warn!("The dumped value of gtid_executed is not guaranteed to be consistent");
        }

        // CACHED
        let naming = NamingMap::build(&cache, &self.context.options);
        self.context.progress.set_total_rows(cache.total_rows());
        self.context.set_cache(cache)?;
        self.context.set_naming(naming)?;

        // VALIDATED
        self.validate_privileges().await?;
        self.validate_compatibility().await?;
        if self.context.interrupt.is_set() {
            return Err(DumpError::Cancelled);
        }

        // DUMPING
        if !self.context.options.dry_run {
            self.initialize_output().await?;
        }
        self.create_ddl_tasks().await?;
        self.create_table_tasks().await?;

        if !self.context.options.dry_run {
            info!(
                "Running data dump using {} thread{}",
                self.context.worker_count,
                if self.context.worker_count == 1 { "" } else { "s" }
            );
            if self.context.options.show_progress {
                info!("Progress information uses estimated values and may not be accurate");
            }
        }

        self.context.producer_finished().await;

        // FINALIZING
        self.wait_for_all_tasks().await?;

        let errors = self.context.take_worker_errors();
        let mut first_error = None;
        for e in errors.into_iter().flatten() {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                error!("additional worker error: {}", e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if self.context.interrupt.is_set() {
            return Err(DumpError::Cancelled);
        }

        if !self.context.options.dry_run && !self.context.options.single_file {
            self.write_done_metadata()?;
        }

        Ok(self.summarize())
    }

    async fn open_primary_session(&mut self) -> Result<()> {
        let options = &self.context.options;
        let mut session = self.factory.connect().await?;

        session.execute("SET SQL_MODE = ''").await?;
        session
            .execute(&format!("SET NAMES '{}'", options.character_set))
            .await?;
        if options.tz_utc {
            session.execute("SET TIME_ZONE = '+00:00'").await?;
        }

        self.primary_connection_id = session.connection_id();
        self.session = Some(session);
        Ok(())
    }

    fn spawn_interrupt_watcher(&mut self) {
        let context = Arc::clone(&self.context);
        let url = self.factory.url().to_string();
        let connection_id = self.primary_connection_id;

        self.watcher = Some(tokio::spawn(async move {
            context.interrupt.triggered().await;
            warn!("Interrupted by user. Canceling...");
            context.emergency_shutdown().await;
            if let Some(id) = connection_id {
                // cancel the in-flight query on the primary session
                kill_query(&url, id).await;
            }
        }));
    }

    fn primary(&mut self) -> Result<&mut Box<dyn Session>> {
        self.session
            .as_mut()
            .ok_or_else(|| DumpError::invalid_state("primary session not open"))
    }

    async fn start_transaction(&mut self) -> Result<()> {
        let session = self.primary()?;
        session
            .execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await?;
        session
            .execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
            .await?;
        Ok(())
    }

    async fn acquire_read_locks(&mut self) -> Result<()> {
        if !self.context.options.consistent {
            return Ok(());
        }

        info!("Acquiring global read lock");

        // a plain FLUSH TABLES first: if a long update is running it waits
        // without stalling other connections, so the window where FTWRL
        // stalls everyone stays short
        let flush = async {
            let session = self.primary()?;
            session.execute("FLUSH TABLES").await?;
            session.execute("FLUSH TABLES WITH READ LOCK").await?;
            Ok::<(), DumpError>(())
        }
        .await;

        match flush {
            Ok(()) => {
                info!("Global read lock acquired");
                // FTWRL holds across transaction start
                self.start_transaction().await?;
                Ok(())
            }
            Err(DumpError::Query(e)) if e.is_access_denied() => {
                self.ftwrl_failed = true;
                warn!(
                    "The current user lacks privileges to acquire a global read lock. \
                     Falling back to LOCK TABLES..."
                );
                match self.lock_all_tables().await {
                    Ok(()) => {
                        info!("Table locks acquired");
                        // the transaction cannot start yet, table locks
                        // would be released
                        Ok(())
                    }
                    Err(e) => {
                        error!("Unable to acquire global read lock neither table read locks");
                        Err(DumpError::lock_acquisition(e.to_string()))
                    }
                }
            }
            Err(e) => Err(DumpError::lock_acquisition(e.to_string())),
        }
    }

    async fn lock_all_tables(&mut self) -> Result<()> {
        self.lock_instance().await?;

        let max_packet = {
            let session = self.primary()?;
            session
                .query("SELECT @@max_allowed_packet")
                .await?
                .first()
                .and_then(|r| r.as_u64(0))
                .unwrap_or(4 * 1024 * 1024)
        };

        // grant/routine tables first, so users and routines stay consistent
        let system = async {
            let session = self.primary()?;
            let tables = session
                .query(&format!(
                    "SHOW TABLES IN mysql WHERE Tables_in_mysql IN ({})",
                    SYSTEM_LOCK_TABLES
                ))
                .await?;

            if !tables.rows.is_empty() {
                let stmt = format!(
                    "LOCK TABLES {}",
                    tables
                        .rows
                        .iter()
                        .filter_map(|r| r.as_text(0))
                        .map(|t| format!("mysql.{} READ", quote_ident(&t)))
                        .collect::<Vec<_>>()
                        .join(",")
                );
                debug!("locking tables: {}", stmt);
                session.execute(&stmt).await?;
            }
            Ok::<(), DumpError>(())
        }
        .await;

        if let Err(e) = system {
            let denied = matches!(&e, DumpError::Query(q) if q.is_access_denied());
            if denied {
                warn!("Could not lock mysql system tables: {}", e);
                warn!(
                    "The dump will continue, but it may not be completely consistent if \
                     changes to accounts or routines are made during it"
                );
            } else {
                error!("Could not lock mysql system tables: {}", e);
                return Err(e);
            }
        }

        // the minimal cache lists what needs locking
        let minimal = {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| DumpError::invalid_state("primary session not open"))?;
            InstanceCacheBuilder::new(session.as_mut(), &self.context.options)
                .build_minimal()
                .await?
        };

        const LOCK_TABLES: &str = "LOCK TABLES ";
        let packet_limit = max_packet.max(4096) as usize - 256;

        for schema in &minimal.schemas {
            let mut stmt = String::from(LOCK_TABLES);
            for table in &schema.tables {
                let prev = stmt.len();
                stmt.push_str(&format!(
                    "{}.{} READ,",
                    quote_ident(&schema.name),
                    quote_ident(&table.name)
                ));

                // stay under the packet limit
                if stmt.len() >= packet_limit && prev > LOCK_TABLES.len() {
                    let flushed = stmt[..prev - 1].to_string();
                    let rest = stmt[prev..].to_string();
                    debug!("locking tables: {}", flushed);
                    self.primary()?.execute(&flushed).await?;
                    stmt = format!("{}{}", LOCK_TABLES, rest);
                }
            }
            if stmt.len() > LOCK_TABLES.len() {
                stmt.pop();
                debug!("locking tables: {}", stmt);
                self.primary()?.execute(&stmt).await?;
            }
        }

        self.minimal_cache = Some(minimal);
        Ok(())
    }

    async fn lock_instance(&mut self) -> Result<()> {
        if !self.context.options.consistent || self.instance_locked {
            return Ok(());
        }

        info!("Locking instance for backup");
        let session = self.primary()?;
        if session.server_version() >= (8, 0, 0) {
            if let Err(e) = session.execute("LOCK INSTANCE FOR BACKUP").await {
                error!("Could not acquire backup lock: {}", e);
                return Err(e.into());
            }
        } else {
            warn!(
                "Backup lock is not supported in MySQL 5.7 and DDL changes will not be \
                 blocked. The dump may fail or not be completely consistent if schema \
                 changes are made while dumping"
            );
        }

        self.instance_locked = true;
        Ok(())
    }

    async fn release_read_locks(&mut self) -> Result<()> {
        if !self.context.options.consistent {
            return Ok(());
        }

        if self.ftwrl_failed {
            // table locks were used; starting the transaction releases them
            self.start_transaction().await?;
        } else {
            // UNLOCK TABLES does not commit the open transaction
            self.primary()?.execute("UNLOCK TABLES").await?;
        }

        if !self.context.interrupt.is_set() {
            info!("Global read lock has been released");
        }
        Ok(())
    }

    fn spawn_workers(&mut self) {
        for id in 0..self.context.worker_count {
            let context = Arc::clone(&self.context);
            let factory = Arc::clone(&self.factory);
            self.workers
                .push(tokio::spawn(Worker::run(id, context, factory)));
        }
    }

    async fn build_cache(&mut self) -> Result<InstanceCache> {
        info!("Gathering information...");
        let minimal = self.minimal_cache.take();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DumpError::invalid_state("primary session not open"))?;
        InstanceCacheBuilder::new(session.as_mut(), &self.context.options)
            .build(minimal)
            .await
    }

    fn gtid_inconsistent(&self) -> bool {
        !self.context.options.consistent || self.ftwrl_failed
    }

    async fn validate_privileges(&mut self) -> Result<()> {
        let options = &self.context.options;
        if !options.dump_ddl || !(options.dump_events || options.dump_triggers) {
            return Ok(());
        }

        let (user, grants) = {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| DumpError::invalid_state("primary session not open"))?;
            let user = session
                .query("SELECT CURRENT_USER()")
                .await?
                .first_or_err("SELECT CURRENT_USER()")?
                .as_text(0)
                .unwrap_or_default();
            let grants: Vec<String> = session
                .query("SHOW GRANTS")
                .await?
                .rows
                .iter()
                .filter_map(|r| r.as_text(0))
                .collect();
            (user, grants)
        };

        let account = match user.split_once('@') {
            Some((name, host)) => format!("'{}'@'{}'", name, host),
            None => format!("'{}'@'%'", user),
        };
        let privileges = UserPrivileges::from_show_grants(&user, account, &grants);

        validate_required(&privileges, self.context.cache()?, &self.context.options)
    }

    async fn validate_compatibility(&mut self) -> Result<()> {
        let options = &self.context.options;
        let Some(target) = options.compatibility_target.clone() else {
            return Ok(());
        };
        if !options.dump_ddl {
            return Ok(());
        }

        info!("Checking for compatibility with target version {}", target);

        let mut issues: Vec<Issue> = Vec::new();
        {
            let cache = self.context.cache()?;
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| DumpError::invalid_state("primary session not open"))?;
            let mut dumper = SchemaDumper::new(session.as_mut(), &self.context.options);

            if self.context.options.dump_users {
                issues.extend(dumper.dump_users(&cache.users).await?.issues);
            }
            for schema in &cache.schemas {
                issues.extend(dumper.dump_schema(schema).await?.issues);

                for table in &schema.tables {
                    issues.extend(dumper.dump_table(&schema.name, table).await?.issues);
                    if self.context.options.dump_triggers && !table.triggers.is_empty() {
                        issues.extend(dumper.dump_triggers(&schema.name, table).await?.issues);
                    }
                }
                for view in &schema.views {
                    issues.extend(dumper.dump_temporary_view(&schema.name, view).await?.issues);
                    issues.extend(dumper.dump_view(&schema.name, view).await?.issues);
                }
            }
        }

        let mut fixed = false;
        let mut failed = false;
        for issue in &issues {
            match issue.status {
                IssueStatus::Fixed => {
                    fixed = true;
                    info!("{}", issue.description);
                }
                _ => {
                    failed = true;
                    error!("{} ({})", issue.description, issue.hint());
                }
            }
        }

        if failed {
            info!(
                "Compatibility issues with target version {} were found. Please use the \
                 'compatibility' options to apply adaptations to the dumped DDL",
                target
            );
            Err(DumpError::Compatibility)
        } else {
            if fixed {
                info!(
                    "Compatibility issues were found and repaired. Please review the changes \
                     made before loading them"
                );
            } else {
                info!("Compatibility checks finished");
            }
            Ok(())
        }
    }

    async fn initialize_output(&mut self) -> Result<()> {
        if self.context.options.single_file {
            return Ok(());
        }

        std::fs::create_dir_all(&self.context.output_dir)?;
        self.write_start_metadata()?;
        self.write_global_ddl().await
    }

    fn write_start_metadata(&self) -> Result<()> {
        let cache = self.context.cache()?;
        let naming = self.context.naming()?;
        let options = &self.context.options;

        let manifest = DumpManifest {
            dumper: format!("trawl {}", env!("CARGO_PKG_VERSION")),
            version: "1.0.2".to_string(),
            origin: "dump".to_string(),
            schemas: cache.schemas.iter().map(|s| s.name.clone()).collect(),
            basenames: cache
                .schemas
                .iter()
                .enumerate()
                .map(|(idx, s)| {
                    (
                        s.name.clone(),
                        naming.schema_basename(SchemaId(idx)).to_string(),
                    )
                })
                .collect(),
            users: if options.dump_users {
                cache.users.iter().map(|u| u.to_account_string()).collect()
            } else {
                Vec::new()
            },
            default_character_set: options.character_set.clone(),
            tz_utc: options.tz_utc,
            bytes_per_chunk: options.bytes_per_chunk,
            user: cache.user.clone(),
            hostname: cache.hostname.clone(),
            server: cache.server.clone(),
            server_version: cache.server_version.clone(),
            gtid_executed: cache.gtid_executed.clone(),
            gtid_executed_inconsistent: self.gtid_inconsistent(),
            consistent: options.consistent,
            compatibility: options.compatibility_target.clone(),
            begin: self.begin_timestamp.clone(),
        };
        write_json(&self.context.output_dir.join("@.json"), &manifest)?;

        for (schema_idx, schema) in cache.schemas.iter().enumerate() {
            let mut basenames = std::collections::BTreeMap::new();
            for (table_idx, table) in schema.tables.iter().enumerate() {
                basenames.insert(
                    table.name.clone(),
                    naming
                        .table_basename(TableId {
                            schema: schema_idx,
                            table: table_idx,
                        })
                        .to_string(),
                );
            }
            for (view_idx, view) in schema.views.iter().enumerate() {
                basenames.insert(
                    view.name.clone(),
                    naming
                        .view_basename(ViewId {
                            schema: schema_idx,
                            view: view_idx,
                        })
                        .to_string(),
                );
            }

            let manifest = SchemaManifest {
                schema: schema.name.clone(),
                includes_ddl: options.dump_ddl,
                includes_views_ddl: options.dump_ddl,
                includes_data: options.dump_data,
                tables: schema.tables.iter().map(|t| t.name.clone()).collect(),
                views: options
                    .dump_ddl
                    .then(|| schema.views.iter().map(|v| v.name.clone()).collect()),
                events: (options.dump_ddl && options.dump_events)
                    .then(|| schema.events.clone()),
                functions: (options.dump_ddl && options.dump_routines)
                    .then(|| schema.functions.clone()),
                procedures: (options.dump_ddl && options.dump_routines)
                    .then(|| schema.procedures.clone()),
                basenames,
            };
            let filename = schema_filename(naming.schema_basename(SchemaId(schema_idx)), "json");
            write_json(&self.context.output_dir.join(filename), &manifest)?;
        }

        Ok(())
    }

    async fn write_global_ddl(&mut self) -> Result<()> {
        if !self.context.options.dump_ddl {
            return Ok(());
        }

        info!("Writing global DDL files");

        let cache = self.context.cache()?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DumpError::invalid_state("primary session not open"))?;
        let mut dumper = SchemaDumper::new(session.as_mut(), &self.context.options);

        std::fs::write(
            self.context.output_dir.join("@.sql"),
            dumper.global_ddl("DDL preamble"),
        )?;
        std::fs::write(
            self.context.output_dir.join("@.post.sql"),
            dumper.global_ddl("DDL postamble"),
        )?;

        if self.context.options.dump_users {
            info!("Writing users DDL");
            let output = dumper.dump_users(&cache.users).await?;
            std::fs::write(self.context.output_dir.join("@.users.sql"), output.content)?;
        }

        Ok(())
    }

    async fn push_task(&self, task: Task, priority: Priority) -> Result<()> {
        match self.context.queue.push(task, priority).await {
            Ok(()) => Ok(()),
            Err(_) if self.context.interrupt.is_set() => Err(DumpError::Cancelled),
            Err(e) => Err(e),
        }
    }

    async fn create_ddl_tasks(&self) -> Result<()> {
        let options = &self.context.options;
        if !options.dump_ddl || options.dry_run || options.single_file {
            return Ok(());
        }

        let cache = self.context.cache()?;
        for (schema_idx, schema) in cache.schemas.iter().enumerate() {
            self.push_task(Task::SchemaDdl(SchemaId(schema_idx)), Priority::High)
                .await?;

            for view_idx in 0..schema.views.len() {
                self.push_task(
                    Task::ViewDdl(ViewId {
                        schema: schema_idx,
                        view: view_idx,
                    }),
                    Priority::High,
                )
                .await?;
            }
            for table_idx in 0..schema.tables.len() {
                self.push_task(
                    Task::TableDdl(TableId {
                        schema: schema_idx,
                        table: table_idx,
                    }),
                    Priority::High,
                )
                .await?;
            }
        }

        Ok(())
    }

    fn should_dump_data(schema: &str, table: &str) -> bool {
        !(schema == "mysql" && SKIPPED_SYSTEM_TABLES.contains(&table))
    }

    async fn create_table_tasks(&self) -> Result<()> {
        let options = &self.context.options;
        let cache = self.context.cache()?;

        for (schema_idx, schema) in cache.schemas.iter().enumerate() {
            for (table_idx, table) in schema.tables.iter().enumerate() {
                let id = TableId {
                    schema: schema_idx,
                    table: table_idx,
                };
                let quoted = format!("{}.{}", quote_ident(&schema.name), quote_ident(&table.name));

                if !Self::should_dump_data(&schema.name, &table.name) {
                    warn!("Skipping data dump for table {}", quoted);
                    continue;
                }

                if !options.dry_run && !options.single_file {
                    self.push_task(Task::TableMetadata(id), Priority::High)
                        .await?;
                }

                if !options.dump_data {
                    continue;
                }

                info!("Preparing data dump for table {}", quoted);
                match (&table.index, options.chunking) {
                    (Some(index), true) => info!(
                        "Data dump for table {} will be chunked using column {}",
                        quoted,
                        quote_ident(index.first_column())
                    ),
                    (Some(index), false) => info!(
                        "Data dump for table {} will use column {} as an index",
                        quoted,
                        quote_ident(index.first_column())
                    ),
                    (None, true) => debug!(
                        "no usable index for table {}, chunking will be disabled",
                        quoted
                    ),
                    (None, false) => info!("Data dump for table {} will not use an index", quoted),
                }

                if options.dry_run {
                    continue;
                }

                self.context.chunking_task_created();
                self.push_task(Task::ChunkTable(id), Priority::Medium)
                    .await?;
            }
        }

        Ok(())
    }

    async fn wait_for_all_tasks(&mut self) -> Result<()> {
        for (id, handle) in self.workers.drain(..).enumerate() {
            if let Err(e) = handle.await {
                self.context
                    .record_worker_error(id, DumpError::invalid_state(format!("worker died: {}", e)));
            }
        }

        if let Some((path, bytes_written)) = self.context.close_single_writer().await? {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.context.record_chunk_file(filename, bytes_written);
        }

        Ok(())
    }

    async fn kill_workers(&mut self) {
        self.context.emergency_shutdown().await;
        if let Err(e) = self.wait_for_all_tasks().await {
            debug!("error while joining workers: {}", e);
        }
    }

    fn write_done_metadata(&self) -> Result<()> {
        let manifest = DoneManifest {
            end: timestamp_now(),
            data_bytes: self.context.progress.data_bytes(),
            table_data_bytes: self.context.table_data_bytes(),
            chunk_file_bytes: self.context.chunk_file_bytes(),
        };
        write_json(&self.context.output_dir.join("@.done.json"), &manifest)
    }

    fn summarize(&self) -> DumpSummary {
        let cache_stats = self
            .context
            .cache()
            .map(|c| (c.schemas.len(), c.table_count(), c.view_count()))
            .unwrap_or((0, 0, 0));

        let summary = DumpSummary {
            schemas: cache_stats.0,
            tables: cache_stats.1,
            views: cache_stats.2,
            rows_written: self.context.progress.rows_written(),
            data_bytes: self.context.progress.data_bytes(),
            bytes_written: self.context.progress.bytes_written(),
            duration: self.started.elapsed(),
        };

        let compressed = self.context.options.compression.is_enabled();
        info!("Duration: {}", format_duration(summary.duration));
        info!("Schemas dumped: {}", summary.schemas);
        info!("Tables dumped: {}", summary.tables);
        info!(
            "{} size: {}",
            if compressed {
                "Uncompressed data"
            } else {
                "Data"
            },
            format_bytes(summary.data_bytes)
        );
        if compressed {
            info!(
                "Compressed data size: {}",
                format_bytes(summary.bytes_written)
            );
            info!("Compression ratio: {:.1}", summary.compression_ratio());
        }
        info!("Rows written: {}", summary.rows_written);
        info!("Bytes written: {}", format_bytes(summary.bytes_written));
        info!(
            "Average {}throughput: {}",
            if compressed { "uncompressed " } else { "" },
            format_throughput(summary.data_bytes, summary.duration.as_secs_f64())
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpOptions;
    use trawl_sql::MySqlSessionFactory;

    fn factory() -> Arc<dyn SessionFactory> {
        Arc::new(MySqlSessionFactory::new("mysql://localhost"))
    }

    #[test]
    fn test_rejects_non_empty_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leftover.txt"), "x").unwrap();

        let options = DumpOptions::builder("mysql://localhost", dir.path()).build();
        let err = Dumper::new(options, factory()).unwrap_err();
        assert!(err.to_string().contains("not empty"));
    }

    #[test]
    fn test_accepts_empty_or_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let options = DumpOptions::builder("mysql://localhost", dir.path()).build();
        Dumper::new(options, factory()).unwrap();

        let options =
            DumpOptions::builder("mysql://localhost", dir.path().join("fresh")).build();
        Dumper::new(options, factory()).unwrap();
    }

    #[test]
    fn test_single_file_requires_existing_parent() {
        let dir = tempfile::tempdir().unwrap();

        let options = DumpOptions::builder("mysql://localhost", dir.path().join("out.tsv"))
            .single_file(true)
            .build();
        Dumper::new(options, factory()).unwrap();

        let options = DumpOptions::builder(
            "mysql://localhost",
            dir.path().join("missing").join("out.tsv"),
        )
        .single_file(true)
        .build();
        let err = Dumper::new(options, factory()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_should_dump_data_skips_system_logs() {
        assert!(!Dumper::should_dump_data("mysql", "general_log"));
        assert!(!Dumper::should_dump_data("mysql", "slow_log"));
        assert!(Dumper::should_dump_data("mysql", "user"));
        assert!(Dumper::should_dump_data("shop", "general_log"));
    }

    #[test]
    fn test_summary_compression_ratio() {
        let summary = DumpSummary {
            schemas: 1,
            tables: 1,
            views: 0,
            rows_written: 10,
            data_bytes: 1000,
            bytes_written: 250,
            duration: Duration::from_secs(1),
        };
        assert!((summary.compression_ratio() - 4.0).abs() < f64::EPSILON);
    }
}
