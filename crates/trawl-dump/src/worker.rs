//! Dump workers
//!
//! Each worker is a task with its own database session. On start it applies
//! the session setup, opens its snapshot transaction while the coordinator
//! still holds the read locks, signals readiness and then drains the task
//! queue until it pops a shutdown token. The default exception strategy on
//! the data path is abort: an error is recorded in the worker's slot, the
//! interrupt flag raised, and the pool drains to a stop.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use trawl_sql::{quote_ident, quote_value, Session, SessionFactory};

use crate::cache::{TableCache, TableId};
use crate::chunker::{query_comment, ChunkOutcome, ChunkSink, ChunkSpec, Chunker};
use crate::context::{DumpContext, NamingMap};
use crate::error::Result;
use crate::filenames::{chunk_data_filename, schema_filename, table_aux_filename, table_data_filename};
use crate::manifest::{write_json, HistogramEntry, TableLoadOptions, TableManifest};
use crate::rate_limit::RateLimit;
use crate::schema_dumper::{DdlOutput, SchemaDumper};
use crate::task::{Priority, RangeTask, Range, Task};
use crate::writer::{FieldEncoding, WriteResult};

/// Progress/throttle cadence in rows.
const UPDATE_EVERY_ROWS: u64 = 2000;

/// Seconds the server waits for us to read result data.
const NET_WRITE_TIMEOUT: u32 = 30 * 60;
/// Seconds before the server disconnects an idle session.
const WAIT_TIMEOUT: u32 = 365 * 24 * 60 * 60;

/// Build the SELECT for one range task: explicit column list with
/// conversion wrappers for encoding-unsafe columns, a BETWEEN filter over
/// the chunking key, index order, and the tracing comment.
pub(crate) fn build_range_query(
    schema: &str,
    table: &TableCache,
    range: Option<&Range>,
    include_nulls: bool,
    chunk_id: &str,
    use_base64: bool,
) -> (String, Vec<FieldEncoding>) {
    let mut encodings = Vec::with_capacity(table.columns.len());
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            if column.encoding_unsafe() {
                if use_base64 {
                    encodings.push(FieldEncoding::Base64);
                    format!("TO_BASE64({})", quote_ident(&column.name))
                } else {
                    encodings.push(FieldEncoding::Hex);
                    format!("HEX({})", quote_ident(&column.name))
                }
            } else {
                encodings.push(FieldEncoding::None);
                quote_ident(&column.name)
            }
        })
        .collect();

    let mut sql = format!(
        "SELECT SQL_NO_CACHE {} FROM {}.{}",
        columns.join(","),
        quote_ident(schema),
        quote_ident(&table.name)
    );

    if let (Some(range), Some(index)) = (range, &table.index) {
        let key = quote_ident(index.first_column());
        sql.push_str(&format!(
            " WHERE {} BETWEEN {} AND {}",
            key,
            quote_value(&range.begin, range.column_type),
            quote_value(&range.end, range.column_type)
        ));
        if include_nulls {
            sql.push_str(&format!(" OR {} IS NULL", key));
        }
    }

    if let Some(index) = &table.index {
        sql.push_str(&format!(" ORDER BY {}", index.order_by()));
    }

    sql.push(' ');
    sql.push_str(&query_comment(schema, &table.name, chunk_id, "dumping"));

    (sql, encodings)
}

/// Pushes discovered chunks onto the queue as range tasks, creating each
/// chunk's writer as it goes.
struct QueueSink<'a> {
    context: &'a DumpContext,
    naming: &'a NamingMap,
    table: TableId,
}

#[async_trait]
impl ChunkSink for QueueSink<'_> {
    async fn emit(&mut self, chunk: ChunkSpec) -> Result<()> {
        let basename = self.naming.table_basename(self.table);
        let filename = chunk_data_filename(
            basename,
            &self.naming.data_extension,
            chunk.ordinal,
            chunk.last,
        );
        let writer = self.context.data_writer(&filename).await?;

        let task = RangeTask {
            table: self.table,
            chunk_id: chunk.id,
            ordinal: chunk.ordinal,
            range: chunk.range,
            include_nulls: chunk.include_nulls,
            writer,
        };
        self.context
            .queue
            .push(Task::DumpRange(Box::new(task)), Priority::Low)
            .await
    }
}

/// One worker of the pool.
pub struct Worker {
    id: usize,
    context: Arc<DumpContext>,
    session: Box<dyn Session>,
    rate_limit: RateLimit,
}

impl Worker {
    /// Worker entry point; spawned once per configured thread.
    pub async fn run(id: usize, context: Arc<DumpContext>, factory: Arc<dyn SessionFactory>) {
        let session = Self::open_session(factory.as_ref(), &context).await;

        // readiness must be signalled even on failure, the coordinator is
        // counting
        context.ready.notify_one();

        let session = match session {
            Ok(session) => session,
            Err(e) => {
                context.record_worker_error(id, e);
                context.emergency_shutdown().await;
                return;
            }
        };

        let mut worker = Worker {
            id,
            context: Arc::clone(&context),
            session,
            rate_limit: RateLimit::new(context.options.max_rate),
        };

        if let Err(e) = worker.task_loop().await {
            if context.interrupt.is_set() {
                debug!("[worker {:03}] error after interrupt: {}", id, e);
            } else {
                context.record_worker_error(id, e);
            }
            context.emergency_shutdown().await;
        }

        if let Err(e) = worker.session.close().await {
            debug!("[worker {:03}] session close failed: {}", worker.id, e);
        }
    }

    async fn open_session(
        factory: &dyn SessionFactory,
        context: &DumpContext,
    ) -> Result<Box<dyn Session>> {
        let options = &context.options;
        let mut session = factory.connect().await?;

        session.execute("SET SQL_MODE = ''").await?;
        session
            .execute(&format!("SET NAMES '{}'", options.character_set))
            .await?;
        session
            .execute(&format!(
                "SET SESSION net_write_timeout = {}",
                NET_WRITE_TIMEOUT
            ))
            .await?;
        session
            .execute(&format!("SET SESSION wait_timeout = {}", WAIT_TIMEOUT))
            .await?;
        if options.tz_utc {
            session.execute("SET TIME_ZONE = '+00:00'").await?;
        }
        if options.consistent {
            // the snapshot opens while the coordinator holds the read locks
            session
                .execute("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .await?;
            session
                .execute("START TRANSACTION WITH CONSISTENT SNAPSHOT")
                .await?;
        }

        Ok(session)
    }

    async fn task_loop(&mut self) -> Result<()> {
        loop {
            let Some(task) = self.context.queue.pop().await else {
                break;
            };
            if self.context.interrupt.is_set() {
                return Ok(());
            }

            debug!("[worker {:03}] running {} task", self.id, task.label());
            self.execute(task).await?;

            if self.context.interrupt.is_set() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn execute(&mut self, task: Task) -> Result<()> {
        match task {
            Task::SchemaDdl(id) => {
                let cache = self.context.cache()?;
                let schema = cache.schema(id);
                info!("Writing DDL for schema `{}`", schema.name);

                let output = SchemaDumper::new(self.session.as_mut(), &self.context.options)
                    .dump_schema(schema)
                    .await?;
                let filename = schema_filename(self.context.naming()?.schema_basename(id), "sql");
                self.write_ddl(output, &filename)
            }
            Task::TableDdl(id) => {
                let cache = self.context.cache()?;
                let (schema, table) = cache.table(id);
                info!("Writing DDL for table `{}`.`{}`", schema.name, table.name);

                let schema_name = schema.name.clone();
                let output = SchemaDumper::new(self.session.as_mut(), &self.context.options)
                    .dump_table(&schema_name, table)
                    .await?;
                let basename = self.context.naming()?.table_basename(id).to_string();
                self.write_ddl(output, &format!("{}.sql", basename))?;

                if self.context.options.dump_triggers && !table.triggers.is_empty() {
                    let output = SchemaDumper::new(self.session.as_mut(), &self.context.options)
                        .dump_triggers(&schema_name, table)
                        .await?;
                    self.write_ddl(output, &table_aux_filename(&basename, "triggers.sql"))?;
                }
                Ok(())
            }
            Task::ViewDdl(id) => {
                let cache = self.context.cache()?;
                let (schema, view) = cache.view(id);
                info!("Writing DDL for view `{}`.`{}`", schema.name, view.name);

                let schema_name = schema.name.clone();
                let basename = self.context.naming()?.view_basename(id).to_string();

                let output = SchemaDumper::new(self.session.as_mut(), &self.context.options)
                    .dump_temporary_view(&schema_name, view)
                    .await?;
                self.write_ddl(output, &table_aux_filename(&basename, "pre.sql"))?;

                let output = SchemaDumper::new(self.session.as_mut(), &self.context.options)
                    .dump_view(&schema_name, view)
                    .await?;
                self.write_ddl(output, &format!("{}.sql", basename))
            }
            Task::TableMetadata(id) => self.write_table_metadata(id),
            Task::ChunkTable(id) => {
                self.context.progress.chunking_started();
                let result = self.create_table_data_tasks(id).await;
                self.context.progress.chunking_finished();
                self.context.chunking_task_finished().await;

                let files = result?;
                let cache = self.context.cache()?;
                let (schema, table) = cache.table(id);
                info!(
                    "Data dump for table `{}`.`{}` will be written to {} file{}",
                    schema.name,
                    table.name,
                    files,
                    if files == 1 { "" } else { "s" }
                );
                Ok(())
            }
            Task::DumpRange(task) => {
                self.context.progress.dumping_started();
                let result = self.dump_range(task).await;
                self.context.progress.dumping_finished();
                result
            }
        }
    }

    fn write_ddl(&self, output: DdlOutput, filename: &str) -> Result<()> {
        // unfixed issues aborted the job during validation; whatever is left
        // here is informational
        for issue in &output.issues {
            info!("{}", issue.description);
        }
        std::fs::write(self.context.output_dir.join(filename), output.content)?;
        Ok(())
    }

    fn write_table_metadata(&self, id: TableId) -> Result<()> {
        let context = &self.context;
        let cache = context.cache()?;
        let naming = context.naming()?;
        let (schema, table) = cache.table(id);
        let options = &context.options;
        let framing = options.dialect.framing();

        let decode_columns = table
            .columns
            .iter()
            .filter(|c| c.encoding_unsafe())
            .map(|c| {
                let function = if options.use_base64 {
                    "FROM_BASE64"
                } else {
                    "UNHEX"
                };
                (c.name.clone(), function.to_string())
            })
            .collect();

        let manifest = TableManifest {
            options: TableLoadOptions {
                schema: schema.name.clone(),
                table: table.name.clone(),
                columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                decode_columns,
                primary_index: table
                    .index
                    .as_ref()
                    .filter(|i| i.primary)
                    .map(|i| i.first_column().to_string())
                    .unwrap_or_default(),
                compression: options.compression.to_string(),
                default_character_set: options.character_set.clone(),
                fields_terminated_by: framing.fields_terminated_by,
                fields_enclosed_by: framing.fields_enclosed_by,
                fields_optionally_enclosed: framing.fields_optionally_enclosed,
                fields_escaped_by: framing.fields_escaped_by,
                lines_terminated_by: framing.lines_terminated_by,
            },
            triggers: (options.dump_triggers && options.dump_ddl)
                .then(|| table.triggers.clone()),
            histograms: table
                .histograms
                .iter()
                .map(|h| HistogramEntry {
                    column: h.column.clone(),
                    buckets: h.buckets,
                })
                .collect(),
            includes_data: options.dump_data,
            includes_ddl: options.dump_ddl,
            extension: naming.data_extension.clone(),
            chunking: options.chunking && table.index.is_some() && table.row_count > 0,
        };

        let filename = table_aux_filename(naming.table_basename(id), "json");
        write_json(&context.output_dir.join(filename), &manifest)
    }

    async fn create_table_data_tasks(&mut self, id: TableId) -> Result<usize> {
        let context = Arc::clone(&self.context);
        let cache = context.cache()?;
        let naming = context.naming()?;
        let (schema, table) = cache.table(id);

        let mut sink = QueueSink {
            context: &context,
            naming,
            table: id,
        };
        let outcome = Chunker::new(
            self.session.as_mut(),
            &context.options,
            context.interrupt.as_ref(),
            &schema.name,
            table,
        )
        .generate(&mut sink)
        .await?;

        match outcome {
            ChunkOutcome::Chunked(files) => Ok(files),
            ChunkOutcome::Empty => Ok(0),
            ChunkOutcome::NotChunked => {
                if context.options.chunking && table.index.is_none() {
                    warn!(
                        "Could not select a column to be used as an index for table \
                         `{}`.`{}`; data will be dumped to a single file",
                        schema.name, table.name
                    );
                }

                let filename =
                    table_data_filename(naming.table_basename(id), &naming.data_extension);
                let writer = context.data_writer(&filename).await?;
                context
                    .queue
                    .push(
                        Task::DumpRange(Box::new(RangeTask {
                            table: id,
                            chunk_id: "1".to_string(),
                            ordinal: 0,
                            range: None,
                            include_nulls: false,
                            writer,
                        })),
                        Priority::Low,
                    )
                    .await?;
                Ok(1)
            }
        }
    }

    async fn dump_range(&mut self, mut task: Box<RangeTask>) -> Result<()> {
        let context = Arc::clone(&self.context);
        let cache = context.cache()?;
        let (schema, table) = cache.table(task.table);
        let schema_name = schema.name.clone();
        let table_name = table.name.clone();

        let (sql, encodings) = build_range_query(
            &schema_name,
            table,
            task.range.as_ref(),
            task.include_nulls,
            &task.chunk_id,
            context.options.use_base64,
        );

        let start = Instant::now();
        let owned = task.writer.is_owned();
        let mut total = WriteResult::default();
        let mut batch = WriteResult::default();
        let mut batch_rows = 0u64;

        let mut cursor = self.session.query_cursor(&sql).await?;
        let mut writer = task.writer.lock().await;

        let result = writer.write_preamble(cursor.columns(), &encodings)?;
        total += result;
        batch += result;

        while let Some(row) = cursor.next_row().await? {
            if context.interrupt.is_set() {
                // the .dumping name marks this file as torn
                return Ok(());
            }

            let result = writer.write_row(&row)?;
            total += result;
            batch += result;
            batch_rows += 1;

            if batch_rows == UPDATE_EVERY_ROWS {
                context.update_progress(&schema_name, &table_name, batch_rows, batch);
                if self.rate_limit.enabled() {
                    self.rate_limit.throttle(batch.data_bytes).await;
                }
                batch_rows = 0;
                batch = WriteResult::default();
            }
        }

        let result = writer.write_postamble()?;
        total += result;
        batch += result;

        if owned {
            writer.close()?;
            let filename = writer
                .output_path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes_written = writer.bytes_written();
            drop(writer);
            context.record_chunk_file(filename, bytes_written);
        } else {
            drop(writer);
        }

        context.update_progress(&schema_name, &table_name, batch_rows, batch);

        debug!(
            "dump of `{}`.`{}` chunk {} wrote {} data bytes in {:?}",
            schema_name,
            table_name,
            task.chunk_id,
            total.data_bytes,
            start.elapsed()
        );

        Ok(())
    }
}
