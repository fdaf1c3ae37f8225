//! Chunk boundary discovery
//!
//! Produces a sequence of disjoint key ranges covering every row of a table,
//! sized so each range frames roughly `bytes_per_chunk` of output. Two
//! strategies share the accounting (ordinal, last-chunk flag, NULL
//! inclusion) and are dispatched on the chunking column's type:
//!
//! - **integer keys**: arithmetic striding, refined per boundary by probing
//!   `EXPLAIN` row estimates with a bounded bisection
//! - **everything orderable**: LIMIT-walking the index, one boundary per
//!   `rows_per_chunk` rows
//!
//! The first range of a table includes rows whose key is NULL; all
//! boundaries are inclusive on both ends.

use async_trait::async_trait;
use tracing::{debug, warn};
use trawl_sql::{quote_ident, quote_value, ColumnType, Session};

use crate::cache::TableCache;
use crate::config::DumpOptions;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::task::Range;

/// Bisection rounds per boundary probe.
const CHUNKER_ITERATIONS: u32 = 10;
/// Probe restarts (with a widened window) per boundary.
const CHUNKER_RETRIES: u32 = 10;
/// Row size assumed when table statistics are missing.
const DEFAULT_ROW_SIZE: u64 = 256;

/// One discovered chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Ordinal within the table (0-based)
    pub ordinal: usize,
    /// Chunk id used in query comments
    pub id: String,
    /// Key range; `None` only for whole-table chunks
    pub range: Option<Range>,
    /// Whether NULL keys belong to this chunk
    pub include_nulls: bool,
    /// Whether this is the table's final chunk
    pub last: bool,
}

/// Receives chunks as they are discovered, so data extraction can start
/// before discovery finishes.
#[async_trait]
pub trait ChunkSink: Send {
    /// Accept one chunk.
    async fn emit(&mut self, chunk: ChunkSpec) -> Result<()>;
}

/// What chunk discovery concluded for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// No usable index (or chunking disabled); dump as a single whole-table
    /// range
    NotChunked,
    /// The table has no rows; emit no data tasks
    Empty,
    /// This many ranges were emitted through the sink
    Chunked(usize),
}

/// Build the trailing comment correlating a statement with its chunk in the
/// server's process list.
pub fn query_comment(schema: &str, table: &str, chunk_id: &str, context: &str) -> String {
    // identifiers could contain a '*/'; break the sequence so the lexer
    // cannot see it
    let name = format!("`{}`.`{}`", schema, table).replace("*/", "*\\/");
    format!(
        "/* trawl dump, {} table {}, chunk ID: {} */",
        context, name, chunk_id
    )
}

/// Discovers chunk boundaries for one table over a worker's session.
pub struct Chunker<'a> {
    session: &'a mut dyn Session,
    options: &'a DumpOptions,
    interrupt: &'a Interrupt,
    schema: &'a str,
    table: &'a TableCache,
}

impl<'a> Chunker<'a> {
    /// Create a chunker for `table` in `schema`.
    pub fn new(
        session: &'a mut dyn Session,
        options: &'a DumpOptions,
        interrupt: &'a Interrupt,
        schema: &'a str,
        table: &'a TableCache,
    ) -> Self {
        Self {
            session,
            options,
            interrupt,
            schema,
            table,
        }
    }

    fn quoted_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(self.schema),
            quote_ident(&self.table.name)
        )
    }

    fn rows_per_chunk(&self) -> u64 {
        let mut average_row_length = self.table.average_row_length;
        if average_row_length == 0 {
            average_row_length = DEFAULT_ROW_SIZE;
            warn!(
                "table statistics not available for {}, chunking may be not optimal; \
                 consider running 'ANALYZE TABLE {};' first",
                self.quoted_table(),
                self.quoted_table()
            );
        }
        self.options.bytes_per_chunk / average_row_length
    }

    /// Run discovery, emitting ranges into `sink`.
    pub async fn generate(&mut self, sink: &mut dyn ChunkSink) -> Result<ChunkOutcome> {
        let index = match &self.table.index {
            Some(index) if self.options.chunking => index.clone(),
            _ => return Ok(ChunkOutcome::NotChunked),
        };

        let key = index.first_column().to_string();
        let order_by = index.order_by();

        let sql = format!(
            "SELECT SQL_NO_CACHE MIN({key}), MAX({key}) FROM {table}",
            key = quote_ident(&key),
            table = self.quoted_table()
        );
        let min_max = self.session.query(&sql).await?;
        let row = min_max.first_or_err("MIN/MAX probe")?;

        if row.is_null(0) {
            // either the table is empty, or every key is NULL
            let sql = format!("SELECT EXISTS (SELECT 1 FROM {})", self.quoted_table());
            let exists = self.session.query(&sql).await?;
            let has_rows = exists.first().and_then(|r| r.as_u64(0)).unwrap_or(0) != 0;
            return Ok(if has_rows {
                ChunkOutcome::NotChunked
            } else {
                ChunkOutcome::Empty
            });
        }

        let column_type = min_max
            .columns
            .first()
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::String);

        let min_text = row.as_text(0).unwrap_or_default();
        let max_text = row.as_text(1).unwrap_or_default();

        let emitted = if column_type.is_integer() {
            let (Some(min), Some(max)) = (parse_key(&min_text), parse_key(&max_text)) else {
                return Err(crate::error::DumpError::invalid_state(format!(
                    "non-numeric MIN/MAX for integer key of {}",
                    self.quoted_table()
                )));
            };
            self.stride_integer_ranges(sink, &key, &order_by, column_type, min, max)
                .await?
        } else {
            self.walk_ranges(sink, &key, &order_by, column_type, &max_text)
                .await?
        };

        Ok(ChunkOutcome::Chunked(emitted))
    }

    /// Integer keys: estimate a stride from statistics, refine each boundary
    /// against `EXPLAIN` estimates, snap the final boundary to MAX.
    async fn stride_integer_ranges(
        &mut self,
        sink: &mut dyn ChunkSink,
        key: &str,
        order_by: &str,
        column_type: ColumnType,
        min: i128,
        max: i128,
    ) -> Result<usize> {
        let rows_per_chunk = self.rows_per_chunk();
        // rows bigger than the chunk target degenerate to one chunk per row
        let estimated_chunks = if rows_per_chunk > 0 {
            (self.table.row_count / rows_per_chunk).max(1)
        } else {
            self.table.row_count.max(1)
        };
        let estimated_step = (max - min) / estimated_chunks as i128;
        let accuracy = (rows_per_chunk / 10).max(10);

        let mut count = 0usize;
        let mut current = min;
        let mut step = estimated_step;

        while current <= max {
            if self.interrupt.is_set() {
                return Ok(count);
            }

            let chunk_id = count.to_string();
            let begin = current;

            step = if estimated_chunks < 2 {
                step.max(2)
            } else {
                self.refine_step(
                    key,
                    order_by,
                    &chunk_id,
                    current,
                    step,
                    max,
                    rows_per_chunk,
                    accuracy,
                )
                .await?
                .max(2)
            };

            // guard the upper bound against overflow past MAX
            current = if current > max - step + 1 {
                max
            } else {
                current + step - 1
            };

            // snap to MAX when the remainder would be a sliver
            if max - current <= step / 4 {
                current = max;
            }

            let last = current >= max;
            sink.emit(ChunkSpec {
                ordinal: count,
                id: chunk_id,
                range: Some(Range {
                    column_type,
                    begin: begin.to_string(),
                    end: current.to_string(),
                }),
                include_nulls: count == 0,
                last,
            })
            .await?;
            count += 1;

            if last {
                break;
            }
            current += 1;
        }

        Ok(count)
    }

    /// Bisect within `[from, from + 2*(retry+1)*step]` for a boundary whose
    /// estimated row count lands within `accuracy` of the target.
    #[allow(clippy::too_many_arguments)]
    async fn refine_step(
        &mut self,
        key: &str,
        order_by: &str,
        chunk_id: &str,
        from: i128,
        step: i128,
        max: i128,
        rows_per_chunk: u64,
        accuracy: u64,
    ) -> Result<i128> {
        let comment = query_comment(self.schema, &self.table.name, chunk_id, "chunking");
        let mut middle = from;
        let mut previous_rows = rows_per_chunk;
        let mut delta = 2 * accuracy;
        let mut retry = 0;

        while delta > accuracy && retry < CHUNKER_RETRIES {
            let mut left = from;
            let mut right = left + 2 * (retry as i128 + 1) * step;

            for _ in 0..CHUNKER_ITERATIONS {
                middle = left + (right - left) / 2;
                if middle >= right || middle <= left {
                    break;
                }

                let sql = format!(
                    "EXPLAIN SELECT COUNT(*) FROM {table} WHERE {key} BETWEEN {from} AND \
                     {middle} ORDER BY {order_by} {comment}",
                    table = self.quoted_table(),
                    key = quote_ident(key),
                );
                let result = self.session.query(&sql).await?;
                let rows = result
                    .first_or_err("EXPLAIN estimate")?
                    .as_u64(9)
                    .unwrap_or(0);

                if rows > rows_per_chunk {
                    right = middle;
                    delta = rows - rows_per_chunk;
                } else {
                    left = middle;
                    delta = rows_per_chunk - rows;
                }

                if delta <= accuracy {
                    break;
                }
                if rows == previous_rows {
                    // the estimate stopped moving; statistics cannot be
                    // refined further
                    break;
                }
                previous_rows = rows;
            }

            if delta > accuracy {
                if previous_rows >= rows_per_chunk || middle >= max {
                    // too many rows is acceptable; past MAX there is nothing
                    // left to probe
                    break;
                }
                retry += 1;
            }
        }

        Ok(middle - from)
    }

    /// Non-integer keys: walk the index with LIMIT queries, one boundary per
    /// `rows_per_chunk` rows, until the boundary reaches the overall MAX.
    async fn walk_ranges(
        &mut self,
        sink: &mut dyn ChunkSink,
        key: &str,
        order_by: &str,
        column_type: ColumnType,
        total_max: &str,
    ) -> Result<usize> {
        let rows_per_chunk = self.rows_per_chunk().max(1);
        let table = self.quoted_table();
        let mut count = 0usize;
        let mut previous_end: Option<String> = None;

        loop {
            if self.interrupt.is_set() {
                return Ok(count);
            }

            let chunk_id = count.to_string();
            let comment = query_comment(self.schema, &self.table.name, &chunk_id, "chunking");
            let fence = match &previous_end {
                None => String::new(),
                Some(end) => format!(
                    " WHERE {} > {}",
                    quote_ident(key),
                    quote_value(end, column_type)
                ),
            };

            let sql = format!(
                "SELECT SQL_NO_CACHE {key} FROM {table}{fence} ORDER BY {order_by} \
                 LIMIT 0,1 {comment}",
                key = quote_ident(key),
            );
            let begin = self
                .session
                .query(&sql)
                .await?
                .first_or_err("chunk lower bound")?
                .as_text(0)
                .unwrap_or_default();

            let sql = format!(
                "SELECT SQL_NO_CACHE {key} FROM {table}{fence} ORDER BY {order_by} \
                 LIMIT {offset},1 {comment}",
                key = quote_ident(key),
                offset = rows_per_chunk - 1,
            );
            let end = self
                .session
                .query(&sql)
                .await?
                .first()
                .and_then(|row| row.as_text(0))
                .unwrap_or_else(|| total_max.to_string());

            let last = end == total_max;
            sink.emit(ChunkSpec {
                ordinal: count,
                id: chunk_id,
                range: Some(Range {
                    column_type,
                    begin,
                    end: end.clone(),
                }),
                include_nulls: count == 0,
                last,
            })
            .await?;
            count += 1;

            if last {
                break;
            }
            previous_end = Some(end);
        }

        debug!(
            chunks = count,
            table = %self.quoted_table(),
            "limit-walk chunking finished"
        );

        Ok(count)
    }
}

fn parse_key(text: &str) -> Option<i128> {
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IndexCache;
    use trawl_sql::testing::ScriptedSession;
    use trawl_sql::{ColumnMeta, Resultset, SqlRow, SqlValue};

    struct VecSink(Vec<ChunkSpec>);

    #[async_trait]
    impl ChunkSink for VecSink {
        async fn emit(&mut self, chunk: ChunkSpec) -> Result<()> {
            self.0.push(chunk);
            Ok(())
        }
    }

    fn table(row_count: u64, average_row_length: u64) -> TableCache {
        TableCache {
            name: "items".to_string(),
            index: Some(IndexCache {
                name: "PRIMARY".to_string(),
                primary: true,
                columns: vec!["id".to_string()],
            }),
            row_count,
            average_row_length,
            ..Default::default()
        }
    }

    fn options(bytes_per_chunk: u64) -> DumpOptions {
        DumpOptions::builder("mysql://localhost", "/tmp/out")
            .bytes_per_chunk(bytes_per_chunk)
            .build()
    }

    fn int_row(values: &[i64]) -> SqlRow {
        SqlRow::new(values.iter().map(|&v| SqlValue::Int(v)).collect())
    }

    fn text_cell(s: &str) -> SqlValue {
        SqlValue::Bytes(s.as_bytes().to_vec())
    }

    fn parse_between(sql: &str) -> (i64, i64) {
        let rest = sql.split("BETWEEN ").nth(1).unwrap();
        let mut parts = rest.split_whitespace();
        let from: i64 = parts.next().unwrap().parse().unwrap();
        parts.next(); // AND
        let to: i64 = parts.next().unwrap().parse().unwrap();
        (from, to)
    }

    /// Uniform distribution: ids 1..=n, one row per id.
    fn uniform_session(n: i64) -> ScriptedSession {
        ScriptedSession::new(move |sql| {
            Ok(if sql.contains("MIN(") {
                Resultset::new(
                    vec![
                        ColumnMeta::new("min", ColumnType::Integer),
                        ColumnMeta::new("max", ColumnType::Integer),
                    ],
                    vec![int_row(&[1, n])],
                )
            } else if sql.starts_with("EXPLAIN") {
                let (from, to) = parse_between(sql);
                let estimate = (to - from + 1).max(0);
                // EXPLAIN output: the row estimate sits in column 9
                let mut values = vec![SqlValue::Null; 10];
                values[9] = SqlValue::UInt(estimate as u64);
                Resultset::new(vec![], vec![SqlRow::new(values)])
            } else {
                Resultset::empty()
            })
        })
    }

    fn assert_full_coverage(chunks: &[ChunkSpec], min: i64, max: i64) {
        assert!(!chunks.is_empty());
        assert!(chunks[0].include_nulls);
        assert!(chunks.iter().skip(1).all(|c| !c.include_nulls));
        assert!(chunks.last().unwrap().last);
        assert!(chunks.iter().rev().skip(1).all(|c| !c.last));

        let mut expected_begin = min;
        for chunk in chunks {
            let range = chunk.range.as_ref().unwrap();
            let begin: i64 = range.begin.parse().unwrap();
            let end: i64 = range.end.parse().unwrap();
            assert_eq!(begin, expected_begin, "gap or overlap at chunk {}", chunk.ordinal);
            assert!(end >= begin);
            expected_begin = end + 1;
        }
        assert_eq!(expected_begin, max + 1, "last chunk does not reach MAX");
    }

    #[tokio::test]
    async fn test_integer_chunking_covers_keyspace() {
        let mut session = uniform_session(10_000);
        let options = options(128 * 1024);
        let table = table(10_000, 128); // 1024 rows per chunk
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        let ChunkOutcome::Chunked(count) = outcome else {
            panic!("expected chunked outcome, got {:?}", outcome);
        };
        assert_eq!(count, sink.0.len());
        assert!(count > 1, "expected multiple chunks");
        assert_full_coverage(&sink.0, 1, 10_000);

        // chunk sizes should be near the target except possibly the tail
        for chunk in &sink.0[..sink.0.len() - 1] {
            let range = chunk.range.as_ref().unwrap();
            let size: i64 =
                range.end.parse::<i64>().unwrap() - range.begin.parse::<i64>().unwrap() + 1;
            assert!(
                (size - 1024).unsigned_abs() <= 110,
                "chunk {} size {} too far from target",
                chunk.ordinal,
                size
            );
        }
    }

    #[tokio::test]
    async fn test_single_chunk_when_table_fits() {
        let mut session = uniform_session(100);
        let options = options(128 * 1024);
        let table = table(100, 64); // whole table well under one chunk
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome::Chunked(1));
        assert_full_coverage(&sink.0, 1, 100);
    }

    #[tokio::test]
    async fn test_oversized_rows_produce_bounded_chunks() {
        let mut session = uniform_session(50);
        // every row exceeds bytes_per_chunk: rows_per_chunk becomes 0
        let options = options(128 * 1024);
        let table = table(50, 512 * 1024);
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        let ChunkOutcome::Chunked(count) = outcome else {
            panic!("expected chunked outcome");
        };
        assert!(count >= 1);
        assert_full_coverage(&sink.0, 1, 50);
    }

    #[tokio::test]
    async fn test_no_index_is_not_chunked() {
        let mut session = uniform_session(100);
        let options = options(128 * 1024);
        let mut table = table(100, 64);
        table.index = None;
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome::NotChunked);
        assert!(sink.0.is_empty());
    }

    #[tokio::test]
    async fn test_chunking_disabled_is_not_chunked() {
        let mut session = uniform_session(100);
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out")
            .chunking(false)
            .build();
        let table = table(100, 64);
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();
        assert_eq!(outcome, ChunkOutcome::NotChunked);
    }

    #[tokio::test]
    async fn test_empty_table() {
        let mut session = ScriptedSession::new(|sql| {
            Ok(if sql.contains("MIN(") {
                Resultset::new(
                    vec![
                        ColumnMeta::new("min", ColumnType::Integer),
                        ColumnMeta::new("max", ColumnType::Integer),
                    ],
                    vec![SqlRow::new(vec![SqlValue::Null, SqlValue::Null])],
                )
            } else if sql.contains("EXISTS") {
                Resultset::new(vec![], vec![SqlRow::new(vec![SqlValue::UInt(0)])])
            } else {
                Resultset::empty()
            })
        });
        let options = options(128 * 1024);
        let table = table(0, 0);
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();
        assert_eq!(outcome, ChunkOutcome::Empty);
    }

    #[tokio::test]
    async fn test_all_null_keys_fall_back_to_whole_table() {
        let mut session = ScriptedSession::new(|sql| {
            Ok(if sql.contains("MIN(") {
                Resultset::new(
                    vec![
                        ColumnMeta::new("min", ColumnType::Integer),
                        ColumnMeta::new("max", ColumnType::Integer),
                    ],
                    vec![SqlRow::new(vec![SqlValue::Null, SqlValue::Null])],
                )
            } else if sql.contains("EXISTS") {
                Resultset::new(vec![], vec![SqlRow::new(vec![SqlValue::UInt(1)])])
            } else {
                Resultset::empty()
            })
        });
        let options = options(128 * 1024);
        let table = table(10, 64);
        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();
        assert_eq!(outcome, ChunkOutcome::NotChunked);
    }

    /// LIMIT-walk over synthetic string keys.
    fn string_key_session(keys: Vec<String>) -> ScriptedSession {
        ScriptedSession::new(move |sql| {
            Ok(if sql.contains("MIN(") {
                Resultset::new(
                    vec![
                        ColumnMeta::new("min", ColumnType::String),
                        ColumnMeta::new("max", ColumnType::String),
                    ],
                    vec![SqlRow::new(vec![
                        text_cell(keys.first().unwrap()),
                        text_cell(keys.last().unwrap()),
                    ])],
                )
            } else if sql.contains("LIMIT") {
                // apply the `key > 'fence'` filter, then the LIMIT offset
                let filtered: Vec<&String> = match sql.split(" > '").nth(1) {
                    Some(rest) => {
                        let fence = rest.split('\'').next().unwrap();
                        keys.iter().filter(|k| k.as_str() > fence).collect()
                    }
                    None => keys.iter().collect(),
                };
                let offset: usize = sql
                    .split("LIMIT ")
                    .nth(1)
                    .unwrap()
                    .split(',')
                    .next()
                    .unwrap()
                    .trim()
                    .parse()
                    .unwrap();
                match filtered.get(offset) {
                    Some(key) => Resultset::new(vec![], vec![SqlRow::new(vec![text_cell(key)])]),
                    None => Resultset::empty(),
                }
            } else {
                Resultset::empty()
            })
        })
    }

    #[tokio::test]
    async fn test_limit_walk_string_keys() {
        let keys: Vec<String> = (0..95).map(|i| format!("key{:04}", i)).collect();
        let mut session = string_key_session(keys.clone());

        let options = options(128 * 1024);
        let mut table = table(95, 0);
        // missing statistics: default row size kicks in, but force small
        // chunks through a small target instead
        table.average_row_length = 128 * 1024 / 10; // 10 rows per chunk

        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        let ChunkOutcome::Chunked(count) = outcome else {
            panic!("expected chunked outcome");
        };
        assert_eq!(count, 10, "95 keys at 10 rows per chunk");

        // boundaries walk the key list without gaps and end at MAX
        assert_eq!(sink.0[0].range.as_ref().unwrap().begin, "key0000");
        assert_eq!(
            sink.0.last().unwrap().range.as_ref().unwrap().end,
            *keys.last().unwrap()
        );
        assert!(sink.0.last().unwrap().last);
        assert!(sink.0[0].include_nulls);

        for pair in sink.0.windows(2) {
            let prev = pair[0].range.as_ref().unwrap();
            let next = pair[1].range.as_ref().unwrap();
            assert!(next.begin > prev.end, "ranges must stay disjoint");
        }
    }

    #[tokio::test]
    async fn test_limit_walk_duplicate_heavy_terminates() {
        // many duplicates: boundaries repeat values but the fence keeps
        // advancing and the walk still terminates at MAX
        let mut keys: Vec<String> = std::iter::repeat("dup".to_string()).take(30).collect();
        keys.extend((0..5).map(|i| format!("tail{}", i)));
        keys.sort();

        let mut session = string_key_session(keys.clone());
        let options = options(128 * 1024);
        let mut table = table(35, 0);
        table.average_row_length = 128 * 1024 / 10;

        let interrupt = Interrupt::new();
        let mut sink = VecSink(Vec::new());

        let outcome = Chunker::new(&mut session, &options, &interrupt, "shop", &table)
            .generate(&mut sink)
            .await
            .unwrap();

        assert!(matches!(outcome, ChunkOutcome::Chunked(_)));
        assert_eq!(
            sink.0.last().unwrap().range.as_ref().unwrap().end,
            *keys.last().unwrap()
        );
    }

    #[test]
    fn test_query_comment_sanitizes_identifiers() {
        let comment = query_comment("shop", "weird*/table", "3", "chunking");
        assert!(comment.starts_with("/* trawl dump, chunking table"));
        assert!(comment.ends_with("chunk ID: 3 */"));
        assert!(!comment.contains("weird*/table"));
    }
}
