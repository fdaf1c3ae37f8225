//! Row output
//!
//! [`DumpWriter`] frames rows per the configured dialect, streams them
//! through the optional compression layer into an in-progress file, and keeps
//! the two byte counts the manifests need: `data_bytes` (before compression)
//! and `bytes_written` (after, i.e. the on-disk size). The optional `.idx`
//! sidecar records cumulative data-byte offsets about once per MiB so a
//! loader can split the file for parallel reload; its final entry is the
//! total data-byte length.
//!
//! A writer belongs to at most one task at a time and is single-threaded;
//! the single-file output mode serializes access with a mutex around one
//! shared writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use trawl_sql::{ColumnMeta, ColumnType, SqlRow, SqlValue};

use crate::compression::{CompressedSink, Compression};
use crate::dialect::{Dialect, Framing};
use crate::error::Result;

/// Index entries are emitted once this many data bytes have accumulated.
const INDEX_EVERY_BYTES: u64 = 1024 * 1024;

/// Byte accounting for one write call or one whole file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Bytes that reached the file (post-compression)
    pub bytes_written: u64,
    /// Bytes produced by row framing (pre-compression)
    pub data_bytes: u64,
}

impl std::ops::AddAssign for WriteResult {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_written += rhs.bytes_written;
        self.data_bytes += rhs.data_bytes;
    }
}

/// How a column's values were pre-encoded in the SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Raw value
    None,
    /// `HEX(col)`
    Hex,
    /// `TO_BASE64(col)`
    Base64,
}

impl FieldEncoding {
    /// SQL function a loader applies to invert this encoding.
    pub fn decode_function(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Hex => Some("UNHEX"),
            Self::Base64 => Some("FROM_BASE64"),
        }
    }
}

#[derive(Debug, Clone)]
struct WriterColumn {
    name: String,
    column_type: ColumnType,
    enclose: bool,
}

struct CountingFile {
    inner: File,
    written: Arc<AtomicU64>,
}

impl Write for CountingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Sidecar file of network-byte-order u64 data offsets.
pub struct IndexFile {
    file: BufWriter<File>,
    path: PathBuf,
    last_offset: u64,
    closed: bool,
}

impl IndexFile {
    /// Create the sidecar at `path`.
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self {
            file,
            path,
            last_offset: 0,
            closed: false,
        })
    }

    /// Path of the sidecar.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_offset(&mut self, offset: u64) -> Result<()> {
        self.file.write_all(&offset.to_be_bytes())?;
        self.last_offset = offset;
        Ok(())
    }

    fn finish(&mut self, total: u64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.write_offset(total)?;
        self.file.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Writes one output file: framing, compression, accounting, index sidecar.
pub struct DumpWriter {
    framing: Framing,
    json: bool,
    sink: Option<CompressedSink<BufWriter<CountingFile>>>,
    bytes_written: Arc<AtomicU64>,
    data_bytes: u64,
    rows: u64,
    bytes_since_index: u64,
    columns: Vec<WriterColumn>,
    encodings: Vec<FieldEncoding>,
    index: Option<IndexFile>,
    current_path: PathBuf,
    final_path: PathBuf,
    closed: bool,
}

impl DumpWriter {
    /// Create a writer for `final_path`. With `in_progress`, output goes to
    /// `<final_path>.dumping` first and [`DumpWriter::close`] renames it into
    /// place. `index_path` enables the `.idx` sidecar.
    pub fn create(
        final_path: PathBuf,
        dialect: &Dialect,
        compression: Compression,
        in_progress: bool,
        index_path: Option<PathBuf>,
    ) -> Result<Self> {
        let current_path = if in_progress {
            let mut name = final_path.as_os_str().to_owned();
            name.push(crate::filenames::DUMPING_EXT);
            PathBuf::from(name)
        } else {
            final_path.clone()
        };

        let written = Arc::new(AtomicU64::new(0));
        let file = CountingFile {
            inner: File::create(&current_path)?,
            written: Arc::clone(&written),
        };
        let sink = CompressedSink::new(BufWriter::new(file), compression)?;
        let index = index_path.map(IndexFile::create).transpose()?;

        Ok(Self {
            framing: dialect.framing(),
            json: dialect.is_json(),
            sink: Some(sink),
            bytes_written: written,
            data_bytes: 0,
            rows: 0,
            bytes_since_index: 0,
            columns: Vec::new(),
            encodings: Vec::new(),
            index,
            current_path,
            final_path,
            closed: false,
        })
    }

    /// Record column metadata and per-column encodings before the first row.
    ///
    /// The framings produced here carry no header bytes; the encodings are
    /// surfaced through the table manifest so the loader can invert them.
    pub fn write_preamble(
        &mut self,
        columns: &[ColumnMeta],
        encodings: &[FieldEncoding],
    ) -> Result<WriteResult> {
        let optionally = self.framing.fields_optionally_enclosed;
        let encloses = !self.framing.fields_enclosed_by.is_empty();

        self.columns = columns
            .iter()
            .map(|c| WriterColumn {
                name: c.name.clone(),
                column_type: c.column_type,
                enclose: encloses && !(optionally && !c.column_type.needs_quoting()),
            })
            .collect();
        self.encodings = encodings.to_vec();

        Ok(WriteResult::default())
    }

    /// Frame and write one row.
    pub fn write_row(&mut self, row: &SqlRow) -> Result<WriteResult> {
        let before = self.bytes_written.load(Ordering::Relaxed);

        let line = if self.json {
            self.frame_json_row(row)?
        } else {
            self.frame_text_row(row)
        };

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| crate::error::DumpError::invalid_state("writer is closed"))?;
        sink.write_all(&line)?;

        let data = line.len() as u64;
        self.data_bytes += data;
        self.rows += 1;
        self.bytes_since_index += data;

        if self.bytes_since_index >= INDEX_EVERY_BYTES {
            if let Some(index) = self.index.as_mut() {
                // offsets address the data stream, not the compressed one
                let offset = self.data_bytes;
                index.write_offset(offset)?;
            }
            self.bytes_since_index %= INDEX_EVERY_BYTES;
        }

        Ok(WriteResult {
            bytes_written: self.bytes_written.load(Ordering::Relaxed) - before,
            data_bytes: data,
        })
    }

    /// Finish the data stream. The framings in use emit no trailer bytes;
    /// the index sidecar receives its final total-length entry.
    pub fn write_postamble(&mut self) -> Result<WriteResult> {
        if let Some(index) = self.index.as_mut() {
            index.finish(self.data_bytes)?;
        }
        Ok(WriteResult::default())
    }

    /// Flush, close and rename the in-progress file into place. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        if let Some(sink) = self.sink.take() {
            let mut file = sink.finish()?;
            file.flush()?;
        }
        if let Some(index) = self.index.as_mut() {
            index.finish(self.data_bytes)?;
        }

        if self.current_path != self.final_path {
            std::fs::rename(&self.current_path, &self.final_path)?;
        }
        self.closed = true;
        Ok(())
    }

    /// Final path of the output file.
    pub fn output_path(&self) -> &Path {
        &self.final_path
    }

    /// Pre-compression bytes written so far.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    /// Post-compression bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn frame_text_row(&self, row: &SqlRow) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        let field_term = self.framing.fields_terminated_by.as_bytes();
        let line_term = self.framing.lines_terminated_by.as_bytes();
        let enclosure = self.framing.fields_enclosed_by.as_bytes().first().copied();
        let escape = self.framing.fields_escaped_by.as_bytes().first().copied();

        for (idx, value) in row.values().iter().enumerate() {
            if idx > 0 {
                out.extend_from_slice(field_term);
            }

            match value {
                SqlValue::Null => {
                    if let Some(esc) = escape {
                        out.push(esc);
                        out.push(b'N');
                    } else {
                        out.extend_from_slice(b"NULL");
                    }
                }
                value => {
                    let enclose = enclosure.is_some()
                        && self.columns.get(idx).map(|c| c.enclose).unwrap_or(true);
                    if enclose {
                        out.push(enclosure.unwrap_or(b'"'));
                    }

                    let text = value.as_text().unwrap_or_default();
                    self.escape_field(
                        text.as_bytes(),
                        escape,
                        enclosure.filter(|_| enclose),
                        field_term.first().copied().filter(|_| !enclose),
                        line_term.first().copied(),
                        &mut out,
                    );

                    if enclose {
                        out.push(enclosure.unwrap_or(b'"'));
                    }
                }
            }
        }

        out.extend_from_slice(line_term);
        out
    }

    fn escape_field(
        &self,
        bytes: &[u8],
        escape: Option<u8>,
        enclosure: Option<u8>,
        field_term: Option<u8>,
        line_term: Option<u8>,
        out: &mut Vec<u8>,
    ) {
        let Some(esc) = escape else {
            out.extend_from_slice(bytes);
            return;
        };

        for &b in bytes {
            match b {
                0 => {
                    out.push(esc);
                    out.push(b'0');
                }
                b'\n' => {
                    out.push(esc);
                    out.push(b'n');
                }
                b'\r' => {
                    out.push(esc);
                    out.push(b'r');
                }
                b if b == esc => {
                    out.push(esc);
                    out.push(esc);
                }
                b if Some(b) == enclosure || Some(b) == field_term || Some(b) == line_term => {
                    out.push(esc);
                    out.push(b);
                }
                b => out.push(b),
            }
        }
    }

    fn frame_json_row(&self, row: &SqlRow) -> Result<Vec<u8>> {
        let mut object = serde_json::Map::with_capacity(row.len());

        for (idx, value) in row.values().iter().enumerate() {
            let (name, column_type) = match self.columns.get(idx) {
                Some(c) => (c.name.clone(), c.column_type),
                None => (format!("column_{}", idx), ColumnType::String),
            };

            let json = match value.as_text() {
                None => serde_json::Value::Null,
                Some(text) => match column_type {
                    ColumnType::Integer => text
                        .parse::<i64>()
                        .map(serde_json::Value::from)
                        .unwrap_or(serde_json::Value::String(text)),
                    ColumnType::UInteger => text
                        .parse::<u64>()
                        .map(serde_json::Value::from)
                        .unwrap_or(serde_json::Value::String(text)),
                    ColumnType::Float => text
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::String(text)),
                    _ => serde_json::Value::String(text),
                },
            };

            object.insert(name, json);
        }

        let mut line = serde_json::to_vec(&serde_json::Value::Object(object))?;
        line.extend_from_slice(self.framing.lines_terminated_by.as_bytes());
        Ok(line)
    }
}

impl Drop for DumpWriter {
    fn drop(&mut self) {
        // best effort on abandonment; the .dumping name marks a torn file
        if !self.closed {
            if let Some(sink) = self.sink.take() {
                if let Ok(mut file) = sink.finish() {
                    let _ = file.flush();
                }
            }
        }
    }
}
