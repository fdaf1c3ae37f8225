//! Units of work
//!
//! Tasks reference cache entries by index ([`SchemaId`]/[`TableId`]/
//! [`ViewId`]); the instance cache owns all metadata and outlives every
//! task. A [`RangeTask`] owns exclusive write access to its writer except in
//! single-file mode, where all range tasks serialize on one shared writer.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::Mutex;
use trawl_sql::ColumnType;

use crate::cache::{SchemaId, TableId, ViewId};
use crate::writer::DumpWriter;

/// Queue priority; DDL first, chunk discovery next, data last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// DDL and metadata tasks
    High,
    /// Chunk discovery tasks
    Medium,
    /// Data range tasks
    Low,
}

/// A key range of one table, rendered type-preservingly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// Type of the chunking column
    pub column_type: ColumnType,
    /// Inclusive lower literal
    pub begin: String,
    /// Inclusive upper literal
    pub end: String,
}

/// Write access to a data file: exclusive, or serialized on the shared
/// single-file writer.
pub enum WriterHandle {
    /// Writer owned by this task alone
    Owned(Box<DumpWriter>),
    /// The job-wide single-file writer
    Shared(Arc<Mutex<DumpWriter>>),
}

/// Borrowed access to the writer behind a [`WriterHandle`].
pub enum WriterGuard<'a> {
    /// Exclusive borrow
    Owned(&'a mut DumpWriter),
    /// Mutex guard over the shared writer
    Shared(tokio::sync::MutexGuard<'a, DumpWriter>),
}

impl WriterHandle {
    /// Borrow the writer, locking the shared one if needed.
    pub async fn lock(&mut self) -> WriterGuard<'_> {
        match self {
            Self::Owned(writer) => WriterGuard::Owned(writer),
            Self::Shared(mutex) => WriterGuard::Shared(mutex.lock().await),
        }
    }

    /// True when this task owns its writer exclusively.
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl Deref for WriterGuard<'_> {
    type Target = DumpWriter;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(w) => w,
            Self::Shared(g) => g,
        }
    }
}

impl DerefMut for WriterGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(w) => w,
            Self::Shared(g) => g,
        }
    }
}

/// A data extraction task over one key range (or the whole table when
/// `range` is `None`).
pub struct RangeTask {
    /// Table being dumped
    pub table: TableId,
    /// Chunk id used in query comments and diagnostics
    pub chunk_id: String,
    /// Chunk ordinal within the table
    pub ordinal: usize,
    /// Key range; `None` dumps the whole table
    pub range: Option<Range>,
    /// Whether rows with NULL in the chunking column belong to this range
    pub include_nulls: bool,
    /// Output writer
    pub writer: WriterHandle,
}

/// A unit of work posted to the queue.
pub enum Task {
    /// Write one schema's DDL file
    SchemaDdl(SchemaId),
    /// Write one table's DDL file (and trigger sidecar)
    TableDdl(TableId),
    /// Write one view's placeholder and DDL files
    ViewDdl(ViewId),
    /// Write one table's metadata descriptor
    TableMetadata(TableId),
    /// Discover chunk ranges for one table and emit its range tasks
    ChunkTable(TableId),
    /// Stream one range to its writer
    DumpRange(Box<RangeTask>),
}

impl Task {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SchemaDdl(_) => "schema-ddl",
            Self::TableDdl(_) => "table-ddl",
            Self::ViewDdl(_) => "view-ddl",
            Self::TableMetadata(_) => "table-metadata",
            Self::ChunkTable(_) => "chunk-table",
            Self::DumpRange(_) => "dump-range",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Task::SchemaDdl(SchemaId(0)).label(), "schema-ddl");
        assert_eq!(
            Task::ChunkTable(TableId { schema: 0, table: 0 }).label(),
            "chunk-table"
        );
    }

    #[test]
    fn test_range_rendering_fields() {
        let range = Range {
            column_type: ColumnType::Integer,
            begin: "1".to_string(),
            end: "100".to_string(),
        };
        assert_eq!(range.begin, "1");
        assert_eq!(range.end, "100");
    }
}
