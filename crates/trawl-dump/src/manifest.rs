//! Structured dump descriptors
//!
//! Three categories of JSON documents describe a dump to its loader: the
//! global `@.json` written at start, the per-schema and per-table
//! descriptors written while dumping, and `@.done.json` written last; its
//! presence certifies that the dump is complete. Field names are camelCase
//! on disk; maps use ordered keys so output is deterministic.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `@.json`: global dump descriptor, written when dumping starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpManifest {
    /// Dumper identity and version
    pub dumper: String,
    /// Descriptor format version
    pub version: String,
    /// Operation that produced the dump
    pub origin: String,
    /// Dumped schemas
    pub schemas: Vec<String>,
    /// Schema name to basename
    pub basenames: BTreeMap<String, String>,
    /// Dumped accounts, when users are included
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// Connection character set
    pub default_character_set: String,
    /// Whether sessions ran in UTC
    pub tz_utc: bool,
    /// Chunk size target
    pub bytes_per_chunk: u64,
    /// Account the dump ran as
    pub user: String,
    /// Server host name
    pub hostname: String,
    /// Server identity
    pub server: String,
    /// Server version
    pub server_version: String,
    /// Captured `gtid_executed`
    pub gtid_executed: String,
    /// True when the captured GTID set may not match the snapshot
    pub gtid_executed_inconsistent: bool,
    /// Whether a consistent snapshot was requested
    pub consistent: bool,
    /// Compatibility target, when one was configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    /// Start timestamp
    pub begin: String,
}

/// `@.done.json`: written only on success; certifies a complete dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneManifest {
    /// End timestamp
    pub end: String,
    /// Aggregate pre-compression bytes
    pub data_bytes: u64,
    /// Pre-compression bytes per schema per table
    pub table_data_bytes: BTreeMap<String, BTreeMap<String, u64>>,
    /// On-disk bytes per data file
    pub chunk_file_bytes: BTreeMap<String, u64>,
}

/// `<schemaBasename>.json`: per-schema descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaManifest {
    /// Schema name
    pub schema: String,
    /// Whether DDL files were produced
    pub includes_ddl: bool,
    /// Whether view DDL files were produced
    pub includes_views_ddl: bool,
    /// Whether data files were produced
    pub includes_data: bool,
    /// Table names
    pub tables: Vec<String>,
    /// View names, when DDL is included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<Vec<String>>,
    /// Event names, when events are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    /// Function names, when routines are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,
    /// Procedure names, when routines are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedures: Option<Vec<String>>,
    /// Object name to basename
    pub basenames: BTreeMap<String, String>,
}

/// Loader-facing options inside the per-table descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableLoadOptions {
    /// Target schema
    pub schema: String,
    /// Target table
    pub table: String,
    /// Ordered column list
    pub columns: Vec<String>,
    /// Column to SQL function inverting its encoding (`UNHEX`/`FROM_BASE64`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decode_columns: BTreeMap<String, String>,
    /// First column of the primary index, empty if none
    pub primary_index: String,
    /// Compression codec of the data files
    pub compression: String,
    /// Character set of the data files
    pub default_character_set: String,
    /// Field terminator
    pub fields_terminated_by: String,
    /// Field enclosure, empty for none
    pub fields_enclosed_by: String,
    /// Whether enclosing is optional
    pub fields_optionally_enclosed: bool,
    /// Escape character, empty for none
    pub fields_escaped_by: String,
    /// Line terminator
    pub lines_terminated_by: String,
}

/// One histogram entry in the per-table descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramEntry {
    /// Column the histogram covers
    pub column: String,
    /// Bucket count
    pub buckets: u64,
}

/// `<tableBasename>@.json`: per-table descriptor consumed by the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableManifest {
    /// Loader options
    pub options: TableLoadOptions,
    /// Trigger names, when triggers are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<String>>,
    /// Histograms, when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub histograms: Vec<HistogramEntry>,
    /// Whether data files were produced
    pub includes_data: bool,
    /// Whether DDL files were produced
    pub includes_ddl: bool,
    /// Data file extension, including the compression suffix
    pub extension: String,
    /// Whether the table was split into chunks
    pub chunking: bool,
}

/// Serialize `value` as pretty JSON into `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}

/// Current local timestamp in the manifest format.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
