//! Output file naming
//!
//! Schema and table names are mapped to filesystem-safe basenames by
//! percent-escaping every byte outside `[A-Za-z0-9_]`; the `@` joining the
//! schema and table parts is unambiguous because a literal `@` inside a name
//! is escaped. Basenames are capped at 225 bytes so the chunk ordinal, tail
//! marker, extension and in-progress suffix always fit in a 255-byte file
//! name; collisions after truncation get a process-unique ordinal.

use std::collections::HashMap;

/// Extension marking a data file that is still being written.
pub const DUMPING_EXT: &str = ".dumping";

/// Longest basename before truncation kicks in.
const MAX_BASENAME_BYTES: usize = 225;

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Percent-escape one name component.
pub fn encode_name_part(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if is_safe_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Basename of a schema.
pub fn encode_schema_basename(schema: &str) -> String {
    encode_name_part(schema)
}

/// Basename of a table: `schema@table`, both parts escaped.
pub fn encode_table_basename(schema: &str, table: &str) -> String {
    format!("{}@{}", encode_name_part(schema), encode_name_part(table))
}

/// Assigns final basenames, disambiguating names that collide after
/// truncation. One registry lives for the duration of a dump job.
#[derive(Debug, Default)]
pub struct BasenameRegistry {
    truncated: HashMap<String, usize>,
}

impl BasenameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Final basename for an encoded name, truncating and disambiguating
    /// when needed.
    pub fn assign(&mut self, basename: &str) -> String {
        if basename.len() <= MAX_BASENAME_BYTES {
            return basename.to_string();
        }

        let mut cut = MAX_BASENAME_BYTES;
        while !basename.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = &basename[..cut];

        let ordinal = self.truncated.entry(truncated.to_string()).or_insert(0);
        let assigned = format!("{}{}", truncated, *ordinal);
        *ordinal += 1;
        assigned
    }
}

/// Name of a whole-table data file.
pub fn table_data_filename(basename: &str, extension: &str) -> String {
    format!("{}.{}", basename, extension)
}

/// Name of a chunk data file; the final chunk doubles the separator so the
/// loader can detect the tail.
pub fn chunk_data_filename(basename: &str, extension: &str, ordinal: usize, last: bool) -> String {
    let marker = if last { "@@" } else { "@" };
    format!("{}{}{}.{}", basename, marker, ordinal, extension)
}

/// Name of a table's auxiliary file (`@.json`, `@.pre.sql`, `@.triggers.sql`).
pub fn table_aux_filename(basename: &str, suffix: &str) -> String {
    format!("{}@.{}", basename, suffix)
}

/// Name of a per-schema file (`.sql`, `.json`).
pub fn schema_filename(basename: &str, extension: &str) -> String {
    format!("{}.{}", basename, extension)
}

/// The in-progress name of a data file.
pub fn in_progress_name(filename: &str) -> String {
    format!("{}{}", filename, DUMPING_EXT)
}

/// Strip the in-progress extension, if present.
pub fn trim_in_progress(filename: &str) -> &str {
    filename.strip_suffix(DUMPING_EXT).unwrap_or(filename)
}
