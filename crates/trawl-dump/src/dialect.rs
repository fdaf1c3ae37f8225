//! Output framing dialects
//!
//! A dialect describes how one row becomes one line of output: field and
//! line terminators, optional enclosing, and the escape character. The
//! presets mirror the framings a bulk loader understands; [`Dialect::Json`]
//! switches the writer to one JSON document per line instead of delimited
//! text.

use serde::{Deserialize, Serialize};

/// Delimited-text framing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framing {
    /// Sequence between fields
    pub fields_terminated_by: String,
    /// Enclosure around (some) fields, empty for none
    pub fields_enclosed_by: String,
    /// When true, only fields that need it are enclosed
    pub fields_optionally_enclosed: bool,
    /// Escape character, empty for none
    pub fields_escaped_by: String,
    /// Sequence between rows
    pub lines_terminated_by: String,
}

/// An output dialect: a named framing preset or a custom one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// Tab-separated, backslash-escaped, no enclosing (loader default)
    Default,
    /// Same framing as [`Dialect::Default`], kept distinct for labeling
    Tsv,
    /// Comma-separated, optionally double-quoted, CRLF line endings
    Csv,
    /// Comma-separated, always double-quoted, LF line endings
    CsvUnix,
    /// One JSON document per line
    Json,
    /// Caller-supplied framing
    Custom(Framing),
}

impl Default for Dialect {
    fn default() -> Self {
        Self::Default
    }
}

impl Dialect {
    /// Parse a dialect name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "" => Some(Self::Default),
            "tsv" => Some(Self::Tsv),
            "csv" => Some(Self::Csv),
            "csv-unix" | "csv_unix" => Some(Self::CsvUnix),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// The framing parameters of this dialect.
    ///
    /// JSON output has no field-level framing; it reports newline-terminated
    /// lines and nothing else.
    pub fn framing(&self) -> Framing {
        match self {
            Self::Default | Self::Tsv => Framing {
                fields_terminated_by: "\t".to_string(),
                fields_enclosed_by: String::new(),
                fields_optionally_enclosed: false,
                fields_escaped_by: "\\".to_string(),
                lines_terminated_by: "\n".to_string(),
            },
            Self::Csv => Framing {
                fields_terminated_by: ",".to_string(),
                fields_enclosed_by: "\"".to_string(),
                fields_optionally_enclosed: true,
                fields_escaped_by: "\\".to_string(),
                lines_terminated_by: "\r\n".to_string(),
            },
            Self::CsvUnix => Framing {
                fields_terminated_by: ",".to_string(),
                fields_enclosed_by: "\"".to_string(),
                fields_optionally_enclosed: false,
                fields_escaped_by: "\\".to_string(),
                lines_terminated_by: "\n".to_string(),
            },
            Self::Json => Framing {
                fields_terminated_by: String::new(),
                fields_enclosed_by: String::new(),
                fields_optionally_enclosed: false,
                fields_escaped_by: String::new(),
                lines_terminated_by: "\n".to_string(),
            },
            Self::Custom(framing) => framing.clone(),
        }
    }

    /// Data file extension (before any compression suffix).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Default | Self::Tsv => "tsv",
            Self::Csv | Self::CsvUnix => "csv",
            Self::Json => "json",
            Self::Custom(_) => "txt",
        }
    }

    /// True for the JSON-documents dialect.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Dialect::parse("default"), Some(Dialect::Default));
        assert_eq!(Dialect::parse("TSV"), Some(Dialect::Tsv));
        assert_eq!(Dialect::parse("csv"), Some(Dialect::Csv));
        assert_eq!(Dialect::parse("csv-unix"), Some(Dialect::CsvUnix));
        assert_eq!(Dialect::parse("json"), Some(Dialect::Json));
        assert_eq!(Dialect::parse("xml"), None);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(Dialect::Default.extension(), "tsv");
        assert_eq!(Dialect::Tsv.extension(), "tsv");
        assert_eq!(Dialect::Csv.extension(), "csv");
        assert_eq!(Dialect::CsvUnix.extension(), "csv");
        assert_eq!(Dialect::Json.extension(), "json");
        assert_eq!(
            Dialect::Custom(Dialect::Default.framing()).extension(),
            "txt"
        );
    }

    #[test]
    fn test_default_framing() {
        let framing = Dialect::Default.framing();
        assert_eq!(framing.fields_terminated_by, "\t");
        assert_eq!(framing.fields_escaped_by, "\\");
        assert_eq!(framing.lines_terminated_by, "\n");
        assert!(framing.fields_enclosed_by.is_empty());
    }

    #[test]
    fn test_csv_framing() {
        let framing = Dialect::Csv.framing();
        assert_eq!(framing.fields_terminated_by, ",");
        assert_eq!(framing.fields_enclosed_by, "\"");
        assert!(framing.fields_optionally_enclosed);
        assert_eq!(framing.lines_terminated_by, "\r\n");

        let unix = Dialect::CsvUnix.framing();
        assert!(!unix.fields_optionally_enclosed);
        assert_eq!(unix.lines_terminated_by, "\n");
    }
}
