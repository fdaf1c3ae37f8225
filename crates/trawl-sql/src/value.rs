//! Column type model and literal rendering
//!
//! The dumper needs to know three things about a column: whether its values
//! can be embedded in delimited text safely, whether range literals over it
//! must be quoted, and whether integer arithmetic over it is meaningful
//! (for chunk boundary striding). [`ColumnType`] answers all three.

use std::fmt;

/// Classified column type, derived from `INFORMATION_SCHEMA` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Signed integer types (TINYINT .. BIGINT)
    Integer,
    /// Unsigned integer types
    UInteger,
    /// DECIMAL / NUMERIC
    Decimal,
    /// FLOAT / DOUBLE
    Float,
    /// CHAR / VARCHAR / TEXT family
    String,
    /// BINARY / VARBINARY / BLOB family
    Binary,
    /// BIT
    Bit,
    /// DATE
    Date,
    /// TIME
    Time,
    /// DATETIME / TIMESTAMP
    DateTime,
    /// YEAR
    Year,
    /// ENUM
    Enum,
    /// SET
    Set,
    /// JSON
    Json,
    /// Spatial types (GEOMETRY, POINT, ...)
    Geometry,
}

impl ColumnType {
    /// Classify an `INFORMATION_SCHEMA.COLUMNS` row.
    ///
    /// `data_type` is the bare type name (`DATA_TYPE`), `column_type` the full
    /// definition (`COLUMN_TYPE`), which carries the `unsigned` attribute.
    pub fn from_metadata(data_type: &str, column_type: &str) -> Self {
        let unsigned = column_type.to_ascii_lowercase().contains("unsigned");

        match data_type.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                if unsigned {
                    Self::UInteger
                } else {
                    Self::Integer
                }
            }
            "decimal" | "numeric" => Self::Decimal,
            "float" | "double" | "real" => Self::Float,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" => Self::String,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                Self::Binary
            }
            "bit" => Self::Bit,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" | "timestamp" => Self::DateTime,
            "year" => Self::Year,
            "enum" => Self::Enum,
            "set" => Self::Set,
            "json" => Self::Json,
            "geometry" | "geomcollection" | "geometrycollection" | "point" | "linestring"
            | "polygon" | "multipoint" | "multilinestring" | "multipolygon" => Self::Geometry,
            _ => Self::String,
        }
    }

    /// True for integer types, where chunk boundaries can be computed
    /// arithmetically instead of walked with LIMIT queries.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::UInteger)
    }

    /// True for columns whose values cannot be embedded in delimited text
    /// output without a HEX/BASE64 conversion.
    pub fn is_encoding_unsafe(&self) -> bool {
        matches!(self, Self::Binary | Self::Bit | Self::Geometry | Self::Json)
    }

    /// True when literals of this type must be quoted in SQL text.
    ///
    /// Decimals are quoted to preserve precision; everything non-numeric is
    /// quoted as a matter of course.
    pub fn needs_quoting(&self) -> bool {
        !matches!(self, Self::Integer | Self::UInteger | Self::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "integer",
            Self::UInteger => "unsigned integer",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Bit => "bit",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Year => "year",
            Self::Enum => "enum",
            Self::Set => "set",
            Self::Json => "json",
            Self::Geometry => "geometry",
        };
        f.write_str(s)
    }
}

/// A single result value.
///
/// The classic protocol returns almost everything as raw bytes; the numeric
/// variants appear when the server sends typed values (e.g. `EXPLAIN`
/// estimates through some drivers). [`SqlValue::as_text`] is the common
/// denominator used by the dumper's text output path.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Double(f64),
    /// Raw bytes (strings arrive here under the text protocol)
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render as text, or `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(n) => Some(n.to_string()),
            Self::UInt(n) => Some(n.to_string()),
            Self::Double(n) => Some(n.to_string()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Raw bytes of the value, or `None` for NULL.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret as an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(n) => Some(*n),
            Self::Int(n) if *n >= 0 => Some(*n as u64),
            Self::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Interpret as a signed integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::UInt(n) => i64::try_from(*n).ok(),
            Self::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }
}

impl From<mysql_async::Value> for SqlValue {
    fn from(value: mysql_async::Value) -> Self {
        use mysql_async::Value;

        match value {
            Value::NULL => Self::Null,
            Value::Int(n) => Self::Int(n),
            Value::UInt(n) => Self::UInt(n),
            Value::Float(n) => Self::Double(n as f64),
            Value::Double(n) => Self::Double(n),
            Value::Bytes(b) => Self::Bytes(b),
            Value::Date(year, month, day, hour, min, sec, micro) => {
                let text = if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                    format!("{:04}-{:02}-{:02}", year, month, day)
                } else {
                    format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                        year, month, day, hour, min, sec, micro
                    )
                };
                Self::Bytes(text.into_bytes())
            }
            Value::Time(neg, days, hours, mins, secs, micro) => {
                let sign = if neg { "-" } else { "" };
                let total_hours = days * 24 + u32::from(hours);
                let text = format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, total_hours, mins, secs, micro
                );
                Self::Bytes(text.into_bytes())
            }
        }
    }
}

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal, escaping the characters MySQL treats specially.
pub fn quote_sql_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render a range literal in a type-preserving way: quoted for strings and
/// decimals (and other non-numeric types), bare for numbers.
pub fn quote_value(value: &str, column_type: ColumnType) -> String {
    if column_type == ColumnType::Decimal {
        format!("'{}'", value)
    } else if column_type.needs_quoting() {
        quote_sql_string(value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_classification() {
        assert_eq!(
            ColumnType::from_metadata("int", "int(11)"),
            ColumnType::Integer
        );
        assert_eq!(
            ColumnType::from_metadata("bigint", "bigint(20) unsigned"),
            ColumnType::UInteger
        );
        assert_eq!(
            ColumnType::from_metadata("varchar", "varchar(32)"),
            ColumnType::String
        );
        assert_eq!(
            ColumnType::from_metadata("blob", "blob"),
            ColumnType::Binary
        );
        assert_eq!(
            ColumnType::from_metadata("geometry", "geometry"),
            ColumnType::Geometry
        );
        assert_eq!(
            ColumnType::from_metadata("decimal", "decimal(10,2)"),
            ColumnType::Decimal
        );
    }

    #[test]
    fn test_encoding_unsafe() {
        assert!(ColumnType::Binary.is_encoding_unsafe());
        assert!(ColumnType::Geometry.is_encoding_unsafe());
        assert!(ColumnType::Bit.is_encoding_unsafe());
        assert!(ColumnType::Json.is_encoding_unsafe());
        assert!(!ColumnType::String.is_encoding_unsafe());
        assert!(!ColumnType::Integer.is_encoding_unsafe());
    }

    #[test]
    fn test_integer_detection() {
        assert!(ColumnType::Integer.is_integer());
        assert!(ColumnType::UInteger.is_integer());
        assert!(!ColumnType::Decimal.is_integer());
        assert!(!ColumnType::String.is_integer());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("items"), "`items`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_quote_sql_string() {
        assert_eq!(quote_sql_string("plain"), "'plain'");
        assert_eq!(quote_sql_string("it's"), "'it\\'s'");
        assert_eq!(quote_sql_string("a\\b"), "'a\\\\b'");
        assert_eq!(quote_sql_string("line\nbreak"), "'line\\nbreak'");
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("42", ColumnType::Integer), "42");
        assert_eq!(quote_value("42", ColumnType::UInteger), "42");
        assert_eq!(quote_value("3.5", ColumnType::Float), "3.5");
        assert_eq!(quote_value("3.50", ColumnType::Decimal), "'3.50'");
        assert_eq!(quote_value("abc", ColumnType::String), "'abc'");
        assert_eq!(
            quote_value("2024-01-01", ColumnType::Date),
            "'2024-01-01'"
        );
    }

    #[test]
    fn test_sql_value_text() {
        assert_eq!(SqlValue::Null.as_text(), None);
        assert_eq!(SqlValue::Int(-7).as_text().as_deref(), Some("-7"));
        assert_eq!(
            SqlValue::Bytes(b"hello".to_vec()).as_text().as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_sql_value_numeric_access() {
        assert_eq!(SqlValue::Bytes(b"123".to_vec()).as_u64(), Some(123));
        assert_eq!(SqlValue::Int(-1).as_u64(), None);
        assert_eq!(SqlValue::UInt(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Null.as_u64(), None);
    }

    #[test]
    fn test_date_value_rendering() {
        let v = SqlValue::from(mysql_async::Value::Date(2024, 3, 9, 0, 0, 0, 0));
        assert_eq!(v.as_text().as_deref(), Some("2024-03-09"));

        let v = SqlValue::from(mysql_async::Value::Date(2024, 3, 9, 12, 30, 1, 5));
        assert_eq!(v.as_text().as_deref(), Some("2024-03-09 12:30:01.000005"));
    }
}
