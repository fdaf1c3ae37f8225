//! Session abstraction over the wire protocol
//!
//! The dumper talks to the server through `dyn Session` obtained from a
//! [`SessionFactory`]; which wire protocol backs a session is the factory's
//! decision. [`MySqlSession`] implements the classic protocol on top of
//! `mysql_async`.
//!
//! Two execution shapes are offered: [`Session::query`] buffers small
//! metadata result sets, [`Session::query_cursor`] streams arbitrarily large
//! ones row by row.

use async_trait::async_trait;
use mysql_async::consts::{ColumnFlags, ColumnType as WireColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, TextProtocol};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::value::{ColumnType, SqlValue};

/// Maximum packet the session is prepared to receive, roughly the size of the
/// largest single row (1 GiB).
const MAX_ALLOWED_PACKET: usize = 1024 * 1024 * 1024;

/// Metadata of one result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name as reported by the server
    pub name: String,
    /// Classified type
    pub column_type: ColumnType,
}

impl ColumnMeta {
    /// Create column metadata.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A single result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow(pub Vec<SqlValue>);

impl SqlRow {
    /// Create a row from values.
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the row has no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `idx`, or NULL when out of range.
    pub fn get(&self, idx: usize) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.0.get(idx).unwrap_or(&NULL)
    }

    /// True when the value at `idx` is NULL (or missing).
    pub fn is_null(&self, idx: usize) -> bool {
        self.get(idx).is_null()
    }

    /// Text rendering of the value at `idx`.
    pub fn as_text(&self, idx: usize) -> Option<String> {
        self.get(idx).as_text()
    }

    /// Unsigned integer at `idx`.
    pub fn as_u64(&self, idx: usize) -> Option<u64> {
        self.get(idx).as_u64()
    }

    /// Signed integer at `idx`.
    pub fn as_i64(&self, idx: usize) -> Option<i64> {
        self.get(idx).as_i64()
    }

    /// Values of the row.
    pub fn values(&self) -> &[SqlValue] {
        &self.0
    }
}

/// A fully buffered result set.
#[derive(Debug, Clone, Default)]
pub struct Resultset {
    /// Column metadata
    pub columns: Vec<ColumnMeta>,
    /// Rows, in server order
    pub rows: Vec<SqlRow>,
}

impl Resultset {
    /// Create a result set.
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<SqlRow>) -> Self {
        Self { columns, rows }
    }

    /// An empty result set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&SqlRow> {
        self.rows.first()
    }

    /// First row, or a malformed-result error naming `what`.
    pub fn first_or_err(&self, what: &str) -> Result<&SqlRow> {
        self.first()
            .ok_or_else(|| Error::malformed(format!("{} returned no rows", what)))
    }
}

/// Streaming access to a result set.
#[async_trait]
pub trait RowCursor: Send {
    /// Column metadata of the result set.
    fn columns(&self) -> &[ColumnMeta];

    /// Next row, or `None` once the result set is exhausted.
    async fn next_row(&mut self) -> Result<Option<SqlRow>>;
}

/// A database session.
///
/// Sessions are single-owner and not `Sync`; each dump worker holds its own.
#[async_trait]
pub trait Session: Send {
    /// Execute a statement, discarding any result.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Execute a query and buffer the whole result set.
    async fn query(&mut self, sql: &str) -> Result<Resultset>;

    /// Execute a query and stream the result set.
    async fn query_cursor<'a>(&'a mut self, sql: &'a str) -> Result<Box<dyn RowCursor + Send + 'a>>;

    /// Server-side connection id, used for the `KILL QUERY` side channel.
    fn connection_id(&self) -> Option<u32>;

    /// Server version as (major, minor, patch).
    fn server_version(&self) -> (u16, u16, u16);

    /// Close the session.
    async fn close(&mut self) -> Result<()>;
}

/// Creates sessions on demand; each worker obtains its own.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// The connection URL this factory connects to.
    fn url(&self) -> &str;
}

fn classify_wire_column(column: &mysql_async::Column) -> ColumnMeta {
    let flags = column.flags();
    let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
    let binary = flags.contains(ColumnFlags::BINARY_FLAG);

    let column_type = match column.column_type() {
        WireColumnType::MYSQL_TYPE_TINY
        | WireColumnType::MYSQL_TYPE_SHORT
        | WireColumnType::MYSQL_TYPE_INT24
        | WireColumnType::MYSQL_TYPE_LONG
        | WireColumnType::MYSQL_TYPE_LONGLONG => {
            if unsigned {
                ColumnType::UInteger
            } else {
                ColumnType::Integer
            }
        }
        WireColumnType::MYSQL_TYPE_DECIMAL | WireColumnType::MYSQL_TYPE_NEWDECIMAL => {
            ColumnType::Decimal
        }
        WireColumnType::MYSQL_TYPE_FLOAT | WireColumnType::MYSQL_TYPE_DOUBLE => ColumnType::Float,
        WireColumnType::MYSQL_TYPE_DATE | WireColumnType::MYSQL_TYPE_NEWDATE => ColumnType::Date,
        WireColumnType::MYSQL_TYPE_TIME | WireColumnType::MYSQL_TYPE_TIME2 => ColumnType::Time,
        WireColumnType::MYSQL_TYPE_DATETIME
        | WireColumnType::MYSQL_TYPE_DATETIME2
        | WireColumnType::MYSQL_TYPE_TIMESTAMP
        | WireColumnType::MYSQL_TYPE_TIMESTAMP2 => ColumnType::DateTime,
        WireColumnType::MYSQL_TYPE_YEAR => ColumnType::Year,
        WireColumnType::MYSQL_TYPE_BIT => ColumnType::Bit,
        WireColumnType::MYSQL_TYPE_ENUM => ColumnType::Enum,
        WireColumnType::MYSQL_TYPE_SET => ColumnType::Set,
        WireColumnType::MYSQL_TYPE_JSON => ColumnType::Json,
        WireColumnType::MYSQL_TYPE_GEOMETRY => ColumnType::Geometry,
        WireColumnType::MYSQL_TYPE_TINY_BLOB
        | WireColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | WireColumnType::MYSQL_TYPE_LONG_BLOB
        | WireColumnType::MYSQL_TYPE_BLOB
        | WireColumnType::MYSQL_TYPE_VARCHAR
        | WireColumnType::MYSQL_TYPE_VAR_STRING
        | WireColumnType::MYSQL_TYPE_STRING => {
            if binary {
                ColumnType::Binary
            } else {
                ColumnType::String
            }
        }
        _ => ColumnType::String,
    };

    ColumnMeta::new(column.name_str().into_owned(), column_type)
}

fn convert_columns(columns: Option<std::sync::Arc<[mysql_async::Column]>>) -> Vec<ColumnMeta> {
    columns
        .map(|cols| cols.iter().map(classify_wire_column).collect())
        .unwrap_or_default()
}

fn convert_row(row: mysql_async::Row) -> SqlRow {
    SqlRow::new(row.unwrap().into_iter().map(SqlValue::from).collect())
}

/// Classic-protocol session backed by `mysql_async`.
pub struct MySqlSession {
    conn: Option<Conn>,
}

impl MySqlSession {
    /// Connect using a `mysql://` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = Opts::from_url(url)
            .map_err(|e| Error::connection(format!("invalid connection URL: {}", e)))?;
        let opts = mysql_async::OptsBuilder::from_opts(opts)
            .max_allowed_packet(Some(MAX_ALLOWED_PACKET));

        let conn = Conn::new(opts).await?;
        debug!(connection_id = conn.id(), "session established");

        Ok(Self { conn: Some(conn) })
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::invalid_state("session is closed"))
    }
}

struct MySqlCursor<'a> {
    inner: mysql_async::QueryResult<'a, 'static, TextProtocol>,
    columns: Vec<ColumnMeta>,
}

#[async_trait]
impl RowCursor for MySqlCursor<'_> {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<SqlRow>> {
        Ok(self.inner.next().await?.map(convert_row))
    }
}

#[async_trait]
impl Session for MySqlSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn_mut()?.query_drop(sql).await?;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Resultset> {
        let conn = self.conn_mut()?;
        let mut result = conn.query_iter(sql).await?;
        let columns = convert_columns(result.columns());

        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(convert_row(row));
        }

        Ok(Resultset::new(columns, rows))
    }

    async fn query_cursor<'a>(&'a mut self, sql: &'a str) -> Result<Box<dyn RowCursor + Send + 'a>> {
        let conn = self.conn_mut()?;
        let result = conn.query_iter(sql).await?;
        let columns = convert_columns(result.columns());

        Ok(Box::new(MySqlCursor {
            inner: result,
            columns,
        }))
    }

    fn connection_id(&self) -> Option<u32> {
        self.conn.as_ref().map(|c| c.id())
    }

    fn server_version(&self) -> (u16, u16, u16) {
        self.conn
            .as_ref()
            .map(|c| c.server_version())
            .unwrap_or((0, 0, 0))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await?;
        }
        Ok(())
    }
}

/// Factory for classic-protocol sessions.
pub struct MySqlSessionFactory {
    url: String,
}

impl MySqlSessionFactory {
    /// Create a factory for the given `mysql://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SessionFactory for MySqlSessionFactory {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MySqlSession::connect(&self.url).await?))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Cancel the query currently running on `connection_id` through a dedicated
/// side-channel connection. Best effort: failures are logged, not propagated.
pub async fn kill_query(url: &str, connection_id: u32) {
    let result: Result<()> = async {
        let mut session = MySqlSession::connect(url).await?;
        session
            .execute(&format!("KILL QUERY {}", connection_id))
            .await?;
        session.close().await
    }
    .await;

    if let Err(e) = result {
        warn!("error canceling SQL query: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_row_accessors() {
        let row = SqlRow::new(vec![
            SqlValue::Null,
            SqlValue::Int(5),
            SqlValue::Bytes(b"abc".to_vec()),
        ]);

        assert!(row.is_null(0));
        assert!(!row.is_null(1));
        assert_eq!(row.as_i64(1), Some(5));
        assert_eq!(row.as_text(2).as_deref(), Some("abc"));

        // out of range reads as NULL
        assert!(row.is_null(7));
        assert_eq!(row.as_text(7), None);
    }

    #[test]
    fn test_resultset_first_or_err() {
        let empty = Resultset::empty();
        assert!(empty.first_or_err("SELECT 1").is_err());

        let set = Resultset::new(vec![], vec![SqlRow::new(vec![SqlValue::Int(1)])]);
        assert_eq!(set.first_or_err("SELECT 1").unwrap().as_i64(0), Some(1));
    }
}
