//! Test doubles for the session layer
//!
//! [`ScriptedSession`] answers queries from a caller-supplied handler
//! function, which lets higher layers (chunking, metadata collection, DDL
//! generation) run against synthetic data without a server.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{ColumnMeta, Resultset, RowCursor, Session, SessionFactory, SqlRow};

/// Handler invoked for every query a [`ScriptedSession`] receives.
pub type QueryHandler = Box<dyn FnMut(&str) -> Result<Resultset> + Send>;

/// A session whose query results are computed by a handler function.
///
/// Statements run through [`Session::execute`] are recorded and succeed
/// unconditionally; queries are delegated to the handler.
pub struct ScriptedSession {
    handler: QueryHandler,
    executed: Vec<String>,
    queried: Vec<String>,
    server_version: (u16, u16, u16),
    connection_id: u32,
}

impl ScriptedSession {
    /// Create a scripted session with the given query handler.
    pub fn new(handler: impl FnMut(&str) -> Result<Resultset> + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            executed: Vec::new(),
            queried: Vec::new(),
            server_version: (8, 0, 36),
            connection_id: 1,
        }
    }

    /// Override the reported server version.
    pub fn with_server_version(mut self, version: (u16, u16, u16)) -> Self {
        self.server_version = version;
        self
    }

    /// Statements passed to `execute`, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Queries passed to `query`/`query_cursor`, in order.
    pub fn queried(&self) -> &[String] {
        &self.queried
    }
}

/// Cursor over an in-memory result set.
pub struct MemoryCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<SqlRow>,
}

impl MemoryCursor {
    /// Create a cursor over a buffered result set.
    pub fn new(resultset: Resultset) -> Self {
        Self {
            columns: resultset.columns,
            rows: resultset.rows.into(),
        }
    }
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<SqlRow>> {
        Ok(self.rows.pop_front())
    }
}

/// Factory producing [`ScriptedSession`]s; every connection gets a fresh
/// handler from the supplied constructor.
pub struct ScriptedSessionFactory {
    make_handler: Box<dyn Fn() -> QueryHandler + Send + Sync>,
    url: String,
}

impl ScriptedSessionFactory {
    /// Create a factory from a handler constructor.
    pub fn new(make_handler: impl Fn() -> QueryHandler + Send + Sync + 'static) -> Self {
        Self {
            make_handler: Box::new(make_handler),
            url: "mysql://scripted".to_string(),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessionFactory {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let handler = (self.make_handler)();
        Ok(Box::new(ScriptedSession {
            handler,
            executed: Vec::new(),
            queried: Vec::new(),
            server_version: (8, 0, 36),
            connection_id: 1,
        }))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.executed.push(sql.to_string());
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Resultset> {
        self.queried.push(sql.to_string());
        (self.handler)(sql)
    }

    async fn query_cursor<'a>(&'a mut self, sql: &'a str) -> Result<Box<dyn RowCursor + Send + 'a>> {
        self.queried.push(sql.to_string());
        let resultset = (self.handler)(sql)?;
        Ok(Box::new(MemoryCursor::new(resultset)))
    }

    fn connection_id(&self) -> Option<u32> {
        Some(self.connection_id)
    }

    fn server_version(&self) -> (u16, u16, u16) {
        self.server_version
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
