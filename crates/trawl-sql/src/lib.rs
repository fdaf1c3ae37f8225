//! # trawl-sql
//!
//! Database plumbing for the trawl logical dumper.
//!
//! This crate provides the pieces of database connectivity the dumper builds
//! on, without any dump-specific logic:
//!
//! - **Error taxonomy**: [`Error`] with server error codes and retriability
//!   classification
//! - **Value model**: [`SqlValue`] / [`ColumnType`] with type-preserving
//!   literal rendering
//! - **Session abstraction**: the [`Session`] trait with buffered and
//!   streaming query execution, plus the `mysql_async` classic-protocol
//!   backend
//! - **Test support**: [`testing::ScriptedSession`] answers queries from a
//!   caller-supplied handler, so higher layers can be tested without a server
//!
//! The session layer is protocol-agnostic: callers talk to `dyn Session`
//! obtained from a [`SessionFactory`], and the factory decides which wire
//! protocol backs it.

pub mod error;
pub mod session;
pub mod testing;
pub mod value;

pub use error::{Error, Result};
pub use session::{
    kill_query, ColumnMeta, MySqlSession, MySqlSessionFactory, Resultset, RowCursor, Session,
    SessionFactory, SqlRow,
};
pub use value::{quote_ident, quote_sql_string, quote_value, ColumnType, SqlValue};
