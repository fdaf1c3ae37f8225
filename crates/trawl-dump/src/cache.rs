//! Instance metadata cache
//!
//! Built in two passes: the *minimal* build lists schemas and tables while
//! locks are being acquired (their names are all the locking step needs),
//! the *full* build adds columns, the chosen chunking index, statistics,
//! views, events, routines, triggers, histograms and users. After the build
//! the cache is read-only; tasks refer into it with [`SchemaId`] /
//! [`TableId`] / [`ViewId`] indexes rather than pointers.

use std::collections::HashMap;

use tracing::{debug, warn};
use trawl_sql::{quote_sql_string, ColumnType, Session};

use crate::config::DumpOptions;
use crate::error::Result;

/// Built-in schemas that are never dumped.
const BUILTIN_SCHEMAS: &[&str] = &[
    "information_schema",
    "mysql",
    "ndbinfo",
    "performance_schema",
    "sys",
];

/// Index of a schema in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(pub usize);

/// Index of a table within its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId {
    /// Owning schema
    pub schema: usize,
    /// Table position within the schema
    pub table: usize,
}

/// Index of a view within its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId {
    /// Owning schema
    pub schema: usize,
    /// View position within the schema
    pub view: usize,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// User name
    pub user: String,
    /// Host pattern
    pub host: String,
}

impl Account {
    /// `'user'@'host'` rendering.
    pub fn to_account_string(&self) -> String {
        format!("'{}'@'{}'", self.user, self.host)
    }
}

/// One column of a table.
#[derive(Debug, Clone)]
pub struct ColumnCache {
    /// Column name
    pub name: String,
    /// Classified type
    pub column_type: ColumnType,
    /// Whether the column is nullable
    pub nullable: bool,
}

impl ColumnCache {
    /// True when values need a HEX/BASE64 conversion for text output.
    pub fn encoding_unsafe(&self) -> bool {
        self.column_type.is_encoding_unsafe()
    }
}

/// The index chosen for chunking a table.
#[derive(Debug, Clone)]
pub struct IndexCache {
    /// Index name
    pub name: String,
    /// Whether this is the primary key
    pub primary: bool,
    /// Ordered column list
    pub columns: Vec<String>,
}

impl IndexCache {
    /// First (chunking) column.
    pub fn first_column(&self) -> &str {
        &self.columns[0]
    }

    /// `ORDER BY` rendering of the full column list.
    pub fn order_by(&self) -> String {
        self.columns
            .iter()
            .map(|c| trawl_sql::quote_ident(c))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A column histogram, surfaced through the table manifest.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Column the histogram covers
    pub column: String,
    /// Bucket count
    pub buckets: u64,
}

/// Cached metadata of one table.
#[derive(Debug, Clone, Default)]
pub struct TableCache {
    /// Table name
    pub name: String,
    /// Ordered columns
    pub columns: Vec<ColumnCache>,
    /// Chosen chunking index, if any qualifies
    pub index: Option<IndexCache>,
    /// Estimated row count
    pub row_count: u64,
    /// Estimated average row length in bytes
    pub average_row_length: u64,
    /// Trigger names
    pub triggers: Vec<String>,
    /// Histograms
    pub histograms: Vec<Histogram>,
}

/// Cached metadata of one view.
#[derive(Debug, Clone)]
pub struct ViewCache {
    /// View name
    pub name: String,
    /// Column names, for placeholder DDL
    pub columns: Vec<String>,
}

/// Cached metadata of one schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    /// Schema name
    pub name: String,
    /// Tables, in discovery order
    pub tables: Vec<TableCache>,
    /// Views
    pub views: Vec<ViewCache>,
    /// Event names
    pub events: Vec<String>,
    /// Function names
    pub functions: Vec<String>,
    /// Procedure names
    pub procedures: Vec<String>,
}

/// Snapshot of instance metadata taken under lock.
#[derive(Debug, Clone, Default)]
pub struct InstanceCache {
    /// Account the dump runs as (`CURRENT_USER()`)
    pub user: String,
    /// Server host name
    pub hostname: String,
    /// Server identity (`version_comment`)
    pub server: String,
    /// Server version string
    pub server_version: String,
    /// Captured `gtid_executed`
    pub gtid_executed: String,
    /// In-scope schemas
    pub schemas: Vec<SchemaCache>,
    /// Accounts, when users are dumped
    pub users: Vec<Account>,
}

impl InstanceCache {
    /// Schema by id.
    pub fn schema(&self, id: SchemaId) -> &SchemaCache {
        &self.schemas[id.0]
    }

    /// Table by id.
    pub fn table(&self, id: TableId) -> (&SchemaCache, &TableCache) {
        let schema = &self.schemas[id.schema];
        (schema, &schema.tables[id.table])
    }

    /// View by id.
    pub fn view(&self, id: ViewId) -> (&SchemaCache, &ViewCache) {
        let schema = &self.schemas[id.schema];
        (schema, &schema.views[id.view])
    }

    /// Total number of tables.
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    /// Total number of views.
    pub fn view_count(&self) -> usize {
        self.schemas.iter().map(|s| s.views.len()).sum()
    }

    /// Sum of row count estimates.
    pub fn total_rows(&self) -> u64 {
        self.schemas
            .iter()
            .flat_map(|s| s.tables.iter())
            .map(|t| t.row_count)
            .sum()
    }
}

/// One index candidate read from `INFORMATION_SCHEMA.STATISTICS`.
#[derive(Debug, Clone)]
pub struct IndexCandidate {
    /// Index name
    pub name: String,
    /// Whether the index enforces uniqueness
    pub unique: bool,
    /// Whether any covered column is nullable
    pub has_nullable_column: bool,
    /// Ordered column list
    pub columns: Vec<String>,
}

/// Pick the chunking index for a table: primary key first, then a unique
/// non-nullable index, then any index. Ties prefer a numeric first column,
/// then fewer columns, then the lexicographically smaller column list.
pub fn select_index(
    candidates: &[IndexCandidate],
    columns: &[ColumnCache],
) -> Option<IndexCache> {
    let numeric_first = |candidate: &IndexCandidate| {
        columns
            .iter()
            .find(|c| c.name == candidate.columns[0])
            .map(|c| {
                matches!(
                    c.column_type,
                    ColumnType::Integer
                        | ColumnType::UInteger
                        | ColumnType::Decimal
                        | ColumnType::Float
                )
            })
            .unwrap_or(false)
    };

    candidates
        .iter()
        .filter(|c| !c.columns.is_empty())
        .min_by_key(|c| {
            let class = if c.name.eq_ignore_ascii_case("PRIMARY") {
                0
            } else if c.unique && !c.has_nullable_column {
                1
            } else {
                2
            };
            (
                class,
                !numeric_first(c),
                c.columns.len(),
                c.columns.clone(),
            )
        })
        .map(|c| IndexCache {
            name: c.name.clone(),
            primary: c.name.eq_ignore_ascii_case("PRIMARY"),
            columns: c.columns.clone(),
        })
}

/// Builds the instance cache from `INFORMATION_SCHEMA`.
pub struct InstanceCacheBuilder<'a> {
    session: &'a mut dyn Session,
    options: &'a DumpOptions,
}

impl<'a> InstanceCacheBuilder<'a> {
    /// Create a builder over the coordinator's session.
    pub fn new(session: &'a mut dyn Session, options: &'a DumpOptions) -> Self {
        Self { session, options }
    }

    /// Minimal build: schema and table names only, for lock statements.
    pub async fn build_minimal(mut self) -> Result<InstanceCache> {
        let mut cache = InstanceCache::default();
        self.load_objects(&mut cache, false).await?;
        Ok(cache)
    }

    /// Full build: everything the dump needs. An `existing` minimal cache
    /// provides the object list so it is not re-read under changed locks.
    pub async fn build(mut self, existing: Option<InstanceCache>) -> Result<InstanceCache> {
        let mut cache = match existing {
            Some(mut cache) if !cache.schemas.is_empty() => {
                // the minimal pass listed tables only
                for schema_idx in 0..cache.schemas.len() {
                    self.load_views(&mut cache.schemas[schema_idx]).await?;
                }
                cache
            }
            _ => {
                let mut cache = InstanceCache::default();
                self.load_objects(&mut cache, true).await?;
                cache
            }
        };

        self.load_server_identity(&mut cache).await?;

        for schema_idx in 0..cache.schemas.len() {
            self.load_columns(&mut cache.schemas[schema_idx]).await?;
            self.load_indexes(&mut cache.schemas[schema_idx]).await?;
            self.load_statistics(&mut cache.schemas[schema_idx]).await?;

            if self.options.dump_ddl {
                if self.options.dump_events {
                    self.load_events(&mut cache.schemas[schema_idx]).await?;
                }
                if self.options.dump_routines {
                    self.load_routines(&mut cache.schemas[schema_idx]).await?;
                }
                if self.options.dump_triggers {
                    self.load_triggers(&mut cache.schemas[schema_idx]).await?;
                }
            }

            self.load_histograms(&mut cache.schemas[schema_idx]).await?;
        }

        if self.options.dump_users {
            self.load_users(&mut cache).await?;
        }

        debug!(
            schemas = cache.schemas.len(),
            tables = cache.table_count(),
            views = cache.view_count(),
            "instance cache built"
        );

        Ok(cache)
    }

    async fn load_objects(&mut self, cache: &mut InstanceCache, with_views: bool) -> Result<()> {
        let result = self
            .session
            .query("SELECT SCHEMA_NAME FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME")
            .await?;

        let mut schemas: Vec<String> = Vec::new();
        for row in &result.rows {
            let name = row.as_text(0).unwrap_or_default();
            // built-in schemas are dumped only when named explicitly
            if BUILTIN_SCHEMAS.contains(&name.as_str())
                && !self.options.schema_filter.include.contains(&name)
            {
                continue;
            }
            if self.options.schema_filter.matches(&name) {
                schemas.push(name);
            }
        }

        for name in schemas {
            let mut schema = SchemaCache {
                name: name.clone(),
                ..Default::default()
            };

            let sql = format!(
                "SELECT TABLE_NAME, TABLE_TYPE, TABLE_ROWS, AVG_ROW_LENGTH \
                 FROM information_schema.TABLES WHERE TABLE_SCHEMA = {} \
                 ORDER BY TABLE_NAME",
                quote_sql_string(&name)
            );
            let tables = self.session.query(&sql).await?;

            for row in &tables.rows {
                let table_name = row.as_text(0).unwrap_or_default();
                let table_type = row.as_text(1).unwrap_or_default();
                let qualified = format!("{}.{}", name, table_name);

                if !self.options.table_filter.matches(&qualified) {
                    continue;
                }

                if table_type == "VIEW" {
                    if with_views {
                        schema.views.push(ViewCache {
                            name: table_name,
                            columns: Vec::new(),
                        });
                    }
                } else {
                    schema.tables.push(TableCache {
                        name: table_name,
                        row_count: row.as_u64(2).unwrap_or(0),
                        average_row_length: row.as_u64(3).unwrap_or(0),
                        ..Default::default()
                    });
                }
            }

            cache.schemas.push(schema);
        }

        Ok(())
    }

    async fn load_views(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = {} AND TABLE_TYPE = 'VIEW' ORDER BY TABLE_NAME",
            quote_sql_string(&schema.name)
        );
        for row in &self.session.query(&sql).await?.rows {
            let name = row.as_text(0).unwrap_or_default();
            let qualified = format!("{}.{}", schema.name, name);
            if self.options.table_filter.matches(&qualified) {
                schema.views.push(ViewCache {
                    name,
                    columns: Vec::new(),
                });
            }
        }
        Ok(())
    }

    async fn load_server_identity(&mut self, cache: &mut InstanceCache) -> Result<()> {
        let result = self
            .session
            .query("SELECT CURRENT_USER(), @@hostname, @@version_comment, @@version")
            .await?;
        if let Some(row) = result.first() {
            cache.user = row.as_text(0).unwrap_or_default();
            cache.hostname = row.as_text(1).unwrap_or_default();
            cache.server = row.as_text(2).unwrap_or_default();
            cache.server_version = row.as_text(3).unwrap_or_default();
        }

        match self.session.query("SELECT @@GLOBAL.gtid_executed").await {
            Ok(result) => {
                cache.gtid_executed = result
                    .first()
                    .and_then(|r| r.as_text(0))
                    .unwrap_or_default();
            }
            Err(e) => {
                warn!("could not read gtid_executed: {}", e);
            }
        }

        Ok(())
    }

    async fn load_columns(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE \
             FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = {} \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            quote_sql_string(&schema.name)
        );
        let result = self.session.query(&sql).await?;

        let mut by_table: HashMap<String, Vec<ColumnCache>> = HashMap::new();
        let mut view_columns: HashMap<String, Vec<String>> = HashMap::new();

        for row in &result.rows {
            let table = row.as_text(0).unwrap_or_default();
            let name = row.as_text(1).unwrap_or_default();
            let data_type = row.as_text(2).unwrap_or_default();
            let column_type = row.as_text(3).unwrap_or_default();
            let nullable = row.as_text(4).as_deref() == Some("YES");

            view_columns.entry(table.clone()).or_default().push(name.clone());
            by_table.entry(table).or_default().push(ColumnCache {
                name,
                column_type: ColumnType::from_metadata(&data_type, &column_type),
                nullable,
            });
        }

        for table in &mut schema.tables {
            if let Some(columns) = by_table.remove(&table.name) {
                table.columns = columns;
            }
        }
        for view in &mut schema.views {
            if let Some(columns) = view_columns.remove(&view.name) {
                view.columns = columns;
            }
        }

        Ok(())
    }

    async fn load_indexes(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME, NULLABLE \
             FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = {} \
             ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
            quote_sql_string(&schema.name)
        );
        let result = self.session.query(&sql).await?;

        let mut by_table: HashMap<String, Vec<IndexCandidate>> = HashMap::new();

        for row in &result.rows {
            let table = row.as_text(0).unwrap_or_default();
            let index = row.as_text(1).unwrap_or_default();
            let non_unique = row.as_u64(2).unwrap_or(1) != 0;
            let column = row.as_text(3).unwrap_or_default();
            let nullable = row.as_text(4).as_deref() == Some("YES");

            let candidates = by_table.entry(table).or_default();
            match candidates.iter_mut().find(|c| c.name == index) {
                Some(candidate) => {
                    candidate.columns.push(column);
                    candidate.has_nullable_column |= nullable;
                }
                None => candidates.push(IndexCandidate {
                    name: index,
                    unique: !non_unique,
                    has_nullable_column: nullable,
                    columns: vec![column],
                }),
            }
        }

        for table in &mut schema.tables {
            if let Some(candidates) = by_table.remove(&table.name) {
                table.index = select_index(&candidates, &table.columns);
            }
        }

        Ok(())
    }

    async fn load_statistics(&mut self, schema: &mut SchemaCache) -> Result<()> {
        // row counts and average row lengths were loaded with the object
        // list; tables discovered by the minimal pass may still miss them
        for table in &mut schema.tables {
            if table.row_count == 0 && table.average_row_length == 0 {
                let sql = format!(
                    "SELECT TABLE_ROWS, AVG_ROW_LENGTH FROM information_schema.TABLES \
                     WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
                    quote_sql_string(&schema.name),
                    quote_sql_string(&table.name)
                );
                if let Some(row) = self.session.query(&sql).await?.first() {
                    table.row_count = row.as_u64(0).unwrap_or(0);
                    table.average_row_length = row.as_u64(1).unwrap_or(0);
                }
            }
        }
        Ok(())
    }

    async fn load_events(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT EVENT_NAME FROM information_schema.EVENTS \
             WHERE EVENT_SCHEMA = {} ORDER BY EVENT_NAME",
            quote_sql_string(&schema.name)
        );
        schema.events = self
            .session
            .query(&sql)
            .await?
            .rows
            .iter()
            .filter_map(|r| r.as_text(0))
            .collect();
        Ok(())
    }

    async fn load_routines(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT ROUTINE_NAME, ROUTINE_TYPE FROM information_schema.ROUTINES \
             WHERE ROUTINE_SCHEMA = {} ORDER BY ROUTINE_NAME",
            quote_sql_string(&schema.name)
        );
        for row in &self.session.query(&sql).await?.rows {
            let name = row.as_text(0).unwrap_or_default();
            match row.as_text(1).as_deref() {
                Some("FUNCTION") => schema.functions.push(name),
                _ => schema.procedures.push(name),
            }
        }
        Ok(())
    }

    async fn load_triggers(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT EVENT_OBJECT_TABLE, TRIGGER_NAME FROM information_schema.TRIGGERS \
             WHERE TRIGGER_SCHEMA = {} ORDER BY EVENT_OBJECT_TABLE, TRIGGER_NAME",
            quote_sql_string(&schema.name)
        );
        let result = self.session.query(&sql).await?;

        let mut by_table: HashMap<String, Vec<String>> = HashMap::new();
        for row in &result.rows {
            let table = row.as_text(0).unwrap_or_default();
            let trigger = row.as_text(1).unwrap_or_default();
            by_table.entry(table).or_default().push(trigger);
        }

        for table in &mut schema.tables {
            if let Some(triggers) = by_table.remove(&table.name) {
                table.triggers = triggers;
            }
        }
        Ok(())
    }

    async fn load_histograms(&mut self, schema: &mut SchemaCache) -> Result<()> {
        let sql = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, \
             JSON_EXTRACT(HISTOGRAM, '$.\"number-of-buckets-specified\"') \
             FROM information_schema.COLUMN_STATISTICS WHERE SCHEMA_NAME = {} \
             ORDER BY TABLE_NAME, COLUMN_NAME",
            quote_sql_string(&schema.name)
        );

        // COLUMN_STATISTICS only exists on 8.0+ servers
        let result = match self.session.query(&sql).await {
            Ok(result) => result,
            Err(e) => {
                debug!("histograms unavailable: {}", e);
                return Ok(());
            }
        };

        let mut by_table: HashMap<String, Vec<Histogram>> = HashMap::new();
        for row in &result.rows {
            let table = row.as_text(0).unwrap_or_default();
            by_table.entry(table).or_default().push(Histogram {
                column: row.as_text(1).unwrap_or_default(),
                buckets: row.as_u64(2).unwrap_or(0),
            });
        }

        for table in &mut schema.tables {
            if let Some(histograms) = by_table.remove(&table.name) {
                table.histograms = histograms;
            }
        }
        Ok(())
    }

    async fn load_users(&mut self, cache: &mut InstanceCache) -> Result<()> {
        let result = self
            .session
            .query("SELECT user, host FROM mysql.user ORDER BY user, host")
            .await?;

        for row in &result.rows {
            let account = Account {
                user: row.as_text(0).unwrap_or_default(),
                host: row.as_text(1).unwrap_or_default(),
            };
            if account.user.starts_with("mysql.") {
                continue;
            }
            if self.options.user_filter.matches(&account.to_account_string()) {
                cache.users.push(account);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_sql::testing::ScriptedSession;
    use trawl_sql::{Resultset, SqlRow, SqlValue};

    fn text(s: &str) -> SqlValue {
        SqlValue::Bytes(s.as_bytes().to_vec())
    }

    fn rows(values: Vec<Vec<SqlValue>>) -> Resultset {
        Resultset::new(vec![], values.into_iter().map(SqlRow::new).collect())
    }

    fn column(name: &str, column_type: ColumnType) -> ColumnCache {
        ColumnCache {
            name: name.to_string(),
            column_type,
            nullable: false,
        }
    }

    fn candidate(name: &str, unique: bool, nullable: bool, columns: &[&str]) -> IndexCandidate {
        IndexCandidate {
            name: name.to_string(),
            unique,
            has_nullable_column: nullable,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_select_index_prefers_primary() {
        let columns = vec![
            column("id", ColumnType::Integer),
            column("code", ColumnType::String),
        ];
        let candidates = vec![
            candidate("uniq_code", true, false, &["code"]),
            candidate("PRIMARY", true, false, &["id"]),
        ];

        let chosen = select_index(&candidates, &columns).unwrap();
        assert_eq!(chosen.name, "PRIMARY");
        assert!(chosen.primary);
        assert_eq!(chosen.first_column(), "id");
    }

    #[test]
    fn test_select_index_unique_non_nullable_beats_plain() {
        let columns = vec![
            column("a", ColumnType::Integer),
            column("b", ColumnType::Integer),
        ];
        let candidates = vec![
            candidate("plain_a", false, false, &["a"]),
            candidate("uniq_b", true, false, &["b"]),
        ];

        let chosen = select_index(&candidates, &columns).unwrap();
        assert_eq!(chosen.name, "uniq_b");
        assert!(!chosen.primary);
    }

    #[test]
    fn test_select_index_nullable_unique_demoted() {
        let columns = vec![
            column("a", ColumnType::Integer),
            column("b", ColumnType::Integer),
        ];
        let candidates = vec![
            candidate("uniq_nullable", true, true, &["b"]),
            candidate("uniq_solid", true, false, &["a"]),
        ];

        assert_eq!(
            select_index(&candidates, &columns).unwrap().name,
            "uniq_solid"
        );
    }

    #[test]
    fn test_select_index_tie_breaks() {
        let columns = vec![
            column("num", ColumnType::Integer),
            column("txt", ColumnType::String),
        ];

        // numeric first column wins
        let candidates = vec![
            candidate("by_txt", false, false, &["txt"]),
            candidate("by_num", false, false, &["num"]),
        ];
        assert_eq!(select_index(&candidates, &columns).unwrap().name, "by_num");

        // fewer columns wins
        let candidates = vec![
            candidate("wide", false, false, &["num", "txt"]),
            candidate("narrow", false, false, &["num"]),
        ];
        assert_eq!(select_index(&candidates, &columns).unwrap().name, "narrow");

        // lexicographic column list decides last
        let candidates = vec![
            candidate("ix_b", false, false, &["txt"]),
            candidate("ix_a", false, false, &["num"]),
        ];
        assert_eq!(select_index(&candidates, &columns).unwrap().name, "ix_a");
    }

    #[test]
    fn test_select_index_empty() {
        assert!(select_index(&[], &[]).is_none());
    }

    #[test]
    fn test_index_order_by() {
        let index = IndexCache {
            name: "PRIMARY".to_string(),
            primary: true,
            columns: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(index.order_by(), "`a`,`b`");
    }

    fn scripted_instance() -> ScriptedSession {
        ScriptedSession::new(|sql| {
            Ok(if sql.contains("SCHEMATA") {
                rows(vec![
                    vec![text("performance_schema")],
                    vec![text("shop")],
                    vec![text("skipme")],
                ])
            } else if sql.contains("information_schema.TABLES") && sql.contains("TABLE_TYPE") {
                rows(vec![
                    vec![text("items"), text("BASE TABLE"), SqlValue::UInt(100), SqlValue::UInt(64)],
                    vec![text("v_items"), text("VIEW"), SqlValue::Null, SqlValue::Null],
                ])
            } else if sql.contains("information_schema.COLUMNS") {
                rows(vec![
                    vec![text("items"), text("id"), text("int"), text("int"), text("NO")],
                    vec![text("items"), text("img"), text("blob"), text("blob"), text("YES")],
                    vec![text("v_items"), text("id"), text("int"), text("int"), text("NO")],
                ])
            } else if sql.contains("STATISTICS") {
                rows(vec![vec![
                    text("items"),
                    text("PRIMARY"),
                    SqlValue::UInt(0),
                    text("id"),
                    text(""),
                ]])
            } else if sql.contains("CURRENT_USER") {
                rows(vec![vec![
                    text("root@%"),
                    text("dbhost"),
                    text("MySQL Community Server"),
                    text("8.0.36"),
                ]])
            } else if sql.contains("gtid_executed") {
                rows(vec![vec![text("uuid:1-100")]])
            } else {
                Resultset::empty()
            })
        })
    }

    fn options() -> DumpOptions {
        crate::config::DumpOptions::builder("mysql://localhost", "/tmp/out")
            .exclude_schemas(["skipme"])
            .dump_events(false)
            .dump_routines(false)
            .dump_triggers(false)
            .build()
    }

    #[tokio::test]
    async fn test_full_build() {
        let mut session = scripted_instance();
        let options = options();

        let cache = InstanceCacheBuilder::new(&mut session, &options)
            .build(None)
            .await
            .unwrap();

        assert_eq!(cache.schemas.len(), 1);
        let schema = &cache.schemas[0];
        assert_eq!(schema.name, "shop");
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(schema.views.len(), 1);

        let table = &schema.tables[0];
        assert_eq!(table.name, "items");
        assert_eq!(table.row_count, 100);
        assert_eq!(table.average_row_length, 64);
        assert_eq!(table.columns.len(), 2);
        assert!(table.columns[1].encoding_unsafe());
        assert_eq!(table.index.as_ref().unwrap().first_column(), "id");

        assert_eq!(cache.user, "root@%");
        assert_eq!(cache.server_version, "8.0.36");
        assert_eq!(cache.gtid_executed, "uuid:1-100");
        assert_eq!(cache.total_rows(), 100);
    }

    #[tokio::test]
    async fn test_minimal_build_lists_objects_only() {
        let mut session = scripted_instance();
        let options = options();

        let cache = InstanceCacheBuilder::new(&mut session, &options)
            .build_minimal()
            .await
            .unwrap();

        assert_eq!(cache.schemas.len(), 1);
        assert_eq!(cache.schemas[0].tables.len(), 1);
        assert!(cache.schemas[0].tables[0].columns.is_empty());
        assert!(cache.user.is_empty());
    }

    #[tokio::test]
    async fn test_table_filter_applies() {
        let mut session = scripted_instance();
        let mut options = options();
        options.table_filter.exclude.insert("shop.items".to_string());

        let cache = InstanceCacheBuilder::new(&mut session, &options)
            .build(None)
            .await
            .unwrap();

        assert_eq!(cache.schemas[0].tables.len(), 0);
        assert_eq!(cache.schemas[0].views.len(), 1);
    }
}
