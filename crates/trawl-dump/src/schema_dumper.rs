//! DDL text generation
//!
//! Reproduces object definitions the way the server reports them
//! (`SHOW CREATE ...`), framed with drop-if-exists guards so the output is
//! re-executable. When a compatibility target is configured, the optional
//! rewrite pass adapts definitions to the restricted environment and records
//! every transformation as an [`Issue`]; DDL is never silently altered
//! without the matching option.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use trawl_sql::{quote_ident, Session};

use crate::cache::{Account, SchemaCache, TableCache, ViewCache};
use crate::config::{CompatibilityOption, DumpOptions};
use crate::error::{DumpError, Result};

/// Outcome of one compatibility finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueStatus {
    /// The configured option rewrote the DDL
    Fixed,
    /// No automatic fix exists
    FixManually,
    /// The named option would fix it, but is not enabled
    NeedsOption(CompatibilityOption),
}

/// One compatibility finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Human-readable description
    pub description: String,
    /// Whether and how it was resolved
    pub status: IssueStatus,
}

impl Issue {
    /// True when the issue did not get fixed automatically.
    pub fn is_error(&self) -> bool {
        !matches!(self.status, IssueStatus::Fixed)
    }

    /// Operator-facing hint for an unfixed issue.
    pub fn hint(&self) -> String {
        match &self.status {
            IssueStatus::Fixed => String::new(),
            IssueStatus::FixManually => "this issue needs to be fixed manually".to_string(),
            IssueStatus::NeedsOption(option) => {
                format!("fix this with '{}' compatibility option", option)
            }
        }
    }
}

/// Generated DDL together with the issues found while generating it.
#[derive(Debug, Clone, Default)]
pub struct DdlOutput {
    /// SQL text
    pub content: String,
    /// Compatibility findings
    pub issues: Vec<Issue>,
}

static DEFINER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"DEFINER\s*=\s*(`[^`]+`|'[^']+'|[0-9A-Za-z$_]+)@(`[^`]+`|'[^']+'|[0-9A-Za-z$_%.]+)\s*")
        .expect("definer pattern")
});
static SQL_SECURITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SQL SECURITY DEFINER").expect("sql security pattern"));
static TABLESPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(/\*!50100\s+)?TABLESPACE\s+`?[0-9A-Za-z$_]+`?(\s+STORAGE\s+(DISK|MEMORY))?(\s*\*/)?")
        .expect("tablespace pattern")
});
static DIRECTORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(DATA|INDEX)\s+DIRECTORY\s*=\s*'[^']*'").expect("directory pattern")
});
static ENGINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ENGINE\s*=\s*([0-9A-Za-z_]+)").expect("engine pattern"));
static ENCRYPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(/\*!80016\s+)?ENCRYPTION\s*=\s*'[YN]'(\s*\*/)?").expect("encryption pattern")
});

/// Apply the compatibility pass to one object's DDL.
///
/// Returns the (possibly rewritten) text and the issues found. No-ops when
/// no compatibility target is configured.
pub fn compatibility_rewrite(
    ddl: &str,
    object: &str,
    options: &DumpOptions,
) -> (String, Vec<Issue>) {
    if options.compatibility_target.is_none() {
        return (ddl.to_string(), Vec::new());
    }

    let mut text = ddl.to_string();
    let mut issues = Vec::new();
    let enabled = |option: CompatibilityOption| options.compatibility_options.contains(&option);
    let status = |option: CompatibilityOption| {
        if enabled(option) {
            IssueStatus::Fixed
        } else {
            IssueStatus::NeedsOption(option)
        }
    };

    if DEFINER_RE.is_match(&text) {
        let option = CompatibilityOption::StripDefiners;
        if enabled(option) {
            text = DEFINER_RE.replace_all(&text, "").into_owned();
            text = SQL_SECURITY_RE
                .replace_all(&text, "SQL SECURITY INVOKER")
                .into_owned();
        }
        issues.push(Issue {
            description: format!("{} had a DEFINER clause removed", object),
            status: status(option),
        });
    }

    if TABLESPACE_RE.is_match(&text) || DIRECTORY_RE.is_match(&text) {
        let option = CompatibilityOption::StripTablespaces;
        if enabled(option) {
            text = TABLESPACE_RE.replace_all(&text, "").into_owned();
            text = DIRECTORY_RE.replace_all(&text, "").into_owned();
        }
        issues.push(Issue {
            description: format!("{} had unsupported storage options removed", object),
            status: status(option),
        });
    }

    if let Some(captures) = ENGINE_RE.captures(&text) {
        let engine = captures[1].to_string();
        if !engine.eq_ignore_ascii_case("InnoDB") {
            let option = CompatibilityOption::ForceInnodb;
            if enabled(option) {
                text = ENGINE_RE.replace_all(&text, "ENGINE=InnoDB").into_owned();
            }
            issues.push(Issue {
                description: format!("{} had its engine changed from {} to InnoDB", object, engine),
                status: status(option),
            });
        }
    }

    if ENCRYPTION_RE.is_match(&text) {
        let option = CompatibilityOption::StripEncryption;
        if enabled(option) {
            text = ENCRYPTION_RE.replace_all(&text, "").into_owned();
        }
        issues.push(Issue {
            description: format!("{} had an ENCRYPTION option removed", object),
            status: status(option),
        });
    }

    (text, issues)
}

/// Generates DDL text over a worker's session.
pub struct SchemaDumper<'a> {
    session: &'a mut dyn Session,
    options: &'a DumpOptions,
}

impl<'a> SchemaDumper<'a> {
    /// Create a dumper over `session`.
    pub fn new(session: &'a mut dyn Session, options: &'a DumpOptions) -> Self {
        Self { session, options }
    }

    fn header(&self, label: &str) -> String {
        format!(
            "-- trawl dump {}\n-- {}\n\n",
            env!("CARGO_PKG_VERSION"),
            label
        )
    }

    async fn show_create(&mut self, sql: &str, column: usize, what: &str) -> Result<String> {
        let result = self.session.query(sql).await?;
        result
            .first_or_err(what)?
            .as_text(column)
            .ok_or_else(|| DumpError::invalid_state(format!("{} returned no definition", what)))
            .map_err(Into::into)
    }

    /// Schema DDL, including events and routines when requested.
    pub async fn dump_schema(&mut self, schema: &SchemaCache) -> Result<DdlOutput> {
        let mut out = DdlOutput {
            content: self.header(&format!("DDL for schema {}", quote_ident(&schema.name))),
            ..Default::default()
        };

        let create = self
            .show_create(
                &format!("SHOW CREATE SCHEMA {}", quote_ident(&schema.name)),
                1,
                "SHOW CREATE SCHEMA",
            )
            .await?;
        // schema creation is guarded with IF NOT EXISTS instead of a drop
        let create = create.replacen("CREATE DATABASE", "CREATE DATABASE IF NOT EXISTS", 1);
        let (create, issues) = compatibility_rewrite(
            &create,
            &format!("Schema {}", quote_ident(&schema.name)),
            self.options,
        );
        out.issues.extend(issues);
        out.content.push_str(&create);
        out.content.push_str(";\n");
        out.content
            .push_str(&format!("USE {};\n", quote_ident(&schema.name)));

        if self.options.dump_events {
            for event in &schema.events {
                self.dump_event(&mut out, &schema.name, event).await?;
            }
        }
        if self.options.dump_routines {
            for function in &schema.functions {
                self.dump_routine(&mut out, &schema.name, function, "FUNCTION")
                    .await?;
            }
            for procedure in &schema.procedures {
                self.dump_routine(&mut out, &schema.name, procedure, "PROCEDURE")
                    .await?;
            }
        }

        Ok(out)
    }

    async fn dump_event(&mut self, out: &mut DdlOutput, schema: &str, event: &str) -> Result<()> {
        let create = self
            .show_create(
                &format!(
                    "SHOW CREATE EVENT {}.{}",
                    quote_ident(schema),
                    quote_ident(event)
                ),
                3,
                "SHOW CREATE EVENT",
            )
            .await?;
        let object = format!("Event {}.{}", quote_ident(schema), quote_ident(event));
        let (create, issues) = compatibility_rewrite(&create, &object, self.options);
        out.issues.extend(issues);

        out.content.push_str(&format!(
            "DROP EVENT IF EXISTS {}.{};\nDELIMITER ;;\n{};;\nDELIMITER ;\n",
            quote_ident(schema),
            quote_ident(event),
            create
        ));
        Ok(())
    }

    async fn dump_routine(
        &mut self,
        out: &mut DdlOutput,
        schema: &str,
        routine: &str,
        kind: &str,
    ) -> Result<()> {
        let create = self
            .show_create(
                &format!(
                    "SHOW CREATE {} {}.{}",
                    kind,
                    quote_ident(schema),
                    quote_ident(routine)
                ),
                2,
                "SHOW CREATE ROUTINE",
            )
            .await?;
        let object = format!("{} {}.{}", kind, quote_ident(schema), quote_ident(routine));
        let (create, issues) = compatibility_rewrite(&create, &object, self.options);
        out.issues.extend(issues);

        out.content.push_str(&format!(
            "DROP {} IF EXISTS {}.{};\nDELIMITER ;;\n{};;\nDELIMITER ;\n",
            kind,
            quote_ident(schema),
            quote_ident(routine),
            create
        ));
        Ok(())
    }

    /// Table DDL.
    pub async fn dump_table(&mut self, schema: &str, table: &TableCache) -> Result<DdlOutput> {
        let quoted = format!("{}.{}", quote_ident(schema), quote_ident(&table.name));
        let mut out = DdlOutput {
            content: self.header(&format!("DDL for table {}", quoted)),
            ..Default::default()
        };

        let create = self
            .show_create(
                &format!("SHOW CREATE TABLE {}", quoted),
                1,
                "SHOW CREATE TABLE",
            )
            .await?;
        let (create, issues) =
            compatibility_rewrite(&create, &format!("Table {}", quoted), self.options);
        out.issues.extend(issues);

        out.content
            .push_str(&format!("DROP TABLE IF EXISTS {};\n{};\n", quoted, create));
        Ok(out)
    }

    /// Trigger DDL for one table.
    pub async fn dump_triggers(&mut self, schema: &str, table: &TableCache) -> Result<DdlOutput> {
        let mut out = DdlOutput {
            content: self.header(&format!(
                "Triggers for table {}.{}",
                quote_ident(schema),
                quote_ident(&table.name)
            )),
            ..Default::default()
        };

        for trigger in &table.triggers {
            let create = self
                .show_create(
                    &format!(
                        "SHOW CREATE TRIGGER {}.{}",
                        quote_ident(schema),
                        quote_ident(trigger)
                    ),
                    2,
                    "SHOW CREATE TRIGGER",
                )
                .await?;
            let object = format!("Trigger {}.{}", quote_ident(schema), quote_ident(trigger));
            let (create, issues) = compatibility_rewrite(&create, &object, self.options);
            out.issues.extend(issues);

            out.content.push_str(&format!(
                "DROP TRIGGER IF EXISTS {}.{};\nDELIMITER ;;\n{};;\nDELIMITER ;\n",
                quote_ident(schema),
                quote_ident(trigger),
                create
            ));
        }

        Ok(out)
    }

    /// Placeholder DDL allowing the loader to resolve view dependencies
    /// before the real view definitions are applied.
    pub async fn dump_temporary_view(
        &mut self,
        schema: &str,
        view: &ViewCache,
    ) -> Result<DdlOutput> {
        let quoted = format!("{}.{}", quote_ident(schema), quote_ident(&view.name));
        let mut out = DdlOutput {
            content: self.header(&format!("Placeholder for view {}", quoted)),
            ..Default::default()
        };

        let columns = if view.columns.is_empty() {
            "1 AS `placeholder`".to_string()
        } else {
            view.columns
                .iter()
                .map(|c| format!("1 AS {}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(",\n ")
        };

        out.content.push_str(&format!(
            "DROP VIEW IF EXISTS {};\nCREATE VIEW {} AS SELECT\n {};\n",
            quoted, quoted, columns
        ));
        Ok(out)
    }

    /// View DDL.
    pub async fn dump_view(&mut self, schema: &str, view: &ViewCache) -> Result<DdlOutput> {
        let quoted = format!("{}.{}", quote_ident(schema), quote_ident(&view.name));
        let mut out = DdlOutput {
            content: self.header(&format!("DDL for view {}", quoted)),
            ..Default::default()
        };

        let create = self
            .show_create(
                &format!("SHOW CREATE VIEW {}", quoted),
                1,
                "SHOW CREATE VIEW",
            )
            .await?;
        let (create, issues) =
            compatibility_rewrite(&create, &format!("View {}", quoted), self.options);
        out.issues.extend(issues);

        out.content
            .push_str(&format!("DROP VIEW IF EXISTS {};\n{};\n", quoted, create));
        Ok(out)
    }

    /// Users and their grants.
    pub async fn dump_users(&mut self, accounts: &[Account]) -> Result<DdlOutput> {
        let mut out = DdlOutput {
            content: self.header("Users and grants"),
            ..Default::default()
        };

        for account in accounts {
            let account_str = account.to_account_string();
            debug!(account = %account_str, "dumping grants");

            let create = self
                .show_create(
                    &format!("SHOW CREATE USER {}", account_str),
                    0,
                    "SHOW CREATE USER",
                )
                .await?;
            let create = create.replacen("CREATE USER", "CREATE USER IF NOT EXISTS", 1);
            let object = format!("User {}", account_str);
            let (create, issues) = compatibility_rewrite(&create, &object, self.options);
            out.issues.extend(issues);
            out.content.push_str(&format!("{};\n", create));

            let grants = self
                .session
                .query(&format!("SHOW GRANTS FOR {}", account_str))
                .await?;
            for row in &grants.rows {
                if let Some(grant) = row.as_text(0) {
                    out.content.push_str(&format!("{};\n", grant));
                }
            }
        }

        Ok(out)
    }

    /// Comment-only content of the global `@.sql` / `@.post.sql` files.
    pub fn global_ddl(&self, label: &str) -> String {
        self.header(label)
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

    fn options_with(option: Option<CompatibilityOption>) -> DumpOptions {
        let mut builder = DumpOptions::builder("mysql://localhost", "/tmp/out")
            .compatibility_target("8.0.0");
        if let Some(option) = option {
            builder = builder.compatibility_option(option);
        }
        builder.build()
    }

    #[test]
    fn test_no_target_no_rewrites() {
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();
        let ddl = "CREATE DEFINER=`root`@`localhost` VIEW v AS SELECT 1";
        let (text, issues) = compatibility_rewrite(ddl, "View v", &options);
        assert_eq!(text, ddl);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_definer_needs_option() {
        let options = options_with(None);
        let ddl = "CREATE DEFINER=`root`@`localhost` SQL SECURITY DEFINER VIEW v AS SELECT 1";
        let (text, issues) = compatibility_rewrite(ddl, "View v", &options);

        assert_eq!(text, ddl, "DDL must not be silently altered");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
        assert_eq!(
            issues[0].hint(),
            "fix this with 'strip_definers' compatibility option"
        );
    }

    #[test]
    fn test_definer_stripped_when_enabled() {
        let options = options_with(Some(CompatibilityOption::StripDefiners));
        let ddl = "CREATE DEFINER=`root`@`localhost` SQL SECURITY DEFINER VIEW v AS SELECT 1";
        let (text, issues) = compatibility_rewrite(ddl, "View v", &options);

        assert!(!text.contains("DEFINER="));
        assert!(text.contains("SQL SECURITY INVOKER"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].status, IssueStatus::Fixed);
    }

    #[test]
    fn test_engine_rewrite() {
        let ddl = "CREATE TABLE t (id INT) ENGINE=MyISAM DEFAULT CHARSET=utf8mb4";

        let options = options_with(None);
        let (text, issues) = compatibility_rewrite(ddl, "Table t", &options);
        assert!(text.contains("ENGINE=MyISAM"));
        assert!(issues[0].is_error());

        let options = options_with(Some(CompatibilityOption::ForceInnodb));
        let (text, issues) = compatibility_rewrite(ddl, "Table t", &options);
        assert!(text.contains("ENGINE=InnoDB"));
        assert_eq!(issues[0].status, IssueStatus::Fixed);
    }

    #[test]
    fn test_innodb_engine_is_not_an_issue() {
        let options = options_with(None);
        let ddl = "CREATE TABLE t (id INT) ENGINE=InnoDB";
        let (_, issues) = compatibility_rewrite(ddl, "Table t", &options);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_encryption_and_tablespace_strip() {
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out")
            .compatibility_target("8.0.0")
            .compatibility_option(CompatibilityOption::StripEncryption)
            .compatibility_option(CompatibilityOption::StripTablespaces)
            .build();
        let ddl =
            "CREATE TABLE t (id INT) TABLESPACE `ts1` STORAGE DISK ENGINE=InnoDB ENCRYPTION='N'";
        let (text, issues) = compatibility_rewrite(ddl, "Table t", &options);

        assert!(!text.to_uppercase().contains("TABLESPACE"));
        assert!(!text.to_uppercase().contains("ENCRYPTION"));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.status == IssueStatus::Fixed));
    }

    fn show_create_session() -> ScriptedSession {
        ScriptedSession::new(|sql| {
            Ok(if sql.starts_with("SHOW CREATE TABLE") {
                Resultset::new(
                    vec![],
                    vec![SqlRow::new(vec![
                        text("items"),
                        text("CREATE TABLE `items` (\n  `id` int NOT NULL\n) ENGINE=InnoDB"),
                    ])],
                )
            } else if sql.starts_with("SHOW CREATE SCHEMA") {
                Resultset::new(
                    vec![],
                    vec![SqlRow::new(vec![
                        text("shop"),
                        text("CREATE DATABASE `shop` /*!40100 DEFAULT CHARACTER SET utf8mb4 */"),
                    ])],
                )
            } else if sql.starts_with("SHOW CREATE VIEW") {
                Resultset::new(
                    vec![],
                    vec![SqlRow::new(vec![
                        text("v_items"),
                        text("CREATE VIEW `v_items` AS select `items`.`id` from `items`"),
                    ])],
                )
            } else if sql.starts_with("SHOW GRANTS") {
                Resultset::new(
                    vec![],
                    vec![
                        SqlRow::new(vec![text("GRANT USAGE ON *.* TO 'app'@'%'")]),
                        SqlRow::new(vec![text("GRANT SELECT ON `shop`.* TO 'app'@'%'")]),
                    ],
                )
            } else if sql.starts_with("SHOW CREATE USER") {
                Resultset::new(
                    vec![],
                    vec![SqlRow::new(vec![text(
                        "CREATE USER 'app'@'%' IDENTIFIED WITH 'caching_sha2_password'",
                    )])],
                )
            } else {
                Resultset::empty()
            })
        })
    }

    #[tokio::test]
    async fn test_dump_table_has_guard_and_create() {
        let mut session = show_create_session();
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();
        let table = TableCache {
            name: "items".to_string(),
            ..Default::default()
        };

        let out = SchemaDumper::new(&mut session, &options)
            .dump_table("shop", &table)
            .await
            .unwrap();

        assert!(out.content.contains("DROP TABLE IF EXISTS `shop`.`items`;"));
        assert!(out.content.contains("CREATE TABLE `items`"));
        assert!(out.issues.is_empty());
    }

    #[tokio::test]
    async fn test_dump_schema_uses_if_not_exists() {
        let mut session = show_create_session();
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out")
            .dump_events(false)
            .dump_routines(false)
            .build();
        let schema = SchemaCache {
            name: "shop".to_string(),
            ..Default::default()
        };

        let out = SchemaDumper::new(&mut session, &options)
            .dump_schema(&schema)
            .await
            .unwrap();

        assert!(out.content.contains("CREATE DATABASE IF NOT EXISTS `shop`"));
        assert!(out.content.contains("USE `shop`;"));
    }

    #[tokio::test]
    async fn test_dump_temporary_view_placeholder() {
        let mut session = show_create_session();
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();
        let view = ViewCache {
            name: "v_items".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
        };

        let out = SchemaDumper::new(&mut session, &options)
            .dump_temporary_view("shop", &view)
            .await
            .unwrap();

        assert!(out.content.contains("DROP VIEW IF EXISTS `shop`.`v_items`;"));
        assert!(out.content.contains("1 AS `id`"));
        assert!(out.content.contains("1 AS `name`"));
    }

    #[tokio::test]
    async fn test_dump_users_reexecutable() {
        let mut session = show_create_session();
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();
        let accounts = vec![Account {
            user: "app".to_string(),
            host: "%".to_string(),
        }];

        let out = SchemaDumper::new(&mut session, &options)
            .dump_users(&accounts)
            .await
            .unwrap();

        assert!(out.content.contains("CREATE USER IF NOT EXISTS 'app'@'%'"));
        assert!(out.content.contains("GRANT SELECT ON `shop`.* TO 'app'@'%';"));
    }
}
