//! Privilege validation
//!
//! Optional features need privileges the dumping account may lack: `EVENT`
//! to read event definitions, `TRIGGER` to read trigger bodies. The check
//! runs before any data is dumped so the operator gets one actionable error
//! instead of a mid-dump failure.
//!
//! Grants are parsed from `SHOW GRANTS` output at global, schema and table
//! scope; `ALL PRIVILEGES` at any scope covers everything beneath it.

use std::collections::{HashMap, HashSet};

use crate::cache::InstanceCache;
use crate::config::DumpOptions;
use crate::error::{DumpError, Result};

#[derive(Debug, Default)]
struct GrantSet {
    global: HashSet<String>,
    by_schema: HashMap<String, HashSet<String>>,
    by_table: HashMap<(String, String), HashSet<String>>,
}

fn unquote(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
        trimmed[1..trimmed.len() - 1].replace("``", "`")
    } else {
        trimmed.to_string()
    }
}

/// Split a grant target (`*.*`, `` `db`.* ``, `` `db`.`tbl` ``) into schema
/// and table parts; `None` is a wildcard.
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    let target = target.trim();

    // find the dot separating the two parts, skipping dots inside backticks
    let mut in_quotes = false;
    let mut split_at = None;
    for (idx, c) in target.char_indices() {
        match c {
            '`' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                split_at = Some(idx);
                break;
            }
            _ => {}
        }
    }

    let (schema_part, table_part) = match split_at {
        Some(idx) => (&target[..idx], &target[idx + 1..]),
        None => (target, "*"),
    };

    let schema = match schema_part {
        "*" => None,
        part => Some(unquote(part)),
    };
    let table = match table_part {
        "*" => None,
        part => Some(unquote(part)),
    };

    (schema, table)
}

/// Parsed privileges of one account.
#[derive(Debug)]
pub struct UserPrivileges {
    grants: GrantSet,
    user: String,
    account: String,
}

impl UserPrivileges {
    /// Parse `SHOW GRANTS` output. `user` is the `CURRENT_USER()` value,
    /// `account` the `'user'@'host'` form used in error messages.
    pub fn from_show_grants(
        user: impl Into<String>,
        account: impl Into<String>,
        grant_rows: &[String],
    ) -> Self {
        let mut grants = GrantSet::default();

        for row in grant_rows {
            let Some(rest) = row.strip_prefix("GRANT ") else {
                continue;
            };
            // role grants have no ON clause
            let Some(on_pos) = rest.find(" ON ") else {
                continue;
            };
            let privilege_list = &rest[..on_pos];
            let after_on = &rest[on_pos + 4..];
            let target = after_on.split(" TO ").next().unwrap_or(after_on);

            let privileges: HashSet<String> = privilege_list
                .split(',')
                .map(|p| p.trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect();

            let (schema, table) = parse_target(target);
            let bucket = match (schema, table) {
                (None, _) => &mut grants.global,
                (Some(schema), None) => grants.by_schema.entry(schema).or_default(),
                (Some(schema), Some(table)) => {
                    grants.by_table.entry((schema, table)).or_default()
                }
            };
            bucket.extend(privileges);
        }

        Self {
            grants,
            user: user.into(),
            account: account.into(),
        }
    }

    fn set_has(set: Option<&HashSet<String>>, privilege: &str) -> bool {
        set.map(|s| s.contains(privilege) || s.contains("ALL PRIVILEGES") || s.contains("ALL"))
            .unwrap_or(false)
    }

    /// True when `privilege` is held for the given scope, at that scope or
    /// any wider one.
    pub fn has(&self, privilege: &str, schema: Option<&str>, table: Option<&str>) -> bool {
        let privilege = privilege.to_ascii_uppercase();

        if Self::set_has(Some(&self.grants.global), &privilege) {
            return true;
        }
        if let Some(schema) = schema {
            if Self::set_has(self.grants.by_schema.get(schema), &privilege) {
                return true;
            }
            if let Some(table) = table {
                let key = (schema.to_string(), table.to_string());
                if Self::set_has(self.grants.by_table.get(&key), &privilege) {
                    return true;
                }
            }
        }
        false
    }

    fn missing_error(&self, privilege: &str, scope: &str) -> DumpError {
        DumpError::precondition(format!(
            "User {} (account {}) is missing the following privilege(s) for {}: {}.",
            self.user, self.account, scope, privilege
        ))
    }
}

/// Check that the account holds every privilege the enabled features need.
pub fn validate_required(
    privileges: &UserPrivileges,
    cache: &InstanceCache,
    options: &DumpOptions,
) -> Result<()> {
    if !options.dump_ddl {
        return Ok(());
    }

    for schema in &cache.schemas {
        if options.dump_events && !privileges.has("EVENT", Some(&schema.name), None) {
            return Err(privileges.missing_error("EVENT", &format!("schema `{}`", schema.name)));
        }

        if options.dump_triggers {
            for table in &schema.tables {
                if !privileges.has("TRIGGER", Some(&schema.name), Some(&table.name)) {
                    return Err(privileges.missing_error(
                        "TRIGGER",
                        &format!("table `{}`.`{}`", schema.name, table.name),
                    ));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SchemaCache, TableCache};

    fn privileges(rows: &[&str]) -> UserPrivileges {
        let rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        UserPrivileges::from_show_grants("app@%", "'app'@'%'", &rows)
    }

    #[test]
    fn test_global_grant() {
        let p = privileges(&["GRANT SELECT, EVENT, TRIGGER ON *.* TO `app`@`%`"]);
        assert!(p.has("EVENT", Some("shop"), None));
        assert!(p.has("TRIGGER", Some("shop"), Some("items")));
        assert!(!p.has("SUPER", None, None));
    }

    #[test]
    fn test_all_privileges_covers_everything() {
        let p = privileges(&["GRANT ALL PRIVILEGES ON *.* TO `app`@`%` WITH GRANT OPTION"]);
        assert!(p.has("EVENT", Some("shop"), None));
        assert!(p.has("TRIGGER", Some("shop"), Some("items")));
    }

    #[test]
    fn test_schema_scoped_grant() {
        let p = privileges(&["GRANT EVENT ON `shop`.* TO `app`@`%`"]);
        assert!(p.has("EVENT", Some("shop"), None));
        assert!(!p.has("EVENT", Some("other"), None));
        assert!(!p.has("EVENT", None, None));
    }

    #[test]
    fn test_table_scoped_grant() {
        let p = privileges(&["GRANT TRIGGER ON `shop`.`items` TO `app`@`%`"]);
        assert!(p.has("TRIGGER", Some("shop"), Some("items")));
        assert!(!p.has("TRIGGER", Some("shop"), Some("orders")));
    }

    #[test]
    fn test_role_grants_are_ignored() {
        let p = privileges(&["GRANT `admin_role`@`%` TO `app`@`%`"]);
        assert!(!p.has("EVENT", Some("shop"), None));
    }

    #[test]
    fn test_quoted_dot_in_schema_name() {
        let p = privileges(&["GRANT EVENT ON `dotted.name`.* TO `app`@`%`"]);
        assert!(p.has("EVENT", Some("dotted.name"), None));
    }

    fn cache_with_table() -> InstanceCache {
        InstanceCache {
            schemas: vec![SchemaCache {
                name: "shop".to_string(),
                tables: vec![TableCache {
                    name: "items".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_missing_event_names_account() {
        let p = privileges(&["GRANT SELECT ON *.* TO `app`@`%`"]);
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();

        let err = validate_required(&p, &cache_with_table(), &options).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("app@%"));
        assert!(message.contains("'app'@'%'"));
        assert!(message.contains("EVENT"));
        assert!(message.contains("schema `shop`"));
    }

    #[test]
    fn test_validate_passes_with_privileges() {
        let p = privileges(&["GRANT SELECT, EVENT, TRIGGER ON *.* TO `app`@`%`"]);
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out").build();
        validate_required(&p, &cache_with_table(), &options).unwrap();
    }

    #[test]
    fn test_validate_skipped_when_features_off() {
        let p = privileges(&["GRANT SELECT ON *.* TO `app`@`%`"]);
        let options = DumpOptions::builder("mysql://localhost", "/tmp/out")
            .dump_events(false)
            .dump_triggers(false)
            .build();
        validate_required(&p, &cache_with_table(), &options).unwrap();
    }
}
