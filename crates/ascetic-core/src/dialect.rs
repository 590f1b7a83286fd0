//! Backend profiles.
//!
//! A [`Dialect`] captures everything that differs between the supported
//! storage engines at the level the mapper cares about: placeholder syntax,
//! identifier quoting, savepoint statements, and the SQL used to introspect
//! table columns and primary keys.

use serde::{Deserialize, Serialize};

/// SQL dialect of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite: `?` placeholders, double-quoted identifiers.
    #[default]
    Sqlite,
    /// PostgreSQL: `%s` placeholders, double-quoted identifiers.
    Postgres,
    /// MySQL: `%s` placeholders, backtick-quoted identifiers.
    #[serde(rename = "mysql")]
    MySql,
}

impl Dialect {
    /// Placeholder for the `index`-th (1-based) bound parameter.
    ///
    /// Both supported placeholder styles are positional without a number,
    /// so `index` only matters for callers that want to assert ordering.
    pub const fn placeholder(self, _index: usize) -> &'static str {
        match self {
            Dialect::Sqlite => "?",
            Dialect::Postgres | Dialect::MySql => "%s",
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote(self, name: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Quote a possibly table-qualified name (`table.column`).
    pub fn quote_qualified(self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(column))
    }

    /// Expression concatenating two string expressions.
    pub fn concat(self, left: &str, right: &str) -> String {
        match self {
            Dialect::MySql => format!("CONCAT({left}, {right})"),
            Dialect::Sqlite | Dialect::Postgres => format!("{left} || {right}"),
        }
    }

    pub fn begin_sql(self) -> &'static str {
        match self {
            Dialect::MySql => "START TRANSACTION",
            Dialect::Sqlite | Dialect::Postgres => "BEGIN",
        }
    }

    pub fn savepoint_sql(self, name: &str) -> String {
        format!("SAVEPOINT {}", self.quote(name))
    }

    pub fn release_savepoint_sql(self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", self.quote(name))
    }

    pub fn rollback_savepoint_sql(self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.quote(name))
    }

    /// Query returning `(name, declared_type, nullable, max_length, has_default)`
    /// for every column of the table bound to the single parameter, in
    /// ordinal order.
    ///
    /// SQLite has no information schema; its connections override
    /// introspection with `PRAGMA table_info` instead.
    pub fn describe_table_sql(self) -> Option<String> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some(
                "SELECT column_name, data_type, is_nullable = 'YES', \
                 character_maximum_length, column_default IS NOT NULL \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = %s \
                 ORDER BY ordinal_position"
                    .to_string(),
            ),
            Dialect::MySql => Some(
                "SELECT column_name, data_type, is_nullable = 'YES', \
                 character_maximum_length, column_default IS NOT NULL \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = %s \
                 ORDER BY ordinal_position"
                    .to_string(),
            ),
        }
    }

    /// Query returning the primary-key column names of the table bound to
    /// the single parameter, in key order.
    pub fn read_pk_sql(self) -> Option<String> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = current_schema() AND tc.table_name = %s \
                 ORDER BY kcu.ordinal_position"
                    .to_string(),
            ),
            Dialect::MySql => Some(
                "SELECT column_name FROM information_schema.key_column_usage \
                 WHERE constraint_name = 'PRIMARY' \
                   AND table_schema = DATABASE() AND table_name = %s \
                 ORDER BY ordinal_position"
                    .to_string(),
            ),
        }
    }
}
