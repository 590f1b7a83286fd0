//! Materialized-path trees.
//!
//! A tree model stores, next to its `parent_<pk>` fields, the full path of
//! keys from the root down to itself. Each node contributes one segment
//! terminated by `/`:
//!
//! - integers are zero-padded to ten digits so paths sort by key,
//! - text is escaped (`!` → `!!`, `/` → `!s`, `:` → `!k`),
//! - composite key parts are joined with `:`.
//!
//! Moving a node rewrites the path prefix of its whole subtree with one
//! UPDATE.

use ascetic_core::{Error, Key, Result, Value};
use ascetic_query::{Column, Condition, Update};

use crate::instance::Instance;
use crate::mapper::Mapper;
use crate::query::QuerySet;
use crate::session::Session;

pub const DEFAULT_PATH_FIELD: &str = "tree_path";
pub const PARENT_RELATION: &str = "parent";
pub const CHILDREN_RELATION: &str = "children";

const SEGMENT_END: char = '/';
const PART_SEPARATOR: char = ':';

/// Tree layout of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    pub parent_relation: String,
    pub parent_fields: Vec<String>,
    pub path_field: String,
}

impl TreeConfig {
    pub fn new(pk: &[String], path_field: &str) -> Self {
        Self {
            parent_relation: PARENT_RELATION.to_string(),
            parent_fields: pk.iter().map(|p| format!("parent_{p}")).collect(),
            path_field: path_field.to_string(),
        }
    }
}

/// Path segment text for one key part.
pub fn encode_segment(value: &Value) -> String {
    match value {
        Value::Int(i) => format!("{i:010}"),
        Value::Text(s) => escape(s),
        other => escape(&other.to_string()),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '!' => out.push_str("!!"),
            '/' => out.push_str("!s"),
            ':' => out.push_str("!k"),
            c => out.push(c),
        }
    }
    out
}

/// One node's full segment, terminator included.
pub fn encode_key(key: &Key) -> String {
    let mut out = key
        .values()
        .iter()
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join(&PART_SEPARATOR.to_string());
    out.push(SEGMENT_END);
    out
}

/// Paths of every proper ancestor, root first.
pub fn path_prefixes(path: &str) -> Vec<String> {
    path.char_indices()
        .filter(|&(i, c)| c == SEGMENT_END && i + 1 < path.len())
        .map(|(i, _)| path[..=i].to_string())
        .collect()
}

/// Path bookkeeping carried across one save.
#[derive(Debug)]
pub(crate) struct TreeSave {
    old_path: Option<String>,
    /// The key is assigned by storage; the path is written after insert.
    pending: bool,
}

fn path_of(instance: &Instance, field: &str) -> String {
    instance.get(field).as_str().unwrap_or_default().to_string()
}

impl Mapper {
    fn tree_config(&self) -> Result<&TreeConfig> {
        self.tree()
            .ok_or_else(|| Error::mapping(format!("{} is not a tree", self.name())))
    }

    fn compute_path(&self, session: &Session, instance: &Instance, key: &Key) -> Result<String> {
        let tree = self.tree_config()?;
        let parent = self
            .relation(&tree.parent_relation)?
            .get(session, instance)?
            .into_one()?;
        let mut path = parent.map_or_else(String::new, |p| path_of(&p, &tree.path_field));
        path.push_str(&encode_key(key));
        Ok(path)
    }

    pub(crate) fn tree_before_save(
        &self,
        session: &Session,
        instance: &Instance,
    ) -> Result<Option<TreeSave>> {
        let Some(tree) = self.tree() else {
            return Ok(None);
        };
        let old_path = if instance.is_new() {
            None
        } else {
            instance
                .original()
                .and_then(|o| o.value(&tree.path_field).as_str().map(str::to_string))
        };
        let key = instance.key_of(self.pk());
        if key.is_complete() {
            let path = self.compute_path(session, instance, &key)?;
            instance.set(&tree.path_field, path);
            Ok(Some(TreeSave {
                old_path,
                pending: false,
            }))
        } else {
            if instance.get(&tree.path_field).is_null() {
                instance.set(&tree.path_field, "");
            }
            Ok(Some(TreeSave {
                old_path,
                pending: true,
            }))
        }
    }

    pub(crate) fn tree_after_save(
        &self,
        session: &Session,
        instance: &Instance,
        state: Option<TreeSave>,
    ) -> Result<()> {
        let (Some(tree), Some(state)) = (self.tree(), state) else {
            return Ok(());
        };
        let (level, column) = self.storage_of(&tree.path_field)?;
        let key = instance.key_of(self.pk());
        if state.pending {
            let path = self.compute_path(session, instance, &key)?;
            instance.set(&tree.path_field, path.as_str());
            let (sql, params) = Update::table(level.table())
                .set(column.clone(), path)
                .filter(level.key_condition(&key))
                .build_with_dialect(session.dialect());
            session.execute(&sql, &params)?;
        }

        let new_path = path_of(instance, &tree.path_field);
        match state.old_path {
            Some(old) if !old.is_empty() && old != new_path => {
                self.rewrite_subtree(session, instance, level, &column, &old, &new_path)
            }
            _ => Ok(()),
        }
    }

    /// Replace the `old` prefix with `new` on every descendant, in storage
    /// and on live instances.
    fn rewrite_subtree(
        &self,
        session: &Session,
        instance: &Instance,
        level: &Mapper,
        column: &str,
        old: &str,
        new: &str,
    ) -> Result<()> {
        let dialect = session.dialect();
        let start = old.chars().count() + 1;
        let expr = dialect.concat(
            dialect.placeholder(1),
            &format!("SUBSTR({}, {start})", dialect.quote(column)),
        );
        let key = instance.key_of(self.pk());
        let (sql, params) = Update::table(level.table())
            .set_expr(column, expr, vec![Value::from(new)])
            .filter(
                Condition::starts_with(Column::new(column), old)
                    .and(level.key_condition(&key).not()),
            )
            .build_with_dialect(dialect);
        let moved = session.execute(&sql, &params)?;
        tracing::debug!(model = %self.name(), old, new, moved, "rewrote subtree paths");

        let tree = self.tree_config()?;
        let live = session.identity_map().alive_instances(self.name());
        for other in live.iter().filter(|o| !o.ptr_eq(instance)) {
            let path = path_of(other, &tree.path_field);
            if let Some(rest) = path.strip_prefix(old) {
                let rewritten = format!("{new}{rest}");
                other.set(&tree.path_field, rewritten.as_str());
                other.set_original_value(&tree.path_field, Value::from(rewritten));
            }
        }
        Ok(())
    }

    /// Every proper ancestor of `instance`, root first.
    pub fn ancestors(&self, instance: &Instance) -> Result<QuerySet> {
        let tree = self.tree_config()?;
        let keys = path_prefixes(&path_of(instance, &tree.path_field))
            .into_iter()
            .map(Key::from)
            .collect();
        Ok(self
            .query()
            .filter_in(&[tree.path_field.as_str()], keys)
            .order_by(&tree.path_field))
    }

    /// Every node below `instance`, in path order.
    pub fn descendants(&self, instance: &Instance) -> Result<QuerySet> {
        let tree = self.tree_config()?;
        let path = path_of(instance, &tree.path_field);
        if path.is_empty() {
            return Ok(self.query().filter_in(self.pk(), Vec::new()));
        }
        let pk_columns = self
            .pk()
            .iter()
            .map(|f| self.column_ref(f))
            .collect::<Result<Vec<_>>>()?;
        let key = instance.key_of(self.pk());
        Ok(self
            .query()
            .filter_prefix(&tree.path_field, path)
            .where_condition(Condition::key_eq(&pk_columns, &key).not())
            .order_by(&tree.path_field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_segments_sort() {
        assert_eq!(encode_key(&Key::from(5)), "0000000005/");
        assert!(encode_key(&Key::from(9)) < encode_key(&Key::from(10)));
    }

    #[test]
    fn test_text_segments_escape_separators() {
        assert_eq!(encode_segment(&Value::from("a/b:c!")), "a!sb!kc!!");
        assert_eq!(encode_key(&Key::from((3, "en"))), "0000000003:en/");
    }

    #[test]
    fn test_path_prefixes() {
        let path = "0000000001/0000000002/0000000003/";
        assert_eq!(
            path_prefixes(path),
            vec!["0000000001/", "0000000001/0000000002/"]
        );
        assert!(path_prefixes("0000000001/").is_empty());
        assert!(path_prefixes("").is_empty());
    }

    #[test]
    fn test_config_names_parent_fields() {
        let config = TreeConfig::new(&["id".to_string(), "lang".to_string()], "tree_path");
        assert_eq!(config.parent_fields, vec!["parent_id", "parent_lang"]);
        assert_eq!(config.parent_relation, "parent");
    }
}
