mod common;

use std::collections::BTreeSet;

use ascetic::prelude::*;
use serde::{Deserialize, Serialize};

use common::{AUTHOR_BOOK_DDL, record, register_authors_and_books};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    id: Option<i64>,
    first_name: String,
    last_name: String,
    bio: Option<String>,
}

#[test]
fn sqlite_repeated_get_returns_the_same_instance() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let saved = common::new_author(&session, "Ada", "Lovelace");
    let id = saved.get("id").as_i64().unwrap();
    assert_eq!(id, 1);

    recorder.clear_log();
    let authors = session.mapper("Author").unwrap();
    let first = authors.get(&session, id).unwrap();
    let second = authors.get(&session, id).unwrap();
    assert!(first.ptr_eq(&saved));
    assert!(second.ptr_eq(&saved));
    // Both lookups were answered by the identity map.
    assert_eq!(recorder.count("SELECT"), 0);

    // Query results reuse live instances too.
    let all = authors.query().all(&session).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].ptr_eq(&saved));
}

#[test]
fn sqlite_only_changed_fields_are_updated() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    session
        .execute(
            "INSERT INTO author (first_name, last_name) VALUES ('Mary', 'Shelley')",
            &[],
        )
        .unwrap();

    let authors = session.mapper("Author").unwrap();
    let author = authors.get(&session, 1).unwrap();
    assert!(!authors.is_changed(&author));

    author.set("bio", "Wrote Frankenstein.");
    let expected: BTreeSet<String> = ["bio".to_string()].into_iter().collect();
    assert_eq!(authors.get_changed(&author), expected);

    recorder.clear_log();
    authors.save(&session, &author).unwrap();
    assert_eq!(
        recorder.statements(),
        vec![r#"UPDATE "author" SET "bio" = ? WHERE "id" = ?"#.to_string()]
    );
    assert!(!authors.is_changed(&author));

    // Nothing changed: no statement at all.
    recorder.clear_log();
    authors.save(&session, &author).unwrap();
    assert!(recorder.statements().is_empty());

    assert_eq!(
        common::column_value(&session, "author", "bio", 1),
        Value::from("Wrote Frankenstein.")
    );
}

#[test]
fn sqlite_struct_round_trip() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    let draft = Author {
        id: None,
        first_name: "Jane".to_string(),
        last_name: "Austen".to_string(),
        bio: None,
    };
    let instance = authors.create_from(&draft).unwrap();
    assert!(instance.is_new());
    authors.save(&session, &instance).unwrap();
    assert!(!instance.is_new());

    // A second session has its own identity map and must read storage.
    let other = common::sibling(&session, &recorder, SessionConfig::default());
    let loaded = other
        .mapper("Author")
        .unwrap()
        .get(&other, 1)
        .unwrap()
        .to_model::<Author>()
        .unwrap();
    assert_eq!(
        loaded,
        Author {
            id: Some(1),
            ..draft
        }
    );
}

#[test]
fn sqlite_read_committed_always_requeries() {
    let config = SessionConfig {
        isolation_level: IsolationLevel::ReadCommitted,
        ..SessionConfig::default()
    };
    let (session, recorder) = common::session_with(AUTHOR_BOOK_DDL, config);
    register_authors_and_books(&session);
    let saved = common::new_author(&session, "Ada", "Lovelace");

    recorder.clear_log();
    let authors = session.mapper("Author").unwrap();
    let first = authors.get(&session, 1).unwrap();
    let second = authors.get(&session, 1).unwrap();
    assert!(!first.ptr_eq(&saved));
    assert!(!first.ptr_eq(&second));
    assert_eq!(recorder.count("SELECT"), 2);
}

#[test]
fn sqlite_serializable_remembers_missing_rows() {
    let config = SessionConfig {
        isolation_level: IsolationLevel::Serializable,
        ..SessionConfig::default()
    };
    let (session, recorder) = common::session_with(AUTHOR_BOOK_DDL, config);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    recorder.clear_log();
    assert!(authors.get(&session, 42).unwrap_err().is_does_not_exist());
    assert!(authors.get(&session, 42).unwrap_err().is_does_not_exist());
    assert_eq!(recorder.count("SELECT"), 1);
}

#[test]
fn sqlite_repeatable_reads_forgets_missing_rows() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    recorder.clear_log();
    assert!(authors.get(&session, 42).unwrap_err().is_does_not_exist());
    assert!(authors.get(&session, 42).unwrap_err().is_does_not_exist());
    assert_eq!(recorder.count("SELECT"), 2);
}

#[test]
fn sqlite_isolation_can_be_switched_on_a_live_session() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let saved = common::new_author(&session, "Ada", "Lovelace");
    let authors = session.mapper("Author").unwrap();

    session
        .identity_map()
        .set_isolation_level(IsolationLevel::ReadUncommitted);
    assert!(!authors.get(&session, 1).unwrap().ptr_eq(&saved));

    session
        .identity_map()
        .set_isolation_level(IsolationLevel::RepeatableReads);
    let first = authors.get(&session, 1).unwrap();
    assert!(authors.get(&session, 1).unwrap().ptr_eq(&first));
}

#[test]
fn sqlite_validation_reports_every_field() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    let author = authors.create(record(&[("last_name", Value::from("x".repeat(41)))]));
    recorder.clear_log();
    let err = authors.save(&session, &author).unwrap_err();
    let errors = err.validation_errors().expect("validation error");
    assert!(errors.get("first_name").is_some());
    assert!(errors.get("last_name").is_some());
    assert!(errors.get("bio").is_none());
    // Nothing reached storage.
    assert!(recorder.statements().is_empty());
    assert!(author.is_new());
}

#[test]
fn sqlite_disabled_identity_map_sees_storage_changes() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    common::new_author(&session, "Ada", "Lovelace");
    let authors = session.mapper("Author").unwrap();

    session.identity_map().disable();
    let before = authors.get(&session, 1).unwrap();
    session
        .execute("UPDATE author SET bio = 'Analyst' WHERE id = 1", &[])
        .unwrap();
    let after = authors.get(&session, 1).unwrap();
    assert!(before.get("bio").is_null());
    assert_eq!(after.get("bio"), Value::from("Analyst"));

    session.identity_map().enable();
    let first = authors.get(&session, 1).unwrap();
    assert!(authors.get(&session, 1).unwrap().ptr_eq(&first));
}
