mod common;

use ascetic::prelude::*;
use ascetic::{StorageError, StorageErrorKind};

use common::{AUTHOR_BOOK_DDL, register_authors_and_books};

#[test]
fn sqlite_savepoint_rollback_keeps_outer_work() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);

    session.begin().unwrap();
    common::new_author(&session, "Outer", "Author");
    session.begin().unwrap();
    assert_eq!(session.transaction_depth(), 2);
    common::new_author(&session, "Inner", "Author");
    session.rollback().unwrap();
    session.commit().unwrap();

    assert!(!session.in_transaction());
    assert_eq!(common::count_rows(&session, "author"), 1);
    assert_eq!(recorder.count("SAVEPOINT"), 1);
    assert_eq!(recorder.count("ROLLBACK TO SAVEPOINT"), 1);
    assert_eq!(recorder.count("COMMIT"), 1);
}

#[test]
fn sqlite_identity_map_survives_savepoints_until_root_commit() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    session.begin().unwrap();
    let author = common::new_author(&session, "Ada", "Lovelace");
    session.begin().unwrap();
    session.commit().unwrap();
    assert!(authors.get(&session, 1).unwrap().ptr_eq(&author));

    session.begin().unwrap();
    session.rollback().unwrap();
    assert!(authors.get(&session, 1).unwrap().ptr_eq(&author));

    session.commit().unwrap();
    let reloaded = authors.get(&session, 1).unwrap();
    assert!(!reloaded.ptr_eq(&author));
    assert_eq!(reloaded.get("first_name"), Value::from("Ada"));
}

#[test]
fn sqlite_root_rollback_discards_rows_and_identities() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    let authors = session.mapper("Author").unwrap();

    session.begin().unwrap();
    let _author = common::new_author(&session, "Ada", "Lovelace");
    session.rollback().unwrap();

    assert_eq!(common::count_rows(&session, "author"), 0);
    assert!(authors.get(&session, 1).unwrap_err().is_does_not_exist());
}

#[test]
fn sqlite_transaction_helper_rolls_back_on_error() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);

    let result: Result<()> = session.transaction(|s| {
        common::new_author(s, "Doomed", "Author");
        Err(Error::mapping("abort"))
    });
    assert!(result.is_err());
    assert_eq!(common::count_rows(&session, "author"), 0);

    let id = session
        .transaction(|s| {
            let author = common::new_author(s, "Kept", "Author");
            Ok(author.get("id"))
        })
        .unwrap();
    assert_eq!(id, Value::Int(1));
    assert_eq!(common::count_rows(&session, "author"), 1);
}

#[test]
fn sqlite_commit_without_transaction_is_an_error() {
    let (session, _) = common::session(AUTHOR_BOOK_DDL);
    assert!(session.commit().is_err());
    assert!(session.rollback().is_err());
}

#[test]
fn sqlite_lost_connection_is_retried_outside_transactions() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);
    common::new_author(&session, "Ada", "Lovelace");

    recorder.fail_next(StorageError::connection_lost("server has gone away"));
    assert_eq!(common::count_rows(&session, "author"), 1);
    assert_eq!(recorder.reconnects(), 1);
}

#[test]
fn sqlite_lost_connection_inside_transaction_propagates() {
    let (session, recorder) = common::session(AUTHOR_BOOK_DDL);
    register_authors_and_books(&session);

    session.begin().unwrap();
    recorder.fail_next(StorageError::connection_lost("server has gone away"));
    let err = session.query("SELECT 1", &[]).unwrap_err();
    match err {
        Error::Storage(e) => assert_eq!(e.kind, StorageErrorKind::ConnectionLost),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorder.reconnects(), 0);
    session.rollback().unwrap();
}

#[test]
fn sqlite_always_reconnect_retries_inside_transaction() {
    let config = SessionConfig {
        always_reconnect: true,
        ..SessionConfig::default()
    };
    let (session, recorder) = common::session_with(AUTHOR_BOOK_DDL, config);

    session.begin().unwrap();
    recorder.fail_next(StorageError::connection_lost("server has gone away"));
    assert!(session.query("SELECT 1", &[]).is_ok());
    assert_eq!(recorder.reconnects(), 1);
    session.commit().unwrap();
}

#[test]
fn sqlite_constraint_violation_is_not_retried() {
    let (session, recorder) = common::session(
        "CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT NOT NULL UNIQUE);",
    );
    MapperBuilder::new("Tag").register(&session).unwrap();
    let tags = session.mapper("Tag").unwrap();

    let first = tags.create(common::record(&[("label", Value::from("rust"))]));
    tags.save(&session, &first).unwrap();
    let duplicate = tags.create(common::record(&[("label", Value::from("rust"))]));
    let err = tags.save(&session, &duplicate).unwrap_err();
    match err {
        Error::Storage(e) => assert_eq!(e.kind, StorageErrorKind::Constraint),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorder.reconnects(), 0);
    assert!(duplicate.is_new());
}
