mod common;

use ascetic::prelude::*;

use common::record;

const PEOPLE_DDL: &str = "
    CREATE TABLE person (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        polymorphic_type_id TEXT
    );
    CREATE TABLE student (
        id INTEGER PRIMARY KEY,
        grade INTEGER
    );
    CREATE TABLE pupil (
        id INTEGER PRIMARY KEY,
        name TEXT
    );
";

fn people_session() -> (Session, common::Recorder) {
    let (session, recorder) = common::session(PEOPLE_DDL);
    MapperBuilder::new("Person")
        .polymorphic()
        .register(&session)
        .unwrap();
    MapperBuilder::new("Student")
        .extends("Person")
        .register(&session)
        .unwrap();
    (session, recorder)
}

fn new_student(session: &Session, name: &str, grade: i64) -> Instance {
    let students = session.mapper("Student").unwrap();
    let student = students.create(record(&[
        ("name", Value::from(name)),
        ("grade", Value::Int(grade)),
    ]));
    students.save(session, &student).unwrap();
    student
}

#[test]
fn sqlite_insert_writes_every_level() {
    let (session, recorder) = people_session();
    let student = new_student(&session, "Ada", 3);

    assert_eq!(student.get("id"), Value::Int(1));
    assert_eq!(student.get("polymorphic_type_id"), Value::from("Student"));
    assert_eq!(recorder.count("INSERT"), 2);
    let statements = recorder.statements();
    assert!(statements[0].starts_with(r#"INSERT INTO "person""#));
    assert!(statements[1].starts_with(r#"INSERT INTO "student""#));
    assert_eq!(
        common::column_value(&session, "student", "grade", 1),
        Value::Int(3)
    );
}

#[test]
fn sqlite_base_lookup_returns_the_derived_instance() {
    let (session, recorder) = people_session();
    new_student(&session, "Ada", 3);
    let people = session.mapper("Person").unwrap();
    let plain = people.create(record(&[("name", Value::from("Bob"))]));
    people.save(&session, &plain).unwrap();

    let other = common::sibling(&session, &recorder, SessionConfig::default());
    let found = other.mapper("Person").unwrap().get(&other, 1).unwrap();
    assert_eq!(found.model(), "Student");
    assert_eq!(found.get("grade"), Value::Int(3));
    assert_eq!(found.get("name"), Value::from("Ada"));

    let everyone = other
        .mapper("Person")
        .unwrap()
        .query()
        .order_by("id")
        .all(&other)
        .unwrap();
    let models: Vec<_> = everyone.iter().map(Instance::model).collect();
    assert_eq!(models, ["Student", "Person"]);
    assert!(everyone[0].ptr_eq(&found));
}

#[test]
fn sqlite_non_polymorphic_query_returns_base_instances() {
    let (session, recorder) = people_session();
    new_student(&session, "Ada", 3);

    let other = common::sibling(&session, &recorder, SessionConfig::default());
    recorder.clear_log();
    let people = other
        .mapper("Person")
        .unwrap()
        .query()
        .polymorphic(false)
        .all(&other)
        .unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].model(), "Person");
    assert_eq!(people[0].get("polymorphic_type_id"), Value::from("Student"));
    assert!(people[0].get("grade").is_null());

    let statements = recorder.statements();
    assert_eq!(statements.len(), 1);
    assert!(!statements[0].contains("student"), "{}", statements[0]);
}

#[test]
fn sqlite_update_touches_only_the_owning_level() {
    let (session, recorder) = people_session();
    let student = new_student(&session, "Ada", 3);
    let students = session.mapper("Student").unwrap();

    student.set("grade", 4);
    recorder.clear_log();
    students.save(&session, &student).unwrap();
    assert_eq!(
        recorder.statements(),
        vec![r#"UPDATE "student" SET "grade" = ? WHERE "id" = ?"#.to_string()]
    );
}

#[test]
fn sqlite_delete_through_the_base_removes_every_row() {
    let (session, _) = people_session();
    let student = new_student(&session, "Ada", 3);
    let people = session.mapper("Person").unwrap();

    assert!(people.delete(&session, &student).unwrap());
    assert_eq!(common::count_rows(&session, "student"), 0);
    assert_eq!(common::count_rows(&session, "person"), 0);
    assert!(people.get(&session, 1).unwrap_err().is_does_not_exist());
}

#[test]
fn sqlite_shadowed_field_is_rejected() {
    let (session, _) = people_session();
    let err = MapperBuilder::new("Pupil")
        .extends("Person")
        .register(&session)
        .unwrap_err();
    assert!(err.to_string().contains("shadows"), "{err}");
}
