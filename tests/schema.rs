mod common;

use common::setup;
use sqlx_entity_manager::prelude::*;
use sqlx_entity_manager::SchemaSync;

#[derive(Debug, Default)]
struct PersonV1 {
    id: i64,
    name: String,
}

impl Entity for PersonV1 {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("people")
            .field(FieldDef::new("id", |p: &PersonV1| p.id, |p: &mut PersonV1, v| p.id = v).auto_increment())
            .field(FieldDef::new("name", |p: &PersonV1| p.name.clone(), |p: &mut PersonV1, v| p.name = v))
    }
}

#[derive(Debug, Default)]
struct PersonV2 {
    id: i64,
    name: String,
    age: Option<i32>,
    email: Option<String>,
}

impl Entity for PersonV2 {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("People")
            .field(FieldDef::new("id", |p: &PersonV2| p.id, |p: &mut PersonV2, v| p.id = v).auto_increment())
            .field(
                FieldDef::new("name", |p: &PersonV2| p.name.clone(), |p: &mut PersonV2, v| p.name = v)
                    .column("NAME"),
            )
            .field(FieldDef::new("age", |p: &PersonV2| p.age, |p: &mut PersonV2, v| p.age = v))
            .field(
                FieldDef::new("email", |p: &PersonV2| p.email.clone(), |p: &mut PersonV2, v| p.email = v)
                    .length(120),
            )
    }
}

#[derive(Debug, Default)]
struct PersonV3 {
    id: i64,
    nickname: Option<String>,
    code: String,
}

impl Entity for PersonV3 {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("people")
            .field(FieldDef::new("id", |p: &PersonV3| p.id, |p: &mut PersonV3, v| p.id = v).auto_increment())
            .field(FieldDef::new("nickname", |p: &PersonV3| p.nickname.clone(), |p: &mut PersonV3, v| p.nickname = v))
            .field(FieldDef::new("code", |p: &PersonV3| p.code.clone(), |p: &mut PersonV3, v| p.code = v).not_null())
    }
}

#[tokio::test]
async fn ensure_table_is_idempotent() {
    let db = setup().await;
    let schema = db.em.schema();

    assert!(!schema.table_exists("people").await.unwrap());
    let first = db.em.ensure_table::<PersonV1>().await.unwrap();
    assert!(first.created());
    assert_eq!(first.table(), "people");
    assert_eq!(first.statements().len(), 1);

    let second = db.em.ensure_table::<PersonV1>().await.unwrap();
    assert!(!second.created());
    assert!(second.is_unchanged());
    assert!(schema.table_exists("PEOPLE").await.unwrap());
}

#[tokio::test]
async fn missing_columns_are_added_in_declaration_order() {
    let db = setup().await;
    db.em.ensure_table::<PersonV1>().await.unwrap();
    let mut old = PersonV1 { id: 0, name: "Ada".into() };
    db.em.persist(&mut old).await.unwrap();

    let sync = db.em.ensure_table::<PersonV2>().await.unwrap();
    assert!(!sync.created());
    assert_eq!(
        sync.statements(),
        [
            "ALTER TABLE \"People\" ADD COLUMN \"age\" INT",
            "ALTER TABLE \"People\" ADD COLUMN \"email\" VARCHAR(120)",
        ]
    );
    assert_eq!(
        db.em.schema().existing_columns("people").await.unwrap(),
        ["id", "name", "age", "email"]
    );

    let upgraded = db.em.find::<PersonV2>(old.id).await.unwrap().unwrap();
    assert_eq!(upgraded.name, "Ada");
    assert_eq!(upgraded.age, None);

    assert!(db.em.ensure_table::<PersonV2>().await.unwrap().is_unchanged());
}

#[tokio::test]
async fn failed_ddl_keeps_earlier_columns() {
    let db = setup().await;
    db.em.ensure_table::<PersonV1>().await.unwrap();
    // SQLite only refuses a NOT NULL column without default on a non-empty table.
    db.em.persist(&mut PersonV1 { id: 0, name: "Ada".into() }).await.unwrap();

    let err = db.em.ensure_table::<PersonV3>().await.unwrap_err();
    match err {
        Error::Schema { table, statement, .. } => {
            assert_eq!(table, "people");
            assert_eq!(statement, "ALTER TABLE \"people\" ADD COLUMN \"code\" VARCHAR(255) NOT NULL");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let columns = db.em.schema().existing_columns("people").await.unwrap();
    assert_eq!(columns, ["id", "name", "nickname"]);

    // Re-running re-diffs and fails on the same column only.
    let again = db.em.ensure_table::<PersonV3>().await.unwrap_err();
    assert!(matches!(again, Error::Schema { ref statement, .. } if statement.contains("\"code\"")));
}

#[derive(Debug, Default)]
struct Label {
    id: i64,
    text: String,
}

impl Entity for Label {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("labels")
            .field(FieldDef::new("id", |l: &Label| l.id, |l: &mut Label, v| l.id = v).auto_increment())
            .field(FieldDef::new("text", |l: &Label| l.text.clone(), |l: &mut Label, v| l.text = v).length(40))
    }
}

#[tokio::test]
async fn ensure_tables_syncs_each_entity_in_order() {
    let db = setup().await;

    let synced = db.em.ensure_tables::<(PersonV1, Label)>().await.unwrap();
    let tables: Vec<&str> = synced.iter().map(SchemaSync::table).collect();
    assert_eq!(tables, ["people", "labels"]);
    assert!(synced.iter().all(SchemaSync::created));

    let again = db.em.schema().ensure_tables::<(PersonV1, Label)>().await.unwrap();
    assert!(again.iter().all(SchemaSync::is_unchanged));

    let upgraded = db.em.ensure_tables::<(Label, PersonV2)>().await.unwrap();
    assert!(upgraded[0].is_unchanged());
    assert_eq!(upgraded[1].statements().len(), 2);
}

#[tokio::test]
async fn ensure_tables_validates_every_entity_first() {
    #[derive(Debug, Default)]
    struct Keyless {
        name: String,
    }
    impl Entity for Keyless {
        fn describe() -> EntityDescriptor<Self> {
            EntityDescriptor::new()
                .field(FieldDef::new("name", |k: &Keyless| k.name.clone(), |k: &mut Keyless, v| k.name = v))
        }
    }

    let db = setup().await;
    let err = db.em.ensure_tables::<(Label, Keyless)>().await.unwrap_err();
    assert!(matches!(err, Error::Mapping { ref entity, .. } if entity == "Keyless"));
    assert!(!db.em.schema().table_exists("labels").await.unwrap());
}

#[tokio::test]
async fn invalid_metadata_is_rejected_before_any_ddl() {
    #[derive(Debug, Default)]
    struct Anonymous {
        name: String,
    }
    impl Entity for Anonymous {
        fn describe() -> EntityDescriptor<Self> {
            EntityDescriptor::new()
                .field(FieldDef::new("name", |a: &Anonymous| a.name.clone(), |a: &mut Anonymous, v| a.name = v))
        }
    }

    let db = setup().await;
    let err = db.em.ensure_table::<Anonymous>().await.unwrap_err();
    assert!(matches!(err, Error::Mapping { ref entity, .. } if entity == "Anonymous"));
    assert!(!db.em.schema().table_exists("anonymous").await.unwrap());
}
