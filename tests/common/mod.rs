#![allow(dead_code)]

use sqlx_entity_manager::prelude::*;
use tempfile::TempDir;

/// An entity manager over a throwaway database file.
pub struct TestDb {
    pub em: EntityManager,
    _dir: TempDir,
}

pub async fn setup() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let config = DatabaseConfig::new(url)
        .with_max_connections(4)
        .with_async_workers(4);
    let em = EntityManager::connect(&config)
        .await
        .expect("failed to open test database");
    TestDb { em, _dir: dir }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: i32,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            age,
        }
    }
}

impl Entity for User {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
            .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
            .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v))
    }
}

pub async fn count_users(em: &EntityManager) -> usize {
    em.find_all::<User>().await.expect("failed to load users").len()
}
