//! SQL generation from entity metadata.
//!
//! Every builder is a pure function of the metadata: the same entity always
//! yields byte-identical SQL. Identifiers are double-quoted and parameters use
//! positional `?` placeholders whose order is recorded in
//! [`GeneratedSql::parameters`].

use crate::codec::ScalarKind;
use crate::error::{Error, Result};
use crate::metadata::{EntityMetadata, FieldRef};

/// SQL text plus the fields whose values fill its placeholders, in order.
#[derive(Debug)]
pub struct GeneratedSql<E> {
    text: String,
    parameters: Vec<FieldRef<E>>,
}

impl<E> GeneratedSql<E> {
    fn new(text: String, parameters: Vec<FieldRef<E>>) -> Self {
        Self { text, parameters }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[FieldRef<E>] {
        &self.parameters
    }

    /// Number of `?` placeholders in the text.
    pub fn placeholder_count(&self) -> usize {
        self.text.matches('?').count()
    }
}

/// Renders the fixed statement shapes for an entity.
pub struct QueryBuilder;

impl QueryBuilder {
    /// `CREATE TABLE IF NOT EXISTS` with one definition per column and a
    /// trailing primary-key clause.
    pub fn create_table<E>(metadata: &EntityMetadata<E>) -> GeneratedSql<E> {
        let mut definitions: Vec<String> = metadata
            .columns()
            .iter()
            .map(|field| {
                let mut definition = format!("{} {}", quote(field.column()), sql_type(metadata, field));
                let constraints = field.constraints();
                let caller_assigned_id = metadata.is_id(field) && !metadata.is_auto_increment();
                if caller_assigned_id || !constraints.nullable {
                    definition.push_str(" NOT NULL");
                }
                if constraints.unique {
                    definition.push_str(" UNIQUE");
                }
                definition
            })
            .collect();

        if !metadata.primary_keys().is_empty() {
            let keys: Vec<String> = metadata.primary_keys().iter().map(|k| quote(k)).collect();
            definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        let text = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quote(metadata.table_name()),
            definitions.join(",\n  ")
        );
        GeneratedSql::new(text, Vec::new())
    }

    /// `ALTER TABLE ... ADD COLUMN` for one mapped column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownColumn`] if `column` is not mapped.
    pub fn add_column<E>(metadata: &EntityMetadata<E>, column: &str) -> Result<GeneratedSql<E>> {
        let field = metadata.column(column).ok_or_else(|| Error::UnknownColumn {
            table: metadata.table_name().to_string(),
            column: column.to_string(),
        })?;

        let mut text = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote(metadata.table_name()),
            quote(field.column()),
            sql_type(metadata, field)
        );
        if !field.constraints().nullable {
            text.push_str(" NOT NULL");
        }
        Ok(GeneratedSql::new(text, Vec::new()))
    }

    /// `INSERT` over every insertable column; the auto-increment identity is
    /// left to the database. With no insertable column at all the row is
    /// inserted with `DEFAULT VALUES`.
    pub fn insert<E>(metadata: &EntityMetadata<E>) -> GeneratedSql<E> {
        let parameters: Vec<FieldRef<E>> = metadata
            .columns()
            .iter()
            .filter(|field| metadata.is_insertable(field))
            .cloned()
            .collect();
        if parameters.is_empty() {
            let text = format!("INSERT INTO {} DEFAULT VALUES", quote(metadata.table_name()));
            return GeneratedSql::new(text, parameters);
        }

        let columns: Vec<String> = parameters.iter().map(|f| quote(f.column())).collect();
        let placeholders = vec!["?"; parameters.len()];
        let text = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(metadata.table_name()),
            columns.join(", "),
            placeholders.join(", ")
        );
        GeneratedSql::new(text, parameters)
    }

    pub fn select_by_id<E>(metadata: &EntityMetadata<E>) -> GeneratedSql<E> {
        let text = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote(metadata.table_name()),
            quote(metadata.id().column())
        );
        GeneratedSql::new(text, vec![metadata.id().clone()])
    }

    pub fn select_all<E>(metadata: &EntityMetadata<E>) -> GeneratedSql<E> {
        let text = format!("SELECT * FROM {}", quote(metadata.table_name()));
        GeneratedSql::new(text, Vec::new())
    }

    /// `UPDATE` of every non-identity column, keyed by the identity, which
    /// is bound last. `None` when the identity is the only column, since
    /// there is nothing to set.
    pub fn update<E>(metadata: &EntityMetadata<E>) -> Option<GeneratedSql<E>> {
        let mut parameters: Vec<FieldRef<E>> = metadata
            .columns()
            .iter()
            .filter(|field| !metadata.is_id(field))
            .cloned()
            .collect();
        if parameters.is_empty() {
            return None;
        }

        let assignments: Vec<String> = parameters
            .iter()
            .map(|f| format!("{} = ?", quote(f.column())))
            .collect();
        let text = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(metadata.table_name()),
            assignments.join(", "),
            quote(metadata.id().column())
        );
        parameters.push(metadata.id().clone());
        Some(GeneratedSql::new(text, parameters))
    }

    pub fn delete_by_id<E>(metadata: &EntityMetadata<E>) -> GeneratedSql<E> {
        let text = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(metadata.table_name()),
            quote(metadata.id().column())
        );
        GeneratedSql::new(text, vec![metadata.id().clone()])
    }
}

/// SQL column type for a field.
///
/// The auto-increment identity is always `INTEGER`, which SQLite turns into
/// the table's auto-assigned row id when it is the sole primary key. Without
/// `AUTOINCREMENT`, deleting the highest row frees its id for the next insert.
pub fn sql_type<E>(metadata: &EntityMetadata<E>, field: &FieldRef<E>) -> String {
    if metadata.is_auto_increment() && metadata.is_id(field) {
        return "INTEGER".to_string();
    }
    match field.kind() {
        ScalarKind::String => format!("VARCHAR({})", field.constraints().length),
        ScalarKind::Text => "TEXT".to_string(),
        ScalarKind::Integer => "INT".to_string(),
        ScalarKind::Long => "BIGINT".to_string(),
        ScalarKind::Boolean => "TINYINT(1)".to_string(),
        ScalarKind::Double => "DOUBLE".to_string(),
        ScalarKind::Float => "FLOAT".to_string(),
        ScalarKind::Uuid => "CHAR(36)".to_string(),
        ScalarKind::Bytes => "BLOB".to_string(),
        ScalarKind::DateTime | ScalarKind::Instant => "TIMESTAMP".to_string(),
        ScalarKind::Date => "DATE".to_string(),
        ScalarKind::Time => "TIME".to_string(),
    }
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDescriptor, FieldDef};
    use chrono::{NaiveDate, NaiveDateTime};
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct User {
        id: i64,
        name: String,
        age: i32,
    }

    fn user() -> EntityMetadata<User> {
        EntityMetadata::from_descriptor(
            EntityDescriptor::new()
                .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
                .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
                .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v)),
        )
        .unwrap()
    }

    #[derive(Debug, Default)]
    struct Event {
        key: Uuid,
        title: String,
        body: String,
        happened_at: NaiveDateTime,
        day: NaiveDate,
        payload: Option<Vec<u8>>,
        published: bool,
        score: f64,
    }

    fn event() -> EntityMetadata<Event> {
        EntityMetadata::from_descriptor(
            EntityDescriptor::new()
                .table("events")
                .field(FieldDef::new("key", |e: &Event| e.key, |e: &mut Event, v| e.key = v).id())
                .field(
                    FieldDef::new("title", |e: &Event| e.title.clone(), |e: &mut Event, v| e.title = v)
                        .length(80)
                        .not_null(),
                )
                .field(
                    FieldDef::new("body", |e: &Event| e.body.clone(), |e: &mut Event, v| e.body = v)
                        .unbounded(),
                )
                .field(
                    FieldDef::new(
                        "happened_at",
                        |e: &Event| e.happened_at,
                        |e: &mut Event, v| e.happened_at = v,
                    )
                    .column("at"),
                )
                .field(FieldDef::new("day", |e: &Event| e.day, |e: &mut Event, v| e.day = v).primary_key())
                .field(FieldDef::new(
                    "payload",
                    |e: &Event| e.payload.clone(),
                    |e: &mut Event, v| e.payload = v,
                ))
                .field(FieldDef::new(
                    "published",
                    |e: &Event| e.published,
                    |e: &mut Event, v| e.published = v,
                ))
                .field(FieldDef::new("score", |e: &Event| e.score, |e: &mut Event, v| e.score = v)),
        )
        .unwrap()
    }

    fn parameter_columns<E>(sql: &GeneratedSql<E>) -> Vec<&str> {
        sql.parameters().iter().map(|p| p.column()).collect()
    }

    #[test]
    fn create_table_for_auto_increment_entity() {
        let sql = QueryBuilder::create_table(&user());
        assert_eq!(
            sql.text(),
            "CREATE TABLE IF NOT EXISTS \"user\" (\n  \
             \"id\" INTEGER,\n  \
             \"name\" VARCHAR(255) UNIQUE,\n  \
             \"age\" INT,\n  \
             PRIMARY KEY (\"id\")\n)"
        );
        assert!(sql.parameters().is_empty());
    }

    #[test]
    fn create_table_maps_every_kind() {
        let sql = QueryBuilder::create_table(&event());
        assert_eq!(
            sql.text(),
            "CREATE TABLE IF NOT EXISTS \"events\" (\n  \
             \"key\" CHAR(36) NOT NULL,\n  \
             \"title\" VARCHAR(80) NOT NULL,\n  \
             \"body\" TEXT,\n  \
             \"at\" TIMESTAMP,\n  \
             \"day\" DATE,\n  \
             \"payload\" BLOB,\n  \
             \"published\" TINYINT(1),\n  \
             \"score\" DOUBLE,\n  \
             PRIMARY KEY (\"key\", \"day\")\n)"
        );
    }

    #[test]
    fn add_column_uses_create_table_rules() {
        let metadata = event();
        let sql = QueryBuilder::add_column(&metadata, "title").unwrap();
        assert_eq!(
            sql.text(),
            "ALTER TABLE \"events\" ADD COLUMN \"title\" VARCHAR(80) NOT NULL"
        );
        let sql = QueryBuilder::add_column(&metadata, "at").unwrap();
        assert_eq!(sql.text(), "ALTER TABLE \"events\" ADD COLUMN \"at\" TIMESTAMP");
    }

    #[test]
    fn add_column_rejects_unknown_names() {
        let err = QueryBuilder::add_column(&user(), "email").unwrap_err();
        match err {
            Error::UnknownColumn { table, column } => {
                assert_eq!(table, "user");
                assert_eq!(column, "email");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn insert_skips_auto_increment_identity() {
        let sql = QueryBuilder::insert(&user());
        assert_eq!(sql.text(), "INSERT INTO \"user\" (\"name\", \"age\") VALUES (?, ?)");
        assert_eq!(parameter_columns(&sql), ["name", "age"]);
        assert_eq!(sql.placeholder_count(), sql.parameters().len());
    }

    #[test]
    fn insert_keeps_caller_assigned_identity() {
        let sql = QueryBuilder::insert(&event());
        assert_eq!(
            sql.text(),
            "INSERT INTO \"events\" (\"key\", \"title\", \"body\", \"at\", \"day\", \"payload\", \"published\", \"score\") \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        assert_eq!(sql.placeholder_count(), 8);
        assert_eq!(parameter_columns(&sql)[0], "key");
    }

    #[test]
    fn update_binds_identity_last() {
        let metadata = user();
        let sql = QueryBuilder::update(&metadata).unwrap();
        assert_eq!(
            sql.text(),
            "UPDATE \"user\" SET \"name\" = ?, \"age\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(parameter_columns(&sql), ["name", "age", "id"]);

        let non_identity = metadata.columns().len() - 1;
        assert_eq!(QueryBuilder::insert(&metadata).placeholder_count(), non_identity);
        assert_eq!(sql.placeholder_count(), non_identity + 1);
    }

    #[derive(Debug, Default)]
    struct Tag {
        id: i64,
    }

    fn tag() -> EntityMetadata<Tag> {
        EntityMetadata::from_descriptor(
            EntityDescriptor::new()
                .field(FieldDef::new("id", |t: &Tag| t.id, |t: &mut Tag, v| t.id = v).auto_increment()),
        )
        .unwrap()
    }

    #[test]
    fn identity_only_entity_inserts_default_values() {
        let sql = QueryBuilder::insert(&tag());
        assert_eq!(sql.text(), "INSERT INTO \"tag\" DEFAULT VALUES");
        assert!(sql.parameters().is_empty());
        assert_eq!(sql.placeholder_count(), 0);
    }

    #[test]
    fn identity_only_entity_has_nothing_to_update() {
        assert!(QueryBuilder::update(&tag()).is_none());
        let delete = QueryBuilder::delete_by_id(&tag());
        assert_eq!(delete.text(), "DELETE FROM \"tag\" WHERE \"id\" = ?");
    }

    #[test]
    fn keyed_statements_use_identity_only() {
        let metadata = user();
        let select = QueryBuilder::select_by_id(&metadata);
        assert_eq!(select.text(), "SELECT * FROM \"user\" WHERE \"id\" = ?");
        assert_eq!(parameter_columns(&select), ["id"]);

        let delete = QueryBuilder::delete_by_id(&metadata);
        assert_eq!(delete.text(), "DELETE FROM \"user\" WHERE \"id\" = ?");
        assert_eq!(parameter_columns(&delete), ["id"]);

        let all = QueryBuilder::select_all(&metadata);
        assert_eq!(all.text(), "SELECT * FROM \"user\"");
        assert_eq!(all.placeholder_count(), 0);
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
