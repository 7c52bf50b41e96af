//! Additive schema synchronisation against the live SQLite catalog.

use crate::connection::ConnectionProvider;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::metadata::EntityMetadata;
use crate::query::QueryBuilder;
use sqlx::SqliteConnection;
use std::future::Future;

/// Outcome of [`SchemaManager::ensure_table`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSync {
    table: String,
    created: bool,
    statements: Vec<String>,
}

impl SchemaSync {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the table did not exist and was created.
    pub fn created(&self) -> bool {
        self.created
    }

    /// DDL statements executed, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// True when the table already matched the entity.
    pub fn is_unchanged(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Creates missing tables and adds missing columns. Never drops or alters
/// existing columns.
///
/// DDL runs on a plain pooled connection in auto-commit mode, one statement
/// at a time. Concurrent synchronisation of the same table is not
/// coordinated.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    provider: ConnectionProvider,
}

impl SchemaManager {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self { provider }
    }

    /// Brings the table of `E` up to date with its metadata.
    ///
    /// A missing table is created with `CREATE TABLE`. An existing table gets
    /// one `ADD COLUMN` per mapped column it lacks, in declaration order.
    /// Table and column names compare case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the metadata of `E` is invalid and
    /// [`Error::Schema`] naming the failing statement if DDL fails. Columns
    /// added before the failure stay added; calling again re-diffs.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sqlx_entity_manager::{Entity, EntityDescriptor, FieldDef, SchemaManager};
    /// # #[derive(Default)]
    /// # struct Note { id: i64 }
    /// # impl Entity for Note {
    /// #     fn describe() -> EntityDescriptor<Self> {
    /// #         EntityDescriptor::new().field(FieldDef::new("id", |n: &Note| n.id, |n: &mut Note, v| n.id = v).auto_increment())
    /// #     }
    /// # }
    /// # async fn example(schema: SchemaManager) -> sqlx_entity_manager::Result<()> {
    /// let sync = schema.ensure_table::<Note>().await?;
    /// for statement in sync.statements() {
    ///     println!("applied: {statement}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn ensure_table<E: Entity>(&self) -> Result<SchemaSync> {
        let metadata = EntityMetadata::<E>::of()?;
        let mut conn = self.provider.acquire().await?;
        sync_table(&mut conn, &metadata).await
    }

    /// Brings the tables of several entities up to date, in tuple order.
    ///
    /// The metadata of every entity is validated before any DDL runs. The
    /// tables are then synchronised one after another on a single
    /// connection, stopping at the first failure; tables synchronised
    /// before it stay synchronised.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_table`](Self::ensure_table).
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sqlx_entity_manager::{Entity, EntityDescriptor, FieldDef, SchemaManager};
    /// # #[derive(Default)]
    /// # struct Note { id: i64 }
    /// # impl Entity for Note {
    /// #     fn describe() -> EntityDescriptor<Self> {
    /// #         EntityDescriptor::new().field(FieldDef::new("id", |n: &Note| n.id, |n: &mut Note, v| n.id = v).auto_increment())
    /// #     }
    /// # }
    /// # #[derive(Default)]
    /// # struct Label { id: i64 }
    /// # impl Entity for Label {
    /// #     fn describe() -> EntityDescriptor<Self> {
    /// #         EntityDescriptor::new().field(FieldDef::new("id", |l: &Label| l.id, |l: &mut Label, v| l.id = v).auto_increment())
    /// #     }
    /// # }
    /// # async fn example(schema: SchemaManager) -> sqlx_entity_manager::Result<()> {
    /// let synced = schema.ensure_tables::<(Note, Label)>().await?;
    /// assert_eq!(synced.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn ensure_tables<S: EntitySet>(&self) -> Result<Vec<SchemaSync>> {
        S::validate()?;
        let mut conn = self.provider.acquire().await?;
        S::sync_all(&mut conn).await
    }

    /// Whether a table named `table` exists, ignoring case.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.provider.acquire().await?;
        table_exists(&mut conn, table).await
    }

    /// Column names of `table` in catalog order; empty if it does not exist.
    pub async fn existing_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.provider.acquire().await?;
        existing_columns(&mut conn, table).await
    }
}

/// A tuple of [`Entity`] types, `(A,)` up to eight, synchronised together by
/// [`SchemaManager::ensure_tables`].
pub trait EntitySet {
    /// Builds the metadata of every member.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Mapping`] found.
    fn validate() -> Result<()>;

    /// Synchronises every member's table on `conn`, in order.
    fn sync_all(conn: &mut SqliteConnection) -> impl Future<Output = Result<Vec<SchemaSync>>> + Send + '_;
}

macro_rules! entity_set {
    ($($member:ident),+) => {
        impl<$($member: Entity),+> EntitySet for ($($member,)+) {
            fn validate() -> Result<()> {
                $(EntityMetadata::<$member>::of()?;)+
                Ok(())
            }

            fn sync_all(conn: &mut SqliteConnection) -> impl Future<Output = Result<Vec<SchemaSync>>> + Send + '_ {
                async move {
                    let mut synced = Vec::new();
                    $(
                        let metadata = EntityMetadata::<$member>::of()?;
                        synced.push(sync_table(&mut *conn, &metadata).await?);
                    )+
                    Ok(synced)
                }
            }
        }
    };
}

entity_set!(A);
entity_set!(A, B);
entity_set!(A, B, C);
entity_set!(A, B, C, D);
entity_set!(A, B, C, D, F);
entity_set!(A, B, C, D, F, G);
entity_set!(A, B, C, D, F, G, H);
entity_set!(A, B, C, D, F, G, H, I);

async fn sync_table<E>(conn: &mut SqliteConnection, metadata: &EntityMetadata<E>) -> Result<SchemaSync> {
    let table = metadata.table_name();
    let mut sync = SchemaSync {
        table: table.to_string(),
        ..SchemaSync::default()
    };

    if !table_exists(conn, table).await? {
        let create = QueryBuilder::create_table(metadata);
        execute_ddl(conn, table, create.text()).await?;
        sync.created = true;
        sync.statements.push(create.text().to_string());
        return Ok(sync);
    }

    let existing = existing_columns(conn, table).await?;
    for field in metadata.columns() {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(field.column())) {
            continue;
        }
        let add = QueryBuilder::add_column(metadata, field.column())?;
        execute_ddl(conn, table, add.text()).await?;
        sync.statements.push(add.text().to_string());
    }

    if sync.is_unchanged() {
        tracing::debug!(table, "schema up to date");
    }
    Ok(sync)
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?)",
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

async fn existing_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(columns)
}

async fn execute_ddl(conn: &mut SqliteConnection, table: &str, statement: &str) -> Result<()> {
    match sqlx::query(statement).execute(&mut *conn).await {
        Ok(_) => {
            tracing::info!(table, statement, "schema statement applied");
            Ok(())
        }
        Err(source) => Err(Error::Schema {
            table: table.to_string(),
            statement: statement.to_string(),
            source,
        }),
    }
}
