use crate::codec::{self, Scalar, Value};
use crate::config::{default_async_workers, DatabaseConfig};
use crate::connection::ConnectionProvider;
use crate::context::TransactionContext;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::executor::TransactionManager;
use crate::metadata::EntityMetadata;
use crate::query::{GeneratedSql, QueryBuilder};
use crate::schema::{EntitySet, SchemaManager, SchemaSync};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Sqlite, SqliteConnection};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// CRUD façade over entities.
///
/// Every write runs in a managed transaction: the plain methods start a new
/// one, the `_in` variants join the transaction bound to the given
/// [`TransactionContext`] (or start it there). Reads use the chain's
/// connection when a transaction is bound and a fresh pooled connection
/// otherwise.
///
/// Cloning is cheap; clones share the pool, the transaction statistics and
/// the async worker limit.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_entity_manager::{DatabaseConfig, Entity, EntityDescriptor, EntityManager, FieldDef};
///
/// #[derive(Debug, Default)]
/// struct User {
///     id: i32,
///     name: String,
///     age: i32,
/// }
///
/// impl Entity for User {
///     fn describe() -> EntityDescriptor<Self> {
///         EntityDescriptor::new()
///             .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
///             .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
///             .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v))
///     }
/// }
///
/// # async fn example() -> sqlx_entity_manager::Result<()> {
/// let em = EntityManager::connect(&DatabaseConfig::new("sqlite://app.db")).await?;
/// em.ensure_table::<User>().await?;
///
/// let mut alice = User { name: "Alice".into(), age: 30, ..Default::default() };
/// em.persist(&mut alice).await?;
///
/// let found = em.find::<User>(alice.id).await?;
/// assert_eq!(found.map(|u| u.name), Some("Alice".to_string()));
///
/// em.delete(&alice).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EntityManager {
    transactions: TransactionManager,
    schema: SchemaManager,
    workers: Arc<Semaphore>,
}

impl EntityManager {
    /// Opens a pool from `config` and sizes the async worker limit from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] or [`Error::Connection`] if the pool
    /// cannot be opened.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let provider = ConnectionProvider::connect(config).await?;
        Ok(Self::with_workers(provider, config.async_workers))
    }

    /// Wraps an existing provider with the default worker limit.
    pub fn new(provider: ConnectionProvider) -> Self {
        Self::with_workers(provider, default_async_workers())
    }

    /// Wraps an existing provider; at most `workers` async operations run at
    /// once (at least one).
    pub fn with_workers(provider: ConnectionProvider, workers: usize) -> Self {
        Self {
            transactions: TransactionManager::new(provider.clone()),
            schema: SchemaManager::new(provider),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn provider(&self) -> &ConnectionProvider {
        self.transactions.provider()
    }

    /// Creates or extends the table of `E`. See [`SchemaManager::ensure_table`].
    pub async fn ensure_table<E: Entity>(&self) -> Result<SchemaSync> {
        self.schema.ensure_table::<E>().await
    }

    /// Creates or extends the tables of every entity in `S`. See
    /// [`SchemaManager::ensure_tables`].
    pub async fn ensure_tables<S: EntitySet>(&self) -> Result<Vec<SchemaSync>> {
        self.schema.ensure_tables::<S>().await
    }

    /// Inserts `entity` in a new transaction.
    ///
    /// With an auto-increment identity, the generated key is written back
    /// into the entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the insert fails; the transaction is
    /// rolled back.
    pub async fn persist<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let mut ctx = TransactionContext::new();
        self.persist_in(&mut ctx, entity).await
    }

    /// Inserts `entity` within the transaction of `ctx`.
    pub async fn persist_in<E: Entity>(
        &self,
        ctx: &mut TransactionContext,
        entity: &mut E,
    ) -> Result<()> {
        let metadata = EntityMetadata::<E>::of()?;
        let scope = self.transactions.enter(ctx).await?;
        let outcome = insert(ctx, &metadata, entity).await;
        self.transactions.exit(ctx, scope, outcome).await
    }

    /// Looks an entity up by identity. `None` when no row matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if a column cannot be converted to its field.
    pub async fn find<E: Entity>(&self, id: impl Scalar) -> Result<Option<E>> {
        let mut ctx = TransactionContext::new();
        self.find_in(&mut ctx, id).await
    }

    /// Looks an entity up, reading through the transaction of `ctx` if one
    /// is bound.
    pub async fn find_in<E: Entity>(
        &self,
        ctx: &mut TransactionContext,
        id: impl Scalar,
    ) -> Result<Option<E>> {
        let metadata = EntityMetadata::<E>::of()?;
        let id = id.into_value();
        match ctx.connection() {
            Some(conn) => select_by_id(conn, &metadata, id).await,
            None => {
                let mut conn = self.provider().acquire().await?;
                select_by_id(&mut conn, &metadata, id).await
            }
        }
    }

    /// Loads every row of the table of `E`.
    pub async fn find_all<E: Entity>(&self) -> Result<Vec<E>> {
        let mut ctx = TransactionContext::new();
        self.find_all_in(&mut ctx).await
    }

    pub async fn find_all_in<E: Entity>(&self, ctx: &mut TransactionContext) -> Result<Vec<E>> {
        let metadata = EntityMetadata::<E>::of()?;
        match ctx.connection() {
            Some(conn) => select_all(conn, &metadata).await,
            None => {
                let mut conn = self.provider().acquire().await?;
                select_all(&mut conn, &metadata).await
            }
        }
    }

    /// Writes every non-identity column of `entity`, keyed by its identity.
    ///
    /// Matching no row is not an error. An entity whose only column is its
    /// identity has nothing to write, and no transaction is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the update fails; the transaction is
    /// rolled back.
    pub async fn update<E: Entity>(&self, entity: &E) -> Result<()> {
        let mut ctx = TransactionContext::new();
        self.update_in(&mut ctx, entity).await
    }

    pub async fn update_in<E: Entity>(&self, ctx: &mut TransactionContext, entity: &E) -> Result<()> {
        let metadata = EntityMetadata::<E>::of()?;
        let Some(sql) = QueryBuilder::update(&metadata) else {
            tracing::debug!(entity = metadata.type_name(), "identity is the only column, nothing to update");
            return Ok(());
        };
        let scope = self.transactions.enter(ctx).await?;
        let outcome = write(ctx, &metadata, &sql, entity, "update").await.map(drop);
        self.transactions.exit(ctx, scope, outcome).await
    }

    /// Deletes the row of `entity`, keyed by its identity.
    ///
    /// Matching no row is not an error.
    pub async fn delete<E: Entity>(&self, entity: &E) -> Result<()> {
        let mut ctx = TransactionContext::new();
        self.delete_in(&mut ctx, entity).await
    }

    pub async fn delete_in<E: Entity>(&self, ctx: &mut TransactionContext, entity: &E) -> Result<()> {
        let metadata = EntityMetadata::<E>::of()?;
        let scope = self.transactions.enter(ctx).await?;
        let sql = QueryBuilder::delete_by_id(&metadata);
        let outcome = write(ctx, &metadata, &sql, entity, "delete").await.map(drop);
        self.transactions.exit(ctx, scope, outcome).await
    }

    /// Persists `entity` on a worker task in its own transaction and hands
    /// it back with its generated key.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn persist_async<E: Entity>(&self, mut entity: E) -> Pending<E> {
        let manager = self.clone();
        Pending::spawn(Arc::clone(&self.workers), async move {
            manager.persist(&mut entity).await?;
            Ok(entity)
        })
    }

    /// Looks an entity up on a worker task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn find_async<E: Entity>(&self, id: impl Scalar) -> Pending<Option<E>> {
        let manager = self.clone();
        Pending::spawn(Arc::clone(&self.workers), async move { manager.find::<E>(id).await })
    }

    /// Closes the pool. Pending operations fail with [`Error::Connection`].
    pub async fn close(&self) {
        self.provider().close().await;
    }
}

/// An entity operation running on a worker task.
///
/// Resolves to the operation's result. Dropping it detaches the task, which
/// still runs to completion.
#[derive(Debug)]
pub struct Pending<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> Pending<T> {
    fn spawn<F>(workers: Arc<Semaphore>, operation: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|e| Error::Worker(e.to_string()))?;
            operation.await
        });
        Self { handle }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(Error::Worker(e.to_string())),
        })
    }
}

fn bind_parameters<'q, E>(
    sql: &'q GeneratedSql<E>,
    entity: &E,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    sql.parameters()
        .iter()
        .fold(sqlx::query(sql.text()), |query, field| {
            codec::bind(query, field.get(entity))
        })
}

fn persistence_error<E>(
    metadata: &EntityMetadata<E>,
    operation: &'static str,
    source: sqlx::Error,
) -> Error {
    Error::Persistence {
        entity: metadata.type_name().to_string(),
        operation,
        source,
    }
}

async fn insert<E: Entity>(
    ctx: &mut TransactionContext,
    metadata: &EntityMetadata<E>,
    entity: &mut E,
) -> Result<()> {
    let sql = QueryBuilder::insert(metadata);
    let done = bind_parameters(&sql, entity)
        .execute(ctx.as_executor()?)
        .await
        .map_err(|e| persistence_error(metadata, "insert", e))?;
    tracing::debug!(
        entity = metadata.type_name(),
        statement = sql.text(),
        "entity inserted"
    );

    if metadata.is_auto_increment() {
        metadata
            .id()
            .set(entity, Value::BigInt(done.last_insert_rowid()))?;
    }
    Ok(())
}

async fn write<E: Entity>(
    ctx: &mut TransactionContext,
    metadata: &EntityMetadata<E>,
    sql: &GeneratedSql<E>,
    entity: &E,
    operation: &'static str,
) -> Result<u64> {
    let done = bind_parameters(sql, entity)
        .execute(ctx.as_executor()?)
        .await
        .map_err(|e| persistence_error(metadata, operation, e))?;
    let rows = done.rows_affected();
    if rows == 0 {
        tracing::debug!(
            entity = metadata.type_name(),
            operation,
            "no row matched the identity"
        );
    } else {
        tracing::debug!(entity = metadata.type_name(), operation, rows, "rows written");
    }
    Ok(rows)
}

async fn select_by_id<E: Entity>(
    conn: &mut SqliteConnection,
    metadata: &EntityMetadata<E>,
    id: Value,
) -> Result<Option<E>> {
    let sql = QueryBuilder::select_by_id(metadata);
    let row = codec::bind(sqlx::query(sql.text()), id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| map_row(metadata, &row)).transpose()
}

async fn select_all<E: Entity>(
    conn: &mut SqliteConnection,
    metadata: &EntityMetadata<E>,
) -> Result<Vec<E>> {
    let sql = QueryBuilder::select_all(metadata);
    let rows = sqlx::query(sql.text()).fetch_all(&mut *conn).await?;
    tracing::debug!(entity = metadata.type_name(), rows = rows.len(), "rows loaded");
    rows.iter().map(|row| map_row(metadata, row)).collect()
}

/// Builds an entity from a row. `NULL` columns leave the field at its default.
fn map_row<E: Entity>(metadata: &EntityMetadata<E>, row: &SqliteRow) -> Result<E> {
    let mut entity = E::default();
    for field in metadata.columns() {
        let value = codec::decode(row, field.column(), field.kind()).map_err(|e| {
            Error::mapping(
                metadata.type_name(),
                format!("column `{}`: {}", field.column(), e),
            )
        })?;
        if !value.is_null() {
            field.set(&mut entity, value)?;
        }
    }
    Ok(entity)
}
