//! # sqlx-entity-manager
//!
//! A lightweight entity manager for SQLx on SQLite: table mapping from typed
//! descriptors, generated CRUD SQL, additive schema sync and transactions that
//! nest across call chains.
//!
//! ## Features
//!
//! - **Typed Mapping**: Entities describe their columns once with typed getters and setters
//! - **Generated SQL**: Deterministic, parameterized statements for the CRUD surface
//! - **Additive Schema Sync**: Missing tables are created and missing columns added, nothing is dropped
//! - **Nested Transactions**: Calls sharing a `TransactionContext` join one transaction that commits once
//! - **Automatic Rollback**: Failures roll back before they are returned; dropped transactions roll back too
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx-entity-manager = "0.1"
//! tokio = { version = "1", features = ["macros", "rt-multi-thread"] }
//! ```
//!
//! ## Examples
//!
//! ### Mapping and CRUD
//!
//! ```rust,no_run
//! use sqlx_entity_manager::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i32,
//!     name: String,
//!     age: i32,
//! }
//!
//! impl Entity for User {
//!     fn describe() -> EntityDescriptor<Self> {
//!         EntityDescriptor::new()
//!             .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
//!             .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
//!             .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let em = EntityManager::connect(&DatabaseConfig::new("sqlite://app.db")).await?;
//! em.ensure_table::<User>().await?;
//!
//! let mut user = User { name: "Alice".into(), age: 30, ..Default::default() };
//! em.persist(&mut user).await?;
//! println!("Created user with ID: {}", user.id);
//!
//! user.age = 31;
//! em.update(&user).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Several Operations in One Transaction
//!
//! The `_in` variants take a [`TransactionContext`]. The first call binds a
//! transaction to it, later calls join it, and the outermost
//! `require_transaction` decides the outcome:
//!
//! ```rust,no_run
//! # use sqlx_entity_manager::prelude::*;
//! # #[derive(Debug, Default)] struct User { id: i32, name: String }
//! # impl Entity for User {
//! #     fn describe() -> EntityDescriptor<Self> {
//! #         EntityDescriptor::new()
//! #             .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
//! #             .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v))
//! #     }
//! # }
//! # async fn example(em: EntityManager) -> Result<()> {
//! let mut ctx = TransactionContext::new();
//! let inner = em.clone();
//! em.transactions()
//!     .require_transaction(&mut ctx, move |ctx| {
//!         Box::pin(async move {
//!             let mut alice = User { name: "Alice".into(), ..Default::default() };
//!             let mut bob = User { name: "Bob".into(), ..Default::default() };
//!             inner.persist_in(ctx, &mut alice).await?;
//!             inner.persist_in(ctx, &mut bob).await?;
//!             Ok(())
//!         })
//!     })
//!     .await?; // Both rows commit together
//! # Ok(())
//! # }
//! ```
//!
//! ### Raw SQL in a Managed Transaction
//!
//! ```rust,no_run
//! # use sqlx_entity_manager::prelude::*;
//! # async fn example(manager: TransactionManager) -> Result<()> {
//! let result: Result<()> = manager
//!     .with_transaction(|ctx| {
//!         Box::pin(async move {
//!             sqlx::query("INSERT INTO users (name) VALUES (?)")
//!                 .bind("Frank")
//!                 .execute(ctx.as_executor()?)
//!                 .await?;
//!
//!             // This will cause a rollback
//!             sqlx::query("SELECT * FROM non_existent_table")
//!                 .execute(ctx.as_executor()?)
//!                 .await?;
//!             Ok(())
//!         })
//!     })
//!     .await;
//!
//! assert!(matches!(result, Err(Error::Transaction(_))));
//! // The INSERT was rolled back, "Frank" is not in the database
//! # Ok(())
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **EntityMetadata**: Built once per type from its descriptor and cached by `TypeId`
//! 2. **QueryBuilder**: Renders SQL and the ordered parameter list from the metadata
//! 3. **TransactionContext**: Carries the chain's single transaction explicitly, no thread-local state
//! 4. **TypeCodec**: Converts between field values and SQLite storage (`codec` module)
//!
//! ## Limitations
//!
//! - SQLite only; there is no backend abstraction for MySQL or PostgreSQL
//! - Single-table CRUD; no joins or query DSL
//! - Schema sync never drops or alters existing columns
//! - Auto-increment identities are SQLite row ids without `AUTOINCREMENT`:
//!   once the row holding the highest id is deleted, the next insert may
//!   reuse that id, so keep no references to deleted rows
//! - Cancelling a transactional call never commits, but the rollback of a
//!   cancelled root happens when its context is next used or dropped
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod entity;
pub mod error;
pub mod executor;
pub mod manager;
pub mod metadata;
pub mod query;
pub mod schema;

#[cfg(feature = "anyhow")]
pub mod anyhow_compat;

pub use codec::{ConversionError, Scalar, ScalarKind, Value};
pub use config::DatabaseConfig;
pub use connection::ConnectionProvider;
pub use context::{Transaction, TransactionContext, TransactionState, TransactionStats};
pub use entity::{Entity, EntityDescriptor, FieldDef, Identity};
pub use error::{Error, Result};
pub use executor::TransactionManager;
pub use manager::{EntityManager, Pending};
pub use metadata::{ColumnConstraints, EntityMetadata, FieldRef};
pub use query::{GeneratedSql, QueryBuilder};
pub use schema::{EntitySet, SchemaManager, SchemaSync};

#[cfg(feature = "anyhow")]
pub use anyhow_compat::{require_transaction_anyhow, with_transaction_anyhow};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::context::TransactionContext;
    pub use crate::entity::{Entity, EntityDescriptor, FieldDef};
    pub use crate::error::{Error, Result};
    pub use crate::executor::TransactionManager;
    pub use crate::manager::EntityManager;
}
