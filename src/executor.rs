use crate::connection::ConnectionProvider;
use crate::context::{Scope, Transaction, TransactionContext, TransactionStats};
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Coordinates transactions for call chains that share a [`TransactionContext`].
///
/// Exactly one transaction is live per chain. The outermost
/// [`require_transaction`](Self::require_transaction) begins it and commits
/// or rolls it back; nested calls join it without touching the connection.
///
/// Cloning is cheap: clones share the pool and the [`TransactionStats`].
#[derive(Debug, Clone)]
pub struct TransactionManager {
    provider: ConnectionProvider,
    stats: Arc<TransactionStats>,
}

impl TransactionManager {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self {
            provider,
            stats: Arc::new(TransactionStats::default()),
        }
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    /// Begins a standalone transaction that is not bound to any context.
    ///
    /// The caller owns the outcome: call [`Transaction::commit`] or
    /// [`Transaction::rollback`], or drop it to roll back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] or [`Error::Transaction`] if the
    /// transaction cannot be started.
    pub async fn begin(&self) -> Result<Transaction> {
        Transaction::begin(&self.provider, Arc::clone(&self.stats)).await
    }

    /// Executes a function within the chain's transaction.
    ///
    /// - With no transaction bound to `ctx`, begins one, runs `f`, then
    ///   commits on success or rolls back on error. The context is empty again
    ///   afterwards.
    /// - With a transaction already bound, runs `f` on it. No commit or
    ///   rollback happens here; an error marks the whole chain rollback-only.
    ///
    /// # Errors
    ///
    /// At the chain root, a raw [`Error::Database`] returned by `f` is reported
    /// as [`Error::Transaction`]; other errors are returned unchanged after the
    /// rollback. If `f` succeeded but a nested call failed earlier, the
    /// transaction is rolled back and [`Error::RollbackOnly`] is returned.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future before it completes never commits. A
    /// cancelled root call leaves `ctx` empty again and its transaction is
    /// rolled back; a cancelled nested call marks the chain rollback-only.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx_entity_manager::{TransactionContext, TransactionManager};
    ///
    /// # async fn example(manager: TransactionManager) -> sqlx_entity_manager::Result<()> {
    /// let mut ctx = TransactionContext::new();
    /// let inner = manager.clone();
    /// manager
    ///     .require_transaction(&mut ctx, move |ctx| {
    ///         Box::pin(async move {
    ///             sqlx::query("INSERT INTO accounts (owner) VALUES (?)")
    ///                 .bind("Alice")
    ///                 .execute(ctx.as_executor()?)
    ///                 .await?;
    ///
    ///             // Joins the outer transaction; nothing is committed yet.
    ///             inner
    ///                 .require_transaction(ctx, |ctx| {
    ///                     Box::pin(async move {
    ///                         sqlx::query("INSERT INTO audit (action) VALUES (?)")
    ///                             .bind("account opened")
    ///                             .execute(ctx.as_executor()?)
    ///                             .await?;
    ///                         Ok(())
    ///                     })
    ///                 })
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn require_transaction<F, T>(&self, ctx: &mut TransactionContext, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut TransactionContext,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
        T: Send,
    {
        let scope = self.enter(ctx).await?;
        let outcome = f(ctx).await;
        self.exit(ctx, scope, outcome).await
    }

    /// Runs `f` in a new transaction on a fresh context.
    ///
    /// # Errors
    ///
    /// Same as [`require_transaction`](Self::require_transaction).
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx_entity_manager::TransactionManager;
    ///
    /// # async fn example(manager: TransactionManager) -> sqlx_entity_manager::Result<()> {
    /// let deleted = manager
    ///     .with_transaction(|ctx| {
    ///         Box::pin(async move {
    ///             let done = sqlx::query("DELETE FROM sessions WHERE expired = 1")
    ///                 .execute(ctx.as_executor()?)
    ///                 .await?;
    ///             Ok(done.rows_affected())
    ///         })
    ///     })
    ///     .await?;
    /// println!("removed {deleted} sessions");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut TransactionContext,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
        T: Send,
    {
        let mut ctx = TransactionContext::new();
        self.require_transaction(&mut ctx, f).await
    }

    /// Returns the transaction bound to `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveTransaction`] when no transaction is bound.
    pub fn current_transaction<'c>(
        &self,
        ctx: &'c mut TransactionContext,
    ) -> Result<&'c mut Transaction> {
        ctx.current()
    }

    pub(crate) async fn enter(&self, ctx: &mut TransactionContext) -> Result<Scope> {
        ctx.reclaim();
        if ctx.is_active() {
            let scope = ctx.join();
            tracing::trace!(depth = ctx.depth(), "joined transaction");
            return Ok(scope);
        }
        let tx = self.begin().await?;
        Ok(ctx.bind(tx))
    }

    pub(crate) async fn exit<T>(
        &self,
        ctx: &mut TransactionContext,
        scope: Scope,
        outcome: Result<T>,
    ) -> Result<T> {
        let root = scope.is_root();
        let settled = self.complete(ctx, scope, outcome.is_ok()).await;
        match outcome {
            Ok(value) => settled.map(|()| value),
            Err(e) if root => Err(e.into_transaction_failure()),
            Err(e) => Err(e),
        }
    }

    /// Settles `scope` after its body ran.
    ///
    /// A failed root rollback is logged and not returned, so the body's own
    /// error reaches the caller. The transaction leaves the context before
    /// the first await, so cancelling this step still rolls back.
    pub(crate) async fn complete(
        &self,
        ctx: &mut TransactionContext,
        scope: Scope,
        succeeded: bool,
    ) -> Result<()> {
        let root = scope.is_root();
        scope.finish();
        if !root {
            ctx.leave(!succeeded);
            return Ok(());
        }

        let (mut tx, rollback_only) = ctx.release().ok_or(Error::NoActiveTransaction)?;
        if succeeded && !rollback_only {
            return tx.commit().await;
        }
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
        if succeeded {
            tracing::warn!("transaction was marked rollback-only, rolled back");
            return Err(Error::RollbackOnly);
        }
        Ok(())
    }
}
