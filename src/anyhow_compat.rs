use crate::context::TransactionContext;
use crate::executor::TransactionManager;
use std::future::Future;
use std::pin::Pin;

/// Executes a function within a new transaction, using `anyhow::Error` for error handling.
///
/// A convenience wrapper around [`TransactionManager::with_transaction`] for
/// closures returning `anyhow::Result<T>`. Commits on success and rolls back
/// on error; the closure's error is returned unchanged.
///
/// # Examples
///
/// ```rust,no_run
/// use anyhow::Context;
/// use sqlx_entity_manager::{with_transaction_anyhow, TransactionManager};
///
/// # async fn example(manager: TransactionManager) -> anyhow::Result<()> {
/// with_transaction_anyhow(&manager, |ctx| {
///     Box::pin(async move {
///         sqlx::query("INSERT INTO users (name) VALUES (?)")
///             .bind("Alice")
///             .execute(ctx.as_executor()?)
///             .await
///             .context("inserting Alice")?;
///         Ok(())
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_transaction_anyhow<F, T>(manager: &TransactionManager, f: F) -> anyhow::Result<T>
where
    F: for<'a> FnOnce(
        &'a mut TransactionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>,
    T: Send,
{
    let mut ctx = TransactionContext::new();
    require_transaction_anyhow(manager, &mut ctx, f).await
}

/// [`TransactionManager::require_transaction`] for closures returning
/// `anyhow::Result<T>`. Joins the transaction already bound to `ctx`, if any.
pub async fn require_transaction_anyhow<F, T>(
    manager: &TransactionManager,
    ctx: &mut TransactionContext,
    f: F,
) -> anyhow::Result<T>
where
    F: for<'a> FnOnce(
        &'a mut TransactionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>,
    T: Send,
{
    let scope = manager.enter(ctx).await?;
    match f(ctx).await {
        Ok(value) => {
            manager.complete(ctx, scope, true).await?;
            Ok(value)
        }
        Err(e) => {
            // A root rollback failure is already logged by `complete`.
            let _ = manager.complete(ctx, scope, false).await;
            Err(e)
        }
    }
}
