use crate::connection::ConnectionProvider;
use crate::error::{Error, Result};
use sqlx::{Sqlite, SqliteConnection};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle of a [`Transaction`]. `Active` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Counters of driver-level transaction calls issued by one
/// [`TransactionManager`](crate::TransactionManager).
#[derive(Debug, Default)]
pub struct TransactionStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionStats {
    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }
}

/// One database transaction on a pooled connection.
///
/// This struct wraps SQLx's `Transaction` and tracks its state. Commit and
/// rollback are single-shot; the pooled connection goes back to the pool on
/// either terminal transition.
///
/// # Safety
///
/// If this struct is dropped while still active, the transaction is rolled
/// back. This prevents accidental commits when errors occur.
pub struct Transaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
    state: TransactionState,
    stats: Arc<TransactionStats>,
}

impl Transaction {
    /// Acquires a connection and issues `BEGIN` on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool has no connection to give and
    /// [`Error::Transaction`] if the transaction cannot be started.
    pub(crate) async fn begin(
        provider: &ConnectionProvider,
        stats: Arc<TransactionStats>,
    ) -> Result<Self> {
        let tx = provider.begin().await?;
        stats.begun.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("transaction started");
        Ok(Self {
            tx: Some(tx),
            state: TransactionState::Active,
            stats,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConsumed`] if the transaction is no longer
    /// active, and [`Error::Transaction`] if `COMMIT` fails, in which case the
    /// transaction counts as rolled back.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::AlreadyConsumed);
        }
        let tx = self.tx.take().ok_or(Error::AlreadyConsumed)?;
        match tx.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("transaction committed");
                Ok(())
            }
            Err(e) => {
                // SQLx rolls the dropped transaction back before the
                // connection is reused.
                self.state = TransactionState::RolledBack;
                self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
                Err(Error::Transaction(e))
            }
        }
    }

    /// Rolls the transaction back. Does nothing once the transaction has
    /// reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if `ROLLBACK` fails. The transaction is
    /// still considered rolled back.
    pub async fn rollback(&mut self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.state = TransactionState::RolledBack;
        self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
        match self.tx.take() {
            Some(tx) => {
                tx.rollback().await.map_err(Error::Transaction)?;
                tracing::debug!("transaction rolled back");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Returns the underlying connection for use as an Executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConsumed`] after commit or rollback.
    pub fn as_executor(&mut self) -> Result<&mut SqliteConnection> {
        self.tx.as_deref_mut().ok_or(Error::AlreadyConsumed)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    /// Counts an unfinished transaction as rolled back.
    ///
    /// SQLx's `Transaction` issues the rollback itself when dropped open.
    fn drop(&mut self) {
        if self.state == TransactionState::Active && self.tx.is_some() {
            self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("transaction dropped while active, rolling back");
        }
    }
}

/// The transaction scope of one call chain.
///
/// Holds at most one live [`Transaction`]. The first
/// [`require_transaction`](crate::TransactionManager::require_transaction)
/// on an empty context binds a transaction to it; nested calls that receive
/// the same context join that transaction, and only the outermost call
/// commits or rolls back. Contexts are never shared between tasks: create a
/// new one per independent unit of work.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx_entity_manager::{TransactionContext, TransactionManager};
///
/// # async fn example(manager: TransactionManager) -> sqlx_entity_manager::Result<()> {
/// let mut ctx = TransactionContext::new();
/// assert!(ctx.current().is_err());
///
/// manager
///     .require_transaction(&mut ctx, |ctx| {
///         Box::pin(async move {
///             sqlx::query("DELETE FROM sessions").execute(ctx.as_executor()?).await?;
///             Ok(())
///         })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TransactionContext {
    tx: Option<Transaction>,
    depth: usize,
    rollback_only: bool,
    cancelled: Arc<Cancelled>,
}

/// Scopes of the current chain whose future was dropped before settling.
#[derive(Debug, Default)]
struct Cancelled {
    root: AtomicBool,
    nested: AtomicUsize,
}

impl Cancelled {
    fn root(&self) -> bool {
        self.root.load(Ordering::Acquire)
    }

    fn nested(&self) -> usize {
        self.nested.load(Ordering::Acquire)
    }
}

/// One entry of a call into a context's transaction.
///
/// Must be handed back through `finish` once the call has settled. A scope
/// dropped unfinished (its future was cancelled) is recorded on the context:
/// a cancelled root discards the whole transaction, a cancelled nested call
/// marks the chain rollback-only.
#[derive(Debug)]
#[must_use]
pub(crate) struct Scope {
    root: bool,
    cancelled: Arc<Cancelled>,
    finished: bool,
}

impl Scope {
    /// This call began the transaction and decides its outcome.
    pub(crate) fn is_root(&self) -> bool {
        self.root
    }

    pub(crate) fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.root {
            self.cancelled.root.store(true, Ordering::Release);
        } else {
            self.cancelled.nested.fetch_add(1, Ordering::AcqRel);
        }
        tracing::warn!(root = self.root, "transaction scope cancelled before it settled");
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction is bound to this context.
    pub fn is_active(&self) -> bool {
        self.tx.is_some() && !self.cancelled.root()
    }

    /// Number of `require_transaction` calls currently running on this context.
    pub fn depth(&self) -> usize {
        if self.cancelled.root() {
            return 0;
        }
        self.depth.saturating_sub(self.cancelled.nested())
    }

    pub fn is_rollback_only(&self) -> bool {
        self.is_active() && (self.rollback_only || self.cancelled.nested() > 0)
    }

    /// Forces the chain root to roll back instead of committing.
    pub fn set_rollback_only(&mut self) {
        self.reclaim();
        if self.is_active() {
            self.rollback_only = true;
        }
    }

    /// Returns the transaction bound to this context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveTransaction`] when no transaction is bound.
    pub fn current(&mut self) -> Result<&mut Transaction> {
        self.reclaim();
        self.tx.as_mut().ok_or(Error::NoActiveTransaction)
    }

    /// Returns the bound transaction's connection for use as an Executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveTransaction`] when no transaction is bound.
    pub fn as_executor(&mut self) -> Result<&mut SqliteConnection> {
        self.current()?.as_executor()
    }

    pub(crate) fn connection(&mut self) -> Option<&mut SqliteConnection> {
        self.reclaim();
        self.tx.as_mut().and_then(|tx| tx.as_executor().ok())
    }

    /// Applies cancellations recorded by dropped scopes.
    ///
    /// A cancelled root leaves its transaction behind with nobody to settle
    /// it; dropping it here rolls it back and returns the connection.
    pub(crate) fn reclaim(&mut self) {
        if self.cancelled.root.swap(false, Ordering::AcqRel) {
            self.cancelled.nested.store(0, Ordering::Release);
            self.depth = 0;
            self.rollback_only = false;
            if self.tx.take().is_some() {
                tracing::warn!("discarded the transaction of a cancelled chain");
            }
            return;
        }
        let nested = self.cancelled.nested.swap(0, Ordering::AcqRel);
        if nested > 0 {
            self.depth = self.depth.saturating_sub(nested);
            if self.tx.is_some() {
                self.rollback_only = true;
            }
        }
    }

    pub(crate) fn bind(&mut self, tx: Transaction) -> Scope {
        self.reclaim();
        self.tx = Some(tx);
        self.depth = 1;
        self.rollback_only = false;
        self.cancelled = Arc::new(Cancelled::default());
        self.scope(true)
    }

    pub(crate) fn join(&mut self) -> Scope {
        self.reclaim();
        self.depth += 1;
        self.scope(false)
    }

    fn scope(&self, root: bool) -> Scope {
        Scope {
            root,
            cancelled: Arc::clone(&self.cancelled),
            finished: false,
        }
    }

    pub(crate) fn leave(&mut self, failed: bool) {
        self.reclaim();
        self.depth = self.depth.saturating_sub(1);
        if failed {
            self.rollback_only = true;
        }
    }

    /// Unbinds the transaction, returning it with the rollback-only flag.
    pub(crate) fn release(&mut self) -> Option<(Transaction, bool)> {
        self.reclaim();
        let rollback_only = std::mem::take(&mut self.rollback_only);
        self.depth = 0;
        self.tx.take().map(|tx| (tx, rollback_only))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_transaction() {
        let mut ctx = TransactionContext::new();
        assert!(!ctx.is_active());
        assert_eq!(ctx.depth(), 0);
        assert!(matches!(ctx.current(), Err(Error::NoActiveTransaction)));
        assert!(matches!(ctx.as_executor(), Err(Error::NoActiveTransaction)));
        assert!(ctx.connection().is_none());
        assert!(ctx.release().is_none());
    }

    #[test]
    fn rollback_only_needs_a_bound_transaction() {
        let mut ctx = TransactionContext::new();
        ctx.set_rollback_only();
        assert!(!ctx.is_rollback_only());
    }

    #[test]
    fn finished_scopes_leave_no_mark() {
        let mut ctx = TransactionContext::new();
        let scope = ctx.join();
        assert!(!scope.is_root());
        assert_eq!(ctx.depth(), 1);
        scope.finish();
        ctx.leave(false);
        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.rollback_only);
    }

    #[test]
    fn dropped_nested_scope_unwinds_its_depth() {
        let mut ctx = TransactionContext::new();
        ctx.depth = 1;
        drop(ctx.join());
        assert_eq!(ctx.depth(), 1);
        ctx.reclaim();
        assert_eq!(ctx.depth, 1);
        assert_eq!(ctx.cancelled.nested(), 0);
    }
}
