use sqlx_entity_manager::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

impl Entity for Account {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("accounts")
            .field(FieldDef::new("id", |a: &Account| a.id, |a: &mut Account, v| a.id = v).auto_increment())
            .field(FieldDef::new("owner", |a: &Account| a.owner.clone(), |a: &mut Account, v| a.owner = v).not_null())
            .field(FieldDef::new("balance", |a: &Account| a.balance, |a: &mut Account, v| a.balance = v))
    }
}

#[derive(Debug, Default)]
struct AuditEntry {
    id: i64,
    account_id: i64,
    action: String,
}

impl Entity for AuditEntry {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("audit_log")
            .field(FieldDef::new("id", |a: &AuditEntry| a.id, |a: &mut AuditEntry, v| a.id = v).auto_increment())
            .field(FieldDef::new("account_id", |a: &AuditEntry| a.account_id, |a: &mut AuditEntry, v| a.account_id = v))
            .field(FieldDef::new("action", |a: &AuditEntry| a.action.clone(), |a: &mut AuditEntry, v| a.action = v))
    }
}

/// Opens an account and writes its audit entry, joining the caller's transaction.
async fn open_account(
    em: &EntityManager,
    ctx: &mut TransactionContext,
    owner: &str,
) -> Result<i64> {
    let mut account = Account {
        owner: owner.to_string(),
        balance: 100,
        ..Default::default()
    };
    em.persist_in(ctx, &mut account).await?;

    let mut entry = AuditEntry {
        account_id: account.id,
        action: "opened".to_string(),
        ..Default::default()
    };
    em.persist_in(ctx, &mut entry).await?;
    Ok(account.id)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://demo.db".to_string());
    let em = EntityManager::connect(&DatabaseConfig::new(database_url)).await?;
    em.ensure_table::<Account>().await?;
    em.ensure_table::<AuditEntry>().await?;

    println!("=== Nested Transaction Example ===\n");

    // Example 1: Nested calls join one transaction
    println!("1. Nested calls - both succeed...");
    let inner = em.clone();
    let id = em
        .transactions()
        .with_transaction(move |ctx| {
            Box::pin(async move {
                let id = open_account(&inner, ctx, "David").await?;
                println!("   Depth inside the chain: {}", ctx.depth());
                Ok(id)
            })
        })
        .await?;
    println!("   ✓ Account {} and audit entry committed together\n", id);

    // Example 2: A swallowed nested failure still rolls the chain back
    println!("2. Nested call fails, outer swallows the error...");
    let inner = em.clone();
    let result = em
        .transactions()
        .with_transaction(move |ctx| {
            Box::pin(async move {
                open_account(&inner, ctx, "Eve").await?;

                // Violates NOT NULL on owner
                let nested = inner
                    .transactions()
                    .require_transaction(ctx, |ctx| {
                        Box::pin(async move {
                            sqlx::query("INSERT INTO accounts (owner, balance) VALUES (NULL, 0)")
                                .execute(ctx.as_executor()?)
                                .await?;
                            Ok(())
                        })
                    })
                    .await;
                if let Err(e) = nested {
                    println!("   Nested: Failed ({})", e);
                }
                Ok(())
            })
        })
        .await;
    match result {
        Ok(_) => println!("   ✗ Should have rolled back!"),
        Err(e) => println!("   ✓ Whole chain rolled back: {}\n", e),
    }

    // Example 3: Statistics
    let stats = em.transactions().stats();
    println!(
        "3. Transactions begun: {}, committed: {}, rolled back: {}\n",
        stats.begun(),
        stats.committed(),
        stats.rolled_back()
    );

    println!("=== All nested transaction examples completed ===");

    em.close().await;
    Ok(())
}
