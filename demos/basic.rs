use sqlx_entity_manager::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct User {
    id: i32,
    name: String,
    email: Option<String>,
    age: i32,
}

impl Entity for User {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new()
            .table("users")
            .field(FieldDef::new("id", |u: &User| u.id, |u: &mut User, v| u.id = v).auto_increment())
            .field(FieldDef::new("name", |u: &User| u.name.clone(), |u: &mut User, v| u.name = v).unique())
            .field(FieldDef::new("email", |u: &User| u.email.clone(), |u: &mut User, v| u.email = v))
            .field(FieldDef::new("age", |u: &User| u.age, |u: &mut User, v| u.age = v))
    }
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

    println!("=== Basic Entity Manager Example ===\n");

    // Example 1: Schema sync
    println!("1. Ensuring the users table...");
    let sync = em.ensure_table::<User>().await?;
    for statement in sync.statements() {
        println!("   applied:\n{}", statement);
    }
    println!("   ✓ Table ready\n");

    // Example 2: Persist with a generated key
    println!("2. Creating a user...");
    let mut alice = User {
        name: format!("alice-{}", std::process::id()),
        email: Some("alice@example.com".to_string()),
        age: 30,
        ..Default::default()
    };
    em.persist(&mut alice).await?;
    println!("   ✓ User created with ID: {}\n", alice.id);

    // Example 3: Find and update
    println!("3. Updating the user...");
    alice.age += 1;
    em.update(&alice).await?;
    if let Some(found) = em.find::<User>(alice.id).await? {
        println!("   ✓ Found {} (age {})\n", found.name, found.age);
    }

    // Example 4: A failing insert rolls back
    println!("4. Testing automatic rollback on error...");
    let mut duplicate = User {
        name: alice.name.clone(),
        ..Default::default()
    };
    match em.persist(&mut duplicate).await {
        Ok(_) => println!("   ✗ Should have failed!"),
        Err(e) => println!("   ✓ Transaction rolled back: {}\n", e),
    }

    // Example 5: Async operations
    println!("5. Persisting on worker tasks...");
    let pending: Vec<_> = (0..3)
        .map(|i| {
            em.persist_async(User {
                name: format!("worker-{}-{}", std::process::id(), i),
                age: 20 + i,
                ..Default::default()
            })
        })
        .collect();
    for task in pending {
        let user = task.await?;
        println!("   Created {} with ID {}", user.name, user.id);
    }
    println!();

    // Example 6: Delete
    println!("6. Deleting the user...");
    em.delete(&alice).await?;
    let gone = em.find::<User>(alice.id).await?.is_none();
    println!("   ✓ Deleted: {}\n", gone);

    println!("   Users left: {}", em.find_all::<User>().await?.len());
    println!("=== All examples completed successfully ===");

    em.close().await;
    Ok(())
}
