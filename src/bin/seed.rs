use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_checkout_api::{
    config::AppConfig,
    db::{OrmConn, create_orm_conn, run_migrations},
    entity::products::{ActiveModel as ProductActive, Entity as Products},
    middleware::auth::issue_token,
    services::cart_service,
    state::AppState,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url, 1).await?;
    run_migrations(&orm).await?;
    seed_products(&orm).await?;

    let state = AppState {
        orm,
        jwt_secret: config.jwt_secret.clone(),
    };

    let owner_id = Uuid::new_v4();
    let cart = cart_service::open_cart(&state, owner_id).await?;
    let token = issue_token(owner_id, &config.jwt_secret, Duration::days(7))?;

    println!(
        "Seed completed. Owner ID: {owner_id}, Cart ID: {}",
        cart.data.map(|c| c.id.to_string()).unwrap_or_default()
    );
    println!("Bearer token: {token}");
    Ok(())
}

async fn seed_products(orm: &OrmConn) -> anyhow::Result<()> {
    // fixed ids keep re-runs from duplicating the catalog
    let products = vec![
        (1u128, "Axum Hoodie", "Warm hoodie for Rustaceans", 550000, 50),
        (2, "Ferris Mug", "Coffee tastes better with Ferris", 120000, 100),
        (3, "Rust Sticker Pack", "Decorate your laptop", 50000, 200),
        (4, "Limited Edition Crab Plush", "Only a handful were made", 4999, 1),
    ];

    for (seq, name, desc, price, stock) in products {
        let id = Uuid::from_u128(seq);
        if Products::find_by_id(id).one(orm).await?.is_some() {
            continue;
        }

        ProductActive {
            id: Set(id),
            name: Set(name.to_string()),
            description: Set(Some(desc.to_string())),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now().into()),
        }
        .insert(orm)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
