#![allow(dead_code)]

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use storefront_checkout_api::{
    db::{create_orm_conn, run_migrations},
    entity::{
        OrderItems, Orders,
        order_items::Column as OrderItemCol,
        products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
    },
    services::cart_service,
    state::AppState,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";

static POSTGRES_MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Fresh in-memory database with the full schema.
pub async fn setup_state() -> anyhow::Result<AppState> {
    let orm = create_orm_conn("sqlite::memory:", 1).await?;
    run_migrations(&orm).await?;

    Ok(AppState {
        orm,
        jwt_secret: JWT_SECRET.to_string(),
    })
}

/// Postgres with a real connection pool, or `None` when `TEST_DATABASE_URL`
/// is not set. Tests sharing this database must scope their assertions to
/// the rows they created.
pub async fn setup_postgres_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL to run Postgres race tests.");
            return Ok(None);
        }
    };

    let orm = create_orm_conn(&database_url, 8).await?;
    // concurrent CREATE TABLE IF NOT EXISTS can still collide in Postgres
    POSTGRES_MIGRATED
        .get_or_try_init(|| run_migrations(&orm))
        .await?;

    Ok(Some(AppState {
        orm,
        jwt_secret: JWT_SECRET.to_string(),
    }))
}

pub async fn create_product(
    state: &AppState,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<ProductModel> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        description: Set(Some(format!("{name} for testing"))),
        price: Set(price),
        stock: Set(stock),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    Ok(product)
}

/// Same as `create_product` but with a caller-chosen id, for tests that
/// depend on the order lines are reserved in.
pub async fn create_product_with_id(
    state: &AppState,
    id: Uuid,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<ProductModel> {
    let product = ProductActive {
        id: Set(id),
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        stock: Set(stock),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    Ok(product)
}

pub async fn open_cart(state: &AppState, owner_id: Uuid) -> anyhow::Result<Uuid> {
    let cart = cart_service::open_cart(state, owner_id)
        .await?
        .data
        .expect("cart data");
    Ok(cart.id)
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok(product.stock)
}

pub async fn order_count(state: &AppState) -> anyhow::Result<u64> {
    Ok(Orders::find().count(&state.orm).await?)
}

pub async fn order_line_count(state: &AppState) -> anyhow::Result<u64> {
    Ok(OrderItems::find().count(&state.orm).await?)
}

pub async fn cart_line_count(state: &AppState, owner_id: Uuid) -> anyhow::Result<usize> {
    let cart = cart_service::get_cart(state, owner_id)
        .await?
        .data
        .expect("cart data");
    Ok(cart.lines.len())
}

/// Number of orders that contain the product.
pub async fn orders_with_product(state: &AppState, product_id: Uuid) -> anyhow::Result<u64> {
    Ok(OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(product_id))
        .count(&state.orm)
        .await?)
}
