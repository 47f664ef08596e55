//! Inventory ledger: the only code allowed to change `products.stock`.
//!
//! A reservation locks the product row (`SELECT ... FOR UPDATE` on Postgres;
//! SQLite serializes writers on its own), re-checks the stock and applies a
//! guarded decrement that can never drive the counter below zero. Whatever
//! connection the caller passes in owns the effect: inside a transaction the
//! decrement is undone together with the rest of that transaction.

use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};
use uuid::Uuid;

use crate::{
    entity::products::{Column as ProdCol, Entity as Products},
    error::{AppError, AppResult},
};

/// A successful check-and-decrement, with the product as it was when reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub remaining_stock: i32,
}

pub async fn reserve_stock<C>(conn: &C, product_id: Uuid, quantity: i32) -> AppResult<Reservation>
where
    C: ConnectionTrait,
{
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product = Products::find_by_id(product_id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)?;

    if product.stock < quantity {
        return Err(AppError::InsufficientStock { product_id });
    }

    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Stock.gte(quantity))
        .exec(conn)
        .await?;

    // zero rows: someone else drained the row between read and update
    if result.rows_affected == 0 {
        return Err(AppError::InsufficientStock { product_id });
    }

    tracing::debug!(
        product_id = %product_id,
        quantity,
        remaining = product.stock - quantity,
        "stock reserved"
    );

    Ok(Reservation {
        product_id,
        product_name: product.name,
        unit_price: product.price,
        quantity,
        remaining_stock: product.stock - quantity,
    })
}
