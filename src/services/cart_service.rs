use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{
            ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel,
        },
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    models::{Cart, CartLine},
    response::ApiResponse,
    services::rollback,
    state::AppState,
};

/// Create the owner's cart, or hand back the one that already exists.
///
/// Called once when an owner registers; calling it again is harmless.
pub async fn open_cart(state: &AppState, owner_id: Uuid) -> AppResult<ApiResponse<Cart>> {
    if let Some(cart) = find_cart(&state.orm, owner_id, false).await? {
        let cart = load_cart(&state.orm, cart).await?;
        return Ok(ApiResponse::success("Cart", cart, None));
    }

    let inserted = CartActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await;

    let cart = match inserted {
        Ok(cart) => {
            if let Err(err) = log_audit(
                &state.orm,
                Some(owner_id),
                "cart_open",
                Some("carts"),
                Some(serde_json::json!({ "cart_id": cart.id })),
            )
            .await
            {
                tracing::warn!(error = %err, "audit log failed");
            }
            cart
        }
        // a concurrent open for the same owner won the insert
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            find_cart(&state.orm, owner_id, false)
                .await?
                .ok_or(AppError::NotFound)?
        }
        Err(err) => return Err(err.into()),
    };

    Ok(ApiResponse::success(
        "Cart opened",
        load_cart(&state.orm, cart).await?,
        None,
    ))
}

pub async fn get_cart(state: &AppState, owner_id: Uuid) -> AppResult<ApiResponse<Cart>> {
    let cart = find_cart(&state.orm, owner_id, false)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success("OK", load_cart(&state.orm, cart).await?, None))
}

pub async fn cart_id_for_owner(state: &AppState, owner_id: Uuid) -> AppResult<Uuid> {
    find_cart(&state.orm, owner_id, false)
        .await?
        .map(|cart| cart.id)
        .ok_or(AppError::NotFound)
}

/// Add `quantity` of a product to a cart, merging with an existing line.
///
/// Stock is only checked here, never taken: the resulting line quantity must
/// be covered by the product's current stock. Reservation happens at checkout.
pub async fn add_line(
    state: &AppState,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<ApiResponse<CartLine>> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    let (owner_id, line) = match merge_line(&txn, cart_id, product_id, quantity).await {
        Ok(merged) => merged,
        Err(err) => {
            rollback(txn).await;
            return Err(err);
        }
    };
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.orm,
        Some(owner_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({
            "cart_id": cart_id,
            "product_id": product_id,
            "quantity": quantity,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", line, None))
}

async fn merge_line(
    txn: &DatabaseTransaction,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<(Uuid, CartLine)> {
    // Lock the cart so concurrent adds for one owner merge instead of racing.
    let cart = Carts::find_by_id(cart_id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let product = Products::find_by_id(product_id)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .one(txn)
        .await?;

    let wanted = existing
        .as_ref()
        .map_or(0, |line| line.quantity)
        .checked_add(quantity)
        .ok_or_else(|| AppError::BadRequest("quantity is too large".to_string()))?;

    ensure_available(&product, wanted)?;

    let line = match existing {
        Some(line) => {
            let mut active: CartItemActive = line.into();
            active.quantity = Set(wanted);
            active.update(txn).await?
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(wanted),
                created_at: Set(Utc::now().into()),
            }
            .insert(txn)
            .await?
        }
    };

    Ok((cart.owner_id, cart_line(line, &product)))
}

fn ensure_available(product: &ProductModel, wanted: i32) -> AppResult<()> {
    if product.stock <= 0 {
        return Err(AppError::OutOfStock {
            product_id: product.id,
        });
    }
    if product.stock < wanted {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
        });
    }
    Ok(())
}

/// Look up an owner's cart, optionally taking a row lock on it.
pub(crate) async fn find_cart<C>(
    conn: &C,
    owner_id: Uuid,
    for_update: bool,
) -> AppResult<Option<CartModel>>
where
    C: ConnectionTrait,
{
    let mut finder = Carts::find().filter(CartCol::OwnerId.eq(owner_id));
    if for_update {
        finder = finder.lock(LockType::Update);
    }
    Ok(finder.one(conn).await?)
}

/// Lines of a cart in ascending product id order.
pub(crate) async fn cart_lines<C>(conn: &C, cart_id: Uuid) -> AppResult<Vec<CartItemModel>>
where
    C: ConnectionTrait,
{
    Ok(CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::ProductId)
        .all(conn)
        .await?)
}

/// Bulk delete every line of a cart. Returns how many lines were removed.
pub(crate) async fn clear_lines<C>(conn: &C, cart_id: Uuid) -> AppResult<u64>
where
    C: ConnectionTrait,
{
    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn load_cart<C>(conn: &C, cart: CartModel) -> AppResult<Cart>
where
    C: ConnectionTrait,
{
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .order_by_asc(CartItemCol::ProductId)
        .all(conn)
        .await?;

    let lines = rows
        .into_iter()
        .map(|(line, product)| match product {
            Some(product) => Ok(cart_line(line, &product)),
            None => Err(AppError::Internal(anyhow::anyhow!(
                "cart line {} references a missing product",
                line.id
            ))),
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Cart {
        id: cart.id,
        owner_id: cart.owner_id,
        lines,
        created_at: cart.created_at.with_timezone(&Utc),
    })
}

fn cart_line(line: CartItemModel, product: &ProductModel) -> CartLine {
    CartLine {
        id: line.id,
        cart_id: line.cart_id,
        product_id: line.product_id,
        product_name: product.name.clone(),
        unit_price: product.price,
        quantity: line.quantity,
    }
}
