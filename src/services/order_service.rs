use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::OrderList,
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
            STATUS_PENDING,
        },
    },
    error::{AppError, AppResult},
    models::{Order, OrderLine},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::{cart_service, inventory_service, rollback},
    state::AppState,
};

/// Where a checkout attempt currently is. A failure in any stage aborts the
/// whole attempt and rolls the transaction back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStage {
    Started,
    Validated,
    Reserving,
    Materializing,
    Clearing,
    Committed,
}

impl CheckoutStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStage::Started => "started",
            CheckoutStage::Validated => "validated",
            CheckoutStage::Reserving => "reserving",
            CheckoutStage::Materializing => "materializing",
            CheckoutStage::Clearing => "clearing",
            CheckoutStage::Committed => "committed",
        }
    }
}

impl fmt::Display for CheckoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn the owner's cart into a `PENDING` order.
///
/// Everything happens in one transaction: the order shell, every stock
/// reservation, every order line and the cart clear either all commit or all
/// roll back. Lines are reserved in ascending product id order so concurrent
/// checkouts over overlapping products take their row locks in the same
/// order. If the returned future is dropped before completion the transaction
/// is dropped with it, which rolls it back.
pub async fn place_order(state: &AppState, owner_id: Uuid) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;
    let mut stage = CheckoutStage::Started;

    let order = match run_checkout(&txn, owner_id, &mut stage).await {
        Ok(order) => order,
        Err(err) => {
            tracing::warn!(
                owner_id = %owner_id,
                stage = %stage,
                error = %err,
                "checkout aborted"
            );
            rollback(txn).await;
            return Err(err);
        }
    };
    txn.commit().await?;
    stage = CheckoutStage::Committed;

    tracing::info!(
        owner_id = %owner_id,
        order_id = %order.id,
        lines = order.lines.len(),
        total = order.total_amount,
        stage = %stage,
        "checkout committed"
    );

    if let Err(err) = log_audit(
        &state.orm,
        Some(owner_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Checkout success", order, None))
}

async fn run_checkout(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    stage: &mut CheckoutStage,
) -> AppResult<Order> {
    // The cart row lock keeps a double-submitted checkout from ordering twice.
    let cart = cart_service::find_cart(txn, owner_id, true)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut lines = cart_service::cart_lines(txn, cart.id).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }
    lines.sort_by_key(|line| line.product_id);
    *stage = CheckoutStage::Validated;

    // provisional until commit
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        status: Set(STATUS_PENDING.to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(txn)
    .await?;

    let mut order_lines = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        *stage = CheckoutStage::Reserving;
        let reservation =
            inventory_service::reserve_stock(txn, line.product_id, line.quantity).await?;

        *stage = CheckoutStage::Materializing;
        let line_no = i32::try_from(index)
            .map_err(|_| AppError::BadRequest("cart has too many lines".to_string()))?;
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            line_no: Set(line_no),
            product_id: Set(reservation.product_id),
            product_name: Set(reservation.product_name),
            quantity: Set(reservation.quantity),
            price_at_purchase: Set(reservation.unit_price),
        }
        .insert(txn)
        .await?;

        order_lines.push(order_line_from_entity(item));
    }

    let placed = order_from_entity(order, order_lines)?;

    *stage = CheckoutStage::Clearing;
    cart_service::clear_lines(txn, cart.id).await?;

    Ok(placed)
}

/// Orders of one owner, newest first.
pub async fn list_orders(
    state: &AppState,
    owner_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Orders::find()
        .filter(OrderCol::OwnerId.eq(owner_id))
        .order_by_desc(OrderCol::CreatedAt)
        .order_by_desc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
    let mut lines_by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
    if !order_ids.is_empty() {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(order_ids))
            .order_by_asc(OrderItemCol::LineNo)
            .all(&state.orm)
            .await?;
        for item in items {
            lines_by_order
                .entry(item.order_id)
                .or_default()
                .push(order_line_from_entity(item));
        }
    }

    let items = orders
        .into_iter()
        .map(|order| {
            let lines = lines_by_order.remove(&order.id).unwrap_or_default();
            order_from_entity(order, lines)
        })
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    owner_id: Uuid,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::OwnerId.eq(owner_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let lines = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::LineNo)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_line_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        order_from_entity(order, lines)?,
        Some(Meta::empty()),
    ))
}

fn order_from_entity(model: OrderModel, lines: Vec<OrderLine>) -> AppResult<Order> {
    let total_amount = Order::total_of(&lines)
        .ok_or_else(|| AppError::BadRequest("order total is out of range".to_string()))?;
    Ok(Order {
        id: model.id,
        owner_id: model.owner_id,
        status: model.status,
        total_amount,
        lines,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn order_line_from_entity(model: OrderItemModel) -> OrderLine {
    OrderLine {
        id: model.id,
        line_no: model.line_no,
        product_id: model.product_id,
        product_name: model.product_name,
        quantity: model.quantity,
        price_at_purchase: model.price_at_purchase,
    }
}
