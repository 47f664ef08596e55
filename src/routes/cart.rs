use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use crate::{
    dto::cart::AddToCartRequest,
    error::AppResult,
    middleware::auth::AuthOwner,
    models::{Cart, CartLine},
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(open_cart))
        .route("/items", post(add_to_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart of the current owner", body = ApiResponse<Cart>),
        (status = 404, description = "Owner has no cart"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    owner: AuthOwner,
) -> AppResult<Json<ApiResponse<Cart>>> {
    Ok(Json(cart_service::get_cart(&state, owner.owner_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart created, or the existing cart", body = ApiResponse<Cart>),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn open_cart(
    State(state): State<AppState>,
    owner: AuthOwner,
) -> AppResult<Json<ApiResponse<Cart>>> {
    Ok(Json(cart_service::open_cart(&state, owner.owner_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Line added or merged", body = ApiResponse<CartLine>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Cart or product not found"),
        (status = 409, description = "Out of stock or insufficient stock"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    owner: AuthOwner,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartLine>>> {
    let cart_id = cart_service::cart_id_for_owner(&state, owner.owner_id).await?;
    let line =
        cart_service::add_line(&state, cart_id, payload.product_id, payload.quantity).await?;
    Ok(Json(line))
}
