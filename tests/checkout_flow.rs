mod common;

use std::future::poll_fn;
use std::task::Poll;

use sea_orm::{ActiveModelTrait, Set};
use storefront_checkout_api::{
    entity::products::ActiveModel as ProductActive,
    error::AppError,
    routes::params::Pagination,
    services::{cart_service, order_service},
};
use uuid::Uuid;

// Stock 10, add 3, checkout: one line at the current price, stock 7, cart empty.
#[tokio::test]
async fn checkout_reserves_stock_and_empties_cart() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let product = common::create_product(&state, "Axum Hoodie", 5500, 10).await?;

    cart_service::add_line(&state, cart_id, product.id, 3).await?;

    let order = order_service::place_order(&state, owner_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.owner_id, owner_id);
    assert_eq!(order.status, "PENDING");
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].product_id, product.id);
    assert_eq!(order.lines[0].product_name, "Axum Hoodie");
    assert_eq!(order.lines[0].quantity, 3);
    assert_eq!(order.lines[0].price_at_purchase, 5500);
    assert_eq!(order.total_amount, 16_500);

    assert_eq!(common::stock_of(&state, product.id).await?, 7);

    let cart = cart_service::get_cart(&state, owner_id)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.id, cart_id);
    assert!(cart.lines.is_empty());
    Ok(())
}

#[tokio::test]
async fn every_line_decrements_exactly_its_quantity() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let hoodie = common::create_product(&state, "Axum Hoodie", 5500, 10).await?;
    let mug = common::create_product(&state, "Ferris Mug", 1200, 4).await?;
    let stickers = common::create_product(&state, "Sticker Pack", 500, 50).await?;

    cart_service::add_line(&state, cart_id, hoodie.id, 1).await?;
    cart_service::add_line(&state, cart_id, mug.id, 4).await?;
    cart_service::add_line(&state, cart_id, stickers.id, 7).await?;
    cart_service::add_line(&state, cart_id, stickers.id, 3).await?;

    let order = order_service::place_order(&state, owner_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.lines.len(), 3);
    assert_eq!(order.total_amount, 5500 + 4 * 1200 + 10 * 500);

    // lines come out in ascending product id order, numbered from zero
    let product_ids: Vec<Uuid> = order.lines.iter().map(|l| l.product_id).collect();
    let mut sorted = product_ids.clone();
    sorted.sort();
    assert_eq!(product_ids, sorted);
    let line_nos: Vec<i32> = order.lines.iter().map(|l| l.line_no).collect();
    assert_eq!(line_nos, vec![0, 1, 2]);

    assert_eq!(common::stock_of(&state, hoodie.id).await?, 9);
    assert_eq!(common::stock_of(&state, mug.id).await?, 0);
    assert_eq!(common::stock_of(&state, stickers.id).await?, 40);
    Ok(())
}

#[tokio::test]
async fn empty_cart_creates_no_order() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    common::open_cart(&state, owner_id).await?;

    let err = order_service::place_order(&state, owner_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert_eq!(common::order_count(&state).await?, 0);
    Ok(())
}

#[tokio::test]
async fn owner_without_cart_is_not_found() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let err = order_service::place_order(&state, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    assert_eq!(common::order_count(&state).await?, 0);
    Ok(())
}

// The first line reserves fine, the second runs dry: nothing from the attempt
// may survive.
#[tokio::test]
async fn failure_on_a_later_line_rolls_back_everything() -> anyhow::Result<()> {
    let state = common::setup_state().await?;

    let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
    ids.sort();
    let plenty = common::create_product_with_id(&state, ids[0], "Axum Hoodie", 5500, 10).await?;
    let scarce = common::create_product_with_id(&state, ids[1], "Crab Plush", 4999, 1).await?;

    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    cart_service::add_line(&state, cart_id, plenty.id, 2).await?;
    cart_service::add_line(&state, cart_id, scarce.id, 1).await?;

    // someone else takes the last plush first
    let rival = Uuid::new_v4();
    let rival_cart = common::open_cart(&state, rival).await?;
    cart_service::add_line(&state, rival_cart, scarce.id, 1).await?;
    order_service::place_order(&state, rival).await?;
    assert_eq!(common::order_count(&state).await?, 1);
    assert_eq!(common::order_line_count(&state).await?, 1);

    let err = order_service::place_order(&state, owner_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { product_id } if product_id == scarce.id));

    assert_eq!(common::stock_of(&state, plenty.id).await?, 10);
    assert_eq!(common::stock_of(&state, scarce.id).await?, 0);
    assert_eq!(common::order_count(&state).await?, 1);
    assert_eq!(common::order_line_count(&state).await?, 1);

    let cart = cart_service::get_cart(&state, owner_id)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.lines.len(), 2);
    Ok(())
}

// Abandon the checkout after a growing number of polls, as a disconnecting
// client or a caller timeout would. Wherever the future is dropped, either the
// whole order exists or nothing of the attempt does.
#[tokio::test]
async fn dropped_checkout_is_all_or_nothing() -> anyhow::Result<()> {
    let mut abandoned = 0;

    for polls in 1..=48 {
        let state = common::setup_state().await?;
        let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let hoodie =
            common::create_product_with_id(&state, ids[0], "Axum Hoodie", 5500, 10).await?;
        let mug = common::create_product_with_id(&state, ids[1], "Ferris Mug", 1200, 4).await?;

        let owner_id = Uuid::new_v4();
        let cart_id = common::open_cart(&state, owner_id).await?;
        cart_service::add_line(&state, cart_id, hoodie.id, 3).await?;
        cart_service::add_line(&state, cart_id, mug.id, 2).await?;

        let mut checkout = Box::pin(order_service::place_order(&state, owner_id));
        let mut finished = None;
        for _ in 0..polls {
            if let Poll::Ready(result) =
                poll_fn(|cx| Poll::Ready(checkout.as_mut().poll(cx))).await
            {
                finished = Some(result);
                break;
            }
            tokio::task::yield_now().await;
        }
        drop(checkout);

        let snapshot = (
            common::order_count(&state).await?,
            common::order_line_count(&state).await?,
            common::stock_of(&state, hoodie.id).await?,
            common::stock_of(&state, mug.id).await?,
            common::cart_line_count(&state, owner_id).await?,
        );

        match finished {
            Some(result) => {
                result?;
                assert_eq!(snapshot, (1, 2, 7, 2, 0));
            }
            // the commit reached the database before the drop
            None if snapshot.0 == 1 => assert_eq!(snapshot, (1, 2, 7, 2, 0)),
            None => {
                abandoned += 1;
                assert_eq!(snapshot, (0, 0, 10, 4, 2), "dropped after {polls} polls");

                // the untouched cart still checks out
                order_service::place_order(&state, owner_id).await?;
                assert_eq!(common::stock_of(&state, hoodie.id).await?, 7);
                assert_eq!(common::stock_of(&state, mug.id).await?, 2);
                assert_eq!(common::cart_line_count(&state, owner_id).await?, 0);
            }
        }
    }

    assert!(abandoned > 0);
    Ok(())
}

// Prices near the top of the range: the total does not fit, so the checkout
// is refused and every reservation undone.
#[tokio::test]
async fn checkout_with_overflowing_total_changes_nothing() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let product = common::create_product(&state, "Gold Ferris", i64::MAX / 2, 5).await?;

    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    cart_service::add_line(&state, cart_id, product.id, 3).await?;

    let err = order_service::place_order(&state, owner_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert_eq!(common::stock_of(&state, product.id).await?, 5);
    assert_eq!(common::order_count(&state).await?, 0);
    assert_eq!(common::order_line_count(&state).await?, 0);
    assert_eq!(common::cart_line_count(&state, owner_id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn order_keeps_price_at_purchase_after_price_change() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let product = common::create_product(&state, "Ferris Mug", 1200, 10).await?;

    cart_service::add_line(&state, cart_id, product.id, 2).await?;
    let order = order_service::place_order(&state, owner_id)
        .await?
        .data
        .expect("order");

    let mut active: ProductActive = product.into();
    active.price = Set(9900);
    active.update(&state.orm).await?;

    let stored = order_service::get_order(&state, owner_id, order.id)
        .await?
        .data
        .expect("order");
    assert_eq!(stored.lines[0].price_at_purchase, 1200);
    assert_eq!(stored.total_amount, 2400);
    Ok(())
}

#[tokio::test]
async fn cart_is_reusable_after_checkout() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let product = common::create_product(&state, "Sticker Pack", 500, 10).await?;

    cart_service::add_line(&state, cart_id, product.id, 2).await?;
    order_service::place_order(&state, owner_id).await?;

    cart_service::add_line(&state, cart_id, product.id, 3).await?;
    let second = order_service::place_order(&state, owner_id)
        .await?
        .data
        .expect("order");
    assert_eq!(second.lines[0].quantity, 3);
    assert_eq!(common::stock_of(&state, product.id).await?, 5);

    let err = order_service::place_order(&state, owner_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    Ok(())
}

#[tokio::test]
async fn list_orders_is_newest_first_and_owner_scoped() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let product = common::create_product(&state, "Sticker Pack", 500, 100).await?;

    let mut placed = Vec::new();
    for quantity in 1..=3 {
        cart_service::add_line(&state, cart_id, product.id, quantity).await?;
        let order = order_service::place_order(&state, owner_id)
            .await?
            .data
            .expect("order");
        placed.push(order.id);
    }

    let other = Uuid::new_v4();
    let other_cart = common::open_cart(&state, other).await?;
    cart_service::add_line(&state, other_cart, product.id, 1).await?;
    order_service::place_order(&state, other).await?;

    let listed = order_service::list_orders(&state, owner_id, Pagination::default()).await?;
    let meta = listed.meta.clone().expect("meta");
    assert_eq!(meta.total, Some(3));
    let orders = listed.data.expect("orders").items;
    let listed_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    placed.reverse();
    assert_eq!(listed_ids, placed);
    assert_eq!(orders[0].lines[0].quantity, 3);
    assert!(orders.iter().all(|o| o.owner_id == owner_id));

    let page = order_service::list_orders(
        &state,
        owner_id,
        Pagination {
            page: Some(2),
            per_page: Some(2),
        },
    )
    .await?;
    let items = page.data.expect("orders").items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, placed[2]);
    Ok(())
}

#[tokio::test]
async fn get_order_of_another_owner_is_not_found() -> anyhow::Result<()> {
    let state = common::setup_state().await?;
    let owner_id = Uuid::new_v4();
    let cart_id = common::open_cart(&state, owner_id).await?;
    let product = common::create_product(&state, "Ferris Mug", 1200, 10).await?;
    cart_service::add_line(&state, cart_id, product.id, 1).await?;
    let order = order_service::place_order(&state, owner_id)
        .await?
        .data
        .expect("order");

    let err = order_service::get_order(&state, Uuid::new_v4(), order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    Ok(())
}
