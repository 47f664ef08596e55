use anyhow::Result;
use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema, Statement,
};
use std::path::PathBuf;
use tokio::fs;

use crate::entity::{
    AuditLogs, CartItems, Carts, OrderItems, Orders, Products, cart_items, order_items, products,
};

pub type OrmConn = DatabaseConnection;

/// Create a SeaORM connection.
///
/// In-memory SQLite databases live inside a single connection, so the pool is
/// pinned to one connection for them regardless of `max_connections`.
pub async fn create_orm_conn(database_url: &str, max_connections: u32) -> Result<OrmConn> {
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        max_connections.max(1)
    };

    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(max_connections)
        .min_connections(1);

    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Bring the schema up to date.
///
/// Postgres runs the SQL files in `migrations/` in filename order. SQLite gets
/// its tables derived from the entity definitions.
pub async fn run_migrations(conn: &OrmConn) -> Result<()> {
    match conn.get_database_backend() {
        DbBackend::Sqlite => create_schema_from_entities(conn).await,
        _ => run_sql_migrations(conn).await,
    }
}

async fn run_sql_migrations(conn: &OrmConn) -> Result<()> {
    let mut entries = fs::read_dir("migrations").await?;
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let backend = conn.get_database_backend();
    for file in files {
        tracing::debug!(file = %file.display(), "applying migration");
        let sql = fs::read_to_string(&file).await?;
        // Postgres prepared statements cannot contain multiple commands,
        // so split the migration file and run each statement individually.
        for stmt in sql.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let statement = format!("{stmt};");
            conn.execute(Statement::from_string(backend, statement))
                .await?;
        }
    }

    Ok(())
}

async fn create_schema_from_entities(conn: &OrmConn) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    // Same constraints as migrations/0001_init.sql.
    let mut products_table = schema.create_table_from_entity(Products);
    products_table
        .check(Expr::col(products::Column::Price).gte(0))
        .check(Expr::col(products::Column::Stock).gte(0));

    let mut cart_items_table = schema.create_table_from_entity(CartItems);
    cart_items_table.check(Expr::col(cart_items::Column::Quantity).gt(0));

    let mut order_items_table = schema.create_table_from_entity(OrderItems);
    order_items_table.check(Expr::col(order_items::Column::Quantity).gt(0));

    let statements = [
        products_table,
        schema.create_table_from_entity(Carts),
        cart_items_table,
        schema.create_table_from_entity(Orders),
        order_items_table,
        schema.create_table_from_entity(AuditLogs),
    ];

    for mut stmt in statements {
        stmt.if_not_exists();
        conn.execute(backend.build(&stmt)).await?;
    }

    let indexes = [
        Index::create()
            .name("uq_cart_items_cart_product")
            .table(CartItems)
            .col(cart_items::Column::CartId)
            .col(cart_items::Column::ProductId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_order_items_order_line")
            .table(OrderItems)
            .col(order_items::Column::OrderId)
            .col(order_items::Column::LineNo)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];

    for index in indexes {
        conn.execute(backend.build(&index)).await?;
    }

    Ok(())
}
