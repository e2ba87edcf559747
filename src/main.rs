mod models;
mod handlers;
mod services;
mod query;
mod config;
mod errors;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{
    config::Config,
    services::StoreService,
};

#[tokio::main]
async fn main() {
    // Initialize basic tracing subscriber
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::load().expect("Failed to load configuration");
    let config_state = config.clone();

    // Initialize Redis client
    let redis_client = if config.redis.sentinel_enabled {
        Arc::new(redis::Client::open(
            config.redis.sentinel_url.expect("Sentinel URL not configured")
        ).expect("Failed to connect to Redis Sentinel"))
    } else {
        Arc::new(redis::Client::open(config.redis.url)
            .expect("Failed to connect to Redis"))
    };

    // Initialize the document store
    let store = StoreService::new(redis_client.clone());

    // Create router with all routes
    let app = Router::new()
        // Task routes
        .route("/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route(
            "/tasks/:id",
            get(handlers::get_task).put(handlers::replace_task).delete(handlers::delete_task),
        )
        // User routes
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/users/:id",
            get(handlers::get_user).put(handlers::replace_user).delete(handlers::delete_user),
        )
        // Request body limits from config
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.http.max_body_size))
        // Add state
        .with_state((store, config_state));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", config.server.host, config.server.port)
    )
    .await
    .expect("Failed to bind server");

    tracing::info!("Server running on {}:{}", config.server.host, config.server.port);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("Failed to start server");
}
