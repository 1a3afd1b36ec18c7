//! HTTP server implementing the estuary durable-streams protocol (spec §6).

pub mod auth;
pub mod error;
pub mod estuary_routes;
pub mod headers;
pub mod sse;
pub mod state;
pub mod stream_routes;
pub mod ws;

use axum::http::Method;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use state::{AppState, ServerOptions};

/// Build the full router: stream CRUD, the live-read/WebSocket path, and
/// the estuary subscribe/lifecycle routes, all under `/v1`.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/v1/stream/{project}/{stream}", put(stream_routes::create))
        .route("/v1/stream/{project}/{stream}", get(stream_routes::read))
        .route("/v1/stream/{project}/{stream}", post(stream_routes::append))
        .route("/v1/stream/{project}/{stream}", axum::routing::head(stream_routes::head))
        .route("/v1/stream/{project}/{stream}", delete(stream_routes::delete))
        .route("/v1/stream/{project}/{stream}/ws", get(ws::upgrade))
        .route(
            "/v1/estuary/subscribe/{project}/{stream}",
            post(estuary_routes::subscribe),
        )
        .route(
            "/v1/estuary/subscribe/{project}/{stream}",
            delete(estuary_routes::unsubscribe),
        )
        .route("/v1/estuary/{project}/{estuary}", get(estuary_routes::get))
        .route("/v1/estuary/{project}/{estuary}", post(estuary_routes::touch))
        .route("/v1/estuary/{project}/{estuary}", delete(estuary_routes::delete))
        .layer(middleware::from_fn(auth::stub_identity))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the router, blocking until the listener is closed.
pub async fn start_server(state: AppState) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.options.host, state.options.port);
    let router = create_router(state);

    info!(%addr, "starting estuary server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use estuary_edge::{EdgeCache, InFlightCoalescer};
    use estuary_engine::{EngineConfig, EngineRegistry, HotStorageMode};
    use estuary_fanout::{EstuaryIndex, EstuaryLifecycleManager, FanoutEngine, InMemoryQueue, SubscriberRegistry};
    use estuary_storage::{InMemoryObjectStore, InMemoryRegistry};
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> AppState {
        let metadata = Arc::new(InMemoryRegistry::new());
        let engine = Arc::new(EngineRegistry::new(
            Arc::new(InMemoryObjectStore::new()),
            metadata.clone(),
            EngineConfig::default(),
            HotStorageMode::InMemory,
        ));
        let subscribers = Arc::new(SubscriberRegistry::new(metadata.clone()));
        let estuary_index = Arc::new(EstuaryIndex::new(metadata));
        let fanout = Arc::new(FanoutEngine::new(
            engine.clone(),
            subscribers.clone(),
            Arc::new(InMemoryQueue::new()),
        ));
        let lifecycle = Arc::new(EstuaryLifecycleManager::new(
            engine.clone(),
            subscribers.clone(),
            estuary_index.clone(),
        ));

        AppState {
            engine,
            subscribers,
            estuary_index,
            fanout,
            lifecycle,
            edge_cache: Arc::new(EdgeCache::new()),
            coalescer: Arc::new(InFlightCoalescer::new()),
            options: ServerOptions::default(),
        }
    }

    #[tokio::test]
    async fn create_then_append_then_read_round_trips() {
        let app = create_router(test_state());

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v1/stream/acme/orders")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);

        let append = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/stream/acme/orders")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(append.status(), StatusCode::OK);

        let read = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/stream/acme/orders?offset=00000000000000000000000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reading_a_missing_stream_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/stream/acme/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subscribe_then_get_estuary_round_trips() {
        let app = create_router(test_state());

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v1/stream/acme/orders")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let subscribe = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/estuary/subscribe/acme/orders")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"estuaryId":"e1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(subscribe.status(), StatusCode::OK);

        let get = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/estuary/acme/e1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
    }
}
