//! Administrative API over the revision store and registry.
//!
//! # Data Flow
//! ```text
//! filter-cli / operator
//!     → Bearer auth (auth.rs)
//!     → handlers.rs → RevisionStore (add / activate / deactivate / canary)
//!     → store change event → StorePoller picks it up
//!
//! Read-only views:
//!     → registry summary (current snapshot), runtime toggles
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::chain::RuntimeToggles;
use crate::registry::FilterRegistry;
use crate::store::RevisionStore;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn RevisionStore>,
    pub registry: Arc<FilterRegistry>,
    pub toggles: Arc<RuntimeToggles>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/filters", get(list_filters).post(add_revision))
        .route("/admin/filters/{id}/revisions", get(list_revisions))
        .route("/admin/filters/{id}/revisions/{revision}", get(get_revision))
        .route("/admin/filters/{id}/revisions/{revision}/activate", post(activate))
        .route("/admin/filters/{id}/revisions/{revision}/deactivate", post(deactivate))
        .route("/admin/filters/{id}/revisions/{revision}/canary", post(mark_canary))
        .route("/admin/filters/{id}/latest", get(get_latest))
        .route("/admin/filters/{id}/active", get(get_active))
        .route("/admin/active", get(list_active))
        .route("/admin/canaries", get(list_canaries))
        .route("/admin/registry", get(get_registry))
        .route("/admin/toggles", get(get_toggles))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRevisionStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        setup_admin_router(AdminState {
            store: Arc::new(InMemoryRevisionStore::new()),
            registry: Arc::new(FilterRegistry::new()),
            toggles: Arc::new(RuntimeToggles::default()),
            api_key: Arc::from("secret"),
        })
    }

    fn request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .header(header::CONTENT_TYPE, "application/json");
        builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_default())
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let response = router()
            .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_add_activate_and_fetch() {
        let app = router();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/admin/filters",
                Some(r#"{"source_code":"x","filter_type":"pre","filter_name":"checkAuth","order":5}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json(response).await["filter_id"], "checkAuth:pre");

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/filters/checkAuth:pre/revisions/0/activate", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/filters/checkAuth:pre/active", None))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["revision"], 0);
        assert_eq!(body["state"], "active");

        let response = app
            .oneshot(request("GET", "/admin/filters?type=pre", None))
            .await
            .unwrap();
        assert_eq!(json(response).await, serde_json::json!(["checkAuth:pre"]));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = router();
        let response = app
            .clone()
            .oneshot(request("GET", "/admin/filters/nope:pre/latest", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("GET", "/admin/filters?type=sideways", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
