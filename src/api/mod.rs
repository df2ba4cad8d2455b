// API module - HTTP endpoints

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod bundles;
pub mod cards;
pub mod defaults;
pub mod health;
pub mod issuers;
pub mod middleware;
pub mod requests;

use middleware::state::AppState;

/// Full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(requests::router())
        .merge(cards::router())
        .merge(bundles::router())
        .merge(issuers::router())
        .merge(defaults::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::test_support::{app, body_json};

    #[tokio::test]
    async fn test_health_reports_store() {
        let (router, _store) = app();
        let res = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["dependencies"]["store"]["status"], "healthy");
    }
}
