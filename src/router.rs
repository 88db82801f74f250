use std::sync::Arc;

use axum::{
    Router,
    http::Method,
    middleware::from_extractor_with_state,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::{
        api_auth, api_delete_disabled_channels, api_delete_logs, api_get_channels,
        api_get_log_stat, api_get_logs, api_get_redemption, api_post_channels, api_post_redemptions,
        api_put_channel_balance, api_put_option, api_redeem, api_status, api_test_all_channels,
        api_test_channel, api_version,
    },
    middleware::RequireAdminAuth,
    services::Gateway,
};

/// RouterBuilder for the admin surface
pub struct RouterBuilder {
    state: Arc<Gateway>,
    inner: Router<Arc<Gateway>>,
}

impl RouterBuilder {
    /// Creates a blank RouterBuilder over the wired gateway
    pub fn new(state: Arc<Gateway>) -> Self {
        RouterBuilder {
            state,
            inner: Router::new(),
        }
    }

    /// Admin routes, tracing and CORS
    pub fn with_default_setup(self) -> Self {
        self.route_admin_endpoints().with_tracing().with_cors()
    }

    /// Sets up routes guarded by the admin password
    fn route_admin_endpoints(mut self) -> Self {
        let router = Router::new()
            .nest(
                "/api",
                Router::new()
                    .route("/auth", get(api_auth))
                    .route("/status", get(api_status))
                    .route(
                        "/channel",
                        get(api_get_channels).post(api_post_channels),
                    )
                    .route("/channel/disabled", delete(api_delete_disabled_channels))
                    .route("/channel/{id}/balance", put(api_put_channel_balance))
                    .route("/channel/test", get(api_test_all_channels))
                    .route("/channel/test/{id}", get(api_test_channel))
                    .route("/redemption", post(api_post_redemptions))
                    .route("/redemption/redeem", post(api_redeem))
                    .route("/redemption/{key}", get(api_get_redemption))
                    .route("/log", get(api_get_logs).delete(api_delete_logs))
                    .route("/log/stat", get(api_get_log_stat))
                    .route("/option", put(api_put_option))
                    .route_layer(from_extractor_with_state::<RequireAdminAuth, _>(
                        self.state.clone(),
                    )),
            )
            .route("/api/version", get(api_version));
        self.inner = self.inner.merge(router);
        self
    }

    fn with_tracing(mut self) -> Self {
        self.inner = self.inner.layer(TraceLayer::new_for_http());
        self
    }

    /// Adds CORS support to the router
    fn with_cors(mut self) -> Self {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]);

        self.inner = self.inner.layer(cors);
        self
    }

    /// Returns the configured router
    pub fn build(self) -> Router {
        self.inner.with_state(self.state)
    }
}
