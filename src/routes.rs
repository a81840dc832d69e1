use axum::{
    routing::{get, post},
    Router,
};

use crate::billing::api;

pub async fn root() -> &'static str {
    "Organisation Usage API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/plans", get(api::list_plans))
        .route("/set-plan", post(api::set_plan))
        .route("/set-user-limit", post(api::set_user_limit))
        .route("/get-org", get(api::get_org))
        .route("/use-credit", post(api::use_credit))
        .route("/top-up", post(api::top_up))
}
