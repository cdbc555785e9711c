use axum::{
    routing::{get, post},
    Router,
};

use crate::modules::norma::controller;
use crate::AppState;

pub const ASK_NORMA_PATH: &str = "/api/ask-norma";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            ASK_NORMA_PATH,
            post(controller::ask)
                .options(controller::preflight)
                .fallback(controller::method_not_allowed),
        )
        .route("/health", get(controller::health))
}
