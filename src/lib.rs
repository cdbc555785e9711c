use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::RetrievalPolicy;
use modules::norma::retriever::DocumentSearch;
use services::{embeddings::Embedder, llm::CompletionProvider, rate_limit::RateLimiter};

pub mod config;
pub mod modules;
pub mod services;

/// Clients that need provider credentials. Absent means degraded mode.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn Embedder>,
    pub completions: Arc<dyn CompletionProvider>,
}

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub search: Arc<dyn DocumentSearch>,
    pub providers: Option<Providers>,
    pub retrieval: RetrievalPolicy,
}

pub fn app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .merge(modules::norma::routes::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
