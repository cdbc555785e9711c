use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use norma::config::{self, cors::CorsPolicy, AppConfig};
use norma::modules::norma::retriever::{DocumentSearch, SupabaseDocumentSearch, UnconfiguredSearch};
use norma::services::{
    embeddings::OpenAiEmbeddings,
    llm::GroqClient,
    rate_limit::{RateLimiter, RedisRateLimitStore, SupabaseRateLimitStore},
    supabase::SupabaseClient,
};
use norma::{app, AppState, Providers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("norma=info,tower_http=info")),
        )
        .init();

    let settings = AppConfig::from_env().context("invalid configuration")?;
    let http = Client::new();

    let supabase = settings
        .supabase
        .as_ref()
        .map(|s| SupabaseClient::new(http.clone(), s));

    let rate_limiter = match (&supabase, &settings.redis_uri) {
        (Some(supabase), _) => RateLimiter::new(
            Arc::new(SupabaseRateLimitStore::new(supabase.clone())),
            settings.rate_limit.clone(),
        ),
        (None, Some(uri)) => {
            let redis = config::redis::connect(uri)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("using Redis rate limit counters");
            RateLimiter::new(
                Arc::new(RedisRateLimitStore::new(redis, &settings.rate_limit)),
                settings.rate_limit.clone(),
            )
        }
        (None, None) => {
            tracing::warn!("no rate limit backend configured, requests are not limited");
            RateLimiter::disabled(settings.rate_limit.clone())
        }
    };

    let search: Arc<dyn DocumentSearch> = match supabase {
        Some(supabase) => Arc::new(SupabaseDocumentSearch::new(supabase)),
        None => {
            tracing::warn!("Supabase not configured, answers will have no document context");
            Arc::new(UnconfiguredSearch)
        }
    };

    let providers = if settings.providers_configured() {
        let completions = GroqClient::new(http.clone(), &settings.completion)?;
        tracing::info!(model = completions.model(), "completion provider ready");
        Some(Providers {
            embedder: Arc::new(OpenAiEmbeddings::new(http.clone(), &settings.embedding)?),
            completions: Arc::new(completions),
        })
    } else {
        tracing::warn!("provider API keys missing, running in degraded mode");
        None
    };

    let state = AppState {
        rate_limiter,
        search,
        providers,
        retrieval: settings.retrieval.clone(),
    };

    let router = app(state, CorsPolicy::new(&settings.cors).layer());

    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    tracing::info!("listening on {}", address);

    axum::serve(listener, router).await?;

    Ok(())
}
