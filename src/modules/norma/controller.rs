use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{sse::Sse, IntoResponse, Response},
    Extension, Json,
};
use futures::StreamExt;
use tracing::field;

use crate::modules::norma::{
    error::{AskNormaError, COMPLETION_FAILED, EMBEDDING_FAILED},
    model::AuthenticatedCaller,
    prompt::{self, SYSTEM_PERSONA},
    retriever,
    schema::{AskNormaRequest, DegradedResponse, FieldIssue, HealthResponse},
    streamer,
};
use crate::services::rate_limit::{identify, rate_limit_headers};
use crate::AppState;

const DEGRADED_GREETING: &str = "Olá! Sou Norma, sua assistente de governança condominial. No momento, estou em modo de desenvolvimento e retornarei uma resposta simulada.";
const DEGRADED_SUGGESTIONS: [&str; 3] = [
    "Verificar regimento interno",
    "Agendar assembleia",
    "Consultar síndico",
];

#[tracing::instrument(
    name = "ask_norma",
    skip_all,
    fields(condominio_id = field::Empty, user_id = field::Empty)
)]
pub async fn ask(
    State(state): State<AppState>,
    caller: Option<Extension<AuthenticatedCaller>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AskNormaError> {
    let payload: AskNormaRequest = serde_json::from_slice(&body)
        .map_err(|e| AskNormaError::Validation(vec![FieldIssue::body(e.to_string())]))?;
    let question = payload.into_question().map_err(AskNormaError::Validation)?;

    let span = tracing::Span::current();
    span.record("condominio_id", field::display(question.condominio_id));
    span.record("user_id", field::display(question.user_id));

    let policy = state.rate_limiter.policy();
    let identifier = identify(
        &headers,
        caller.as_ref().map(|Extension(c)| c.user_id.as_str()),
    );
    let decision = state.rate_limiter.check(&identifier, &policy.endpoint).await;
    tracing::debug!(identifier = %identifier, remaining = decision.remaining(), "rate limit checked");
    if !decision.allowed() {
        tracing::info!(identifier = %identifier, "rate limit exceeded");
        if let Some(status) = decision.status() {
            return Err(AskNormaError::RateLimited {
                status: status.clone(),
                limit: policy.max_requests,
            });
        }
    }
    let quota = decision
        .status()
        .map(|status| rate_limit_headers(status, policy.max_requests))
        .unwrap_or_default();

    let Some(providers) = &state.providers else {
        tracing::warn!("provider credentials missing, returning degraded response");
        return Ok((quota, Json(degraded_response())).into_response());
    };

    let embedding = providers.embedder.embed(&question.message).await.map_err(|e| {
        tracing::error!(error = %e, "embedding request failed");
        AskNormaError::Upstream(EMBEDDING_FAILED)
    })?;

    let context = retriever::retrieve_context(
        state.search.as_ref(),
        &embedding,
        question.condominio_id,
        &state.retrieval,
    )
    .await;

    let messages = prompt::assemble(SYSTEM_PERSONA, &context, &question.history, &question.message);

    let upstream = providers.completions.stream_chat(&messages).await.map_err(|e| {
        tracing::error!(error = %e, "completion request failed");
        AskNormaError::Upstream(COMPLETION_FAILED)
    })?;

    tracing::info!(context_chunks = context.len(), "streaming completion");

    let events = streamer::relay(upstream, span).map(|event| Ok::<_, Infallible>(event.into_event()));

    Ok((
        quota,
        [(header::CONNECTION, "keep-alive")],
        Sse::new(events),
    )
        .into_response())
}

fn degraded_response() -> DegradedResponse {
    DegradedResponse {
        response: DEGRADED_GREETING.to_string(),
        sources: Vec::new(),
        suggestions: DEGRADED_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
    }
}

/// Plain OPTIONS requests. Real preflights are answered by the CORS layer.
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn method_not_allowed() -> AskNormaError {
    AskNormaError::MethodNotAllowed
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        degraded: state.providers.is_none(),
    })
}
