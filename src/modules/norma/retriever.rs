use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::model::{DocumentChunk, SanitizedChunk};
use crate::config::RetrievalPolicy;
use crate::services::supabase::{SupabaseClient, SupabaseError};

const SEARCH_FUNCTION: &str = "search_document_chunks";

#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Nearest chunks for `embedding`, restricted to `condominio_id`.
    async fn search(
        &self,
        embedding: &[f32],
        condominio_id: Uuid,
        match_threshold: f32,
        match_count: u32,
    ) -> Result<Vec<DocumentChunk>, SupabaseError>;
}

#[derive(Debug, Serialize)]
struct SearchParams<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: u32,
    condominio_id: Uuid,
}

#[derive(Clone)]
pub struct SupabaseDocumentSearch {
    supabase: SupabaseClient,
}

impl SupabaseDocumentSearch {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl DocumentSearch for SupabaseDocumentSearch {
    async fn search(
        &self,
        embedding: &[f32],
        condominio_id: Uuid,
        match_threshold: f32,
        match_count: u32,
    ) -> Result<Vec<DocumentChunk>, SupabaseError> {
        let params = SearchParams {
            query_embedding: embedding,
            match_threshold,
            match_count,
            condominio_id,
        };

        let chunks: Option<Vec<DocumentChunk>> = self.supabase.rpc(SEARCH_FUNCTION, &params).await?;
        Ok(chunks.unwrap_or_default())
    }
}

/// Used when no Supabase project is configured. Every search fails, which the
/// pipeline treats as empty context.
pub struct UnconfiguredSearch;

#[async_trait]
impl DocumentSearch for UnconfiguredSearch {
    async fn search(
        &self,
        _embedding: &[f32],
        _condominio_id: Uuid,
        _match_threshold: f32,
        _match_count: u32,
    ) -> Result<Vec<DocumentChunk>, SupabaseError> {
        Err(SupabaseError::NotConfigured)
    }
}

/// Runs the tenant-scoped search and sanitizes every chunk. Search failures
/// degrade to an empty context instead of failing the request.
pub async fn retrieve_context(
    search: &dyn DocumentSearch,
    embedding: &[f32],
    condominio_id: Uuid,
    policy: &RetrievalPolicy,
) -> Vec<SanitizedChunk> {
    let chunks = match search
        .search(embedding, condominio_id, policy.match_threshold, policy.match_count)
        .await
    {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::error!(
                component = "vector_search",
                error = %e,
                "document search failed, continuing without context"
            );
            return Vec::new();
        }
    };

    if chunks.is_empty() {
        tracing::warn!(component = "vector_search", "no relevant documents found");
        return Vec::new();
    }

    let sanitized: Vec<SanitizedChunk> = chunks
        .into_iter()
        .filter(|chunk| {
            let owned = chunk.belongs_to(condominio_id);
            if !owned {
                tracing::error!(
                    component = "vector_search",
                    chunk_id = %chunk.id,
                    "search returned a chunk owned by another tenant, dropping it"
                );
            }
            owned
        })
        .map(SanitizedChunk::from)
        .collect();

    let suspicious: Vec<&SanitizedChunk> = sanitized.iter().filter(|c| c.suspicious).collect();
    for chunk in &suspicious {
        tracing::warn!(
            document_name = %chunk.metadata.document_name,
            document_type = %chunk.metadata.document_type,
            "injection pattern neutralized in document chunk"
        );
    }
    if !suspicious.is_empty() {
        tracing::warn!(
            security = "prompt_injection",
            suspicious_chunks = suspicious.len(),
            total_chunks = sanitized.len(),
            "retrieved context contained prompt injection attempts"
        );
    }

    sanitized
}
