pub mod embeddings;
pub mod llm;
pub mod rate_limit;
pub mod supabase;
