use std::env;
use std::str::FromStr;

use thiserror::Error;

const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:3002",
    "http://localhost:3003",
    "http://localhost:3004",
    "http://localhost:3005",
    "http://localhost:3006",
    "https://versixnorma.com",
    "https://www.versixnorma.com",
    "https://app.versixnorma.com",
    "https://norma.versix.com.br",
    "https://versix-norma.vercel.app",
];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_key: String,
}

/// Advertised quota for one endpoint. The Redis backend enforces it; the RPC
/// backend owns its own limits and this only feeds `X-RateLimit-Limit`.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub endpoint: String,
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            endpoint: "ask-norma".to_string(),
            max_requests: 20,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    pub match_threshold: f32,
    pub match_count: u32,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            match_count: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
    pub preview_suffix: String,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
            preview_suffix: ".vercel.app".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub completion: CompletionSettings,
    pub embedding: EmbeddingSettings,
    pub supabase: Option<SupabaseSettings>,
    pub redis_uri: Option<String>,
    pub rate_limit: RateLimitPolicy,
    pub retrieval: RetrievalPolicy,
    pub cors: CorsSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to
    /// mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| secret(key).unwrap_or_else(|| default.to_string());

        let supabase = match (secret("SUPABASE_URL"), secret("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_key)) => Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                service_key,
            }),
            _ => None,
        };

        let defaults = CorsSettings::default();
        let cors = CorsSettings {
            allowed_origins: match secret("CORS_ALLOWED_ORIGINS") {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => defaults.allowed_origins,
            },
            preview_suffix: secret("CORS_PREVIEW_SUFFIX").unwrap_or(defaults.preview_suffix),
        };

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parsed(&lookup, "PORT", 8080)?,
            completion: CompletionSettings {
                api_key: secret("GROQ_API_KEY"),
                base_url: text("GROQ_BASE_URL", "https://api.groq.com/openai/v1"),
                model: text("COMPLETION_MODEL", "llama3-8b-8192"),
                max_tokens: parsed(&lookup, "COMPLETION_MAX_TOKENS", 1000)?,
                temperature: parsed(&lookup, "COMPLETION_TEMPERATURE", 0.7)?,
            },
            embedding: EmbeddingSettings {
                api_key: secret("OPENAI_API_KEY"),
                base_url: text("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: text("EMBEDDING_MODEL", "text-embedding-3-small"),
            },
            supabase,
            redis_uri: secret("REDIS_URI"),
            rate_limit: RateLimitPolicy {
                endpoint: text("RATE_LIMIT_ENDPOINT", "ask-norma"),
                max_requests: parsed(&lookup, "RATE_LIMIT_MAX_REQUESTS", 20)?,
                window_secs: parsed(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?,
            },
            retrieval: RetrievalPolicy {
                match_threshold: parsed(&lookup, "MATCH_THRESHOLD", 0.7)?,
                match_count: parsed(&lookup, "MATCH_COUNT", 5)?,
            },
            cors,
        })
    }

    /// Both provider keys are needed for the full pipeline.
    pub fn providers_configured(&self) -> bool {
        self.completion.api_key.is_some() && self.embedding.api_key.is_some()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
    }
}
