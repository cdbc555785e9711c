use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use super::model::{HistoryEntry, HistoryRole, Question};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskNormaRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Mensagem é obrigatória"))]
    pub message: String,
    #[serde(default)]
    #[validate(custom(function = "validate_condominio_id"))]
    pub condominio_id: String,
    #[serde(default)]
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationMessage>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConversationMessage {
    #[serde(default)]
    #[validate(custom(function = "validate_history_role"))]
    pub role: String,
    #[validate(required(message = "Conteúdo é obrigatório"))]
    pub content: Option<String>,
    #[validate(required(message = "Data da mensagem é obrigatória"))]
    pub timestamp: Option<String>,
}

fn validate_condominio_id(value: &str) -> Result<(), ValidationError> {
    validate_uuid(value, "ID de condomínio inválido")
}

fn validate_user_id(value: &str) -> Result<(), ValidationError> {
    validate_uuid(value, "ID de usuário inválido")
}

fn validate_uuid(value: &str, message: &'static str) -> Result<(), ValidationError> {
    match parse_hyphenated(value) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("invalid_uuid").with_message(Cow::Borrowed(message))),
    }
}

/// Only the canonical 8-4-4-4-12 form. Braced, `urn:uuid:` and unhyphenated
/// spellings are rejected.
fn parse_hyphenated(value: &str) -> Option<Uuid> {
    if value.len() != 36 {
        return None;
    }
    Uuid::try_parse(value).ok()
}

fn validate_history_role(value: &str) -> Result<(), ValidationError> {
    match parse_role(value) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("invalid_enum_value")
            .with_message(Cow::Borrowed("Papel deve ser 'user' ou 'assistant'"))),
    }
}

fn parse_role(value: &str) -> Option<HistoryRole> {
    match value {
        "user" => Some(HistoryRole::User),
        "assistant" => Some(HistoryRole::Assistant),
        _ => None,
    }
}

/// One validation failure, addressed by its JSON path in the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldIssue {
    pub fn body(message: impl Into<String>) -> Self {
        Self {
            field: "body".to_string(),
            code: "invalid_json".to_string(),
            message: message.into(),
        }
    }
}

impl AskNormaRequest {
    /// Validates every field and converts the payload into a [`Question`].
    /// All issues are reported at once.
    pub fn into_question(self) -> Result<Question, Vec<FieldIssue>> {
        let mut issues = Vec::new();

        if let Err(errors) = self.validate() {
            collect_issues(&errors, "", &mut issues);
        }

        let history = self.conversation_history.unwrap_or_default();
        for (index, entry) in history.iter().enumerate() {
            if let Err(errors) = entry.validate() {
                collect_issues(&errors, &format!("conversationHistory[{}]", index), &mut issues);
            }
        }

        let condominio_id = parse_hyphenated(&self.condominio_id);
        let user_id = parse_hyphenated(&self.user_id);

        match (condominio_id, user_id) {
            (Some(condominio_id), Some(user_id)) if issues.is_empty() => Ok(Question {
                message: self.message,
                condominio_id,
                user_id,
                history: history
                    .into_iter()
                    .filter_map(|entry| {
                        Some(HistoryEntry {
                            role: parse_role(&entry.role)?,
                            content: entry.content?,
                            timestamp: entry.timestamp?,
                        })
                    })
                    .collect(),
            }),
            _ => {
                issues.sort_by(|a, b| a.field.cmp(&b.field));
                Err(issues)
            }
        }
    }
}

fn collect_issues(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldIssue>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            camel_case(field)
        } else {
            format!("{}.{}", prefix, camel_case(field))
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                out.extend(field_errors.iter().map(|e| FieldIssue {
                    field: path.clone(),
                    code: e.code.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_issues(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_issues(inner, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Non-streamed answer used when provider credentials are absent. No
/// documents are consulted, so `sources` is always empty.
#[derive(Debug, Serialize)]
pub struct DegradedResponse {
    pub response: String,
    pub sources: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub details: Vec<FieldIssue>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitedResponse {
    pub error: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub degraded: bool,
}
