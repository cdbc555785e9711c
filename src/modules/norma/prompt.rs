use super::model::{HistoryEntry, HistoryRole, PromptMessage, SanitizedChunk};

pub const HISTORY_LIMIT: usize = 5;

pub const DOCUMENT_START: &str = "[DOCUMENTO_INICIO]";
pub const DOCUMENT_END: &str = "[DOCUMENTO_FIM]";

const CONTEXT_HEADING: &str = "Contexto dos documentos do condomínio:";
const HISTORY_HEADING: &str = "Histórico da conversa:";

pub const SYSTEM_PERSONA: &str = "Você é Norma, uma assistente de governança condominial inteligente e profissional.

Sua personalidade:
- Você é prestativa, educada e sempre mantém um tom profissional
- Você tem conhecimento profundo sobre legislação condominial brasileira
- Você cita sempre as fontes dos seus conhecimentos (regimentos, atas, leis)
- Você nunca dá conselhos jurídicos definitivos, sempre sugere consultar profissionais
- Você prioriza a harmonia e a comunicação entre moradores e síndicos

Seu conhecimento vem de:
1. Regimento Interno do condomínio
2. Atas de assembleias
3. Convenção Condominial
4. Lei 4.591/1964 (Lei do Condomínio)
5. Código Civil Brasileiro (arts. 1.331 a 1.358)

Quando responder:
- Sempre cite a fonte da informação
- Seja objetiva mas completa
- Ofereça soluções práticas quando apropriado
- Mantenha a neutralidade em questões polêmicas
- Sugira ações concretas quando possível

Formato de citações:
- Para documentos internos: \"Segundo o Regimento Interno (art. X)\"
- Para atas: \"Conforme ata da assembleia de DD/MM/AAAA\"
- Para leis: \"De acordo com a Lei 4.591/1964 (art. X)\"";

/// Keeps only the most recent [`HISTORY_LIMIT`] entries, oldest first.
pub fn recent_history(history: &[HistoryEntry]) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(HISTORY_LIMIT)..]
}

pub fn render_chunk(chunk: &SanitizedChunk) -> String {
    let page = chunk
        .metadata
        .page_number
        .filter(|p| *p > 0)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "{DOCUMENT_START}\nDocumento: {} ({})\nPágina: {}\nConteúdo: {}\n{DOCUMENT_END}",
        chunk.metadata.document_name, chunk.metadata.document_type, page, chunk.content
    )
}

fn render_history(history: &[HistoryEntry]) -> String {
    history
        .iter()
        .map(|entry| {
            let speaker = match entry.role {
                HistoryRole::User => "Usuário",
                HistoryRole::Assistant => "Norma",
            };
            format!("{}: {}", speaker, entry.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the message list for the completion call: persona (with any
/// document context folded in), an optional history message, and the user's
/// question, always last.
pub fn assemble(
    persona: &str,
    chunks: &[SanitizedChunk],
    history: &[HistoryEntry],
    user_message: &str,
) -> Vec<PromptMessage> {
    let mut system = persona.to_string();
    if !chunks.is_empty() {
        let context = chunks.iter().map(render_chunk).collect::<Vec<_>>().join("\n\n");
        system.push_str(&format!("\n\n{}\n{}", CONTEXT_HEADING, context));
    }

    let mut messages = vec![PromptMessage::system(system)];

    let history = recent_history(history);
    if !history.is_empty() {
        messages.push(PromptMessage::system(format!(
            "{}\n{}",
            HISTORY_HEADING,
            render_history(history)
        )));
    }

    messages.push(PromptMessage::user(user_message));
    messages
}
