//! Neutralizes instruction-like text in retrieved documents before it is
//! placed in a prompt.
//!
//! Rules are applied in order. Injection rules replace each match with
//! [`REMOVED_MARKER`] and mark the result as suspicious; delimiter rules only
//! rewrite prompt-structure lookalikes. The result is then capped at
//! [`MAX_CHUNK_CHARS`] characters. Running [`sanitize`] on its own output is a
//! no-op.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};

pub const REMOVED_MARKER: &str = "[REMOVED]";
pub const TRUNCATION_MARKER: &str = "... [truncado]";
pub const MAX_CHUNK_CHARS: usize = 2000;

const INJECTION_PATTERNS: &[(&str, &str)] = &[
    ("ignore_previous", r"ignore\s+(previous|all|above)\s+(instructions?|prompts?)"),
    ("disregard_previous", r"disregard\s+(previous|all|above)"),
    ("forget_previous", r"forget\s+(everything|all|previous)"),
    ("new_instructions", r"new\s+instructions?:"),
    ("system_role", r"system\s*:\s*"),
    ("inst_open", r"\[INST\]"),
    ("inst_close", r"\[/INST\]"),
    ("im_start", r"<\|im_start\|>"),
    ("im_end", r"<\|im_end\|>"),
    ("assistant_role", r"assistant\s*:\s*"),
    ("human_role", r"human\s*:\s*"),
    ("user_role", r"user\s*:\s*"),
    ("markdown_role_header", r"###\s*(instruction|system|human|assistant)"),
    ("you_are_now", r"you\s+are\s+now"),
    ("pretend", r"pretend\s+(to\s+be|you\s+are)"),
    ("act_as", r"act\s+as\s+(if|a)"),
    ("roleplay", r"roleplay\s+as"),
    ("jailbreak", r"jailbreak"),
    ("bypass", r"bypass\s+(filter|restriction|safety)"),
];

const DELIMITER_PATTERNS: &[(&str, &str, &str)] = &[
    ("code_fence", r"```", "'''"),
    ("horizontal_rule", r"---", "___"),
    ("blank_lines", r"\n{3,}", "\n\n"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Injection,
    Delimiter,
}

#[derive(Debug)]
pub struct SanitizeRule {
    pub name: &'static str,
    pub kind: RuleKind,
    pattern: Regex,
    replacement: &'static str,
}

impl SanitizeRule {
    fn compile(
        name: &'static str,
        kind: RuleKind,
        pattern: &str,
        replacement: &'static str,
    ) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;

        Ok(Self {
            name,
            kind,
            pattern,
            replacement,
        })
    }

    /// Borrowed when nothing matched.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(text, NoExpand(self.replacement))
    }
}

// Panics on first use if any pattern fails to compile.
static RULES: LazyLock<Vec<SanitizeRule>> = LazyLock::new(|| {
    let injection = INJECTION_PATTERNS
        .iter()
        .map(|&(name, pattern)| SanitizeRule::compile(name, RuleKind::Injection, pattern, REMOVED_MARKER));
    let delimiters = DELIMITER_PATTERNS
        .iter()
        .map(|&(name, pattern, replacement)| {
            SanitizeRule::compile(name, RuleKind::Delimiter, pattern, replacement)
        });

    injection
        .chain(delimiters)
        .collect::<Result<Vec<_>, _>>()
        .expect("sanitizer rule must compile")
});

pub fn rules() -> &'static [SanitizeRule] {
    &RULES
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sanitized {
    pub content: String,
    /// An injection rule fired. Advisory only; the content is already safe.
    pub suspicious: bool,
}

pub fn sanitize(raw: &str) -> Sanitized {
    if raw.is_empty() {
        return Sanitized::default();
    }

    let mut text = raw.to_string();
    let mut suspicious = false;

    for rule in rules() {
        if let Cow::Owned(replaced) = rule.apply(&text) {
            suspicious |= rule.kind == RuleKind::Injection;
            text = replaced;
        }
    }

    Sanitized {
        content: truncate(text).trim().to_string(),
        suspicious,
    }
}

// A trailing marker from an earlier pass does not count towards the limit.
fn truncate(text: String) -> String {
    let body = text.strip_suffix(TRUNCATION_MARKER).unwrap_or(&text);
    if body.chars().count() <= MAX_CHUNK_CHARS {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(MAX_CHUNK_CHARS)
        .map(|(index, _)| index)
        .unwrap_or(text.len());

    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}
