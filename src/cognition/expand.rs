//! 输入扩展：把原始输入变成 {text, intent}
//!
//! 纯函数、确定性、不调用外部服务、永不失败。意图用规则快速匹配，匹配不到时为 Statement，
//! 空输入为 Unknown。

use serde::{Deserialize, Serialize};

/// 识别出的意图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Question,
    Command,
    Search,
    Remember,
    Statement,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Question => "question",
            Intent::Command => "command",
            Intent::Search => "search",
            Intent::Remember => "remember",
            Intent::Statement => "statement",
            Intent::Unknown => "unknown",
        }
    }
}

/// 扩展后的输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expanded {
    /// 折叠空白后的输入
    pub text: String,
    pub intent: Intent,
}

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "is", "are", "can", "could", "do",
    "does", "should", "will",
];

const COMMAND_WORDS: &[&str] = &[
    "run", "make", "create", "write", "build", "list", "show", "open", "send", "start", "stop",
    "please",
];

const SEARCH_PREFIXES: &[&str] = &["search", "look up", "lookup", "find", "google"];

const REMEMBER_PREFIXES: &[&str] = &["remember", "note that", "don't forget"];

/// 规则意图识别器
#[derive(Debug, Clone, Default)]
pub struct Expander;

impl Expander {
    pub fn new() -> Self {
        Self
    }

    pub fn expand(&self, raw: &str) -> Expanded {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let intent = classify(&text);
        Expanded { text, intent }
    }
}

fn classify(text: &str) -> Intent {
    if text.is_empty() {
        return Intent::Unknown;
    }
    let lower = text.to_lowercase();
    if REMEMBER_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Intent::Remember;
    }
    if SEARCH_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Intent::Search;
    }
    let first = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .find(|w| !w.is_empty())
        .unwrap_or("");
    if lower.ends_with('?') || QUESTION_WORDS.contains(&first) {
        return Intent::Question;
    }
    if COMMAND_WORDS.contains(&first) || lower.ends_with('!') {
        return Intent::Command;
    }
    Intent::Statement
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_normalizes_whitespace() {
        let e = Expander::new().expand("  what   is\tAGI  ");
        assert_eq!(e.text, "what is AGI");
        assert_eq!(e.intent, Intent::Question);
    }

    #[test]
    fn test_intents() {
        let x = Expander::new();
        assert_eq!(x.expand("").intent, Intent::Unknown);
        assert_eq!(x.expand("search rust async traits").intent, Intent::Search);
        assert_eq!(x.expand("Remember: I like tea").intent, Intent::Remember);
        assert_eq!(x.expand("list my notes").intent, Intent::Command);
        assert_eq!(x.expand("the sky is blue").intent, Intent::Statement);
        assert_eq!(x.expand("tea or coffee?").intent, Intent::Question);
    }

    #[test]
    fn test_expand_is_deterministic() {
        let x = Expander::new();
        assert_eq!(x.expand("run the tests"), x.expand("run the tests"));
    }
}
