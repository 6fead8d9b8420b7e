//! 阶段 prompt 构建
//!
//! 每个 prompt 以 `### phase: <reflect|plan|compose>` 开头，之后是若干 `### <name>` 段落。
//! 段落内容保持单行化（换行折叠为空格），section() 可以据此稳定地取回任一段落。

use crate::agents::{AgentResult, AgentTask};
use crate::cognition::Expanded;
use crate::memory::MemoryRecord;

const PHASE_PREFIX: &str = "### phase: ";

/// 需要调用生成端的三个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPhase {
    Reflect,
    Plan,
    Compose,
}

impl PromptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptPhase::Reflect => "reflect",
            PromptPhase::Plan => "plan",
            PromptPhase::Compose => "compose",
        }
    }

    /// 从 prompt 的阶段标记识别阶段
    pub fn detect(prompt: &str) -> Option<Self> {
        let phase = prompt.lines().find_map(|l| l.strip_prefix(PHASE_PREFIX))?;
        match phase.trim() {
            "reflect" => Some(PromptPhase::Reflect),
            "plan" => Some(PromptPhase::Plan),
            "compose" => Some(PromptPhase::Compose),
            _ => None,
        }
    }
}

/// 取出 `### <name>` 段落的内容（不含标题行）
pub fn section<'a>(prompt: &'a str, name: &str) -> Option<&'a str> {
    let header = format!("### {name}\n");
    let start = if prompt.starts_with(&header) {
        header.len()
    } else {
        prompt.find(&format!("\n{header}"))? + header.len() + 1
    };
    let rest = &prompt[start..];
    let end = rest.find("\n### ").unwrap_or(rest.len());
    Some(rest[..end].trim_end_matches('\n'))
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// prompt 构建器：可选人设前言
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    persona: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        let persona = persona.into();
        self.persona = (!persona.trim().is_empty()).then_some(persona);
        self
    }

    fn header(&self, phase: PromptPhase, instruction: &str) -> String {
        let mut p = format!("{PHASE_PREFIX}{}\n", phase.as_str());
        if let Some(persona) = &self.persona {
            p.push_str(&format!("### persona\n{}\n", one_line(persona)));
        }
        p.push_str(&format!("### instruction\n{instruction}\n"));
        p
    }

    fn input_block(expanded: &Expanded) -> String {
        format!(
            "### input\n{}\n### intent\n{}\n",
            expanded.text,
            expanded.intent.as_str()
        )
    }

    /// Reflect：由扩展输入与检索候选生成内心独白
    pub fn reflect(&self, expanded: &Expanded, candidates: &[MemoryRecord]) -> String {
        let mut p = self.header(
            PromptPhase::Reflect,
            "Think privately about the input and the related memories. Reply with a short inner monologue.",
        );
        p.push_str(&Self::input_block(expanded));
        p.push_str("### memories\n");
        if candidates.is_empty() {
            p.push_str("(none)\n");
        }
        for c in candidates {
            p.push_str(&format!("- {}\n", one_line(c.text())));
        }
        p
    }

    /// Plan：由独白生成行动计划（JSON）
    pub fn plan(&self, expanded: &Expanded, monologue: &str, agents: &[(String, String)]) -> String {
        let mut p = self.header(
            PromptPhase::Plan,
            r#"Decide which agents to call. Reply with JSON only: {"actions": [{"agent": "<name>", "args": {...}}]}. Use {"actions": []} when no agent is needed."#,
        );
        p.push_str(&Self::input_block(expanded));
        p.push_str(&format!("### monologue\n{}\n", one_line(monologue)));
        p.push_str("### agents\n");
        if agents.is_empty() {
            p.push_str("(none)\n");
        }
        for (name, desc) in agents {
            if desc.is_empty() {
                p.push_str(&format!("- {name}\n"));
            } else {
                p.push_str(&format!("- {name}: {}\n", one_line(desc)));
            }
        }
        p
    }

    /// Compose：由独白与 agent 结果生成最终回复；results 与 tasks 一一对应
    pub fn compose(
        &self,
        expanded: &Expanded,
        monologue: &str,
        tasks: &[AgentTask],
        results: &[AgentResult],
    ) -> String {
        let mut p = self.header(
            PromptPhase::Compose,
            "Write the reply to the user based on your monologue and the agent results.",
        );
        p.push_str(&Self::input_block(expanded));
        p.push_str(&format!("### monologue\n{}\n", one_line(monologue)));
        p.push_str("### tasks\n");
        if tasks.is_empty() {
            p.push_str("(none)\n");
        }
        for t in tasks {
            p.push_str(&format!("- {}\n", t.agent_name));
        }
        p.push_str("### agent results\n");
        if results.is_empty() {
            p.push_str("(none)\n");
        }
        for r in results {
            p.push_str(&format!("- {}\n", one_line(&r.display_line())));
        }
        p
    }
}

/// Persist 阶段写回的经验摘要（单行）
pub fn summarize_experience(expanded: &Expanded, monologue: &str, response: &str) -> String {
    format!(
        "[{}] input: {} | thought: {} | response: {}",
        expanded.intent.as_str(),
        expanded.text,
        one_line(monologue),
        one_line(response)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::Expander;

    #[test]
    fn test_phase_detect_and_sections() {
        let expanded = Expander::new().expand("what is rust?");
        let prompt = PromptBuilder::new()
            .with_persona("You are Aether.")
            .plan(&expanded, "line one\nline two", &[("echo".into(), "Echo".into())]);
        assert_eq!(PromptPhase::detect(&prompt), Some(PromptPhase::Plan));
        assert_eq!(section(&prompt, "input"), Some("what is rust?"));
        assert_eq!(section(&prompt, "intent"), Some("question"));
        assert_eq!(section(&prompt, "monologue"), Some("line one line two"));
        assert_eq!(section(&prompt, "agents"), Some("- echo: Echo"));
        assert_eq!(section(&prompt, "missing"), None);
    }

    #[test]
    fn test_compose_lists_results_in_order() {
        let expanded = Expander::new().expand("hi");
        let prompt = PromptBuilder::new().compose(
            &expanded,
            "m",
            &[AgentTask::new("a", Default::default()), AgentTask::new("b", Default::default())],
            &[AgentResult::success("one"), AgentResult::failure("two")],
        );
        assert_eq!(section(&prompt, "agent results"), Some("- ok: one\n- failed: two"));
    }

    #[test]
    fn test_summary_is_single_line() {
        let expanded = Expander::new().expand("hello");
        let s = summarize_experience(&expanded, "a\nb", "c\n\nd");
        assert!(!s.contains('\n'));
        assert!(s.contains("response: c d"));
    }
}
