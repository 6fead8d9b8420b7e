//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按 prompt 中的阶段标记确定性地回复：reflect 返回一句独白，plan 返回把输入交给 echo 的 JSON 计划，
//! compose 汇总 agent 结果。

use async_trait::async_trait;

use crate::cognition::prompts::{section, PromptPhase};
use crate::llm::LlmClient;

/// Mock 客户端：阶段感知的回显
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let input = section(prompt, "input").unwrap_or("(no input)").trim();
        match PromptPhase::detect(prompt) {
            Some(PromptPhase::Reflect) => Ok(format!("The user said \"{input}\"; I should echo it back.")),
            Some(PromptPhase::Plan) => {
                if input.is_empty() {
                    return Ok(r#"{"actions": []}"#.to_string());
                }
                let plan = serde_json::json!({
                    "actions": [{ "agent": "echo", "args": { "x": input } }]
                });
                Ok(plan.to_string())
            }
            Some(PromptPhase::Compose) => {
                let results = section(prompt, "agent results").unwrap_or("");
                let successes: Vec<&str> = results
                    .lines()
                    .filter_map(|l| l.trim().strip_prefix("- ok: "))
                    .collect();
                if successes.is_empty() {
                    Ok(format!("I thought about \"{input}\" but have nothing to add."))
                } else {
                    Ok(successes.join(" "))
                }
            }
            None => Ok(format!("Echo from Mock: {input}")),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::{Expander, PromptBuilder};

    #[tokio::test]
    async fn test_mock_plan_is_echo() {
        let expanded = Expander::new().expand("hello there");
        let prompt = PromptBuilder::new().plan(&expanded, "thinking", &[]);
        let out = MockLlmClient.generate(&prompt).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["actions"][0]["agent"], "echo");
        assert_eq!(v["actions"][0]["args"]["x"], "hello there");
    }
}
