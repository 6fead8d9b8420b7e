//! 规划输出解析
//!
//! 生成端应返回 JSON：`{"actions": [{"agent": "echo", "args": {...}}]}` 或直接是数组；
//! 支持 ```json 代码块包裹。空输出、"none"、空数组都表示空计划。
//! 无法解析时返回 ProviderFailure，由循环控制器按 malformed_plan 策略处理。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::CoreError;

/// 计划中的一项行动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(alias = "agent_name")]
    pub agent: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

/// 有序行动列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

fn malformed(detail: impl std::fmt::Display) -> CoreError {
    CoreError::ProviderFailure(format!("malformed plan: {detail}"))
}

/// 提取 JSON 片段（```json 代码块，或从第一个 { / [ 起能完整解析的那个值）
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let mut starts: Vec<usize> = [text.find('{'), text.find('[')].into_iter().flatten().collect();
    starts.sort_unstable();
    // 值的结尾交给解析器判断；前缀里的 [Plan] 之类不会截断后面的对象
    for &start in &starts {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(_)) = stream.next() {
            return Some(&text[start..start + stream.byte_offset()]);
        }
    }
    starts.first().map(|&start| &text[start..])
}

/// 解析生成端的规划输出
pub fn parse_plan(output: &str) -> Result<Plan, CoreError> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(Plan::default());
    }

    let json_str = extract_json(trimmed).ok_or_else(|| malformed("no JSON found"))?;
    let value: Value = serde_json::from_str(json_str).map_err(|e| malformed(format!("{e}: {json_str}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("actions") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(other) => return Err(malformed(format!("'actions' is not a list: {other}"))),
            None if map.contains_key("agent") => vec![Value::Object(map)],
            None => return Err(malformed("missing 'actions'")),
        },
        other => return Err(malformed(format!("unexpected JSON: {other}"))),
    };

    let actions = items
        .into_iter()
        .map(|item| {
            let action: PlannedAction = serde_json::from_value(item).map_err(malformed)?;
            if !(action.args.is_object() || action.args.is_null()) {
                return Err(malformed(format!("args for '{}' is not an object", action.agent)));
            }
            Ok(action)
        })
        .collect::<Result<Vec<_>, CoreError>>()?;

    Ok(Plan { actions })
}
