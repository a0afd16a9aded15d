//! 响应 Schema 与结构化解析
//!
//! schemars 生成各阶段响应的 JSON Schema 拼入 prompt；parse_llm_json 从模型输出中提取 JSON
//! （```json 代码块、前后废话、尾逗号），再反序列化为目标类型，失败即 Schema 错误。

use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

use crate::llm::{LlmClient, LlmError, StructuredPrompt, Usage};

static TRAILING_COMMA_RE: OnceLock<Regex> = OnceLock::new();

fn trailing_comma_re() -> &'static Regex {
    TRAILING_COMMA_RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"))
}

/// 返回类型 T 的 JSON Schema 字符串，可拼入 system prompt
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 去掉 ```json ... ``` / ``` ... ``` 围栏
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[start + 3..];
    // 跳过语言标记（json / JSON）所在行
    let rest = match rest.find('\n') {
        Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphabetic()) => &rest[nl + 1..],
        _ => rest,
    };
    rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
}

/// 解析模型输出为 T：先整体解析，再修复尾逗号，最后从第一个 `{` / `[` 起流式读取一个 JSON 值
pub fn parse_llm_json<T: DeserializeOwned>(output: &str) -> Result<T, LlmError> {
    let body = strip_fences(output);
    if body.is_empty() {
        return Err(LlmError::Schema("empty response".to_string()));
    }

    let first_err = match serde_json::from_str::<T>(body) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    let repaired = trailing_comma_re().replace_all(body, "$1");
    if let Ok(v) = serde_json::from_str::<T>(&repaired) {
        return Ok(v);
    }

    // 前后带说明文字：从第一个 JSON 起始符读取一个完整值，忽略其后内容
    if let Some(start) = repaired.find(|c: char| c == '{' || c == '[') {
        let mut stream =
            serde_json::Deserializer::from_str(&repaired[start..]).into_iter::<T>();
        match stream.next() {
            Some(Ok(v)) => return Ok(v),
            Some(Err(e)) => return Err(schema_error(e, body)),
            None => {}
        }
    }

    Err(schema_error(first_err, body))
}

fn schema_error(err: serde_json::Error, body: &str) -> LlmError {
    let preview: String = body.chars().take(200).collect();
    LlmError::Schema(format!("{err}: {preview}"))
}

/// 调用推理服务并解析为 T；用量总是返回（即使解析失败，调用已经产生了成本）
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    prompt: &StructuredPrompt,
) -> (Usage, Result<T, LlmError>) {
    match client.complete(prompt).await {
        Ok(completion) => (completion.usage, parse_llm_json(&completion.text)),
        Err(e) => (Usage::default(), Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, JsonSchema)]
    struct Plan {
        sub_questions: Vec<String>,
    }

    #[test]
    fn test_parse_plain_list() {
        let v: Vec<String> = parse_llm_json(r#"["a?", "b?"]"#).unwrap();
        assert_eq!(v, vec!["a?", "b?"]);
    }

    #[test]
    fn test_parse_fenced_with_trailing_comma() {
        let out = "Here is the plan:\n```json\n{\"sub_questions\": [\"a?\", \"b?\",]}\n```\nThanks";
        let v: Plan = parse_llm_json(out).unwrap();
        assert_eq!(v.sub_questions.len(), 2);
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let out = "Sure! {\"sub_questions\": [\"x?\"]} Hope this helps.";
        let v: Plan = parse_llm_json(out).unwrap();
        assert_eq!(v.sub_questions, vec!["x?"]);
    }

    #[test]
    fn test_parse_failure_is_schema_error() {
        let err = parse_llm_json::<Plan>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
        assert!(matches!(parse_llm_json::<Plan>("   ").unwrap_err(), LlmError::Schema(_)));
    }

    #[test]
    fn test_schema_json_mentions_fields() {
        let schema = schema_json::<Plan>();
        assert!(schema.contains("sub_questions"));
    }
}
