use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::messages::MessageContent;

/// A single declared tool parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Tool as announced by the tool-execution side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

/// Tool definition sent to the model along with the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

impl ToolMetadata {
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let _ = properties.insert(
                param.name.clone(),
                json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        }
    }
}

/// Decoded payload of a successful tool invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolResult {
    /// Direct answer, spliced back as a tool-role message.
    #[serde(rename = "llmresult")]
    LlmResult { content: String },
    /// Re-ask the model with the original user content plus `content`.
    #[serde(rename = "requery")]
    Requery { content: MessageContent },
}

impl ToolResult {
    pub fn decode(value: Value) -> Result<Self, ToolError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match tag.as_str() {
            "llmresult" | "requery" => serde_json::from_value(value)
                .map_err(|e| ToolError::InvalidResult(format!("{tag}: {e}"))),
            _ => Err(ToolError::UnknownResultType(tag)),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool call failed with status {status}: {detail}")]
    Failed { status: String, detail: String },
    #[error("unknown tool result type: {0:?}")]
    UnknownResultType(String),
    #[error("invalid tool result: {0}")]
    InvalidResult(String),
    #[error("tool channel unavailable: {0}")]
    Unavailable(String),
}

/// Channel to whatever executes tools on the model's behalf.
///
/// One call yields exactly one response; there is no implicit retry.
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// Invoke `name` with JSON-encoded `arguments`. `Ok` carries the raw
    /// result payload, to be decoded with [`ToolResult::decode`].
    async fn call_tool(&self, name: &str, arguments: &str) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ContentPart;

    fn weather() -> ToolMetadata {
        ToolMetadata {
            name: "get_weather".into(),
            description: "Current weather for a city".into(),
            parameters: vec![
                ToolParameter {
                    name: "city".into(),
                    param_type: "string".into(),
                    description: "City name".into(),
                    required: true,
                },
                ToolParameter {
                    name: "unit".into(),
                    param_type: "string".into(),
                    description: "celsius or fahrenheit".into(),
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn metadata_to_definition_schema() {
        let def = weather().to_definition();
        assert_eq!(def.name, "get_weather");
        let schema = &def.parameters_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["properties"]["unit"]["description"], "celsius or fahrenheit");
        assert_eq!(schema["required"], json!(["city"]));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn metadata_parses_wire_shape() {
        let meta: ToolMetadata = serde_json::from_value(json!({
            "name": "lookup",
            "description": "d",
            "parameters": [{"name": "q", "type": "string", "description": "query", "required": true}]
        }))
        .unwrap();
        assert_eq!(meta.parameters[0].param_type, "string");
        assert!(meta.parameters[0].required);
    }

    #[test]
    fn decode_llm_result() {
        let result = ToolResult::decode(json!({"type": "llmresult", "content": "42"})).unwrap();
        assert_eq!(result, ToolResult::LlmResult { content: "42".into() });
    }

    #[test]
    fn decode_requery_with_parts() {
        let result = ToolResult::decode(json!({
            "type": "requery",
            "content": [{"type": "text", "text": "extra context"}]
        }))
        .unwrap();
        match result {
            ToolResult::Requery { content } => {
                assert_eq!(content.to_parts(), vec![ContentPart::Text { text: "extra context".into() }]);
            }
            other => panic!("expected requery, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_tag() {
        let err = ToolResult::decode(json!({"type": "mystery", "content": "x"})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownResultType(ref t) if t == "mystery"));

        let err = ToolResult::decode(json!({"content": "x"})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownResultType(ref t) if t.is_empty()));
    }

    #[test]
    fn decode_llm_result_with_non_text_content() {
        let err = ToolResult::decode(json!({"type": "llmresult", "content": [1, 2]})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidResult(_)));
    }
}
