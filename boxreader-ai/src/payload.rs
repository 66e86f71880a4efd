//! Request bodies for the chat-completions endpoint and extraction of the
//! answer from a non-streaming response.

use boxreader_core::SelectionModel;
use serde::Serialize;
use serde_json::Value;

use crate::config::AiConfig;
use crate::error::AnnotateError;

const EMPTY_TEXT_MARKER: &str = "—";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionMeta {
    pub pages: Vec<u32>,
    pub count: usize,
}

/// Everything derived from the selection at the moment a request starts.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRequest {
    pub instruction: String,
    pub text: String,
    pub meta: SelectionMeta,
    pub signature: String,
}

impl AnnotationRequest {
    pub fn from_selection(selection: &SelectionModel, instruction: &str) -> Self {
        Self {
            instruction: instruction.trim().to_string(),
            text: selection.text(),
            meta: SelectionMeta {
                pages: selection.pages(),
                count: selection.len(),
            },
            signature: selection.signature(),
        }
    }

    pub fn user_message(&self) -> String {
        let text = if self.text.is_empty() {
            EMPTY_TEXT_MARKER
        } else {
            self.text.as_str()
        };
        let meta = serde_json::to_string(&self.meta).unwrap_or_else(|_| "{}".to_string());
        format!("Selected text:\n{text}\n\nMetadata:\n{meta}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(config: &AiConfig, request: &AnnotationRequest) -> Self {
        Self {
            model: config.model.trim().to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.instruction.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: request.user_message(),
                },
            ],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AnnotateError> {
        serde_json::to_vec(self).map_err(|err| AnnotateError::Transport(err.to_string()))
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Answer text of a complete response. Known shapes are tried in order and
/// the first non-empty one wins.
pub fn extract_full_text(body: &Value) -> Option<String> {
    non_empty(body.pointer("/choices/0/message/content"))
        .or_else(|| non_empty(body.pointer("/choices/0/text")))
        .or_else(|| non_empty(body.get("output_text")))
        .or_else(|| non_empty(body.pointer("/output/0/content/0/text")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxreader_core::{BBox, Glyph};
    use serde_json::json;

    fn selection() -> SelectionModel {
        let mut selection = SelectionModel::new();
        for (page, id, ch, x) in [(2, 0, 'h', 0.0), (2, 1, 'i', 10.0), (1, 4, 'a', 0.0)] {
            selection.toggle(&Glyph {
                page,
                id,
                ch,
                bbox: BBox::new(x, 0.0, 10.0, 12.0),
            });
        }
        selection
    }

    #[test]
    fn request_carries_text_and_metadata() {
        let request = AnnotationRequest::from_selection(&selection(), "  explain  ");
        assert_eq!(request.instruction, "explain");
        assert_eq!(request.text, "a\nhi");
        assert_eq!(request.meta.pages, vec![1, 2]);
        assert_eq!(request.signature, "1-4|2-0|2-1");
        assert_eq!(
            request.user_message(),
            "Selected text:\na\nhi\n\nMetadata:\n{\"pages\":[1,2],\"count\":3}"
        );
    }

    #[test]
    fn optional_sampling_fields_are_omitted() {
        let config = AiConfig {
            temperature: None,
            max_tokens: None,
            ..AiConfig::default()
        };
        let request = AnnotationRequest::from_selection(&selection(), "x");
        let body = serde_json::to_value(ChatRequest::new(&config, &request)).unwrap();
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["role"], json!("user"));
    }

    #[test]
    fn full_text_follows_field_priority() {
        let both = json!({
            "choices": [{"message": {"content": "from message"}, "text": "from text"}],
            "output_text": "from output_text"
        });
        assert_eq!(extract_full_text(&both).as_deref(), Some("from message"));

        let raw = json!({"choices": [{"text": "from text"}]});
        assert_eq!(extract_full_text(&raw).as_deref(), Some("from text"));

        let empty_message = json!({
            "choices": [{"message": {"content": ""}}],
            "output_text": "fallback"
        });
        assert_eq!(extract_full_text(&empty_message).as_deref(), Some("fallback"));

        let nested = json!({"output": [{"content": [{"text": "nested"}]}]});
        assert_eq!(extract_full_text(&nested).as_deref(), Some("nested"));

        assert_eq!(extract_full_text(&json!({"id": 1})), None);
    }
}
