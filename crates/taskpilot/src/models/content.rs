use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// Result payload produced by a tool, either plain text or structured data
pub enum Content {
    Text { text: String },
    Structured { value: Value },
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn structured<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Content::Structured {
            value: serde_json::to_value(value)?,
        })
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Content::Structured { value } => Some(value),
            _ => None,
        }
    }

    /// The text sent to the model for this content
    pub fn as_wire_text(&self) -> String {
        match self {
            Content::Text { text } => text.clone(),
            Content::Structured { value } => value.to_string(),
        }
    }
}
