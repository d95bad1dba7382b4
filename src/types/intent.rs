//! Classified user intent.

use serde_json::Value;

/// What the classifier made of a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// A structured call to one of the functions in the catalog.
    FunctionCall { name: String, arguments: Value },

    /// The classifier answered conversationally without choosing a function.
    FreeText(String),

    /// Nothing actionable.
    Empty,
}

impl Intent {
    pub fn function_call(name: impl Into<String>, arguments: Value) -> Self {
        Intent::FunctionCall {
            name: name.into(),
            arguments,
        }
    }

    /// Builds an intent from the raw pieces of a classifier reply.
    ///
    /// A function call wins over text; blank text is treated as no intent.
    pub fn from_parts(function_call: Option<(String, Value)>, content: Option<String>) -> Self {
        if let Some((name, arguments)) = function_call {
            return Intent::FunctionCall { name, arguments };
        }
        match content {
            Some(text) if !text.trim().is_empty() => Intent::FreeText(text),
            _ => Intent::Empty,
        }
    }
}
