//! Span message and error descriptors.
//!
//! Producers (plugins) vary, but consumers only ever need two things from a
//! descriptor: rendered text and structured detail. Both are closed enums.

use crate::profiler::StackFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a span is doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Text {
        text: String,
    },

    /// `{}` placeholders in `template` are replaced by `args` in order
    Template {
        template: String,
        args: Vec<String>,
    },

    Detailed {
        text: String,
        detail: BTreeMap<String, String>,
    },
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text { text: text.into() }
    }

    pub fn template(template: impl Into<String>, args: Vec<String>) -> Self {
        Message::Template {
            template: template.into(),
            args,
        }
    }

    pub fn detailed(text: impl Into<String>, detail: BTreeMap<String, String>) -> Self {
        Message::Detailed {
            text: text.into(),
            detail,
        }
    }

    /// Render to display text
    pub fn render(&self) -> String {
        match self {
            Message::Text { text } | Message::Detailed { text, .. } => text.clone(),
            Message::Template { template, args } => render_template(template, args),
        }
    }

    pub fn detail(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Message::Detailed { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

// missing args leave their placeholder in place
fn render_template(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Exception details captured with an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedException {
    pub type_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Outermost frame first
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

/// Why a span failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorMessage {
    Text {
        text: String,
    },

    Exception {
        text: String,
        exception: CapturedException,
    },
}

impl ErrorMessage {
    pub fn text(text: impl Into<String>) -> Self {
        ErrorMessage::Text { text: text.into() }
    }

    pub fn exception(text: impl Into<String>, exception: CapturedException) -> Self {
        ErrorMessage::Exception {
            text: text.into(),
            exception,
        }
    }

    pub fn render(&self) -> &str {
        match self {
            ErrorMessage::Text { text } | ErrorMessage::Exception { text, .. } => text,
        }
    }

    pub fn captured_exception(&self) -> Option<&CapturedException> {
        match self {
            ErrorMessage::Exception { exception, .. } => Some(exception),
            ErrorMessage::Text { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_rendering() {
        let message = Message::template(
            "jdbc query: {} [{}]",
            vec!["select 1".to_string(), "ok".to_string()],
        );
        assert_eq!(message.render(), "jdbc query: select 1 [ok]");
    }

    #[test]
    fn test_template_missing_args() {
        let message = Message::template("{} and {}", vec!["one".to_string()]);
        assert_eq!(message.render(), "one and {}");
    }

    #[test]
    fn test_detail_only_on_detailed() {
        let mut detail = BTreeMap::new();
        detail.insert("method".to_string(), "GET".to_string());
        let message = Message::detailed("/orders", detail);
        assert_eq!(message.render(), "/orders");
        assert_eq!(message.detail().unwrap()["method"], "GET");
        assert!(Message::text("plain").detail().is_none());
    }

    #[test]
    fn test_error_message_serializes_tagged() {
        let error = ErrorMessage::text("timeout");
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"kind":"text","text":"timeout"}"#);
    }
}
