//! Conversation model: role-tagged turns made of content parts.
//!
//! The agent loop owns an ordered sequence of [`Turn`]s and resubmits the
//! whole sequence on every iteration. Each turn carries one or more
//! [`Part`]s: plain text, an inline base64 image, a function call emitted by
//! the model, or a function response produced by a tool handler.
//!
//! The invariant the primary API enforces positionally — every function-call
//! turn is answered by a function-response turn before the next model turn is
//! requested — is maintained by [`crate::agent::AgentLoop`], not here; this
//! module only knows how to build turns and translate them to and from the
//! wire format.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Who produced a turn. The primary API knows exactly two roles; tool
/// responses travel inside a `user` turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One content part inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    /// Plain text.
    Text(String),
    /// Inline binary image, already base64-encoded for the wire.
    InlineImage { mime_type: String, data: String },
    /// A tool invocation requested by the model.
    FunctionCall { name: String, args: Value },
    /// The result of a tool invocation, fed back to the model.
    FunctionResponse { name: String, response: Value },
}

/// A role-tagged entry in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    /// Create a new empty user turn.
    pub fn user() -> Self {
        Turn {
            role: Role::User,
            parts: Vec::new(),
        }
    }

    /// Create a new empty model turn.
    pub fn model() -> Self {
        Turn {
            role: Role::Model,
            parts: Vec::new(),
        }
    }

    /// Add any part to the turn.
    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Add a text part.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_part(Part::Text(text.into()))
    }

    /// Add a PNG image part, base64-encoding the raw bytes.
    pub fn with_png(self, png: &[u8]) -> Self {
        self.with_part(Part::InlineImage {
            mime_type: "image/png".to_string(),
            data: STANDARD.encode(png),
        })
    }

    /// Add a function-call part.
    pub fn with_function_call(self, name: impl Into<String>, args: Value) -> Self {
        self.with_part(Part::FunctionCall {
            name: name.into(),
            args,
        })
    }

    /// Add a function-response part.
    pub fn with_function_response(self, name: impl Into<String>, response: Value) -> Self {
        self.with_part(Part::FunctionResponse {
            name: name.into(),
            response,
        })
    }
}

/// Decode an inline image part back to raw bytes.
///
/// Inverse of [`Turn::with_png`]; used by tests to assert the wire
/// representation is lossless and by callers that want to persist what was
/// actually sent.
pub fn decode_inline_image(part: &Part) -> Option<Vec<u8>> {
    match part {
        Part::InlineImage { data, .. } => STANDARD.decode(data).ok(),
        _ => None,
    }
}

/// Convert the accumulated conversation to the primary API's `contents`
/// array.
///
/// Wire shapes are fixed by the vendor:
/// `{"text": ...}`, `{"inline_data": {"mime_type", "data"}}`,
/// `{"functionCall": {"name", "args"}}`,
/// `{"functionResponse": {"name", "response"}}`.
pub fn turns_to_wire(turns: &[Turn]) -> Vec<Value> {
    turns
        .iter()
        .map(|turn| {
            let parts: Vec<Value> = turn.parts.iter().map(part_to_wire).collect();
            json!({
                "role": turn.role,
                "parts": parts,
            })
        })
        .collect()
}

fn part_to_wire(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({ "text": text }),
        Part::InlineImage { mime_type, data } => json!({
            "inline_data": { "mime_type": mime_type, "data": data }
        }),
        Part::FunctionCall { name, args } => json!({
            "functionCall": { "name": name, "args": args }
        }),
        Part::FunctionResponse { name, response } => json!({
            "functionResponse": { "name": name, "response": response }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_wire_shape() {
        let turn = Turn::user().with_text("read this page").with_png(b"\x89PNG fake");
        let wire = turns_to_wire(&[turn]);

        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["parts"][0]["text"], "read this page");
        assert_eq!(wire[0]["parts"][1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn function_call_and_response_wire_shape() {
        let call = Turn::model().with_function_call("ask_ocr", json!({"page_num": 3}));
        let resp = Turn::user().with_function_response("ask_ocr", json!({"status": "ok"}));
        let wire = turns_to_wire(&[call, resp]);

        assert_eq!(wire[0]["parts"][0]["functionCall"]["name"], "ask_ocr");
        assert_eq!(wire[0]["parts"][0]["functionCall"]["args"]["page_num"], 3);
        assert_eq!(wire[1]["parts"][0]["functionResponse"]["response"]["status"], "ok");
    }

    #[test]
    fn inline_image_round_trips_byte_identical() {
        // Not a real PNG; the encoding layer must not care.
        let bytes: Vec<u8> = (0u8..=255).collect();
        let turn = Turn::user().with_png(&bytes);
        let decoded = decode_inline_image(&turn.parts[0]).expect("image part");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Role::Model).unwrap(), json!("model"));
        assert_eq!(serde_json::to_value(Role::User).unwrap(), json!("user"));
    }
}
