//! Chat message model on top of the generic [`Value`] tree
//!
//! `listMessages` returns documents newest first:
//! `{ _id, _creationTime, author, body }`. The terminal shows them oldest first.

use std::collections::BTreeMap;
use std::fmt;

use livesync_core::{args, Args, OptimisticView, Value};

use crate::error::{CliError, Result};

pub const LIST_MESSAGES: &str = "listMessages";
pub const SEND_MESSAGE: &str = "sendMessage";

/// Arguments of the message list subscription
pub fn list_args() -> Args {
    args! {}
}

/// Arguments of one `sendMessage` call
pub fn send_args(author: &str, body: &str) -> Args {
    args! { "author" => author, "body" => body }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Document id; `None` while the message only exists as an optimistic echo
    pub id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub creation_time: Option<f64>,
    pub author: String,
    pub body: String,
}

impl ChatMessage {
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CliError::MessageFormat(format!("expected object, got {}", value.type_name()))
        })?;
        let text = |field: &str| -> Result<String> {
            object
                .get(field)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| CliError::MessageFormat(format!("missing string field `{field}`")))
        };

        Ok(Self {
            id: object.get("_id").and_then(Value::as_str).map(String::from),
            creation_time: object.get("_creationTime").and_then(Value::as_f64),
            author: text("author")?,
            body: text("body")?,
        })
    }

    /// Document shape used for the optimistic echo of a message being sent
    pub fn pending_value(author: &str, body: &str) -> Value {
        let mut object = BTreeMap::new();
        object.insert("author".to_string(), Value::from(author));
        object.insert("body".to_string(), Value::from(body));
        Value::Object(object)
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.author, self.body)?;
        if self.is_pending() {
            write!(f, " (sending)")?;
        }
        Ok(())
    }
}

/// Parse a `listMessages` result into display order, oldest first
pub fn display_order(value: &Value) -> Result<Vec<ChatMessage>> {
    let items = value.as_array().ok_or_else(|| {
        CliError::MessageFormat(format!("expected array, got {}", value.type_name()))
    })?;
    items.iter().rev().map(ChatMessage::from_value).collect()
}

/// Optimistic update that shows `body` at the top of the message list until the
/// backend acknowledges it
pub fn optimistic_echo(
    author: &str,
    body: &str,
) -> impl Fn(&mut dyn OptimisticView) + Send + Sync + 'static {
    let pending = ChatMessage::pending_value(author, body);
    move |view: &mut dyn OptimisticView| {
        let args = list_args();
        let Some(Value::Array(current)) = view.get_query(LIST_MESSAGES, &args) else {
            return;
        };
        let mut messages = Vec::with_capacity(current.len() + 1);
        messages.push(pending.clone());
        messages.extend(current.iter().cloned());
        view.set_query(LIST_MESSAGES, &args, Value::Array(messages));
    }
}
