//! Session data model: roles, parts, contents, and the session document.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A unique identifier for a session. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The role of one turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The result of a function call, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Map<String, Value>,
}

/// One part of a turn's content.
///
/// The history is a heterogeneous ordered sequence; a plain structural
/// encoding cannot round-trip it unambiguously, so the persisted form is a
/// discriminated `{type, content}` record.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Part::Text(_) => "text",
            Part::FunctionCall(_) => "function_call",
            Part::FunctionResponse(_) => "function_response",
        }
    }
}

/// Persisted form of a [`Part`].
#[derive(Serialize, Deserialize)]
struct RawPart {
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default)]
    content: Value,
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let content = match self {
            Part::Text(text) => Value::String(text.clone()),
            Part::FunctionCall(call) => {
                serde_json::to_value(call).map_err(serde::ser::Error::custom)?
            }
            Part::FunctionResponse(response) => {
                serde_json::to_value(response).map_err(serde::ser::Error::custom)?
            }
        };

        RawPart {
            part_type: self.type_name().to_string(),
            content,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPart::deserialize(deserializer)?;

        match raw.part_type.as_str() {
            "text" => match raw.content {
                Value::String(text) => Ok(Part::Text(text)),
                other => Err(D::Error::custom(format!(
                    "text part content must be a string, got {other}"
                ))),
            },
            "function_call" => serde_json::from_value(raw.content)
                .map(Part::FunctionCall)
                .map_err(D::Error::custom),
            "function_response" => {
                // A null or absent payload decodes to an empty result map
                // rather than failing the whole session.
                if raw.content.is_null() {
                    return Ok(Part::FunctionResponse(FunctionResponse {
                        name: String::new(),
                        response: Map::new(),
                    }));
                }
                serde_json::from_value(raw.content)
                    .map(Part::FunctionResponse)
                    .map_err(D::Error::custom)
            }
            other => Err(D::Error::custom(format!("unknown part type: {other}"))),
        }
    }
}

/// One turn of the conversation: a role and its ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// A user turn carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Combined text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function calls in emitted order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts.iter().filter_map(Part::as_function_call).collect()
    }
}

/// The durable unit of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<Content>,
}

impl Session {
    /// Create a fresh session with a random id.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// Append one turn. History is append-only during a processing cycle.
    pub fn push(&mut self, content: Content) {
        self.history.push(content);
    }

    /// Advance `updated_at`. It never moves backwards, even if the clock
    /// does.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// First user text in the history, for listings.
    pub fn first_user_text(&self) -> Option<&str> {
        self.history
            .iter()
            .find(|content| content.role == Role::User)
            .and_then(|content| content.parts.iter().find_map(Part::as_text))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
