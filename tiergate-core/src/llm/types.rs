//! LLM types for requests, responses, and tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Capability tier a request is routed to.
///
/// Ordered from cheapest/fastest to most capable, so `Tier::A < Tier::C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Fast and cheap
    A,
    /// Balanced capability and cost
    B,
    /// Most capable, highest cost
    C,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 3] = [Tier::A, Tier::B, Tier::C];

    /// The next tier up, or `None` at the top.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::A => Some(Tier::B),
            Tier::B => Some(Tier::C),
            Tier::C => None,
        }
    }

    pub fn is_lowest(self) -> bool {
        self == Tier::A
    }

    pub fn is_highest(self) -> bool {
        self == Tier::C
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "TIER_A" => Ok(Tier::A),
            "B" | "TIER_B" => Ok(Tier::B),
            "C" | "TIER_C" => Ok(Tier::C),
            other => Err(Error::config(format!("unknown tier '{}'", other))),
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Function-style tool definition passed through to backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters
    pub parameters: serde_json::Value,
}

/// Sampling parameters for a single backend call.
///
/// `None` fields fall back to the tier's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON object response
    #[serde(default)]
    pub json_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
}

impl FinishReason {
    /// Map a provider's finish/done reason string.
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" => Self::ToolCalls,
            _ => Self::Stop,
        }
    }
}

/// Provider name used on the terminal error response.
pub const NO_PROVIDER: &str = "none";

/// Generation result returned by backends and by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Generated content; empty on failure
    pub content: String,
    /// Model identifier that produced the content
    pub model: String,
    /// Provider name (`"local"`, `"remote"`, or `"none"`)
    pub provider: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// Populated when generation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Served by the remote backend after the local one was skipped or failed
    #[serde(default)]
    pub is_fallback: bool,
    /// Tier that produced the final response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Number of quality escalations taken before this response
    #[serde(default)]
    pub escalations: u32,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// Successful response from a backend.
    pub fn success(
        content: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        usage: TokenUsage,
        latency_ms: u64,
    ) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            provider: provider.into(),
            finish_reason: FinishReason::Stop,
            usage,
            latency_ms,
            error: None,
            is_fallback: false,
            tier: None,
            escalations: 0,
            timestamp: Utc::now(),
        }
    }

    /// Terminal failure: every backend failed.
    pub fn terminal_failure(message: impl Into<String>, tier: Tier, latency_ms: u64) -> Self {
        Self {
            content: String::new(),
            model: String::new(),
            provider: NO_PROVIDER.to_string(),
            finish_reason: FinishReason::Error,
            usage: TokenUsage::default(),
            latency_ms,
            error: Some(message.into()),
            is_fallback: false,
            tier: Some(tier),
            escalations: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Approximate token count: characters / 4.
pub fn estimate_tokens(messages: &[ChatMessage]) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    (chars / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_and_next() {
        assert!(Tier::A < Tier::B);
        assert!(Tier::B < Tier::C);
        assert_eq!(Tier::A.next(), Some(Tier::B));
        assert_eq!(Tier::B.next(), Some(Tier::C));
        assert_eq!(Tier::C.next(), None);
        assert!(Tier::A.is_lowest());
        assert!(Tier::C.is_highest());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("c".parse::<Tier>().unwrap(), Tier::C);
        assert_eq!("TIER_B".parse::<Tier>().unwrap(), Tier::B);
        assert!("D".parse::<Tier>().is_err());
    }

    #[test]
    fn test_terminal_failure_shape() {
        let resp = Response::terminal_failure("both down", Tier::B, 12);
        assert!(resp.is_error());
        assert_eq!(resp.provider, NO_PROVIDER);
        assert!(resp.content.is_empty());
        assert_eq!(resp.finish_reason, FinishReason::Error);
    }

    #[test]
    fn test_estimate_tokens() {
        let messages = vec![ChatMessage::system("a".repeat(40)), ChatMessage::user("b".repeat(41))];
        assert_eq!(estimate_tokens(&messages), 20);
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn test_params_builder() {
        let params = GenerationParams::new()
            .with_temperature(5.0)
            .with_max_tokens(256)
            .with_json_mode(true);
        assert_eq!(params.temperature, Some(2.0));
        assert_eq!(params.max_tokens, Some(256));
        assert!(params.json_mode);
        assert!(params.tools.is_none());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_provider("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
    }
}
