//! # Message Contracts
//!
//! Everything that crosses the boundary between the coordinator and a
//! collaborator. Payloads are plain immutable values; the only shared key is
//! the [`CorrelationId`] minted when a session is created.
//!
//! ## Wire format
//!
//! ```text
//! { "version": 1, "type": "generation", "payload": { "correlation_id": "...", ... } }
//! ```
//!
//! A payload that names a known collaborator and a readable `correlation_id`
//! but otherwise fails to decode is downgraded to an [`ErrorEnvelope`], so the
//! session records that collaborator as absent instead of failing.

pub mod messages;

pub use messages::{
    ChatTurn, CodeExample, CodeExtractionRequest, CodeExtractionResponse, DocumentChunk,
    GenerationRequest, GenerationResponse, ProjectRef, ReasoningRequest, ReasoningResponse,
    RoutingRequest, RoutingResponse, SearchRequest, SearchResponse, SynthesisRequest,
    SynthesisResponse, TurnRole,
};

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Version stamped on every encoded message
pub const CONTRACT_VERSION: u64 = 1;

/// Unique token linking one session to every request and response it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoordinatorError::Contract(format!("bad correlation id '{s}': {e}")))
    }
}

/// Opaque address the terminal answer is delivered to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerReference(String);

impl CallerReference {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The external services the coordinator talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorKind {
    Routing,
    Search,
    Reasoning,
    Generation,
    #[serde(rename = "codegen", alias = "code_extraction")]
    CodeExtraction,
    Synthesis,
}

impl CollaboratorKind {
    /// Fan-out collaborators, in reporting order
    pub const FAN_OUT: [CollaboratorKind; 3] = [
        CollaboratorKind::Generation,
        CollaboratorKind::Reasoning,
        CollaboratorKind::CodeExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Search => "search",
            Self::Reasoning => "reasoning",
            Self::Generation => "generation",
            Self::CodeExtraction => "codegen",
            Self::Synthesis => "synthesis",
        }
    }

    /// Optional collaborators may be absent at synthesis time
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Reasoning | Self::CodeExtraction)
    }

    pub fn is_fan_out(&self) -> bool {
        Self::FAN_OUT.contains(self)
    }
}

impl fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollaboratorKind {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "routing" => Ok(Self::Routing),
            "search" => Ok(Self::Search),
            "reasoning" => Ok(Self::Reasoning),
            "generation" => Ok(Self::Generation),
            "codegen" | "code_extraction" => Ok(Self::CodeExtraction),
            "synthesis" => Ok(Self::Synthesis),
            other => Err(CoordinatorError::Contract(format!(
                "unknown collaborator '{other}'"
            ))),
        }
    }
}

/// A collaborator's failure report in place of its typed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub correlation_id: CorrelationId,
    #[serde(rename = "collaborator_name")]
    pub collaborator: CollaboratorKind,
    pub message: String,
}

/// Anything that belongs to exactly one session
pub trait Correlated {
    fn correlation_id(&self) -> CorrelationId;
}

macro_rules! impl_correlated {
    ($($ty:ty),* $(,)?) => {
        $(impl Correlated for $ty {
            fn correlation_id(&self) -> CorrelationId {
                self.correlation_id
            }
        })*
    };
}

impl_correlated!(
    RoutingRequest,
    RoutingResponse,
    SearchRequest,
    SearchResponse,
    ReasoningRequest,
    ReasoningResponse,
    GenerationRequest,
    GenerationResponse,
    CodeExtractionRequest,
    CodeExtractionResponse,
    SynthesisRequest,
    SynthesisResponse,
    ErrorEnvelope,
);

/// Request sent to a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    Routing(RoutingRequest),
    Search(SearchRequest),
    Reasoning(ReasoningRequest),
    Generation(GenerationRequest),
    #[serde(rename = "codegen")]
    CodeExtraction(CodeExtractionRequest),
    Synthesis(SynthesisRequest),
}

impl Outbound {
    pub fn collaborator(&self) -> CollaboratorKind {
        match self {
            Self::Routing(_) => CollaboratorKind::Routing,
            Self::Search(_) => CollaboratorKind::Search,
            Self::Reasoning(_) => CollaboratorKind::Reasoning,
            Self::Generation(_) => CollaboratorKind::Generation,
            Self::CodeExtraction(_) => CollaboratorKind::CodeExtraction,
            Self::Synthesis(_) => CollaboratorKind::Synthesis,
        }
    }
}

impl Correlated for Outbound {
    fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Routing(r) => r.correlation_id,
            Self::Search(r) => r.correlation_id,
            Self::Reasoning(r) => r.correlation_id,
            Self::Generation(r) => r.correlation_id,
            Self::CodeExtraction(r) => r.correlation_id,
            Self::Synthesis(r) => r.correlation_id,
        }
    }
}

/// Response (or failure) coming back from a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Inbound {
    Routing(RoutingResponse),
    Search(SearchResponse),
    Reasoning(ReasoningResponse),
    Generation(GenerationResponse),
    #[serde(rename = "codegen")]
    CodeExtraction(CodeExtractionResponse),
    Synthesis(SynthesisResponse),
    Error(ErrorEnvelope),
}

impl Inbound {
    /// The collaborator this message is attributed to
    pub fn collaborator(&self) -> CollaboratorKind {
        match self {
            Self::Routing(_) => CollaboratorKind::Routing,
            Self::Search(_) => CollaboratorKind::Search,
            Self::Reasoning(_) => CollaboratorKind::Reasoning,
            Self::Generation(_) => CollaboratorKind::Generation,
            Self::CodeExtraction(_) => CollaboratorKind::CodeExtraction,
            Self::Synthesis(_) => CollaboratorKind::Synthesis,
            Self::Error(e) => e.collaborator,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl Correlated for Inbound {
    fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Routing(r) => r.correlation_id,
            Self::Search(r) => r.correlation_id,
            Self::Reasoning(r) => r.correlation_id,
            Self::Generation(r) => r.correlation_id,
            Self::CodeExtraction(r) => r.correlation_id,
            Self::Synthesis(r) => r.correlation_id,
            Self::Error(e) => e.correlation_id,
        }
    }
}

/// Lifts a typed collaborator response into the inbound envelope
pub trait IntoInbound {
    fn into_inbound(self) -> Inbound;
}

macro_rules! impl_into_inbound {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl IntoInbound for $ty {
            fn into_inbound(self) -> Inbound {
                Inbound::$variant(self)
            }
        })*
    };
}

impl_into_inbound!(
    RoutingResponse => Routing,
    SearchResponse => Search,
    ReasoningResponse => Reasoning,
    GenerationResponse => Generation,
    CodeExtractionResponse => CodeExtraction,
    SynthesisResponse => Synthesis,
    ErrorEnvelope => Error,
);

/// Encode an inbound message with its contract version
pub fn encode_inbound(inbound: &Inbound) -> Result<String> {
    let mut value = serde_json::to_value(inbound)?;
    if let Value::Object(map) = &mut value {
        map.insert("version".to_string(), Value::from(CONTRACT_VERSION));
    }
    Ok(serde_json::to_string(&value)?)
}

/// Decode a raw inbound message.
///
/// A message missing `version` is read as the current version. Payloads that
/// fail to decode but can still be attributed to a collaborator and a session
/// come back as [`Inbound::Error`].
pub fn decode_inbound(raw: &str) -> Result<Inbound> {
    let mut value: Value = serde_json::from_str(raw)?;

    if let Value::Object(map) = &mut value {
        if let Some(version) = map.remove("version") {
            if version.as_u64() != Some(CONTRACT_VERSION) {
                return Err(CoordinatorError::Contract(format!(
                    "unsupported contract version {version}"
                )));
            }
        }
    }

    match serde_json::from_value::<Inbound>(value.clone()) {
        Ok(inbound) => Ok(inbound),
        Err(err) => salvage(&value, &err.to_string())
            .ok_or_else(|| CoordinatorError::Contract(err.to_string())),
    }
}

fn salvage(value: &Value, reason: &str) -> Option<Inbound> {
    let tag = value.get("type")?.as_str()?;
    let payload = value.get("payload")?;
    let correlation_id = payload
        .get("correlation_id")?
        .as_str()?
        .parse::<CorrelationId>()
        .ok()?;

    let collaborator = if tag == "error" {
        payload
            .get("collaborator_name")?
            .as_str()?
            .parse::<CollaboratorKind>()
            .ok()?
    } else {
        tag.parse::<CollaboratorKind>().ok()?
    };

    Some(Inbound::Error(ErrorEnvelope {
        correlation_id,
        collaborator,
        message: format!("malformed {collaborator} payload: {reason}"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(id: CorrelationId) -> Inbound {
        Inbound::Generation(GenerationResponse {
            correlation_id: id,
            answer_text: "Use the coordinator.".to_string(),
            sources_used: vec!["chainlink".to_string()],
            token_count: 1200,
        })
    }

    #[test]
    fn test_encoded_message_carries_version_and_tag() {
        let id = CorrelationId::new();
        let json = encode_inbound(&generation(id)).unwrap();
        assert!(json.contains("\"version\":1"));
        assert!(json.contains("\"type\":\"generation\""));
        assert!(json.contains(&id.to_string()));
    }

    #[test]
    fn test_decode_accepts_encoded_message() {
        let id = CorrelationId::new();
        let decoded = decode_inbound(&encode_inbound(&generation(id)).unwrap()).unwrap();
        assert_eq!(decoded, generation(id));
        assert_eq!(decoded.correlation_id(), id);
    }

    #[test]
    fn test_malformed_payload_becomes_error_envelope() {
        let id = CorrelationId::new();
        let raw = format!(
            r#"{{"version":1,"type":"reasoning","payload":{{"correlation_id":"{id}","confidence":"very"}}}}"#
        );
        match decode_inbound(&raw).unwrap() {
            Inbound::Error(envelope) => {
                assert_eq!(envelope.correlation_id, id);
                assert_eq!(envelope.collaborator, CollaboratorKind::Reasoning);
                assert!(envelope.message.contains("malformed"));
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_unattributable_payload_is_rejected() {
        let raw = r#"{"type":"search","payload":{"chunks":[]}}"#;
        assert!(matches!(
            decode_inbound(raw),
            Err(CoordinatorError::Contract(_))
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let id = CorrelationId::new();
        let raw = format!(
            r#"{{"version":7,"type":"error","payload":{{"correlation_id":"{id}","collaborator_name":"search","message":"x"}}}}"#
        );
        assert!(decode_inbound(&raw).is_err());
    }

    #[test]
    fn test_codegen_alias() {
        assert_eq!(
            "code_extraction".parse::<CollaboratorKind>().unwrap(),
            CollaboratorKind::CodeExtraction
        );
        assert_eq!(CollaboratorKind::CodeExtraction.as_str(), "codegen");
        assert!(CollaboratorKind::CodeExtraction.is_optional());
        assert!(!CollaboratorKind::Generation.is_optional());
        assert!(CollaboratorKind::Generation.is_fan_out());
    }
}
