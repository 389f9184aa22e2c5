//! Wire protocol message shapes
//!
//! All control messages are JSON. Inbound bodies are parsed leniently:
//! unknown fields are ignored and optional fields may be absent.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Status notifications pushed on the status destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Connected,
    TurnComplete,
    Interrupted,
    Grading,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Synthesized audio chunk, wire-encoded PCM16 at 24 kHz
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMessage {
    pub data: String,
}

/// Error pushed on the error destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(default, alias = "error")]
    pub message: String,
    #[serde(default)]
    pub rate_limited: bool,
    #[serde(default)]
    pub invalid_key: bool,
    #[serde(default)]
    pub requires_api_key: bool,
}

impl ErrorMessage {
    /// Credential problems end the current attempt
    pub fn credential_fault(&self) -> Option<CredentialFault> {
        if self.rate_limited {
            Some(CredentialFault::RateLimited)
        } else if self.invalid_key {
            Some(CredentialFault::InvalidKey)
        } else if self.requires_api_key {
            Some(CredentialFault::RequiresApiKey)
        } else {
            None
        }
    }
}

/// Credential-related failures reported by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    RateLimited,
    InvalidKey,
    RequiresApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
}

/// Grading report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Report {
    pub session_id: Option<String>,
    pub overall_score: Option<f64>,
    pub communication_score: Option<f64>,
    pub technical_score: Option<f64>,
    pub confidence_score: Option<f64>,
    pub strengths: Option<serde_json::Value>,
    pub improvements: Option<serde_json::Value>,
    pub detailed_analysis: Option<String>,
    pub verdict: Option<String>,
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Standard,
    Hard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Bg,
}

/// Voices offered by the synthesis service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Algieba,
    Kore,
    Fenrir,
    Despina,
}

impl Voice {
    /// Parse a voice id, falling back to the default voice
    pub fn from_id(id: &str) -> Self {
        match id {
            "Kore" => Voice::Kore,
            "Fenrir" => Voice::Fenrir,
            "Despina" => Voice::Despina,
            "Algieba" => Voice::Algieba,
            other => {
                tracing::warn!(voice = other, "Unknown voice id, using default");
                Voice::default()
            }
        }
    }
}

/// Parameters sent with the start message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub candidate_name: String,
    pub position: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<Voice>,
    #[serde(
        default,
        rename = "interviewerNameEN",
        skip_serializing_if = "Option::is_none"
    )]
    pub interviewer_name_en: Option<String>,
    #[serde(
        default,
        rename = "interviewerNameBG",
        skip_serializing_if = "Option::is_none"
    )]
    pub interviewer_name_bg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_api_key: Option<String>,
}

impl StartSession {
    pub fn new(candidate_name: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            candidate_name: candidate_name.into(),
            position: position.into(),
            ..Self::default()
        }
    }

    /// Check required fields and normalize optional ones
    pub fn validated(mut self) -> Result<Self, SessionError> {
        self.candidate_name = self.candidate_name.trim().to_string();
        self.position = self.position.trim().to_string();

        if self.candidate_name.is_empty() {
            return Err(SessionError::InvalidParameters(
                "candidate name is required".to_string(),
            ));
        }
        if self.position.is_empty() {
            return Err(SessionError::InvalidParameters(
                "position is required".to_string(),
            ));
        }

        self.cv_text = non_blank(self.cv_text);
        self.interviewer_name_en = non_blank(self.interviewer_name_en);
        self.interviewer_name_bg = non_blank(self.interviewer_name_bg);
        self.user_api_key = non_blank(self.user_api_key);
        Ok(self)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
