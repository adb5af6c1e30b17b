//! Core types and value objects for the conversation log.
//!
//! Defines turns, action records, and their supporting enumerations.
//! These types round-trip exactly through serde so the persisted log
//! survives a storage-backend swap unchanged.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Newtype wrappers
// =============================================================================

/// Unix-epoch timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

/// Identifier of a turn within one session.
///
/// Assigned by the memory store; strictly increasing per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Who produced a turn.
///
/// `System` marks degraded turns (e.g. a model-failure fallback) so the
/// log distinguishes them from genuine assistant output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Terminal status of a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Succeeded => write!(f, "succeeded"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(ActionStatus::Succeeded),
            "failed" => Ok(ActionStatus::Failed),
            "skipped" => Ok(ActionStatus::Skipped),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

// =============================================================================
// Argument values
// =============================================================================

/// A primitive action-argument value.
///
/// Action arguments are restricted to primitives so records stay
/// comparable and loggable; nested structures are rejected at the
/// dispatch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{}", x),
            ArgValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

/// Ordered name-to-value argument mapping.
pub type ArgMap = BTreeMap<String, ArgValue>;

// =============================================================================
// Domain structs
// =============================================================================

/// Outcome of one dispatched action, attached to the assistant turn
/// that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_name: String,
    pub arguments: ArgMap,
    pub status: ActionStatus,
    pub result_text: Option<String>,
}

/// One utterance-or-response unit in the conversation log.
///
/// Immutable once written. `turn_id` is `None` until the memory store
/// assigns one on first append; the embedding is computed exactly once
/// at append time and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: Option<TurnId>,
    pub session_id: Uuid,
    pub timestamp: Timestamp,
    pub role: Role,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub action: Option<ActionRecord>,
}

impl Turn {
    /// Create a new unpersisted turn for the given session.
    pub fn new(session_id: Uuid, role: Role, text: impl Into<String>) -> Self {
        Self {
            turn_id: None,
            session_id,
            timestamp: Timestamp::now(),
            role,
            text: text.into(),
            embedding: None,
            action: None,
        }
    }

    /// Attach an action record to this turn.
    pub fn with_action(mut self, record: ActionRecord) -> Self {
        self.action = Some(record);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
