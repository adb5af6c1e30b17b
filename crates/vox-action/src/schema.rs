//! Parameter schemas for capability descriptors.
//!
//! Each capability declares its parameters as a flat list of named,
//! typed, required-or-optional specs. Validation coerces the loosely
//! typed values extracted from model output into the declared primitive
//! types; anything that does not fit fails before execution.

use std::fmt;

use serde::{Deserialize, Serialize};

use vox_core::types::{ArgMap, ArgValue};

use crate::error::ActionError;

/// Primitive type of one action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::String => write!(f, "string"),
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Float => write!(f, "float"),
            ParamKind::Boolean => write!(f, "boolean"),
        }
    }
}

/// One declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    /// Render for the prompt preamble, e.g. `app: string` or `directory?: string`.
    pub fn render(&self) -> String {
        if self.required {
            format!("{}: {}", self.name, self.kind)
        } else {
            format!("{}?: {}", self.name, self.kind)
        }
    }
}

/// Validate extracted arguments against a parameter list.
///
/// Checks that every required parameter is present and no unknown names
/// appear, then coerces each value to its declared kind. Returns the
/// coerced map, or `InvalidArguments` without any side effect.
pub fn validate_args(params: &[ParamSpec], raw: &ArgMap) -> Result<ArgMap, ActionError> {
    for name in raw.keys() {
        if !params.iter().any(|p| &p.name == name) {
            return Err(ActionError::InvalidArguments(format!(
                "unknown argument '{}'",
                name
            )));
        }
    }

    let mut validated = ArgMap::new();
    for spec in params {
        match raw.get(&spec.name) {
            Some(value) => {
                validated.insert(spec.name.clone(), coerce(value, spec)?);
            }
            None if spec.required => {
                return Err(ActionError::InvalidArguments(format!(
                    "missing required argument '{}'",
                    spec.name
                )));
            }
            None => {}
        }
    }
    Ok(validated)
}

/// Coerce one value to the declared kind.
fn coerce(value: &ArgValue, spec: &ParamSpec) -> Result<ArgValue, ActionError> {
    let mismatch = || {
        ActionError::InvalidArguments(format!(
            "argument '{}' must be a {}",
            spec.name, spec.kind
        ))
    };

    match (spec.kind, value) {
        (ParamKind::String, ArgValue::Text(s)) => Ok(ArgValue::Text(s.clone())),
        (ParamKind::Integer, ArgValue::Int(i)) => Ok(ArgValue::Int(*i)),
        (ParamKind::Integer, ArgValue::Text(s)) => {
            s.parse::<i64>().map(ArgValue::Int).map_err(|_| mismatch())
        }
        (ParamKind::Float, ArgValue::Float(x)) => Ok(ArgValue::Float(*x)),
        (ParamKind::Float, ArgValue::Int(i)) => Ok(ArgValue::Float(*i as f64)),
        (ParamKind::Float, ArgValue::Text(s)) => {
            s.parse::<f64>().map(ArgValue::Float).map_err(|_| mismatch())
        }
        (ParamKind::Boolean, ArgValue::Bool(b)) => Ok(ArgValue::Bool(*b)),
        (ParamKind::Boolean, ArgValue::Text(s)) => match s.as_str() {
            "true" => Ok(ArgValue::Bool(true)),
            "false" => Ok(ArgValue::Bool(false)),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

// =============================================================================
// Tests
// =============================================================================
