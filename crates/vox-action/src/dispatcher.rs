//! The action dispatcher: a state machine over one turn's model output.
//!
//! `NoMatch -> Matched -> Executing -> Succeeded | Failed`
//!
//! `NoMatch` is the implicit terminal when no recognized signal is found.
//! Validation failures go straight from `Matched` to `Failed` without
//! executing anything; execution faults carry the underlying cause. At
//! most one action runs per turn and the dispatcher never retries —
//! retry policy belongs to the caller. The dispatcher itself performs no
//! system mutation; side effects live in the invoked handler alone.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use vox_core::types::{ActionRecord, ActionStatus};

use crate::error::ActionError;
use crate::registry::ActionRegistry;
use crate::schema::validate_args;
use crate::signal;

/// Dispatch state for one turn's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    NoMatch,
    Matched,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::NoMatch => write!(f, "no_match"),
            DispatchState::Matched => write!(f, "matched"),
            DispatchState::Executing => write!(f, "executing"),
            DispatchState::Succeeded => write!(f, "succeeded"),
            DispatchState::Failed => write!(f, "failed"),
        }
    }
}

/// What one dispatch produced: the reached state, the action record (none
/// for `NoMatch`), and the narrative text to speak.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub state: DispatchState,
    pub record: Option<ActionRecord>,
    pub narrative: String,
}

/// Parses model output into zero-or-one action and executes it safely.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    enabled: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            enabled: true,
        }
    }

    /// Disable execution: matched actions are recorded as skipped and
    /// never run.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Run the state machine over one turn's output text.
    pub async fn dispatch(&self, output: &str) -> DispatchOutcome {
        // NoMatch -> Matched requires a recognized signal with a known name.
        let Some(signal) = signal::extract(output, &self.registry) else {
            return DispatchOutcome {
                state: DispatchState::NoMatch,
                record: None,
                narrative: output.trim().to_string(),
            };
        };

        if !self.enabled {
            info!(action = %signal.name, "Action execution disabled; skipping");
            return DispatchOutcome {
                state: DispatchState::Matched,
                record: Some(ActionRecord {
                    action_name: signal.name,
                    arguments: signal.args,
                    status: ActionStatus::Skipped,
                    result_text: None,
                }),
                narrative: signal.narrative,
            };
        }

        // Matched -> Executing only with schema-valid arguments.
        let capability = match self.registry.get(&signal.name) {
            Some(c) => c,
            // Unreachable in practice: extract only yields registered names.
            None => {
                return DispatchOutcome {
                    state: DispatchState::NoMatch,
                    record: None,
                    narrative: output.trim().to_string(),
                }
            }
        };

        let args = match validate_args(&capability.params, &signal.args) {
            Ok(args) => args,
            Err(e) => {
                warn!(action = %signal.name, error = %e, "Argument validation failed");
                return DispatchOutcome {
                    state: DispatchState::Failed,
                    record: Some(ActionRecord {
                        action_name: signal.name,
                        arguments: signal.args,
                        status: ActionStatus::Failed,
                        result_text: Some(format!("I couldn't do that: {}.", e.cause())),
                    }),
                    narrative: signal.narrative,
                };
            }
        };

        // Executing -> Succeeded | Failed. Exactly one execution, no retry.
        match capability.handler().execute(&args).await {
            Ok(result_text) => {
                info!(action = %signal.name, "Action succeeded");
                DispatchOutcome {
                    state: DispatchState::Succeeded,
                    record: Some(ActionRecord {
                        action_name: signal.name,
                        arguments: args,
                        status: ActionStatus::Succeeded,
                        result_text: Some(result_text),
                    }),
                    narrative: signal.narrative,
                }
            }
            Err(e) => {
                warn!(action = %signal.name, error = %e, "Action failed");
                DispatchOutcome {
                    state: DispatchState::Failed,
                    record: Some(ActionRecord {
                        action_name: signal.name,
                        arguments: args,
                        status: ActionStatus::Failed,
                        result_text: Some(format!("I couldn't do that: {}.", e.cause())),
                    }),
                    narrative: signal.narrative,
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
