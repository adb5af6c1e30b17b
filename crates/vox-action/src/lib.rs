//! Action dispatch for Vox.
//!
//! Turns raw model output into at most one executed capability per turn:
//! a tagged-variant signal grammar (inline tag, JSON object, or literal
//! trigger phrase), parameter schema validation, and a registry of
//! capability descriptors executed through an async handler trait.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;
pub mod schema;
pub mod signal;

pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher};
pub use error::ActionError;
pub use handler::CapabilityHandler;
pub use registry::{ActionRegistry, Capability, Trigger};
pub use schema::{ParamKind, ParamSpec};
