//! The action registry: a table of capability descriptors.
//!
//! Capabilities are registered before a session starts and the registry is
//! immutable afterwards (enforced by sharing it behind `Arc`). Insertion
//! order is preserved because it is the final tie-break when several
//! trigger phrases match the same output.

use std::collections::HashMap;
use std::sync::Arc;

use vox_core::config::ActionsConfig;
use vox_core::types::{ArgMap, ArgValue};

use crate::error::ActionError;
use crate::handler::{
    clock::{CurrentDateHandler, CurrentTimeHandler},
    list_files::ListFilesHandler,
    open_app::OpenAppHandler,
    open_url::OpenUrlHandler,
    run_command::RunCommandHandler,
    CapabilityHandler,
};
use crate::schema::{ParamKind, ParamSpec};

/// A literal phrase that selects a capability when found in model output,
/// carrying preset arguments for that capability.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub phrase: String,
    pub args: ArgMap,
}

impl Trigger {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            args: ArgMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

/// One registered capability: name, schema, triggers, and the handler
/// that executes it.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub triggers: Vec<Trigger>,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            triggers: Vec::new(),
            handler,
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn handler(&self) -> &Arc<dyn CapabilityHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Ordered table of capabilities, looked up by name or trigger phrase.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    entries: Vec<Capability>,
    by_name: HashMap<String, usize>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Names must be unique.
    pub fn register(&mut self, capability: Capability) -> Result<(), ActionError> {
        if self.by_name.contains_key(&capability.name) {
            return Err(ActionError::AlreadyRegistered(capability.name));
        }
        self.by_name
            .insert(capability.name.clone(), self.entries.len());
        self.entries.push(capability);
        Ok(())
    }

    /// Register the built-in capability set, configured from `ActionsConfig`.
    pub fn register_defaults(&mut self, config: &ActionsConfig) -> Result<(), ActionError> {
        self.register(
            Capability::new(
                "open_app",
                "Launch an application by name",
                Arc::new(OpenAppHandler::new(config.app_allowlist.clone())),
            )
            .with_param(ParamSpec::required("app", ParamKind::String))
            .with_trigger(Trigger::new("open cursor").with_arg("app", "cursor"))
            .with_trigger(Trigger::new("open browser").with_arg("app", "firefox"))
            .with_trigger(Trigger::new("open terminal").with_arg("app", "gnome-terminal")),
        )?;

        self.register(
            Capability::new(
                "open_url",
                "Open a web address in the browser",
                Arc::new(OpenUrlHandler),
            )
            .with_param(ParamSpec::required("url", ParamKind::String)),
        )?;

        self.register(
            Capability::new(
                "current_time",
                "Say the current time",
                Arc::new(CurrentTimeHandler),
            )
            .with_trigger(Trigger::new("what time")),
        )?;

        self.register(
            Capability::new(
                "current_date",
                "Say today's date",
                Arc::new(CurrentDateHandler),
            )
            .with_trigger(Trigger::new("what date"))
            .with_trigger(Trigger::new("today's date")),
        )?;

        self.register(
            Capability::new(
                "list_files",
                "List files in a directory",
                Arc::new(ListFilesHandler),
            )
            .with_param(ParamSpec::optional("directory", ParamKind::String)),
        )?;

        self.register(
            Capability::new(
                "run_command",
                "Run an allowlisted shell command",
                Arc::new(RunCommandHandler::new(
                    config.command_allowlist.clone(),
                    std::time::Duration::from_secs(config.command_timeout_secs),
                )),
            )
            .with_param(ParamSpec::required("command", ParamKind::String)),
        )?;

        Ok(())
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// All capabilities in registration order.
    pub fn entries(&self) -> &[Capability] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
