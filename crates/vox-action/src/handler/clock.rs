//! Clock and calendar capability handlers.

use async_trait::async_trait;
use chrono::Local;

use vox_core::types::ArgMap;

use crate::error::ActionError;
use crate::handler::CapabilityHandler;

/// Reads the current wall-clock time, e.g. "The time is 03:04 PM".
pub struct CurrentTimeHandler;

#[async_trait]
impl CapabilityHandler for CurrentTimeHandler {
    async fn execute(&self, _args: &ArgMap) -> Result<String, ActionError> {
        let now = Local::now().format("%I:%M %p");
        Ok(format!("The time is {}", now))
    }
}

/// Reads today's date, e.g. "Today is Monday, January 02, 2006".
pub struct CurrentDateHandler;

#[async_trait]
impl CapabilityHandler for CurrentDateHandler {
    async fn execute(&self, _args: &ArgMap) -> Result<String, ActionError> {
        let today = Local::now().format("%A, %B %d, %Y");
        Ok(format!("Today is {}", today))
    }
}
