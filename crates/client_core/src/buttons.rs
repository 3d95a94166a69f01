//! The two traffic-light buttons and their click handlers.

use std::sync::Arc;

use shared::{domain::CommandName, error::ErrorCode, protocol::CommandResult};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::CommandDispatcher;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Settled(CommandResult),
    Failed(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightButton {
    command: CommandName,
    label: &'static str,
    color: &'static str,
}

impl LightButton {
    pub const fn red() -> Self {
        Self {
            command: CommandName::Red,
            label: "Red",
            color: "red.300",
        }
    }

    pub const fn yellow() -> Self {
        Self {
            command: CommandName::Yellow,
            label: "Yellow",
            color: "yellow.300",
        }
    }

    pub fn for_command(command: CommandName) -> Self {
        match command {
            CommandName::Red => Self::red(),
            CommandName::Yellow => Self::yellow(),
        }
    }

    pub fn all() -> [Self; 2] {
        [Self::red(), Self::yellow()]
    }

    pub fn command(&self) -> CommandName {
        self.command
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn color(&self) -> &'static str {
        self.color
    }

    /// Failures have already been shown as notifications by the time this
    /// returns; the outcome is informational.
    pub async fn click(&self, dispatcher: &CommandDispatcher) -> DispatchOutcome {
        match dispatcher.dispatch(self.command).await {
            Ok(result) => DispatchOutcome::Settled(result),
            Err(err) => {
                debug!(button = self.label, code = ?err.code(), "click finished without result");
                DispatchOutcome::Failed(err.code())
            }
        }
    }

    /// Zero-argument handler for a UI surface. Each call spawns an
    /// independent dispatch.
    pub fn on_click(
        self,
        dispatcher: Arc<CommandDispatcher>,
    ) -> impl Fn() -> JoinHandle<DispatchOutcome> + Send + Sync + 'static {
        move || {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { self.click(&dispatcher).await })
        }
    }
}
