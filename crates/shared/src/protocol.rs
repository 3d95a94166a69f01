use serde::{Deserialize, Serialize};

use crate::domain::{ActorAddress, BlockId, CommandName, DispatchId};

/// Progress report for one dispatch, in the order the lifecycle allows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Load,
    Block(BlockId),
    Success,
    Error(String),
}

impl LifecycleEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleEvent::Success | LifecycleEvent::Error(_))
    }
}

/// Reply the traffic-light program emits after a light change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficLightEvent {
    Red,
    Yellow,
}

impl From<CommandName> for TrafficLightEvent {
    fn from(value: CommandName) -> Self {
        match value {
            CommandName::Red => TrafficLightEvent::Red,
            CommandName::Yellow => TrafficLightEvent::Yellow,
        }
    }
}

/// Whatever the dispatch client settled with. Only logged by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub dispatch_id: DispatchId,
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    pub reply: serde_json::Value,
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.route, self.reply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficLightSnapshot {
    pub current_light: Option<TrafficLightEvent>,
    pub users: Vec<(ActorAddress, TrafficLightEvent)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_use_tagged_encoding() {
        let encoded =
            serde_json::to_value(LifecycleEvent::Block(BlockId::new("0xabc"))).expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({"type": "block", "payload": "0xabc"})
        );
        assert!(!LifecycleEvent::Load.is_terminal());
        assert!(LifecycleEvent::Error("boom".into()).is_terminal());
    }
}
