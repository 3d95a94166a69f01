use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(ActorAddress);
string_newtype!(AccountSource);
string_newtype!(BlockId);

/// Correlates every log line and lifecycle event of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchId(pub Uuid);

impl DispatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const TRAFFIC_LIGHT_SERVICE: &str = "TrafficLight";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandName {
    Red,
    Yellow,
}

impl CommandName {
    pub const ALL: [CommandName; 2] = [CommandName::Red, CommandName::Yellow];

    pub fn method(self) -> &'static str {
        match self {
            CommandName::Red => "Red",
            CommandName::Yellow => "Yellow",
        }
    }

    /// `Service/Method` path understood by the program's dispatch client.
    pub fn route(self) -> String {
        format!("{TRAFFIC_LIGHT_SERVICE}/{}", self.method())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let method = raw
            .strip_prefix(TRAFFIC_LIGHT_SERVICE)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(raw);
        Self::ALL
            .into_iter()
            .find(|name| name.method().eq_ignore_ascii_case(method.trim()))
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub source: AccountSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Active wallet identity as handed out by the account provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub decoded_address: ActorAddress,
    pub meta: AccountMeta,
}

impl Account {
    pub fn new(decoded_address: ActorAddress, source: AccountSource) -> Self {
        Self {
            decoded_address,
            meta: AccountMeta { source, name: None },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.meta.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_service_qualified() {
        assert_eq!(CommandName::Red.route(), "TrafficLight/Red");
        assert_eq!(CommandName::Yellow.route(), "TrafficLight/Yellow");
    }

    #[test]
    fn parses_bare_and_routed_names() {
        assert_eq!(CommandName::parse("red"), Some(CommandName::Red));
        assert_eq!(
            CommandName::parse("TrafficLight/Yellow"),
            Some(CommandName::Yellow)
        );
        assert_eq!(CommandName::parse("Green"), None);
    }
}
