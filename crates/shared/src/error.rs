use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::CommandName;

pub const ACCOUNT_UNAVAILABLE_MESSAGE: &str = "Account not available to sign";
pub const CLIENT_NOT_READY_MESSAGE: &str = "Dispatch client is not ready";
pub const SIGNER_UNAVAILABLE_MESSAGE: &str = "Unable to obtain a signer from the wallet extension";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AccountUnavailable,
    ClientNotReady,
    SignerResolution,
    Dispatch,
    AlreadyInFlight,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Account not available to sign")]
    AccountUnavailable,
    #[error("Dispatch client is not ready")]
    ClientNotReady,
    #[error("Unable to obtain a signer from the wallet extension: {0}")]
    SignerResolution(String),
    #[error("command {route} failed: {reason}")]
    Dispatch { route: String, reason: String },
    #[error("{0} is already being sent")]
    AlreadyInFlight(CommandName),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::AccountUnavailable => ErrorCode::AccountUnavailable,
            DispatchError::ClientNotReady => ErrorCode::ClientNotReady,
            DispatchError::SignerResolution(_) => ErrorCode::SignerResolution,
            DispatchError::Dispatch { .. } => ErrorCode::Dispatch,
            DispatchError::AlreadyInFlight(_) => ErrorCode::AlreadyInFlight,
        }
    }

    /// Text shown to the user. Dispatch failures are announced by the
    /// lifecycle callbacks instead, so they have none.
    pub fn notification(&self) -> Option<String> {
        match self {
            DispatchError::AccountUnavailable => Some(ACCOUNT_UNAVAILABLE_MESSAGE.to_string()),
            DispatchError::ClientNotReady => Some(CLIENT_NOT_READY_MESSAGE.to_string()),
            DispatchError::SignerResolution(_) => Some(SIGNER_UNAVAILABLE_MESSAGE.to_string()),
            DispatchError::Dispatch { .. } => None,
            DispatchError::AlreadyInFlight(name) => Some(format!("{name} is already being sent")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_carry_user_facing_text() {
        assert_eq!(
            DispatchError::AccountUnavailable.notification().as_deref(),
            Some("Account not available to sign")
        );
        assert_eq!(
            DispatchError::ClientNotReady.notification().as_deref(),
            Some("Dispatch client is not ready")
        );
        assert_eq!(
            DispatchError::AlreadyInFlight(CommandName::Red).to_string(),
            "Red is already being sent"
        );
    }

    #[test]
    fn dispatch_failures_are_announced_elsewhere() {
        let err = DispatchError::Dispatch {
            route: "TrafficLight/Red".into(),
            reason: "rejected".into(),
        };
        assert_eq!(err.code(), ErrorCode::Dispatch);
        assert!(err.notification().is_none());
    }
}
