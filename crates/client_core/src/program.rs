//! In-process stand-in for the traffic-light program and its dispatch client.
//!
//! Commands are signed by the payload's signer, checked against its public
//! key, "included" in a block after a configurable delay and then applied to
//! the light state.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::{
    domain::{ActorAddress, BlockId, DispatchId},
    protocol::{CommandResult, TrafficLightEvent, TrafficLightSnapshot},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{CommandCallbacks, CommandRequest, DispatchClient};

pub const DEFAULT_BLOCK_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    BeforeBlock,
    AfterBlock,
}

impl FailureStage {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "before_block" | "before-block" => Some(FailureStage::BeforeBlock),
            "after_block" | "after-block" => Some(FailureStage::AfterBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("signer refused to sign: {0}")]
    Signing(String),
    #[error("invalid signature for {route}")]
    InvalidSignature { route: String },
    #[error("message rejected before block inclusion")]
    RejectedBeforeBlock,
    #[error("program execution failed in block {0}")]
    ExecutionFailed(BlockId),
    #[error("failed to encode message: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnsignedMessage {
    dispatch_id: DispatchId,
    program_id: String,
    route: String,
    user_address: ActorAddress,
}

/// Message as it would travel to the node: the signed bytes plus proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub dispatch_id: DispatchId,
    pub program_id: String,
    pub route: String,
    pub user_address: ActorAddress,
    pub payload_b64: String,
    pub public_key_b64: String,
    pub signature_b64: String,
}

#[derive(Default)]
struct ProgramState {
    block_height: u64,
    current_light: Option<TrafficLightEvent>,
    users: BTreeMap<ActorAddress, TrafficLightEvent>,
    submitted: Vec<SignedMessage>,
    failure: Option<FailureStage>,
}

pub struct SimulatedProgramClient {
    program_id: String,
    block_delay: Duration,
    state: Mutex<ProgramState>,
}

impl SimulatedProgramClient {
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            block_delay: DEFAULT_BLOCK_DELAY,
            state: Mutex::new(ProgramState::default()),
        }
    }

    pub fn with_block_delay(mut self, block_delay: Duration) -> Self {
        self.block_delay = block_delay;
        self
    }

    pub fn with_failure(mut self, stage: Option<FailureStage>) -> Self {
        self.state.get_mut().failure = stage;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub async fn set_failure(&self, stage: Option<FailureStage>) {
        self.state.lock().await.failure = stage;
    }

    pub async fn program_state(&self) -> TrafficLightSnapshot {
        let state = self.state.lock().await;
        TrafficLightSnapshot {
            current_light: state.current_light,
            users: state
                .users
                .iter()
                .map(|(user, light)| (user.clone(), *light))
                .collect(),
        }
    }

    pub async fn submitted(&self) -> Vec<SignedMessage> {
        self.state.lock().await.submitted.clone()
    }

    fn sign(&self, request: &CommandRequest) -> Result<SignedMessage, ProgramError> {
        let unsigned = UnsignedMessage {
            dispatch_id: request.dispatch_id,
            program_id: self.program_id.clone(),
            route: request.route(),
            user_address: request.payload.user_address.clone(),
        };
        let bytes = serde_json::to_vec(&unsigned)?;
        let signer = &request.payload.signer;
        let signature = signer
            .sign(&bytes)
            .map_err(|err| ProgramError::Signing(format!("{err:#}")))?;

        Ok(SignedMessage {
            dispatch_id: unsigned.dispatch_id,
            program_id: unsigned.program_id,
            route: unsigned.route,
            user_address: unsigned.user_address,
            payload_b64: STANDARD.encode(&bytes),
            public_key_b64: STANDARD.encode(signer.public_key()),
            signature_b64: STANDARD.encode(signature),
        })
    }

    async fn settle(
        &self,
        request: &CommandRequest,
        callbacks: &Arc<dyn CommandCallbacks>,
    ) -> Result<CommandResult, ProgramError> {
        callbacks.on_load();

        let message = self.sign(request)?;
        verify(&message)?;

        let failure = {
            let mut state = self.state.lock().await;
            state.submitted.push(message.clone());
            state.failure
        };
        if failure == Some(FailureStage::BeforeBlock) {
            return Err(ProgramError::RejectedBeforeBlock);
        }

        tokio::time::sleep(self.block_delay).await;

        let block_id = {
            let mut state = self.state.lock().await;
            state.block_height += 1;
            block_id_for(&message, state.block_height)
        };
        debug!(dispatch_id = %message.dispatch_id, block_id = %block_id, "program: message included");
        callbacks.on_block(&block_id);

        if failure == Some(FailureStage::AfterBlock) {
            return Err(ProgramError::ExecutionFailed(block_id));
        }

        let event = TrafficLightEvent::from(request.command);
        {
            let mut state = self.state.lock().await;
            state.current_light = Some(event);
            state.users.insert(message.user_address.clone(), event);
        }
        info!(
            dispatch_id = %message.dispatch_id,
            route = %message.route,
            block_id = %block_id,
            "program: light changed to {event:?}"
        );
        callbacks.on_success();

        Ok(CommandResult {
            dispatch_id: message.dispatch_id,
            route: message.route,
            block_id: Some(block_id),
            reply: serde_json::json!({ "TrafficLight": event }),
        })
    }
}

fn verify(message: &SignedMessage) -> Result<(), ProgramError> {
    let invalid = || ProgramError::InvalidSignature {
        route: message.route.clone(),
    };
    let payload = STANDARD.decode(&message.payload_b64).map_err(|_| invalid())?;
    let key_bytes: [u8; 32] = STANDARD
        .decode(&message.public_key_b64)
        .map_err(|_| invalid())?
        .try_into()
        .map_err(|_| invalid())?;
    let signature = STANDARD
        .decode(&message.signature_b64)
        .map_err(|_| invalid())?;

    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| invalid())?;
    let signature = Signature::from_slice(&signature).map_err(|_| invalid())?;
    key.verify(&payload, &signature).map_err(|_| invalid())
}

fn block_id_for(message: &SignedMessage, height: u64) -> BlockId {
    let mut hasher = Sha256::new();
    hasher.update(message.signature_b64.as_bytes());
    hasher.update(height.to_be_bytes());
    BlockId::new(format!("0x{}", hex::encode(hasher.finalize())))
}

#[async_trait]
impl DispatchClient for SimulatedProgramClient {
    async fn command(
        &self,
        request: CommandRequest,
        callbacks: Arc<dyn CommandCallbacks>,
    ) -> Result<CommandResult> {
        match self.settle(&request, &callbacks).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(dispatch_id = %request.dispatch_id, route = %request.route(), "program: {err}");
                callbacks.on_error(&err.to_string());
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/program_tests.rs"]
mod tests;
