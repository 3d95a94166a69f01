use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::Stream;
use shared::{
    domain::{Account, AccountSource, ActorAddress, BlockId, CommandName, DispatchId},
    error::DispatchError,
    protocol::{CommandResult, LifecycleEvent},
};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

pub mod buttons;
pub mod lifecycle;
pub mod notify;
pub mod program;
pub mod wallet;

pub use buttons::{DispatchOutcome, LightButton};
pub use lifecycle::{ChannelCallbacks, DispatchPhase, FanoutCallbacks, LifecycleGuard, Settlement};
pub use notify::{
    BroadcastNotifier, Notification, NotificationLevel, Notifier, NotifyingCallbacks,
    TracingNotifier,
};
pub use program::{FailureStage, SimulatedProgramClient};
pub use wallet::{DevWalletExtension, KeypairSigner};

/// Authorization capability handed out by a wallet extension.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> Vec<u8>;
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait WalletExtension: Send + Sync {
    async fn signer_from_source(&self, source: &AccountSource) -> Result<Arc<dyn Signer>>;
}

pub struct MissingWalletExtension;

#[async_trait]
impl WalletExtension for MissingWalletExtension {
    async fn signer_from_source(&self, source: &AccountSource) -> Result<Arc<dyn Signer>> {
        Err(anyhow!("wallet extension is unavailable for source {source}"))
    }
}

#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn active_account(&self) -> Option<Account>;
}

#[async_trait]
pub trait DispatchClientProvider: Send + Sync {
    async fn dispatch_client(&self) -> Option<Arc<dyn DispatchClient>>;
}

/// Lifecycle hooks a dispatch client fires while a command travels to the program.
pub trait CommandCallbacks: Send + Sync {
    fn on_load(&self);
    fn on_block(&self, block_id: &BlockId);
    fn on_success(&self);
    fn on_error(&self, reason: &str);
}

#[async_trait]
pub trait DispatchClient: Send + Sync {
    async fn command(
        &self,
        request: CommandRequest,
        callbacks: Arc<dyn CommandCallbacks>,
    ) -> Result<CommandResult>;
}

#[derive(Clone)]
pub struct CommandPayload {
    pub user_address: ActorAddress,
    pub signer: Arc<dyn Signer>,
}

impl fmt::Debug for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPayload")
            .field("user_address", &self.user_address)
            .field("signer", &"<opaque>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub dispatch_id: DispatchId,
    pub command: CommandName,
    pub payload: CommandPayload,
}

impl CommandRequest {
    pub fn route(&self) -> String {
        self.command.route()
    }
}

/// Application-owned state the dispatcher reads: the active account and the
/// dispatch client once it has been initialized.
#[derive(Default)]
pub struct AppContext {
    account: RwLock<Option<Account>>,
    dispatch_client: RwLock<Option<Arc<dyn DispatchClient>>>,
}

impl AppContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_account(&self, account: Option<Account>) {
        *self.account.write().await = account;
    }

    pub async fn set_dispatch_client(&self, client: Option<Arc<dyn DispatchClient>>) {
        *self.dispatch_client.write().await = client;
    }
}

#[async_trait]
impl AccountProvider for AppContext {
    async fn active_account(&self) -> Option<Account> {
        self.account.read().await.clone()
    }
}

#[async_trait]
impl DispatchClientProvider for AppContext {
    async fn dispatch_client(&self) -> Option<Arc<dyn DispatchClient>> {
        self.dispatch_client.read().await.clone()
    }
}

#[derive(Default)]
struct InFlightRegistry {
    commands: StdMutex<HashSet<CommandName>>,
}

impl InFlightRegistry {
    fn acquire(self: &Arc<Self>, command: CommandName) -> Option<InFlightSlot> {
        let mut commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !commands.insert(command) {
            return None;
        }
        Some(InFlightSlot {
            registry: Arc::clone(self),
            command,
        })
    }
}

struct InFlightSlot {
    registry: Arc<InFlightRegistry>,
    command: CommandName,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.registry
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.command);
    }
}

/// Drives one user-triggered command from precondition checks to its terminal
/// notification.
pub struct CommandDispatcher {
    accounts: Arc<dyn AccountProvider>,
    clients: Arc<dyn DispatchClientProvider>,
    wallet: Arc<dyn WalletExtension>,
    notifier: Arc<dyn Notifier>,
    in_flight: Option<Arc<InFlightRegistry>>,
}

impl CommandDispatcher {
    pub fn new(
        accounts: Arc<dyn AccountProvider>,
        clients: Arc<dyn DispatchClientProvider>,
        wallet: Arc<dyn WalletExtension>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            accounts,
            clients,
            wallet,
            notifier,
            in_flight: None,
        }
    }

    pub fn from_context(
        context: Arc<AppContext>,
        wallet: Arc<dyn WalletExtension>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(context.clone(), context, wallet, notifier)
    }

    /// Rejects a trigger while another dispatch of the same command is running.
    pub fn with_in_flight_guard(mut self) -> Self {
        self.in_flight = Some(Arc::new(InFlightRegistry::default()));
        self
    }

    pub async fn dispatch(&self, command: CommandName) -> Result<CommandResult, DispatchError> {
        self.run(command, None).await
    }

    /// Same as [`dispatch`](Self::dispatch), additionally reporting every
    /// lifecycle callback to `observer` after the notifications fire.
    pub async fn dispatch_with_observer(
        &self,
        command: CommandName,
        observer: Arc<dyn CommandCallbacks>,
    ) -> Result<CommandResult, DispatchError> {
        self.run(command, Some(observer)).await
    }

    /// Runs the dispatch on a spawned task and yields its lifecycle events in
    /// order. The stream ends once the dispatch settles or aborts; aborts only
    /// surface as notifications.
    pub fn dispatch_events(
        self: &Arc<Self>,
        command: CommandName,
    ) -> impl Stream<Item = LifecycleEvent> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let observer: Arc<dyn CommandCallbacks> = Arc::new(ChannelCallbacks::new(tx));
            if let Err(err) = dispatcher.run(command, Some(observer)).await {
                debug!(command = %command, "event stream dispatch ended: {err}");
            }
        });
        UnboundedReceiverStream::new(rx)
    }

    async fn run(
        &self,
        command: CommandName,
        observer: Option<Arc<dyn CommandCallbacks>>,
    ) -> Result<CommandResult, DispatchError> {
        let dispatch_id = DispatchId::new();
        let route = command.route();
        debug!(%dispatch_id, route = %route, phase = ?DispatchPhase::ValidatingPreconditions, "dispatch triggered");

        let Some(account) = self.accounts.active_account().await else {
            return Err(self.abort(dispatch_id, &route, DispatchError::AccountUnavailable));
        };
        let Some(client) = self.clients.dispatch_client().await else {
            return Err(self.abort(dispatch_id, &route, DispatchError::ClientNotReady));
        };

        let _slot = match &self.in_flight {
            Some(registry) => match registry.acquire(command) {
                Some(slot) => Some(slot),
                None => {
                    return Err(self.abort(
                        dispatch_id,
                        &route,
                        DispatchError::AlreadyInFlight(command),
                    ))
                }
            },
            None => None,
        };

        debug!(
            %dispatch_id,
            route = %route,
            source = %account.meta.source,
            phase = ?DispatchPhase::ResolvingSigner,
            "resolving signer"
        );
        let signer = match self.wallet.signer_from_source(&account.meta.source).await {
            Ok(signer) => signer,
            Err(err) => {
                return Err(self.abort(
                    dispatch_id,
                    &route,
                    DispatchError::SignerResolution(format!("{err:#}")),
                ))
            }
        };

        let request = CommandRequest {
            dispatch_id,
            command,
            payload: CommandPayload {
                user_address: account.decoded_address.clone(),
                signer,
            },
        };

        let notifying: Arc<dyn CommandCallbacks> =
            Arc::new(NotifyingCallbacks::new(Arc::clone(&self.notifier)));
        let callbacks: Arc<dyn CommandCallbacks> = match observer {
            Some(observer) => Arc::new(FanoutCallbacks::new(vec![notifying, observer])),
            None => notifying,
        };
        let guard = Arc::new(LifecycleGuard::new(dispatch_id, route.clone(), callbacks));

        info!(
            %dispatch_id,
            route = %route,
            user_address = %account.decoded_address,
            "dispatching command"
        );
        let outcome = client.command(request, guard.clone()).await;

        match outcome {
            Ok(result) => {
                guard.finish(None);
                if guard.settlement() == Some(Settlement::Error) {
                    let reason = guard
                        .error_reason()
                        .unwrap_or_else(|| "dispatch client reported an error".to_string());
                    warn!(%dispatch_id, route = %route, "command settled with error: {reason}");
                    return Err(DispatchError::Dispatch { route, reason });
                }
                info!(%dispatch_id, route = %route, "response: {result}");
                Ok(result)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                if !guard.finish(Some(&reason)) {
                    self.notifier.error(notify::ERROR_MESSAGE);
                }
                warn!(%dispatch_id, route = %route, "command failed: {reason}");
                Err(DispatchError::Dispatch { route, reason })
            }
        }
    }

    fn abort(&self, dispatch_id: DispatchId, route: &str, err: DispatchError) -> DispatchError {
        warn!(
            %dispatch_id,
            route,
            code = ?err.code(),
            phase = ?DispatchPhase::Aborted(err.code()),
            "dispatch aborted: {err}"
        );
        if let Some(message) = err.notification() {
            self.notifier.error(&message);
        }
        err
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
