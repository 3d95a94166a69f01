use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use client_core::{
    AppContext, BroadcastNotifier, CommandDispatcher, DevWalletExtension, DispatchClient,
    DispatchOutcome, FailureStage, LightButton, NotificationLevel, SimulatedProgramClient,
};
use shared::domain::{AccountSource, CommandName};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, DEFAULT_CONFIG_PATH};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Light {
    Red,
    Yellow,
}

impl From<Light> for CommandName {
    fn from(value: Light) -> Self {
        match value {
            Light::Red => CommandName::Red,
            Light::Yellow => CommandName::Yellow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailArg {
    #[value(alias = "before_block")]
    BeforeBlock,
    #[value(alias = "after_block")]
    AfterBlock,
}

impl From<FailArg> for FailureStage {
    fn from(value: FailArg) -> Self {
        match value {
            FailArg::BeforeBlock => FailureStage::BeforeBlock,
            FailArg::AfterBlock => FailureStage::AfterBlock,
        }
    }
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(value_enum)]
    light: Light,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Number of rapid clicks to simulate.
    #[arg(long, default_value_t = 1)]
    clicks: usize,
    #[arg(long)]
    no_account: bool,
    #[arg(long)]
    client_not_ready: bool,
    #[arg(long)]
    deny_signer: bool,
    #[arg(long)]
    in_flight_guard: bool,
    /// Make the simulated program fail at the given stage.
    #[arg(long, value_enum)]
    fail: Option<FailArg>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if args.client_not_ready {
        settings.client_ready = false;
    }
    if args.in_flight_guard {
        settings.in_flight_guard = true;
    }
    if let Some(stage) = args.fail {
        settings.failure_stage = Some(stage.into());
    }
    info!(
        program_id = %settings.program_id,
        source = %settings.account_source,
        "starting traffic light console"
    );

    let wallet = Arc::new(
        DevWalletExtension::new().with_source(&settings.account_source, &settings.seed_phrase),
    );
    if args.deny_signer {
        wallet
            .deny(&AccountSource::new(&settings.account_source))
            .await;
    }

    let context = AppContext::new();
    if !args.no_account {
        context
            .set_account(wallet.account(&settings.account_source, &settings.account_name))
            .await;
    }

    let program = SimulatedProgramClient::new(settings.program_id.clone())
        .with_block_delay(settings.block_delay())
        .with_failure(settings.failure_stage)
        .into_shared();
    if settings.client_ready {
        let client: Arc<dyn DispatchClient> = program.clone();
        context.set_dispatch_client(Some(client)).await;
    }

    let notifier = BroadcastNotifier::new(settings.notification_capacity);
    let presenter = {
        let mut rx = notifier.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        let tag = match notification.level {
                            NotificationLevel::Info => "info",
                            NotificationLevel::Success => "success",
                            NotificationLevel::Error => "error",
                        };
                        println!(
                            "[{}] {tag}: {}",
                            notification.at.format("%H:%M:%S%.3f"),
                            notification.message
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("notification presenter lagged, skipped={skipped}");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut dispatcher = CommandDispatcher::from_context(context, wallet, Arc::new(notifier));
    if settings.in_flight_guard {
        dispatcher = dispatcher.with_in_flight_guard();
    }
    let dispatcher = Arc::new(dispatcher);

    let button = LightButton::for_command(args.light.into());
    println!("Clicking {} ({})", button.label(), button.color());
    let click = button.on_click(Arc::clone(&dispatcher));
    let handles: Vec<_> = (0..args.clicks.max(1)).map(|_| click()).collect();

    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await? {
            DispatchOutcome::Settled(result) => {
                println!("click {index}: response {}", serde_json::to_string(&result)?);
            }
            DispatchOutcome::Failed(code) => println!("click {index}: failed ({code:?})"),
        }
    }

    drop(click);
    drop(dispatcher);
    presenter.await?;

    println!(
        "Program state: {}",
        serde_json::to_string(&program.program_state().await)?
    );
    Ok(())
}
