use super::*;
use crate::{CommandPayload, KeypairSigner, Signer};
use shared::{domain::CommandName, protocol::LifecycleEvent};
use std::sync::Mutex as StdMutex;

#[derive(Default)]
struct RecordingCallbacks {
    events: StdMutex<Vec<LifecycleEvent>>,
}

impl RecordingCallbacks {
    fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("events").clone()
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.lock().expect("events").push(event);
    }
}

impl CommandCallbacks for RecordingCallbacks {
    fn on_load(&self) {
        self.push(LifecycleEvent::Load);
    }

    fn on_block(&self, block_id: &BlockId) {
        self.push(LifecycleEvent::Block(block_id.clone()));
    }

    fn on_success(&self) {
        self.push(LifecycleEvent::Success);
    }

    fn on_error(&self, reason: &str) {
        self.push(LifecycleEvent::Error(reason.to_string()));
    }
}

/// Signs with one key but advertises another.
struct MismatchedSigner {
    signing: KeypairSigner,
    advertised: KeypairSigner,
}

impl Signer for MismatchedSigner {
    fn public_key(&self) -> Vec<u8> {
        self.advertised.public_key()
    }

    fn sign(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.signing.sign(message)
    }
}

fn request(command: CommandName, signer: Arc<dyn Signer>) -> CommandRequest {
    CommandRequest {
        dispatch_id: DispatchId::new(),
        command,
        payload: CommandPayload {
            user_address: ActorAddress::new("0xalice"),
            signer,
        },
    }
}

fn client() -> SimulatedProgramClient {
    SimulatedProgramClient::new("0xprogram").with_block_delay(Duration::ZERO)
}

#[tokio::test]
async fn applies_command_and_reports_full_lifecycle() {
    let client = client();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let signer = Arc::new(KeypairSigner::from_seed_phrase("alice"));

    let result = client
        .command(request(CommandName::Yellow, signer), callbacks.clone())
        .await
        .expect("command");

    assert_eq!(result.route, "TrafficLight/Yellow");
    assert_eq!(result.reply, serde_json::json!({ "TrafficLight": "Yellow" }));
    let block_id = result.block_id.clone().expect("block id");
    assert_eq!(
        callbacks.events(),
        vec![
            LifecycleEvent::Load,
            LifecycleEvent::Block(block_id),
            LifecycleEvent::Success,
        ]
    );

    let state = client.program_state().await;
    assert_eq!(state.current_light, Some(TrafficLightEvent::Yellow));
    assert_eq!(
        state.users,
        vec![(ActorAddress::new("0xalice"), TrafficLightEvent::Yellow)]
    );

    let submitted = client.submitted().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].route, "TrafficLight/Yellow");
    assert_eq!(submitted[0].program_id, "0xprogram");
}

#[tokio::test]
async fn block_ids_differ_between_commands() {
    let client = client();
    let signer: Arc<dyn Signer> = Arc::new(KeypairSigner::from_seed_phrase("alice"));

    let first = client
        .command(
            request(CommandName::Red, signer.clone()),
            Arc::new(RecordingCallbacks::default()),
        )
        .await
        .expect("first");
    let second = client
        .command(
            request(CommandName::Red, signer),
            Arc::new(RecordingCallbacks::default()),
        )
        .await
        .expect("second");

    assert_ne!(first.block_id, second.block_id);
    let block_id = first.block_id.expect("block id");
    let digest = block_id.as_str().strip_prefix("0x").expect("hex prefix");
    assert_eq!(digest.len(), 64);
    assert!(hex::decode(digest).is_ok());
}

#[tokio::test]
async fn rejects_signature_from_a_different_key() {
    let client = client();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let signer = Arc::new(MismatchedSigner {
        signing: KeypairSigner::from_seed_phrase("mallory"),
        advertised: KeypairSigner::from_seed_phrase("alice"),
    });

    let err = client
        .command(request(CommandName::Red, signer), callbacks.clone())
        .await
        .expect_err("signature must not verify");

    assert!(err.to_string().contains("invalid signature"));
    assert_eq!(
        callbacks.events(),
        vec![
            LifecycleEvent::Load,
            LifecycleEvent::Error("invalid signature for TrafficLight/Red".into()),
        ]
    );
    assert!(client.submitted().await.is_empty());
    assert_eq!(client.program_state().await.current_light, None);
}

#[tokio::test]
async fn failure_before_block_skips_block_callback() {
    let client = client().with_failure(Some(FailureStage::BeforeBlock));
    let callbacks = Arc::new(RecordingCallbacks::default());

    client
        .command(
            request(
                CommandName::Red,
                Arc::new(KeypairSigner::from_seed_phrase("alice")),
            ),
            callbacks.clone(),
        )
        .await
        .expect_err("rejected");

    let events = callbacks.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], LifecycleEvent::Load);
    assert!(matches!(events[1], LifecycleEvent::Error(_)));
}

#[tokio::test]
async fn failure_after_block_leaves_light_unchanged() {
    let client = client();
    client.set_failure(Some(FailureStage::AfterBlock)).await;
    let callbacks = Arc::new(RecordingCallbacks::default());

    client
        .command(
            request(
                CommandName::Red,
                Arc::new(KeypairSigner::from_seed_phrase("alice")),
            ),
            callbacks.clone(),
        )
        .await
        .expect_err("execution failed");

    let events = callbacks.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], LifecycleEvent::Block(_)));
    assert!(matches!(events[2], LifecycleEvent::Error(_)));
    assert!(!events.contains(&LifecycleEvent::Success));
    assert_eq!(client.program_state().await.current_light, None);
}

#[test]
fn parses_failure_stage_names() {
    assert_eq!(
        FailureStage::parse("before-block"),
        Some(FailureStage::BeforeBlock)
    );
    assert_eq!(
        FailureStage::parse("AFTER_BLOCK"),
        Some(FailureStage::AfterBlock)
    );
    assert_eq!(FailureStage::parse("never"), None);
}
