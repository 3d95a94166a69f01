//! Per-dispatch lifecycle state and the callback adapters layered around it.

use std::sync::{Arc, Mutex, PoisonError};

use shared::{
    domain::{BlockId, DispatchId},
    error::ErrorCode,
    protocol::LifecycleEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::CommandCallbacks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    ValidatingPreconditions,
    ResolvingSigner,
    Transmitting,
    AwaitingBlock,
    InBlock,
    Settled(Settlement),
    Aborted(ErrorCode),
}

impl DispatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchPhase::Settled(_) | DispatchPhase::Aborted(_))
    }
}

struct GuardState {
    phase: DispatchPhase,
    error_reason: Option<String>,
}

/// Sits between a dispatch client and the real callbacks so that `on_load`,
/// `on_block` and one terminal callback reach them in order, each at most once.
pub struct LifecycleGuard {
    dispatch_id: DispatchId,
    route: String,
    inner: Arc<dyn CommandCallbacks>,
    state: Mutex<GuardState>,
}

impl LifecycleGuard {
    pub fn new(dispatch_id: DispatchId, route: String, inner: Arc<dyn CommandCallbacks>) -> Self {
        Self {
            dispatch_id,
            route,
            inner,
            state: Mutex::new(GuardState {
                phase: DispatchPhase::Transmitting,
                error_reason: None,
            }),
        }
    }

    pub fn phase(&self) -> DispatchPhase {
        self.lock().phase
    }

    pub fn settlement(&self) -> Option<Settlement> {
        match self.phase() {
            DispatchPhase::Settled(settlement) => Some(settlement),
            _ => None,
        }
    }

    pub fn error_reason(&self) -> Option<String> {
        self.lock().error_reason.clone()
    }

    /// Called once the dispatch client returned. A failed call that never
    /// reported a terminal callback gets `on_error` on its behalf, unless it
    /// failed before `on_load`: nothing was transmitted then, the dispatch is
    /// aborted without callbacks and `false` is returned.
    pub fn finish(&self, failure: Option<&str>) -> bool {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            return true;
        }
        match failure {
            Some(reason) if state.phase == DispatchPhase::Transmitting => {
                warn!(
                    dispatch_id = %self.dispatch_id,
                    route = %self.route,
                    "dispatch failed before transmission: {reason}"
                );
                state.phase = DispatchPhase::Aborted(ErrorCode::Dispatch);
                state.error_reason = Some(reason.to_string());
                false
            }
            Some(reason) => {
                drop(state);
                self.on_error(reason);
                true
            }
            None => {
                warn!(
                    dispatch_id = %self.dispatch_id,
                    route = %self.route,
                    phase = ?state.phase,
                    "dispatch client settled without a terminal callback"
                );
                true
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forwarding runs under the state lock so callbacks fired from several
    /// threads reach `inner` in the order their transitions were accepted.
    fn transition(
        &self,
        allowed: &[DispatchPhase],
        next: DispatchPhase,
        callback: &str,
        forward: impl FnOnce(&mut GuardState),
    ) {
        let mut state = self.lock();
        if !allowed.contains(&state.phase) {
            warn!(
                dispatch_id = %self.dispatch_id,
                route = %self.route,
                phase = ?state.phase,
                callback,
                "dropping out-of-order lifecycle callback"
            );
            return;
        }
        debug!(
            dispatch_id = %self.dispatch_id,
            route = %self.route,
            from = ?state.phase,
            to = ?next,
            "lifecycle transition"
        );
        state.phase = next;
        forward(&mut state);
    }
}

impl CommandCallbacks for LifecycleGuard {
    fn on_load(&self) {
        self.transition(
            &[DispatchPhase::Transmitting],
            DispatchPhase::AwaitingBlock,
            "on_load",
            |_| self.inner.on_load(),
        );
    }

    fn on_block(&self, block_id: &BlockId) {
        self.transition(
            &[DispatchPhase::AwaitingBlock],
            DispatchPhase::InBlock,
            "on_block",
            |_| self.inner.on_block(block_id),
        );
    }

    fn on_success(&self) {
        self.transition(
            &[DispatchPhase::InBlock],
            DispatchPhase::Settled(Settlement::Success),
            "on_success",
            |_| self.inner.on_success(),
        );
    }

    fn on_error(&self, reason: &str) {
        self.transition(
            &[DispatchPhase::AwaitingBlock, DispatchPhase::InBlock],
            DispatchPhase::Settled(Settlement::Error),
            "on_error",
            |state| {
                state.error_reason = Some(reason.to_string());
                self.inner.on_error(reason);
            },
        );
    }
}

pub struct FanoutCallbacks {
    targets: Vec<Arc<dyn CommandCallbacks>>,
}

impl FanoutCallbacks {
    pub fn new(targets: Vec<Arc<dyn CommandCallbacks>>) -> Self {
        Self { targets }
    }
}

impl CommandCallbacks for FanoutCallbacks {
    fn on_load(&self) {
        self.targets.iter().for_each(|target| target.on_load());
    }

    fn on_block(&self, block_id: &BlockId) {
        self.targets.iter().for_each(|target| target.on_block(block_id));
    }

    fn on_success(&self) {
        self.targets.iter().for_each(|target| target.on_success());
    }

    fn on_error(&self, reason: &str) {
        self.targets.iter().for_each(|target| target.on_error(reason));
    }
}

/// Forwards callbacks as [`LifecycleEvent`]s. A closed receiver is ignored.
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelCallbacks {
    pub fn new(tx: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

impl CommandCallbacks for ChannelCallbacks {
    fn on_load(&self) {
        self.send(LifecycleEvent::Load);
    }

    fn on_block(&self, block_id: &BlockId) {
        self.send(LifecycleEvent::Block(block_id.clone()));
    }

    fn on_success(&self) {
        self.send(LifecycleEvent::Success);
    }

    fn on_error(&self, reason: &str) {
        self.send(LifecycleEvent::Error(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().expect("recorder lock").clone()
        }
    }

    impl CommandCallbacks for Recorder {
        fn on_load(&self) {
            self.events.lock().expect("lock").push(LifecycleEvent::Load);
        }

        fn on_block(&self, block_id: &BlockId) {
            self.events
                .lock()
                .expect("lock")
                .push(LifecycleEvent::Block(block_id.clone()));
        }

        fn on_success(&self) {
            self.events.lock().expect("lock").push(LifecycleEvent::Success);
        }

        fn on_error(&self, reason: &str) {
            self.events
                .lock()
                .expect("lock")
                .push(LifecycleEvent::Error(reason.to_string()));
        }
    }

    fn guard() -> (LifecycleGuard, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let guard = LifecycleGuard::new(
            DispatchId::new(),
            "TrafficLight/Red".to_string(),
            recorder.clone(),
        );
        (guard, recorder)
    }

    #[test]
    fn forwards_well_ordered_success() {
        let (guard, recorder) = guard();
        guard.on_load();
        guard.on_block(&BlockId::new("0x01"));
        guard.on_success();

        assert_eq!(
            recorder.events(),
            vec![
                LifecycleEvent::Load,
                LifecycleEvent::Block(BlockId::new("0x01")),
                LifecycleEvent::Success,
            ]
        );
        assert_eq!(guard.settlement(), Some(Settlement::Success));
    }

    #[test]
    fn drops_duplicates_and_late_callbacks() {
        let (guard, recorder) = guard();
        guard.on_load();
        guard.on_load();
        guard.on_block(&BlockId::new("0x01"));
        guard.on_error("reverted");
        guard.on_success();
        guard.on_error("again");

        assert_eq!(
            recorder.events(),
            vec![
                LifecycleEvent::Load,
                LifecycleEvent::Block(BlockId::new("0x01")),
                LifecycleEvent::Error("reverted".into()),
            ]
        );
        assert_eq!(guard.error_reason().as_deref(), Some("reverted"));
    }

    #[test]
    fn success_without_block_is_rejected() {
        let (guard, recorder) = guard();
        guard.on_load();
        guard.on_success();

        assert_eq!(recorder.events(), vec![LifecycleEvent::Load]);
        assert_eq!(guard.phase(), DispatchPhase::AwaitingBlock);
    }

    #[test]
    fn failure_before_load_aborts_without_callbacks() {
        let (guard, recorder) = guard();
        guard.on_error("rpc unreachable");

        assert!(!guard.finish(Some("rpc unreachable")));
        assert!(recorder.events().is_empty());
        assert_eq!(guard.phase(), DispatchPhase::Aborted(ErrorCode::Dispatch));
        assert_eq!(guard.error_reason().as_deref(), Some("rpc unreachable"));

        guard.on_load();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn callbacks_from_racing_threads_stay_ordered() {
        for _ in 0..200 {
            let (guard, recorder) = guard();
            let guard = Arc::new(guard);
            let loader = {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.on_load())
            };
            let includer = {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        guard.on_block(&BlockId::new("0x01"));
                    }
                })
            };
            loader.join().expect("loader");
            includer.join().expect("includer");

            let events = recorder.events();
            assert_eq!(events.first(), Some(&LifecycleEvent::Load));
            assert!(events.len() <= 2);
        }
    }

    #[test]
    fn finish_reports_error_for_silent_failures() {
        let (guard, recorder) = guard();
        guard.on_load();
        assert!(guard.finish(Some("connection dropped")));
        assert!(guard.finish(Some("ignored")));

        assert_eq!(
            recorder.events(),
            vec![
                LifecycleEvent::Load,
                LifecycleEvent::Error("connection dropped".into()),
            ]
        );
    }
}
