//! Debounced, retrying sync scheduling
//!
//! Workload handlers call [`SyncTrigger::notify`] whenever the discovery store
//! changed. A single loop owns the timer and runs at most one pass at a time:
//!
//! ```text
//! Idle/Pending/Backoff --change--> Pending (timer re-armed with the debounce)
//! Pending --timer--> Running
//! Running --ok, nothing owed--> Idle
//! Running --ok, change arrived meanwhile--> Pending
//! Running --error--> Backoff (timer armed with the retry delay)
//! Backoff --timer--> Running
//! ```

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// One reconciliation pass
#[async_trait]
pub trait SyncPass: Send + Sync {
    async fn sync(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Quiet period after the last change before a pass starts
    pub debounce: Duration,
    /// Delay before a failed pass is retried
    pub retry_delay: Duration,
    /// Run a pass this long after the last one even without changes
    pub resync_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            retry_delay: Duration::from_secs(10),
            resync_interval: None,
        }
    }
}

/// Externally visible scheduler state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Pending,
    Running,
    Backoff,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Idle { resync_at: Option<Instant> },
    Pending { at: Instant },
    Backoff { at: Instant },
}

impl Phase {
    fn deadline(&self) -> Option<Instant> {
        match *self {
            Phase::Idle { resync_at } => resync_at,
            Phase::Pending { at } | Phase::Backoff { at } => Some(at),
        }
    }

    fn state(&self) -> SyncState {
        match self {
            Phase::Idle { .. } => SyncState::Idle,
            Phase::Pending { .. } => SyncState::Pending,
            Phase::Backoff { .. } => SyncState::Backoff,
        }
    }
}

enum Wake {
    Changed,
    Closed,
    Timer,
}

/// Handle used by event handlers to mark the desired state dirty
#[derive(Clone, Debug)]
pub struct SyncTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl SyncTrigger {
    /// Never blocks; a stopped scheduler silently drops the notification
    pub fn notify(&self) {
        if self.tx.send(()).is_err() {
            trace!("Sync scheduler stopped, dropping change notification");
        }
    }
}

/// SyncScheduler coalesces change notifications into reconciliation passes
pub struct SyncScheduler<P: SyncPass> {
    config: SchedulerConfig,
    pass: P,
    rx: mpsc::UnboundedReceiver<()>,
    state: watch::Sender<SyncState>,
}

impl<P: SyncPass> SyncScheduler<P> {
    pub fn new(config: SchedulerConfig, pass: P) -> (Self, SyncTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SyncState::Idle);
        (
            Self {
                config,
                pass,
                rx,
                state,
            },
            SyncTrigger { tx },
        )
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run until every [`SyncTrigger`] has been dropped. A pass that is still
    /// owed at that point runs once more before returning.
    pub async fn run(mut self) {
        info!(
            "Sync scheduler started (debounce {:?}, retry {:?}, resync {:?})",
            self.config.debounce, self.config.retry_delay, self.config.resync_interval
        );
        let mut phase = self.idle();

        loop {
            self.state.send_replace(phase.state());
            let deadline = phase.deadline();
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                event = self.rx.recv() => match event {
                    Some(()) => Wake::Changed,
                    None => Wake::Closed,
                },
                () = timer => Wake::Timer,
            };

            phase = match wake {
                Wake::Changed => {
                    trace!("Change received, sync in {:?}", self.config.debounce);
                    self.pending()
                }
                Wake::Timer => self.run_pass(phase).await,
                Wake::Closed => {
                    if matches!(phase, Phase::Pending { .. } | Phase::Backoff { .. }) {
                        info!("All sync triggers dropped, running owed sync before stopping");
                        self.run_pass(phase).await;
                    } else {
                        info!("All sync triggers dropped, stopping scheduler");
                    }
                    break;
                }
            };
        }
    }

    async fn run_pass(&mut self, previous: Phase) -> Phase {
        self.state.send_replace(SyncState::Running);
        match previous {
            Phase::Backoff { .. } => debug!("Retrying failed sync"),
            Phase::Idle { .. } => debug!("Periodic resync"),
            Phase::Pending { .. } => debug!("Syncing registrations"),
        }

        let result = self.pass.sync().await;

        let mut owed = false;
        while self.rx.try_recv().is_ok() {
            owed = true;
        }

        match result {
            Err(e) => {
                warn!("Sync failed, retry in {:?}: {}", self.config.retry_delay, e);
                Phase::Backoff {
                    at: Instant::now() + self.config.retry_delay,
                }
            }
            Ok(()) if owed => {
                debug!("Changes arrived during sync, scheduling follow-up");
                self.pending()
            }
            Ok(()) => {
                debug!("Registrations synced successfully");
                self.idle()
            }
        }
    }

    fn pending(&self) -> Phase {
        Phase::Pending {
            at: Instant::now() + self.config.debounce,
        }
    }

    /// Consume queued notifications without running a pass
    #[cfg(test)]
    pub(crate) fn drain_notifications(&mut self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    fn idle(&self) -> Phase {
        Phase::Idle {
            resync_at: self.config.resync_interval.map(|interval| Instant::now() + interval),
        }
    }
}

#[async_trait]
impl<T: SyncPass + ?Sized> SyncPass for std::sync::Arc<T> {
    async fn sync(&self) -> Result<()> {
        (**self).sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;

    /// Counts passes; fails while the script says so
    #[derive(Default)]
    struct ScriptedPass {
        runs: AtomicUsize,
        failures: Mutex<VecDeque<bool>>,
        duration: Duration,
    }

    impl ScriptedPass {
        fn failing(script: &[bool]) -> Self {
            Self {
                failures: Mutex::new(script.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncPass for ScriptedPass {
        async fn sync(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }
            let fail = self.failures.lock().unwrap().pop_front().unwrap_or(false);
            if fail {
                Err(CoreError::InvalidConfiguration("scripted failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_secs(1),
            retry_delay: Duration::from_secs(10),
            resync_interval: None,
        }
    }

    fn start(
        config: SchedulerConfig,
        pass: Arc<ScriptedPass>,
    ) -> (SyncTrigger, watch::Receiver<SyncState>, JoinHandle<()>) {
        let (scheduler, trigger) = SyncScheduler::new(config, pass);
        let state = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run());
        (trigger, state, handle)
    }

    async fn advance(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_pass() {
        let pass = Arc::new(ScriptedPass::default());
        let (trigger, state, _handle) = start(config(), pass.clone());

        for _ in 0..10 {
            trigger.notify();
            advance(50).await;
        }
        assert_eq!(pass.runs(), 0);
        assert_eq!(*state.borrow(), SyncState::Pending);

        advance(1_100).await;
        assert_eq!(pass.runs(), 1);
        assert_eq!(*state.borrow(), SyncState::Idle);

        advance(60_000).await;
        assert_eq!(pass.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_is_trailing_edge() {
        let pass = Arc::new(ScriptedPass::default());
        let (trigger, _state, _handle) = start(config(), pass.clone());

        trigger.notify();
        advance(900).await;
        trigger.notify();
        advance(900).await;
        assert_eq!(pass.runs(), 0);
        advance(200).await;
        assert_eq!(pass.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_pass_schedules_follow_up() {
        let pass = Arc::new(ScriptedPass {
            duration: Duration::from_secs(5),
            ..Default::default()
        });
        let (trigger, state, _handle) = start(config(), pass.clone());

        trigger.notify();
        advance(1_500).await;
        assert_eq!(pass.runs(), 1);
        assert_eq!(*state.borrow(), SyncState::Running);

        trigger.notify();
        trigger.notify();
        advance(5_000).await;
        assert_eq!(*state.borrow(), SyncState::Pending);

        advance(1_000).await;
        assert_eq!(pass.runs(), 2);
        advance(10_000).await;
        assert_eq!(pass.runs(), 2);
        assert_eq!(*state.borrow(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_after_backoff() {
        let pass = Arc::new(ScriptedPass::failing(&[true, true]));
        let (trigger, state, _handle) = start(config(), pass.clone());

        trigger.notify();
        advance(1_100).await;
        assert_eq!(pass.runs(), 1);
        assert_eq!(*state.borrow(), SyncState::Backoff);

        advance(10_000).await;
        assert_eq!(pass.runs(), 2);
        assert_eq!(*state.borrow(), SyncState::Backoff);

        advance(10_000).await;
        assert_eq!(pass.runs(), 3);
        assert_eq!(*state.borrow(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_during_backoff_uses_debounce() {
        let pass = Arc::new(ScriptedPass::failing(&[true]));
        let (trigger, state, _handle) = start(config(), pass.clone());

        trigger.notify();
        advance(1_100).await;
        assert_eq!(*state.borrow(), SyncState::Backoff);

        trigger.notify();
        advance(10).await;
        assert_eq!(*state.borrow(), SyncState::Pending);
        advance(1_100).await;
        assert_eq!(pass.runs(), 2);
        assert_eq!(*state.borrow(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_resync() {
        let pass = Arc::new(ScriptedPass::default());
        let (_trigger, _state, _handle) = start(
            SchedulerConfig {
                resync_interval: Some(Duration::from_secs(30)),
                ..config()
            },
            pass.clone(),
        );

        advance(29_000).await;
        assert_eq!(pass.runs(), 0);
        advance(2_000).await;
        assert_eq!(pass.runs(), 1);
        advance(30_000).await;
        assert_eq!(pass.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owed_pass_runs_when_triggers_dropped() {
        let pass = Arc::new(ScriptedPass::default());
        let (trigger, _state, handle) = start(config(), pass.clone());
        trigger.notify();
        drop(trigger);
        handle.await.unwrap();
        assert_eq!(pass.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retry_runs_when_triggers_dropped() {
        let pass = Arc::new(ScriptedPass::failing(&[true]));
        let (trigger, state, handle) = start(config(), pass.clone());
        trigger.notify();
        advance(1_100).await;
        assert_eq!(*state.borrow(), SyncState::Backoff);

        drop(trigger);
        handle.await.unwrap();
        assert_eq!(pass.runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_triggers_dropped() {
        let pass = Arc::new(ScriptedPass::default());
        let (trigger, _state, handle) = start(config(), pass.clone());
        drop(trigger);
        handle.await.unwrap();
        assert_eq!(pass.runs(), 0);
    }
}
