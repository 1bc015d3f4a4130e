//! FIFO admission of top-level turns, served by a single worker task that
//! owns the orchestrator.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cadence_core::messages::Message;

use crate::orchestrator::{TurnOptions, TurnOrchestrator};

struct QueuedTurn {
    messages: Vec<Message>,
    options: TurnOptions,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueuedTurn>,
    /// Cancels the in-flight turn, if any.
    current: Option<CancellationToken>,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    shutdown: CancellationToken,
    /// Count of turns the worker has finished with, by any outcome.
    finished: watch::Sender<u64>,
}

impl Shared {
    fn pop_next(&self) -> Option<(QueuedTurn, CancellationToken)> {
        let mut state = self.state.lock();
        let turn = state.items.pop_front()?;
        let token = CancellationToken::new();
        state.current = Some(token.clone());
        Some((turn, token))
    }
}

/// Handle to the admission queue. Dropping it stops the worker.
pub struct TurnQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<TurnOrchestrator>>,
}

impl TurnQueue {
    /// Start the worker task. Must be called within a tokio runtime.
    pub fn spawn(orchestrator: TurnOrchestrator) -> Self {
        let (finished, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            finished,
        });
        let worker = tokio::spawn(serve(Arc::clone(&shared), orchestrator));
        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub fn submit(&self, messages: Vec<Message>, options: TurnOptions) {
        self.enqueue(QueuedTurn { messages, options }, false);
    }

    /// Queue ahead of everything pending.
    pub fn submit_front(&self, messages: Vec<Message>, options: TurnOptions) {
        self.enqueue(QueuedTurn { messages, options }, true);
    }

    fn enqueue(&self, turn: QueuedTurn, front: bool) {
        if self.shared.shutdown.is_cancelled() {
            warn!("turn submitted after shutdown, dropping");
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if front {
                state.items.push_front(turn);
            } else {
                state.items.push_back(turn);
            }
        }
        self.shared.wake.notify_one();
    }

    /// Drop every pending turn and cancel the one in flight. Returns the
    /// number of pending turns dropped.
    pub fn flush(&self) -> usize {
        let (dropped, current) = {
            let mut state = self.shared.state.lock();
            let dropped = state.items.len();
            state.items.clear();
            (dropped, state.current.clone())
        };
        let cancelled = current.is_some();
        if let Some(token) = current {
            token.cancel();
        }
        info!(dropped, cancelled, "turn queue flushed");
        dropped
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Whether a turn is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().current.is_some()
    }

    /// Watch the number of turns finished so far.
    pub fn finished(&self) -> watch::Receiver<u64> {
        self.shared.finished.subscribe()
    }

    /// Wait until nothing is pending or in flight.
    pub async fn idle(&self) {
        let mut finished = self.finished();
        loop {
            if self.pending() == 0 && !self.is_busy() {
                return;
            }
            if finished.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the worker once the in-flight turn is done; pending turns are
    /// dropped. Returns the orchestrator, or `None` if the worker panicked.
    pub async fn shutdown(mut self) -> Option<TurnOrchestrator> {
        self.shared.shutdown.cancel();
        let dropped = {
            let mut state = self.shared.state.lock();
            let dropped = state.items.len();
            state.items.clear();
            dropped
        };
        debug!(dropped, "turn queue shutting down");

        let worker = self.worker.take()?;
        match worker.await {
            Ok(orchestrator) => Some(orchestrator),
            Err(e) => {
                warn!(error = %e, "turn queue worker did not exit cleanly");
                None
            }
        }
    }
}

impl Drop for TurnQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Some(token) = self.shared.state.lock().current.take() {
            token.cancel();
        }
    }
}

async fn serve(shared: Arc<Shared>, mut orchestrator: TurnOrchestrator) -> TurnOrchestrator {
    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }
        let (turn, token) = match shared.pop_next() {
            Some(next) => next,
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = shared.wake.notified() => {}
                }
                continue;
            }
        };

        tokio::select! {
            result = orchestrator.run_turn(turn.messages, turn.options) => match result {
                Ok(report) => debug!(
                    turn_id = %report.turn_id,
                    sentences = report.sentences,
                    follow_ups = report.follow_ups.len(),
                    "queued turn finished"
                ),
                Err(e) => warn!(error = %e, kind = e.error_kind(), "queued turn failed"),
            },
            _ = token.cancelled() => info!("in-flight turn cancelled"),
        }

        shared.state.lock().current = None;
        shared.finished.send_modify(|n| *n += 1);
    }
    debug!("turn queue worker stopped");
    orchestrator
}
