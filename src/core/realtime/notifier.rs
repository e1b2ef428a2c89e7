//! Ordered delivery of session callbacks.
//!
//! The controller queues notifications while it holds its state lock, and a
//! single dispatcher task runs the callbacks in queue order. A state change
//! therefore can never overtake an earlier one, and nothing queued after
//! `disconnected` is delivered before it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::base::{SessionConfig, SessionError, SessionState, TranscriptEntry};

tokio::task_local! {
    static DISPATCHING: ();
}

/// One callback invocation.
#[derive(Debug)]
pub(crate) enum Notification {
    State(SessionState),
    Error(SessionError),
    Transcript(TranscriptEntry),
    SessionEnd(Vec<TranscriptEntry>),
}

type Queued = (Notification, oneshot::Sender<()>);

/// Handle to the dispatcher task, shared by all clones of a controller.
#[derive(Clone)]
pub(crate) struct Notifier {
    config: Arc<SessionConfig>,
    queue: Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<Queued>>>>,
}

/// Resolves once a queued notification has been handled.
#[must_use]
pub(crate) struct Delivery(Option<oneshot::Receiver<()>>);

impl Delivery {
    pub(crate) fn none() -> Self {
        Self(None)
    }

    /// Wait for the callback to return.
    ///
    /// Returns immediately when called from inside a callback, since the
    /// dispatcher cannot get to later notifications before it returns.
    pub(crate) async fn wait(self) {
        if DISPATCHING.try_with(|_| ()).is_ok() {
            return;
        }
        if let Some(ack) = self.0 {
            let _ = ack.await;
        }
    }
}

impl Notifier {
    pub(crate) fn new(config: Arc<SessionConfig>) -> Self {
        Self {
            config,
            queue: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Queue a notification. Must be called from within a Tokio runtime.
    ///
    /// The dispatcher is spawned on first use and respawned if the runtime
    /// that owned it has gone away.
    pub(crate) fn notify(&self, notification: Notification) -> Delivery {
        let (ack_tx, ack_rx) = oneshot::channel();
        let mut queue = self.queue.lock();

        let mut item = (notification, ack_tx);
        if let Some(tx) = queue.as_ref() {
            match tx.send(item) {
                Ok(()) => return Delivery(Some(ack_rx)),
                Err(mpsc::error::SendError(returned)) => item = returned,
            }
        }

        let tx = self.spawn_dispatcher();
        if tx.send(item).is_err() {
            return Delivery::none();
        }
        *queue = Some(tx);
        Delivery(Some(ack_rx))
    }

    fn spawn_dispatcher(&self) -> mpsc::UnboundedSender<Queued> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
        let config = self.config.clone();
        tokio::spawn(DISPATCHING.scope((), async move {
            while let Some((notification, ack)) = rx.recv().await {
                dispatch(&config, notification).await;
                let _ = ack.send(());
            }
            trace!("Notification dispatcher stopped");
        }));
        tx
    }
}

async fn dispatch(config: &SessionConfig, notification: Notification) {
    match notification {
        Notification::State(state) => {
            if let Some(cb) = &config.on_state_change {
                cb(state).await;
            }
        }
        Notification::Error(err) => {
            if let Some(cb) = &config.on_error {
                cb(err).await;
            }
        }
        Notification::Transcript(entry) => {
            if let Some(cb) = &config.on_transcript_event {
                cb(entry).await;
            }
        }
        Notification::SessionEnd(entries) => {
            if let Some(cb) = &config.on_session_end {
                cb(entries).await;
            }
        }
    }
}
