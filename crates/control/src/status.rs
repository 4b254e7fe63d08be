//! Live status message: poll the PC and the link, edit the message on change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use onoffpc_host::HostProber;
use onoffpc_link::RemoteLink;

use crate::surface::{EditOutcome, SurfaceEditor, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub host_up: bool,
    pub link_connected: bool,
}

impl StatusSnapshot {
    pub fn render(&self) -> String {
        let host = if self.host_up {
            "PC: powered on"
        } else {
            "PC: powered off"
        };
        let link = if self.link_connected {
            "Agent: connected"
        } else {
            "Agent: no connection"
        };
        format!("{host}\n{link}")
    }
}

/// The two inputs a snapshot is computed from.
#[derive(Clone)]
pub struct StatusProbe {
    link: Arc<RemoteLink>,
    prober: Arc<dyn HostProber>,
    address: String,
}

impl StatusProbe {
    pub fn new(link: Arc<RemoteLink>, prober: Arc<dyn HostProber>, address: impl Into<String>) -> Self {
        Self {
            link,
            prober,
            address: address.into(),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            host_up: self.prober.is_up(&self.address).await,
            link_connected: self.link.is_connected(),
        }
    }
}

/// Owns the single polling loop that keeps the registered status message
/// current.
pub struct StatusBroadcaster {
    probe: StatusProbe,
    editor: Arc<dyn SurfaceEditor>,
    interval: Duration,
    surface_tx: watch::Sender<Option<SurfaceId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusBroadcaster {
    pub fn new(probe: StatusProbe, editor: Arc<dyn SurfaceEditor>, interval: Duration) -> Self {
        let (surface_tx, _) = watch::channel(None);
        Self {
            probe,
            editor,
            interval,
            surface_tx,
            task: Mutex::new(None),
        }
    }

    /// Points the loop at `surface` and starts the loop if it is not already
    /// running.  Returns `true` only when a new loop was spawned.
    pub async fn start(&self, surface: SurfaceId) -> bool {
        self.surface_tx.send_replace(Some(surface));

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(?surface, "status loop already running; surface re-targeted");
            return false;
        }

        info!(?surface, interval = ?self.interval, "starting status loop");
        *task = Some(tokio::spawn(run_loop(
            self.probe.clone(),
            Arc::clone(&self.editor),
            self.interval,
            self.surface_tx.subscribe(),
        )));
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn current_text(&self) -> String {
        self.probe.snapshot().await.render()
    }
}

async fn run_loop(
    probe: StatusProbe,
    editor: Arc<dyn SurfaceEditor>,
    period: Duration,
    mut surface_rx: watch::Receiver<Option<SurfaceId>>,
) {
    let mut last_pushed: Option<String> = None;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // A freshly registered message starts out with placeholder text.
        if surface_rx.has_changed().unwrap_or(false) {
            last_pushed = None;
        }
        let Some(surface) = *surface_rx.borrow_and_update() else {
            continue;
        };

        let text = probe.snapshot().await.render();
        if last_pushed.as_deref() == Some(text.as_str()) {
            continue;
        }

        match editor.edit_status(surface, &text).await {
            Ok(EditOutcome::Applied) => {
                debug!(?surface, status = %text.replace('\n', " | "), "status updated");
                last_pushed = Some(text);
            }
            Ok(EditOutcome::Unchanged) => last_pushed = Some(text),
            Err(err) => warn!(?surface, %err, "status update failed; will retry"),
        }
    }
}
