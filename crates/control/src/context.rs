use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use onoffpc_host::{HostProber, MacAddress, WakeSender};
use onoffpc_link::RemoteLink;

use crate::action::{ActionKind, AllowList, UserId};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::status::{StatusBroadcaster, StatusProbe};
use crate::surface::{Responder, SurfaceEditor, SurfaceId};

/// Everything needed to assemble a [`ControlContext`].
pub struct ControlParts {
    pub link: Arc<RemoteLink>,
    pub prober: Arc<dyn HostProber>,
    pub waker: Arc<dyn WakeSender>,
    pub editor: Arc<dyn SurfaceEditor>,
    pub mac: MacAddress,
    /// Address pinged for the status line.
    pub host_address: String,
    pub allowed_users: AllowList,
    pub status_interval: Duration,
}

/// Process-wide state shared by all transport handlers: the link and its
/// supervisor, the action dispatcher and the status loop.
pub struct ControlContext {
    link: Arc<RemoteLink>,
    dispatcher: Dispatcher,
    status: StatusBroadcaster,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ControlContext {
    pub fn new(parts: ControlParts) -> Self {
        let probe = StatusProbe::new(Arc::clone(&parts.link), parts.prober, parts.host_address);
        Self {
            dispatcher: Dispatcher::new(
                Arc::clone(&parts.link),
                parts.waker,
                parts.mac,
                parts.allowed_users,
            ),
            status: StatusBroadcaster::new(probe, parts.editor, parts.status_interval),
            link: parts.link,
            supervisor: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<RemoteLink> {
        &self.link
    }

    /// Starts the background reconnect loop once.
    pub async fn start_link(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_none() {
            info!(address = %self.link.settings().address(), "starting link supervisor");
            *supervisor = Some(self.link.spawn_supervisor());
        }
    }

    pub fn is_authorized(&self, user: UserId) -> bool {
        self.dispatcher.is_authorized(user)
    }

    pub async fn dispatch(
        &self,
        user: UserId,
        action: ActionKind,
        responder: Arc<dyn Responder>,
    ) -> DispatchOutcome {
        self.dispatcher.dispatch(user, action, responder).await
    }

    /// Registers the message that shows live status.  Callers check
    /// authorization first.
    pub async fn start_status(&self, surface: SurfaceId) -> bool {
        self.status.start(surface).await
    }

    pub async fn is_status_running(&self) -> bool {
        self.status.is_running().await
    }

    pub async fn status_text(&self) -> String {
        self.status.current_text().await
    }

    pub async fn is_action_pending(&self, action: ActionKind) -> bool {
        self.dispatcher.tasks().is_active(&action).await
    }

    /// Aborts pending actions and every background loop.
    pub async fn shutdown(&self) {
        self.dispatcher.tasks().cancel_all().await;
        self.status.stop().await;
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        info!("control context stopped");
    }
}
